//! Break schedule held in memory for the current service day, and the window
//! arithmetic used to match freezes against it.

use chrono::{Datelike, Duration, NaiveDate, NaiveDateTime};

use crate::db::ScheduleEntry;

/// Deviation up to this many minutes counts as on time.
pub const COMPLIANCE_TOLERANCE_MINUTES: i64 = 2;
/// Slack on both sides of a scheduled break when matching a freeze.
pub const MATCH_BUFFER_MINUTES: i64 = 5;

/// A schedule entry pinned to concrete datetimes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduledWindow {
    pub entry_id: i64,
    pub break_name: String,
    pub shift_number: u8,
    pub start: NaiveDateTime,
    pub end: NaiveDateTime,
}

impl ScheduledWindow {
    /// Pins `entry` to `anchor`. Entries ending before they start run past midnight.
    pub fn anchored(entry: &ScheduleEntry, anchor: NaiveDate) -> Self {
        let start = anchor.and_time(entry.start_time);
        let mut end = anchor.and_time(entry.end_time);
        if end < start {
            end += Duration::days(1);
        }
        Self {
            entry_id: entry.id,
            break_name: entry.break_name.clone(),
            shift_number: entry.shift_number,
            start,
            end,
        }
    }

    /// Placement of `entry` on `anchor`, if the entry is scheduled for that weekday.
    pub fn on_date(entry: &ScheduleEntry, anchor: NaiveDate) -> Option<Self> {
        occurs_on(entry, anchor).then(|| Self::anchored(entry, anchor))
    }

    pub fn contains(&self, now: NaiveDateTime, buffer: Duration) -> bool {
        self.start - buffer <= now && now <= self.end + buffer
    }
}

/// Whole minutes in `delta`, rounded down; deviations within the tolerance
/// (and negative ones) are zero.
pub fn compliance_minutes(delta: Duration) -> i64 {
    let minutes = delta.num_seconds().div_euclid(60);
    if minutes <= COMPLIANCE_TOLERANCE_MINUTES {
        0
    } else {
        minutes
    }
}

pub fn describe_compliance(late_end_minutes: i64) -> String {
    if late_end_minutes == 0 {
        "on time".to_string()
    } else {
        format!("late by {late_end_minutes} min")
    }
}

/// Whether `entry` is scheduled on the calendar day `date` (Monday = 1).
pub fn occurs_on(entry: &ScheduleEntry, date: NaiveDate) -> bool {
    date.weekday().number_from_monday() == u32::from(entry.day_of_week)
}

/// ISO weekday numbers (Monday = 1) for a service date and the day after.
pub fn schedule_days(service_date: NaiveDate) -> [u8; 2] {
    let today = service_date.weekday().number_from_monday() as u8;
    let tomorrow = service_date.weekday().succ().number_from_monday() as u8;
    [today, tomorrow]
}

#[derive(Debug, Clone, Default)]
pub struct BreakSchedule {
    service_date: Option<NaiveDate>,
    entries: Vec<ScheduleEntry>,
}

impl BreakSchedule {
    pub fn new(service_date: NaiveDate, entries: Vec<ScheduleEntry>) -> Self {
        Self {
            service_date: Some(service_date),
            entries,
        }
    }

    pub fn service_date(&self) -> Option<NaiveDate> {
        self.service_date
    }

    pub fn entries(&self) -> &[ScheduleEntry] {
        &self.entries
    }

    pub fn get(&self, entry_id: i64) -> Option<&ScheduleEntry> {
        self.entries.iter().find(|entry| entry.id == entry_id)
    }

    /// Every placement of the shift's entries around `now` on the weekday
    /// each entry belongs to. Windows that straddle midnight match from
    /// either side.
    fn windows(&self, shift_number: u8, now: NaiveDateTime) -> impl Iterator<Item = ScheduledWindow> + '_ {
        let today = now.date();
        let anchors = [today, today - Duration::days(1), today + Duration::days(1)];
        self.entries
            .iter()
            .filter(move |entry| entry.shift_number == shift_number)
            .flat_map(move |entry| {
                anchors
                    .into_iter()
                    .filter_map(move |anchor| ScheduledWindow::on_date(entry, anchor))
            })
    }

    /// Scheduled break of `shift_number` whose buffered window contains `now`.
    pub fn match_freeze(&self, shift_number: u8, now: NaiveDateTime) -> Option<ScheduledWindow> {
        let buffer = Duration::minutes(MATCH_BUFFER_MINUTES);
        self.windows(shift_number, now)
            .find(|window| window.contains(now, buffer))
    }

    /// Scheduled break whose exact bounds contain `now`.
    pub fn active_window(&self, shift_number: u8, now: NaiveDateTime) -> Option<ScheduledWindow> {
        self.windows(shift_number, now)
            .find(|window| window.contains(now, Duration::zero()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveTime;

    fn entry(id: i64, shift_number: u8, start: (u32, u32), end: (u32, u32)) -> ScheduleEntry {
        entry_on(1, id, shift_number, start, end)
    }

    fn entry_on(
        day_of_week: u8,
        id: i64,
        shift_number: u8,
        start: (u32, u32),
        end: (u32, u32),
    ) -> ScheduleEntry {
        ScheduleEntry {
            id,
            day_of_week,
            shift_number,
            break_name: format!("break-{id}"),
            start_time: NaiveTime::from_hms_opt(start.0, start.1, 0).unwrap(),
            end_time: NaiveTime::from_hms_opt(end.0, end.1, 0).unwrap(),
            duration_minutes: 10,
        }
    }

    fn monday(h: u32, m: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 3, 4)
            .unwrap()
            .and_hms_opt(h, m, 0)
            .unwrap()
    }

    #[test]
    fn matches_within_the_buffer_only() {
        let schedule = BreakSchedule::new(monday(0, 0).date(), vec![entry(1, 1, (10, 0), (10, 10))]);

        assert!(schedule.match_freeze(1, monday(9, 55)).is_some());
        assert!(schedule.match_freeze(1, monday(10, 15)).is_some());
        assert!(schedule.match_freeze(1, monday(9, 50)).is_none());
        assert!(schedule.match_freeze(1, monday(10, 16)).is_none());
        assert!(schedule.match_freeze(2, monday(10, 5)).is_none());
    }

    #[test]
    fn exact_window_has_no_buffer() {
        let schedule = BreakSchedule::new(monday(0, 0).date(), vec![entry(1, 1, (10, 0), (10, 10))]);

        assert!(schedule.active_window(1, monday(9, 58)).is_none());
        assert!(schedule.active_window(1, monday(10, 0)).is_some());
        assert!(schedule.active_window(1, monday(10, 10)).is_some());
        assert!(schedule.active_window(1, monday(10, 11)).is_none());
    }

    #[test]
    fn overnight_breaks_match_on_both_sides_of_midnight() {
        let schedule = BreakSchedule::new(monday(0, 0).date(), vec![entry(7, 3, (23, 50), (0, 20))]);

        let before = schedule.match_freeze(3, monday(23, 52)).unwrap();
        assert_eq!(before.start, monday(23, 50));
        assert_eq!(before.end, monday(23, 50) + Duration::minutes(30));

        let tuesday = Duration::days(1);
        let after = schedule.match_freeze(3, monday(0, 10) + tuesday).unwrap();
        assert_eq!(after.start, monday(23, 50));
        assert_eq!(after.end, monday(0, 20) + tuesday);

        // The same clock time on Monday morning belongs to Sunday's night.
        assert!(schedule.match_freeze(3, monday(0, 10)).is_none());
    }

    #[test]
    fn entries_only_match_on_their_own_weekday() {
        let sunday = monday(0, 0).date() - Duration::days(1);
        let schedule = BreakSchedule::new(
            sunday,
            vec![
                entry_on(1, 1, 1, (10, 0), (10, 10)),
                entry_on(7, 2, 1, (12, 0), (12, 10)),
            ],
        );
        let on_sunday = |h: u32, m: u32| monday(h, m) - Duration::days(1);

        assert!(schedule.match_freeze(1, on_sunday(10, 0)).is_none());
        assert!(schedule.active_window(1, on_sunday(10, 5)).is_none());
        assert_eq!(schedule.match_freeze(1, on_sunday(12, 0)).unwrap().entry_id, 2);

        assert_eq!(schedule.match_freeze(1, monday(10, 0)).unwrap().entry_id, 1);
        assert!(schedule.match_freeze(1, monday(12, 0)).is_none());
    }

    #[test]
    fn compliance_rounds_down_and_applies_tolerance() {
        assert_eq!(compliance_minutes(Duration::minutes(2)), 0);
        assert_eq!(compliance_minutes(Duration::seconds(179)), 0);
        assert_eq!(compliance_minutes(Duration::minutes(4)), 4);
        assert_eq!(compliance_minutes(Duration::seconds(-300)), 0);
        assert_eq!(describe_compliance(0), "on time");
        assert_eq!(describe_compliance(6), "late by 6 min");
    }

    #[test]
    fn schedule_days_wrap_the_week() {
        let sunday = NaiveDate::from_ymd_opt(2024, 3, 10).unwrap();
        assert_eq!(schedule_days(sunday), [7, 1]);
    }
}
