use anyhow::{Context, Result};
use chrono::{Duration, NaiveDate, NaiveDateTime};
use uuid::Uuid;

use super::{
    freeze::{AvailabilitySnapshot, FreezeDetector, ReferenceStrategy},
    schedule::{
        compliance_minutes, describe_compliance, schedule_days, BreakSchedule, ScheduledWindow,
    },
};
use crate::{
    db::{BreakRecord, Database},
    shifts::ShiftCalendar,
    utils::{suppressed_suffix, FaultThrottle},
};

const ENABLE_LOGS: bool = true;

const START_FAULT_KEY: &str = "break:start";

use crate::{log_debug, log_error, log_info, log_warn};

/// The break currently written to the store without an end time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpenBreak {
    pub record_id: String,
    pub started_at: NaiveDateTime,
    pub window: ScheduledWindow,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum BreakPhase {
    Running,
    InBreak(OpenBreak),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BreakTransition {
    Started {
        record_id: String,
        break_name: String,
        early_start_minutes: i64,
    },
    Ended {
        record_id: String,
        break_name: String,
        duration_minutes: i64,
        late_end_minutes: i64,
    },
    /// Counters froze outside any scheduled break.
    Unscheduled { shift_number: u8 },
}

/// Turns frozen availability counters into break records.
pub struct BreakStateMachine {
    store: Database,
    calendar: ShiftCalendar,
    freeze: FreezeDetector,
    schedule: BreakSchedule,
    phase: BreakPhase,
    unscheduled_reported: bool,
    throttle: FaultThrottle,
}

impl BreakStateMachine {
    pub fn new(store: Database, calendar: ShiftCalendar, strategy: ReferenceStrategy) -> Self {
        Self {
            store,
            calendar,
            freeze: FreezeDetector::new(strategy),
            schedule: BreakSchedule::default(),
            phase: BreakPhase::Running,
            unscheduled_reported: false,
            throttle: FaultThrottle::default(),
        }
    }

    pub fn calendar(&self) -> &ShiftCalendar {
        &self.calendar
    }

    pub fn schedule(&self) -> &BreakSchedule {
        &self.schedule
    }

    pub fn open_break(&self) -> Option<&OpenBreak> {
        match &self.phase {
            BreakPhase::InBreak(open) => Some(open),
            BreakPhase::Running => None,
        }
    }

    pub fn is_frozen(&self) -> bool {
        self.freeze.is_frozen()
    }

    /// Replaces the schedule with the entries for `service_date` and the
    /// following day.
    pub async fn load_schedule(&mut self, service_date: NaiveDate) -> Result<usize> {
        let entries = self
            .store
            .load_schedule_entries(&schedule_days(service_date))
            .await
            .context("failed to load break schedule")?;
        let count = entries.len();
        self.schedule = BreakSchedule::new(service_date, entries);
        log_info!("Loaded {count} scheduled breaks for service date {service_date}");
        Ok(count)
    }

    /// Whether `now` is inside the exact bounds of a scheduled break.
    pub fn in_scheduled_window(&self, now: NaiveDateTime) -> bool {
        let shift = self.calendar.current_shift(now);
        self.schedule.active_window(shift, now).is_some()
    }

    /// Feeds one tick of availability readings. Store failures are logged and
    /// the transition is retried on a later tick.
    pub async fn update(
        &mut self,
        snapshots: &[AvailabilitySnapshot],
        now: NaiveDateTime,
    ) -> Option<BreakTransition> {
        if snapshots.is_empty() {
            return None;
        }
        let frozen = self.freeze.observe(snapshots);
        let in_break = matches!(self.phase, BreakPhase::InBreak(_));

        match (in_break, frozen) {
            (false, true) => self.try_open(now).await,
            (true, false) => match self.close(now).await {
                Ok(transition) => transition,
                Err(err) => {
                    log_error!("Failed to close break: {err:?}");
                    None
                }
            },
            (false, false) => {
                self.unscheduled_reported = false;
                None
            }
            (true, true) => None,
        }
    }

    async fn try_open(&mut self, now: NaiveDateTime) -> Option<BreakTransition> {
        let shift_number = self.calendar.current_shift(now);
        let Some(window) = self.schedule.match_freeze(shift_number, now) else {
            if self.unscheduled_reported {
                return None;
            }
            self.unscheduled_reported = true;
            log_info!("Counters frozen outside any scheduled break (shift {shift_number}); treating as unscheduled stop");
            return Some(BreakTransition::Unscheduled { shift_number });
        };

        let early_start_minutes = compliance_minutes(window.start - now);
        let record = BreakRecord {
            id: Uuid::new_v4().to_string(),
            start_time: now,
            end_time: None,
            shift_number,
            is_scheduled: true,
            matched_schedule_id: Some(window.entry_id),
            early_start_minutes,
            late_end_minutes: 0,
            duration_minutes: None,
        };

        if let Err(err) = self.store.insert_break_record(&record).await {
            if let Some(suppressed) = self.throttle.check(START_FAULT_KEY) {
                log_error!(
                    "Failed to record start of {}: {err:?}{}",
                    window.break_name,
                    suppressed_suffix(suppressed)
                );
            }
            return None;
        }
        self.throttle.clear(START_FAULT_KEY);

        log_info!(
            "Break started: {} (scheduled {}-{}, early by {early_start_minutes} min)",
            window.break_name,
            window.start.format("%H:%M"),
            window.end.format("%H:%M")
        );

        let transition = BreakTransition::Started {
            record_id: record.id.clone(),
            break_name: window.break_name.clone(),
            early_start_minutes,
        };
        self.unscheduled_reported = false;
        self.phase = BreakPhase::InBreak(OpenBreak {
            record_id: record.id,
            started_at: now,
            window,
        });
        Some(transition)
    }

    /// Closes the open break, if any. On a store failure the break stays open.
    async fn close(&mut self, now: NaiveDateTime) -> Result<Option<BreakTransition>> {
        let open = match std::mem::replace(&mut self.phase, BreakPhase::Running) {
            BreakPhase::InBreak(open) => open,
            BreakPhase::Running => return Ok(None),
        };

        let duration_minutes = whole_minutes(now - open.started_at);
        let late_end_minutes = compliance_minutes(now - open.window.end);

        let closed = match self
            .store
            .close_break_record(&open.record_id, now, duration_minutes, late_end_minutes)
            .await
        {
            Ok(closed) => closed,
            Err(err) => {
                self.phase = BreakPhase::InBreak(open);
                return Err(err);
            }
        };

        if !closed {
            log_warn!("Break {} was already closed in the store", open.record_id);
        }
        log_info!(
            "Break ended: {} after {duration_minutes} min, {}",
            open.window.break_name,
            describe_compliance(late_end_minutes)
        );

        Ok(Some(BreakTransition::Ended {
            record_id: open.record_id,
            break_name: open.window.break_name,
            duration_minutes,
            late_end_minutes,
        }))
    }

    /// Closes the open break at `now` regardless of counter state. Used on
    /// shutdown so no record outlives the process.
    pub async fn force_close(&mut self, now: NaiveDateTime) -> Result<Option<BreakTransition>> {
        if self.open_break().is_some() {
            log_info!("Closing open break at shutdown");
        }
        self.close(now).await
    }

    /// Closes records a previous process left open. Returns how many were closed.
    pub async fn recover_open_breaks(&mut self, now: NaiveDateTime) -> Result<usize> {
        let stale = self
            .store
            .get_open_break_records()
            .await
            .context("failed to look up open breaks")?;

        let mut closed = 0;
        for record in stale {
            let duration_minutes = whole_minutes(now - record.start_time);
            let late_end_minutes = match self.scheduled_end(&record).await {
                Some(end) => compliance_minutes(now - end),
                None => 0,
            };

            if self
                .store
                .close_break_record(&record.id, now, duration_minutes, late_end_minutes)
                .await?
            {
                closed += 1;
                log_warn!(
                    "Closed break {} left open since {}; end time set to {}",
                    record.id,
                    record.start_time,
                    now
                );
            }
        }
        Ok(closed)
    }

    async fn scheduled_end(&self, record: &BreakRecord) -> Option<NaiveDateTime> {
        let entry_id = record.matched_schedule_id?;
        let entry = match self.store.get_schedule_entry(entry_id).await {
            Ok(entry) => entry?,
            Err(err) => {
                log_debug!("Schedule entry {entry_id} unavailable for recovery: {err:?}");
                return None;
            }
        };
        let buffer = Duration::minutes(super::schedule::MATCH_BUFFER_MINUTES);
        let start_date = record.start_time.date();
        [start_date, start_date - Duration::days(1)]
            .into_iter()
            .filter_map(|anchor| ScheduledWindow::on_date(&entry, anchor))
            .find(|window| window.contains(record.start_time, buffer))
            .map(|window| window.end)
    }
}

fn whole_minutes(delta: Duration) -> i64 {
    delta.num_seconds().div_euclid(60).max(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveTime;

    fn monday(h: u32, m: u32, s: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 3, 4)
            .unwrap()
            .and_hms_opt(h, m, s)
            .unwrap()
    }

    fn snap(availability_percent: f64) -> Vec<AvailabilitySnapshot> {
        vec![AvailabilitySnapshot {
            unit_id: 1,
            availability_percent,
            fault_secs: 4.0,
        }]
    }

    async fn machine_with_morning_break() -> (BreakStateMachine, Database, i64) {
        let db = Database::in_memory().unwrap();
        let id = db
            .insert_schedule_entry(
                1,
                1,
                "Morning",
                NaiveTime::from_hms_opt(10, 0, 0).unwrap(),
                NaiveTime::from_hms_opt(10, 10, 0).unwrap(),
            )
            .await
            .unwrap();
        let mut machine = BreakStateMachine::new(
            db.clone(),
            ShiftCalendar::default(),
            ReferenceStrategy::FirstTracked,
        );
        machine.load_schedule(monday(0, 0, 0).date()).await.unwrap();
        (machine, db, id)
    }

    /// Feeds a baseline and three unchanged ticks, ten seconds apart, so the
    /// freeze is confirmed exactly at `confirmed_at`.
    async fn freeze_until(
        machine: &mut BreakStateMachine,
        confirmed_at: NaiveDateTime,
    ) -> Option<BreakTransition> {
        let mut last = None;
        for back in (0..4).rev() {
            last = machine
                .update(&snap(91.25), confirmed_at - Duration::seconds(10 * back))
                .await;
        }
        last
    }

    #[tokio::test]
    async fn freeze_two_minutes_early_is_on_time() {
        let (mut machine, db, entry_id) = machine_with_morning_break().await;

        let started = freeze_until(&mut machine, monday(9, 58, 0)).await;
        assert!(matches!(
            started,
            Some(BreakTransition::Started { early_start_minutes: 0, .. })
        ));

        let open = db.get_open_break_records().await.unwrap();
        assert_eq!(open.len(), 1);
        assert_eq!(open[0].start_time, monday(9, 58, 0));
        assert_eq!(open[0].matched_schedule_id, Some(entry_id));
        assert!(open[0].is_scheduled);
        assert_eq!(open[0].shift_number, 1);
    }

    #[tokio::test]
    async fn freeze_four_minutes_early_is_reported() {
        let (mut machine, db, _) = machine_with_morning_break().await;

        freeze_until(&mut machine, monday(9, 56, 0)).await;
        let open = db.get_open_break_records().await.unwrap();
        assert_eq!(open[0].early_start_minutes, 4);
    }

    #[tokio::test]
    async fn unscheduled_freeze_never_creates_a_record() {
        let (mut machine, db, _) = machine_with_morning_break().await;

        let first = freeze_until(&mut machine, monday(12, 0, 0)).await;
        assert_eq!(first, Some(BreakTransition::Unscheduled { shift_number: 1 }));

        for minute in 1..30 {
            let again = machine.update(&snap(91.25), monday(12, minute, 0)).await;
            assert_eq!(again, None);
        }
        assert!(machine.is_frozen());
        assert!(db.list_break_records().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn thaw_closes_the_break_with_late_minutes() {
        let (mut machine, db, _) = machine_with_morning_break().await;
        freeze_until(&mut machine, monday(10, 0, 0)).await;

        // Still frozen: nothing changes.
        assert_eq!(machine.update(&snap(91.25), monday(10, 5, 0)).await, None);

        let ended = machine.update(&snap(91.30), monday(10, 16, 30)).await;
        match ended {
            Some(BreakTransition::Ended {
                duration_minutes,
                late_end_minutes,
                ..
            }) => {
                assert_eq!(duration_minutes, 16);
                assert_eq!(late_end_minutes, 6);
            }
            other => panic!("expected break end, got {other:?}"),
        }
        assert!(machine.open_break().is_none());

        let records = db.list_break_records().await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].end_time, Some(monday(10, 16, 30)));
        assert_eq!(records[0].late_end_minutes, 6);
    }

    #[tokio::test]
    async fn force_close_ends_an_open_break_once() {
        let (mut machine, db, _) = machine_with_morning_break().await;
        freeze_until(&mut machine, monday(10, 1, 0)).await;

        let closed = machine.force_close(monday(10, 4, 0)).await.unwrap();
        assert!(matches!(
            closed,
            Some(BreakTransition::Ended { duration_minutes: 3, late_end_minutes: 0, .. })
        ));
        assert_eq!(machine.force_close(monday(10, 5, 0)).await.unwrap(), None);
        assert!(db.get_open_break_records().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn recovery_closes_records_left_by_a_crash() {
        let (mut machine, db, entry_id) = machine_with_morning_break().await;
        db.insert_break_record(&BreakRecord {
            id: "stale".to_string(),
            start_time: monday(10, 0, 0),
            end_time: None,
            shift_number: 1,
            is_scheduled: true,
            matched_schedule_id: Some(entry_id),
            early_start_minutes: 0,
            late_end_minutes: 0,
            duration_minutes: None,
        })
        .await
        .unwrap();

        let closed = machine.recover_open_breaks(monday(10, 40, 0)).await.unwrap();
        assert_eq!(closed, 1);

        let record = db.get_break_record("stale").await.unwrap().unwrap();
        assert_eq!(record.duration_minutes, Some(40));
        assert_eq!(record.late_end_minutes, 30);
        assert_eq!(machine.recover_open_breaks(monday(11, 0, 0)).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn next_days_entries_do_not_match_today() {
        let db = Database::in_memory().unwrap();
        db.insert_schedule_entry(
            5,
            1,
            "Friday only",
            NaiveTime::from_hms_opt(10, 0, 0).unwrap(),
            NaiveTime::from_hms_opt(10, 10, 0).unwrap(),
        )
        .await
        .unwrap();
        let thursday = |h: u32, m: u32| monday(h, m, 0) + Duration::days(3);

        let mut machine = BreakStateMachine::new(
            db.clone(),
            ShiftCalendar::default(),
            ReferenceStrategy::FirstTracked,
        );
        assert_eq!(machine.load_schedule(thursday(0, 0).date()).await.unwrap(), 1);

        let frozen = freeze_until(&mut machine, thursday(10, 0)).await;
        assert_eq!(frozen, Some(BreakTransition::Unscheduled { shift_number: 1 }));
        assert!(!machine.in_scheduled_window(thursday(10, 5)));
        assert!(db.list_break_records().await.unwrap().is_empty());

        let friday = |h: u32, m: u32| thursday(h, m) + Duration::days(1);
        machine.load_schedule(friday(0, 0).date()).await.unwrap();
        assert!(machine.in_scheduled_window(friday(10, 5)));
    }

    #[tokio::test]
    async fn failed_break_inserts_are_logged_once_per_window() {
        let (mut machine, db, entry_id) = machine_with_morning_break().await;
        // An open record from elsewhere holds the single-open index.
        db.insert_break_record(&BreakRecord {
            id: "blocking".to_string(),
            start_time: monday(9, 0, 0),
            end_time: None,
            shift_number: 1,
            is_scheduled: true,
            matched_schedule_id: Some(entry_id),
            early_start_minutes: 0,
            late_end_minutes: 0,
            duration_minutes: None,
        })
        .await
        .unwrap();

        assert_eq!(freeze_until(&mut machine, monday(10, 0, 0)).await, None);
        for second in [10, 20, 30] {
            assert_eq!(machine.update(&snap(91.25), monday(10, 0, second)).await, None);
        }
        assert!(machine.open_break().is_none());
        // Already reported inside the current window.
        assert_eq!(machine.throttle.check(START_FAULT_KEY), None);

        db.close_break_record("blocking", monday(10, 0, 40), 60, 0)
            .await
            .unwrap();
        let started = machine.update(&snap(91.25), monday(10, 0, 50)).await;
        assert!(matches!(started, Some(BreakTransition::Started { .. })));
        assert_eq!(machine.throttle.check(START_FAULT_KEY), Some(0));
    }

    #[tokio::test]
    async fn scheduled_window_is_exact() {
        let (machine, _db, _) = machine_with_morning_break().await;
        assert!(!machine.in_scheduled_window(monday(9, 59, 59)));
        assert!(machine.in_scheduled_window(monday(10, 5, 0)));
        assert!(!machine.in_scheduled_window(monday(10, 10, 1)));
    }
}
