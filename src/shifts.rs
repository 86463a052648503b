//! Weekday-dependent shift calendar.
//!
//! Three shifts per day. Friday runs a shortened schedule; every other day
//! uses the standard boundaries. Shift 3 crosses midnight and belongs to the
//! service date on which it started.

use chrono::{Datelike, Duration, NaiveDate, NaiveDateTime, NaiveTime, Weekday};
use serde::{Deserialize, Deserializer};

pub const HOURS_PER_SHIFT: u8 = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct ShiftBoundaries {
    #[serde(deserialize_with = "hhmm")]
    pub shift_1_start: NaiveTime,
    #[serde(deserialize_with = "hhmm")]
    pub shift_2_start: NaiveTime,
    #[serde(deserialize_with = "hhmm")]
    pub shift_3_start: NaiveTime,
}

impl ShiftBoundaries {
    pub fn standard() -> Self {
        Self {
            shift_1_start: at(6, 0),
            shift_2_start: at(14, 0),
            shift_3_start: at(22, 0),
        }
    }

    pub fn friday() -> Self {
        Self {
            shift_1_start: at(6, 0),
            shift_2_start: at(13, 30),
            shift_3_start: at(21, 0),
        }
    }
}

/// Where a wall-clock instant falls in the shift plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShiftSlot {
    pub service_date: NaiveDate,
    pub shift_number: u8,
    /// Hour within the shift, 0..=7.
    pub hour_index: u8,
    pub shift_start: NaiveDateTime,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct ShiftCalendar {
    #[serde(default = "ShiftBoundaries::standard")]
    pub standard: ShiftBoundaries,
    #[serde(default = "ShiftBoundaries::friday")]
    pub friday: ShiftBoundaries,
}

impl Default for ShiftCalendar {
    fn default() -> Self {
        Self {
            standard: ShiftBoundaries::standard(),
            friday: ShiftBoundaries::friday(),
        }
    }
}

impl ShiftCalendar {
    pub fn boundaries_for(&self, date: NaiveDate) -> &ShiftBoundaries {
        if date.weekday() == Weekday::Fri {
            &self.friday
        } else {
            &self.standard
        }
    }

    pub fn locate(&self, now: NaiveDateTime) -> ShiftSlot {
        let today = now.date();
        let time = now.time();
        let bounds = self.boundaries_for(today);

        let (service_date, shift_number, start_time) = if time >= bounds.shift_3_start {
            (today, 3, bounds.shift_3_start)
        } else if time >= bounds.shift_2_start {
            (today, 2, bounds.shift_2_start)
        } else if time >= bounds.shift_1_start {
            (today, 1, bounds.shift_1_start)
        } else {
            // Early morning: still inside the night shift that began yesterday.
            let yesterday = today - Duration::days(1);
            (yesterday, 3, self.boundaries_for(yesterday).shift_3_start)
        };

        let shift_start = service_date.and_time(start_time);
        let elapsed_hours = (now - shift_start).num_minutes().max(0) / 60;
        let hour_index = elapsed_hours.min(i64::from(HOURS_PER_SHIFT - 1)) as u8;

        ShiftSlot {
            service_date,
            shift_number,
            hour_index,
            shift_start,
        }
    }

    pub fn current_shift(&self, now: NaiveDateTime) -> u8 {
        self.locate(now).shift_number
    }

    pub fn service_date(&self, now: NaiveDateTime) -> NaiveDate {
        self.locate(now).service_date
    }
}

fn at(hour: u32, minute: u32) -> NaiveTime {
    NaiveTime::from_hms_opt(hour, minute, 0).unwrap_or(NaiveTime::MIN)
}

/// Accepts `"HH:MM"` or `"HH:MM:SS"`.
pub fn parse_clock(raw: &str) -> Option<NaiveTime> {
    NaiveTime::parse_from_str(raw, "%H:%M:%S")
        .or_else(|_| NaiveTime::parse_from_str(raw, "%H:%M"))
        .ok()
}

fn hhmm<'de, D>(deserializer: D) -> Result<NaiveTime, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    parse_clock(&raw).ok_or_else(|| serde::de::Error::custom(format!("invalid clock time '{raw}'")))
}
