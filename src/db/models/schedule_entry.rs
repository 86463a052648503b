use chrono::NaiveTime;
use serde::{Deserialize, Serialize};

/// One planned break from `break_definitions`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ScheduleEntry {
    pub id: i64,
    /// ISO weekday, 1 = Monday.
    pub day_of_week: u8,
    pub shift_number: u8,
    pub break_name: String,
    pub start_time: NaiveTime,
    pub end_time: NaiveTime,
    pub duration_minutes: i64,
}
