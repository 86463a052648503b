use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

/// A detected break. Written once when the break opens and updated once when
/// it closes; `end_time` stays `None` only while the break is in progress.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct BreakRecord {
    pub id: String,
    pub start_time: NaiveDateTime,
    pub end_time: Option<NaiveDateTime>,
    pub shift_number: u8,
    pub is_scheduled: bool,
    pub matched_schedule_id: Option<i64>,
    pub early_start_minutes: i64,
    pub late_end_minutes: i64,
    pub duration_minutes: Option<i64>,
}

impl BreakRecord {
    pub fn is_open(&self) -> bool {
        self.end_time.is_none()
    }
}
