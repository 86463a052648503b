use anyhow::Result;
use chrono::NaiveDateTime;
use rusqlite::params;

use crate::db::{
    connection::Database,
    helpers::{format_local, parse_local, parse_optional_local, to_u8},
    models::BreakRecord,
    store::{integer, optional, text, Record},
};

const SELECT_COLUMNS: &str = "SELECT id, start_time, end_time, shift_number, is_scheduled,
            scheduled_break_id, early_start_minutes, late_end_minutes, duration_minutes
     FROM actual_breaks";

fn record_to_break(record: &Record) -> Result<BreakRecord> {
    Ok(BreakRecord {
        id: record.get_text("id")?,
        start_time: parse_local(&record.get_text("start_time")?, "start_time")?,
        end_time: parse_optional_local(record.get_optional_text("end_time")?, "end_time")?,
        shift_number: to_u8(record.get_i64("shift_number")?, "shift_number")?,
        is_scheduled: record.get_bool("is_scheduled")?,
        matched_schedule_id: record.get_optional_i64("scheduled_break_id")?,
        early_start_minutes: record.get_i64("early_start_minutes")?,
        late_end_minutes: record.get_i64("late_end_minutes")?,
        duration_minutes: record.get_optional_i64("duration_minutes")?,
    })
}

impl Database {
    pub async fn insert_break_record(&self, record: &BreakRecord) -> Result<()> {
        let row = Record::new()
            .with("id", text(record.id.clone()))
            .with("start_time", text(format_local(record.start_time)))
            .with("end_time", optional(record.end_time, |t| text(format_local(t))))
            .with("shift_number", integer(record.shift_number))
            .with("is_scheduled", integer(record.is_scheduled))
            .with("scheduled_break_id", optional(record.matched_schedule_id, integer))
            .with("early_start_minutes", integer(record.early_start_minutes))
            .with("late_end_minutes", integer(record.late_end_minutes))
            .with(
                "duration_minutes",
                optional(record.duration_minutes, integer),
            );
        self.insert_many("actual_breaks", vec![row]).await?;
        Ok(())
    }

    /// Sets the closing fields of an open record. Returns `false` when the
    /// record is unknown or already closed; a closed record is never rewritten.
    pub async fn close_break_record(
        &self,
        id: &str,
        end_time: NaiveDateTime,
        duration_minutes: i64,
        late_end_minutes: i64,
    ) -> Result<bool> {
        let id = id.to_string();
        self.execute(move |conn| {
            let rows_affected = conn.execute(
                "UPDATE actual_breaks
                 SET end_time = ?1,
                     duration_minutes = ?2,
                     late_end_minutes = ?3
                 WHERE id = ?4 AND end_time IS NULL",
                params![format_local(end_time), duration_minutes, late_end_minutes, id],
            )?;
            Ok(rows_affected == 1)
        })
        .await
    }

    pub async fn get_break_record(&self, id: &str) -> Result<Option<BreakRecord>> {
        let records = self
            .query(&format!("{SELECT_COLUMNS} WHERE id = ?1"), vec![text(id)])
            .await?;
        records.first().map(record_to_break).transpose()
    }

    pub async fn get_open_break_records(&self) -> Result<Vec<BreakRecord>> {
        let records = self
            .query(
                &format!("{SELECT_COLUMNS} WHERE end_time IS NULL ORDER BY start_time"),
                vec![],
            )
            .await?;
        records.iter().map(record_to_break).collect()
    }

    pub async fn list_break_records(&self) -> Result<Vec<BreakRecord>> {
        let records = self
            .query(&format!("{SELECT_COLUMNS} ORDER BY start_time"), vec![])
            .await?;
        records.iter().map(record_to_break).collect()
    }
}
