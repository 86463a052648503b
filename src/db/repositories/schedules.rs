use anyhow::Result;

use crate::db::{
    connection::Database,
    helpers::{format_time, parse_time, to_u8},
    models::ScheduleEntry,
    store::{integer, text, Record},
};

const SELECT_COLUMNS: &str =
    "SELECT DISTINCT id, day_of_week, shift_number, break_name, start_time, end_time, duration_minutes
     FROM break_definitions";

fn record_to_entry(record: &Record) -> Result<ScheduleEntry> {
    Ok(ScheduleEntry {
        id: record.get_i64("id")?,
        day_of_week: to_u8(record.get_i64("day_of_week")?, "day_of_week")?,
        shift_number: to_u8(record.get_i64("shift_number")?, "shift_number")?,
        break_name: record.get_text("break_name")?,
        start_time: parse_time(&record.get_text("start_time")?, "start_time")?,
        end_time: parse_time(&record.get_text("end_time")?, "end_time")?,
        duration_minutes: record.get_i64("duration_minutes")?,
    })
}

impl Database {
    /// Entries for the given ISO weekdays, ordered by start time.
    pub async fn load_schedule_entries(&self, days: &[u8]) -> Result<Vec<ScheduleEntry>> {
        if days.is_empty() {
            return Ok(Vec::new());
        }
        let placeholders: Vec<String> = (1..=days.len()).map(|i| format!("?{i}")).collect();
        let sql = format!(
            "{SELECT_COLUMNS}
             WHERE day_of_week IN ({})
             ORDER BY start_time",
            placeholders.join(", ")
        );
        let params = days.iter().map(|day| integer(*day)).collect();
        let records = self.query(&sql, params).await?;
        records.iter().map(record_to_entry).collect()
    }

    pub async fn get_schedule_entry(&self, id: i64) -> Result<Option<ScheduleEntry>> {
        let records = self
            .query(&format!("{SELECT_COLUMNS} WHERE id = ?1"), vec![integer(id)])
            .await?;
        records.first().map(record_to_entry).transpose()
    }

    /// Returns the new row id. Used for seeding; the schedule is otherwise
    /// maintained outside the collector.
    pub async fn insert_schedule_entry(
        &self,
        day_of_week: u8,
        shift_number: u8,
        break_name: &str,
        start_time: chrono::NaiveTime,
        end_time: chrono::NaiveTime,
    ) -> Result<i64> {
        let mut duration = (end_time - start_time).num_minutes();
        if duration < 0 {
            duration += 24 * 60;
        }
        let row = Record::new()
            .with("day_of_week", integer(day_of_week))
            .with("shift_number", integer(shift_number))
            .with("break_name", text(break_name))
            .with("start_time", text(format_time(start_time)))
            .with("end_time", text(format_time(end_time)))
            .with("duration_minutes", integer(duration));
        self.insert_many("break_definitions", vec![row]).await?;

        let records = self
            .query("SELECT MAX(id) AS id FROM break_definitions", vec![])
            .await?;
        match records.first() {
            Some(record) => record.get_i64("id"),
            None => Err(anyhow::anyhow!("schedule entry insert returned no id")),
        }
    }
}
