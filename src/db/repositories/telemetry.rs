use anyhow::Result;
use chrono::NaiveDateTime;

use crate::db::{
    connection::Database,
    helpers::{format_date, format_local},
    models::{AvailabilityReading, CycleTimeReading, QualityCounters},
    store::{integer, real, text, validate_identifier, Record},
};

// Telemetry rows share the local wall-clock format of break records so the
// two line up in audits.

impl Database {
    pub async fn insert_cycle_times(
        &self,
        readings: &[CycleTimeReading],
        at: NaiveDateTime,
    ) -> Result<usize> {
        let time = format_local(at);
        let rows = readings
            .iter()
            .map(|reading| {
                Record::new()
                    .with("time", text(time.clone()))
                    .with("sequence_id", integer(reading.unit_id))
                    .with("cycle_time_seconds", real(reading.cycle_time_secs))
                    .with("desired_cycle_time_seconds", real(reading.desired_cycle_secs))
                    .with("deviation_seconds", real(reading.deviation_secs()))
                    .with("deviation_percent", real(reading.deviation_percent()))
            })
            .collect();
        self.insert_many("cycle_times", rows).await
    }

    pub async fn insert_availability(
        &self,
        readings: &[AvailabilityReading],
        at: NaiveDateTime,
    ) -> Result<usize> {
        let time = format_local(at);
        let rows = readings
            .iter()
            .map(|reading| {
                Record::new()
                    .with("time", text(time.clone()))
                    .with("sequence_id", integer(reading.unit_id))
                    .with("ta_percent", real(reading.availability_percent))
                    .with("fault_time_seconds", real(reading.fault_secs))
                    .with("blocked_time_seconds", real(reading.blocked_secs))
                    .with("starved_time_seconds", real(reading.starved_secs))
            })
            .collect();
        self.insert_many("technical_availability", rows).await
    }

    /// Keyed on `(service_date, shift_number, hour_index)` so re-reading the
    /// same hour overwrites the counters instead of adding rows.
    pub async fn upsert_quality_counters(
        &self,
        counters: &QualityCounters,
        at: NaiveDateTime,
    ) -> Result<()> {
        let row = Record::new()
            .with("service_date", text(format_date(counters.service_date)))
            .with("shift_number", integer(counters.shift_number))
            .with("hour_index", integer(counters.hour_index))
            .with("good_parts", integer(counters.good))
            .with("reject_parts", integer(counters.reject))
            .with("rework_parts", integer(counters.rework))
            .with("updated_at", text(format_local(at)));
        self.upsert(
            "quality_counters",
            row,
            &["service_date", "shift_number", "hour_index"],
        )
        .await
    }

    pub async fn count_rows(&self, table: &str) -> Result<i64> {
        validate_identifier(table)?;
        let records = self
            .query(&format!("SELECT COUNT(*) AS total FROM {table}"), vec![])
            .await?;
        match records.first() {
            Some(record) => record.get_i64("total"),
            None => Ok(0),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn tick() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 3, 4)
            .unwrap()
            .and_hms_opt(10, 16, 30)
            .unwrap()
    }

    #[tokio::test]
    async fn cycle_rows_carry_deviation() {
        let db = Database::in_memory().unwrap();
        let readings = vec![CycleTimeReading {
            unit_id: 10,
            cycle_time_secs: 20.0,
            desired_cycle_secs: 16.0,
        }];
        assert_eq!(db.insert_cycle_times(&readings, tick()).await.unwrap(), 1);

        let rows = db
            .query(
                "SELECT deviation_seconds, deviation_percent FROM cycle_times",
                vec![],
            )
            .await
            .unwrap();
        assert_eq!(rows[0].get_f64("deviation_seconds").unwrap(), 4.0);
        assert_eq!(rows[0].get_f64("deviation_percent").unwrap(), 25.0);
    }

    #[tokio::test]
    async fn rows_are_stamped_in_local_wall_clock() {
        let db = Database::in_memory().unwrap();
        let availability = vec![AvailabilityReading {
            unit_id: 10,
            availability_percent: 95.5,
            fault_secs: 12.0,
            blocked_secs: 3.0,
            starved_secs: 1.5,
        }];
        db.insert_availability(&availability, tick()).await.unwrap();

        let rows = db
            .query("SELECT time FROM technical_availability", vec![])
            .await
            .unwrap();
        assert_eq!(rows[0].get_text("time").unwrap(), "2024-03-04 10:16:30");
    }

    #[tokio::test]
    async fn count_rows_rejects_unsafe_table_names() {
        let db = Database::in_memory().unwrap();
        assert_eq!(db.count_rows("cycle_times").await.unwrap(), 0);
        assert!(db
            .count_rows("cycle_times; DROP TABLE cycle_times")
            .await
            .is_err());
        assert_eq!(db.count_rows("cycle_times").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn quality_counters_overwrite_within_the_same_hour() {
        let db = Database::in_memory().unwrap();
        let mut counters = QualityCounters {
            service_date: NaiveDate::from_ymd_opt(2024, 3, 4).unwrap(),
            shift_number: 1,
            hour_index: 3,
            good: 100,
            reject: 2,
            rework: 1,
        };
        db.upsert_quality_counters(&counters, tick())
            .await
            .unwrap();
        counters.good = 140;
        db.upsert_quality_counters(&counters, tick())
            .await
            .unwrap();

        assert_eq!(db.count_rows("quality_counters").await.unwrap(), 1);
        let rows = db
            .query("SELECT good_parts FROM quality_counters", vec![])
            .await
            .unwrap();
        assert_eq!(rows[0].get_i64("good_parts").unwrap(), 140);

        counters.hour_index = 4;
        db.upsert_quality_counters(&counters, tick())
            .await
            .unwrap();
        assert_eq!(db.count_rows("quality_counters").await.unwrap(), 2);
    }
}
