use anyhow::Result;
use chrono::{DateTime, Utc};

use crate::db::{
    connection::Database,
    helpers::parse_datetime,
    models::{ConnectionEvent, ConnectionEventKind},
    store::{integer, text, Record},
};

const TABLE: &str = "connection_events";

fn kind_from_str(value: &str) -> Result<ConnectionEventKind> {
    match value {
        "connected" => Ok(ConnectionEventKind::Connected),
        "disconnected" => Ok(ConnectionEventKind::Disconnected),
        "reconnecting" => Ok(ConnectionEventKind::Reconnecting),
        "reconnected" => Ok(ConnectionEventKind::Reconnected),
        other => Err(anyhow::anyhow!("unknown connection event type {other}")),
    }
}

fn record_to_event(record: &Record) -> Result<ConnectionEvent> {
    Ok(ConnectionEvent {
        timestamp: parse_datetime(&record.get_text("event_time")?, "event_time")?,
        kind: kind_from_str(&record.get_text("event_type")?)?,
        endpoint: record.get_text("endpoint")?,
        detail: record.get_optional_text("details")?.unwrap_or_default(),
    })
}

impl Database {
    pub async fn insert_connection_event(&self, event: &ConnectionEvent) -> Result<()> {
        let row = Record::new()
            .with("event_time", text(event.timestamp.to_rfc3339()))
            .with("event_type", text(event.kind.as_str()))
            .with("endpoint", text(event.endpoint.clone()))
            .with("details", text(event.detail.clone()));
        self.insert_many(TABLE, vec![row]).await?;
        Ok(())
    }

    /// Oldest first.
    pub async fn list_connection_events(&self, limit: u32) -> Result<Vec<ConnectionEvent>> {
        let records = self
            .query(
                "SELECT event_time, event_type, endpoint, details
                 FROM connection_events
                 ORDER BY event_id ASC
                 LIMIT ?1",
                vec![integer(limit)],
            )
            .await?;
        records.iter().map(record_to_event).collect()
    }

    pub async fn count_connection_events_since(&self, since: DateTime<Utc>) -> Result<i64> {
        let records = self
            .query(
                "SELECT COUNT(*) AS total FROM connection_events WHERE event_time >= ?1",
                vec![text(since.to_rfc3339())],
            )
            .await?;
        match records.first() {
            Some(record) => record.get_i64("total"),
            None => Ok(0),
        }
    }
}
