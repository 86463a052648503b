use std::convert::TryFrom;

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};

const LOCAL_DATETIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";
const DATE_FORMAT: &str = "%Y-%m-%d";
const TIME_FORMAT: &str = "%H:%M:%S";

pub fn to_u8(value: i64, field: &str) -> Result<u8> {
    u8::try_from(value).map_err(|_| anyhow!("{field} out of range: {value}"))
}

pub fn parse_datetime(value: &str, field: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .with_context(|| format!("failed to parse {field}"))
}

/// Wall-clock timestamps (break records) are stored without an offset.
pub fn format_local(value: NaiveDateTime) -> String {
    value.format(LOCAL_DATETIME_FORMAT).to_string()
}

pub fn parse_local(value: &str, field: &str) -> Result<NaiveDateTime> {
    NaiveDateTime::parse_from_str(value, LOCAL_DATETIME_FORMAT)
        .with_context(|| format!("failed to parse {field}"))
}

pub fn parse_optional_local(value: Option<String>, field: &str) -> Result<Option<NaiveDateTime>> {
    match value {
        Some(raw) => parse_local(&raw, field).map(Some),
        None => Ok(None),
    }
}

pub fn format_date(value: NaiveDate) -> String {
    value.format(DATE_FORMAT).to_string()
}

pub fn format_time(value: NaiveTime) -> String {
    value.format(TIME_FORMAT).to_string()
}

pub fn parse_time(value: &str, field: &str) -> Result<NaiveTime> {
    crate::shifts::parse_clock(value).ok_or_else(|| anyhow!("failed to parse {field}: '{value}'"))
}
