//! Table-level capability surface: bulk insert, keyed upsert and ad-hoc query.
//! Typed repositories are written on top of these three operations.

use anyhow::{anyhow, bail, Context, Result};
use rusqlite::{params_from_iter, types::Value};

use super::connection::Database;

/// One row, as ordered `(column, value)` pairs.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Record {
    columns: Vec<(String, Value)>,
}

impl Record {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, column: impl Into<String>, value: Value) -> Self {
        self.push(column, value);
        self
    }

    pub fn push(&mut self, column: impl Into<String>, value: Value) {
        self.columns.push((column.into(), value));
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    pub fn column_names(&self) -> impl Iterator<Item = &str> {
        self.columns.iter().map(|(name, _)| name.as_str())
    }

    pub fn values(&self) -> impl Iterator<Item = &Value> {
        self.columns.iter().map(|(_, value)| value)
    }

    pub fn get(&self, column: &str) -> Option<&Value> {
        self.columns
            .iter()
            .find(|(name, _)| name == column)
            .map(|(_, value)| value)
    }

    pub fn get_i64(&self, column: &str) -> Result<i64> {
        match self.get(column) {
            Some(Value::Integer(value)) => Ok(*value),
            other => Err(anyhow!("column {column}: expected integer, got {other:?}")),
        }
    }

    pub fn get_optional_i64(&self, column: &str) -> Result<Option<i64>> {
        match self.get(column) {
            Some(Value::Null) => Ok(None),
            _ => self.get_i64(column).map(Some),
        }
    }

    pub fn get_f64(&self, column: &str) -> Result<f64> {
        match self.get(column) {
            Some(Value::Real(value)) => Ok(*value),
            Some(Value::Integer(value)) => Ok(*value as f64),
            other => Err(anyhow!("column {column}: expected real, got {other:?}")),
        }
    }

    pub fn get_text(&self, column: &str) -> Result<String> {
        match self.get(column) {
            Some(Value::Text(value)) => Ok(value.clone()),
            other => Err(anyhow!("column {column}: expected text, got {other:?}")),
        }
    }

    pub fn get_optional_text(&self, column: &str) -> Result<Option<String>> {
        match self.get(column) {
            Some(Value::Null) => Ok(None),
            _ => self.get_text(column).map(Some),
        }
    }

    pub fn get_bool(&self, column: &str) -> Result<bool> {
        self.get_i64(column).map(|value| value != 0)
    }
}

pub fn text(value: impl Into<String>) -> Value {
    Value::Text(value.into())
}

pub fn integer(value: impl Into<i64>) -> Value {
    Value::Integer(value.into())
}

pub fn real(value: f64) -> Value {
    Value::Real(value)
}

pub fn optional<T>(value: Option<T>, convert: impl FnOnce(T) -> Value) -> Value {
    value.map(convert).unwrap_or(Value::Null)
}

pub(crate) fn validate_identifier(name: &str) -> Result<()> {
    let mut chars = name.chars();
    let valid_start = chars
        .next()
        .map(|c| c.is_ascii_alphabetic() || c == '_')
        .unwrap_or(false);
    if !valid_start || !chars.all(|c| c.is_ascii_alphanumeric() || c == '_') {
        bail!("invalid SQL identifier '{name}'");
    }
    Ok(())
}

fn validate_record(record: &Record) -> Result<()> {
    if record.is_empty() {
        bail!("cannot write an empty record");
    }
    record.column_names().try_for_each(validate_identifier)
}

fn insert_sql(table: &str, record: &Record) -> String {
    let columns: Vec<&str> = record.column_names().collect();
    let placeholders: Vec<String> = (1..=columns.len()).map(|i| format!("?{i}")).collect();
    format!(
        "INSERT INTO {table} ({}) VALUES ({})",
        columns.join(", "),
        placeholders.join(", ")
    )
}

fn upsert_sql(table: &str, record: &Record, conflict_keys: &[String]) -> String {
    let updates: Vec<String> = record
        .column_names()
        .filter(|column| !conflict_keys.iter().any(|key| key == column))
        .map(|column| format!("{column} = excluded.{column}"))
        .collect();
    let action = if updates.is_empty() {
        "DO NOTHING".to_string()
    } else {
        format!("DO UPDATE SET {}", updates.join(", "))
    };
    format!(
        "{} ON CONFLICT ({}) {action}",
        insert_sql(table, record),
        conflict_keys.join(", ")
    )
}

impl Database {
    /// Inserts all rows in one transaction; either every row lands or none do.
    pub async fn insert_many(&self, table: &str, rows: Vec<Record>) -> Result<usize> {
        if rows.is_empty() {
            return Ok(0);
        }
        validate_identifier(table)?;
        rows.iter().try_for_each(validate_record)?;

        let table = table.to_string();
        self.execute(move |conn| {
            let tx = conn.transaction()?;
            for row in &rows {
                tx.execute(&insert_sql(&table, row), params_from_iter(row.values()))
                    .with_context(|| format!("failed to insert into {table}"))?;
            }
            tx.commit()?;
            Ok(rows.len())
        })
        .await
    }

    /// Inserts `row`, or overwrites the non-key columns of the row that
    /// already holds the same `conflict_keys` values.
    pub async fn upsert(&self, table: &str, row: Record, conflict_keys: &[&str]) -> Result<()> {
        validate_identifier(table)?;
        validate_record(&row)?;
        if conflict_keys.is_empty() {
            bail!("upsert into {table} needs at least one conflict key");
        }
        for key in conflict_keys {
            validate_identifier(key)?;
            if row.get(key).is_none() {
                bail!("conflict key {key} is not a column of the upserted row");
            }
        }

        let table = table.to_string();
        let keys: Vec<String> = conflict_keys.iter().map(|key| key.to_string()).collect();
        self.execute(move |conn| {
            conn.execute(&upsert_sql(&table, &row, &keys), params_from_iter(row.values()))
                .with_context(|| format!("failed to upsert into {table}"))?;
            Ok(())
        })
        .await
    }

    pub async fn query(&self, sql: &str, params: Vec<Value>) -> Result<Vec<Record>> {
        let sql = sql.to_string();
        self.execute(move |conn| {
            let mut stmt = conn.prepare(&sql)?;
            let names: Vec<String> = stmt
                .column_names()
                .into_iter()
                .map(String::from)
                .collect();

            let mut rows = stmt.query(params_from_iter(params.iter()))?;
            let mut records = Vec::new();
            while let Some(row) = rows.next()? {
                let mut record = Record::new();
                for (index, name) in names.iter().enumerate() {
                    record.push(name.clone(), row.get::<_, Value>(index)?);
                }
                records.push(record);
            }

            Ok(records)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn scratch_db() -> Database {
        let db = Database::in_memory().unwrap();
        db.execute(|conn| {
            conn.execute_batch(
                "CREATE TABLE scratch (k1 TEXT NOT NULL, k2 INTEGER NOT NULL, v REAL, PRIMARY KEY (k1, k2))",
            )?;
            Ok(())
        })
        .await
        .unwrap();
        db
    }

    fn row(k1: &str, k2: i64, v: f64) -> Record {
        Record::new()
            .with("k1", text(k1))
            .with("k2", integer(k2))
            .with("v", real(v))
    }

    #[tokio::test]
    async fn insert_many_then_query() {
        let db = scratch_db().await;
        let inserted = db
            .insert_many("scratch", vec![row("a", 1, 1.5), row("b", 2, 2.5)])
            .await
            .unwrap();
        assert_eq!(inserted, 2);

        let rows = db
            .query("SELECT k1, v FROM scratch WHERE k2 = ?1", vec![integer(2)])
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].get_text("k1").unwrap(), "b");
        assert_eq!(rows[0].get_f64("v").unwrap(), 2.5);
    }

    #[tokio::test]
    async fn insert_many_is_all_or_nothing() {
        let db = scratch_db().await;
        let result = db
            .insert_many("scratch", vec![row("a", 1, 1.0), row("a", 1, 2.0)])
            .await;
        assert!(result.is_err());

        let rows = db.query("SELECT * FROM scratch", vec![]).await.unwrap();
        assert!(rows.is_empty());
    }

    #[tokio::test]
    async fn upsert_overwrites_on_conflict() {
        let db = scratch_db().await;
        db.upsert("scratch", row("a", 1, 1.0), &["k1", "k2"])
            .await
            .unwrap();
        db.upsert("scratch", row("a", 1, 9.0), &["k1", "k2"])
            .await
            .unwrap();

        let rows = db.query("SELECT v FROM scratch", vec![]).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].get_f64("v").unwrap(), 9.0);
    }

    #[tokio::test]
    async fn rejects_unsafe_identifiers() {
        let db = scratch_db().await;
        let bad_table = db
            .insert_many("scratch; DROP TABLE scratch", vec![row("a", 1, 1.0)])
            .await;
        assert!(bad_table.is_err());

        let bad_key = db.upsert("scratch", row("a", 1, 1.0), &["missing"]).await;
        assert!(bad_key.is_err());
    }

    #[test]
    fn upsert_sql_updates_only_non_key_columns() {
        let sql = upsert_sql(
            "quality_counters",
            &row("a", 1, 1.0),
            &["k1".to_string(), "k2".to_string()],
        );
        assert_eq!(
            sql,
            "INSERT INTO quality_counters (k1, k2, v) VALUES (?1, ?2, ?3) ON CONFLICT (k1, k2) DO UPDATE SET v = excluded.v"
        );
    }
}
