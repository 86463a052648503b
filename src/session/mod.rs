//! Capability surface of the remote line controller. The wire protocol lives
//! behind [`SessionClient`]; the collector only ever sees field ids and
//! loosely typed values.

use std::{fmt, sync::Arc};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::SessionError;

pub mod simulated;

pub use simulated::{SimulatedFactory, SimulatedLine};

/// Address of a single readable variable on the controller.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FieldId(String);

impl FieldId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for FieldId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum FieldValue {
    Float(f64),
    Int(i64),
    Null,
}

impl FieldValue {
    /// Controllers report unset registers as null; those count as zero.
    pub fn as_f64(&self) -> f64 {
        match self {
            FieldValue::Float(value) if value.is_finite() => *value,
            FieldValue::Float(_) => 0.0,
            FieldValue::Int(value) => *value as f64,
            FieldValue::Null => 0.0,
        }
    }

    pub fn as_i64(&self) -> i64 {
        match self {
            FieldValue::Int(value) => *value,
            FieldValue::Float(value) if value.is_finite() => value.round() as i64,
            _ => 0,
        }
    }
}

/// One session with the controller. All calls may fail with a transport
/// error; the caller owns timeouts.
#[async_trait]
pub trait SessionClient: Send + Sync {
    async fn connect(&self) -> Result<(), SessionError>;

    async fn disconnect(&self) -> Result<(), SessionError>;

    async fn read_field(&self, field: &FieldId) -> Result<FieldValue, SessionError>;

    /// Cheap liveness call.
    async fn probe(&self) -> Result<(), SessionError>;
}

/// Builds a fresh, security-configured client for every connection attempt.
pub trait SessionFactory: Send + Sync {
    fn endpoint(&self) -> &str;

    fn create(&self) -> Arc<dyn SessionClient>;
}
