//! In-process stand-in for a line controller, reachable as `sim://<name>`.
//!
//! Counters advance on every read unless the line is frozen, which is how a
//! real controller behaves during a break. The link can be dropped, the
//! handshake rejected and individual fields failed on demand.

use std::{
    collections::{HashMap, HashSet},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex, MutexGuard,
    },
};

use async_trait::async_trait;

use super::{FieldId, FieldValue, SessionClient, SessionFactory};
use crate::{config::SecurityConfig, error::SessionError};

pub const SIMULATED_SCHEME: &str = "sim://";

pub fn is_simulated(endpoint: &str) -> bool {
    endpoint.starts_with(SIMULATED_SCHEME)
}

#[derive(Default)]
struct LineState {
    unreachable: bool,
    reject_handshake: bool,
    fail_next_connects: u32,
    fail_next_probes: u32,
    frozen: bool,
    failing_fields: HashSet<String>,
    overrides: HashMap<String, FieldValue>,
    generation: u64,
    connect_attempts: u32,
    probes: u32,
}

/// Shared state of one simulated line. Clones observe and steer the same line.
#[derive(Clone, Default)]
pub struct SimulatedLine {
    state: Arc<Mutex<LineState>>,
}

impl SimulatedLine {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, LineState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn set_reachable(&self, reachable: bool) {
        self.state().unreachable = !reachable;
    }

    pub fn set_frozen(&self, frozen: bool) {
        self.state().frozen = frozen;
    }

    pub fn reject_handshake(&self, reject: bool) {
        self.state().reject_handshake = reject;
    }

    /// The next `count` connects fail with a transport error.
    pub fn fail_next_connects(&self, count: u32) {
        self.state().fail_next_connects = count;
    }

    /// The next `count` probes fail while the link itself stays usable.
    pub fn fail_next_probes(&self, count: u32) {
        self.state().fail_next_probes = count;
    }

    pub fn fail_field(&self, field: &str) {
        self.state().failing_fields.insert(field.to_string());
    }

    pub fn restore_field(&self, field: &str) {
        self.state().failing_fields.remove(field);
    }

    /// Pin a field to a fixed value.
    pub fn set_field(&self, field: &str, value: FieldValue) {
        self.state().overrides.insert(field.to_string(), value);
    }

    pub fn connect_attempts(&self) -> u32 {
        self.state().connect_attempts
    }

    pub fn probes(&self) -> u32 {
        self.state().probes
    }

    fn value_for(state: &mut LineState, field: &str) -> FieldValue {
        if let Some(value) = state.overrides.get(field) {
            return *value;
        }
        if !state.frozen {
            state.generation += 1;
        }
        let tick = state.generation;

        // Times are reported in milliseconds, availability in percent.
        if field.contains("\"Last\"") {
            FieldValue::Int(15_000 + (tick % 5) as i64 * 1_000)
        } else if field.contains("\"Desiered\"") {
            FieldValue::Int(17_000)
        } else if field.contains("\"TA\"") {
            FieldValue::Float(95.0 - (tick % 500) as f64 * 0.01)
        } else if field.contains("FaultTime") {
            FieldValue::Int((tick * 120) as i64)
        } else if field.contains("blockedTime") || field.contains("starvedTime") {
            FieldValue::Int((tick * 40) as i64)
        } else if field.contains("\"types\"[1]") {
            FieldValue::Int(tick as i64)
        } else if field.contains("\"types\"[2]") {
            FieldValue::Int((tick / 25) as i64)
        } else if field.contains("\"types\"[3]") {
            FieldValue::Int((tick / 60) as i64)
        } else {
            FieldValue::Null
        }
    }
}

pub struct SimulatedFactory {
    endpoint: String,
    line: SimulatedLine,
    secure: bool,
}

impl SimulatedFactory {
    pub fn new(endpoint: impl Into<String>, line: SimulatedLine, security: &SecurityConfig) -> Self {
        Self {
            endpoint: endpoint.into(),
            line,
            secure: security.is_enabled(),
        }
    }
}

impl SessionFactory for SimulatedFactory {
    fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn create(&self) -> Arc<dyn SessionClient> {
        Arc::new(SimulatedSession {
            line: self.line.clone(),
            secure: self.secure,
            connected: AtomicBool::new(false),
        })
    }
}

struct SimulatedSession {
    line: SimulatedLine,
    secure: bool,
    connected: AtomicBool,
}

impl SimulatedSession {
    fn ensure_live(&self, state: &LineState) -> Result<(), SessionError> {
        if !self.connected.load(Ordering::SeqCst) {
            return Err(SessionError::transport("session is not connected"));
        }
        if state.unreachable {
            return Err(SessionError::transport("connection reset by peer"));
        }
        Ok(())
    }
}

#[async_trait]
impl SessionClient for SimulatedSession {
    async fn connect(&self) -> Result<(), SessionError> {
        let mut state = self.line.state();
        state.connect_attempts += 1;
        if state.unreachable {
            return Err(SessionError::transport("endpoint unreachable"));
        }
        if state.fail_next_connects > 0 {
            state.fail_next_connects -= 1;
            return Err(SessionError::transport("connection refused"));
        }
        if self.secure && state.reject_handshake {
            return Err(SessionError::Security(
                "server rejected client certificate".to_string(),
            ));
        }
        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), SessionError> {
        self.connected.store(false, Ordering::SeqCst);
        Ok(())
    }

    async fn read_field(&self, field: &FieldId) -> Result<FieldValue, SessionError> {
        let mut state = self.line.state();
        self.ensure_live(&state)?;
        if state.failing_fields.contains(field.as_str()) {
            return Err(SessionError::transport(format!(
                "bad status reading {field}"
            )));
        }
        Ok(SimulatedLine::value_for(&mut state, field.as_str()))
    }

    async fn probe(&self) -> Result<(), SessionError> {
        let mut state = self.line.state();
        state.probes += 1;
        self.ensure_live(&state)?;
        if state.fail_next_probes > 0 {
            state.fail_next_probes -= 1;
            return Err(SessionError::transport("probe timed out"));
        }
        Ok(())
    }
}
