use std::{
    fs,
    path::{Path, PathBuf},
    time::Duration,
};

use serde::Deserialize;

use crate::{
    breaks::ReferenceStrategy, connection::BackoffSchedule, error::StartupError,
    shifts::ShiftCalendar,
};

pub const DEFAULT_CONFIG_PATH: &str = "config/collector_config.json";
pub const CONFIG_PATH_ENV: &str = "OEE_COLLECTOR_CONFIG";
pub const DEBUG_ENV: &str = "OEE_COLLECTOR_DEBUG";

#[derive(Debug, Clone, Deserialize)]
pub struct CollectorConfig {
    pub connection: ConnectionConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    pub machine: MachineConfig,
    #[serde(default)]
    pub shifts: ShiftCalendar,
    #[serde(default)]
    pub nodes: NodeTemplates,
    #[serde(default)]
    pub collection: CollectionConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ConnectionConfig {
    pub endpoint: String,
    #[serde(default)]
    pub security: Option<SecurityConfig>,
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
    #[serde(default = "default_probe_timeout")]
    pub probe_timeout_secs: u64,
    #[serde(default = "default_read_timeout")]
    pub read_timeout_secs: u64,
    #[serde(default = "default_health_check")]
    pub health_check_interval_secs: u64,
    #[serde(default = "default_backoff")]
    pub backoff_secs: Vec<u64>,
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
pub struct SecurityConfig {
    pub policy: Option<String>,
    pub mode: Option<String>,
    #[serde(default = "default_certificate_path")]
    pub certificate_path: PathBuf,
    #[serde(default = "default_key_path")]
    pub key_path: PathBuf,
}

impl SecurityConfig {
    pub fn is_enabled(&self) -> bool {
        self.policy.is_some() && self.mode.is_some()
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_database_path")]
    pub path: PathBuf,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_database_path(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct MachineConfig {
    pub tracked_units: Vec<u32>,
    /// Unit whose availability counters drive break detection.
    #[serde(default)]
    pub reference_unit: Option<u32>,
    /// Require a majority of units to freeze instead of a single reference.
    #[serde(default)]
    pub freeze_quorum: bool,
    /// Synchronised stations that also report short pass-through cycles.
    #[serde(default = "default_paired_units")]
    pub paired_units: Vec<u32>,
    #[serde(default = "default_pass_through_threshold")]
    pub pass_through_threshold_secs: f64,
    #[serde(default = "default_target_cycle")]
    pub target_cycle_time_secs: f64,
}

impl MachineConfig {
    pub fn reference_strategy(&self) -> ReferenceStrategy {
        if self.freeze_quorum {
            ReferenceStrategy::Quorum
        } else {
            self.reference_unit
                .map(ReferenceStrategy::Unit)
                .unwrap_or(ReferenceStrategy::FirstTracked)
        }
    }
}

/// Field id templates. `{unit}`, `{shift}` and `{hour}` are substituted per read.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct NodeTemplates {
    pub cycle_last: String,
    pub cycle_desired: String,
    pub availability_percent: String,
    pub fault_time: String,
    pub blocked_time: String,
    pub starved_time: String,
    pub quality_good: String,
    pub quality_reject: String,
    pub quality_rework: String,
}

impl Default for NodeTemplates {
    fn default() -> Self {
        let unit = |field: &str| {
            format!("ns=3;s=\"cycleTimeScreenInterfaceTADB\".\"Type\"[{{unit}}].{field}")
        };
        let counter = |kind: u8| {
            format!(
                "ns=3;s=\"Counter_Interface\".\"shifts\"[{{shift}}].\"types\"[{kind}].\"data\"[{{hour}}]"
            )
        };
        Self {
            cycle_last: unit("\"Last\""),
            // The controller spells this field "Desiered".
            cycle_desired: unit("\"Desiered\""),
            availability_percent: unit("\"TA\"[0]"),
            fault_time: unit("\"FaultTime\"[0]"),
            blocked_time: unit("\"blockedTime\"[0]"),
            starved_time: unit("\"starvedTime\"[0]"),
            quality_good: counter(1),
            quality_reject: counter(2),
            quality_rework: counter(3),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CollectionConfig {
    #[serde(default = "default_interval")]
    pub interval_secs: u64,
}

impl Default for CollectionConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_interval(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Persistent copy of the console log; `null` keeps logging console-only.
    #[serde(default = "default_log_file")]
    pub file: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            file: default_log_file(),
        }
    }
}

impl CollectorConfig {
    /// Path from `OEE_COLLECTOR_CONFIG`, falling back to the conventional location.
    pub fn default_path() -> PathBuf {
        std::env::var(CONFIG_PATH_ENV)
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(DEFAULT_CONFIG_PATH))
    }

    pub fn load(path: &Path) -> Result<Self, StartupError> {
        let contents = fs::read_to_string(path).map_err(|err| {
            StartupError::config(format!(
                "failed to read configuration {}: {err}",
                path.display()
            ))
        })?;
        Self::from_json(&contents)
    }

    pub fn from_json(contents: &str) -> Result<Self, StartupError> {
        let mut config: CollectorConfig = serde_json::from_str(contents)
            .map_err(|err| StartupError::config(format!("invalid configuration JSON: {err}")))?;
        config.connection.endpoint = normalize_endpoint(&config.connection.endpoint);
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), StartupError> {
        if self.connection.endpoint.trim().is_empty() {
            return Err(StartupError::config("connection.endpoint is required"));
        }
        if self.machine.tracked_units.is_empty() {
            return Err(StartupError::config(
                "machine.tracked_units must list at least one unit",
            ));
        }
        if let Some(reference) = self.machine.reference_unit {
            if !self.machine.tracked_units.contains(&reference) {
                return Err(StartupError::config(format!(
                    "machine.reference_unit {reference} is not a tracked unit"
                )));
            }
        }
        if self.connection.backoff_secs.is_empty() {
            return Err(StartupError::config("connection.backoff_secs must not be empty"));
        }
        if self.collection.interval_secs == 0 {
            return Err(StartupError::config("collection.interval_secs must be positive"));
        }
        if let Some(security) = &self.connection.security {
            match (&security.policy, &security.mode) {
                (Some(_), Some(_)) => {
                    for (label, path) in [
                        ("certificate", &security.certificate_path),
                        ("private key", &security.key_path),
                    ] {
                        if !path.exists() {
                            return Err(StartupError::config(format!(
                                "security {label} not found at {}",
                                path.display()
                            )));
                        }
                    }
                }
                (None, None) => {}
                _ => {
                    return Err(StartupError::config(
                        "security.policy and security.mode must be set together",
                    ))
                }
            }
        }
        Ok(())
    }

    pub fn backoff(&self) -> BackoffSchedule {
        BackoffSchedule::from_secs(&self.connection.backoff_secs)
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.collection.interval_secs)
    }

    pub fn security(&self) -> SecurityConfig {
        self.connection.security.clone().unwrap_or_default()
    }
}

/// Bare `host:port` endpoints get the default protocol scheme.
pub fn normalize_endpoint(raw: &str) -> String {
    let trimmed = raw.trim();
    if trimmed.is_empty() || trimmed.contains("://") {
        trimmed.to_string()
    } else {
        format!("opc.tcp://{trimmed}")
    }
}

pub fn debug_mode() -> bool {
    std::env::var(DEBUG_ENV)
        .map(|value| value == "1" || value.eq_ignore_ascii_case("true"))
        .unwrap_or(false)
}

fn default_connect_timeout() -> u64 {
    30
}

fn default_probe_timeout() -> u64 {
    5
}

fn default_read_timeout() -> u64 {
    5
}

fn default_health_check() -> u64 {
    30
}

fn default_backoff() -> Vec<u64> {
    vec![1, 2, 5, 10, 30, 60]
}

fn default_certificate_path() -> PathBuf {
    PathBuf::from("client_cert.der")
}

fn default_key_path() -> PathBuf {
    PathBuf::from("client_key.pem")
}

fn default_log_file() -> Option<PathBuf> {
    Some(PathBuf::from("logs/collector.log"))
}

fn default_database_path() -> PathBuf {
    PathBuf::from("data/production.sqlite3")
}

fn default_paired_units() -> Vec<u32> {
    vec![47, 48]
}

fn default_pass_through_threshold() -> f64 {
    10.0
}

fn default_target_cycle() -> f64 {
    17.0
}

fn default_interval() -> u64 {
    10
}
