//! Conditional logging macros that check a module-level `ENABLE_LOGS` flag,
//! plus a small throttle for faults that repeat every poll.
//!
//! Usage:
//! ```rust,ignore
//! // In your module, define the flag first:
//! const ENABLE_LOGS: bool = true;
//!
//! // Then use the macros (they're exported at the crate root):
//! use crate::{log_info, log_warn, log_error};
//!
//! log_info!("This will log if ENABLE_LOGS is true");
//! ```

use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::Path;
use std::time::{Duration, Instant};

/// Macro for conditional debug logging.
/// Checks the `ENABLE_LOGS` const in the calling module.
#[macro_export]
macro_rules! log_debug {
    ($($arg:tt)*) => {
        if ENABLE_LOGS {
            log::debug!($($arg)*);
        }
    };
}

/// Macro for conditional info logging.
/// Checks the `ENABLE_LOGS` const in the calling module.
///
/// Each module that uses this macro must define:
/// ```rust,ignore
/// const ENABLE_LOGS: bool = true; // or false
/// ```
#[macro_export]
macro_rules! log_info {
    ($($arg:tt)*) => {
        if ENABLE_LOGS {
            log::info!($($arg)*);
        }
    };
}

/// Macro for conditional warn logging.
/// Checks the `ENABLE_LOGS` const in the calling module.
#[macro_export]
macro_rules! log_warn {
    ($($arg:tt)*) => {
        if ENABLE_LOGS {
            log::warn!($($arg)*);
        }
    };
}

/// Macro for conditional error logging.
/// Checks the `ENABLE_LOGS` const in the calling module.
#[macro_export]
macro_rules! log_error {
    ($($arg:tt)*) => {
        if ENABLE_LOGS {
            log::error!($($arg)*);
        }
    };
}

/// Log sink that copies every line to stderr and appends it to a file.
pub struct TeeWriter {
    file: File,
}

impl TeeWriter {
    pub fn open(path: &Path) -> io::Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self { file })
    }
}

impl Write for TeeWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        // Console output is best effort; the file is the durable copy.
        let _ = io::stderr().write_all(buf);
        self.file.write_all(buf)?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        let _ = io::stderr().flush();
        self.file.flush()
    }
}

pub const DEFAULT_FAULT_WINDOW: Duration = Duration::from_secs(60);

struct ThrottleEntry {
    last_emitted: Instant,
    suppressed: u32,
}

/// Lets the first occurrence of a fault through, then swallows repeats of the
/// same key until `window` has elapsed.
pub struct FaultThrottle {
    window: Duration,
    entries: HashMap<String, ThrottleEntry>,
}

impl Default for FaultThrottle {
    fn default() -> Self {
        Self::new(DEFAULT_FAULT_WINDOW)
    }
}

impl FaultThrottle {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            entries: HashMap::new(),
        }
    }

    /// Returns `Some(n)` when the caller should log, where `n` is the number of
    /// repeats swallowed since the last emitted line. `None` means stay quiet.
    pub fn check(&mut self, key: &str) -> Option<u32> {
        self.check_at(key, Instant::now())
    }

    pub fn check_at(&mut self, key: &str, now: Instant) -> Option<u32> {
        match self.entries.get_mut(key) {
            None => {
                self.entries.insert(
                    key.to_string(),
                    ThrottleEntry {
                        last_emitted: now,
                        suppressed: 0,
                    },
                );
                Some(0)
            }
            Some(entry) => {
                if now.saturating_duration_since(entry.last_emitted) >= self.window {
                    let suppressed = entry.suppressed;
                    entry.last_emitted = now;
                    entry.suppressed = 0;
                    Some(suppressed)
                } else {
                    entry.suppressed = entry.suppressed.saturating_add(1);
                    None
                }
            }
        }
    }

    /// Forget a key once the fault has cleared, so the next failure logs immediately.
    pub fn clear(&mut self, key: &str) {
        self.entries.remove(key);
    }

    pub fn clear_all(&mut self) {
        self.entries.clear();
    }
}

/// Suffix appended to a throttled log line, e.g. `" (12 repeats suppressed)"`.
pub fn suppressed_suffix(suppressed: u32) -> String {
    if suppressed == 0 {
        String::new()
    } else {
        format!(" ({suppressed} repeats suppressed)")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tee_writer_appends_to_the_log_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("logs").join("collector.log");

        let mut writer = TeeWriter::open(&path).unwrap();
        writer.write_all(b"first line\n").unwrap();
        writer.flush().unwrap();
        drop(writer);

        let mut writer = TeeWriter::open(&path).unwrap();
        writer.write_all(b"second line\n").unwrap();
        writer.flush().unwrap();

        let contents = fs::read_to_string(&path).unwrap();
        assert_eq!(contents, "first line\nsecond line\n");
    }

    #[test]
    fn first_fault_logs_and_repeats_are_suppressed() {
        let mut throttle = FaultThrottle::new(Duration::from_secs(60));
        let start = Instant::now();

        assert_eq!(throttle.check_at("read:47", start), Some(0));
        assert_eq!(throttle.check_at("read:47", start + Duration::from_secs(10)), None);
        assert_eq!(throttle.check_at("read:47", start + Duration::from_secs(20)), None);
        assert_eq!(
            throttle.check_at("read:47", start + Duration::from_secs(61)),
            Some(2)
        );
    }

    #[test]
    fn keys_are_independent_and_clear_resets() {
        let mut throttle = FaultThrottle::new(Duration::from_secs(60));
        let start = Instant::now();

        assert_eq!(throttle.check_at("a", start), Some(0));
        assert_eq!(throttle.check_at("b", start), Some(0));
        assert_eq!(throttle.check_at("a", start), None);

        throttle.clear("a");
        assert_eq!(throttle.check_at("a", start), Some(0));
    }

    #[test]
    fn suffix_only_mentions_real_suppression() {
        assert_eq!(suppressed_suffix(0), "");
        assert_eq!(suppressed_suffix(3), " (3 repeats suppressed)");
    }
}
