pub mod logging;

pub use logging::{suppressed_suffix, FaultThrottle, TeeWriter};
