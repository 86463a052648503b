//! Break detection: frozen availability counters matched against the
//! published break schedule.

pub mod detector;
pub mod freeze;
pub mod schedule;

pub use detector::{BreakStateMachine, BreakTransition, OpenBreak};
pub use freeze::{AvailabilitySnapshot, FreezeDetector, FreezeTracker, ReferenceStrategy};
pub use schedule::{BreakSchedule, ScheduledWindow};
