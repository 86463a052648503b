pub mod break_record;
pub mod connection_event;
pub mod schedule_entry;
pub mod telemetry;

pub use break_record::BreakRecord;
pub use connection_event::{ConnectionEvent, ConnectionEventKind};
pub use schedule_entry::ScheduleEntry;
pub use telemetry::{AvailabilityReading, CycleTimeReading, QualityCounters};
