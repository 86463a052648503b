mod connection;
pub mod helpers;
mod migrations;
pub mod models;
mod repositories;
pub mod store;

pub use connection::Database;
pub use models::{
    AvailabilityReading, BreakRecord, ConnectionEvent, ConnectionEventKind, CycleTimeReading,
    QualityCounters, ScheduleEntry,
};
pub use store::Record;
