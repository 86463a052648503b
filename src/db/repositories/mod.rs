pub mod breaks;
pub mod connection_events;
pub mod schedules;
pub mod telemetry;
