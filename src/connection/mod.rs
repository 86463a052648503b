pub mod events;
pub mod manager;
pub mod state;

pub use events::{ConnectNotice, ConnectionObserver, NoopObserver};
pub use manager::{ConnectionManager, ConnectionSettings, HandleSource, SessionHandle};
pub use state::{BackoffSchedule, ConnectionState};
