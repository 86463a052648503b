pub mod filters;
pub mod loop_worker;
pub mod orchestrator;
pub mod readings;

pub use filters::CycleFilter;
pub use loop_worker::collection_loop;
pub use orchestrator::{CollectionOrchestrator, CollectionStatusObserver, TickSummary};
pub use readings::{FieldReader, ReadFault, TickReadings};
