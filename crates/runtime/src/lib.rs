pub mod event_bus;
pub mod metrics;
pub mod scheduler;

pub use event_bus::*;
pub use metrics::*;
pub use scheduler::*;
