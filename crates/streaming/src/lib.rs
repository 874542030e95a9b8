//! Incremental loading of paginated feature data into the cluster index.

pub mod config;
pub mod coordinator;
pub mod error;
pub mod fetcher;
pub mod progress;

pub use config::*;
pub use coordinator::*;
pub use error::*;
pub use fetcher::*;
pub use progress::*;
