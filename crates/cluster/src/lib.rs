//! Representative points, hierarchical clustering, and the shared index
//! snapshot the loader publishes to the renderer.

pub mod index;
pub mod indexer;
pub mod kdtree;
pub mod representative;
pub mod snapshot;

pub use index::*;
pub use indexer::*;
pub use kdtree::*;
pub use representative::*;
pub use snapshot::*;
