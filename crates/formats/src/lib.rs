pub mod feature;
pub mod page;

pub use feature::*;
pub use page::*;
