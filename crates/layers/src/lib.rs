pub mod renderer;
pub mod surface;
pub mod symbology;
pub mod viewport;

pub use renderer::*;
pub use surface::*;
pub use symbology::*;
pub use viewport::*;
