pub mod adapter;
pub mod context;
pub mod directive;
pub mod registry;
pub mod star;

pub use adapter::*;
pub use context::*;
pub use directive::*;
pub use registry::*;
pub use star::*;
