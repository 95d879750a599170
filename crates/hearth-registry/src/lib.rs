//! Service & route registry.

pub mod error;
pub mod ports;
pub mod registry;

pub use error::{Error, Result};
pub use ports::PortAllocator;
pub use registry::Registry;
