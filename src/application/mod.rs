// Application layer - use cases and orchestration over the storage port.

mod service;

pub use service::*;
