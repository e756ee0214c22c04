pub mod application;
pub mod cli;
pub mod domain;
pub mod error;
pub mod logging;
pub mod storage;

pub use domain::*;
pub use error::{Action, ErrorKind, LedgerError, LedgerResult};
pub use storage::{LedgerStore, SqliteStore, StoreConfig};
