//! Persistence layer — libSQL-backed storage for application records,
//! the durable skip set, classifier usage, and the run log.

pub mod libsql_backend;
pub mod traits;

pub use libsql_backend::LibSqlStore;
pub use traits::{ApplicationRecord, RunSummary, SkipEntry, Store};
