//! Storage layer for kbsearch
//!
//! The corpus lives in a single SQLite database accessed through a connection
//! pool. Lexical indexes are FTS5 tables maintained by triggers; vector
//! distance and metadata containment run as registered scalar functions so
//! that scope filters are evaluated inside the database.

pub mod corpus;
pub mod database;
pub mod functions;

pub use corpus::hydrate;
pub use database::{Database, DbConn, DbOptions, DbPool, DbStats};

use crate::config::StorageConfig;
use crate::error::Result;
use std::path::Path;
use std::time::Duration;

/// Open the database described by a storage configuration.
///
/// `data_dir` must already be expanded (no leading `~`).
pub fn open(config: &StorageConfig, data_dir: &Path) -> Result<Database> {
    let options = DbOptions {
        pool_size: config.pool_size,
        busy_timeout: Duration::from_millis(config.busy_timeout_ms),
    };
    Database::with_options(&data_dir.join(&config.database_file), options)
}
