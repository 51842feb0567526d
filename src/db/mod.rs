pub mod connection;
pub mod state;

pub use connection::{init_db, Database};

use std::fmt;

/// Errors from the state store. A failed commit never leaves partial
/// state behind; the cycle is simply retried from the old snapshot.
#[derive(Debug)]
pub enum StoreError {
    OpenFailed(String),
    Sql(String),
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreError::OpenFailed(msg) => write!(f, "Open DB failed: {msg}"),
            StoreError::Sql(msg) => write!(f, "Database error: {msg}"),
        }
    }
}

impl std::error::Error for StoreError {}

impl From<rusqlite::Error> for StoreError {
    fn from(e: rusqlite::Error) -> Self {
        StoreError::Sql(e.to_string())
    }
}
