pub mod models;
pub mod queries;
pub mod schema;
pub mod sqlite;

pub use schema::SchemaIssue;
pub use sqlite::Database;

use crate::error::{Error, Result};

/// Collapse a keyed lookup that the catalog guarantees to be unique.
pub(crate) fn at_most_one<T>(mut rows: Vec<T>, what: impl FnOnce() -> String) -> Result<Option<T>> {
    match rows.len() {
        0 => Ok(None),
        1 => Ok(rows.pop()),
        n => Err(Error::CorruptDatabase(format!("{} ({} rows)", what(), n))),
    }
}
