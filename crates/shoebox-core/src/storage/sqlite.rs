use super::schema::{self, SchemaIssue};
use rusqlite::{Connection, Result};
use std::path::Path;
use tracing::debug;

/// The catalog connection. One per open library; not shared across threads.
pub struct Database {
    conn: Connection,
    schema_issues: Vec<SchemaIssue>,
}

impl Database {
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)?;
        Self::init(conn)
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Self::init(conn)
    }

    fn init(conn: Connection) -> Result<Self> {
        let mut db = Database {
            conn,
            schema_issues: Vec::new(),
        };
        db.configure_pragmas()?;
        db.schema_issues = schema::verify_or_create(&db.conn)?;
        Ok(db)
    }

    fn configure_pragmas(&self) -> Result<()> {
        self.conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;
             PRAGMA cache_size = -64000;
             PRAGMA busy_timeout = 5000;",
        )?;
        debug!("SQLite pragmas configured (WAL mode, 64MB cache)");
        Ok(())
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    /// Schema mismatches found when the catalog was opened.
    pub fn schema_issues(&self) -> &[SchemaIssue] {
        &self.schema_issues
    }
}
