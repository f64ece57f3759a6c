use rusqlite::{params, Connection, Result};
use tracing::{debug, warn};

pub const SCHEMA_VERSION: i64 = 1;

/// A persisted table, its creation statements and the columns it must have.
struct TableDef {
    name: &'static str,
    create: &'static str,
    columns: &'static [&'static str],
}

const ENTRY_COLUMNS: &[&str] = &[
    "key",
    "org_fname",
    "org_fpath",
    "metadata",
    "provenance_metadata",
    "naming_tag",
    "content_hash",
    "new_name",
    "datetime",
    "present",
    "trashed",
    "verify",
    "provenance_status",
];

const REPLACED_COLUMNS: &[&str] = &[
    "key",
    "org_fname",
    "org_fpath",
    "metadata",
    "provenance_metadata",
    "naming_tag",
    "content_hash",
    "new_name",
    "datetime",
    "present",
    "trashed",
    "verify",
    "provenance_status",
    "successor",
    "former_name",
];

pub const STAGING_COLUMNS: &[&str] = &[
    "key",
    "org_fname",
    "org_fpath",
    "metadata",
    "provenance_metadata",
    "content_hash",
    "imported",
    "allowed",
    "match_type",
    "message",
    "datetime",
    "naming_tag",
    "match",
    "import_key",
];

const TABLES: &[TableDef] = &[
    TableDef {
        name: "images",
        create: "CREATE TABLE images (
            key INTEGER PRIMARY KEY AUTOINCREMENT,
            org_fname TEXT NOT NULL,
            org_fpath TEXT NOT NULL,
            metadata TEXT NOT NULL,
            provenance_metadata TEXT,
            naming_tag TEXT NOT NULL,
            content_hash TEXT NOT NULL,
            new_name TEXT NOT NULL UNIQUE COLLATE NOCASE,
            datetime TEXT NOT NULL,
            present INTEGER NOT NULL DEFAULT 1,
            trashed INTEGER NOT NULL DEFAULT 0,
            verify INTEGER NOT NULL DEFAULT 0,
            provenance_status INTEGER NOT NULL DEFAULT 0
        );
        CREATE INDEX IF NOT EXISTS idx_images_content_hash ON images(content_hash);
        CREATE INDEX IF NOT EXISTS idx_images_datetime ON images(datetime);",
        columns: ENTRY_COLUMNS,
    },
    TableDef {
        name: "names",
        create: "CREATE TABLE names (name TEXT PRIMARY KEY COLLATE NOCASE);",
        columns: &["name"],
    },
    TableDef {
        name: "replaced",
        create: "CREATE TABLE replaced (
            key INTEGER PRIMARY KEY,
            org_fname TEXT NOT NULL,
            org_fpath TEXT NOT NULL,
            metadata TEXT NOT NULL,
            provenance_metadata TEXT,
            naming_tag TEXT NOT NULL,
            content_hash TEXT NOT NULL,
            new_name TEXT NOT NULL,
            datetime TEXT NOT NULL,
            present INTEGER NOT NULL,
            trashed INTEGER NOT NULL,
            verify INTEGER NOT NULL,
            provenance_status INTEGER NOT NULL,
            successor INTEGER NOT NULL,
            former_name TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_replaced_successor ON replaced(successor);
        CREATE INDEX IF NOT EXISTS idx_replaced_content_hash ON replaced(content_hash);",
        columns: REPLACED_COLUMNS,
    },
    TableDef {
        name: "import_tables",
        create: "CREATE TABLE import_tables (
            key INTEGER PRIMARY KEY AUTOINCREMENT,
            root_path TEXT NOT NULL,
            table_name TEXT NOT NULL UNIQUE,
            created_at TEXT NOT NULL
        );",
        columns: &["key", "root_path", "table_name", "created_at"],
    },
    TableDef {
        name: "duplicates",
        create: "CREATE TABLE duplicates (
            key INTEGER PRIMARY KEY AUTOINCREMENT,
            match_type TEXT NOT NULL,
            matched_keys TEXT NOT NULL
        );",
        columns: &["key", "match_type", "matched_keys"],
    },
];

/// A persisted table whose shape differs from what the engine expects.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaIssue {
    pub table: String,
    pub expected: Vec<String>,
    pub found: Vec<String>,
}

/// Create missing tables and compare existing ones against the expected columns.
///
/// Mismatches are logged and returned, never fatal: the engine proceeds best-effort.
pub fn verify_or_create(conn: &Connection) -> Result<Vec<SchemaIssue>> {
    let mut issues = Vec::new();
    let mut created = 0;

    for table in TABLES {
        let found = table_columns(conn, table.name)?;
        if found.is_empty() {
            conn.execute_batch(table.create)?;
            created += 1;
            continue;
        }
        if !columns_match(table.columns, &found) {
            warn!(
                "Table '{}' does not match the expected schema: expected {:?}, found {:?}",
                table.name, table.columns, found
            );
            issues.push(SchemaIssue {
                table: table.name.to_string(),
                expected: table.columns.iter().map(|c| c.to_string()).collect(),
                found,
            });
        }
    }

    if created > 0 {
        conn.pragma_update(None, "user_version", SCHEMA_VERSION)?;
        debug!("Created {} catalog tables (schema version {})", created, SCHEMA_VERSION);
    }

    let version: i64 = conn.query_row("PRAGMA user_version", [], |row| row.get(0))?;
    if version != SCHEMA_VERSION {
        warn!(
            "Catalog schema version {} differs from engine version {}",
            version, SCHEMA_VERSION
        );
    }

    Ok(issues)
}

/// Creation statement for one batch's staging table.
///
/// `table_name` must come from [`staging_table_name`]; identifiers cannot be bound as parameters.
pub fn staging_table_sql(table_name: &str) -> String {
    format!(
        "CREATE TABLE IF NOT EXISTS \"{table_name}\" (
            key INTEGER PRIMARY KEY AUTOINCREMENT,
            org_fname TEXT NOT NULL,
            org_fpath TEXT NOT NULL,
            metadata TEXT,
            provenance_metadata TEXT,
            content_hash TEXT,
            imported INTEGER NOT NULL DEFAULT 0,
            allowed INTEGER NOT NULL DEFAULT 0,
            match_type INTEGER CHECK (match_type BETWEEN 0 AND 5),
            message TEXT,
            datetime TEXT,
            naming_tag TEXT,
            \"match\" INTEGER,
            import_key INTEGER,
            UNIQUE (org_fpath, org_fname)
        );"
    )
}

pub fn staging_table_name(batch_key: i64) -> String {
    format!("import_{batch_key}")
}

pub fn table_columns(conn: &Connection, table: &str) -> Result<Vec<String>> {
    let mut stmt = conn.prepare("SELECT name FROM pragma_table_info(?1)")?;
    let columns = stmt
        .query_map(params![table], |row| row.get(0))?
        .collect::<Result<Vec<String>>>()?;
    Ok(columns)
}

fn columns_match(expected: &[&str], found: &[String]) -> bool {
    expected.len() == found.len() && expected.iter().all(|c| found.iter().any(|f| f == c))
}
