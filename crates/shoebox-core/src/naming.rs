use crate::error::{Error, Result};
use crate::storage::Database;
use chrono::{Datelike, NaiveDateTime};
use std::io;
use std::path::{Path, PathBuf};
use tracing::{trace, warn};

/// Names available per timestamp (`_000` through `_999`).
pub const MAX_SEQUENCE: u32 = 1000;

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H.%M.%S";

pub fn format_name(timestamp: &NaiveDateTime, seq: u32, extension: &str) -> String {
    format!("{}_{:03}{}", timestamp.format(TIMESTAMP_FORMAT), seq, extension)
}

/// Reserve the first free `"{timestamp}_{seq:03}{ext}"` in the name ledger.
///
/// `extension` includes its leading dot. The reservation is written immediately, so two calls
/// never hand out the same name even before the owning entry is inserted. The ledger compares
/// names case-insensitively: `_000.jpg` and `_000.JPG` are the same name.
pub fn allocate_name(db: &Database, timestamp: &NaiveDateTime, extension: &str) -> Result<String> {
    for seq in 0..MAX_SEQUENCE {
        let name = format_name(timestamp, seq, extension);
        if db.reserve_name(&name)? {
            trace!("Allocated name {}", name);
            return Ok(name);
        }
    }
    Err(Error::NameExhaustion(
        timestamp.format(TIMESTAMP_FORMAT).to_string(),
    ))
}

/// Allocate a name and hand it to `place`, which puts the file there.
///
/// When `place` reports `AlreadyExists`, the target is a file the catalog lost track of: that name
/// stays reserved and the next sequence number is tried. Any other failure frees the name.
pub fn allocate_and_place<F>(
    db: &Database,
    timestamp: &NaiveDateTime,
    extension: &str,
    mut place: F,
) -> Result<String>
where
    F: FnMut(&str) -> io::Result<()>,
{
    loop {
        let name = allocate_name(db, timestamp, extension)?;
        match place(&name) {
            Ok(()) => return Ok(name),
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                warn!(
                    "'{}' is on disk but unknown to the catalog; leaving it reserved",
                    name
                );
            }
            Err(e) => {
                db.release_name(&name)?;
                return Err(e.into());
            }
        }
    }
}

/// `root/{year}/{month:02}/{day:02}`
pub fn date_dir(root: &Path, timestamp: &NaiveDateTime) -> PathBuf {
    root.join(format!("{:04}", timestamp.year()))
        .join(format!("{:02}", timestamp.month()))
        .join(format!("{:02}", timestamp.day()))
}
