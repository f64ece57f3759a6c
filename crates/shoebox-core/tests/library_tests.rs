mod common;

use common::{ts, Fixture, TestExtractor};
use shoebox_core::{EntryState, Error, IntegrityIssue, Library, LibraryConfig, LibraryStats};
use std::fs;
use tempfile::tempdir;

#[test]
fn test_open_requires_directory_and_catalog() {
    let tmp = tempdir().unwrap();
    let file = tmp.path().join("not-a-dir");
    fs::write(&file, "x").unwrap();
    assert!(matches!(
        Library::open(&file, LibraryConfig::default()),
        Err(Error::Validation(_))
    ));
    assert!(matches!(
        Library::open(tmp.path(), LibraryConfig::default()),
        Err(Error::Validation(_))
    ));

    let root = tmp.path().join("lib");
    drop(Library::create(&root, LibraryConfig::default()).unwrap());
    assert!(root.join(".photos.db").is_file());
    assert!(root.join(".trash").is_dir());
    assert!(root.join(".thumbnails").is_dir());
    assert!(matches!(
        Library::create(&root, LibraryConfig::default()),
        Err(Error::Validation(_))
    ));

    let reopened = Library::open(&root, LibraryConfig::default()).unwrap();
    assert!(reopened.schema_issues().is_empty());
}

#[test]
fn test_created_library_reopens_with_its_state() {
    let tmp = tempdir().unwrap();
    let root = tmp.path().join("fresh/nested");

    let library = Library::create(&root, LibraryConfig::default()).unwrap();
    assert!(library.schema_issues().is_empty());
    assert_eq!(library.stats().unwrap(), LibraryStats::default());
    assert!(library
        .database()
        .reserve_name("2024-01-01 10.00.00_000.jpg")
        .unwrap());
    drop(library);

    let reopened = Library::open(&root, LibraryConfig::default()).unwrap();
    assert_eq!(reopened.root(), root.as_path());
    assert_eq!(reopened.stats().unwrap().reserved_names, 1);
    assert!(reopened
        .database()
        .is_name_reserved("2024-01-01 10.00.00_000.jpg")
        .unwrap());
}

#[test]
fn test_schema_mismatch_is_only_a_warning() {
    let tmp = tempdir().unwrap();
    let root = tmp.path();
    let conn = rusqlite::Connection::open(root.join(".photos.db")).unwrap();
    conn.execute_batch("CREATE TABLE names (name TEXT PRIMARY KEY, owner INTEGER);")
        .unwrap();
    drop(conn);

    let library = Library::open(root, LibraryConfig::default()).unwrap();
    assert_eq!(library.schema_issues().len(), 1);
    assert_eq!(library.schema_issues()[0].table, "names");
}

#[test]
fn test_trash_restore_and_delete() {
    let fx = Fixture::new();
    let folder = fx.folder("in", &[("a.jpg", b"a")]);
    let key = fx.import_all(&folder, &TestExtractor::new())[0];
    let name = fx.library.entry(key).unwrap().new_name;
    let tree = fx.root.join("2024/01/01").join(&name);
    let trash = fx.root.join(".trash").join(&name);

    fx.library.trash_entry(key).unwrap();
    assert_eq!(fx.library.entry(key).unwrap().state(), EntryState::SoftDeleted);
    assert!(trash.is_file() && !tree.exists());
    assert_eq!(fx.library.entry_path(key).unwrap(), Some(trash.clone()));

    fx.library.restore_entry(key).unwrap();
    assert_eq!(fx.library.entry(key).unwrap().state(), EntryState::Active);
    assert!(tree.is_file() && !trash.exists());

    fx.library.delete_entry_file(key).unwrap();
    assert_eq!(fx.library.entry(key).unwrap().state(), EntryState::HardDeleted);
    assert_eq!(fx.library.entry_path(key).unwrap(), None);
    assert!(matches!(
        fx.library.restore_entry(key),
        Err(Error::Validation(_))
    ));
}

#[test]
fn test_path_resolution_trusts_the_filesystem() {
    let fx = Fixture::new();
    let folder = fx.folder("in", &[("a.jpg", b"a")]);
    let key = fx.import_all(&folder, &TestExtractor::new())[0];
    let name = fx.library.entry(key).unwrap().new_name;

    // Moved to the trash behind the catalog's back.
    let trash = fx.root.join(".trash").join(&name);
    fs::rename(fx.root.join("2024/01/01").join(&name), &trash).unwrap();
    assert_eq!(fx.library.entry_path(key).unwrap(), Some(trash));
    assert!(matches!(
        fx.library.entry_path(12345),
        Err(Error::UnknownEntry(12345))
    ));
}

#[test]
fn test_rename_keeps_old_name_reserved() {
    let fx = Fixture::new();
    let folder = fx.folder("in", &[("a.jpg", b"a")]);
    let key = fx.import_all(&folder, &TestExtractor::new())[0];
    let old = fx.library.entry(key).unwrap().new_name;

    let new = fx
        .library
        .rename_entry(key, ts(2019, 7, 4, 18, 30, 0), "File:FileModifyDate")
        .unwrap();
    assert_eq!(new, "2019-07-04 18.30.00_000.jpg");
    let entry = fx.library.entry(key).unwrap();
    assert!(entry.verify, "a filesystem tag marks the date for review");
    assert_eq!(entry.naming_tag, "File:FileModifyDate");
    assert!(fx.root.join("2019/07/04").join(&new).is_file());
    assert!(!fx.root.join("2024/01/01").join(&old).exists());

    assert_eq!(fx.library.stats().unwrap().reserved_names, 2);
    assert!(matches!(
        fx.library.release_name(&new),
        Err(Error::IntegrityViolation(_))
    ));
    assert!(fx.library.release_name(&old).unwrap());
    assert!(!fx.library.release_name(&old).unwrap());
}

#[test]
fn test_failed_rename_frees_the_new_name() {
    let fx = Fixture::new();
    let folder = fx.folder("in", &[("a.jpg", b"a")]);
    let key = fx.import_all(&folder, &TestExtractor::new())[0];
    let old = fx.library.entry(key).unwrap().new_name;

    // A plain file where the year directory should be makes the move fail.
    fs::write(fx.root.join("2019"), "not a directory").unwrap();
    assert!(matches!(
        fx.library
            .rename_entry(key, ts(2019, 7, 4, 18, 30, 0), "Manual"),
        Err(Error::Io(_))
    ));

    let entry = fx.library.entry(key).unwrap();
    assert_eq!(entry.new_name, old);
    assert!(fx.root.join("2024/01/01").join(&old).is_file());
    assert!(!fx
        .library
        .database()
        .is_name_reserved("2019-07-04 18.30.00_000.jpg")
        .unwrap());
    assert_eq!(fx.library.stats().unwrap().reserved_names, 1);
}

#[test]
fn test_rename_skips_names_taken_on_disk() {
    let fx = Fixture::new();
    let folder = fx.folder("in", &[("a.jpg", b"a")]);
    let key = fx.import_all(&folder, &TestExtractor::new())[0];

    let day = fx.root.join("2019/07/04");
    fs::create_dir_all(&day).unwrap();
    fs::write(day.join("2019-07-04 18.30.00_000.jpg"), "stray").unwrap();

    let new = fx
        .library
        .rename_entry(key, ts(2019, 7, 4, 18, 30, 0), "Manual")
        .unwrap();
    assert_eq!(new, "2019-07-04 18.30.00_001.jpg");
    assert_eq!(fs::read(day.join(&new)).unwrap(), b"a");
    assert_eq!(
        fs::read(day.join("2019-07-04 18.30.00_000.jpg")).unwrap(),
        b"stray"
    );
}

#[test]
fn test_forget_entry_keeps_name() {
    let fx = Fixture::new();
    let folder = fx.folder("in", &[("a.jpg", b"a")]);
    let key = fx.import_all(&folder, &TestExtractor::new())[0];
    let path = fx.library.entry_path(key).unwrap().unwrap();

    fx.library.forget_entry(key).unwrap();
    assert!(!path.exists());
    assert!(fx.library.find_entry(key).unwrap().is_none());
    assert_eq!(fx.library.stats().unwrap().reserved_names, 1);
}

#[test]
fn test_stats_and_integrity_check() {
    let fx = Fixture::new();
    let folder = fx.folder(
        "in",
        &[("a.jpg", b"a"), ("b.jpg", b"b"), ("c.jpg", b"c"), ("d.jpg", b"d")],
    );
    let keys = fx.import_all(&folder, &TestExtractor::new());
    fx.library.trash_entry(keys[1]).unwrap();
    fx.library.delete_entry_file(keys[2]).unwrap();
    fx.library
        .database()
        .update_entry_flags(keys[3], false, false)
        .unwrap();

    let stats = fx.library.stats().unwrap();
    assert_eq!(stats.active, 1);
    assert_eq!(stats.soft_deleted, 1);
    assert_eq!(stats.hard_deleted, 1);
    assert_eq!(stats.anomalous, 1);
    assert_eq!(stats.reserved_names, 4);
    assert_eq!(stats.open_batches, 0);

    let missing = fx.library.entry_path(keys[0]).unwrap().unwrap();
    fs::remove_file(&missing).unwrap();
    let issues = fx.library.check_integrity().unwrap();
    assert_eq!(issues.len(), 2);
    assert!(issues.contains(&IntegrityIssue::MissingFile {
        key: keys[0],
        expected: missing,
    }));
    assert!(issues.contains(&IntegrityIssue::AnomalousState { key: keys[3] }));
}

#[test]
fn test_thumbnail_path_layout() {
    let fx = Fixture::new();
    let folder = fx.folder("in", &[("clip.MOV", b"video")]);
    let key = fx.import_all(&folder, &TestExtractor::new())[0];
    let entry = fx.library.entry(key).unwrap();
    assert_eq!(
        fx.library.thumbnail_path(&entry),
        fx.root.join(".thumbnails").join(format!("thumb_{key}.MOV"))
    );
}
