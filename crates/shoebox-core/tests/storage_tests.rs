use chrono::NaiveDate;
use serde_json::json;
use shoebox_core::storage::models::*;
use shoebox_core::storage::{schema, Database};

fn make_test_entry(name: &str, hash: &str) -> LibraryEntry {
    LibraryEntry {
        key: 0,
        org_fname: "IMG_0001.jpg".to_string(),
        org_fpath: "/card/DCIM".to_string(),
        metadata: json!({"File:FileSize": 1234}),
        provenance_metadata: None,
        naming_tag: "EXIF:DateTimeOriginal".to_string(),
        content_hash: hash.to_string(),
        new_name: name.to_string(),
        datetime: NaiveDate::from_ymd_opt(2024, 1, 1)
            .unwrap()
            .and_hms_opt(10, 0, 0)
            .unwrap(),
        present: true,
        trashed: false,
        verify: false,
        provenance_status: ProvenanceStatus::Absent,
    }
}

#[test]
fn test_entry_round_trip() {
    let db = Database::open_in_memory().unwrap();
    let entry = make_test_entry("2024-01-01 10.00.00_000.jpg", "h1");
    let key = db.insert_entry(&entry).unwrap();
    assert!(key > 0);

    let stored = db.entries_with_key(key).unwrap();
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0], LibraryEntry { key, ..entry.clone() });
    assert_eq!(stored[0].file_size(), Some(1234));
    assert_eq!(stored[0].extension(), ".jpg");
    assert_eq!(db.entries_by_hash("h1").unwrap().len(), 1);
    assert_eq!(db.entries_by_datetime(&entry.datetime).unwrap().len(), 1);
}

#[test]
fn test_allocated_names_are_unique_per_table() {
    let db = Database::open_in_memory().unwrap();
    db.insert_entry(&make_test_entry("same.jpg", "h1")).unwrap();
    assert!(db.insert_entry(&make_test_entry("same.jpg", "h2")).is_err());
}

#[test]
fn test_name_ledger() {
    let db = Database::open_in_memory().unwrap();
    assert!(db.reserve_name("a.jpg").unwrap());
    assert!(!db.reserve_name("a.jpg").unwrap(), "second reservation is refused");
    assert!(db.is_name_reserved("a.jpg").unwrap());
    assert_eq!(db.release_name("a.jpg").unwrap(), 1);
    assert!(!db.is_name_reserved("a.jpg").unwrap());
    assert_eq!(db.name_count().unwrap(), 0);
}

#[test]
fn test_provenance_is_filled_only_once() {
    let db = Database::open_in_memory().unwrap();
    let key = db.insert_entry(&make_test_entry("a.jpg", "h1")).unwrap();

    let first = json!({"XMP:Rating": 4});
    assert_eq!(
        db.fill_provenance(key, &first, ProvenanceStatus::CopiedFromMatch)
            .unwrap(),
        1
    );
    assert_eq!(
        db.fill_provenance(key, &json!({"XMP:Rating": 1}), ProvenanceStatus::CopiedFromMatch)
            .unwrap(),
        0
    );
    let stored = &db.entries_with_key(key).unwrap()[0];
    assert_eq!(stored.provenance_metadata, Some(first));
    assert_eq!(stored.provenance_status, ProvenanceStatus::CopiedFromMatch);
}

#[test]
fn test_reparent_replaced() {
    let db = Database::open_in_memory().unwrap();
    for (key, successor) in [(10, 1), (11, 1), (12, 2)] {
        db.insert_replaced(&ReplacedEntry {
            entry: LibraryEntry {
                key,
                ..make_test_entry(&format!("{key}.jpg"), "h")
            },
            successor,
            former_name: format!("{key}.jpg"),
        })
        .unwrap();
    }

    assert_eq!(db.reparent_replaced(1, 5).unwrap(), 2);
    let successors: Vec<i64> = db.all_replaced().unwrap().iter().map(|r| r.successor).collect();
    assert_eq!(successors, vec![5, 5, 2]);
    assert_eq!(db.replaced_by_hash("h").unwrap().len(), 3);
    assert_eq!(db.replaced_named("12.jpg").unwrap(), 1);
}

#[test]
fn test_import_batch_lifecycle() {
    let db = Database::open_in_memory().unwrap();
    let batch = db.insert_import_batch("/card").unwrap();
    assert_eq!(batch.table_name, format!("import_{}", batch.key));
    db.connection()
        .execute_batch(&schema::staging_table_sql(&batch.table_name))
        .unwrap();

    let table = batch.table_name.as_str();
    assert_eq!(db.upsert_staged_file(table, "/card", "a.jpg", true).unwrap(), 1);
    assert_eq!(db.upsert_staged_file(table, "/card", "a.jpg", true).unwrap(), 0);
    assert_eq!(db.upsert_staged_file(table, "/card", "a.jpg", false).unwrap(), 1);

    let rows = db.staged_files(table).unwrap();
    assert_eq!(rows.len(), 1);
    assert!(!rows[0].allowed);
    assert_eq!(rows[0].source_path(), std::path::PathBuf::from("/card/a.jpg"));

    db.set_staged_match(table, rows[0].key, MatchType::HashMatchTrash, Some(7), "seen")
        .unwrap();
    let row = db.staged_file(table, rows[0].key).unwrap().unwrap();
    assert_eq!(row.match_type, Some(MatchType::HashMatchTrash));
    assert_eq!(row.matched_key, Some(7));

    db.drop_import_batch(&batch).unwrap();
    assert!(db.get_import_batch(batch.key).unwrap().is_none());
    assert!(schema::table_columns(db.connection(), table).unwrap().is_empty());
}

#[test]
fn test_staging_rejects_out_of_range_match_type() {
    let db = Database::open_in_memory().unwrap();
    let batch = db.insert_import_batch("/card").unwrap();
    db.connection()
        .execute_batch(&schema::staging_table_sql(&batch.table_name))
        .unwrap();
    db.upsert_staged_file(&batch.table_name, "/card", "a.jpg", true)
        .unwrap();
    let result = db.connection().execute(
        &format!("UPDATE \"{}\" SET match_type = 6", batch.table_name),
        [],
    );
    assert!(result.is_err());
}

#[test]
fn test_duplicate_registry_keeps_key_order() {
    let db = Database::open_in_memory().unwrap();
    db.insert_duplicate_cluster("hash", &[9, 3, 5]).unwrap();
    db.insert_duplicate_cluster("day", &[1, 2]).unwrap();

    let clusters = db.duplicate_clusters().unwrap();
    assert_eq!(clusters.len(), 2);
    assert_eq!(clusters[0].matched_keys, vec![9, 3, 5]);
    assert_eq!(clusters[1].match_type, "day");

    assert_eq!(db.delete_duplicate_cluster(clusters[0].key).unwrap(), 1);
    assert_eq!(db.duplicate_count().unwrap(), 1);
    assert_eq!(db.clear_duplicates().unwrap(), 1);
}

#[test]
fn test_match_type_codes_and_labels() {
    for match_type in MatchType::ALL {
        assert_eq!(MatchType::from_code(match_type.code()), Some(match_type));
        assert_eq!(MatchType::parse(match_type.label()), Some(match_type));
    }
    assert_eq!(MatchType::parse("3"), Some(MatchType::BinaryMatchTrash));
    assert_eq!(MatchType::parse("binary_match_images"), Some(MatchType::BinaryMatchImages));
    assert_eq!(MatchType::from_code(6), None);
    assert!(MatchType::HashMatchReplaced.points_at_replaced());
    assert!(!MatchType::HashMatchTrash.points_at_replaced());
}

#[test]
fn test_entry_states() {
    assert_eq!(EntryState::from_flags(true, false), EntryState::Active);
    assert_eq!(EntryState::from_flags(true, true), EntryState::SoftDeleted);
    assert_eq!(EntryState::from_flags(false, true), EntryState::HardDeleted);
    assert_eq!(EntryState::from_flags(false, false), EntryState::Anomalous);
}
