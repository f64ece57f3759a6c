mod common;

use common::{ts, Fixture, TestExtractor};
use shoebox_core::hasher::content_hash;
use shoebox_core::{
    CancellationToken, Error, ImportBatch, MatchType, SilentReporter, StagedFile, StagingOptions,
};
use std::fs;
use std::path::Path;

/// Stage and match a folder, returning its batch and its single staged row.
fn classify(fx: &Fixture, folder: &Path, extractor: &TestExtractor) -> (ImportBatch, StagedFile) {
    let batch = fx.library.create_import_batch(folder).unwrap();
    fx.library
        .prepare_import(
            &batch,
            &StagingOptions::default(),
            extractor,
            &SilentReporter,
            &CancellationToken::new(),
        )
        .unwrap();
    fx.library.match_batch(&batch, &SilentReporter).unwrap();
    let mut rows = fx.library.staged_files(&batch).unwrap();
    assert_eq!(rows.len(), 1);
    let row = rows.remove(0);
    (batch, row)
}

const SHOT: &[u8] = b"the same photo bytes";

#[test]
fn test_same_timestamp_binary_match_wins_over_hash_match() {
    let fx = Fixture::new();
    // Key 1 has a different timestamp, key 2 shares the candidate's timestamp.
    let early = fx.folder("early", &[("a.jpg", SHOT)]);
    let k1 = fx.import_all(&early, &TestExtractor::new().timestamp("a.jpg", ts(2020, 5, 5, 5, 5, 5)))[0];
    let late = fx.folder("late", &[("b.jpg", SHOT)]);
    let k2 = fx.import_all(&late, &TestExtractor::new())[0];
    assert!(k1 < k2);

    let candidate = fx.folder("candidate", &[("c.jpg", SHOT)]);
    let (_, row) = classify(&fx, &candidate, &TestExtractor::new());
    assert_eq!(row.match_type, Some(MatchType::BinaryMatchImages));
    assert_eq!(row.matched_key, Some(k2), "the timestamp rule runs before the hash rule");
    assert!(row.message.unwrap().contains("same timestamp"));
}

#[test]
fn test_live_hash_match_wins_over_trashed_match() {
    let fx = Fixture::new();
    let first = fx.folder("first", &[("a.jpg", SHOT), ("b.jpg", SHOT)]);
    let keys = fx.import_all(&first, &TestExtractor::new());
    fx.library.trash_entry(keys[0]).unwrap();

    let candidate = fx.folder("candidate", &[("c.jpg", SHOT)]);
    let extractor = TestExtractor::new().timestamp("c.jpg", ts(2023, 6, 1, 12, 0, 0));
    let (_, row) = classify(&fx, &candidate, &extractor);
    assert_eq!(row.match_type, Some(MatchType::BinaryMatchImages));
    assert_eq!(row.matched_key, Some(keys[1]));
}

#[test]
fn test_trashed_match_wins_over_replaced_match() {
    let fx = Fixture::new();
    let first = fx.folder(
        "first",
        &[("a.jpg", SHOT), ("b.jpg", SHOT), ("c.jpg", b"successor")],
    );
    let keys = fx.import_all(&first, &TestExtractor::new());
    fx.library.mark_duplicate(keys[2], keys[1], false).unwrap();
    fx.library.trash_entry(keys[0]).unwrap();

    let candidate = fx.folder("candidate", &[("d.jpg", SHOT)]);
    let extractor = TestExtractor::new().timestamp("d.jpg", ts(2023, 6, 1, 12, 0, 0));
    let (_, row) = classify(&fx, &candidate, &extractor);
    assert_eq!(row.match_type, Some(MatchType::BinaryMatchTrash));
    assert_eq!(row.matched_key, Some(keys[0]));

    // Once the trashed file is gone for good only the hash is left to go on.
    fx.library.delete_entry_file(keys[0]).unwrap();
    let candidate = fx.folder("candidate2", &[("d.jpg", SHOT)]);
    let (_, row) = classify(&fx, &candidate, &extractor);
    assert_eq!(row.match_type, Some(MatchType::HashMatchTrash));
    assert_eq!(row.matched_key, Some(keys[0]));
}

#[test]
fn test_replaced_match_with_and_without_trash_file() {
    let fx = Fixture::new();
    let first = fx.folder("first", &[("a.jpg", SHOT), ("b.jpg", b"successor")]);
    let keys = fx.import_all(&first, &TestExtractor::new());
    fx.library.mark_duplicate(keys[1], keys[0], false).unwrap();

    let candidate = fx.folder("candidate", &[("c.jpg", SHOT)]);
    let extractor = TestExtractor::new();
    let (_, row) = classify(&fx, &candidate, &extractor);
    assert_eq!(row.match_type, Some(MatchType::BinaryMatchReplaced));
    assert_eq!(row.matched_key, Some(keys[0]));

    let former = fx.library.replaced_entry(keys[0]).unwrap().unwrap().former_name;
    fs::remove_file(fx.root.join(".trash").join(former)).unwrap();
    let candidate = fx.folder("candidate2", &[("c.jpg", SHOT)]);
    let (_, row) = classify(&fx, &candidate, &extractor);
    assert_eq!(row.match_type, Some(MatchType::HashMatchReplaced));
    assert_eq!(row.matched_key, Some(keys[0]));
}

#[test]
fn test_same_timestamp_different_bytes_is_no_match() {
    let fx = Fixture::new();
    let first = fx.folder("first", &[("a.jpg", SHOT)]);
    fx.import_all(&first, &TestExtractor::new());

    let candidate = fx.folder("candidate", &[("b.jpg", b"another photo, same second")]);
    let (_, row) = classify(&fx, &candidate, &TestExtractor::new());
    assert_eq!(row.match_type, Some(MatchType::NoMatch));
    assert_eq!(row.matched_key, None);
}

#[test]
fn test_hash_match_with_different_bytes_is_fatal() {
    let fx = Fixture::new();
    let first = fx.folder("first", &[("a.jpg", b"aaaa")]);
    let key = fx.import_all(&first, &TestExtractor::new())[0];
    fx.library.trash_entry(key).unwrap();

    let candidate = fx.folder("candidate", &[("b.jpg", b"bbbb")]);
    let forged = content_hash(&first.join("a.jpg")).unwrap();
    let extractor = TestExtractor::new()
        .timestamp("b.jpg", ts(2022, 2, 2, 2, 2, 2))
        .hash("b.jpg", &forged);

    let batch = fx.library.create_import_batch(&candidate).unwrap();
    fx.library
        .prepare_import(
            &batch,
            &StagingOptions::default(),
            &extractor,
            &SilentReporter,
            &CancellationToken::new(),
        )
        .unwrap();
    let result = fx.library.match_batch(&batch, &SilentReporter);
    assert!(matches!(result, Err(Error::HashBinaryMismatch { .. })));

    let row = &fx.library.staged_files(&batch).unwrap()[0];
    assert_eq!(row.match_type, None, "no row of an aborted pass is stamped");
}

#[test]
fn test_matching_never_touches_the_library() {
    let fx = Fixture::new();
    let first = fx.folder("first", &[("a.jpg", SHOT)]);
    fx.import_all(&first, &TestExtractor::new());
    let before = fx.library.entries().unwrap();

    let candidate = fx.folder("candidate", &[("b.jpg", SHOT)]);
    classify(&fx, &candidate, &TestExtractor::new());
    assert_eq!(fx.library.entries().unwrap(), before);
    assert_eq!(fx.library.stats().unwrap().reserved_names, 1);
}
