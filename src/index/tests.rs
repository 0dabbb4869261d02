use super::*;
use crate::codec::{self, DataRecord, HEADER_SIZE};
use tempfile::tempdir;

fn loc(offset: u64, length: u32, sequence: i64) -> RecordLocation {
    RecordLocation { offset, length, sequence }
}

#[test]
fn new_index_is_empty() {
    let index = KeyIndex::new();
    assert_eq!(index.count(), 0);
    assert!(!index.has("a"));
    assert_eq!(index.get("a"), None);
    assert!(index.keys().is_empty());
    assert!(index.locations().is_empty());
}

#[test]
fn apply_insert_then_update_replaces_location() {
    let index = KeyIndex::new();
    index.apply("a", loc(16, 50, 1), OpType::Insert);
    assert_eq!(index.get("a"), Some(loc(16, 50, 1)));

    index.apply("a", loc(100, 60, 2), OpType::Update);
    assert_eq!(index.get("a"), Some(loc(100, 60, 2)));
    assert_eq!(index.count(), 1);
}

#[test]
fn apply_delete_removes_key() {
    let index = KeyIndex::new();
    index.apply("a", loc(16, 50, 1), OpType::Insert);
    index.apply("a", loc(200, 10, 2), OpType::Delete);
    assert!(!index.has("a"));
    assert_eq!(index.get("a"), None);
    assert_eq!(index.count(), 0);
}

#[test]
fn delete_is_unconditional_and_idempotent() {
    let index = KeyIndex::new();
    index.delete("missing");
    assert_eq!(index.count(), 0);

    index.apply("a", loc(16, 50, 1), OpType::Insert);
    index.delete("a");
    index.delete("a");
    assert!(!index.has("a"));
}

#[test]
fn keys_and_locations_reflect_live_entries_only() {
    let index = KeyIndex::new();
    index.apply("a", loc(16, 10, 1), OpType::Insert);
    index.apply("b", loc(26, 10, 2), OpType::Insert);
    index.apply("a", loc(36, 10, 3), OpType::Delete);

    let mut keys = index.keys();
    keys.sort();
    assert_eq!(keys, vec!["b".to_string()]);

    let locations = index.locations();
    assert_eq!(locations.len(), 1);
    assert_eq!(locations[0], ("b".to_string(), loc(26, 10, 2)));
}

/// Builds a data file at `path` containing `records`, returning the byte
/// offset each record was written at (in the same order as `records`).
fn write_data_file(path: &std::path::Path, dimension: u32, records: &[DataRecord]) -> Vec<u64> {
    let mut bytes = codec::serialize_header(dimension).to_vec();
    let mut offsets = Vec::with_capacity(records.len());
    for rec in records {
        offsets.push(bytes.len() as u64);
        bytes.extend_from_slice(&codec::serialize_data_record(rec));
    }
    std::fs::write(path, &bytes).unwrap();
    offsets
}

fn wal_entry_for(rec: &DataRecord, offset: u64, length: u32) -> WalEntry {
    WalEntry {
        op: rec.op,
        sequence: rec.sequence,
        offset,
        length,
        key_hash: codec::hash_key(&rec.key),
    }
}

#[test]
fn build_from_wal_with_missing_data_file_is_empty() {
    let dir = tempdir().unwrap();
    let data_path = dir.path().join("absent.raptor");
    let (index, max_sequence) = build_from_wal(&[], &data_path).unwrap();
    assert_eq!(index.count(), 0);
    assert_eq!(max_sequence, 0);
}

#[test]
fn build_from_wal_replays_insert_update_delete_in_order() {
    let dir = tempdir().unwrap();
    let data_path = dir.path().join("db.raptor");

    let insert = DataRecord {
        op: OpType::Insert,
        sequence: 1,
        timestamp: 0,
        key: "k".into(),
        dimension: 2,
        embedding: vec![1.0, 0.0],
    };
    let update = DataRecord {
        op: OpType::Update,
        sequence: 2,
        timestamp: 0,
        key: "k".into(),
        dimension: 2,
        embedding: vec![0.0, 1.0],
    };
    let other = DataRecord {
        op: OpType::Insert,
        sequence: 3,
        timestamp: 0,
        key: "other".into(),
        dimension: 2,
        embedding: vec![2.0, 2.0],
    };

    let records = vec![insert.clone(), update.clone(), other.clone()];
    let offsets = write_data_file(&data_path, 2, &records);

    let entries: Vec<WalEntry> = records
        .iter()
        .zip(&offsets)
        .map(|(rec, &offset)| wal_entry_for(rec, offset, codec::serialize_data_record(rec).len() as u32))
        .collect();

    let (index, max_sequence) = build_from_wal(&entries, &data_path).unwrap();
    assert_eq!(max_sequence, 3);
    assert_eq!(index.count(), 2);
    assert_eq!(index.get("k").unwrap().sequence, 2);
    assert!(index.has("other"));
}

#[test]
fn build_from_wal_replays_delete_removing_key() {
    let dir = tempdir().unwrap();
    let data_path = dir.path().join("db.raptor");

    let insert = DataRecord {
        op: OpType::Insert,
        sequence: 1,
        timestamp: 0,
        key: "k".into(),
        dimension: 1,
        embedding: vec![1.0],
    };
    let delete = DataRecord {
        op: OpType::Delete,
        sequence: 2,
        timestamp: 0,
        key: "k".into(),
        dimension: 1,
        embedding: vec![0.0],
    };

    let records = vec![insert.clone(), delete.clone()];
    let offsets = write_data_file(&data_path, 1, &records);
    let entries: Vec<WalEntry> = records
        .iter()
        .zip(&offsets)
        .map(|(rec, &offset)| wal_entry_for(rec, offset, codec::serialize_data_record(rec).len() as u32))
        .collect();

    let (index, max_sequence) = build_from_wal(&entries, &data_path).unwrap();
    assert_eq!(max_sequence, 2);
    assert_eq!(index.count(), 0);
    assert!(!index.has("k"));
}

#[test]
fn build_from_wal_skips_entries_pointing_past_end_of_file() {
    let dir = tempdir().unwrap();
    let data_path = dir.path().join("db.raptor");

    let insert = DataRecord {
        op: OpType::Insert,
        sequence: 1,
        timestamp: 0,
        key: "k".into(),
        dimension: 1,
        embedding: vec![1.0],
    };
    let records = vec![insert.clone()];
    let offsets = write_data_file(&data_path, 1, &records);
    let good_len = codec::serialize_data_record(&insert).len() as u32;

    let mut entries = vec![wal_entry_for(&insert, offsets[0], good_len)];
    // Points well past the end of the data file; build_from_wal must skip it
    // rather than erroring the whole recovery scan.
    entries.push(WalEntry {
        op: OpType::Insert,
        sequence: 2,
        offset: HEADER_SIZE as u64 + 10_000,
        length: good_len,
        key_hash: codec::hash_key("ghost"),
    });

    let (index, max_sequence) = build_from_wal(&entries, &data_path).unwrap();
    assert_eq!(max_sequence, 2);
    assert_eq!(index.count(), 1);
    assert!(index.has("k"));
    assert!(!index.has("ghost"));
}
