use super::*;
use crate::codec::serialize_header;

fn write_v1_record(buf: &mut Vec<u8>, key: &str, embedding: &[f32]) {
    let key_bytes = key.as_bytes();
    let start = buf.len();
    buf.extend_from_slice(&(key_bytes.len() as u16).to_le_bytes());
    buf.extend_from_slice(key_bytes);
    for sample in embedding {
        buf.extend_from_slice(&sample.to_le_bytes());
    }
    let record_len = (buf.len() - start + 4) as u32;
    buf.extend_from_slice(&record_len.to_le_bytes());
}

fn build_v1_file(dimension: u32, records: &[(&str, Vec<f32>)]) -> Vec<u8> {
    let mut buf = serialize_header(dimension).to_vec();
    buf[4..6].copy_from_slice(&LEGACY_VERSION.to_le_bytes());
    for (key, embedding) in records {
        write_v1_record(&mut buf, key, embedding);
    }
    buf
}

#[test]
fn detect_version_reads_v1_and_v2() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("db.raptor");

    fs::write(&path, build_v1_file(2, &[("a", vec![1.0, 2.0])])).unwrap();
    assert_eq!(detect_version(&path).unwrap(), Some(1));

    fs::write(&path, serialize_header(2)).unwrap();
    assert_eq!(detect_version(&path).unwrap(), Some(2));
}

#[test]
fn detect_version_missing_file_is_none() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("missing.raptor");
    assert_eq!(detect_version(&path).unwrap(), None);
}

#[test]
fn ensure_v2_is_noop_for_v2_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("db.raptor");
    fs::write(&path, serialize_header(4)).unwrap();
    ensure_v2(&path, 4).unwrap();
    assert_eq!(detect_version(&path).unwrap(), Some(2));
}

#[test]
fn migrate_dedups_keeping_first_insertion_order_and_last_value() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("db.raptor");
    fs::write(
        &path,
        build_v1_file(
            2,
            &[
                ("a", vec![1.0, 0.0]),
                ("b", vec![0.0, 1.0]),
                ("a", vec![2.0, 0.0]),
            ],
        ),
    )
    .unwrap();

    ensure_v2(&path, 2).unwrap();

    let backup = dir.path().join("db.raptor.v1.backup");
    assert!(backup.exists());

    let base = dir.path().join("db");
    let mut options = EngineOptions::new(&base);
    options.dimension = 2;
    let engine = Engine::open(options).unwrap();
    assert_eq!(engine.count(), 2);
    let a = engine.read_record("a").unwrap();
    assert_eq!(a.embedding, vec![2.0, 0.0]);
    engine.close().unwrap();
}

#[test]
fn migrate_rejects_unsupported_version() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("db.raptor");
    let mut bytes = serialize_header(4).to_vec();
    bytes[4..6].copy_from_slice(&99u16.to_le_bytes());
    fs::write(&path, bytes).unwrap();

    let err = ensure_v2(&path, 4).unwrap_err();
    assert!(matches!(err, MigrationError::VersionUnsupported(99)));
}

#[test]
fn migrate_rejects_corrupt_record_len() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("db.raptor");
    let mut bytes = build_v1_file(2, &[("a", vec![1.0, 2.0])]);
    let last = bytes.len() - 1;
    bytes[last] = bytes[last].wrapping_add(1);
    fs::write(&path, &bytes).unwrap();

    let err = ensure_v2(&path, 2).unwrap_err();
    assert!(matches!(err, MigrationError::InvalidV1Record { .. }));
}
