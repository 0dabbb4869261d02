use super::*;
use crate::codec::OpType;
use tempfile::tempdir;

fn entry(sequence: i64, offset: u64, length: u32) -> WalEntry {
    WalEntry {
        op: OpType::Insert,
        sequence,
        offset,
        length,
        key_hash: codec::hash_key(&format!("k{sequence}")),
    }
}

#[test]
fn append_then_recover_round_trips() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("test.wal");
    let wal = Wal::open(&path).unwrap();
    wal.append(&entry(1, 16, 64)).unwrap();
    wal.append(&entry(2, 80, 32)).unwrap();

    let recovered = Wal::recover(&path).unwrap();
    assert_eq!(recovered, vec![entry(1, 16, 64), entry(2, 80, 32)]);
}

#[test]
fn append_batch_writes_all_entries_with_one_fsync() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("test.wal");
    let wal = Wal::open(&path).unwrap();
    let entries = vec![entry(1, 16, 10), entry(2, 26, 10), entry(3, 36, 10)];
    wal.append_batch(&entries).unwrap();

    let recovered = Wal::recover(&path).unwrap();
    assert_eq!(recovered, entries);
}

#[test]
fn recover_missing_file_is_empty() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("absent.wal");
    assert_eq!(Wal::recover(&path).unwrap(), Vec::new());
}

#[test]
fn recover_stops_at_truncated_tail() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("test.wal");
    let wal = Wal::open(&path).unwrap();
    wal.append(&entry(1, 16, 10)).unwrap();
    wal.append(&entry(2, 26, 10)).unwrap();
    wal.append(&entry(3, 36, 10)).unwrap();

    // Truncate mid-third-entry: 48 + 48 + 30 bytes survive.
    let file = OpenOptions::new().write(true).open(&path).unwrap();
    file.set_len((WAL_ENTRY_SIZE * 2 + 30) as u64).unwrap();
    drop(file);

    let recovered = Wal::recover(&path).unwrap();
    assert_eq!(recovered, vec![entry(1, 16, 10), entry(2, 26, 10)]);
}

#[test]
fn recover_stops_at_bit_flip_and_never_resumes() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("test.wal");
    let wal = Wal::open(&path).unwrap();
    wal.append(&entry(1, 16, 10)).unwrap();
    wal.append(&entry(2, 26, 10)).unwrap();
    wal.append(&entry(3, 36, 10)).unwrap();
    drop(wal);

    let mut bytes = fs::read(&path).unwrap();
    // Flip a bit inside the second entry's payload (not its magic).
    bytes[WAL_ENTRY_SIZE + 20] ^= 0x01;
    fs::write(&path, &bytes).unwrap();

    let recovered = Wal::recover(&path).unwrap();
    assert_eq!(recovered, vec![entry(1, 16, 10)]);
}

#[test]
fn empty_wal_file_recovers_nothing() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("test.wal");
    let _wal = Wal::open(&path).unwrap();
    assert_eq!(Wal::recover(&path).unwrap(), Vec::new());
}
