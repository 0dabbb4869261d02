use super::*;

fn sample_record(key: &str, embedding: Vec<f32>, op: OpType, sequence: i64) -> DataRecord {
    DataRecord {
        op,
        sequence,
        timestamp: 1_700_000_000_000,
        key: key.to_string(),
        dimension: embedding.len() as u32,
        embedding,
    }
}

#[test]
fn header_round_trip() {
    let buf = serialize_header(384);
    let header = deserialize_header(&buf).unwrap();
    assert_eq!(header.version, DATA_RECORD_VERSION);
    assert_eq!(header.dimension, 384);
    assert_eq!(&buf[0..4], b"EMBD");
}

#[test]
fn header_rejects_bad_magic() {
    let mut buf = serialize_header(4);
    buf[0] = b'X';
    assert_eq!(deserialize_header(&buf), Err(CodecError::BadMagic));
}

#[test]
fn header_rejects_short_buffer() {
    let buf = serialize_header(4);
    assert!(matches!(
        deserialize_header(&buf[..10]),
        Err(CodecError::ShortBuffer { .. })
    ));
}

#[test]
fn data_record_round_trip() {
    let rec = sample_record("a", vec![0.25, -0.5, 1.0, 0.0], OpType::Insert, 1);
    let bytes = serialize_data_record(&rec);
    let (decoded, consumed) = deserialize_data_record(&bytes, 0).unwrap();
    assert_eq!(consumed, bytes.len());
    assert_eq!(decoded, rec);
}

#[test]
fn data_record_empty_key_round_trip() {
    let rec = sample_record("", vec![1.0], OpType::Delete, 3);
    let bytes = serialize_data_record(&rec);
    let (decoded, _) = deserialize_data_record(&bytes, 0).unwrap();
    assert_eq!(decoded.key, "");
    assert_eq!(decoded.op, OpType::Delete);
}

#[test]
fn data_record_at_nonzero_offset() {
    let rec = sample_record("k", vec![1.0, 2.0], OpType::Update, 2);
    let bytes = serialize_data_record(&rec);
    let mut padded = vec![0u8; 7];
    padded.extend_from_slice(&bytes);
    let (decoded, consumed) = deserialize_data_record(&padded, 7).unwrap();
    assert_eq!(decoded, rec);
    assert_eq!(consumed, bytes.len());
}

#[test]
fn data_record_bit_flip_detected() {
    let rec = sample_record("a", vec![0.25, -0.5, 1.0, 0.0], OpType::Insert, 1);
    let mut bytes = serialize_data_record(&rec);
    // Flip a bit inside the embedding payload, well past the magic bytes.
    let idx = bytes.len() - 10;
    bytes[idx] ^= 0x01;
    assert_eq!(
        deserialize_data_record(&bytes, 0),
        Err(CodecError::InvalidRecord)
    );
}

#[test]
fn data_record_bad_trailer_detected() {
    let rec = sample_record("a", vec![1.0], OpType::Insert, 1);
    let mut bytes = serialize_data_record(&rec);
    let last = bytes.len() - 1;
    bytes[last] ^= 0xFF;
    assert_eq!(
        deserialize_data_record(&bytes, 0),
        Err(CodecError::InvalidRecord)
    );
}

#[test]
fn data_record_special_floats_round_trip() {
    let values = vec![
        0.0,
        -0.0,
        f32::MAX,
        -f32::MAX,
        f32::MIN_POSITIVE,
        -f32::MIN_POSITIVE,
        f32::INFINITY,
        f32::NEG_INFINITY,
        f32::NAN,
    ];
    let rec = sample_record("floats", values.clone(), OpType::Insert, 1);
    let bytes = serialize_data_record(&rec);
    let (decoded, _) = deserialize_data_record(&bytes, 0).unwrap();
    for (a, b) in decoded.embedding.iter().zip(values.iter()) {
        if b.is_nan() {
            assert!(a.is_nan());
        } else {
            assert_eq!(a, b);
        }
    }
}

#[test]
fn data_record_subnormal_floats_round_trip() {
    // f32::MIN_POSITIVE is the smallest *normal* float; subnormals sit below
    // it and must round-trip bit-for-bit like any other value.
    let smallest_subnormal = f32::from_bits(1);
    let largest_subnormal = f32::from_bits(0x007F_FFFF);
    assert!(smallest_subnormal.is_subnormal());
    assert!(largest_subnormal.is_subnormal());

    let values = vec![smallest_subnormal, -smallest_subnormal, largest_subnormal, -largest_subnormal];
    let rec = sample_record("subnormals", values.clone(), OpType::Insert, 1);
    let bytes = serialize_data_record(&rec);
    let (decoded, _) = deserialize_data_record(&bytes, 0).unwrap();
    assert_eq!(decoded.embedding, values);
}

#[test]
fn read_key_from_buffer_matches_full_decode() {
    let rec = sample_record("hello-key", vec![1.0; 8], OpType::Insert, 5);
    let bytes = serialize_data_record(&rec);
    assert_eq!(read_key_from_buffer(&bytes, 0).as_deref(), Some("hello-key"));
}

#[test]
fn read_key_from_buffer_rejects_bad_magic() {
    let mut bytes = serialize_data_record(&sample_record("k", vec![1.0], OpType::Insert, 1));
    bytes[0] = 0;
    assert_eq!(read_key_from_buffer(&bytes, 0), None);
}

#[test]
fn wal_entry_round_trip() {
    let entry = WalEntry {
        op: OpType::Update,
        sequence: 42,
        offset: 1024,
        length: 256,
        key_hash: hash_key("some-key"),
    };
    let bytes = serialize_wal_entry(&entry);
    assert_eq!(bytes.len(), WAL_ENTRY_SIZE);
    let decoded = deserialize_wal_entry(&bytes).unwrap();
    assert_eq!(decoded, entry);
}

#[test]
fn wal_entry_bit_flip_detected() {
    let entry = WalEntry {
        op: OpType::Delete,
        sequence: 1,
        offset: 16,
        length: 64,
        key_hash: 0xDEAD_BEEF_CAFE_BABE,
    };
    let mut bytes = serialize_wal_entry(&entry);
    bytes[20] ^= 0x01;
    assert_eq!(deserialize_wal_entry(&bytes), Err(CodecError::InvalidRecord));
}

#[test]
fn hash_key_fnv1a_known_vector() {
    // FNV-1a 64 of the empty string is the offset basis itself.
    assert_eq!(hash_key(""), 0xCBF2_9CE4_8422_2325);
}

#[test]
fn hash_key_distinguishes_keys() {
    assert_ne!(hash_key("a"), hash_key("b"));
}
