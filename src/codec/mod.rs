//! Binary codec
//!
//! Pure, allocation-minimal, side-effect free encode/decode functions for the three
//! on-disk layouts this crate defines: the data file header, a variable-length
//! [`DataRecord`], and the fixed 48-byte [`WalEntry`]. Every multi-byte numeric field
//! is little-endian except the data-file magic, which is stored as the literal ASCII
//! bytes `EMBD`.
//!
//! CRC32 uses the zlib/IEEE parameters (poly `0xEDB88320`, init/final XOR
//! `0xFFFFFFFF`) via [`crc32fast`] — this module owns the byte layout, not the
//! checksum algorithm.

#[cfg(test)]
mod tests;

use thiserror::Error;

/// ASCII `EMBD`, stored as the literal byte sequence at the start of every data file.
pub const HEADER_MAGIC: [u8; 4] = *b"EMBD";
/// Size in bytes of [`DataFileHeader`] on disk.
pub const HEADER_SIZE: usize = 16;

/// Magic value shared by [`DataRecord`] and [`WalEntry`] framing.
pub const RECORD_MAGIC: u32 = 0xCAFE_BABE;
/// Trailer value shared by [`DataRecord`] and [`WalEntry`] framing.
pub const TRAILER_MAGIC: u32 = 0xDEAD_BEEF;

/// Current data-record format version.
pub const DATA_RECORD_VERSION: u16 = 2;
/// Legacy (pre-migration) data-file version.
pub const LEGACY_VERSION: u16 = 1;
/// WAL entry format version.
pub const WAL_ENTRY_VERSION: u16 = 1;

/// Exact on-disk size of a [`WalEntry`].
pub const WAL_ENTRY_SIZE: usize = 48;

/// Fixed prefix of a `DataRecord` up to and including `keyLen`, before the
/// variable-length key bytes begin.
const DATA_RECORD_FIXED_PREFIX: usize = 4 + 2 + 1 + 1 + 8 + 8 + 2; // = 26

/// Errors produced while encoding or decoding on-disk structures.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CodecError {
    /// The header magic did not match `EMBD`.
    #[error("bad header magic")]
    BadMagic,
    /// A record's magic, version, checksum, or trailer failed validation.
    #[error("invalid record")]
    InvalidRecord,
    /// The supplied buffer was shorter than the structure being decoded.
    #[error("short buffer: need {needed} bytes, have {available}")]
    ShortBuffer {
        /// Bytes required to continue decoding.
        needed: usize,
        /// Bytes actually available.
        available: usize,
    },
}

fn require(buf: &[u8], needed: usize) -> Result<(), CodecError> {
    if buf.len() < needed {
        Err(CodecError::ShortBuffer {
            needed,
            available: buf.len(),
        })
    } else {
        Ok(())
    }
}

fn crc32(parts: &[&[u8]]) -> u32 {
    let mut hasher = crc32fast::Hasher::new();
    for part in parts {
        hasher.update(part);
    }
    hasher.finalize()
}

/// FNV-1a 64: offset basis `0xCBF29CE484222325`, prime `0x100000001B3`, applied per
/// UTF-8 byte of `key` with 64-bit wrap-around.
pub fn hash_key(key: &str) -> u64 {
    const OFFSET_BASIS: u64 = 0xCBF2_9CE4_8422_2325;
    const PRIME: u64 = 0x0000_0100_0000_01B3;
    let mut hash = OFFSET_BASIS;
    for byte in key.as_bytes() {
        hash ^= u64::from(*byte);
        hash = hash.wrapping_mul(PRIME);
    }
    hash
}

/// Operation type carried by every [`DataRecord`] and [`WalEntry`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpType {
    /// First write of a key.
    Insert,
    /// Overwrite of an existing key.
    Update,
    /// Tombstone: the key's last committed operation was a delete.
    Delete,
}

impl OpType {
    fn to_u8(self) -> u8 {
        match self {
            OpType::Insert => 0,
            OpType::Update => 1,
            OpType::Delete => 2,
        }
    }

    fn from_u8(byte: u8) -> Result<Self, CodecError> {
        match byte {
            0 => Ok(OpType::Insert),
            1 => Ok(OpType::Update),
            2 => Ok(OpType::Delete),
            _ => Err(CodecError::InvalidRecord),
        }
    }
}

/// The 16-byte structure that starts every data file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DataFileHeader {
    /// `1` = legacy, `2` = current.
    pub version: u16,
    /// Fixed embedding dimension D ≥ 1 for every record in this database.
    pub dimension: u32,
}

/// Serialize a v2 [`DataFileHeader`] with the given dimension.
pub fn serialize_header(dimension: u32) -> [u8; HEADER_SIZE] {
    let mut buf = [0u8; HEADER_SIZE];
    buf[0..4].copy_from_slice(&HEADER_MAGIC);
    buf[4..6].copy_from_slice(&DATA_RECORD_VERSION.to_le_bytes());
    buf[6..10].copy_from_slice(&dimension.to_le_bytes());
    // bytes 10..16 stay zero (reserved)
    buf
}

/// Decode a [`DataFileHeader`] from the first 16 bytes of `buf`.
pub fn deserialize_header(buf: &[u8]) -> Result<DataFileHeader, CodecError> {
    require(buf, HEADER_SIZE)?;
    if buf[0..4] != HEADER_MAGIC {
        return Err(CodecError::BadMagic);
    }
    let version = u16::from_le_bytes([buf[4], buf[5]]);
    let dimension = u32::from_le_bytes([buf[6], buf[7], buf[8], buf[9]]);
    Ok(DataFileHeader { version, dimension })
}

/// A single variable-length record appended to the data file.
#[derive(Debug, Clone, PartialEq)]
pub struct DataRecord {
    /// Whether this record inserts, updates, or deletes `key`.
    pub op: OpType,
    /// Monotonically increasing sequence number assigned at write time.
    pub sequence: i64,
    /// Unix milliseconds at write time.
    pub timestamp: i64,
    /// The record's key.
    pub key: String,
    /// Embedding dimension; must equal the data file header's dimension.
    pub dimension: u32,
    /// The embedding payload (a zero vector for deletes).
    pub embedding: Vec<f32>,
}

/// Serialize a [`DataRecord`], computing the CRC32 over every preceding byte.
pub fn serialize_data_record(rec: &DataRecord) -> Vec<u8> {
    let key_bytes = rec.key.as_bytes();
    let mut buf = Vec::with_capacity(DATA_RECORD_FIXED_PREFIX + key_bytes.len() + 4 + rec.embedding.len() * 4 + 8);

    buf.extend_from_slice(&RECORD_MAGIC.to_le_bytes());
    buf.extend_from_slice(&DATA_RECORD_VERSION.to_le_bytes());
    buf.push(rec.op.to_u8());
    buf.push(0); // flags
    buf.extend_from_slice(&rec.sequence.to_le_bytes());
    buf.extend_from_slice(&rec.timestamp.to_le_bytes());
    buf.extend_from_slice(&(key_bytes.len() as u16).to_le_bytes());
    buf.extend_from_slice(key_bytes);
    buf.extend_from_slice(&rec.dimension.to_le_bytes());
    for sample in &rec.embedding {
        buf.extend_from_slice(&sample.to_le_bytes());
    }

    let checksum = crc32(&[&buf]);
    buf.extend_from_slice(&checksum.to_le_bytes());
    buf.extend_from_slice(&TRAILER_MAGIC.to_le_bytes());
    buf
}

/// Decode a [`DataRecord`] starting at `start_offset` within `buf`.
///
/// Failure is total: bad magic, wrong version, a short buffer, a checksum mismatch,
/// or a bad trailer all return [`CodecError::InvalidRecord`] (except genuinely short
/// reads against a truncated buffer, which return [`CodecError::ShortBuffer`] so
/// callers can distinguish "not enough bytes were read" from "the bytes are wrong").
pub fn deserialize_data_record(
    buf: &[u8],
    start_offset: usize,
) -> Result<(DataRecord, usize), CodecError> {
    let buf = buf.get(start_offset..).ok_or(CodecError::ShortBuffer {
        needed: start_offset,
        available: buf.len(),
    })?;
    require(buf, DATA_RECORD_FIXED_PREFIX)?;

    let magic = u32::from_le_bytes(buf[0..4].try_into().map_err(|_| CodecError::InvalidRecord)?);
    if magic != RECORD_MAGIC {
        return Err(CodecError::InvalidRecord);
    }
    let version = u16::from_le_bytes([buf[4], buf[5]]);
    if version != DATA_RECORD_VERSION {
        return Err(CodecError::InvalidRecord);
    }
    let op = OpType::from_u8(buf[6])?;
    // buf[7] flags, ignored
    let sequence = i64::from_le_bytes(buf[8..16].try_into().map_err(|_| CodecError::InvalidRecord)?);
    let timestamp = i64::from_le_bytes(buf[16..24].try_into().map_err(|_| CodecError::InvalidRecord)?);
    let key_len = u16::from_le_bytes([buf[24], buf[25]]) as usize;

    let after_key = DATA_RECORD_FIXED_PREFIX + key_len;
    require(buf, after_key + 4)?;
    let key = std::str::from_utf8(&buf[DATA_RECORD_FIXED_PREFIX..after_key])
        .map_err(|_| CodecError::InvalidRecord)?
        .to_string();

    let dimension = u32::from_le_bytes(
        buf[after_key..after_key + 4]
            .try_into()
            .map_err(|_| CodecError::InvalidRecord)?,
    );

    let embedding_start = after_key + 4;
    let embedding_bytes = dimension as usize * 4;
    let prefix_len = embedding_start + embedding_bytes;
    require(buf, prefix_len + 4 + 4)?;

    let mut embedding = Vec::with_capacity(dimension as usize);
    for i in 0..dimension as usize {
        let off = embedding_start + i * 4;
        let sample = f32::from_le_bytes(
            buf[off..off + 4]
                .try_into()
                .map_err(|_| CodecError::InvalidRecord)?,
        );
        embedding.push(sample);
    }

    let stored_checksum = u32::from_le_bytes(
        buf[prefix_len..prefix_len + 4]
            .try_into()
            .map_err(|_| CodecError::InvalidRecord)?,
    );
    let computed_checksum = crc32(&[&buf[..prefix_len]]);
    if stored_checksum != computed_checksum {
        return Err(CodecError::InvalidRecord);
    }

    let trailer = u32::from_le_bytes(
        buf[prefix_len + 4..prefix_len + 8]
            .try_into()
            .map_err(|_| CodecError::InvalidRecord)?,
    );
    if trailer != TRAILER_MAGIC {
        return Err(CodecError::InvalidRecord);
    }

    Ok((
        DataRecord {
            op,
            sequence,
            timestamp,
            key,
            dimension,
            embedding,
        },
        prefix_len + 8,
    ))
}

/// Extract just the key from a `DataRecord` at `start_offset`, without materializing
/// the embedding. Used by recovery, which only needs the key to rebuild the index.
pub fn read_key_from_buffer(buf: &[u8], start_offset: usize) -> Option<String> {
    let buf = buf.get(start_offset..)?;
    if buf.len() < DATA_RECORD_FIXED_PREFIX {
        return None;
    }
    let magic = u32::from_le_bytes(buf[0..4].try_into().ok()?);
    if magic != RECORD_MAGIC {
        return None;
    }
    let key_len = u16::from_le_bytes([buf[24], buf[25]]) as usize;
    let key_bytes = buf.get(DATA_RECORD_FIXED_PREFIX..DATA_RECORD_FIXED_PREFIX + key_len)?;
    std::str::from_utf8(key_bytes).ok().map(str::to_string)
}

/// A single 48-byte write-ahead-log commit record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WalEntry {
    /// Whether the referenced data record inserts, updates, or deletes a key.
    pub op: OpType,
    /// Sequence number, matching the referenced `DataRecord::sequence`.
    pub sequence: i64,
    /// Byte offset of the data record within the data file.
    pub offset: u64,
    /// Length in bytes of the data record.
    pub length: u32,
    /// Low 8 bytes of the FNV-1a 64 hash of the record's key.
    pub key_hash: u64,
}

/// Serialize a [`WalEntry`] into its fixed 48-byte layout.
pub fn serialize_wal_entry(entry: &WalEntry) -> [u8; WAL_ENTRY_SIZE] {
    let mut buf = [0u8; WAL_ENTRY_SIZE];
    buf[0..4].copy_from_slice(&RECORD_MAGIC.to_le_bytes());
    buf[4..6].copy_from_slice(&WAL_ENTRY_VERSION.to_le_bytes());
    buf[6] = entry.op.to_u8();
    buf[7] = 0; // flags
    buf[8..16].copy_from_slice(&entry.sequence.to_le_bytes());
    buf[16..24].copy_from_slice(&entry.offset.to_le_bytes());
    buf[24..28].copy_from_slice(&entry.length.to_le_bytes());
    buf[28..36].copy_from_slice(&entry.key_hash.to_le_bytes());
    // bytes 36..40 reserved, stay zero
    let checksum = crc32(&[&buf[0..40]]);
    buf[40..44].copy_from_slice(&checksum.to_le_bytes());
    buf[44..48].copy_from_slice(&TRAILER_MAGIC.to_le_bytes());
    buf
}

/// Decode a [`WalEntry`] from an exactly-48-byte slice.
pub fn deserialize_wal_entry(buf: &[u8]) -> Result<WalEntry, CodecError> {
    require(buf, WAL_ENTRY_SIZE)?;
    let magic = u32::from_le_bytes(buf[0..4].try_into().map_err(|_| CodecError::InvalidRecord)?);
    if magic != RECORD_MAGIC {
        return Err(CodecError::InvalidRecord);
    }
    let version = u16::from_le_bytes([buf[4], buf[5]]);
    if version != WAL_ENTRY_VERSION {
        return Err(CodecError::InvalidRecord);
    }
    let op = OpType::from_u8(buf[6])?;
    let sequence = i64::from_le_bytes(buf[8..16].try_into().map_err(|_| CodecError::InvalidRecord)?);
    let offset = u64::from_le_bytes(buf[16..24].try_into().map_err(|_| CodecError::InvalidRecord)?);
    let length = u32::from_le_bytes(buf[24..28].try_into().map_err(|_| CodecError::InvalidRecord)?);
    let key_hash = u64::from_le_bytes(buf[28..36].try_into().map_err(|_| CodecError::InvalidRecord)?);

    let stored_checksum = u32::from_le_bytes(buf[40..44].try_into().map_err(|_| CodecError::InvalidRecord)?);
    let computed_checksum = crc32(&[&buf[0..40]]);
    if stored_checksum != computed_checksum {
        return Err(CodecError::InvalidRecord);
    }

    let trailer = u32::from_le_bytes(buf[44..48].try_into().map_err(|_| CodecError::InvalidRecord)?);
    if trailer != TRAILER_MAGIC {
        return Err(CodecError::InvalidRecord);
    }

    Ok(WalEntry {
        op,
        sequence,
        offset,
        length,
        key_hash,
    })
}
