//! Binary codec for store files.
//!
//! Both binary files start with a short header:
//! ```text
//! [magic: 4 bytes][version: 1 byte]
//! ```
//! The index file follows it with `[nrecords: 8 bytes LE]` and one fixed-size
//! entry per record slot:
//! ```text
//! [offset: u64][nbytes: u32][nsamples: u32][kind: u8][pad: 3][crc32: u32]   (24 bytes, LE)
//! ```
//! The traces file holds concatenated payloads:
//! ```text
//! waveform: [itmin: i32][nsamples: u32][samples: nsamples x f32]
//! static:   [value: f32]
//! ```
//! Empty and zero records have no payload.

use std::io::{Error as IoError, ErrorKind, Read, Result as IoResult, Write};

use crc32fast::Hasher;

use crate::record::Record;

/// Current on-disk format version.
pub const FORMAT_VERSION: u8 = 1;

/// Magic bytes of the index file.
pub const INDEX_MAGIC: [u8; 4] = *b"GFIX";

/// Magic bytes of the traces file.
pub const TRACES_MAGIC: [u8; 4] = *b"GFTR";

/// Size of the common file header.
pub const HEADER_SIZE: u64 = 5;

/// Size of the index header (common header plus record count).
pub const INDEX_HEADER_SIZE: u64 = HEADER_SIZE + 8;

/// Size of one index entry.
pub const INDEX_ENTRY_SIZE: usize = 24;

const WAVEFORM_PREFIX: u64 = 8;
const SAMPLE_SIZE: u64 = 4;

/// Storage kind of a record slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(u8)]
pub enum RecordKind {
    /// Not populated (sparse).
    #[default]
    Empty = 0,
    /// Populated, all samples zero.
    Zero = 1,
    /// Time series payload.
    Waveform = 2,
    /// Single scalar payload.
    Static = 3,
}

impl TryFrom<u8> for RecordKind {
    type Error = IoError;

    fn try_from(value: u8) -> IoResult<Self> {
        match value {
            0 => Ok(Self::Empty),
            1 => Ok(Self::Zero),
            2 => Ok(Self::Waveform),
            3 => Ok(Self::Static),
            other => Err(invalid_data(format!("unknown record kind tag {other}"))),
        }
    }
}

/// One index slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct IndexEntry {
    /// Byte offset of the payload in the traces file.
    pub offset: u64,
    /// Payload length in bytes.
    pub nbytes: u32,
    /// Sample count (1 for static records).
    pub nsamples: u32,
    /// Storage kind.
    pub kind: RecordKind,
    /// CRC32 of the payload.
    pub crc: u32,
}

impl IndexEntry {
    /// The unpopulated slot.
    pub const EMPTY: Self = Self {
        offset: 0,
        nbytes: 0,
        nsamples: 0,
        kind: RecordKind::Empty,
        crc: 0,
    };

    /// Serializes the entry.
    #[must_use]
    pub fn encode(&self) -> [u8; INDEX_ENTRY_SIZE] {
        let mut out = [0u8; INDEX_ENTRY_SIZE];
        out[0..8].copy_from_slice(&self.offset.to_le_bytes());
        out[8..12].copy_from_slice(&self.nbytes.to_le_bytes());
        out[12..16].copy_from_slice(&self.nsamples.to_le_bytes());
        out[16] = self.kind as u8;
        out[20..24].copy_from_slice(&self.crc.to_le_bytes());
        out
    }

    /// Deserializes an entry, checking that its fields are self-consistent.
    pub fn decode(bytes: &[u8; INDEX_ENTRY_SIZE]) -> IoResult<Self> {
        let entry = Self {
            offset: u64::from_le_bytes(take(bytes, 0)),
            nbytes: u32::from_le_bytes(take(bytes, 8)),
            nsamples: u32::from_le_bytes(take(bytes, 12)),
            kind: RecordKind::try_from(bytes[16])?,
            crc: u32::from_le_bytes(take(bytes, 20)),
        };
        let expected = payload_len(entry.kind, entry.nsamples);
        if u64::from(entry.nbytes) != expected {
            return Err(invalid_data(format!(
                "index entry declares {} bytes for {:?} with {} samples (expected {expected})",
                entry.nbytes, entry.kind, entry.nsamples
            )));
        }
        Ok(entry)
    }

    /// Whether the slot holds a record.
    #[must_use]
    pub fn is_populated(&self) -> bool {
        self.kind != RecordKind::Empty
    }

    /// End of the payload in the traces file.
    #[must_use]
    pub fn end(&self) -> u64 {
        self.offset + u64::from(self.nbytes)
    }
}

fn take<const N: usize>(bytes: &[u8], at: usize) -> [u8; N] {
    let mut out = [0u8; N];
    out.copy_from_slice(&bytes[at..at + N]);
    out
}

/// Expected payload length for a kind and sample count.
#[must_use]
pub fn payload_len(kind: RecordKind, nsamples: u32) -> u64 {
    match kind {
        RecordKind::Empty | RecordKind::Zero => 0,
        RecordKind::Waveform => WAVEFORM_PREFIX + SAMPLE_SIZE * u64::from(nsamples),
        RecordKind::Static => SAMPLE_SIZE,
    }
}

/// An encoded record ready to be appended to the traces file.
#[derive(Debug, Clone)]
pub struct EncodedRecord {
    /// Storage kind.
    pub kind: RecordKind,
    /// Sample count.
    pub nsamples: u32,
    /// Payload bytes.
    pub payload: Vec<u8>,
    /// CRC32 of the payload.
    pub crc: u32,
}

/// Serializes a record payload.
pub fn encode_record(record: &Record) -> IoResult<EncodedRecord> {
    let (kind, nsamples, payload) = match record {
        Record::Zero => (RecordKind::Zero, 0, Vec::new()),
        Record::Static { value } => (RecordKind::Static, 1, value.to_le_bytes().to_vec()),
        Record::Waveform { itmin, samples } => {
            let nsamples = u32::try_from(samples.len()).map_err(|_| {
                IoError::new(
                    ErrorKind::InvalidInput,
                    format!("waveform with {} samples is too long", samples.len()),
                )
            })?;
            let mut payload =
                Vec::with_capacity(payload_len(RecordKind::Waveform, nsamples) as usize);
            payload.extend_from_slice(&itmin.to_le_bytes());
            payload.extend_from_slice(&nsamples.to_le_bytes());
            for sample in samples {
                payload.extend_from_slice(&sample.to_le_bytes());
            }
            (RecordKind::Waveform, nsamples, payload)
        }
    };

    Ok(EncodedRecord {
        kind,
        nsamples,
        crc: checksum(&payload),
        payload,
    })
}

/// Deserializes a payload described by `entry`, verifying length and checksum.
pub fn decode_record(entry: &IndexEntry, payload: &[u8]) -> IoResult<Record> {
    if u64::from(entry.nbytes) != payload_len(entry.kind, entry.nsamples) {
        return Err(invalid_data(format!(
            "index extent {} inconsistent with {:?} of {} samples",
            entry.nbytes, entry.kind, entry.nsamples
        )));
    }
    if payload.len() as u64 != u64::from(entry.nbytes) {
        return Err(invalid_data(format!(
            "payload length {} does not match index extent {}",
            payload.len(),
            entry.nbytes
        )));
    }

    let computed = checksum(payload);
    if computed != entry.crc {
        return Err(invalid_data(format!(
            "CRC mismatch: stored={:08x}, computed={computed:08x} (data corrupted)",
            entry.crc
        )));
    }

    match entry.kind {
        RecordKind::Empty => Err(invalid_data("cannot decode an empty slot".to_string())),
        RecordKind::Zero => Ok(Record::Zero),
        RecordKind::Static => Ok(Record::Static {
            value: f32::from_le_bytes(take(payload, 0)),
        }),
        RecordKind::Waveform => {
            let itmin = i32::from_le_bytes(take(payload, 0));
            let nsamples = u32::from_le_bytes(take(payload, 4));
            if nsamples != entry.nsamples {
                return Err(invalid_data(format!(
                    "payload declares {nsamples} samples, index declares {}",
                    entry.nsamples
                )));
            }
            let samples = payload[WAVEFORM_PREFIX as usize..]
                .chunks_exact(SAMPLE_SIZE as usize)
                .map(|chunk| f32::from_le_bytes(take(chunk, 0)))
                .collect();
            Ok(Record::Waveform { itmin, samples })
        }
    }
}

fn checksum(data: &[u8]) -> u32 {
    let mut hasher = Hasher::new();
    hasher.update(data);
    hasher.finalize()
}

fn invalid_data(message: String) -> IoError {
    IoError::new(ErrorKind::InvalidData, message)
}

/// Write a file header (magic + version).
pub fn write_header(writer: &mut impl Write, magic: [u8; 4]) -> IoResult<()> {
    writer.write_all(&magic)?;
    writer.write_all(&[FORMAT_VERSION])?;
    Ok(())
}

/// Read and validate a file header, returning the format version.
pub fn read_header(reader: &mut impl Read, magic: [u8; 4]) -> IoResult<u8> {
    let mut found = [0u8; 4];
    reader.read_exact(&mut found)?;

    if found != magic {
        return Err(invalid_data(format!(
            "invalid magic bytes: expected {magic:?}, got {found:?}"
        )));
    }

    let mut version = [0u8; 1];
    reader.read_exact(&mut version)?;
    if version[0] != FORMAT_VERSION {
        return Err(invalid_data(format!(
            "unsupported format version: {} (expected {FORMAT_VERSION})",
            version[0]
        )));
    }

    Ok(version[0])
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn entry_for(encoded: &EncodedRecord, offset: u64) -> IndexEntry {
        IndexEntry {
            offset,
            nbytes: encoded.payload.len() as u32,
            nsamples: encoded.nsamples,
            kind: encoded.kind,
            crc: encoded.crc,
        }
    }

    #[test]
    fn test_waveform_payload_roundtrip() {
        let record = Record::waveform(-3, vec![0.5, -1.25, 3.0e-7, f32::MAX]);
        let encoded = encode_record(&record).unwrap();
        assert_eq!(encoded.kind, RecordKind::Waveform);
        assert_eq!(encoded.payload.len(), 8 + 16);

        let entry = entry_for(&encoded, 5);
        assert_eq!(decode_record(&entry, &encoded.payload).unwrap(), record);
    }

    #[test]
    fn test_static_and_zero_payloads() {
        let encoded = encode_record(&Record::static_value(-7.5)).unwrap();
        assert_eq!(encoded.payload.len(), 4);
        let entry = entry_for(&encoded, 5);
        assert_eq!(
            decode_record(&entry, &encoded.payload).unwrap(),
            Record::static_value(-7.5)
        );

        let encoded = encode_record(&Record::Zero).unwrap();
        assert!(encoded.payload.is_empty());
        let entry = entry_for(&encoded, 0);
        assert_eq!(decode_record(&entry, &[]).unwrap(), Record::Zero);
    }

    #[test]
    fn test_detects_corruption() {
        let encoded = encode_record(&Record::waveform(0, vec![1.0, 2.0, 3.0])).unwrap();
        let entry = entry_for(&encoded, 5);

        let mut corrupted = encoded.payload.clone();
        corrupted[10] ^= 0xFF;
        let err = decode_record(&entry, &corrupted).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidData);
        assert!(err.to_string().contains("CRC"));

        let err = decode_record(&entry, &encoded.payload[..8]).unwrap_err();
        assert!(err.to_string().contains("does not match index extent"));
    }

    #[test]
    fn test_index_entry_roundtrip() {
        let entry = IndexEntry {
            offset: 1 << 40,
            nbytes: 8 + 4 * 100,
            nsamples: 100,
            kind: RecordKind::Waveform,
            crc: 0xDEAD_BEEF,
        };
        let bytes = entry.encode();
        assert_eq!(IndexEntry::decode(&bytes).unwrap(), entry);
        assert_eq!(IndexEntry::decode(&IndexEntry::EMPTY.encode()).unwrap(), IndexEntry::EMPTY);
    }

    #[test]
    fn test_index_entry_rejects_inconsistent_extent() {
        let mut bytes = IndexEntry {
            offset: 5,
            nbytes: 12,
            nsamples: 1,
            kind: RecordKind::Waveform,
            crc: 0,
        }
        .encode();
        assert!(IndexEntry::decode(&bytes).is_ok());

        bytes[8] = 13;
        assert!(IndexEntry::decode(&bytes).is_err());

        bytes[8] = 12;
        bytes[16] = 9;
        assert!(IndexEntry::decode(&bytes).is_err());
    }

    #[test]
    fn test_header_roundtrip() {
        let mut buf = Vec::new();
        write_header(&mut buf, TRACES_MAGIC).unwrap();
        assert_eq!(buf.len() as u64, HEADER_SIZE);

        let version = read_header(&mut Cursor::new(&buf), TRACES_MAGIC).unwrap();
        assert_eq!(version, FORMAT_VERSION);

        let err = read_header(&mut Cursor::new(&buf), INDEX_MAGIC).unwrap_err();
        assert!(err.to_string().contains("invalid magic"));
    }
}
