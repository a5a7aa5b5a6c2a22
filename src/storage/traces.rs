//! Trace data segment.
//!
//! [`TraceReader`] resolves record identifiers through the in-memory index
//! and decodes payloads with positional reads, so any number of threads can
//! read through a shared reference without locking. [`TraceWriter`] appends
//! payloads during population and keeps the index in memory until flushed.

use std::fs::{File, OpenOptions};
use std::io::{BufReader, Result as IoResult, Write};
use std::path::{Path, PathBuf};

use tracing::warn;

use crate::error::{GfError, GfResult};
use crate::record::Record;

use super::codec::{self, IndexEntry, RecordKind, HEADER_SIZE, TRACES_MAGIC};
use super::index::{self, INDEX_FILE};
use super::{segment_err, storage_err};

/// File name of the traces segment inside a store directory.
pub const TRACES_FILE: &str = "traces";

#[cfg(unix)]
fn read_exact_at(file: &File, buf: &mut [u8], offset: u64) -> IoResult<()> {
    use std::os::unix::fs::FileExt;
    file.read_exact_at(buf, offset)
}

#[cfg(windows)]
fn read_exact_at(file: &File, mut buf: &mut [u8], mut offset: u64) -> IoResult<()> {
    use std::io::{Error as IoError, ErrorKind};
    use std::os::windows::fs::FileExt;

    while !buf.is_empty() {
        match file.seek_read(buf, offset) {
            Ok(0) => {
                return Err(IoError::new(
                    ErrorKind::UnexpectedEof,
                    "short read in traces file",
                ))
            }
            Ok(n) => {
                let rest = buf;
                buf = &mut rest[n..];
                offset += n as u64;
            }
            Err(e) if e.kind() == ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
    Ok(())
}

fn entry_at(entries: &[IndexEntry], irecord: u64) -> GfResult<&IndexEntry> {
    usize::try_from(irecord)
        .ok()
        .and_then(|i| entries.get(i))
        .ok_or_else(|| {
            GfError::invalid_input(format!(
                "record {irecord} out of range (nrecords={})",
                entries.len()
            ))
        })
}

fn load_record(file: &File, entries: &[IndexEntry], irecord: u64) -> GfResult<Record> {
    let entry = entry_at(entries, irecord)?;
    match entry.kind {
        RecordKind::Empty => Err(GfError::NotFound { irecord }),
        RecordKind::Zero => Ok(Record::Zero),
        RecordKind::Waveform | RecordKind::Static => {
            let mut payload = vec![0u8; entry.nbytes as usize];
            read_exact_at(file, &mut payload, entry.offset).map_err(storage_err)?;
            codec::decode_record(entry, &payload).map_err(|e| {
                GfError::corrupt(format!("record {irecord}: {e}"))
            })
        }
    }
}

fn open_traces(path: &Path, writable: bool) -> GfResult<(File, u64)> {
    let file = OpenOptions::new()
        .read(true)
        .append(writable)
        .open(path)
        .map_err(|e| segment_err(e, TRACES_FILE))?;
    let len = file.metadata().map_err(storage_err)?.len();
    let mut reader = BufReader::new(&file);
    codec::read_header(&mut reader, TRACES_MAGIC).map_err(storage_err)?;
    Ok((file, len))
}

/// Read-only view of a populated store.
#[derive(Debug)]
pub struct TraceReader {
    file: File,
    data_len: u64,
    entries: Vec<IndexEntry>,
}

impl TraceReader {
    /// Opens the index and traces files of the store in `dir`.
    pub fn open(dir: &Path, nrecords: u64) -> GfResult<Self> {
        let entries = index::read_index(&dir.join(INDEX_FILE), nrecords)
            .map_err(|e| segment_err(e, INDEX_FILE))?;
        let (file, data_len) = open_traces(&dir.join(TRACES_FILE), false)?;
        index::check_extents(&entries, data_len).map_err(storage_err)?;
        Ok(Self {
            file,
            data_len,
            entries,
        })
    }

    /// Decodes record `irecord`.
    ///
    /// # Errors
    /// - `NotFound` if the slot is not populated
    /// - `CorruptStore` if the payload fails its length or checksum checks
    pub fn read(&self, irecord: u64) -> GfResult<Record> {
        load_record(&self.file, &self.entries, irecord)
    }

    /// Index entry of `irecord`.
    pub fn entry(&self, irecord: u64) -> GfResult<&IndexEntry> {
        entry_at(&self.entries, irecord)
    }

    /// All index entries in record order.
    #[must_use]
    pub fn entries(&self) -> &[IndexEntry] {
        &self.entries
    }

    /// Size of the traces file in bytes.
    #[must_use]
    pub const fn data_len(&self) -> u64 {
        self.data_len
    }
}

/// Single writer used while a store is editable.
#[derive(Debug)]
pub struct TraceWriter {
    dir: PathBuf,
    file: File,
    data_len: u64,
    entries: Vec<IndexEntry>,
    dirty: bool,
}

impl TraceWriter {
    /// Writes empty index and traces segments for a new store.
    pub fn create(dir: &Path, nrecords: u64) -> GfResult<Self> {
        let capacity = usize::try_from(nrecords)
            .map_err(|_| GfError::invalid_input("grid too large for this platform"))?;
        let entries = vec![IndexEntry::EMPTY; capacity];

        let mut file = OpenOptions::new()
            .read(true)
            .append(true)
            .create_new(true)
            .open(dir.join(TRACES_FILE))
            .map_err(storage_err)?;
        codec::write_header(&mut file, TRACES_MAGIC).map_err(storage_err)?;
        file.sync_all().map_err(storage_err)?;

        index::write_index(&dir.join(INDEX_FILE), &entries).map_err(storage_err)?;

        Ok(Self {
            dir: dir.to_path_buf(),
            file,
            data_len: HEADER_SIZE,
            entries,
            dirty: false,
        })
    }

    /// Reopens an existing store for further population.
    pub fn open(dir: &Path, nrecords: u64) -> GfResult<Self> {
        index::remove_stale_temp_files(dir).map_err(storage_err)?;
        let entries = index::read_index(&dir.join(INDEX_FILE), nrecords)
            .map_err(|e| segment_err(e, INDEX_FILE))?;
        let (file, data_len) = open_traces(&dir.join(TRACES_FILE), true)?;
        index::check_extents(&entries, data_len).map_err(storage_err)?;
        Ok(Self {
            dir: dir.to_path_buf(),
            file,
            data_len,
            entries,
            dirty: false,
        })
    }

    /// Appends `record` and points slot `irecord` at it.
    ///
    /// Slots are write-once; resuming an interrupted population should skip
    /// slots for which [`TraceWriter::is_populated`] is true.
    pub fn append(&mut self, irecord: u64, record: &Record) -> GfResult<()> {
        let slot = usize::try_from(irecord)
            .ok()
            .filter(|&i| i < self.entries.len())
            .ok_or_else(|| GfError::invalid_input(format!("record {irecord} out of range")))?;
        if self.entries[slot].is_populated() {
            return Err(GfError::invalid_input(format!(
                "record {irecord} is already populated"
            )));
        }

        let encoded = codec::encode_record(record).map_err(storage_err)?;
        let nbytes = u32::try_from(encoded.payload.len())
            .map_err(|_| GfError::invalid_input("record payload too large"))?;
        let offset = if encoded.payload.is_empty() {
            0
        } else {
            if let Err(e) = self.file.write_all(&encoded.payload) {
                self.discard_partial_write();
                return Err(storage_err(e));
            }
            let offset = self.data_len;
            self.data_len += u64::from(nbytes);
            offset
        };

        self.entries[slot] = IndexEntry {
            offset,
            nbytes,
            nsamples: encoded.nsamples,
            kind: encoded.kind,
            crc: encoded.crc,
        };
        self.dirty = true;
        Ok(())
    }

    /// Drops bytes a failed append left past the last indexed payload.
    ///
    /// If the file cannot be truncated, later payloads are placed after the
    /// partial one instead.
    fn discard_partial_write(&mut self) {
        if let Err(e) = self.file.set_len(self.data_len) {
            warn!(error = %e, "cannot truncate partial append in traces segment");
            match self.file.metadata() {
                Ok(meta) => self.data_len = meta.len(),
                Err(e) => warn!(error = %e, "cannot stat traces segment"),
            }
        }
    }

    /// Decodes record `irecord` from what has been written so far.
    pub fn read(&self, irecord: u64) -> GfResult<Record> {
        load_record(&self.file, &self.entries, irecord)
    }

    /// Whether slot `irecord` holds a record.
    #[must_use]
    pub fn is_populated(&self, irecord: u64) -> bool {
        entry_at(&self.entries, irecord).is_ok_and(IndexEntry::is_populated)
    }

    /// All index entries in record order.
    #[must_use]
    pub fn entries(&self) -> &[IndexEntry] {
        &self.entries
    }

    /// Size of the traces file in bytes.
    #[must_use]
    pub const fn data_len(&self) -> u64 {
        self.data_len
    }

    /// Syncs appended payloads, then atomically rewrites the index.
    pub fn flush(&mut self) -> GfResult<()> {
        if !self.dirty {
            return Ok(());
        }
        self.file.sync_all().map_err(storage_err)?;
        index::write_index(&self.dir.join(INDEX_FILE), &self.entries).map_err(storage_err)?;
        self.dirty = false;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_write_then_read() {
        let dir = tempdir().unwrap();
        let mut writer = TraceWriter::create(dir.path(), 4).unwrap();
        writer.append(0, &Record::waveform(3, vec![1.0, 2.0])).unwrap();
        writer.append(2, &Record::Zero).unwrap();
        writer.append(3, &Record::static_value(0.25)).unwrap();

        assert_eq!(writer.read(0).unwrap(), Record::waveform(3, vec![1.0, 2.0]));
        writer.flush().unwrap();

        let reader = TraceReader::open(dir.path(), 4).unwrap();
        assert_eq!(reader.read(0).unwrap(), Record::waveform(3, vec![1.0, 2.0]));
        assert!(matches!(reader.read(1), Err(GfError::NotFound { irecord: 1 })));
        assert_eq!(reader.read(2).unwrap(), Record::Zero);
        assert_eq!(reader.read(3).unwrap(), Record::static_value(0.25));
        assert!(matches!(reader.read(4), Err(GfError::InvalidInput { .. })));
        assert_eq!(reader.data_len(), HEADER_SIZE + 16 + 4);
    }

    #[test]
    fn test_slots_are_write_once() {
        let dir = tempdir().unwrap();
        let mut writer = TraceWriter::create(dir.path(), 2).unwrap();
        writer.append(1, &Record::Zero).unwrap();
        assert!(writer.is_populated(1));
        assert!(!writer.is_populated(0));
        assert!(writer.append(1, &Record::Zero).is_err());
    }

    #[test]
    fn test_resume_appending() {
        let dir = tempdir().unwrap();
        {
            let mut writer = TraceWriter::create(dir.path(), 2).unwrap();
            writer.append(0, &Record::waveform(0, vec![5.0])).unwrap();
            writer.flush().unwrap();
        }
        {
            let mut writer = TraceWriter::open(dir.path(), 2).unwrap();
            assert!(writer.is_populated(0));
            writer.append(1, &Record::waveform(-1, vec![6.0, 7.0])).unwrap();
            writer.flush().unwrap();
        }
        let reader = TraceReader::open(dir.path(), 2).unwrap();
        assert_eq!(reader.read(0).unwrap(), Record::waveform(0, vec![5.0]));
        assert_eq!(reader.read(1).unwrap(), Record::waveform(-1, vec![6.0, 7.0]));
    }

    #[test]
    fn test_unflushed_records_are_not_indexed() {
        let dir = tempdir().unwrap();
        {
            let mut writer = TraceWriter::create(dir.path(), 1).unwrap();
            writer.append(0, &Record::waveform(0, vec![1.0])).unwrap();
        }
        let reader = TraceReader::open(dir.path(), 1).unwrap();
        assert!(reader.read(0).unwrap_err().is_not_found());
    }

    #[test]
    fn test_partial_append_does_not_shift_later_records() {
        let dir = tempdir().unwrap();
        let mut writer = TraceWriter::create(dir.path(), 2).unwrap();
        writer.append(0, &Record::waveform(0, vec![1.0, 2.0])).unwrap();
        let before = writer.data_len();

        // A payload that only partly reached the disk.
        let mut file = OpenOptions::new()
            .append(true)
            .open(dir.path().join(TRACES_FILE))
            .unwrap();
        file.write_all(&[0xAB; 7]).unwrap();
        drop(file);
        writer.discard_partial_write();
        assert_eq!(writer.data_len(), before);

        writer.append(1, &Record::waveform(4, vec![3.0, 4.0, 5.0])).unwrap();
        writer.flush().unwrap();

        let reader = TraceReader::open(dir.path(), 2).unwrap();
        assert_eq!(reader.read(0).unwrap(), Record::waveform(0, vec![1.0, 2.0]));
        assert_eq!(reader.read(1).unwrap(), Record::waveform(4, vec![3.0, 4.0, 5.0]));
        assert_eq!(reader.data_len(), writer.data_len());
    }

    #[test]
    fn test_missing_segments_are_corrupt() {
        let dir = tempdir().unwrap();
        {
            let mut writer = TraceWriter::create(dir.path(), 1).unwrap();
            writer.append(0, &Record::Zero).unwrap();
            writer.flush().unwrap();
        }
        std::fs::remove_file(dir.path().join(TRACES_FILE)).unwrap();
        let err = TraceReader::open(dir.path(), 1).unwrap_err();
        assert!(matches!(err, GfError::CorruptStore { .. }), "{err}");

        std::fs::remove_file(dir.path().join(INDEX_FILE)).unwrap();
        let err = TraceWriter::open(dir.path(), 1).unwrap_err();
        assert!(matches!(err, GfError::CorruptStore { .. }), "{err}");
    }

    #[test]
    fn test_detects_payload_corruption() {
        let dir = tempdir().unwrap();
        {
            let mut writer = TraceWriter::create(dir.path(), 1).unwrap();
            writer.append(0, &Record::waveform(0, vec![1.0, 2.0, 3.0])).unwrap();
            writer.flush().unwrap();
        }
        let path = dir.path().join(TRACES_FILE);
        let mut bytes = std::fs::read(&path).unwrap();
        let last = bytes.len() - 1;
        bytes[last] ^= 0x55;
        std::fs::write(&path, bytes).unwrap();

        let reader = TraceReader::open(dir.path(), 1).unwrap();
        assert!(matches!(reader.read(0), Err(GfError::CorruptStore { .. })));
    }

    #[test]
    fn test_detects_truncated_traces() {
        let dir = tempdir().unwrap();
        {
            let mut writer = TraceWriter::create(dir.path(), 1).unwrap();
            writer.append(0, &Record::waveform(0, vec![1.0, 2.0, 3.0])).unwrap();
            writer.flush().unwrap();
        }
        let file = OpenOptions::new()
            .write(true)
            .open(dir.path().join(TRACES_FILE))
            .unwrap();
        file.set_len(HEADER_SIZE + 4).unwrap();

        let err = TraceReader::open(dir.path(), 1).unwrap_err();
        assert!(matches!(err, GfError::CorruptStore { .. }));
    }
}
