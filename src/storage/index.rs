//! Index segment: one fixed-size entry per record slot.
//!
//! The index is read into memory when a store is opened and rewritten as a
//! whole when an editable store is flushed. Rewrites go to a temporary file
//! which is synced and renamed over the old index, so a crash leaves either
//! the old or the new index in place, never a mix.

use std::fs::{self, File, OpenOptions};
use std::io::{BufReader, BufWriter, Error as IoError, ErrorKind, Read, Result as IoResult, Write};
use std::path::{Path, PathBuf};

use uuid::Uuid;

use super::codec::{self, IndexEntry, HEADER_SIZE, INDEX_ENTRY_SIZE, INDEX_HEADER_SIZE, INDEX_MAGIC};

/// File name of the index segment inside a store directory.
pub const INDEX_FILE: &str = "index";

/// Loads all entries, checking the header and the file size.
pub fn read_index(path: &Path, expected_nrecords: u64) -> IoResult<Vec<IndexEntry>> {
    let file = File::open(path)?;
    let file_len = file.metadata()?.len();
    let mut reader = BufReader::new(file);

    let _version = codec::read_header(&mut reader, INDEX_MAGIC)?;
    let mut count = [0u8; 8];
    reader.read_exact(&mut count)?;
    let nrecords = u64::from_le_bytes(count);

    if nrecords != expected_nrecords {
        return Err(IoError::new(
            ErrorKind::InvalidData,
            format!("index holds {nrecords} records, grid defines {expected_nrecords}"),
        ));
    }

    let expected_len = INDEX_HEADER_SIZE + nrecords * INDEX_ENTRY_SIZE as u64;
    if file_len != expected_len {
        return Err(IoError::new(
            ErrorKind::InvalidData,
            format!("index file is {file_len} bytes, expected {expected_len}"),
        ));
    }

    let capacity = usize::try_from(nrecords)
        .map_err(|_| IoError::new(ErrorKind::InvalidData, "index too large for this platform"))?;
    let mut entries = Vec::with_capacity(capacity);
    let mut buf = [0u8; INDEX_ENTRY_SIZE];
    for _ in 0..nrecords {
        reader.read_exact(&mut buf)?;
        entries.push(IndexEntry::decode(&buf)?);
    }
    Ok(entries)
}

/// Checks that every populated entry points inside the traces data.
pub fn check_extents(entries: &[IndexEntry], traces_len: u64) -> IoResult<()> {
    for (irecord, entry) in entries.iter().enumerate() {
        if entry.nbytes == 0 {
            continue;
        }
        if entry.offset < HEADER_SIZE || entry.end() > traces_len {
            return Err(IoError::new(
                ErrorKind::InvalidData,
                format!(
                    "record {irecord} spans [{}, {}) outside traces data of {traces_len} bytes",
                    entry.offset,
                    entry.end()
                ),
            ));
        }
    }
    Ok(())
}

/// Atomically replaces the index at `path` with `entries`.
pub fn write_index(path: &Path, entries: &[IndexEntry]) -> IoResult<()> {
    let mut writer = IndexWriter::new(path.to_path_buf())?;
    writer.write_entries(entries)?;
    writer.finalize()
}

/// Builder for index files.
///
/// Writes to a temporary file first, then renames it into place on finalize.
pub struct IndexWriter {
    temp_path: Option<PathBuf>,
    final_path: PathBuf,
    writer: Option<BufWriter<File>>,
    entries_written: bool,
}

impl IndexWriter {
    /// Create a new index writer targeting `final_path`.
    pub fn new(final_path: PathBuf) -> IoResult<Self> {
        let temp_path = final_path.with_extension(format!("tmp.{}", Uuid::new_v4()));

        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&temp_path)?;

        let mut writer = BufWriter::new(file);
        codec::write_header(&mut writer, INDEX_MAGIC)?;

        Ok(Self {
            temp_path: Some(temp_path),
            final_path,
            writer: Some(writer),
            entries_written: false,
        })
    }

    /// Write the record count and all entries.
    pub fn write_entries(&mut self, entries: &[IndexEntry]) -> IoResult<()> {
        if self.entries_written {
            return Err(IoError::new(
                ErrorKind::Other,
                "write_entries can only be called once",
            ));
        }

        let writer = self
            .writer
            .as_mut()
            .ok_or_else(|| IoError::new(ErrorKind::Other, "writer already consumed"))?;

        writer.write_all(&(entries.len() as u64).to_le_bytes())?;
        for entry in entries {
            writer.write_all(&entry.encode())?;
        }
        self.entries_written = true;
        Ok(())
    }

    /// Flush, fsync and rename into place.
    ///
    /// This is the commit point of an index update.
    pub fn finalize(mut self) -> IoResult<()> {
        let mut writer = self
            .writer
            .take()
            .ok_or_else(|| IoError::new(ErrorKind::Other, "writer already consumed"))?;
        let temp_path = self
            .temp_path
            .take()
            .ok_or_else(|| IoError::new(ErrorKind::Other, "temp_path already consumed"))?;

        if !self.entries_written {
            let _ = fs::remove_file(&temp_path);
            return Err(IoError::new(ErrorKind::Other, "no entries written"));
        }

        writer.flush()?;
        writer.get_ref().sync_all()?;
        drop(writer);

        fs::rename(&temp_path, &self.final_path)?;
        Ok(())
    }
}

impl Drop for IndexWriter {
    fn drop(&mut self) {
        // Best-effort cleanup of temp file if not finalized
        if let Some(ref temp_path) = self.temp_path {
            self.writer.take();
            if temp_path.exists() {
                let _ = fs::remove_file(temp_path);
            }
        }
    }
}

/// Removes stale temporary index files left by an interrupted rewrite.
pub fn remove_stale_temp_files(dir: &Path) -> IoResult<()> {
    let prefix = format!("{INDEX_FILE}.tmp.");
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        if entry.file_name().to_string_lossy().starts_with(&prefix) {
            let _ = fs::remove_file(entry.path());
        }
    }
    Ok(())
}
