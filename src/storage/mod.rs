//! On-disk store layout.
//!
//! A store is a directory:
//!
//! ```text
//! <store>/
//! ├── config.json    StoreDescriptor (format version, creation time, StoreConfig)
//! ├── index          fixed-size entry per (grid node, component)
//! ├── traces         concatenated record payloads
//! ├── extra/<key>.json   caller-supplied metadata
//! └── .lock          writer lock, only taken while editable
//! ```

mod codec;
mod descriptor;
mod index;
mod traces;
mod writer_lock;

pub use codec::{IndexEntry, RecordKind, FORMAT_VERSION};
pub use descriptor::{
    read_descriptor, read_extra, validate_extra_key, write_descriptor, write_extra,
    StoreDescriptor, CONFIG_FILE, EXTRA_DIR,
};
pub use index::INDEX_FILE;
pub use traces::{TraceReader, TraceWriter, TRACES_FILE};
pub use writer_lock::{WriterLock, LOCK_FILE};

use std::io::{Error as IoError, ErrorKind};

use crate::error::GfError;

/// Maps codec and file errors onto the crate taxonomy.
///
/// Malformed or truncated data is a corrupt store; invalid arguments stay
/// caller errors; anything else is surfaced as raw I/O.
pub(crate) fn storage_err(err: IoError) -> GfError {
    match err.kind() {
        ErrorKind::InvalidData | ErrorKind::UnexpectedEof => GfError::corrupt(err.to_string()),
        ErrorKind::InvalidInput => GfError::invalid_input(err.to_string()),
        _ => GfError::Io(err),
    }
}

/// Like [`storage_err`], but a missing segment of an existing store is
/// reported as corruption.
pub(crate) fn segment_err(err: IoError, segment: &str) -> GfError {
    if err.kind() == ErrorKind::NotFound {
        GfError::corrupt(format!("{segment} segment is missing"))
    } else {
        storage_err(err)
    }
}
