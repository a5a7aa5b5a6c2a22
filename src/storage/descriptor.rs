//! Store descriptor and extra metadata files.

use std::collections::BTreeMap;
use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::StoreConfig;
use crate::error::{ConfigError, GfError, GfResult};

use super::codec::FORMAT_VERSION;

/// File name of the descriptor inside a store directory.
pub const CONFIG_FILE: &str = "config.json";

/// Directory holding extra metadata files.
pub const EXTRA_DIR: &str = "extra";

/// Self-describing header of a store directory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoreDescriptor {
    /// Binary format version of `index` and `traces`.
    pub format_version: u8,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// The store configuration.
    pub config: StoreConfig,
}

impl StoreDescriptor {
    /// Creates a descriptor for a store being created now.
    #[must_use]
    pub fn new(config: StoreConfig) -> Self {
        Self {
            format_version: FORMAT_VERSION,
            created_at: Utc::now(),
            config,
        }
    }
}

/// Writes the descriptor of a new store.
///
/// Fails with `AlreadyExists` if the directory already holds one.
pub fn write_descriptor(dir: &Path, descriptor: &StoreDescriptor) -> GfResult<()> {
    let path = dir.join(CONFIG_FILE);
    let json = serde_json::to_vec_pretty(descriptor)
        .map_err(|e| GfError::internal(format!("descriptor serialization failed: {e}")))?;

    let mut file = match OpenOptions::new().write(true).create_new(true).open(&path) {
        Ok(file) => file,
        Err(e) if e.kind() == ErrorKind::AlreadyExists => {
            return Err(GfError::AlreadyExists {
                path: dir.to_path_buf(),
            })
        }
        Err(e) => return Err(e.into()),
    };
    file.write_all(&json)?;
    file.sync_all()?;
    Ok(())
}

/// Reads and validates the descriptor of the store in `dir`.
///
/// Fails with `NotAStore` if it is missing, unparseable, of an unknown
/// format version or holds an invalid configuration.
pub fn read_descriptor(dir: &Path) -> GfResult<StoreDescriptor> {
    let not_a_store = |reason: String| GfError::NotAStore {
        path: dir.to_path_buf(),
        reason,
    };

    let bytes = fs::read(dir.join(CONFIG_FILE))
        .map_err(|e| not_a_store(format!("cannot read {CONFIG_FILE}: {e}")))?;
    let descriptor: StoreDescriptor = serde_json::from_slice(&bytes)
        .map_err(|e| not_a_store(format!("cannot parse {CONFIG_FILE}: {e}")))?;

    if descriptor.format_version != FORMAT_VERSION {
        return Err(not_a_store(format!(
            "unsupported format version {} (expected {FORMAT_VERSION})",
            descriptor.format_version
        )));
    }
    descriptor
        .config
        .validate()
        .map_err(|e| not_a_store(format!("invalid configuration: {e}")))?;
    Ok(descriptor)
}

/// Checks that an extra metadata key is usable as a file name.
pub fn validate_extra_key(key: &str) -> Result<(), ConfigError> {
    let valid = !key.is_empty()
        && key
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
    if valid {
        Ok(())
    } else {
        Err(ConfigError::InvalidExtraKey {
            key: key.to_string(),
        })
    }
}

/// Writes all extra metadata entries below `dir/extra/`.
pub fn write_extra(dir: &Path, extra: &BTreeMap<String, serde_json::Value>) -> GfResult<()> {
    if extra.is_empty() {
        return Ok(());
    }
    let extra_dir = dir.join(EXTRA_DIR);
    fs::create_dir_all(&extra_dir)?;
    for (key, value) in extra {
        validate_extra_key(key)?;
        let json = serde_json::to_vec_pretty(value)
            .map_err(|e| GfError::internal(format!("extra '{key}' serialization failed: {e}")))?;
        fs::write(extra_dir.join(format!("{key}.json")), json)?;
    }
    Ok(())
}

/// Reads one extra metadata entry; `None` if it was never written.
pub fn read_extra(dir: &Path, key: &str) -> GfResult<Option<serde_json::Value>> {
    validate_extra_key(key)?;
    let path = dir.join(EXTRA_DIR).join(format!("{key}.json"));
    let bytes = match fs::read(&path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    serde_json::from_slice(&bytes)
        .map(Some)
        .map_err(|e| GfError::corrupt(format!("extra '{key}' is unparseable: {e}")))
}
