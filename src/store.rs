//! Store handle and its lifecycle.
//!
//! A [`Store`] moves through three states:
//!
//! ```text
//! create / open(Editable) ──► Editable ──freeze──► ReadOnly ──close──► Closed
//!            open(ReadOnly) ─────────────────────►    ▲
//! ```
//!
//! `Editable` holds the directory's writer lock and is the only state in
//! which records may be written. `ReadOnly` serves concurrent queries
//! through a shared [`RecordCache`]. After `close` every operation fails
//! with [`GfError::ClosedStore`].

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::cache::{CacheConfig, CacheStats, RecordCache};
use crate::config::StoreConfig;
use crate::error::{ConfigError, GfError, GfResult};
use crate::grid::{GridCoord, GridKey, IndexedGrid, Interpolation};
use crate::record::{Record, Waveform};
use crate::stack::{self, MissingRecordPolicy, RecordSource, SampleWindow};
use crate::storage::{
    read_descriptor, read_extra, validate_extra_key, write_descriptor, write_extra, IndexEntry,
    RecordKind, StoreDescriptor, TraceReader, TraceWriter, WriterLock, CONFIG_FILE, EXTRA_DIR,
    INDEX_FILE, LOCK_FILE, TRACES_FILE,
};
use crate::sum_params::SumParams;

/// Mode requested when opening an existing store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StoreMode {
    /// Continue populating; takes the writer lock.
    Editable,
    /// Frozen store for queries.
    ReadOnly,
}

/// Completeness requirement checked by [`Store::freeze`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FreezePolicy {
    /// Every record slot must be populated.
    #[default]
    RequireComplete,
    /// Unpopulated slots are allowed and read as missing.
    AllowSparse,
}

/// Runtime options of a store handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StoreOptions {
    /// Record cache budget used in read-only mode.
    pub cache: CacheConfig,
    /// Handling of sparse slots during stacking.
    pub missing: MissingRecordPolicy,
}

impl StoreOptions {
    /// Validates the options.
    pub fn validate(self) -> Result<Self, ConfigError> {
        self.cache.validate()?;
        Ok(self)
    }

    /// Sets the cache budget.
    #[must_use]
    pub const fn with_cache(mut self, cache: CacheConfig) -> Self {
        self.cache = cache;
        self
    }

    /// Sets the missing-record policy.
    #[must_use]
    pub const fn with_missing(mut self, missing: MissingRecordPolicy) -> Self {
        self.missing = missing;
        self
    }
}

/// Population summary of a store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct StoreStats {
    /// Record slots in the grid.
    pub nrecords: u64,
    /// Slots never written.
    pub nempty: u64,
    /// Slots holding an all-zero record.
    pub nzero: u64,
    /// Slots holding a waveform.
    pub nwaveform: u64,
    /// Slots holding a static value.
    pub nstatic: u64,
    /// Size of the traces segment in bytes.
    pub data_bytes: u64,
}

impl StoreStats {
    fn from_entries(entries: &[IndexEntry], data_bytes: u64) -> Self {
        let mut stats = Self {
            nrecords: entries.len() as u64,
            data_bytes,
            ..Self::default()
        };
        for entry in entries {
            match entry.kind {
                RecordKind::Empty => stats.nempty += 1,
                RecordKind::Zero => stats.nzero += 1,
                RecordKind::Waveform => stats.nwaveform += 1,
                RecordKind::Static => stats.nstatic += 1,
            }
        }
        stats
    }

    /// Whether every slot is populated.
    #[must_use]
    pub const fn is_complete(&self) -> bool {
        self.nempty == 0
    }
}

/// Writes the files of a new store. `config.json` goes last: a directory
/// without it is not a store.
fn write_new_store(
    dir: &Path,
    descriptor: &StoreDescriptor,
    extra: &BTreeMap<String, serde_json::Value>,
    nrecords: u64,
) -> GfResult<(WriterLock, TraceWriter)> {
    fs::create_dir_all(dir)?;
    let lock = WriterLock::acquire(dir)?;
    let writer = TraceWriter::create(dir, nrecords)?;
    write_extra(dir, extra)?;
    write_descriptor(dir, descriptor)?;
    Ok((lock, writer))
}

/// Paths a `create` call may add, and whether each existed before it.
struct CreationFootprint {
    dir: PathBuf,
    dir_existed: bool,
    extra_dir_existed: bool,
    files: Vec<(PathBuf, bool)>,
}

impl CreationFootprint {
    fn survey(dir: &Path, extra: &BTreeMap<String, serde_json::Value>) -> Self {
        let extra_dir = dir.join(EXTRA_DIR);
        let files = [TRACES_FILE, INDEX_FILE, CONFIG_FILE, LOCK_FILE]
            .iter()
            .map(|name| dir.join(name))
            .chain(extra.keys().map(|key| extra_dir.join(format!("{key}.json"))))
            .map(|path| {
                let existed = path.exists();
                (path, existed)
            })
            .collect();
        Self {
            dir: dir.to_path_buf(),
            dir_existed: dir.exists(),
            extra_dir_existed: extra_dir.exists(),
            files,
        }
    }

    /// Removes what the failed call added. Pre-existing entries are kept.
    fn undo(&self) {
        for (path, existed) in &self.files {
            if !existed && path.is_file() {
                if let Err(e) = fs::remove_file(path) {
                    warn!(path = %path.display(), error = %e, "cannot remove partial store file");
                }
            }
        }
        // `remove_dir` only succeeds on empty directories.
        if !self.extra_dir_existed {
            let _ = fs::remove_dir(self.dir.join(EXTRA_DIR));
        }
        if !self.dir_existed {
            let _ = fs::remove_dir(&self.dir);
        }
    }
}

enum StoreState {
    Editable {
        writer: TraceWriter,
        _lock: WriterLock,
    },
    ReadOnly {
        reader: TraceReader,
        cache: RecordCache,
    },
    Closed,
}

/// Handle to a Green's function store directory.
pub struct Store {
    dir: PathBuf,
    descriptor: StoreDescriptor,
    grid: IndexedGrid,
    options: StoreOptions,
    state: StoreState,
}

impl std::fmt::Debug for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Store")
            .field("dir", &self.dir)
            .field("id", &self.descriptor.config.id)
            .field("mode", &self.mode())
            .finish_non_exhaustive()
    }
}

impl Store {
    /// Creates a new, empty, editable store in `dir`.
    pub fn create(
        dir: impl AsRef<Path>,
        config: StoreConfig,
        extra: &BTreeMap<String, serde_json::Value>,
    ) -> GfResult<Self> {
        Self::create_with_options(dir, config, extra, StoreOptions::default())
    }

    /// Like [`Store::create`] with explicit runtime options.
    pub fn create_with_options(
        dir: impl AsRef<Path>,
        mut config: StoreConfig,
        extra: &BTreeMap<String, serde_json::Value>,
        options: StoreOptions,
    ) -> GfResult<Self> {
        let dir = dir.as_ref();
        let options = options.validate()?;
        let grid = IndexedGrid::new(&config)?;
        for key in extra.keys() {
            validate_extra_key(key)?;
        }
        config.uuid.get_or_insert_with(Uuid::new_v4);

        if [CONFIG_FILE, INDEX_FILE, TRACES_FILE]
            .iter()
            .any(|name| dir.join(name).exists())
        {
            return Err(GfError::AlreadyExists {
                path: dir.to_path_buf(),
            });
        }

        let footprint = CreationFootprint::survey(dir, extra);
        let descriptor = StoreDescriptor::new(config);
        let (lock, writer) = match write_new_store(dir, &descriptor, extra, grid.nrecords()) {
            Ok(created) => created,
            Err(err) => {
                warn!(path = %dir.display(), error = %err, "store creation failed, rolling back");
                footprint.undo();
                return Err(err);
            }
        };

        info!(
            path = %dir.display(),
            id = %descriptor.config.id,
            scheme = %descriptor.config.component_scheme,
            nrecords = grid.nrecords(),
            "created store"
        );

        Ok(Self {
            dir: dir.to_path_buf(),
            descriptor,
            grid,
            options,
            state: StoreState::Editable {
                writer,
                _lock: lock,
            },
        })
    }

    /// Opens an existing store.
    pub fn open(dir: impl AsRef<Path>, mode: StoreMode, options: StoreOptions) -> GfResult<Self> {
        let dir = dir.as_ref();
        let options = options.validate()?;
        let descriptor = read_descriptor(dir)?;
        let grid = IndexedGrid::new(&descriptor.config)?;

        let state = match mode {
            StoreMode::Editable => {
                let lock = WriterLock::acquire(dir)?;
                let writer = TraceWriter::open(dir, grid.nrecords())?;
                StoreState::Editable {
                    writer,
                    _lock: lock,
                }
            }
            StoreMode::ReadOnly => StoreState::ReadOnly {
                reader: TraceReader::open(dir, grid.nrecords())?,
                cache: RecordCache::new(options.cache),
            },
        };

        info!(path = %dir.display(), id = %descriptor.config.id, ?mode, "opened store");
        Ok(Self {
            dir: dir.to_path_buf(),
            descriptor,
            grid,
            options,
            state,
        })
    }

    /// Store directory.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Store configuration.
    #[must_use]
    pub fn config(&self) -> &StoreConfig {
        &self.descriptor.config
    }

    /// Descriptor as read from or written to `config.json`.
    #[must_use]
    pub const fn descriptor(&self) -> &StoreDescriptor {
        &self.descriptor
    }

    /// Grid index of the store.
    #[must_use]
    pub const fn grid(&self) -> &IndexedGrid {
        &self.grid
    }

    /// Runtime options.
    #[must_use]
    pub const fn options(&self) -> StoreOptions {
        self.options
    }

    /// Current mode; `None` once closed.
    #[must_use]
    pub const fn mode(&self) -> Option<StoreMode> {
        match self.state {
            StoreState::Editable { .. } => Some(StoreMode::Editable),
            StoreState::ReadOnly { .. } => Some(StoreMode::ReadOnly),
            StoreState::Closed => None,
        }
    }

    /// Whether [`Store::close`] has been called.
    #[must_use]
    pub const fn is_closed(&self) -> bool {
        matches!(self.state, StoreState::Closed)
    }

    /// Extra metadata stored under `key` at creation.
    pub fn extra(&self, key: &str) -> GfResult<Option<serde_json::Value>> {
        self.ensure_open()?;
        read_extra(&self.dir, key)
    }

    /// Writes record `irecord`.
    ///
    /// Only legal while editable. Slots are write-once.
    pub fn put(&mut self, irecord: u64, record: &Record) -> GfResult<()> {
        let (_, icomponent) = self.grid.coord_of(irecord)?;
        let kind = self.config().component_scheme.component_kind(icomponent);
        if !record.fits(kind) {
            return Err(GfError::invalid_input(format!(
                "record {irecord} does not match component kind {kind:?}"
            )));
        }
        let writer = self.writer_mut("put")?;
        writer.append(irecord, record)
    }

    /// Writes the record of `icomponent` at grid node `coord`.
    pub fn put_at(&mut self, coord: GridCoord, icomponent: usize, record: &Record) -> GfResult<()> {
        let irecord = self.grid.irecord(coord, icomponent)?;
        self.put(irecord, record)
    }

    /// Whether slot `irecord` holds a record.
    pub fn is_populated(&self, irecord: u64) -> GfResult<bool> {
        match &self.state {
            StoreState::Editable { writer, .. } => Ok(writer.is_populated(irecord)),
            StoreState::ReadOnly { reader, .. } => Ok(reader.entry(irecord)?.is_populated()),
            StoreState::Closed => Err(GfError::ClosedStore),
        }
    }

    /// Persists the index of an editable store. A no-op when read-only.
    pub fn flush(&mut self) -> GfResult<()> {
        match &mut self.state {
            StoreState::Editable { writer, .. } => writer.flush(),
            StoreState::ReadOnly { .. } => Ok(()),
            StoreState::Closed => Err(GfError::ClosedStore),
        }
    }

    /// Finishes population and switches to read-only mode.
    ///
    /// With [`FreezePolicy::RequireComplete`] an unpopulated slot fails the
    /// call with [`GfError::NotFound`] and the store stays editable.
    pub fn freeze(&mut self, policy: FreezePolicy) -> GfResult<()> {
        let writer = self.writer_mut("freeze")?;
        writer.flush()?;

        let first_empty = writer.entries().iter().position(|e| !e.is_populated());
        let stats = StoreStats::from_entries(writer.entries(), writer.data_len());
        if let (FreezePolicy::RequireComplete, Some(irecord)) = (policy, first_empty) {
            warn!(
                path = %self.dir.display(),
                nempty = stats.nempty,
                "refusing to freeze incomplete store"
            );
            return Err(GfError::NotFound {
                irecord: irecord as u64,
            });
        }

        let reader = TraceReader::open(&self.dir, self.grid.nrecords())?;
        self.state = StoreState::ReadOnly {
            reader,
            cache: RecordCache::new(self.options.cache),
        };
        info!(
            path = %self.dir.display(),
            nrecords = stats.nrecords,
            nempty = stats.nempty,
            data_bytes = stats.data_bytes,
            "froze store"
        );
        Ok(())
    }

    /// Releases all resources. Calling it again has no effect.
    ///
    /// An editable store is flushed first; if that fails the handle stays open.
    pub fn close(&mut self) -> GfResult<()> {
        if let StoreState::Editable { writer, .. } = &mut self.state {
            writer.flush()?;
        }
        if !self.is_closed() {
            self.state = StoreState::Closed;
            debug!(path = %self.dir.display(), "closed store");
        }
        Ok(())
    }

    /// Population summary.
    pub fn stats(&self) -> GfResult<StoreStats> {
        match &self.state {
            StoreState::Editable { writer, .. } => {
                Ok(StoreStats::from_entries(writer.entries(), writer.data_len()))
            }
            StoreState::ReadOnly { reader, .. } => {
                Ok(StoreStats::from_entries(reader.entries(), reader.data_len()))
            }
            StoreState::Closed => Err(GfError::ClosedStore),
        }
    }

    /// Record cache counters; `None` unless read-only.
    #[must_use]
    pub fn cache_stats(&self) -> Option<CacheStats> {
        match &self.state {
            StoreState::ReadOnly { cache, .. } => Some(cache.stats()),
            _ => None,
        }
    }

    /// Decoded record `irecord`.
    ///
    /// Read-only stores serve records from the cache; editable stores read
    /// them straight from the traces segment.
    pub fn get_record(&self, irecord: u64) -> GfResult<Arc<Record>> {
        match &self.state {
            StoreState::Editable { writer, .. } => writer.read(irecord).map(Arc::new),
            StoreState::ReadOnly { reader, cache } => {
                cache.get_or_load(irecord, || reader.read(irecord))
            }
            StoreState::Closed => Err(GfError::ClosedStore),
        }
    }

    /// Green's function of `icomponent` at an arbitrary geometric key.
    pub fn get(
        &self,
        key: &GridKey,
        icomponent: usize,
        interpolation: Interpolation,
    ) -> GfResult<Waveform> {
        self.ensure_open()?;
        let mut params = SumParams::default();
        for (coord, weight) in self.grid.lookup(key, interpolation)? {
            params.push(self.grid.irecord(coord, icomponent)?, 0.0, weight);
        }
        self.sum_timeseries(&params, None)
    }

    /// Stacks `params` into a waveform; see [`stack::sum_timeseries`].
    pub fn sum_timeseries(
        &self,
        params: &SumParams,
        window: Option<SampleWindow>,
    ) -> GfResult<Waveform> {
        self.ensure_open()?;
        stack::sum_timeseries(self, params, window, self.options.missing)
    }

    /// Stacked values at sample `it`, one per target; see [`stack::sum_static`].
    pub fn sum_static(
        &self,
        params: &[SumParams],
        it: i64,
        worker_count: usize,
    ) -> GfResult<Vec<f64>> {
        self.ensure_open()?;
        stack::sum_static(self, params, it, worker_count, self.options.missing)
    }

    fn ensure_open(&self) -> GfResult<()> {
        if self.is_closed() {
            Err(GfError::ClosedStore)
        } else {
            Ok(())
        }
    }

    fn writer_mut(&mut self, operation: &'static str) -> GfResult<&mut TraceWriter> {
        match &mut self.state {
            StoreState::Editable { writer, .. } => Ok(writer),
            StoreState::ReadOnly { .. } => Err(GfError::ReadOnlyViolation { operation }),
            StoreState::Closed => Err(GfError::ClosedStore),
        }
    }
}

impl RecordSource for Store {
    fn deltat(&self) -> f64 {
        self.descriptor.config.deltat()
    }

    fn record(&self, irecord: u64) -> GfResult<Arc<Record>> {
        self.get_record(irecord)
    }
}

impl Drop for Store {
    fn drop(&mut self) {
        if let StoreState::Editable { writer, .. } = &mut self.state {
            if let Err(e) = writer.flush() {
                warn!(
                    path = %self.dir.display(),
                    error = %e,
                    "failed to flush store index on drop"
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ComponentScheme, Dimension};
    use tempfile::tempdir;

    fn config() -> StoreConfig {
        StoreConfig::new(
            "store_test",
            ComponentScheme::Elastic2,
            1.0,
            Dimension::fixed(0.0, 10.0),
            Dimension::new(10.0, 20.0, 10.0),
            Dimension::new(0.0, 30.0, 10.0),
        )
    }

    fn populate(store: &mut Store) {
        for irecord in 0..store.grid().nrecords() {
            let value = irecord as f32;
            store.put(irecord, &Record::waveform(1, vec![value, -value])).unwrap();
        }
    }

    #[test]
    fn test_create_assigns_uuid_and_writes_extra() {
        let dir = tempdir().unwrap();
        let mut extra = BTreeMap::new();
        extra.insert("provenance".to_string(), serde_json::json!({ "code": "synthetic" }));
        let store = Store::create(dir.path(), config(), &extra).unwrap();
        assert!(store.config().uuid.is_some());
        assert_eq!(store.mode(), Some(StoreMode::Editable));
        assert_eq!(store.extra("provenance").unwrap().unwrap()["code"], "synthetic");
        assert_eq!(store.stats().unwrap().nempty, 16);
    }

    #[test]
    fn test_put_rejects_kind_mismatch() {
        let dir = tempdir().unwrap();
        let mut store = Store::create(dir.path(), config(), &BTreeMap::new()).unwrap();
        let err = store.put(0, &Record::static_value(1.0)).unwrap_err();
        assert!(matches!(err, GfError::InvalidInput { .. }));
        assert!(store.put(16, &Record::Zero).is_err());
    }

    #[test]
    fn test_freeze_requires_complete_store() {
        let dir = tempdir().unwrap();
        let mut store = Store::create(dir.path(), config(), &BTreeMap::new()).unwrap();
        store.put(0, &Record::Zero).unwrap();
        let err = store.freeze(FreezePolicy::RequireComplete).unwrap_err();
        assert!(matches!(err, GfError::NotFound { irecord: 1 }));
        assert_eq!(store.mode(), Some(StoreMode::Editable));

        store.freeze(FreezePolicy::AllowSparse).unwrap();
        assert_eq!(store.mode(), Some(StoreMode::ReadOnly));
        assert!(store.get_record(1).unwrap_err().is_not_found());
    }

    #[test]
    fn test_read_only_rejects_writes() {
        let dir = tempdir().unwrap();
        let mut store = Store::create(dir.path(), config(), &BTreeMap::new()).unwrap();
        populate(&mut store);
        store.freeze(FreezePolicy::RequireComplete).unwrap();

        let err = store.put(0, &Record::Zero).unwrap_err();
        assert!(matches!(err, GfError::ReadOnlyViolation { operation: "put" }));
        let err = store.freeze(FreezePolicy::AllowSparse).unwrap_err();
        assert!(matches!(err, GfError::ReadOnlyViolation { operation: "freeze" }));
    }

    #[test]
    fn test_close_is_idempotent() {
        let dir = tempdir().unwrap();
        let mut store = Store::create(dir.path(), config(), &BTreeMap::new()).unwrap();
        populate(&mut store);
        store.close().unwrap();
        store.close().unwrap();
        assert!(store.is_closed());
        assert!(matches!(store.get_record(0), Err(GfError::ClosedStore)));
        assert!(matches!(store.stats(), Err(GfError::ClosedStore)));
        assert!(matches!(store.put(0, &Record::Zero), Err(GfError::ClosedStore)));
    }

    #[test]
    fn test_get_interpolates_between_nodes() {
        let dir = tempdir().unwrap();
        let mut store = Store::create(dir.path(), config(), &BTreeMap::new()).unwrap();
        populate(&mut store);
        store.freeze(FreezePolicy::RequireComplete).unwrap();

        // Component 0 at source depth 10, distances 0 and 10: records 0 and 2.
        let trace = store
            .get(&GridKey::new(0.0, 10.0, 5.0), 0, Interpolation::Multilinear)
            .unwrap();
        assert_eq!(trace.itmin, 1);
        assert_eq!(trace.values, vec![1.0, -1.0]);

        let nearest = store
            .get(&GridKey::new(0.0, 10.0, 5.0), 0, Interpolation::NearestNeighbor)
            .unwrap();
        assert_eq!(nearest.values, vec![2.0, -2.0]);
    }

    #[test]
    fn test_second_writer_is_locked_out() {
        let dir = tempdir().unwrap();
        let _store = Store::create(dir.path(), config(), &BTreeMap::new()).unwrap();
        let err =
            Store::open(dir.path(), StoreMode::Editable, StoreOptions::default()).unwrap_err();
        assert!(matches!(err, GfError::StoreLocked { .. }), "{err}");
        assert!(err.is_retryable());

        // Readers do not need the lock.
        Store::open(dir.path(), StoreMode::ReadOnly, StoreOptions::default()).unwrap();
    }
}
