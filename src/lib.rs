//! # gfstore - Green's Function Store
//!
//! gfstore keeps precomputed elastodynamic impulse responses ("Green's
//! functions") on a regular grid of receiver depth, source depth and
//! distance, and synthesizes seismograms and static displacements for
//! arbitrary finite sources by weighted, time-shifted summation of the
//! stored traces.
//!
//! ## Core Concepts
//!
//! - **StoreConfig**: grid bounds, sampling rate and component scheme
//! - **IndexedGrid**: maps geometric keys to record identifiers
//! - **Store**: on-disk store handle (Editable, ReadOnly, Closed)
//! - **DiscretizedSource**: a finite source as a set of point sub-sources
//! - **SumParams**: `(record, delay, weight)` triples for one receiver component
//!
//! ## Usage
//!
//! ```rust,ignore
//! use gfstore::{
//!     discretize_source, make_sum_params, DiscretizationPolicy, FreezePolicy, Interpolation,
//!     RectangularSource, SourceGeometry, Store, StoreMode, StoreOptions, Target,
//! };
//!
//! let store = Store::open("stores/crust2_m5", StoreMode::ReadOnly, StoreOptions::default())?;
//! let config = store.config();
//!
//! let source = RectangularSource::new(0.0, 0.0, 15_000.0, 1_000.0, 1_000.0);
//! let discretized = discretize_source(
//!     &SourceGeometry::Rectangular(source),
//!     &DiscretizationPolicy::default(),
//!     config,
//! )?;
//! let params = make_sum_params(
//!     &discretized,
//!     &Target::new(5_000.0, 0.0, 0.0),
//!     store.grid(),
//!     config.component_scheme,
//!     Interpolation::NearestNeighbor,
//! )?;
//! let north = store.sum_timeseries(&params.north, None)?;
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod cache;
pub mod config;
pub mod error;
pub mod grid;
pub mod record;
pub mod source;
pub mod stack;
pub mod storage;
pub mod store;
pub mod sum_params;

pub use cache::{CacheConfig, CacheStats, RecordCache};
pub use config::{
    ComponentKind, ComponentScheme, Dimension, OutputComponent, PhaseDef, StoreConfig,
};
pub use error::{ConfigError, GfError, GfResult};
pub use grid::{GridCoord, GridKey, IndexedGrid, Interpolation};
pub use record::{Record, Waveform};
pub use source::{
    discretize_source, magnitude_to_moment, moment_to_magnitude, Anchor, DiscretizationPolicy,
    DiscretizedSource, Mechanism, MomentTensor, PointSource, RectangularSource, SourceGeometry,
    SubSource,
};
pub use stack::{sum_static, sum_timeseries, MissingRecordPolicy, RecordSource, SampleWindow};
pub use storage::{StoreDescriptor, TraceReader, TraceWriter};
pub use store::{FreezePolicy, Store, StoreMode, StoreOptions, StoreStats};
pub use sum_params::{make_sum_params, SumParams, Target, TargetSumParams};
