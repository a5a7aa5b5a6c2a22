//! Regular grid indexing.
//!
//! Maps geometric keys (receiver depth, source depth, distance) onto grid
//! nodes and record identifiers. Record identifiers are a linear function of
//! the node indices and the component index:
//!
//! ```text
//! irecord = ((i_receiver_depth * n_source_depth + i_source_depth) * n_distance + i_distance)
//!           * ncomponents + icomponent
//! ```
//!
//! # Bounds policy
//! - Nearest neighbour accepts keys within half a cell of the outermost
//!   nodes, `[min - delta/2, max + delta/2]`. Ties round half up.
//! - Multilinear interpolation accepts keys within `[min, max]` on every
//!   axis with at least two nodes; exact boundary keys are allowed.
//!   Single-node axes fall back to the nearest-neighbour half-cell rule.

use serde::{Deserialize, Serialize};

use crate::config::{Dimension, StoreConfig};
use crate::error::{ConfigError, GfError, GfResult};

/// Number of grid axes.
pub const NDIM: usize = 3;

/// Axis names in grid order.
pub const DIMENSION_NAMES: [&str; NDIM] = ["receiver_depth", "source_depth", "distance"];

/// Relative distance (in cells) under which a key snaps onto a node.
const NODE_SNAP: f64 = 1e-9;

/// Interpolation mode used when resolving keys to records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Interpolation {
    /// Use the single closest node.
    NearestNeighbor,
    /// Weighted combination of the surrounding nodes.
    Multilinear,
}

/// A geometric lookup key, in metres.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GridKey {
    /// Receiver depth.
    pub receiver_depth: f64,
    /// Source depth.
    pub source_depth: f64,
    /// Horizontal distance.
    pub distance: f64,
}

impl GridKey {
    /// Creates a key.
    #[must_use]
    pub const fn new(receiver_depth: f64, source_depth: f64, distance: f64) -> Self {
        Self {
            receiver_depth,
            source_depth,
            distance,
        }
    }

    const fn values(&self) -> [f64; NDIM] {
        [self.receiver_depth, self.source_depth, self.distance]
    }
}

/// Integer node coordinates, one index per axis in grid order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GridCoord(pub [usize; NDIM]);

/// Index over the regular grid of a store.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexedGrid {
    dims: [Dimension; NDIM],
    counts: [usize; NDIM],
    ncomponents: usize,
}

impl IndexedGrid {
    /// Builds the grid described by a configuration.
    pub fn new(config: &StoreConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        let dims = [config.receiver_depth, config.source_depth, config.distance];
        Ok(Self {
            counts: dims.map(|d| d.count()),
            dims,
            ncomponents: config.ncomponents(),
        })
    }

    /// Nodes per axis.
    #[must_use]
    pub const fn counts(&self) -> [usize; NDIM] {
        self.counts
    }

    /// Stored components per node.
    #[must_use]
    pub const fn ncomponents(&self) -> usize {
        self.ncomponents
    }

    /// Number of grid nodes.
    #[must_use]
    pub fn ncoords(&self) -> u64 {
        self.counts.iter().map(|&n| n as u64).product()
    }

    /// Number of record slots (nodes times components).
    #[must_use]
    pub fn nrecords(&self) -> u64 {
        self.ncoords() * self.ncomponents as u64
    }

    /// Record identifier of `coord` / `icomponent`.
    pub fn irecord(&self, coord: GridCoord, icomponent: usize) -> GfResult<u64> {
        if icomponent >= self.ncomponents {
            return Err(GfError::invalid_input(format!(
                "component {icomponent} out of range (ncomponents={})",
                self.ncomponents
            )));
        }
        let mut linear = 0u64;
        for (axis, (&index, &count)) in coord.0.iter().zip(&self.counts).enumerate() {
            if index >= count {
                return Err(GfError::invalid_input(format!(
                    "index {index} out of range for axis '{}' ({count} nodes)",
                    DIMENSION_NAMES[axis]
                )));
            }
            linear = linear * count as u64 + index as u64;
        }
        Ok(linear * self.ncomponents as u64 + icomponent as u64)
    }

    /// Inverse of [`IndexedGrid::irecord`].
    #[allow(clippy::cast_possible_truncation)]
    pub fn coord_of(&self, irecord: u64) -> GfResult<(GridCoord, usize)> {
        if irecord >= self.nrecords() {
            return Err(GfError::invalid_input(format!(
                "record {irecord} out of range (nrecords={})",
                self.nrecords()
            )));
        }
        let ncomp = self.ncomponents as u64;
        let icomponent = (irecord % ncomp) as usize;
        let mut rest = irecord / ncomp;
        let mut indices = [0usize; NDIM];
        for axis in (0..NDIM).rev() {
            let count = self.counts[axis] as u64;
            indices[axis] = (rest % count) as usize;
            rest /= count;
        }
        Ok((GridCoord(indices), icomponent))
    }

    /// Geometric key of a node.
    #[must_use]
    pub fn node_key(&self, coord: GridCoord) -> GridKey {
        let [a, b, c] = coord.0;
        GridKey::new(self.dims[0].value(a), self.dims[1].value(b), self.dims[2].value(c))
    }

    /// Iterates all node coordinates in record order.
    pub fn coords(&self) -> impl Iterator<Item = GridCoord> + '_ {
        let [n0, n1, n2] = self.counts;
        (0..n0).flat_map(move |a| {
            (0..n1).flat_map(move |b| (0..n2).map(move |c| GridCoord([a, b, c])))
        })
    }

    /// Closest node to `key`.
    pub fn lookup_nearest(&self, key: &GridKey) -> GfResult<GridCoord> {
        let values = key.values();
        let mut indices = [0usize; NDIM];
        for axis in 0..NDIM {
            indices[axis] = self.nearest_on_axis(axis, values[axis])?;
        }
        Ok(GridCoord(indices))
    }

    /// Surrounding nodes of `key` with multilinear weights.
    ///
    /// Zero-weight nodes are omitted, so a key on a node yields exactly that
    /// node with weight 1.
    pub fn lookup_multilinear(&self, key: &GridKey) -> GfResult<Vec<(GridCoord, f64)>> {
        let values = key.values();
        let mut per_axis: [Vec<(usize, f64)>; NDIM] = Default::default();
        for axis in 0..NDIM {
            per_axis[axis] = self.bracket_on_axis(axis, values[axis])?;
        }

        let mut out = Vec::with_capacity(per_axis.iter().map(Vec::len).product());
        for &(a, wa) in &per_axis[0] {
            for &(b, wb) in &per_axis[1] {
                for &(c, wc) in &per_axis[2] {
                    out.push((GridCoord([a, b, c]), wa * wb * wc));
                }
            }
        }
        Ok(out)
    }

    /// Resolves `key` under the given interpolation mode.
    pub fn lookup(&self, key: &GridKey, mode: Interpolation) -> GfResult<Vec<(GridCoord, f64)>> {
        match mode {
            Interpolation::NearestNeighbor => Ok(vec![(self.lookup_nearest(key)?, 1.0)]),
            Interpolation::Multilinear => self.lookup_multilinear(key),
        }
    }

    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    fn nearest_on_axis(&self, axis: usize, x: f64) -> GfResult<usize> {
        let dim = &self.dims[axis];
        let lo = dim.min - 0.5 * dim.delta;
        let hi = dim.max + 0.5 * dim.delta;
        if !(x >= lo && x <= hi) {
            return Err(out_of_range(axis, x, lo, hi));
        }
        let index = ((x - dim.min) / dim.delta + 0.5).floor().max(0.0) as usize;
        Ok(index.min(self.counts[axis] - 1))
    }

    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss, clippy::cast_precision_loss)]
    fn bracket_on_axis(&self, axis: usize, x: f64) -> GfResult<Vec<(usize, f64)>> {
        let count = self.counts[axis];
        if count == 1 {
            return Ok(vec![(self.nearest_on_axis(axis, x)?, 1.0)]);
        }

        let dim = &self.dims[axis];
        let eps = NODE_SNAP * dim.delta;
        if !(x >= dim.min - eps && x <= dim.max + eps) {
            return Err(out_of_range(axis, x, dim.min, dim.max));
        }

        let mut t = ((x - dim.min) / dim.delta).clamp(0.0, (count - 1) as f64);
        if (t - t.round()).abs() < NODE_SNAP {
            t = t.round();
        }
        let i0 = (t.floor() as usize).min(count - 2);
        let frac = t - i0 as f64;

        let mut nodes = Vec::with_capacity(2);
        if frac < 1.0 {
            nodes.push((i0, 1.0 - frac));
        }
        if frac > 0.0 {
            nodes.push((i0 + 1, frac));
        }
        Ok(nodes)
    }
}

fn out_of_range(axis: usize, value: f64, min: f64, max: f64) -> GfError {
    GfError::OutOfRange {
        dimension: DIMENSION_NAMES[axis],
        value,
        min,
        max,
    }
}
