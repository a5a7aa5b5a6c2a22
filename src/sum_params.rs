//! Turning a discretized source and a receiver into stacking parameters.
//!
//! For every sub-source the receiver geometry selects grid nodes (through the
//! configured interpolation) and the component scheme projects the
//! sub-source moment tensor onto the stored components. The result is one
//! flat list of `(record, delay, weight)` triples per output component.

use serde::{Deserialize, Serialize};

use crate::config::{ComponentScheme, OutputComponent};
use crate::error::{GfError, GfResult};
use crate::grid::{GridKey, IndexedGrid, Interpolation};
use crate::source::DiscretizedSource;

/// Receiver position in the local Cartesian frame of the sources.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Target {
    /// Northward offset, metres.
    pub north: f64,
    /// Eastward offset, metres.
    pub east: f64,
    /// Depth, metres.
    pub depth: f64,
}

impl Target {
    /// Creates a target.
    #[must_use]
    pub const fn new(north: f64, east: f64, depth: f64) -> Self {
        Self { north, east, depth }
    }
}

/// Parallel arrays of records, delays (seconds) and weights.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct SumParams {
    /// Record identifiers.
    pub irecords: Vec<u64>,
    /// Time shifts in seconds.
    pub delays: Vec<f64>,
    /// Weights.
    pub weights: Vec<f64>,
}

impl SumParams {
    /// Builds parameters from parallel arrays.
    pub fn new(irecords: Vec<u64>, delays: Vec<f64>, weights: Vec<f64>) -> GfResult<Self> {
        let params = Self {
            irecords,
            delays,
            weights,
        };
        params.validate()?;
        Ok(params)
    }

    /// Appends one triple.
    pub fn push(&mut self, irecord: u64, delay: f64, weight: f64) {
        self.irecords.push(irecord);
        self.delays.push(delay);
        self.weights.push(weight);
    }

    /// Number of triples.
    #[must_use]
    pub fn len(&self) -> usize {
        self.irecords.len()
    }

    /// Whether there are no triples.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.irecords.is_empty()
    }

    /// Triples of `self` followed by those of `other`.
    #[must_use]
    pub fn concat(&self, other: &Self) -> Self {
        let mut out = self.clone();
        out.irecords.extend_from_slice(&other.irecords);
        out.delays.extend_from_slice(&other.delays);
        out.weights.extend_from_slice(&other.weights);
        out
    }

    /// Checks that the arrays line up and hold finite numbers.
    pub fn validate(&self) -> GfResult<()> {
        let n = self.irecords.len();
        if self.delays.len() != n || self.weights.len() != n {
            return Err(GfError::invalid_input(format!(
                "sum parameter arrays differ in length (irecords={n}, delays={}, weights={})",
                self.delays.len(),
                self.weights.len()
            )));
        }
        if let Some(i) = self
            .delays
            .iter()
            .zip(&self.weights)
            .position(|(d, w)| !d.is_finite() || !w.is_finite())
        {
            return Err(GfError::invalid_input(format!(
                "sum parameter {i} has a non-finite delay or weight"
            )));
        }
        Ok(())
    }
}

/// Stacking parameters for one receiver, one set per output component.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct TargetSumParams {
    /// North component.
    pub north: SumParams,
    /// East component.
    pub east: SumParams,
    /// Down component.
    pub down: SumParams,
}

impl TargetSumParams {
    /// Parameters of one output component.
    #[must_use]
    pub const fn component(&self, component: OutputComponent) -> &SumParams {
        match component {
            OutputComponent::North => &self.north,
            OutputComponent::East => &self.east,
            OutputComponent::Down => &self.down,
        }
    }

    fn component_mut(&mut self, component: OutputComponent) -> &mut SumParams {
        match component {
            OutputComponent::North => &mut self.north,
            OutputComponent::East => &mut self.east,
            OutputComponent::Down => &mut self.down,
        }
    }

    /// Whether no output component has any triple.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.north.is_empty() && self.east.is_empty() && self.down.is_empty()
    }
}

const OUTPUTS: [OutputComponent; 3] = [
    OutputComponent::North,
    OutputComponent::East,
    OutputComponent::Down,
];

/// `(stored component, weight)` terms for each output component, N/E/D.
type Terms = [Vec<(usize, f64)>; 3];

/// Projects moment tensor `m6` onto the stored components of `scheme` for a
/// receiver at azimuth `azimuth` (radians, clockwise from north) of the source.
fn scheme_terms(scheme: ComponentScheme, m6: [f64; 6], azimuth: f64, terms: &mut Terms) {
    for t in terms.iter_mut() {
        t.clear();
    }
    let (sa, ca) = azimuth.sin_cos();
    // Flat geometry: the back-projection angle equals the azimuth.
    let (sb, cb) = (sa, ca);
    let [m0, m1, m2, m3, m4, m5] = m6;

    let f0 = m0 * ca * ca + m1 * sa * sa + m3 * 2.0 * sa * ca;
    let f1 = m4 * ca + m5 * sa;
    let f2 = m2;
    let f3 = (m1 - m0) * sa * ca + m3 * (ca * ca - sa * sa);
    let f4 = m5 * ca - m4 * sa;
    let f5 = m0 * sa * sa + m1 * ca * ca - m3 * 2.0 * sa * ca;

    let [north, east, down] = terms;
    match scheme {
        ComponentScheme::Elastic10 | ComponentScheme::StaticElastic10 => {
            north.extend([
                (0, cb * f0),
                (1, cb * f1),
                (2, cb * f2),
                (8, cb * f5),
                (3, -sb * f3),
                (4, -sb * f4),
            ]);
            east.extend([
                (0, sb * f0),
                (1, sb * f1),
                (2, sb * f2),
                (8, sb * f5),
                (3, cb * f3),
                (4, cb * f4),
            ]);
            down.extend([(5, f0), (6, f1), (7, f2), (9, f5)]);
        }
        ComponentScheme::Elastic8 => {
            north.extend([
                (0, cb * f0),
                (1, cb * f1),
                (2, cb * f2),
                (3, -sb * f3),
                (4, -sb * f4),
            ]);
            east.extend([
                (0, sb * f0),
                (1, sb * f1),
                (2, sb * f2),
                (3, cb * f3),
                (4, cb * f4),
            ]);
            down.extend([(5, f0), (6, f1), (7, f2)]);
        }
        ComponentScheme::Elastic2 => {
            let w = (m0 + m1 + m2) / 3.0;
            north.push((0, cb * w));
            east.push((0, sb * w));
            down.push((1, w));
        }
    }
}

/// Builds the stacking parameters of one receiver.
///
/// Triples are ordered by sub-source, then by scheme term, then by
/// interpolation node. Terms whose weight is exactly zero are kept.
pub fn make_sum_params(
    source: &DiscretizedSource,
    target: &Target,
    grid: &IndexedGrid,
    scheme: ComponentScheme,
    interpolation: Interpolation,
) -> GfResult<TargetSumParams> {
    if grid.ncomponents() != scheme.ncomponents() {
        return Err(GfError::invalid_input(format!(
            "scheme {scheme} has {} components but the grid stores {}",
            scheme.ncomponents(),
            grid.ncomponents()
        )));
    }
    if ![target.north, target.east, target.depth].iter().all(|v| v.is_finite()) {
        return Err(GfError::invalid_input("target position is not finite"));
    }

    let mut out = TargetSumParams::default();
    let mut terms: Terms = Default::default();
    let mut irecords = Vec::new();

    for sub in source.subsources() {
        let dn = target.north - sub.north;
        let de = target.east - sub.east;
        let key = GridKey::new(target.depth, sub.depth, dn.hypot(de));
        let nodes = grid.lookup(&key, interpolation)?;

        scheme_terms(scheme, sub.moment_tensor.m6(), de.atan2(dn), &mut terms);
        for (output, output_terms) in OUTPUTS.into_iter().zip(&terms) {
            let params = out.component_mut(output);
            for &(icomponent, term_weight) in output_terms {
                irecords.clear();
                for &(coord, _) in &nodes {
                    irecords.push(grid.irecord(coord, icomponent)?);
                }
                for (&irecord, &(_, node_weight)) in irecords.iter().zip(&nodes) {
                    params.push(irecord, sub.delay, term_weight * node_weight);
                }
            }
        }
    }

    Ok(out)
}
