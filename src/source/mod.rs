//! Source descriptions and their discretization into point sub-sources.
//!
//! A finite source is turned into a [`DiscretizedSource`]: a deterministic
//! mesh of point sources, each with a position, a share of the total moment
//! tensor and a time delay. Sub-source spacing is tied to the grid step of
//! the store so that interpolation error stays bounded.

mod moment_tensor;

pub use moment_tensor::{magnitude_to_moment, moment_to_magnitude, MomentTensor};

use serde::{Deserialize, Serialize};

use crate::config::StoreConfig;
use crate::error::{GfError, GfResult};

/// Upper bound on the number of sub-sources a single discretization may produce.
pub const MAX_SUBSOURCES: usize = 1_000_000;

/// Radiation pattern of a point source.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Mechanism {
    /// Isotropic source.
    Explosion {
        /// Moment on each diagonal entry, Nm.
        moment: f64,
    },
    /// Shear dislocation, angles in degrees.
    DoubleCouple {
        /// Strike.
        strike: f64,
        /// Dip.
        dip: f64,
        /// Rake.
        rake: f64,
        /// Scalar moment, Nm.
        moment: f64,
    },
    /// Arbitrary moment tensor.
    MomentTensor(MomentTensor),
}

impl Mechanism {
    /// Moment tensor of this mechanism.
    #[must_use]
    pub fn moment_tensor(&self) -> MomentTensor {
        match *self {
            Self::Explosion { moment } => MomentTensor::explosion(moment),
            Self::DoubleCouple {
                strike,
                dip,
                rake,
                moment,
            } => MomentTensor::from_strike_dip_rake(strike, dip, rake, moment),
            Self::MomentTensor(mt) => mt,
        }
    }
}

/// A point source in local Cartesian coordinates (metres, seconds).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PointSource {
    /// Northward offset from the shared origin.
    pub north: f64,
    /// Eastward offset from the shared origin.
    pub east: f64,
    /// Depth below the surface.
    pub depth: f64,
    /// Origin time relative to the reference time.
    pub time: f64,
    /// Radiation pattern.
    pub mechanism: Mechanism,
}

/// Reference point of a rectangular source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Anchor {
    /// Centre of the rectangle.
    #[default]
    Center,
    /// Centre of the upper edge.
    Top,
    /// Centre of the lower edge.
    Bottom,
}

/// Uniform-slip rectangular fault.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RectangularSource {
    /// Northward offset of the anchor point.
    pub north: f64,
    /// Eastward offset of the anchor point.
    pub east: f64,
    /// Depth of the anchor point.
    pub depth: f64,
    /// Rupture start time.
    pub time: f64,
    /// Strike in degrees.
    pub strike: f64,
    /// Dip in degrees.
    pub dip: f64,
    /// Rake in degrees.
    pub rake: f64,
    /// Extent along strike.
    pub length: f64,
    /// Extent down dip.
    pub width: f64,
    /// Total scalar moment, Nm.
    pub moment: f64,
    /// Which point of the rectangle `north`/`east`/`depth` refer to.
    pub anchor: Anchor,
    /// Nucleation point along strike, relative to the centre (-1 to 1).
    pub nucleation_x: f64,
    /// Nucleation point down dip, relative to the centre (-1 to 1).
    pub nucleation_y: f64,
    /// Rupture velocity; `None` ruptures the whole plane at `time`.
    pub velocity: Option<f64>,
}

impl RectangularSource {
    /// Vertical strike-slip rectangle of unit moment centred at the given point.
    #[must_use]
    pub const fn new(north: f64, east: f64, depth: f64, length: f64, width: f64) -> Self {
        Self {
            north,
            east,
            depth,
            time: 0.0,
            strike: 0.0,
            dip: 90.0,
            rake: 0.0,
            length,
            width,
            moment: 1.0,
            anchor: Anchor::Center,
            nucleation_x: 0.0,
            nucleation_y: 0.0,
            velocity: None,
        }
    }

    /// Sets the fault orientation in degrees.
    #[must_use]
    pub const fn with_orientation(mut self, strike: f64, dip: f64, rake: f64) -> Self {
        self.strike = strike;
        self.dip = dip;
        self.rake = rake;
        self
    }

    /// Sets nucleation point and rupture velocity.
    #[must_use]
    pub const fn with_rupture(
        mut self,
        nucleation_x: f64,
        nucleation_y: f64,
        velocity: f64,
    ) -> Self {
        self.nucleation_x = nucleation_x;
        self.nucleation_y = nucleation_y;
        self.velocity = Some(velocity);
        self
    }

    fn validate(&self) -> GfResult<()> {
        let finite = [
            self.north,
            self.east,
            self.depth,
            self.time,
            self.strike,
            self.dip,
            self.rake,
            self.moment,
        ];
        if finite.iter().any(|v| !v.is_finite()) {
            return Err(GfError::invalid_input("rectangular source has non-finite parameters"));
        }
        if !(self.length.is_finite()
            && self.length >= 0.0
            && self.width.is_finite()
            && self.width >= 0.0)
        {
            return Err(GfError::invalid_input(format!(
                "rectangular source extent must be non-negative (length={}, width={})",
                self.length, self.width
            )));
        }
        if !(-1.0..=1.0).contains(&self.nucleation_x)
            || !(-1.0..=1.0).contains(&self.nucleation_y)
        {
            return Err(GfError::invalid_input("nucleation point must lie within [-1, 1]"));
        }
        if let Some(v) = self.velocity {
            if !(v.is_finite() && v > 0.0) {
                return Err(GfError::invalid_input(format!(
                    "rupture velocity must be positive (got {v})"
                )));
            }
        }
        Ok(())
    }
}

/// Source geometry accepted by [`discretize_source`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceGeometry {
    /// A single point source.
    Point(PointSource),
    /// A rectangular fault.
    Rectangular(RectangularSource),
}

/// Controls how finely extended sources are sampled.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DiscretizationPolicy {
    /// Maximum sub-source spacing as a fraction of the smallest spatial grid step.
    pub max_spacing_fraction: f64,
    /// Minimum number of sub-sources along each side.
    pub min_subsources_per_side: usize,
}

impl Default for DiscretizationPolicy {
    fn default() -> Self {
        Self {
            max_spacing_fraction: 0.5,
            min_subsources_per_side: 1,
        }
    }
}

impl DiscretizationPolicy {
    fn validate(&self) -> GfResult<()> {
        if !(self.max_spacing_fraction > 0.0 && self.max_spacing_fraction <= 1.0) {
            return Err(GfError::invalid_input(format!(
                "max_spacing_fraction must lie in (0, 1] (got {})",
                self.max_spacing_fraction
            )));
        }
        if self.min_subsources_per_side == 0 {
            return Err(GfError::invalid_input("min_subsources_per_side must be at least 1"));
        }
        Ok(())
    }

    /// Largest allowed spacing between neighbouring sub-sources.
    #[must_use]
    pub fn max_spacing(&self, config: &StoreConfig, velocity: Option<f64>) -> f64 {
        let mut step = config.distance.delta.min(config.source_depth.delta);
        if let Some(v) = velocity {
            step = step.min(v * config.deltat());
        }
        self.max_spacing_fraction * step
    }
}

/// One point of a discretized source.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SubSource {
    /// Northward offset.
    pub north: f64,
    /// Eastward offset.
    pub east: f64,
    /// Depth.
    pub depth: f64,
    /// Share of the source moment tensor carried by this point.
    pub moment_tensor: MomentTensor,
    /// Time delay relative to the reference origin time, seconds.
    pub delay: f64,
}

/// Ordered set of point sub-sources.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct DiscretizedSource {
    subsources: Vec<SubSource>,
}

impl DiscretizedSource {
    /// Wraps an explicit list of sub-sources.
    #[must_use]
    pub fn new(subsources: Vec<SubSource>) -> Self {
        Self { subsources }
    }

    /// The sub-sources in order.
    #[must_use]
    pub fn subsources(&self) -> &[SubSource] {
        &self.subsources
    }

    /// Number of sub-sources.
    #[must_use]
    pub fn len(&self) -> usize {
        self.subsources.len()
    }

    /// Whether there are no sub-sources.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.subsources.is_empty()
    }

    /// Sum of all sub-source moment tensors.
    #[must_use]
    pub fn total_moment_tensor(&self) -> MomentTensor {
        self.subsources
            .iter()
            .fold(MomentTensor::default(), |acc, s| acc.add(&s.moment_tensor))
    }
}

/// Discretizes `geometry` for use with a store described by `config`.
///
/// The result depends only on the inputs; repeated calls produce identical
/// sub-source sets.
pub fn discretize_source(
    geometry: &SourceGeometry,
    policy: &DiscretizationPolicy,
    config: &StoreConfig,
) -> GfResult<DiscretizedSource> {
    policy.validate()?;
    match geometry {
        SourceGeometry::Point(point) => {
            let values = [point.north, point.east, point.depth, point.time];
            if values.iter().any(|v| !v.is_finite()) {
                return Err(GfError::invalid_input("point source has non-finite parameters"));
            }
            Ok(DiscretizedSource::new(vec![SubSource {
                north: point.north,
                east: point.east,
                depth: point.depth,
                moment_tensor: point.mechanism.moment_tensor(),
                delay: point.time,
            }]))
        }
        SourceGeometry::Rectangular(rect) => discretize_rectangle(rect, policy, config),
    }
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss, clippy::cast_precision_loss)]
fn points_along(extent: f64, spacing: f64, min_points: usize) -> usize {
    let needed = (extent / spacing).ceil();
    if needed.is_finite() && needed > 0.0 {
        (needed as usize).max(min_points)
    } else {
        min_points
    }
}

#[allow(clippy::cast_precision_loss)]
fn discretize_rectangle(
    rect: &RectangularSource,
    policy: &DiscretizationPolicy,
    config: &StoreConfig,
) -> GfResult<DiscretizedSource> {
    rect.validate()?;

    let spacing = policy.max_spacing(config, rect.velocity);
    let nl = points_along(rect.length, spacing, policy.min_subsources_per_side);
    let nw = points_along(rect.width, spacing, policy.min_subsources_per_side);
    let n = nl.checked_mul(nw).filter(|&n| n <= MAX_SUBSOURCES).ok_or_else(|| {
        GfError::invalid_input(format!(
            "rectangular source needs {nl} x {nw} sub-sources (limit {MAX_SUBSOURCES})"
        ))
    })?;

    let dl = rect.length / nl as f64;
    let dw = rect.width / nw as f64;

    // In-plane unit vectors (north, east, down): along strike and down dip.
    let (sp, cp) = rect.strike.to_radians().sin_cos();
    let (sd, cd) = rect.dip.to_radians().sin_cos();
    let along_strike = [cp, sp, 0.0];
    let down_dip = [-sp * cd, cp * cd, sd];

    let anchor_shift = match rect.anchor {
        Anchor::Center => 0.0,
        Anchor::Top => 0.5 * rect.width,
        Anchor::Bottom => -0.5 * rect.width,
    };
    let nucleation = (
        rect.nucleation_x * 0.5 * rect.length,
        rect.nucleation_y * 0.5 * rect.width,
    );

    let moment_tensor = MomentTensor::from_strike_dip_rake(
        rect.strike,
        rect.dip,
        rect.rake,
        rect.moment / n as f64,
    );

    let mut subsources = Vec::with_capacity(n);
    for iw in 0..nw {
        let y = -0.5 * rect.width + (iw as f64 + 0.5) * dw;
        for il in 0..nl {
            let x = -0.5 * rect.length + (il as f64 + 0.5) * dl;
            let ya = y + anchor_shift;

            let delay = match rect.velocity {
                Some(v) => rect.time + (x - nucleation.0).hypot(y - nucleation.1) / v,
                None => rect.time,
            };

            subsources.push(SubSource {
                north: rect.north + x * along_strike[0] + ya * down_dip[0],
                east: rect.east + x * along_strike[1] + ya * down_dip[1],
                depth: rect.depth + x * along_strike[2] + ya * down_dip[2],
                moment_tensor,
                delay,
            });
        }
    }

    Ok(DiscretizedSource::new(subsources))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ComponentScheme, Dimension};

    const KM: f64 = 1000.0;

    fn config() -> StoreConfig {
        StoreConfig::new(
            "source_test",
            ComponentScheme::Elastic10,
            1.0,
            Dimension::fixed(0.0, 1.0 * KM),
            Dimension::new(10.0 * KM, 20.0 * KM, 1.0 * KM),
            Dimension::new(0.0, 20.0 * KM, 2.5 * KM),
        )
    }

    #[test]
    fn test_point_source_is_single_subsource() {
        let geometry = SourceGeometry::Point(PointSource {
            north: 1.0,
            east: 2.0,
            depth: 12.0 * KM,
            time: 0.5,
            mechanism: Mechanism::Explosion { moment: 3.0 },
        });
        let d = discretize_source(&geometry, &DiscretizationPolicy::default(), &config()).unwrap();
        assert_eq!(d.len(), 1);
        assert_eq!(d.subsources()[0].delay, 0.5);
        assert_eq!(d.subsources()[0].moment_tensor, MomentTensor::explosion(3.0));
    }

    #[test]
    fn test_rectangle_spacing_follows_grid_step() {
        let rect = RectangularSource::new(0.0, 0.0, 15.0 * KM, 1.0 * KM, 1.0 * KM);
        let policy = DiscretizationPolicy::default();
        let d = discretize_source(&SourceGeometry::Rectangular(rect), &policy, &config()).unwrap();
        // Spacing must not exceed 0.5 * min(1 km, 2.5 km) = 500 m.
        assert_eq!(d.len(), 4);

        let depths: Vec<f64> = d.subsources().iter().map(|s| s.depth).collect();
        assert!(depths
            .iter()
            .all(|&z| (z - 14.75 * KM).abs() < 1e-6 || (z - 15.25 * KM).abs() < 1e-6));
        let norths: Vec<f64> = d.subsources().iter().map(|s| s.north).collect();
        assert!(norths.iter().all(|&x| (x.abs() - 250.0).abs() < 1e-6));
        for s in d.subsources() {
            assert!(s.east.abs() < 1e-6);
        }
    }

    #[test]
    fn test_moment_is_conserved() {
        let rect = RectangularSource::new(0.0, 0.0, 15.0 * KM, 3.0 * KM, 2.0 * KM)
            .with_orientation(30.0, 60.0, 45.0);
        let rect = RectangularSource {
            moment: 5.0e17,
            ..rect
        };
        let d = discretize_source(
            &SourceGeometry::Rectangular(rect),
            &DiscretizationPolicy::default(),
            &config(),
        )
        .unwrap();
        let total = d.total_moment_tensor();
        assert!((total.scalar_moment() - 5.0e17).abs() / 5.0e17 < 1e-9);
    }

    #[test]
    fn test_rupture_delays() {
        let rect = RectangularSource::new(0.0, 0.0, 15.0 * KM, 2.0 * KM, 0.0)
            .with_rupture(-1.0, 0.0, 2.0 * KM);
        let policy = DiscretizationPolicy {
            max_spacing_fraction: 0.5,
            min_subsources_per_side: 1,
        };
        let d = discretize_source(&SourceGeometry::Rectangular(rect), &policy, &config()).unwrap();
        // Spacing 500 m: four points along strike, one down dip.
        assert_eq!(d.len(), 4);
        let delays: Vec<f64> = d.subsources().iter().map(|s| s.delay).collect();
        let expected = [0.125, 0.375, 0.625, 0.875];
        for (got, want) in delays.iter().zip(expected) {
            assert!((got - want).abs() < 1e-12);
        }
    }

    #[test]
    fn test_top_anchor_hangs_below_reference() {
        let rect = RectangularSource {
            anchor: Anchor::Top,
            ..RectangularSource::new(0.0, 0.0, 10.0 * KM, 0.0, 1.0 * KM)
        };
        let d = discretize_source(
            &SourceGeometry::Rectangular(rect),
            &DiscretizationPolicy::default(),
            &config(),
        )
        .unwrap();
        assert!(d.subsources().iter().all(|s| s.depth > 10.0 * KM));
    }

    #[test]
    fn test_deterministic() {
        let rect = RectangularSource::new(100.0, -50.0, 14.0 * KM, 4.0 * KM, 3.0 * KM)
            .with_orientation(123.0, 35.0, -80.0)
            .with_rupture(0.3, -0.2, 2.8 * KM);
        let geometry = SourceGeometry::Rectangular(rect);
        let a = discretize_source(&geometry, &DiscretizationPolicy::default(), &config()).unwrap();
        let b = discretize_source(&geometry, &DiscretizationPolicy::default(), &config()).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_rejects_bad_input() {
        let rect = RectangularSource::new(0.0, 0.0, 15.0 * KM, -1.0, 1.0);
        assert!(discretize_source(
            &SourceGeometry::Rectangular(rect),
            &DiscretizationPolicy::default(),
            &config()
        )
        .is_err());

        let rect = RectangularSource::new(0.0, 0.0, 15.0 * KM, 1.0, 1.0);
        let policy = DiscretizationPolicy {
            max_spacing_fraction: 0.0,
            min_subsources_per_side: 1,
        };
        assert!(discretize_source(&SourceGeometry::Rectangular(rect), &policy, &config()).is_err());

        let huge = RectangularSource::new(0.0, 0.0, 15.0 * KM, 1.0e9, 1.0e9);
        assert!(discretize_source(
            &SourceGeometry::Rectangular(huge),
            &DiscretizationPolicy::default(),
            &config()
        )
        .is_err());
    }
}
