//! Store configuration.
//!
//! A [`StoreConfig`] describes the discretization grid, the sampling rate,
//! the component scheme and the tabulated phase definitions of a store. It is
//! written once when the store is created and never changes afterwards.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ConfigError;

/// Relative tolerance used when checking that an extent is a multiple of its step.
const ALIGNMENT_TOLERANCE: f64 = 1e-6;

/// Largest number of steps a single axis may span.
const MAX_AXIS_STEPS: f64 = 4_294_967_295.0;

/// One regularly sampled grid axis, in metres.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Dimension {
    /// Lowest node value.
    pub min: f64,
    /// Highest node value.
    pub max: f64,
    /// Node spacing.
    pub delta: f64,
}

impl Dimension {
    /// Creates a dimension spanning `[min, max]` with step `delta`.
    #[must_use]
    pub const fn new(min: f64, max: f64, delta: f64) -> Self {
        Self { min, max, delta }
    }

    /// Creates a single-node dimension at `value`.
    ///
    /// `delta` still defines the half-cell tolerance used by lookups.
    #[must_use]
    pub const fn fixed(value: f64, delta: f64) -> Self {
        Self {
            min: value,
            max: value,
            delta,
        }
    }

    /// Checks bounds, step and alignment.
    pub fn validate(&self, name: &'static str) -> Result<(), ConfigError> {
        if !self.min.is_finite() || !self.max.is_finite() {
            return Err(ConfigError::NonFiniteBounds { dimension: name });
        }
        if !(self.delta.is_finite() && self.delta > 0.0) {
            return Err(ConfigError::NonPositiveDelta {
                dimension: name,
                delta: self.delta,
            });
        }
        if self.max < self.min {
            return Err(ConfigError::InvertedBounds {
                dimension: name,
                min: self.min,
                max: self.max,
            });
        }
        let steps = (self.max - self.min) / self.delta;
        if !steps.is_finite() || steps > MAX_AXIS_STEPS {
            return Err(ConfigError::AxisTooLong {
                dimension: name,
                steps,
            });
        }
        if (steps - steps.round()).abs() > ALIGNMENT_TOLERANCE {
            return Err(ConfigError::UnalignedExtent {
                dimension: name,
                extent: self.max - self.min,
                delta: self.delta,
            });
        }
        Ok(())
    }

    /// Number of nodes along this axis. Only meaningful after [`Dimension::validate`].
    #[must_use]
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    pub fn count(&self) -> usize {
        (((self.max - self.min) / self.delta)
            .round()
            .clamp(0.0, MAX_AXIS_STEPS) as usize)
            .saturating_add(1)
    }

    /// Value of node `index`.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn value(&self, index: usize) -> f64 {
        self.min + index as f64 * self.delta
    }
}

/// Physical meaning of a stored component.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComponentKind {
    /// A time series.
    Waveform,
    /// A single time-independent value.
    Static,
}

/// Output component of a synthesized seismogram (north, east, down).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum OutputComponent {
    /// North displacement.
    North,
    /// East displacement.
    East,
    /// Downward displacement.
    Down,
}

impl OutputComponent {
    /// Short channel code.
    #[must_use]
    pub const fn code(self) -> &'static str {
        match self {
            Self::North => "N",
            Self::East => "E",
            Self::Down => "D",
        }
    }
}

impl fmt::Display for OutputComponent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// Closed set of recognized component schemes.
///
/// The scheme fixes how many components are stored per grid node and what
/// each of them means. Everything scheme-specific is resolved by matching on
/// this enum; the moment-tensor weighting lives in [`crate::sum_params`].
///
/// Acoustic schemes (`acoustic2`, `acoustic5`) store pressure responses that
/// cannot be projected onto north/east/down displacement. They are not
/// members of this set; parsing their names fails with
/// [`ConfigError::UnknownScheme`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComponentScheme {
    /// Full moment tensor, near- and far-field; ten waveform components.
    Elastic10,
    /// Deviatoric far-field moment tensor; eight waveform components.
    Elastic8,
    /// Isotropic (explosion) sources only; two waveform components.
    Elastic2,
    /// Ten-component scheme holding permanent (static) displacements.
    StaticElastic10,
}

impl ComponentScheme {
    /// All recognized schemes.
    pub const ALL: [Self; 4] = [
        Self::Elastic10,
        Self::Elastic8,
        Self::Elastic2,
        Self::StaticElastic10,
    ];

    /// Canonical name as written in store configurations.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Elastic10 => "elastic10",
            Self::Elastic8 => "elastic8",
            Self::Elastic2 => "elastic2",
            Self::StaticElastic10 => "static_elastic10",
        }
    }

    /// Number of stored components per grid node.
    #[must_use]
    pub const fn ncomponents(self) -> usize {
        match self {
            Self::Elastic10 | Self::StaticElastic10 => 10,
            Self::Elastic8 => 8,
            Self::Elastic2 => 2,
        }
    }

    /// Kind of the stored component at `icomponent`.
    #[must_use]
    pub const fn component_kind(self, _icomponent: usize) -> ComponentKind {
        match self {
            Self::Elastic10 | Self::Elastic8 | Self::Elastic2 => ComponentKind::Waveform,
            Self::StaticElastic10 => ComponentKind::Static,
        }
    }

    /// Output components this scheme can synthesize.
    #[must_use]
    pub const fn output_components(self) -> &'static [OutputComponent] {
        &[OutputComponent::North, OutputComponent::East, OutputComponent::Down]
    }
}

impl fmt::Display for ComponentScheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for ComponentScheme {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|scheme| scheme.name() == wanted)
            .ok_or_else(|| ConfigError::UnknownScheme { name: s.to_string() })
    }
}

/// Named phase or timing definition, e.g. `begin = "p,P"`.
///
/// Definitions are kept as opaque strings; travel-time evaluation happens elsewhere.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhaseDef {
    /// Phase identifier, unique within a store.
    pub id: String,
    /// Phase definition string.
    pub definition: String,
}

impl PhaseDef {
    /// Creates a phase definition.
    #[must_use]
    pub fn new(id: impl Into<String>, definition: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            definition: definition.into(),
        }
    }
}

/// Immutable description of a Green's function store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Human-readable store id.
    pub id: String,
    /// Store identity, assigned at creation when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uuid: Option<Uuid>,
    /// Simulation code that produced the records.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub modelling_code_id: Option<String>,
    /// Reference to the layered earth model used.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub earthmodel: Option<String>,
    /// Samples per second.
    pub sample_rate: f64,
    /// Component scheme of the stored records.
    pub component_scheme: ComponentScheme,
    /// Receiver depth axis.
    pub receiver_depth: Dimension,
    /// Source depth axis.
    pub source_depth: Dimension,
    /// Horizontal source-receiver distance axis.
    pub distance: Dimension,
    /// Tabulated phase definitions.
    #[serde(default)]
    pub tabulated_phases: Vec<PhaseDef>,
}

impl StoreConfig {
    /// Creates a configuration without phases or model references.
    #[must_use]
    pub fn new(
        id: impl Into<String>,
        component_scheme: ComponentScheme,
        sample_rate: f64,
        receiver_depth: Dimension,
        source_depth: Dimension,
        distance: Dimension,
    ) -> Self {
        Self {
            id: id.into(),
            uuid: None,
            modelling_code_id: None,
            earthmodel: None,
            sample_rate,
            component_scheme,
            receiver_depth,
            source_depth,
            distance,
            tabulated_phases: Vec::new(),
        }
    }

    /// Adds a tabulated phase definition.
    #[must_use]
    pub fn with_phase(mut self, phase: PhaseDef) -> Self {
        self.tabulated_phases.push(phase);
        self
    }

    /// Sets the earth model reference.
    #[must_use]
    pub fn with_earthmodel(mut self, earthmodel: impl Into<String>) -> Self {
        self.earthmodel = Some(earthmodel.into());
        self
    }

    /// Sets the modelling code id.
    #[must_use]
    pub fn with_modelling_code(mut self, code: impl Into<String>) -> Self {
        self.modelling_code_id = Some(code.into());
        self
    }

    /// Validates the whole configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.id.trim().is_empty() {
            return Err(ConfigError::EmptyStoreId);
        }
        if !(self.sample_rate.is_finite() && self.sample_rate > 0.0) {
            return Err(ConfigError::InvalidSampleRate {
                value: self.sample_rate,
            });
        }
        self.receiver_depth.validate("receiver_depth")?;
        self.source_depth.validate("source_depth")?;
        self.distance.validate("distance")?;

        let mut seen = std::collections::HashSet::new();
        for phase in &self.tabulated_phases {
            if phase.id.trim().is_empty() {
                return Err(ConfigError::EmptyPhaseId);
            }
            if !seen.insert(phase.id.as_str()) {
                return Err(ConfigError::DuplicatePhaseId {
                    id: phase.id.clone(),
                });
            }
        }

        let nrecords = [
            self.receiver_depth.count(),
            self.source_depth.count(),
            self.distance.count(),
            self.ncomponents(),
        ]
        .iter()
        .fold(1u128, |acc, &n| acc.saturating_mul(n as u128));
        if nrecords > u128::from(u32::MAX) {
            return Err(ConfigError::GridTooLarge { nrecords });
        }
        Ok(())
    }

    /// Sampling interval in seconds.
    #[must_use]
    pub fn deltat(&self) -> f64 {
        1.0 / self.sample_rate
    }

    /// Number of stored components per grid node.
    #[must_use]
    pub const fn ncomponents(&self) -> usize {
        self.component_scheme.ncomponents()
    }

    /// Looks up a phase definition by id.
    #[must_use]
    pub fn phase(&self, id: &str) -> Option<&PhaseDef> {
        self.tabulated_phases.iter().find(|p| p.id == id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const KM: f64 = 1000.0;

    fn sample_config() -> StoreConfig {
        StoreConfig::new(
            "test_store",
            ComponentScheme::Elastic10,
            0.25,
            Dimension::fixed(0.0, 1.0 * KM),
            Dimension::new(10.0 * KM, 20.0 * KM, 1.0 * KM),
            Dimension::new(0.0, 20.0 * KM, 2.5 * KM),
        )
        .with_phase(PhaseDef::new("begin", "p,P,p\\,P\\"))
        .with_phase(PhaseDef::new("end", "2.5"))
    }

    #[test]
    fn test_valid_config() {
        let config = sample_config();
        config.validate().unwrap();
        assert_eq!(config.distance.count(), 9);
        assert_eq!(config.source_depth.count(), 11);
        assert_eq!(config.receiver_depth.count(), 1);
        assert_eq!(config.ncomponents(), 10);
        assert!((config.deltat() - 4.0).abs() < 1e-12);
        assert_eq!(config.phase("end").unwrap().definition, "2.5");
    }

    #[test]
    fn test_rejects_unaligned_extent() {
        let mut config = sample_config();
        config.distance = Dimension::new(0.0, 20.0 * KM, 3.0 * KM);
        let err = config.validate().unwrap_err();
        assert!(matches!(err, ConfigError::UnalignedExtent { dimension: "distance", .. }));
    }

    #[test]
    fn test_rejects_bad_delta_and_bounds() {
        let mut config = sample_config();
        config.source_depth = Dimension::new(10.0, 20.0, 0.0);
        assert!(matches!(
            config.validate(),
            Err(ConfigError::NonPositiveDelta { .. })
        ));

        config.source_depth = Dimension::new(20.0, 10.0, 1.0);
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvertedBounds { .. })
        ));
    }

    #[test]
    fn test_rejects_axis_with_too_many_nodes() {
        let mut config = sample_config();
        config.distance = Dimension::new(0.0, 1.0e20, 1.0);
        assert!(matches!(
            config.validate(),
            Err(ConfigError::AxisTooLong { dimension: "distance", .. })
        ));

        config.distance = Dimension::new(0.0, 1.0, 1.0e-300);
        assert!(matches!(
            config.validate(),
            Err(ConfigError::AxisTooLong { .. })
        ));

        // Each axis fits, but the product does not.
        config.distance = Dimension::new(0.0, 100_000.0, 1.0);
        config.source_depth = Dimension::new(0.0, 100_000.0, 1.0);
        assert!(matches!(
            config.validate(),
            Err(ConfigError::GridTooLarge { .. })
        ));
    }

    #[test]
    fn test_count_saturates_on_unvalidated_axis() {
        let dim = Dimension::new(0.0, 1.0e20, 1.0);
        assert_eq!(dim.count(), 4_294_967_296);
    }

    #[test]
    fn test_rejects_bad_sample_rate() {
        let mut config = sample_config();
        config.sample_rate = 0.0;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidSampleRate { .. })
        ));
    }

    #[test]
    fn test_rejects_duplicate_phase() {
        let config = sample_config().with_phase(PhaseDef::new("begin", "S"));
        assert!(matches!(
            config.validate(),
            Err(ConfigError::DuplicatePhaseId { .. })
        ));
    }

    #[test]
    fn test_scheme_parsing() {
        assert_eq!("elastic10".parse::<ComponentScheme>().unwrap(), ComponentScheme::Elastic10);
        assert_eq!(
            "Static_Elastic10".parse::<ComponentScheme>().unwrap(),
            ComponentScheme::StaticElastic10
        );
        for name in ["acoustic2", "acoustic5"] {
            assert!(matches!(
                name.parse::<ComponentScheme>(),
                Err(ConfigError::UnknownScheme { .. })
            ));
        }
        assert_eq!(ComponentScheme::Elastic2.ncomponents(), 2);
        assert_eq!(
            ComponentScheme::StaticElastic10.component_kind(3),
            ComponentKind::Static
        );
    }

    #[test]
    fn test_config_json_roundtrip() {
        let config = sample_config();
        let json = serde_json::to_string(&config).unwrap();
        assert!(json.contains("\"elastic10\""));
        let back: StoreConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back, config);
    }
}
