//! Decoded store records and stacked output traces.

use serde::{Deserialize, Serialize};

use crate::config::ComponentKind;

/// One decoded Green's function record (one grid node, one component).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Record {
    /// Populated record whose samples are all zero.
    Zero,
    /// Time series starting at absolute sample index `itmin`.
    Waveform {
        /// Onset, in samples.
        itmin: i32,
        /// Sample values.
        samples: Vec<f32>,
    },
    /// Time-independent value.
    Static {
        /// The value.
        value: f32,
    },
}

impl Record {
    /// Creates a waveform record.
    #[must_use]
    pub fn waveform(itmin: i32, samples: Vec<f32>) -> Self {
        Self::Waveform { itmin, samples }
    }

    /// Creates a static record.
    #[must_use]
    pub const fn static_value(value: f32) -> Self {
        Self::Static { value }
    }

    /// Value at absolute sample index `it`.
    ///
    /// Waveforms are zero outside their span; static records hold their value
    /// at every index.
    #[inline]
    #[must_use]
    pub fn value_at(&self, it: i64) -> f32 {
        match self {
            Self::Zero => 0.0,
            Self::Static { value } => *value,
            Self::Waveform { itmin, samples } => {
                it.checked_sub(i64::from(*itmin))
                    .and_then(|offset| usize::try_from(offset).ok())
                    .and_then(|i| samples.get(i))
                    .copied()
                    .unwrap_or(0.0)
            }
        }
    }

    /// Sample span `[start, end)` of a waveform; `None` for zero and static records.
    #[must_use]
    pub fn span(&self) -> Option<(i64, i64)> {
        match self {
            Self::Waveform { itmin, samples } if !samples.is_empty() => {
                let start = i64::from(*itmin);
                Some((start, start + samples.len() as i64))
            }
            _ => None,
        }
    }

    /// Whether this record may be stored under a component of `kind`.
    #[must_use]
    pub const fn fits(&self, kind: ComponentKind) -> bool {
        match self {
            Self::Zero => true,
            Self::Waveform { .. } => matches!(kind, ComponentKind::Waveform),
            Self::Static { .. } => matches!(kind, ComponentKind::Static),
        }
    }

    /// Approximate in-memory footprint, used for cache accounting.
    #[must_use]
    pub fn size_bytes(&self) -> usize {
        let payload = match self {
            Self::Waveform { samples, .. } => samples.len() * std::mem::size_of::<f32>(),
            Self::Zero | Self::Static { .. } => 0,
        };
        std::mem::size_of::<Self>() + payload
    }
}

/// Stacked output trace on an absolute sample axis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Waveform {
    /// Absolute index of the first sample.
    pub itmin: i64,
    /// Sampling interval in seconds.
    pub deltat: f64,
    /// Sample values.
    pub values: Vec<f64>,
}

impl Waveform {
    /// Number of samples.
    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Whether the trace holds no samples.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Value at absolute sample index `it`; zero outside the trace.
    #[must_use]
    pub fn value_at(&self, it: i64) -> f64 {
        usize::try_from(it - self.itmin)
            .ok()
            .and_then(|i| self.values.get(i))
            .copied()
            .unwrap_or(0.0)
    }

    /// Time of the first sample in seconds.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn tmin(&self) -> f64 {
        self.itmin as f64 * self.deltat
    }

    /// Sample times in seconds.
    #[allow(clippy::cast_precision_loss)]
    pub fn times(&self) -> impl Iterator<Item = f64> + '_ {
        (0..self.values.len()).map(move |i| (self.itmin + i as i64) as f64 * self.deltat)
    }
}
