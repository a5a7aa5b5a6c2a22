//! Error types for gfstore.
//!
//! All errors are strongly typed using thiserror. Configuration problems
//! are described by [`ConfigError`] and surface through
//! [`GfError::InvalidConfig`]; everything else is a variant of [`GfError`].

use std::path::PathBuf;

use thiserror::Error;

/// Validation errors raised while checking a store configuration.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    #[error("Dimension '{dimension}': max ({max}) is smaller than min ({min})")]
    InvertedBounds {
        dimension: &'static str,
        min: f64,
        max: f64,
    },

    #[error("Dimension '{dimension}': delta must be positive and finite (got {delta})")]
    NonPositiveDelta {
        dimension: &'static str,
        delta: f64,
    },

    #[error("Dimension '{dimension}': extent {extent} is not an integer multiple of delta {delta}")]
    UnalignedExtent {
        dimension: &'static str,
        extent: f64,
        delta: f64,
    },

    #[error("Dimension '{dimension}': bounds must be finite")]
    NonFiniteBounds {
        dimension: &'static str,
    },

    #[error("Sample rate must be positive and finite (got {value})")]
    InvalidSampleRate {
        value: f64,
    },

    #[error("Unknown component scheme '{name}'")]
    UnknownScheme {
        name: String,
    },

    #[error("Phase definition id cannot be empty")]
    EmptyPhaseId,

    #[error("Duplicate phase definition id '{id}'")]
    DuplicatePhaseId {
        id: String,
    },

    #[error("Store id cannot be empty")]
    EmptyStoreId,

    #[error("Invalid extra metadata key '{key}'")]
    InvalidExtraKey {
        key: String,
    },

    #[error("Dimension '{dimension}': {steps} steps exceed the per-axis node limit")]
    AxisTooLong {
        dimension: &'static str,
        steps: f64,
    },

    #[error("Grid with {nrecords} records exceeds the addressable record range")]
    GridTooLarge {
        nrecords: u128,
    },

    #[error("Option '{field}' must be at least {min} (got {actual})")]
    OptionTooSmall {
        field: &'static str,
        min: u64,
        actual: u64,
    },
}

/// Top-level error type for gfstore.
#[derive(Debug, Error)]
pub enum GfError {
    #[error("Invalid configuration: {0}")]
    InvalidConfig(#[from] ConfigError),

    #[error("Store already exists at {path}")]
    AlreadyExists {
        path: PathBuf,
    },

    #[error("Not a store at {path}: {reason}")]
    NotAStore {
        path: PathBuf,
        reason: String,
    },

    #[error("Store at {path} is being populated by another writer (pid {holder:?})")]
    StoreLocked {
        path: PathBuf,
        holder: Option<u32>,
    },

    #[error("Corrupt store: {reason}")]
    CorruptStore {
        reason: String,
    },

    #[error("Key {value} out of range for dimension '{dimension}' [{min}, {max}]")]
    OutOfRange {
        dimension: &'static str,
        value: f64,
        min: f64,
        max: f64,
    },

    #[error("Record {irecord} is not populated")]
    NotFound {
        irecord: u64,
    },

    #[error("Operation '{operation}' requires an editable store")]
    ReadOnlyViolation {
        operation: &'static str,
    },

    #[error("Store handle is closed")]
    ClosedStore,

    #[error("Invalid input: {reason}")]
    InvalidInput {
        reason: String,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: {message}")]
    Internal {
        message: String,
    },
}

impl GfError {
    /// Creates a corrupt-store error.
    #[must_use]
    pub fn corrupt(reason: impl Into<String>) -> Self {
        Self::CorruptStore {
            reason: reason.into(),
        }
    }

    /// Creates an invalid-input error.
    #[must_use]
    pub fn invalid_input(reason: impl Into<String>) -> Self {
        Self::InvalidInput {
            reason: reason.into(),
        }
    }

    /// Creates an internal error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Returns true for configuration and integrity failures, which are never recovered locally.
    #[must_use]
    pub const fn is_integrity(&self) -> bool {
        matches!(
            self,
            Self::InvalidConfig(_) | Self::NotAStore { .. } | Self::CorruptStore { .. }
        )
    }

    /// Returns true if a query key fell outside the grid.
    #[must_use]
    pub const fn is_out_of_range(&self) -> bool {
        matches!(self, Self::OutOfRange { .. })
    }

    /// Returns true if a sparse grid node was requested.
    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// Returns true if the handle was misused (wrong lifecycle state).
    #[must_use]
    pub const fn is_state_violation(&self) -> bool {
        matches!(self, Self::ReadOnlyViolation { .. } | Self::ClosedStore)
    }

    /// Returns true if this error is retryable.
    ///
    /// Raw I/O failures and a busy writer lock may succeed on a later
    /// attempt; nothing is retried automatically.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Io(_) | Self::StoreLocked { .. })
    }
}

/// Result type alias for gfstore operations.
pub type GfResult<T> = Result<T, GfError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_error_message() {
        let err = ConfigError::NonPositiveDelta {
            dimension: "distance",
            delta: -1.0,
        };
        let msg = format!("{err}");
        assert!(msg.contains("distance"));
        assert!(msg.contains("-1"));
    }

    #[test]
    fn test_invalid_config_from_config_error() {
        let err: GfError = ConfigError::EmptyPhaseId.into();
        assert!(err.is_integrity());
        assert!(!err.is_retryable());
        assert!(format!("{err}").contains("Invalid configuration"));
    }

    #[test]
    fn test_out_of_range_message() {
        let err = GfError::OutOfRange {
            dimension: "source_depth",
            value: 25_000.0,
            min: 10_000.0,
            max: 20_000.0,
        };
        assert!(err.is_out_of_range());
        let msg = format!("{err}");
        assert!(msg.contains("source_depth"));
        assert!(msg.contains("25000"));
    }

    #[test]
    fn test_state_violations() {
        assert!(GfError::ClosedStore.is_state_violation());
        assert!(GfError::ReadOnlyViolation { operation: "put" }.is_state_violation());
        assert!(!GfError::NotFound { irecord: 3 }.is_state_violation());
    }

    #[test]
    fn test_io_is_retryable() {
        let err: GfError = std::io::Error::new(std::io::ErrorKind::Interrupted, "eintr").into();
        assert!(err.is_retryable());
        assert!(!GfError::corrupt("bad crc").is_retryable());
        assert!(GfError::corrupt("bad crc").is_integrity());
    }
}
