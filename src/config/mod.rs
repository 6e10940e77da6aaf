//! Configuration: launch-file loading, command-line arguments, and the
//! startup/live parameter bundles for both pipeline stages.
//!
//! Startup bundles are fixed once the launch file is parsed. Live bundles are
//! derived from them and may be changed by a controller while the pipeline
//! runs (see [`crate::system::live`]).

pub mod args;
pub mod launch;
pub mod source;
pub mod tracker;

use thiserror::Error;

pub use args::{OutputTarget, RunArgs, WriteMode};
pub use launch::LaunchConfig;
pub use source::{Normalization, Roi, SourceLiveConfig, SourceMode, SourceStartupConfig};
pub use tracker::{
    CalibrationError, CameraGeometry, DetectorKind, TrackerLiveConfig, TrackerStartupConfig,
};

/// Errors raised while loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read launch file {path:?}")]
    Read {
        path: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse launch file {path:?}")]
    Parse {
        path: std::path::PathBuf,
        #[source]
        source: serde_yaml::Error,
    },
    #[error("launch file has no `{0}` section")]
    MissingSection(&'static str),
    #[error("invalid value for `{field}`: {reason}")]
    InvalidField { field: String, reason: String },
    #[error("unknown parameter `{0}`")]
    UnknownField(String),
}

impl ConfigError {
    pub(crate) fn invalid(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidField {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

/// Parse a single live-parameter value, mapping failures to [`ConfigError`].
pub(crate) fn parse_value<T>(field: &str, value: &str) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    value
        .trim()
        .parse::<T>()
        .map_err(|e| ConfigError::invalid(field, e.to_string()))
}
