//! Tracker lifecycle.
//!
//! The tracker cannot be built until the first frame reveals the camera
//! geometry. The lifecycle has a single transition, taken at the calibration
//! gate:
//!
//! ```text
//! Unconfigured ──first converted frame──▶ Configured
//! ```
//!
//! `Disabled` is terminal and never transitions.

use std::fmt;

use anyhow::{Context, Result};
use tracing::info;

use crate::config::{CalibrationError, OutputTarget, TrackerStartupConfig};
use crate::tracking::{TrackerFactory, TrackerStage};

pub enum TrackerLifecycle {
    /// Tracking was not enabled at initialization.
    Disabled,
    /// Waiting for the first frame.
    Unconfigured(TrackerStartupConfig),
    /// Geometry resolved and tracker built.
    Configured {
        startup: TrackerStartupConfig,
        stage: Box<dyn TrackerStage>,
    },
}

/// Monotonic flags derived from [`TrackerLifecycle`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PipelineState {
    pub calibration_resolved: bool,
    pub tracker_linked: bool,
}

impl TrackerLifecycle {
    pub fn new(startup: TrackerStartupConfig) -> Self {
        if startup.enabled {
            Self::Unconfigured(startup)
        } else {
            Self::Disabled
        }
    }

    pub fn is_enabled(&self) -> bool {
        !matches!(self, Self::Disabled)
    }

    pub fn state(&self) -> PipelineState {
        match self {
            Self::Disabled | Self::Unconfigured(_) => PipelineState::default(),
            Self::Configured { .. } => PipelineState {
                calibration_resolved: true,
                tracker_linked: true,
            },
        }
    }

    /// Startup bundle, in whichever state holds one.
    pub fn startup(&self) -> Option<&TrackerStartupConfig> {
        match self {
            Self::Disabled => None,
            Self::Unconfigured(startup) | Self::Configured { startup, .. } => Some(startup),
        }
    }

    /// Calibration gate: resolve geometry from the frame size, build the
    /// tracker and point it at the output target.
    ///
    /// Does nothing unless the lifecycle is `Unconfigured`. On error the
    /// lifecycle stays `Unconfigured`.
    pub fn configure(
        &mut self,
        width: u32,
        height: u32,
        factory: &mut dyn TrackerFactory,
        output: &OutputTarget,
    ) -> Result<()> {
        let Self::Unconfigured(startup) = self else {
            return Ok(());
        };

        let mut resolved = startup.clone();
        resolved
            .camera
            .resolve(width, height)
            .with_context(|| format!("Failed to resolve camera geometry for {width}x{height} frames"))?;

        let mut stage = factory
            .build(&resolved)
            .context("Failed to construct tracker")?;
        stage.set_write_mode(output.mode);
        stage
            .set_output_location(output.directory.as_deref())
            .context("Failed to set tracker output location")?;

        if let Some(k) = resolved.camera.camera_matrix() {
            info!(
                "Calibration resolved: {}x{}, fx={:.1} fy={:.1} cx={:.1} cy={:.1}",
                width,
                height,
                k[(0, 0)],
                k[(1, 1)],
                k[(0, 2)],
                k[(1, 2)]
            );
        }
        *self = Self::Configured {
            startup: resolved,
            stage,
        };
        Ok(())
    }
}

impl fmt::Debug for TrackerLifecycle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Disabled => write!(f, "Disabled"),
            Self::Unconfigured(_) => write!(f, "Unconfigured"),
            Self::Configured { startup, .. } => {
                write!(f, "Configured({:?})", startup.camera.size())
            }
        }
    }
}

/// Distinguishes a calibration failure from other gate errors.
pub fn is_calibration_error(err: &anyhow::Error) -> bool {
    err.chain().any(|cause| cause.is::<CalibrationError>())
}
