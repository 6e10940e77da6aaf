//! YAML launch file loading.
//!
//! ```yaml
//! source:
//!   mode: directory          # directory | video
//!   path: frames/            # relative to the launch file
//!   display_gui: false
//!   loop_input: false
//!   frame_rate: 25.0
//!   idle_backoff_ms: 2
//!   live:
//!     normalization: stretch
//!     clip_fraction: 0.01
//! tracker:
//!   enabled: true
//!   display_gui: true
//!   camera:
//!     fov_deg: 60.0
//!     # intrinsics: [fx, fy, cx, cy]
//!     # calibrated_size: [640, 480]
//!   live:
//!     detector: fast
//!     sensitivity: 20.0
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use tracing::info;

use super::ConfigError;
use super::source::{SourceLiveConfig, SourceMode, SourceStartupConfig};
use super::tracker::{CameraGeometry, DEFAULT_FOV_DEG, TrackerLiveConfig, TrackerStartupConfig};

const DEFAULT_IDLE_BACKOFF_MS: u64 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
enum SourceKind {
    Directory,
    Video,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
struct SourceSection {
    mode: SourceKind,
    path: Option<PathBuf>,
    uri: Option<String>,
    #[serde(default)]
    display_gui: bool,
    #[serde(default)]
    loop_input: bool,
    frame_rate: Option<f64>,
    #[serde(default = "default_idle_backoff_ms")]
    idle_backoff_ms: u64,
    #[serde(default)]
    live: SourceLiveConfig,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct CameraSection {
    intrinsics: Option<[f64; 4]>,
    calibrated_size: Option<[u32; 2]>,
    fov_deg: Option<f64>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
struct TrackerSection {
    #[serde(default = "enabled_by_default")]
    enabled: bool,
    #[serde(default)]
    display_gui: bool,
    #[serde(default)]
    camera: CameraSection,
    #[serde(default)]
    live: TrackerLiveConfig,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct LaunchFile {
    source: Option<SourceSection>,
    tracker: Option<TrackerSection>,
}

fn default_idle_backoff_ms() -> u64 {
    DEFAULT_IDLE_BACKOFF_MS
}

fn enabled_by_default() -> bool {
    true
}

/// A parsed launch file, from which the startup bundles are derived.
#[derive(Debug)]
pub struct LaunchConfig {
    path: PathBuf,
    source: Option<SourceSection>,
    tracker: Option<TrackerSection>,
}

impl LaunchConfig {
    /// Read and parse a launch file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml_str(&text, path)
    }

    /// Parse launch file contents. `path` anchors relative paths.
    pub fn from_yaml_str(text: &str, path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref().to_path_buf();
        let file: LaunchFile =
            serde_yaml::from_str(text).map_err(|source| ConfigError::Parse {
                path: path.clone(),
                source,
            })?;
        Ok(Self {
            path,
            source: file.source,
            tracker: file.tracker,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Derive the frame source startup bundle. The `source` section is mandatory.
    pub fn source_startup(&self) -> Result<SourceStartupConfig, ConfigError> {
        let section = self
            .source
            .as_ref()
            .ok_or(ConfigError::MissingSection("source"))?;

        let mode = match section.mode {
            SourceKind::Directory => {
                let path = section
                    .path
                    .as_ref()
                    .ok_or_else(|| ConfigError::invalid("source.path", "required for directory mode"))?;
                SourceMode::Directory {
                    path: self.anchor(path),
                }
            }
            SourceKind::Video => {
                let uri = section
                    .uri
                    .clone()
                    .filter(|uri| !uri.trim().is_empty())
                    .ok_or_else(|| ConfigError::invalid("source.uri", "required for video mode"))?;
                SourceMode::Video { uri }
            }
        };

        if let Some(rate) = section.frame_rate {
            if !(rate > 0.0 && rate.is_finite()) {
                return Err(ConfigError::invalid(
                    "source.frame_rate",
                    format!("{rate} is not a positive rate"),
                ));
            }
            Duration::try_from_secs_f64(1.0 / rate).map_err(|e| {
                ConfigError::invalid(
                    "source.frame_rate",
                    format!("{rate} Hz has no usable frame interval: {e}"),
                )
            })?;
        }
        section.live.validate()?;

        Ok(SourceStartupConfig {
            mode,
            display_gui: section.display_gui,
            loop_input: section.loop_input,
            frame_rate: section.frame_rate,
            idle_backoff: Duration::from_millis(section.idle_backoff_ms),
            initial: section.live.clone(),
        })
    }

    /// Derive the tracker startup bundle. A missing `tracker` section disables tracking.
    pub fn tracker_startup(&self) -> Result<TrackerStartupConfig, ConfigError> {
        let Some(section) = self.tracker.as_ref() else {
            return Ok(TrackerStartupConfig::default());
        };

        section.live.validate()?;
        let camera = &section.camera;
        let fov_deg = camera.fov_deg.unwrap_or(DEFAULT_FOV_DEG);
        if camera.intrinsics.is_none() && !(fov_deg > 0.0 && fov_deg < 180.0) {
            return Err(ConfigError::invalid(
                "tracker.camera.fov_deg",
                format!("{fov_deg} is outside (0, 180)"),
            ));
        }

        Ok(TrackerStartupConfig {
            enabled: section.enabled,
            display_gui: section.display_gui,
            camera: CameraGeometry::new(
                camera.intrinsics,
                camera.calibrated_size.map(|[w, h]| (w, h)),
                fov_deg,
            ),
            initial: section.live.clone(),
        })
    }

    /// Log what was loaded.
    pub fn log_summary(&self) {
        info!("Launch file: {}", self.path.display());
        match &self.source {
            Some(source) => info!(
                "  source: mode={:?} path={:?} uri={:?} loop={} rate={:?} gui={}",
                source.mode,
                source.path,
                source.uri,
                source.loop_input,
                source.frame_rate,
                source.display_gui
            ),
            None => info!("  source: <missing>"),
        }
        match &self.tracker {
            Some(tracker) => info!(
                "  tracker: enabled={} gui={} {}",
                tracker.enabled, tracker.display_gui, tracker.live
            ),
            None => info!("  tracker: <absent, tracking disabled>"),
        }
    }

    fn anchor(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            return path.to_path_buf();
        }
        match self.path.parent() {
            Some(dir) => dir.join(path),
            None => path.to_path_buf(),
        }
    }
}
