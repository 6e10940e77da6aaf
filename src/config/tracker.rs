//! Tracker parameter bundles and camera geometry.

use std::fmt;
use std::str::FromStr;

use nalgebra::{Matrix3, Vector3};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::{ConfigError, parse_value};

/// Field of view assumed when no intrinsics are configured.
pub const DEFAULT_FOV_DEG: f64 = 60.0;

/// Failures while deriving geometry from the first frame.
#[derive(Debug, Error, PartialEq)]
pub enum CalibrationError {
    #[error("frame has zero size ({width}x{height})")]
    ZeroSize { width: u32, height: u32 },
    #[error("field of view {0} deg is outside (0, 180)")]
    InvalidFov(f64),
    #[error("focal lengths must be positive (fx={fx}, fy={fy})")]
    NonPositiveFocal { fx: f64, fy: f64 },
    #[error("camera matrix is singular")]
    Singular,
    #[error("camera geometry was already resolved")]
    AlreadyResolved,
}

/// Camera model completed from the first observed frame.
///
/// Frame size and everything derived from it stay unset until
/// [`CameraGeometry::resolve`] succeeds, and are never reset afterwards.
#[derive(Debug, Clone, PartialEq)]
pub struct CameraGeometry {
    /// Configured pinhole intrinsics `[fx, fy, cx, cy]`.
    pub intrinsics: Option<[f64; 4]>,
    /// Image size the intrinsics were calibrated at.
    pub calibrated_size: Option<(u32, u32)>,
    /// Horizontal field of view used when no intrinsics are given.
    pub fov_deg: f64,
    resolved: Option<ResolvedGeometry>,
}

#[derive(Debug, Clone, PartialEq)]
struct ResolvedGeometry {
    width: u32,
    height: u32,
    k: Matrix3<f64>,
    k_inv: Matrix3<f64>,
}

impl Default for CameraGeometry {
    fn default() -> Self {
        Self::new(None, None, DEFAULT_FOV_DEG)
    }
}

impl CameraGeometry {
    pub fn new(
        intrinsics: Option<[f64; 4]>,
        calibrated_size: Option<(u32, u32)>,
        fov_deg: f64,
    ) -> Self {
        Self {
            intrinsics,
            calibrated_size,
            fov_deg,
            resolved: None,
        }
    }

    pub fn is_resolved(&self) -> bool {
        self.resolved.is_some()
    }

    /// Frame size `(width, height)`, once resolved.
    pub fn size(&self) -> Option<(u32, u32)> {
        self.resolved.as_ref().map(|r| (r.width, r.height))
    }

    /// Derived camera matrix K, once resolved.
    pub fn camera_matrix(&self) -> Option<&Matrix3<f64>> {
        self.resolved.as_ref().map(|r| &r.k)
    }

    /// Populate the frame size and derive the camera matrix.
    pub fn resolve(&mut self, width: u32, height: u32) -> Result<(), CalibrationError> {
        if self.resolved.is_some() {
            return Err(CalibrationError::AlreadyResolved);
        }
        if width == 0 || height == 0 {
            return Err(CalibrationError::ZeroSize { width, height });
        }

        let (w, h) = (width as f64, height as f64);
        let [fx, fy, cx, cy] = match self.intrinsics {
            Some([fx, fy, cx, cy]) => {
                // Rescale intrinsics calibrated at a different resolution.
                let (sx, sy) = match self.calibrated_size {
                    Some((cw, ch)) if cw > 0 && ch > 0 => (w / cw as f64, h / ch as f64),
                    _ => (1.0, 1.0),
                };
                [fx * sx, fy * sy, cx * sx, cy * sy]
            }
            None => {
                if !(self.fov_deg > 0.0 && self.fov_deg < 180.0) {
                    return Err(CalibrationError::InvalidFov(self.fov_deg));
                }
                let f = 0.5 * w / (0.5 * self.fov_deg.to_radians()).tan();
                [f, f, 0.5 * (w - 1.0), 0.5 * (h - 1.0)]
            }
        };

        if !(fx > 0.0 && fy > 0.0) {
            return Err(CalibrationError::NonPositiveFocal { fx, fy });
        }

        let k = Matrix3::new(fx, 0.0, cx, 0.0, fy, cy, 0.0, 0.0, 1.0);
        let k_inv = k.try_inverse().ok_or(CalibrationError::Singular)?;

        self.resolved = Some(ResolvedGeometry {
            width,
            height,
            k,
            k_inv,
        });
        Ok(())
    }

    /// Map a pixel to normalized image coordinates with K⁻¹.
    pub fn normalize_point(&self, x: f64, y: f64) -> Option<(f64, f64)> {
        let resolved = self.resolved.as_ref()?;
        let p = resolved.k_inv * Vector3::new(x, y, 1.0);
        Some((p.x / p.z, p.y / p.z))
    }
}

/// Corner detector used to seed new tracks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DetectorKind {
    #[default]
    Fast,
    Harris,
    /// No new features are detected; existing tracks continue.
    Off,
}

impl DetectorKind {
    /// Detectors that are painfully slow without optimizations.
    pub fn is_slow_unoptimized(self) -> bool {
        matches!(self, Self::Harris)
    }
}

impl FromStr for DetectorKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "fast" => Ok(Self::Fast),
            "harris" => Ok(Self::Harris),
            "off" | "none" => Ok(Self::Off),
            other => Err(format!("expected fast, harris or off, got `{other}`")),
        }
    }
}

/// Tracker parameters re-read every cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TrackerLiveConfig {
    pub detector: DetectorKind,
    /// FAST intensity threshold, or Harris response threshold scale.
    pub sensitivity: f32,
    pub max_features: usize,
    /// Re-detect when fewer tracks than this survive.
    pub min_features: usize,
    /// Half-size of the search window in pixels.
    pub search_radius: u32,
    /// Half-size of the matching patch in pixels.
    pub patch_radius: u32,
    /// Largest mean absolute patch difference accepted as a match.
    pub max_match_error: f32,
}

impl Default for TrackerLiveConfig {
    fn default() -> Self {
        Self {
            detector: DetectorKind::Fast,
            sensitivity: 20.0,
            max_features: 300,
            min_features: 100,
            search_radius: 8,
            patch_radius: 3,
            max_match_error: 12.0,
        }
    }
}

impl TrackerLiveConfig {
    pub const FIELDS: &'static [&'static str] = &[
        "detector",
        "sensitivity",
        "max_features",
        "min_features",
        "search_radius",
        "patch_radius",
        "max_match_error",
    ];

    pub fn from_startup(startup: &TrackerStartupConfig) -> Self {
        startup.initial.clone()
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.sensitivity > 0.0) {
            return Err(ConfigError::invalid("sensitivity", "must be positive"));
        }
        if self.min_features > self.max_features {
            return Err(ConfigError::invalid(
                "min_features",
                format!("{} exceeds max_features {}", self.min_features, self.max_features),
            ));
        }
        if !(1..=32).contains(&self.search_radius) {
            return Err(ConfigError::invalid("search_radius", "must be in 1..=32"));
        }
        if !(1..=8).contains(&self.patch_radius) {
            return Err(ConfigError::invalid("patch_radius", "must be in 1..=8"));
        }
        if !(self.max_match_error >= 0.0) {
            return Err(ConfigError::invalid("max_match_error", "must be non-negative"));
        }
        Ok(())
    }

    /// Assign one parameter from its textual form. The bundle is unchanged on error.
    pub fn set_field(&mut self, key: &str, value: &str) -> Result<(), ConfigError> {
        let mut next = self.clone();
        match key {
            "detector" => next.detector = parse_value(key, value)?,
            "sensitivity" => next.sensitivity = parse_value(key, value)?,
            "max_features" => next.max_features = parse_value(key, value)?,
            "min_features" => next.min_features = parse_value(key, value)?,
            "search_radius" => next.search_radius = parse_value(key, value)?,
            "patch_radius" => next.patch_radius = parse_value(key, value)?,
            "max_match_error" => next.max_match_error = parse_value(key, value)?,
            other => return Err(ConfigError::UnknownField(other.to_string())),
        }
        next.validate()?;
        *self = next;
        Ok(())
    }
}

impl fmt::Display for TrackerLiveConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "detector={:?} sensitivity={} features={}..{} search_radius={} patch_radius={} max_match_error={}",
            self.detector,
            self.sensitivity,
            self.min_features,
            self.max_features,
            self.search_radius,
            self.patch_radius,
            self.max_match_error
        )
    }
}

/// Settings fixed when the tracker is built.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct TrackerStartupConfig {
    pub enabled: bool,
    /// Whether an interactive view of the tracker parameters is wanted.
    pub display_gui: bool,
    pub camera: CameraGeometry,
    pub initial: TrackerLiveConfig,
}
