//! Frame source parameter bundles.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::{ConfigError, parse_value};

/// Where frames come from.
#[derive(Debug, Clone, PartialEq)]
pub enum SourceMode {
    /// Sorted image files in a directory.
    Directory { path: PathBuf },
    /// Camera index, video file or stream URL (requires the `video` feature).
    Video { uri: String },
}

/// Settings fixed when the frame source is opened.
#[derive(Debug, Clone, PartialEq)]
pub struct SourceStartupConfig {
    pub mode: SourceMode,
    /// Whether an interactive view of the source parameters is wanted.
    pub display_gui: bool,
    /// Restart from the first frame when the input is exhausted.
    pub loop_input: bool,
    /// Optional playback rate; frames are reported not-ready until due.
    pub frame_rate: Option<f64>,
    /// Sleep applied by the run loop when the source is not ready.
    pub idle_backoff: Duration,
    /// Starting values for the live bundle.
    pub initial: SourceLiveConfig,
}

/// 16-bit to 8-bit conversion applied to every frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Normalization {
    /// Keep the upper byte.
    None,
    /// Linear stretch between clipped percentiles.
    #[default]
    Stretch,
    /// Histogram equalization.
    Equalize,
}

impl FromStr for Normalization {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "none" | "off" => Ok(Self::None),
            "stretch" => Ok(Self::Stretch),
            "equalize" | "equalise" => Ok(Self::Equalize),
            other => Err(format!("expected none, stretch or equalize, got `{other}`")),
        }
    }
}

/// Region of interest in source pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Roi {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl FromStr for Roi {
    type Err = String;

    /// Parses `x,y,width,height`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.split(',').map(str::trim).collect();
        if parts.len() != 4 {
            return Err(format!("expected x,y,width,height, got `{s}`"));
        }
        let mut values = [0u32; 4];
        for (slot, part) in values.iter_mut().zip(&parts) {
            *slot = part
                .parse()
                .map_err(|e| format!("`{part}` is not a pixel count: {e}"))?;
        }
        if values[2] == 0 || values[3] == 0 {
            return Err("roi width and height must be non-zero".to_string());
        }
        Ok(Self {
            x: values[0],
            y: values[1],
            width: values[2],
            height: values[3],
        })
    }
}

/// Source parameters re-read every iteration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SourceLiveConfig {
    pub normalization: Normalization,
    /// Fraction of pixels clipped at each end by [`Normalization::Stretch`].
    pub clip_fraction: f32,
    pub roi: Option<Roi>,
    /// While paused the source reports not-ready.
    pub paused: bool,
    /// Manual exposure for device backends; `None` leaves the device on auto.
    pub exposure: Option<f64>,
}

impl Default for SourceLiveConfig {
    fn default() -> Self {
        Self {
            normalization: Normalization::Stretch,
            clip_fraction: 0.01,
            roi: None,
            paused: false,
            exposure: None,
        }
    }
}

impl SourceLiveConfig {
    /// Parameter names accepted by [`Self::set_field`].
    pub const FIELDS: &'static [&'static str] =
        &["normalization", "clip_fraction", "roi", "paused", "exposure"];

    /// Derive the starting live bundle from the startup configuration.
    pub fn from_startup(startup: &SourceStartupConfig) -> Self {
        startup.initial.clone()
    }

    /// Check value ranges.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(0.0..0.5).contains(&self.clip_fraction) {
            return Err(ConfigError::invalid(
                "clip_fraction",
                format!("{} is outside [0, 0.5)", self.clip_fraction),
            ));
        }
        if let Some(roi) = self.roi {
            if roi.width == 0 || roi.height == 0 {
                return Err(ConfigError::invalid("roi", "width and height must be non-zero"));
            }
        }
        Ok(())
    }

    /// Assign one parameter from its textual form. The bundle is unchanged on error.
    pub fn set_field(&mut self, key: &str, value: &str) -> Result<(), ConfigError> {
        let mut next = self.clone();
        match key {
            "normalization" => next.normalization = parse_value(key, value)?,
            "clip_fraction" => next.clip_fraction = parse_value(key, value)?,
            "roi" => {
                next.roi = match value.trim() {
                    "none" | "off" | "" => None,
                    text => Some(parse_value(key, text)?),
                }
            }
            "paused" => next.paused = parse_value(key, value)?,
            "exposure" => {
                next.exposure = match value.trim() {
                    "auto" | "none" | "" => None,
                    text => Some(parse_value(key, text)?),
                }
            }
            other => return Err(ConfigError::UnknownField(other.to_string())),
        }
        next.validate()?;
        *self = next;
        Ok(())
    }
}

impl fmt::Display for SourceLiveConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "normalization={:?} clip_fraction={} roi=",
            self.normalization, self.clip_fraction
        )?;
        match self.roi {
            Some(roi) => write!(f, "{},{},{},{}", roi.x, roi.y, roi.width, roi.height)?,
            None => write!(f, "none")?,
        }
        write!(f, " paused={} exposure=", self.paused)?;
        match self.exposure {
            Some(exposure) => write!(f, "{exposure}"),
            None => write!(f, "auto"),
        }
    }
}
