//! Frame acquisition.
//!
//! A [`FrameSource`] is driven by the orchestrator once per iteration:
//! retrieve a raw frame, normalize it, and (when tracking) convert it to the
//! standard 8-bit representation handed to the tracker.

pub mod directory;
pub mod normalize;
#[cfg(feature = "video")]
pub mod video;

use anyhow::Result;
use image::{GrayImage, ImageBuffer, Luma};

use crate::config::{SourceLiveConfig, SourceMode, SourceStartupConfig};

pub use directory::DirectoryStream;

/// Raw single-channel frame at source bit depth, widened to 16 bits.
pub type RawFrame = ImageBuffer<Luma<u16>, Vec<u16>>;

/// Standard 8-bit grayscale frame consumed by the tracker.
pub type FrameBuffer = GrayImage;

/// Metadata travelling with a converted frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FrameMetadata {
    /// Sequence number of the frame within the source.
    pub index: u64,
    pub timestamp_ns: u64,
    /// Raw content is identical to the previous frame.
    pub duplicate: bool,
}

/// Result of asking the source for a raw frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Retrieval {
    /// A raw frame is held by the source.
    Ready,
    /// Nothing available yet; try again after a short pause.
    NotReady,
    /// Retrieval failed; the frame is skipped.
    Failed,
}

/// Producer of frames for the pipeline.
pub trait FrameSource: Send {
    /// False once the source is exhausted or has been asked to stop.
    fn wants_to_run(&self) -> bool;

    /// Apply the live parameter bundle. Called every iteration, usually with
    /// unchanged values, so it must be idempotent.
    fn apply_live_config(&mut self, config: &SourceLiveConfig) -> Result<()>;

    fn retrieve_raw_frame(&mut self) -> Retrieval;

    /// Internal per-frame processing on the retrieved raw frame
    /// (cropping, timestamping, duplicate detection).
    fn normalize_frame(&mut self);

    /// Produce the 8-bit frame and its metadata, consuming the pending frame.
    fn convert_to_standard_frame(&mut self) -> Option<(FrameBuffer, FrameMetadata)>;
}

/// Open the frame source described by the startup configuration.
pub fn open(startup: &SourceStartupConfig) -> Result<Box<dyn FrameSource>> {
    match &startup.mode {
        SourceMode::Directory { .. } => Ok(Box::new(DirectoryStream::open(startup)?)),
        #[cfg(feature = "video")]
        SourceMode::Video { .. } => Ok(Box::new(video::VideoStream::open(startup)?)),
        #[cfg(not(feature = "video"))]
        SourceMode::Video { uri } => {
            anyhow::bail!("video source {uri:?} requires building with the `video` feature")
        }
    }
}
