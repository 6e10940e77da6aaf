//! Live capture through OpenCV: camera index, video file, or stream URL.

use anyhow::{Result, bail};
use opencv::core::Mat;
use opencv::imgproc;
use opencv::prelude::*;
use opencv::videoio::{self, VideoCapture};
use tracing::{debug, info, warn};

use super::normalize::{crop, same_content, to_8bit};
use super::{FrameBuffer, FrameMetadata, FrameSource, RawFrame, Retrieval};
use crate::config::{SourceLiveConfig, SourceMode, SourceStartupConfig};

/// Consecutive read failures after which the capture is considered finished.
const MAX_CONSECUTIVE_FAILURES: u32 = 100;

pub struct VideoStream {
    uri: String,
    cap: VideoCapture,
    live: SourceLiveConfig,
    applied_exposure: Option<Option<f64>>,
    frame: Mat,
    gray: Mat,
    raw: Option<(RawFrame, u64)>,
    pending: Option<(RawFrame, FrameMetadata)>,
    previous: Option<RawFrame>,
    frames_normalized: u64,
    consecutive_failures: u32,
    exhausted: bool,
}

// SAFETY: the capture handle and scratch matrices are owned exclusively by
// this stream and only touched from the thread currently driving it.
unsafe impl Send for VideoStream {}

impl VideoStream {
    pub fn open(startup: &SourceStartupConfig) -> Result<Self> {
        let SourceMode::Video { uri } = &startup.mode else {
            bail!("video stream opened with non-video mode {:?}", startup.mode);
        };
        let cap = open_capture(uri)?;
        info!("Video stream opened: {}", uri);

        Ok(Self {
            uri: uri.clone(),
            cap,
            live: SourceLiveConfig::from_startup(startup),
            applied_exposure: None,
            frame: Mat::default(),
            gray: Mat::default(),
            raw: None,
            pending: None,
            previous: None,
            frames_normalized: 0,
            consecutive_failures: 0,
            exhausted: false,
        })
    }

    fn grab_gray(&mut self) -> Result<Option<RawFrame>> {
        if !self.cap.read(&mut self.frame)? || self.frame.empty() {
            return Ok(None);
        }
        let source = if self.frame.channels() == 1 {
            &self.frame
        } else {
            imgproc::cvt_color_def(&self.frame, &mut self.gray, imgproc::COLOR_BGR2GRAY)?;
            &self.gray
        };
        let (w, h) = (source.cols() as u32, source.rows() as u32);
        let bytes = source.data_bytes()?;
        if bytes.len() < (w * h) as usize {
            return Ok(None);
        }
        let data: Vec<u16> = bytes[..(w * h) as usize]
            .iter()
            .map(|&v| u16::from(v) * 257)
            .collect();
        Ok(RawFrame::from_raw(w, h, data))
    }
}

impl FrameSource for VideoStream {
    fn wants_to_run(&self) -> bool {
        !self.exhausted
    }

    fn apply_live_config(&mut self, config: &SourceLiveConfig) -> Result<()> {
        if self.applied_exposure != Some(config.exposure) {
            match config.exposure {
                Some(exposure) => {
                    self.cap.set(videoio::CAP_PROP_AUTO_EXPOSURE, 1.0)?;
                    self.cap.set(videoio::CAP_PROP_EXPOSURE, exposure)?;
                }
                None => {
                    self.cap.set(videoio::CAP_PROP_AUTO_EXPOSURE, 3.0)?;
                }
            }
            self.applied_exposure = Some(config.exposure);
        }
        if *config != self.live {
            debug!("Source live config: {}", config);
            self.live = config.clone();
        }
        Ok(())
    }

    fn retrieve_raw_frame(&mut self) -> Retrieval {
        if self.live.paused {
            return Retrieval::NotReady;
        }
        match self.grab_gray() {
            Ok(Some(raw)) => {
                self.consecutive_failures = 0;
                let timestamp_ns = self
                    .cap
                    .get(videoio::CAP_PROP_POS_MSEC)
                    .map(|ms| (ms.max(0.0) * 1e6) as u64)
                    .unwrap_or(0);
                self.raw = Some((raw, timestamp_ns));
                Retrieval::Ready
            }
            Ok(None) => {
                self.consecutive_failures += 1;
                if self.consecutive_failures >= MAX_CONSECUTIVE_FAILURES {
                    info!("Video stream {} ended", self.uri);
                    self.exhausted = true;
                }
                Retrieval::NotReady
            }
            Err(e) => {
                warn!("Capture from {} failed: {}", self.uri, e);
                self.consecutive_failures += 1;
                Retrieval::Failed
            }
        }
    }

    fn normalize_frame(&mut self) {
        let Some((raw, timestamp_ns)) = self.raw.take() else {
            return;
        };
        let Some(frame) = crop(raw, self.live.roi) else {
            self.pending = None;
            return;
        };
        let duplicate = self
            .previous
            .as_ref()
            .is_some_and(|prev| same_content(prev, &frame));
        let meta = FrameMetadata {
            index: self.frames_normalized,
            timestamp_ns,
            duplicate,
        };
        self.frames_normalized += 1;
        self.previous = Some(frame.clone());
        self.pending = Some((frame, meta));
    }

    fn convert_to_standard_frame(&mut self) -> Option<(FrameBuffer, FrameMetadata)> {
        let (raw, meta) = self.pending.take()?;
        Some((
            to_8bit(&raw, self.live.normalization, self.live.clip_fraction),
            meta,
        ))
    }
}

fn open_capture(uri: &str) -> Result<VideoCapture> {
    let cap = match uri.parse::<i32>() {
        Ok(index) => VideoCapture::new(index, videoio::CAP_ANY)?,
        Err(_) => VideoCapture::from_file(uri, videoio::CAP_ANY)?,
    };
    if !cap.is_opened()? {
        bail!("failed to open video source {uri:?}");
    }
    Ok(cap)
}
