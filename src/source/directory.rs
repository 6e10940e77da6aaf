//! Image sequence read from a directory.
//!
//! Files are played back in lexicographic order. Numeric file stems are taken
//! as nanosecond timestamps (as in EuRoC-style dumps); other names are stamped
//! with the time since the stream was opened.

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use anyhow::{Context, Result, bail};
use tracing::{debug, info, warn};

use super::normalize::{crop, same_content, to_8bit};
use super::{FrameBuffer, FrameMetadata, FrameSource, RawFrame, Retrieval};
use crate::config::{SourceLiveConfig, SourceMode, SourceStartupConfig};

/// File extensions recognised as frames.
const IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "bmp", "tif", "tiff", "pgm"];

pub struct DirectoryStream {
    files: Vec<PathBuf>,
    cursor: usize,
    loop_input: bool,
    frame_interval: Option<Duration>,
    next_due: Option<Instant>,
    opened_at: Instant,
    live: SourceLiveConfig,
    /// Retrieved frame awaiting normalization.
    raw: Option<(RawFrame, u64)>,
    /// Normalized frame awaiting conversion.
    pending: Option<(RawFrame, FrameMetadata)>,
    previous: Option<RawFrame>,
    frames_normalized: u64,
    /// A frame decoded since the cursor last wrapped.
    decoded_this_pass: bool,
    /// A full looped pass decoded nothing; the stream gives up.
    exhausted: bool,
}

impl DirectoryStream {
    pub fn open(startup: &SourceStartupConfig) -> Result<Self> {
        let SourceMode::Directory { path } = &startup.mode else {
            bail!("directory stream opened with non-directory mode {:?}", startup.mode);
        };
        let files = list_frames(path)?;
        if files.is_empty() {
            bail!("no image files found in {}", path.display());
        }
        info!("Directory stream: {} frames in {}", files.len(), path.display());
        let frame_interval = startup
            .frame_rate
            .map(|hz| Duration::try_from_secs_f64(1.0 / hz))
            .transpose()
            .with_context(|| format!("Unusable frame rate {:?}", startup.frame_rate))?;

        Ok(Self {
            files,
            cursor: 0,
            loop_input: startup.loop_input,
            frame_interval,
            next_due: None,
            opened_at: Instant::now(),
            live: SourceLiveConfig::from_startup(startup),
            raw: None,
            pending: None,
            previous: None,
            frames_normalized: 0,
            decoded_this_pass: false,
            exhausted: false,
        })
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    fn elapsed_ns(&self) -> u64 {
        u64::try_from(self.opened_at.elapsed().as_nanos()).unwrap_or(u64::MAX)
    }
}

impl FrameSource for DirectoryStream {
    fn wants_to_run(&self) -> bool {
        !self.exhausted && (self.loop_input || self.cursor < self.files.len())
    }

    fn apply_live_config(&mut self, config: &SourceLiveConfig) -> Result<()> {
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
        let now = Instant::now();
        if self.next_due.is_some_and(|due| now < due) {
            return Retrieval::NotReady;
        }
        if self.cursor >= self.files.len() {
            if !self.loop_input {
                return Retrieval::NotReady;
            }
            if !self.decoded_this_pass {
                warn!("No decodable frame in a full pass over the directory, stopping");
                self.exhausted = true;
                return Retrieval::NotReady;
            }
            debug!("Directory stream wrapped around");
            self.cursor = 0;
            self.decoded_this_pass = false;
        }

        let path = &self.files[self.cursor];
        self.cursor += 1;
        self.next_due = self.frame_interval.map(|interval| now + interval);

        match image::open(path) {
            Ok(img) => {
                let timestamp_ns = timestamp_from_stem(path).unwrap_or_else(|| self.elapsed_ns());
                self.raw = Some((img.to_luma16(), timestamp_ns));
                self.decoded_this_pass = true;
                Retrieval::Ready
            }
            Err(e) => {
                warn!("Skipping unreadable frame {}: {}", path.display(), e);
                Retrieval::Failed
            }
        }
    }

    fn normalize_frame(&mut self) {
        let Some((raw, timestamp_ns)) = self.raw.take() else {
            return;
        };
        let Some(frame) = crop(raw, self.live.roi) else {
            debug!("Region of interest {:?} lies outside the frame", self.live.roi);
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
        let frame = to_8bit(&raw, self.live.normalization, self.live.clip_fraction);
        Some((frame, meta))
    }
}

fn list_frames(dir: &Path) -> Result<Vec<PathBuf>> {
    let entries =
        std::fs::read_dir(dir).with_context(|| format!("Failed to read {}", dir.display()))?;

    let mut files = Vec::new();
    for entry in entries {
        let path = entry?.path();
        let is_image = path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| IMAGE_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()));
        if is_image && path.is_file() {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

fn timestamp_from_stem(path: &Path) -> Option<u64> {
    path.file_stem()?.to_str()?.parse().ok()
}

#[cfg(test)]
mod tests {
    use image::{GrayImage, Luma};
    use tempfile::TempDir;

    use super::*;
    use crate::config::Normalization;

    fn startup(dir: &Path) -> SourceStartupConfig {
        SourceStartupConfig {
            mode: SourceMode::Directory {
                path: dir.to_path_buf(),
            },
            display_gui: false,
            loop_input: false,
            frame_rate: None,
            idle_backoff: Duration::ZERO,
            initial: SourceLiveConfig {
                normalization: Normalization::None,
                ..SourceLiveConfig::default()
            },
        }
    }

    fn write_frame(dir: &Path, name: &str, value: u8) {
        GrayImage::from_pixel(8, 6, Luma([value]))
            .save(dir.join(name))
            .unwrap();
    }

    fn next_frame(stream: &mut DirectoryStream) -> Option<(FrameBuffer, FrameMetadata)> {
        match stream.retrieve_raw_frame() {
            Retrieval::Ready => {
                stream.normalize_frame();
                stream.convert_to_standard_frame()
            }
            _ => None,
        }
    }

    #[test]
    fn test_plays_frames_in_order_then_stops() {
        let dir = TempDir::new().unwrap();
        write_frame(dir.path(), "2000.png", 20);
        write_frame(dir.path(), "1000.png", 10);
        std::fs::write(dir.path().join("notes.txt"), "ignored").unwrap();

        let mut stream = DirectoryStream::open(&startup(dir.path())).unwrap();
        assert_eq!(stream.len(), 2);

        let (first, meta) = next_frame(&mut stream).unwrap();
        assert_eq!(first.get_pixel(0, 0)[0], 10);
        assert_eq!(meta.timestamp_ns, 1000);
        assert_eq!(meta.index, 0);

        let (second, meta) = next_frame(&mut stream).unwrap();
        assert_eq!(second.get_pixel(0, 0)[0], 20);
        assert_eq!(meta.timestamp_ns, 2000);
        assert_eq!(meta.index, 1);

        assert!(!stream.wants_to_run());
        assert_eq!(stream.retrieve_raw_frame(), Retrieval::NotReady);
    }

    #[test]
    fn test_unreadable_file_fails_and_is_skipped() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("a.png"), b"not a png").unwrap();
        write_frame(dir.path(), "b.png", 5);

        let mut stream = DirectoryStream::open(&startup(dir.path())).unwrap();
        assert_eq!(stream.retrieve_raw_frame(), Retrieval::Failed);
        assert_eq!(stream.retrieve_raw_frame(), Retrieval::Ready);
    }

    #[test]
    fn test_duplicate_frames_are_flagged() {
        let dir = TempDir::new().unwrap();
        write_frame(dir.path(), "a.png", 7);
        write_frame(dir.path(), "b.png", 7);
        write_frame(dir.path(), "c.png", 9);

        let mut stream = DirectoryStream::open(&startup(dir.path())).unwrap();
        let flags: Vec<bool> = std::iter::from_fn(|| next_frame(&mut stream))
            .map(|(_, meta)| meta.duplicate)
            .collect();
        assert_eq!(flags, vec![false, true, false]);
    }

    #[test]
    fn test_pause_and_pacing_report_not_ready() {
        let dir = TempDir::new().unwrap();
        write_frame(dir.path(), "a.png", 1);
        write_frame(dir.path(), "b.png", 2);

        let mut config = startup(dir.path());
        config.frame_rate = Some(0.5);
        let mut stream = DirectoryStream::open(&config).unwrap();

        let mut live = SourceLiveConfig::from_startup(&config);
        live.paused = true;
        stream.apply_live_config(&live).unwrap();
        assert_eq!(stream.retrieve_raw_frame(), Retrieval::NotReady);

        live.paused = false;
        stream.apply_live_config(&live).unwrap();
        assert_eq!(stream.retrieve_raw_frame(), Retrieval::Ready);
        // Next frame is due two seconds later.
        assert_eq!(stream.retrieve_raw_frame(), Retrieval::NotReady);
    }

    #[test]
    fn test_loop_input_wraps_around() {
        let dir = TempDir::new().unwrap();
        write_frame(dir.path(), "a.png", 1);

        let mut config = startup(dir.path());
        config.loop_input = true;
        let mut stream = DirectoryStream::open(&config).unwrap();
        for _ in 0..3 {
            assert!(stream.wants_to_run());
            assert!(next_frame(&mut stream).is_some());
        }
    }

    #[test]
    fn test_looped_directory_without_decodable_frames_stops() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("a.png"), b"not a png").unwrap();
        std::fs::write(dir.path().join("b.png"), b"still not a png").unwrap();

        let mut config = startup(dir.path());
        config.loop_input = true;
        let mut stream = DirectoryStream::open(&config).unwrap();
        assert_eq!(stream.retrieve_raw_frame(), Retrieval::Failed);
        assert_eq!(stream.retrieve_raw_frame(), Retrieval::Failed);
        assert!(stream.wants_to_run());
        assert_eq!(stream.retrieve_raw_frame(), Retrieval::NotReady);
        assert!(!stream.wants_to_run());
    }

    #[test]
    fn test_unrepresentable_frame_interval_is_an_error() {
        let dir = TempDir::new().unwrap();
        write_frame(dir.path(), "a.png", 1);

        let mut config = startup(dir.path());
        config.frame_rate = Some(1.0e-300);
        assert!(DirectoryStream::open(&config).is_err());
    }

    #[test]
    fn test_roi_outside_frame_fails_conversion() {
        let dir = TempDir::new().unwrap();
        write_frame(dir.path(), "a.png", 1);

        let config = startup(dir.path());
        let mut stream = DirectoryStream::open(&config).unwrap();
        let mut live = SourceLiveConfig::from_startup(&config);
        live.roi = Some(crate::config::Roi {
            x: 100,
            y: 100,
            width: 4,
            height: 4,
        });
        stream.apply_live_config(&live).unwrap();

        assert_eq!(stream.retrieve_raw_frame(), Retrieval::Ready);
        stream.normalize_frame();
        assert!(stream.convert_to_standard_frame().is_none());
    }

    #[test]
    fn test_empty_directory_is_an_error() {
        let dir = TempDir::new().unwrap();
        assert!(DirectoryStream::open(&startup(dir.path())).is_err());
    }
}
