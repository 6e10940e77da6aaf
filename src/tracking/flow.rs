//! Sparse frame-to-frame corner tracking.
//!
//! Each cycle:
//! 1. follow every track from the previous frame by exhaustive patch search
//!    (sum of absolute differences) inside a square window
//! 2. drop tracks whose best match is too poor or leaves the frame
//! 3. seed new tracks from the configured detector while fewer than
//!    `min_features` survive
//! 4. persist all active tracks

use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::{Context, Result, bail};
use image::GrayImage;
use tracing::{debug, info};

use super::features;
use super::output::{TrackRow, TrackWriter};
use super::result::{CycleSummary, CycleTiming};
use super::{TrackerFactory, TrackerStage};
use crate::config::{CameraGeometry, TrackerLiveConfig, TrackerStartupConfig, WriteMode};
use crate::source::{FrameBuffer, FrameMetadata};

/// A feature followed across frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Track {
    pub id: u64,
    pub x: u32,
    pub y: u32,
    /// Frames survived since the track was seeded.
    pub age: u32,
}

pub struct SparseFlowTracker {
    camera: CameraGeometry,
    live: TrackerLiveConfig,
    output_dir: Option<PathBuf>,
    write_mode: WriteMode,
    writer: Option<TrackWriter>,
    previous: Option<FrameBuffer>,
    current: Option<(FrameBuffer, FrameMetadata)>,
    tracks: Vec<Track>,
    next_track_id: u64,
}

impl SparseFlowTracker {
    /// Build a tracker. The camera geometry must already be resolved.
    pub fn new(startup: &TrackerStartupConfig) -> Result<Self> {
        if !startup.camera.is_resolved() {
            bail!("sparse flow tracker needs resolved camera geometry");
        }
        if let Some((w, h)) = startup.camera.size() {
            info!("Sparse flow tracker built for {}x{} frames", w, h);
        }
        Ok(Self {
            camera: startup.camera.clone(),
            live: TrackerLiveConfig::from_startup(startup),
            output_dir: None,
            write_mode: WriteMode::Create,
            writer: None,
            previous: None,
            current: None,
            tracks: Vec::new(),
            next_track_id: 0,
        })
    }

    pub fn tracks(&self) -> &[Track] {
        &self.tracks
    }

    pub fn camera(&self) -> &CameraGeometry {
        &self.camera
    }

    fn seed(&mut self, frame: &GrayImage) -> usize {
        let limit = self.live.max_features.saturating_sub(self.tracks.len());
        if limit == 0 {
            return 0;
        }
        let border = self.live.patch_radius;
        let (w, h) = frame.dimensions();
        let corners: Vec<_> = features::detect(frame, self.live.detector, self.live.sensitivity)
            .into_iter()
            .filter(|c| c.x >= border && c.y >= border && c.x + border < w && c.y + border < h)
            .collect();

        let occupied: Vec<(u32, u32)> = self.tracks.iter().map(|t| (t.x, t.y)).collect();
        let min_distance = (2 * self.live.patch_radius + 1) as f32;
        let chosen = features::select(corners, &occupied, min_distance, limit);

        for corner in &chosen {
            self.tracks.push(Track {
                id: self.next_track_id,
                x: corner.x,
                y: corner.y,
                age: 0,
            });
            self.next_track_id += 1;
        }
        chosen.len()
    }

    fn persist(&mut self, meta: &FrameMetadata) -> Result<()> {
        let Some(dir) = self.output_dir.as_deref() else {
            return Ok(());
        };
        if self.writer.is_none() {
            self.writer = Some(TrackWriter::open(dir, self.write_mode)?);
        }
        let Some(writer) = self.writer.as_mut() else {
            return Ok(());
        };

        for track in &self.tracks {
            let (x_norm, y_norm) = self
                .camera
                .normalize_point(f64::from(track.x), f64::from(track.y))
                .unwrap_or((f64::NAN, f64::NAN));
            writer.write(&TrackRow {
                frame: meta.index,
                timestamp_ns: meta.timestamp_ns,
                track_id: track.id,
                x: track.x,
                y: track.y,
                x_norm,
                y_norm,
                age: track.age,
                duplicate: meta.duplicate,
            })?;
        }
        writer.flush()
    }
}

impl TrackerStage for SparseFlowTracker {
    /// Opens the track file right away so an unusable location fails here.
    fn set_output_location(&mut self, directory: Option<&Path>) -> Result<()> {
        let directory = directory.map(Path::to_path_buf);
        if directory == self.output_dir && (directory.is_none() || self.writer.is_some()) {
            return Ok(());
        }
        self.writer = None;
        self.output_dir = None;
        if let Some(dir) = directory.as_deref() {
            self.writer = Some(TrackWriter::open(dir, self.write_mode)?);
        }
        self.output_dir = directory;
        Ok(())
    }

    fn set_write_mode(&mut self, mode: WriteMode) {
        if mode != self.write_mode {
            self.writer = None;
            self.write_mode = mode;
        }
    }

    fn apply_live_config(&mut self, config: &TrackerLiveConfig) -> Result<()> {
        if *config == self.live {
            return Ok(());
        }
        config.validate()?;
        debug!("Tracker live config: {}", config);
        self.live = config.clone();
        if self.tracks.len() > self.live.max_features {
            // Keep the longest-lived tracks.
            self.tracks.sort_by(|a, b| b.age.cmp(&a.age).then(a.id.cmp(&b.id)));
            self.tracks.truncate(self.live.max_features);
        }
        Ok(())
    }

    fn accept_frame(&mut self, frame: FrameBuffer, meta: FrameMetadata) {
        self.current = Some((frame, meta));
    }

    fn run_tracking_cycle(&mut self) -> Result<CycleSummary> {
        let t_start = Instant::now();
        let (frame, meta) = self
            .current
            .take()
            .context("tracking cycle started without an accepted frame")?;
        if meta.duplicate {
            debug!("Frame {} repeats the previous frame", meta.index);
        }

        let mut timing = CycleTiming::zero();
        let before = self.tracks.len();
        if let Some(previous) = self.previous.as_ref() {
            let search = i64::from(self.live.search_radius);
            let patch = i64::from(self.live.patch_radius);
            let max_error = self.live.max_match_error;
            self.tracks = self
                .tracks
                .iter()
                .filter_map(|track| follow(previous, &frame, track, search, patch, max_error))
                .collect();
        } else {
            self.tracks.clear();
        }
        let tracked = self.tracks.len();
        let lost = before - tracked;
        timing.track_ms = t_start.elapsed().as_secs_f64() * 1000.0;

        let t_detect = Instant::now();
        let detected = if self.tracks.is_empty() || self.tracks.len() < self.live.min_features {
            self.seed(&frame)
        } else {
            0
        };
        timing.detect_ms = t_detect.elapsed().as_secs_f64() * 1000.0;

        self.previous = Some(frame);

        let t_write = Instant::now();
        self.persist(&meta)?;
        timing.write_ms = t_write.elapsed().as_secs_f64() * 1000.0;
        timing.total_ms = t_start.elapsed().as_secs_f64() * 1000.0;

        Ok(CycleSummary {
            frame_index: meta.index,
            timestamp_ns: meta.timestamp_ns,
            duplicate: meta.duplicate,
            active: self.tracks.len(),
            tracked,
            lost,
            detected,
            timing,
        })
    }
}

/// Find `track` in `current` near its position in `previous`.
fn follow(
    previous: &GrayImage,
    current: &GrayImage,
    track: &Track,
    search: i64,
    patch: i64,
    max_error: f32,
) -> Option<Track> {
    let fits = |img: &GrayImage, x: i64, y: i64| {
        x >= patch && y >= patch && x + patch < i64::from(img.width()) && y + patch < i64::from(img.height())
    };
    let (px, py) = (i64::from(track.x), i64::from(track.y));
    if !fits(previous, px, py) {
        return None;
    }

    // (sad, squared displacement, x, y)
    let mut best: Option<(u32, i64, i64, i64)> = None;
    for dy in -search..=search {
        for dx in -search..=search {
            let (cx, cy) = (px + dx, py + dy);
            if !fits(current, cx, cy) {
                continue;
            }
            let sad = patch_sad(previous, px, py, current, cx, cy, patch);
            let dist = dx * dx + dy * dy;
            let better = match best {
                None => true,
                Some((b_sad, b_dist, _, _)) => sad < b_sad || (sad == b_sad && dist < b_dist),
            };
            if better {
                best = Some((sad, dist, cx, cy));
            }
        }
    }

    let (sad, _, x, y) = best?;
    let side = (2 * patch + 1) as f32;
    if sad as f32 / (side * side) > max_error {
        return None;
    }
    Some(Track {
        id: track.id,
        x: x as u32,
        y: y as u32,
        age: track.age + 1,
    })
}

fn patch_sad(a: &GrayImage, ax: i64, ay: i64, b: &GrayImage, bx: i64, by: i64, r: i64) -> u32 {
    let mut sad = 0u32;
    for oy in -r..=r {
        for ox in -r..=r {
            let va = a.get_pixel((ax + ox) as u32, (ay + oy) as u32)[0];
            let vb = b.get_pixel((bx + ox) as u32, (by + oy) as u32)[0];
            sad += u32::from(va.abs_diff(vb));
        }
    }
    sad
}

/// Builds [`SparseFlowTracker`]s.
#[derive(Debug, Default, Clone, Copy)]
pub struct SparseFlowFactory;

impl TrackerFactory for SparseFlowFactory {
    fn build(&mut self, startup: &TrackerStartupConfig) -> Result<Box<dyn TrackerStage>> {
        Ok(Box::new(SparseFlowTracker::new(startup)?))
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use image::Luma;
    use tempfile::TempDir;

    use super::*;
    use crate::tracking::output::TRACKS_FILE;

    fn square(x0: u32, y0: u32) -> GrayImage {
        GrayImage::from_fn(64, 64, |x, y| {
            let inside = (x0..x0 + 16).contains(&x) && (y0..y0 + 16).contains(&y);
            Luma([if inside { 200 } else { 20 }])
        })
    }

    fn resolved_startup() -> TrackerStartupConfig {
        let mut startup = TrackerStartupConfig {
            enabled: true,
            ..TrackerStartupConfig::default()
        };
        startup.camera.resolve(64, 64).unwrap();
        startup
    }

    fn meta(index: u64) -> FrameMetadata {
        FrameMetadata {
            index,
            timestamp_ns: index * 40_000_000,
            duplicate: false,
        }
    }

    fn cycle(tracker: &mut SparseFlowTracker, frame: GrayImage, index: u64) -> CycleSummary {
        tracker.accept_frame(frame, meta(index));
        tracker.run_tracking_cycle().unwrap()
    }

    #[test]
    fn test_requires_resolved_geometry() {
        let startup = TrackerStartupConfig::default();
        assert!(SparseFlowTracker::new(&startup).is_err());
    }

    #[test]
    fn test_cycle_without_frame_is_an_error() {
        let mut tracker = SparseFlowTracker::new(&resolved_startup()).unwrap();
        assert!(tracker.run_tracking_cycle().is_err());
    }

    #[test]
    fn test_tracks_follow_translation() {
        let mut tracker = SparseFlowTracker::new(&resolved_startup()).unwrap();

        let first = cycle(&mut tracker, square(20, 20), 0);
        assert_eq!(first.tracked, 0);
        assert!(first.detected >= 4, "seeded {}", first.detected);
        let before: HashMap<u64, (u32, u32)> =
            tracker.tracks().iter().map(|t| (t.id, (t.x, t.y))).collect();

        let second = cycle(&mut tracker, square(22, 21), 1);
        assert_eq!(second.lost, 0);
        assert_eq!(second.tracked, before.len());
        for track in tracker.tracks().iter().filter(|t| before.contains_key(&t.id)) {
            let (x, y) = before[&track.id];
            assert_eq!((track.x, track.y), (x + 2, y + 1));
            assert_eq!(track.age, 1);
        }
    }

    #[test]
    fn test_tracks_are_lost_on_featureless_frame() {
        let mut tracker = SparseFlowTracker::new(&resolved_startup()).unwrap();
        let first = cycle(&mut tracker, square(20, 20), 0);

        let flat = GrayImage::from_pixel(64, 64, Luma([20]));
        let second = cycle(&mut tracker, flat, 1);
        assert_eq!(second.lost, first.active);
        assert_eq!(second.active, 0);
        assert_eq!(second.detected, 0);
    }

    #[test]
    fn test_detector_off_keeps_existing_tracks_only() {
        let mut tracker = SparseFlowTracker::new(&resolved_startup()).unwrap();
        let mut live = TrackerLiveConfig::default();
        live.detector = crate::config::DetectorKind::Off;
        tracker.apply_live_config(&live).unwrap();

        let summary = cycle(&mut tracker, square(20, 20), 0);
        assert_eq!(summary.detected, 0);
        assert_eq!(summary.active, 0);
    }

    #[test]
    fn test_lowering_max_features_truncates_tracks() {
        let mut tracker = SparseFlowTracker::new(&resolved_startup()).unwrap();
        cycle(&mut tracker, square(20, 20), 0);
        assert!(tracker.tracks().len() >= 4);

        let live = TrackerLiveConfig {
            max_features: 2,
            min_features: 1,
            ..TrackerLiveConfig::default()
        };
        tracker.apply_live_config(&live).unwrap();
        tracker.apply_live_config(&live).unwrap();
        assert_eq!(tracker.tracks().len(), 2);
    }

    #[test]
    fn test_persists_active_tracks() {
        let dir = TempDir::new().unwrap();
        let mut tracker = SparseFlowTracker::new(&resolved_startup()).unwrap();
        tracker.set_output_location(Some(dir.path())).unwrap();
        tracker.set_write_mode(WriteMode::Create);

        let a = cycle(&mut tracker, square(20, 20), 0);
        let b = cycle(&mut tracker, square(21, 20), 1);

        let text = std::fs::read_to_string(dir.path().join(TRACKS_FILE)).unwrap();
        assert_eq!(text.lines().count(), 1 + a.active + b.active);
    }

    #[test]
    fn test_output_location_on_a_file_is_rejected() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("not-a-dir");
        std::fs::write(&file, b"x").unwrap();

        let mut tracker = SparseFlowTracker::new(&resolved_startup()).unwrap();
        assert!(tracker.set_output_location(Some(&file)).is_err());
        // No location is kept after the failure.
        cycle(&mut tracker, square(20, 20), 0);
    }

    #[test]
    fn test_failed_write_keeps_previous_frame() {
        let dir = TempDir::new().unwrap();
        let out = dir.path().join("out");
        let mut tracker = SparseFlowTracker::new(&resolved_startup()).unwrap();
        tracker.set_output_location(Some(&out)).unwrap();

        // Replace the directory with a file and force a reopen.
        std::fs::remove_dir_all(&out).unwrap();
        std::fs::write(&out, b"x").unwrap();
        tracker.set_write_mode(WriteMode::Append);
        tracker.accept_frame(square(20, 20), meta(0));
        assert!(tracker.run_tracking_cycle().is_err());
        let seeded = tracker.tracks().len();
        assert!(seeded >= 4);

        std::fs::remove_file(&out).unwrap();
        std::fs::create_dir(&out).unwrap();
        tracker.set_write_mode(WriteMode::Create);
        let second = cycle(&mut tracker, square(22, 21), 1);
        assert_eq!(second.tracked, seeded);
        assert_eq!(second.lost, 0);
    }

    #[test]
    fn test_no_output_location_writes_nothing() {
        let dir = TempDir::new().unwrap();
        let mut tracker = SparseFlowTracker::new(&resolved_startup()).unwrap();
        tracker.set_output_location(None).unwrap();
        cycle(&mut tracker, square(20, 20), 0);
        assert!(!dir.path().join(TRACKS_FILE).exists());
    }
}
