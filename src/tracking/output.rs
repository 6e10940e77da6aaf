//! Track persistence as CSV.

use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use csv::{Writer, WriterBuilder};
use serde::Serialize;
use tracing::info;

use crate::config::WriteMode;

/// File name written inside the output directory.
pub const TRACKS_FILE: &str = "tracks.csv";

/// One tracked feature observed in one frame.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrackRow {
    pub frame: u64,
    pub timestamp_ns: u64,
    pub track_id: u64,
    pub x: u32,
    pub y: u32,
    pub x_norm: f64,
    pub y_norm: f64,
    pub age: u32,
    pub duplicate: bool,
}

pub struct TrackWriter {
    writer: Writer<File>,
    path: PathBuf,
    rows: u64,
}

impl TrackWriter {
    /// Open `tracks.csv` in `dir`, creating the directory if needed.
    ///
    /// [`WriteMode::Append`] keeps existing rows and only writes a header
    /// into an empty file.
    pub fn open(dir: &Path, mode: WriteMode) -> Result<Self> {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create output directory {}", dir.display()))?;
        let path = dir.join(TRACKS_FILE);

        let (file, write_header) = match mode {
            WriteMode::Create => (File::create(&path), true),
            WriteMode::Append => {
                let empty = std::fs::metadata(&path).map(|m| m.len() == 0).unwrap_or(true);
                (
                    OpenOptions::new().create(true).append(true).open(&path),
                    empty,
                )
            }
        };
        let file = file.with_context(|| format!("Failed to open {}", path.display()))?;

        let writer = WriterBuilder::new()
            .has_headers(write_header)
            .from_writer(file);
        info!("Writing tracks to {} ({:?})", path.display(), mode);

        Ok(Self {
            writer,
            path,
            rows: 0,
        })
    }

    pub fn write(&mut self, row: &TrackRow) -> Result<()> {
        self.writer
            .serialize(row)
            .with_context(|| format!("Failed to write to {}", self.path.display()))?;
        self.rows += 1;
        Ok(())
    }

    pub fn flush(&mut self) -> Result<()> {
        self.writer
            .flush()
            .with_context(|| format!("Failed to flush {}", self.path.display()))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Rows written by this writer (excluding any appended-to content).
    pub fn rows(&self) -> u64 {
        self.rows
    }
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;

    fn row(frame: u64) -> TrackRow {
        TrackRow {
            frame,
            timestamp_ns: frame * 1000,
            track_id: 1,
            x: 4,
            y: 5,
            x_norm: 0.0,
            y_norm: 0.0,
            age: 0,
            duplicate: false,
        }
    }

    fn write_rows(dir: &Path, mode: WriteMode, frames: &[u64]) {
        let mut writer = TrackWriter::open(dir, mode).unwrap();
        for &frame in frames {
            writer.write(&row(frame)).unwrap();
        }
        writer.flush().unwrap();
    }

    #[test]
    fn test_create_truncates_previous_output() {
        let dir = TempDir::new().unwrap();
        write_rows(dir.path(), WriteMode::Create, &[0, 1]);
        write_rows(dir.path(), WriteMode::Create, &[2]);

        let text = std::fs::read_to_string(dir.path().join(TRACKS_FILE)).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].starts_with("frame,timestamp_ns,track_id"));
        assert!(lines[1].starts_with("2,2000,"));
    }

    #[test]
    fn test_append_keeps_rows_and_single_header() {
        let dir = TempDir::new().unwrap();
        write_rows(dir.path(), WriteMode::Append, &[0]);
        write_rows(dir.path(), WriteMode::Append, &[1, 2]);

        let text = std::fs::read_to_string(dir.path().join(TRACKS_FILE)).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 4);
        assert_eq!(lines.iter().filter(|l| l.starts_with("frame,")).count(), 1);
    }

    #[test]
    fn test_creates_missing_directory() {
        let dir = TempDir::new().unwrap();
        let nested = dir.path().join("run/01");
        let writer = TrackWriter::open(&nested, WriteMode::Create).unwrap();
        assert!(writer.path().starts_with(&nested));
        assert_eq!(writer.rows(), 0);
    }
}
