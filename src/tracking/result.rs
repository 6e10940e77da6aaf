//! Per-cycle tracking results and diagnostics.
//!
//! These types describe what happened during one tracking cycle:
//! - how many tracks survived, were lost, or were newly seeded
//! - frame identity (index, timestamp, duplicate flag)
//! - timing information for profiling

use std::fmt;

/// Summary of one tracking cycle.
#[derive(Debug, Clone, PartialEq)]
pub struct CycleSummary {
    pub frame_index: u64,
    pub timestamp_ns: u64,
    pub duplicate: bool,
    /// Tracks alive after the cycle.
    pub active: usize,
    /// Tracks carried over from the previous frame.
    pub tracked: usize,
    pub lost: usize,
    pub detected: usize,
    pub timing: CycleTiming,
}

/// Timing breakdown for a cycle.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct CycleTiming {
    pub total_ms: f64,
    pub track_ms: f64,
    pub detect_ms: f64,
    pub write_ms: f64,
}

impl CycleTiming {
    pub fn zero() -> Self {
        Self::default()
    }
}

impl fmt::Display for CycleSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "frame {}: {} active ({} tracked, {} lost, {} new) in {:.1} ms",
            self.frame_index,
            self.active,
            self.tracked,
            self.lost,
            self.detected,
            self.timing.total_ms
        )?;
        if self.duplicate {
            write!(f, " [duplicate]")?;
        }
        Ok(())
    }
}
