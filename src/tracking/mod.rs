//! Feature tracking stage.
//!
//! The orchestrator only sees the [`TrackerStage`] and [`TrackerFactory`]
//! traits. The bundled implementation is [`SparseFlowTracker`]:
//! - corner detection (FAST-9 or Harris)
//! - frame-to-frame patch search
//! - re-seeding when too few tracks survive
//! - CSV persistence of every active track

pub mod features;
pub mod flow;
pub mod output;
pub mod result;

use std::path::Path;

use anyhow::Result;

use crate::config::{TrackerLiveConfig, TrackerStartupConfig, WriteMode};
use crate::source::{FrameBuffer, FrameMetadata};

pub use flow::{SparseFlowFactory, SparseFlowTracker, Track};
pub use result::{CycleSummary, CycleTiming};

/// A feature tracker driven once per frame.
pub trait TrackerStage: Send {
    /// Directory for persisted output; `None` disables persistence.
    fn set_output_location(&mut self, directory: Option<&Path>) -> Result<()>;

    fn set_write_mode(&mut self, mode: WriteMode);

    /// Apply the live parameter bundle. Called every cycle, usually with
    /// unchanged values, so it must be idempotent.
    fn apply_live_config(&mut self, config: &TrackerLiveConfig) -> Result<()>;

    /// Take ownership of the frame for the next cycle.
    fn accept_frame(&mut self, frame: FrameBuffer, meta: FrameMetadata);

    fn run_tracking_cycle(&mut self) -> Result<CycleSummary>;
}

/// Builds the tracker once camera geometry is resolved.
pub trait TrackerFactory: Send {
    fn build(&mut self, startup: &TrackerStartupConfig) -> Result<Box<dyn TrackerStage>>;
}

impl<F> TrackerFactory for F
where
    F: FnMut(&TrackerStartupConfig) -> Result<Box<dyn TrackerStage>> + Send,
{
    fn build(&mut self, startup: &TrackerStartupConfig) -> Result<Box<dyn TrackerStage>> {
        self(startup)
    }
}
