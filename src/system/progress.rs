//! Progress reporting from the run loop.
//!
//! The orchestrator reports through a [`ProgressSink`] chosen at
//! construction: [`HeadlessSink`] discards everything, [`ChannelSink`]
//! forwards events to an interactive controller.

use crossbeam_channel::{Receiver, Sender, TrySendError, bounded};
use tracing::trace;

use super::orchestrator::PipelineStats;
use crate::tracking::CycleSummary;

/// Events buffered for the controller before new ones are dropped.
pub const PROGRESS_CHANNEL_CAPACITY: usize = 64;

#[derive(Debug, Clone, PartialEq)]
pub enum ProgressEvent {
    CalibrationResolved { width: u32, height: u32 },
    Cycle(CycleSummary),
    Finished(PipelineStats),
}

pub trait ProgressSink: Send {
    fn report(&mut self, event: ProgressEvent);
}

/// Sink for runs without an interactive view.
#[derive(Debug, Default, Clone, Copy)]
pub struct HeadlessSink;

impl ProgressSink for HeadlessSink {
    fn report(&mut self, _event: ProgressEvent) {}
}

/// Forwards events over a bounded channel without ever blocking the worker.
pub struct ChannelSink {
    sender: Sender<ProgressEvent>,
    dropped: u64,
}

impl ChannelSink {
    pub fn new() -> (Self, Receiver<ProgressEvent>) {
        let (sender, receiver) = bounded(PROGRESS_CHANNEL_CAPACITY);
        (Self { sender, dropped: 0 }, receiver)
    }

    /// Events discarded because the controller fell behind.
    pub fn dropped(&self) -> u64 {
        self.dropped
    }
}

impl ProgressSink for ChannelSink {
    fn report(&mut self, event: ProgressEvent) {
        match self.sender.try_send(event) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                self.dropped += 1;
                trace!("Progress channel full, {} events dropped", self.dropped);
            }
            // Controller went away; keep running headless.
            Err(TrySendError::Disconnected(_)) => {}
        }
    }
}
