//! Controller binding to a running pipeline.

use std::sync::Arc;

use crossbeam_channel::Receiver;

use super::live::{LiveConfig, LiveParameterStore};
use super::progress::ProgressEvent;
use super::shared_state::SharedState;
use crate::config::{SourceLiveConfig, TrackerLiveConfig};

/// Handle given to an external controller.
///
/// Holds the same live bundles the worker reads every iteration; writes made
/// through it are seen by the next iteration.
pub struct ControllerLink {
    live: LiveParameterStore,
    shared: Arc<SharedState>,
    wants_source_view: bool,
    wants_tracker_view: bool,
    events: Option<Receiver<ProgressEvent>>,
}

impl ControllerLink {
    pub(crate) fn new(
        live: LiveParameterStore,
        shared: Arc<SharedState>,
        wants_source_view: bool,
        wants_tracker_view: bool,
        events: Option<Receiver<ProgressEvent>>,
    ) -> Self {
        Self {
            live,
            shared,
            wants_source_view,
            wants_tracker_view,
            events,
        }
    }

    pub fn source(&self) -> &LiveConfig<SourceLiveConfig> {
        &self.live.source
    }

    pub fn tracker(&self) -> &LiveConfig<TrackerLiveConfig> {
        &self.live.tracker
    }

    pub fn wants_source_view(&self) -> bool {
        self.wants_source_view
    }

    pub fn wants_tracker_view(&self) -> bool {
        self.wants_tracker_view
    }

    pub fn is_interactive(&self) -> bool {
        self.wants_source_view || self.wants_tracker_view
    }

    /// Progress events, present only for interactive runs.
    pub fn events(&self) -> Option<&Receiver<ProgressEvent>> {
        self.events.as_ref()
    }

    /// Ask the worker to exit after the current iteration.
    pub fn request_stop(&self) {
        self.shared.request_stop();
    }

    pub fn is_running(&self) -> bool {
        self.shared.is_running()
    }
}
