//! Hosts the run loop on a dedicated thread.

use std::sync::Arc;
use std::thread::{self, JoinHandle};

use anyhow::{Context, Result, anyhow};
use tracing::info;

use super::orchestrator::{PipelineOrchestrator, PipelineStats};
use super::shared_state::SharedState;

/// Name of the worker thread.
pub const WORKER_THREAD_NAME: &str = "pipeline";

/// Handle to a pipeline running on its own thread.
///
/// Dropping the handle requests a stop and waits for the thread.
pub struct PipelineWorker {
    shared: Arc<SharedState>,
    handle: Option<JoinHandle<Result<PipelineStats>>>,
}

impl PipelineWorker {
    pub fn spawn(mut orchestrator: PipelineOrchestrator) -> Result<Self> {
        let shared = Arc::clone(orchestrator.shared());
        let handle = thread::Builder::new()
            .name(WORKER_THREAD_NAME.to_string())
            .spawn(move || orchestrator.run())
            .context("Failed to spawn pipeline thread")?;
        Ok(Self {
            shared,
            handle: Some(handle),
        })
    }

    pub fn request_stop(&self) {
        self.shared.request_stop();
    }

    pub fn is_finished(&self) -> bool {
        self.handle.as_ref().is_none_or(JoinHandle::is_finished)
    }

    /// Wait for the run loop to end and return its result.
    pub fn join(mut self) -> Result<PipelineStats> {
        self.join_inner()
    }

    fn join_inner(&mut self) -> Result<PipelineStats> {
        let handle = self
            .handle
            .take()
            .ok_or_else(|| anyhow!("pipeline thread already joined"))?;
        handle
            .join()
            .map_err(|_| anyhow!("pipeline thread panicked"))?
    }
}

impl Drop for PipelineWorker {
    fn drop(&mut self) {
        if self.handle.is_some() {
            info!("Stopping pipeline thread");
            self.shared.request_stop();
            let _ = self.join_inner();
        }
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;
    use std::time::Duration;

    use super::*;
    use crate::config::{
        OutputTarget, SourceLiveConfig, SourceMode, SourceStartupConfig, TrackerStartupConfig,
    };
    use crate::source::{FrameBuffer, FrameMetadata, FrameSource, Retrieval};
    use crate::tracking::TrackerStage;

    /// Never produces a frame and never finishes on its own.
    struct IdleSource;

    impl FrameSource for IdleSource {
        fn wants_to_run(&self) -> bool {
            true
        }
        fn apply_live_config(&mut self, _: &SourceLiveConfig) -> Result<()> {
            Ok(())
        }
        fn retrieve_raw_frame(&mut self) -> Retrieval {
            Retrieval::NotReady
        }
        fn normalize_frame(&mut self) {}
        fn convert_to_standard_frame(&mut self) -> Option<(FrameBuffer, FrameMetadata)> {
            None
        }
    }

    fn idle_orchestrator() -> PipelineOrchestrator {
        let startup = SourceStartupConfig {
            mode: SourceMode::Directory {
                path: PathBuf::from("unused"),
            },
            display_gui: false,
            loop_input: false,
            frame_rate: None,
            idle_backoff: Duration::from_millis(1),
            initial: SourceLiveConfig::default(),
        };
        let factory = |_: &TrackerStartupConfig| -> Result<Box<dyn TrackerStage>> {
            Err(anyhow!("unused"))
        };
        PipelineOrchestrator::with_stages(
            startup,
            TrackerStartupConfig::default(),
            Box::new(IdleSource),
            Box::new(factory),
            OutputTarget::default(),
        )
    }

    #[test]
    fn test_stop_ends_worker() {
        let worker = PipelineWorker::spawn(idle_orchestrator()).unwrap();
        std::thread::sleep(Duration::from_millis(10));
        assert!(!worker.is_finished());

        worker.request_stop();
        let stats = worker.join().unwrap();
        assert!(stats.not_ready > 0);
        assert_eq!(stats.tracking_cycles, 0);
    }

    #[test]
    fn test_drop_stops_worker() {
        let mut orchestrator = idle_orchestrator();
        let link = orchestrator.link_controller().unwrap();
        let worker = PipelineWorker::spawn(orchestrator).unwrap();
        drop(worker);
        assert!(!link.is_running());
    }
}
