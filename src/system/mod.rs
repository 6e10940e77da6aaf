//! Pipeline orchestration and thread management.
//!
//! The `PipelineOrchestrator` drives the frame source and the tracker; a
//! `PipelineWorker` hosts it on its own thread while a `ControllerLink`
//! lets another thread tune the live parameters and observe progress.

pub mod controller;
pub mod lifecycle;
pub mod live;
pub mod orchestrator;
pub mod progress;
pub mod shared_state;
pub mod worker;

pub use controller::ControllerLink;
pub use lifecycle::{PipelineState, TrackerLifecycle, is_calibration_error};
pub use live::{LiveConfig, LiveParameterStore};
pub use orchestrator::{PipelineOrchestrator, PipelineStats, StepOutcome};
pub use progress::{ChannelSink, HeadlessSink, ProgressEvent, ProgressSink};
pub use shared_state::SharedState;
pub use worker::PipelineWorker;
