//! Pipeline orchestration.
//!
//! The `PipelineOrchestrator` owns the frame source, the tracker lifecycle
//! and the live parameter bundles, and sequences one iteration at a time:
//!
//! 1. apply source live config
//! 2. retrieve a raw frame (not-ready and failures skip the iteration)
//! 3. normalize it
//! 4. stop here when tracking is disabled
//! 5. convert to 8-bit (failures skip the iteration)
//! 6. calibration gate on the first converted frame
//! 7. apply tracker live config
//! 8. hand the frame to the tracker
//! 9. run one tracking cycle

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use crossbeam_channel::Receiver;
use tracing::{debug, info, warn};

use super::controller::ControllerLink;
use super::lifecycle::{PipelineState, TrackerLifecycle};
use super::live::LiveParameterStore;
use super::progress::{ChannelSink, HeadlessSink, ProgressEvent, ProgressSink};
use super::shared_state::SharedState;
use crate::config::{
    LaunchConfig, OutputTarget, RunArgs, SourceLiveConfig, SourceStartupConfig, TrackerLiveConfig,
    TrackerStartupConfig, WriteMode,
};
use crate::source::{self, FrameSource, Retrieval};
use crate::tracking::{CycleSummary, SparseFlowFactory, TrackerFactory};

/// Log a progress line every this many tracking cycles.
const PROGRESS_LOG_INTERVAL: u64 = 100;

/// Consecutive retrieval or conversion failures tolerated before backing off.
const FAILURES_BEFORE_BACKOFF: u32 = 8;

/// Lower bound on the failure backoff when `idle_backoff` is zero.
const MIN_FAILURE_BACKOFF: Duration = Duration::from_millis(1);

/// Counters accumulated over a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PipelineStats {
    pub iterations: u64,
    pub not_ready: u64,
    pub retrieval_failures: u64,
    pub conversion_failures: u64,
    pub frames_normalized: u64,
    /// Tracking cycles that completed; failed cycles count in `tracking_failures`.
    pub tracking_cycles: u64,
    pub tracking_failures: u64,
    pub tracker_constructions: u64,
    pub live_config_failures: u64,
}

/// What a single iteration did.
#[derive(Debug, Clone, PartialEq)]
pub enum StepOutcome {
    /// The source is done or a stop was requested; nothing ran.
    Stopped,
    NotReady,
    RetrievalFailed,
    /// Frame normalized; tracking is disabled.
    Normalized,
    ConversionFailed,
    Tracked(CycleSummary),
    /// The tracking cycle returned an error.
    TrackingFailed,
}

pub struct PipelineOrchestrator {
    source_startup: SourceStartupConfig,
    source: Box<dyn FrameSource>,
    tracker: TrackerLifecycle,
    factory: Box<dyn TrackerFactory>,
    output: OutputTarget,
    live: LiveParameterStore,
    shared: Arc<SharedState>,
    sink: Box<dyn ProgressSink>,
    events: Option<Receiver<ProgressEvent>>,
    wants_source_view: bool,
    wants_tracker_view: bool,
    stats: PipelineStats,
    /// Generation of the last live bundle each stage rejected; warned once.
    rejected_source_generation: Option<u64>,
    rejected_tracker_generation: Option<u64>,
}

impl PipelineOrchestrator {
    /// Load the launch file named by `args` and open the frame source.
    pub fn initialize(args: &RunArgs) -> Result<Self> {
        if !args.explicit_config {
            info!(
                "No launch file given, using default {}",
                args.config_path.display()
            );
        }
        let launch = LaunchConfig::load(&args.config_path)
            .with_context(|| format!("Failed to load launch file {}", args.config_path.display()))?;
        launch.log_summary();

        let source_startup = launch
            .source_startup()
            .context("Failed to derive source startup config")?;
        let tracker_startup = launch
            .tracker_startup()
            .context("Failed to derive tracker startup config")?;

        if cfg!(debug_assertions)
            && tracker_startup.enabled
            && tracker_startup.initial.detector.is_slow_unoptimized()
        {
            warn!(
                "{:?} detector selected in a debug build; expect low frame rates",
                tracker_startup.initial.detector
            );
        }

        let source = source::open(&source_startup).context("Failed to open frame source")?;

        match &args.output.directory {
            Some(dir) => info!(
                "Output directory: {} ({})",
                dir.display(),
                match args.output.mode {
                    WriteMode::Create => "create",
                    WriteMode::Append => "append",
                }
            ),
            None => info!("No output directory, tracks are not persisted"),
        }

        Ok(Self::with_stages(
            source_startup,
            tracker_startup,
            source,
            Box::new(SparseFlowFactory),
            args.output.clone(),
        ))
    }

    /// Assemble an orchestrator from already constructed collaborators.
    ///
    /// A progress channel is created when either startup bundle asks for an
    /// interactive view; otherwise progress is discarded.
    pub fn with_stages(
        source_startup: SourceStartupConfig,
        tracker_startup: TrackerStartupConfig,
        source: Box<dyn FrameSource>,
        factory: Box<dyn TrackerFactory>,
        output: OutputTarget,
    ) -> Self {
        let live = LiveParameterStore::new(
            SourceLiveConfig::from_startup(&source_startup),
            TrackerLiveConfig::from_startup(&tracker_startup),
        );
        let wants_source_view = source_startup.display_gui;
        let wants_tracker_view = tracker_startup.enabled && tracker_startup.display_gui;

        let (sink, events): (Box<dyn ProgressSink>, _) = if wants_source_view || wants_tracker_view {
            let (sink, receiver) = ChannelSink::new();
            (Box::new(sink), Some(receiver))
        } else {
            (Box::new(HeadlessSink), None)
        };

        let tracker = TrackerLifecycle::new(tracker_startup);
        if !tracker.is_enabled() {
            info!("Tracking disabled");
        }

        Self {
            source_startup,
            source,
            tracker,
            factory,
            output,
            live,
            shared: SharedState::new(),
            sink,
            events,
            wants_source_view,
            wants_tracker_view,
            stats: PipelineStats::default(),
            rejected_source_generation: None,
            rejected_tracker_generation: None,
        }
    }

    /// Hand out the controller binding. Only one link may exist.
    pub fn link_controller(&mut self) -> Result<ControllerLink> {
        if !self.shared.try_link_controller() {
            bail!("a controller is already linked to this pipeline");
        }
        Ok(ControllerLink::new(
            self.live.clone(),
            Arc::clone(&self.shared),
            self.wants_source_view,
            self.wants_tracker_view,
            self.events.take(),
        ))
    }

    /// Run until the source stops or a stop is requested.
    ///
    /// Returns an error only when the calibration gate fails.
    pub fn run(&mut self) -> Result<PipelineStats> {
        self.shared.set_running(true);
        if self.shared.is_controller_linked() {
            info!("Pipeline running");
        } else {
            info!("Pipeline running without a controller");
        }
        let result = self.run_loop();
        self.shared.set_running(false);
        self.sink.report(ProgressEvent::Finished(self.stats));

        let stats = self.stats;
        info!(
            "Pipeline finished: {} iterations, {} tracking cycles, {} not ready, {} failed retrievals, {} failed conversions",
            stats.iterations,
            stats.tracking_cycles,
            stats.not_ready,
            stats.retrieval_failures,
            stats.conversion_failures
        );
        result.map(|()| stats)
    }

    fn run_loop(&mut self) -> Result<()> {
        let backoff = self.source_startup.idle_backoff;
        let mut consecutive_failures = 0u32;
        loop {
            match self.step()? {
                StepOutcome::Stopped => return Ok(()),
                StepOutcome::NotReady => {
                    consecutive_failures = 0;
                    if !backoff.is_zero() {
                        thread::sleep(backoff);
                    }
                }
                StepOutcome::RetrievalFailed | StepOutcome::ConversionFailed => {
                    consecutive_failures = consecutive_failures.saturating_add(1);
                    if consecutive_failures == FAILURES_BEFORE_BACKOFF {
                        warn!(
                            "{} consecutive frame failures, backing off",
                            FAILURES_BEFORE_BACKOFF
                        );
                    }
                    if consecutive_failures >= FAILURES_BEFORE_BACKOFF {
                        thread::sleep(backoff.max(MIN_FAILURE_BACKOFF));
                    }
                }
                _ => consecutive_failures = 0,
            }
        }
    }

    /// Execute one iteration.
    pub fn step(&mut self) -> Result<StepOutcome> {
        if self.shared.is_stop_requested() || !self.source.wants_to_run() {
            return Ok(StepOutcome::Stopped);
        }
        self.stats.iterations += 1;

        let (source_config, generation) = self.live.source.snapshot_with_generation();
        match self.source.apply_live_config(&source_config) {
            Ok(()) => self.rejected_source_generation = None,
            Err(e) => {
                self.stats.live_config_failures += 1;
                if self.rejected_source_generation != Some(generation) {
                    warn!("Source rejected live config: {:#}", e);
                    self.rejected_source_generation = Some(generation);
                }
            }
        }

        match self.source.retrieve_raw_frame() {
            Retrieval::Ready => {}
            Retrieval::NotReady => {
                self.stats.not_ready += 1;
                return Ok(StepOutcome::NotReady);
            }
            Retrieval::Failed => {
                self.stats.retrieval_failures += 1;
                debug!("Frame retrieval failed");
                return Ok(StepOutcome::RetrievalFailed);
            }
        }

        self.source.normalize_frame();
        self.stats.frames_normalized += 1;
        if !self.tracker.is_enabled() {
            return Ok(StepOutcome::Normalized);
        }

        let Some((frame, meta)) = self.source.convert_to_standard_frame() else {
            self.stats.conversion_failures += 1;
            debug!("Frame conversion failed");
            return Ok(StepOutcome::ConversionFailed);
        };

        if let TrackerLifecycle::Unconfigured(_) = self.tracker {
            let (width, height) = frame.dimensions();
            info!(
                "First frame {} ({}x{}, duplicate={}), resolving calibration",
                meta.index, width, height, meta.duplicate
            );
            self.tracker
                .configure(width, height, self.factory.as_mut(), &self.output)
                .context("Calibration gate failed")?;
            self.stats.tracker_constructions += 1;
            self.sink
                .report(ProgressEvent::CalibrationResolved { width, height });
        }

        let TrackerLifecycle::Configured { stage, .. } = &mut self.tracker else {
            bail!("tracker not configured after calibration gate");
        };

        let (tracker_config, generation) = self.live.tracker.snapshot_with_generation();
        match stage.apply_live_config(&tracker_config) {
            Ok(()) => self.rejected_tracker_generation = None,
            Err(e) => {
                self.stats.live_config_failures += 1;
                if self.rejected_tracker_generation != Some(generation) {
                    warn!("Tracker rejected live config: {:#}", e);
                    self.rejected_tracker_generation = Some(generation);
                }
            }
        }

        stage.accept_frame(frame, meta);
        match stage.run_tracking_cycle() {
            Ok(summary) => {
                self.stats.tracking_cycles += 1;
                debug!("{}", summary);
                if self.stats.tracking_cycles % PROGRESS_LOG_INTERVAL == 0 {
                    info!("Cycle {}: {}", self.stats.tracking_cycles, summary);
                }
                self.sink.report(ProgressEvent::Cycle(summary.clone()));
                Ok(StepOutcome::Tracked(summary))
            }
            Err(e) => {
                self.stats.tracking_failures += 1;
                warn!("Tracking cycle failed on frame {}: {:#}", meta.index, e);
                Ok(StepOutcome::TrackingFailed)
            }
        }
    }

    pub fn state(&self) -> PipelineState {
        self.tracker.state()
    }

    pub fn stats(&self) -> &PipelineStats {
        &self.stats
    }

    pub fn shared(&self) -> &Arc<SharedState> {
        &self.shared
    }

    pub fn live(&self) -> &LiveParameterStore {
        &self.live
    }

    /// Tracker startup bundle; `None` when tracking is disabled.
    pub fn tracker_startup(&self) -> Option<&TrackerStartupConfig> {
        self.tracker.startup()
    }

    pub fn output(&self) -> &OutputTarget {
        &self.output
    }
}
