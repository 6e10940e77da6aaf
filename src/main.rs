use std::process::ExitCode;

use anyhow::Result;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use mono_flow::config::RunArgs;
use mono_flow::system::{PipelineOrchestrator, PipelineWorker, is_calibration_error};
use mono_flow::viz::run_console;

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) if is_calibration_error(&e) => {
            error!("Camera calibration failed: {:#}", e);
            ExitCode::FAILURE
        }
        Err(e) => {
            error!("{:#}", e);
            ExitCode::FAILURE
        }
    }
}

fn run() -> Result<()> {
    let args = RunArgs::from_env();
    let mut orchestrator = PipelineOrchestrator::initialize(&args)?;
    let link = orchestrator.link_controller()?;
    let output = orchestrator.output().clone();

    let worker = PipelineWorker::spawn(orchestrator)?;
    if link.is_interactive() {
        run_console(&link)?;
        worker.request_stop();
    }

    let stats = worker.join()?;
    info!(
        "Processed {} frames, {} tracking cycles",
        stats.frames_normalized, stats.tracking_cycles
    );
    if let Some(dir) = output.directory.filter(|_| stats.tracking_cycles > 0) {
        info!("Tracks written to {}", dir.display());
    }
    Ok(())
}
