//! Terminal controller for an interactive run.
//!
//! Reads commands from stdin while printing progress from the worker:
//!
//! ```text
//! source <key>=<value>    set a source live parameter
//! tracker <key>=<value>   set a tracker live parameter
//! show                    print the live parameters
//! stop                    stop the pipeline
//! help                    list commands and keys
//! ```

use std::io::BufRead;
use std::thread;

use anyhow::{Context, Result, bail};
use crossbeam_channel::{Receiver, never, select, unbounded};
use thiserror::Error;
use tracing::{debug, info};

use crate::config::{SourceLiveConfig, TrackerLiveConfig};
use crate::system::{ControllerLink, ProgressEvent};

/// Print a cycle line every this many cycles.
const CYCLE_PRINT_INTERVAL: u64 = 30;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Target {
    Source,
    Tracker,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Set {
        target: Target,
        key: String,
        value: String,
    },
    Show,
    Stop,
    Help,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CommandError {
    #[error("unknown command `{0}` (try `help`)")]
    Unknown(String),
    #[error("expected `{0} <key>=<value>`")]
    MissingAssignment(&'static str),
}

impl Command {
    /// Parse one input line. Blank lines yield `None`.
    pub fn parse(line: &str) -> Result<Option<Self>, CommandError> {
        let line = line.trim();
        let Some(word) = line.split_whitespace().next() else {
            return Ok(None);
        };
        let rest = line[word.len()..].trim();

        let target = match word.to_ascii_lowercase().as_str() {
            "show" => return Ok(Some(Self::Show)),
            "stop" | "quit" | "exit" => return Ok(Some(Self::Stop)),
            "help" | "?" => return Ok(Some(Self::Help)),
            "source" => Target::Source,
            "tracker" => Target::Tracker,
            _ => return Err(CommandError::Unknown(word.to_string())),
        };
        let name = match target {
            Target::Source => "source",
            Target::Tracker => "tracker",
        };

        let (key, value) = rest
            .split_once('=')
            .ok_or(CommandError::MissingAssignment(name))?;
        let (key, value) = (key.trim(), value.trim());
        if key.is_empty() || value.is_empty() {
            return Err(CommandError::MissingAssignment(name));
        }
        Ok(Some(Self::Set {
            target,
            key: key.to_string(),
            value: value.to_string(),
        }))
    }
}

/// Whether the console keeps running after a command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Exit,
}

/// Apply a command to the linked pipeline.
pub fn execute(link: &ControllerLink, command: Command) -> Flow {
    match command {
        Command::Set { target, key, value } => {
            let result = match target {
                Target::Source if link.wants_source_view() => {
                    link.source().update(|cfg| cfg.set_field(&key, &value))
                }
                Target::Tracker if link.wants_tracker_view() => {
                    link.tracker().update(|cfg| cfg.set_field(&key, &value))
                }
                _ => {
                    println!("{:?} view is not enabled in the launch file", target);
                    return Flow::Continue;
                }
            };
            match result {
                Ok(()) => println!("{key} = {value}"),
                Err(e) => println!("error: {e}"),
            }
            Flow::Continue
        }
        Command::Show => {
            if link.wants_source_view() {
                println!("source:  {}", link.source().snapshot());
            }
            if link.wants_tracker_view() {
                println!("tracker: {}", link.tracker().snapshot());
            }
            Flow::Continue
        }
        Command::Stop => {
            info!("Stop requested from console");
            link.request_stop();
            Flow::Exit
        }
        Command::Help => {
            print_help(link);
            Flow::Continue
        }
    }
}

fn print_help(link: &ControllerLink) {
    println!("commands: show | stop | help");
    if link.wants_source_view() {
        println!("  source <key>=<value>   keys: {}", SourceLiveConfig::FIELDS.join(", "));
    }
    if link.wants_tracker_view() {
        println!("  tracker <key>=<value>  keys: {}", TrackerLiveConfig::FIELDS.join(", "));
    }
}

/// Forward stdin lines over a channel. The reader thread ends at EOF.
fn spawn_stdin_reader() -> Result<Receiver<String>> {
    let (sender, receiver) = unbounded();
    thread::Builder::new()
        .name("console-input".to_string())
        .spawn(move || {
            for line in std::io::stdin().lock().lines() {
                let Ok(line) = line else { break };
                if sender.send(line).is_err() {
                    break;
                }
            }
            debug!("Console input closed");
        })
        .context("Failed to spawn console input thread")?;
    Ok(receiver)
}

/// Run the console until the pipeline finishes or the user stops it.
pub fn run_console(link: &ControllerLink) -> Result<()> {
    let Some(events) = link.events() else {
        bail!("console requires an interactive pipeline");
    };
    let mut input = spawn_stdin_reader()?;
    print_help(link);

    let mut cycles = 0u64;
    loop {
        let next = select! {
            recv(events) -> event => Input::Event(event.ok()),
            recv(input) -> line => Input::Line(line.ok()),
        };
        match next {
            Input::Event(Some(ProgressEvent::CalibrationResolved { width, height })) => {
                println!("calibration resolved: {width}x{height}");
            }
            Input::Event(Some(ProgressEvent::Cycle(summary))) => {
                cycles += 1;
                if cycles % CYCLE_PRINT_INTERVAL == 1 {
                    println!("{summary}");
                }
            }
            Input::Event(Some(ProgressEvent::Finished(stats))) => {
                println!(
                    "pipeline finished after {} iterations ({} tracking cycles)",
                    stats.iterations, stats.tracking_cycles
                );
                return Ok(());
            }
            Input::Event(None) => return Ok(()),
            Input::Line(Some(line)) => match Command::parse(&line) {
                Ok(Some(command)) => {
                    if execute(link, command) == Flow::Exit {
                        return Ok(());
                    }
                }
                Ok(None) => {}
                Err(e) => println!("error: {e}"),
            },
            // Stdin closed; keep following progress only.
            Input::Line(None) => input = never(),
        }
    }
}

enum Input {
    Event(Option<ProgressEvent>),
    Line(Option<String>),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{DetectorKind, Normalization};
    use crate::system::{LiveParameterStore, SharedState};

    fn link(source_view: bool, tracker_view: bool) -> ControllerLink {
        ControllerLink::new(
            LiveParameterStore::new(SourceLiveConfig::default(), TrackerLiveConfig::default()),
            SharedState::new(),
            source_view,
            tracker_view,
            None,
        )
    }

    #[test]
    fn test_parse_commands() {
        assert_eq!(Command::parse("   "), Ok(None));
        assert_eq!(Command::parse("show"), Ok(Some(Command::Show)));
        assert_eq!(Command::parse("QUIT"), Ok(Some(Command::Stop)));
        assert_eq!(
            Command::parse("tracker detector = harris"),
            Ok(Some(Command::Set {
                target: Target::Tracker,
                key: "detector".to_string(),
                value: "harris".to_string(),
            }))
        );
        assert_eq!(
            Command::parse("source roi=0,0,32,32"),
            Ok(Some(Command::Set {
                target: Target::Source,
                key: "roi".to_string(),
                value: "0,0,32,32".to_string(),
            }))
        );
    }

    #[test]
    fn test_parse_errors() {
        assert_eq!(
            Command::parse("jump"),
            Err(CommandError::Unknown("jump".to_string()))
        );
        assert_eq!(
            Command::parse("source paused"),
            Err(CommandError::MissingAssignment("source"))
        );
        assert_eq!(
            Command::parse("tracker sensitivity="),
            Err(CommandError::MissingAssignment("tracker"))
        );
    }

    #[test]
    fn test_execute_updates_live_bundles() {
        let link = link(true, true);
        let flow = execute(
            &link,
            Command::parse("tracker detector=harris").unwrap().unwrap(),
        );
        assert_eq!(flow, Flow::Continue);
        execute(
            &link,
            Command::parse("source normalization=equalize").unwrap().unwrap(),
        );

        assert_eq!(link.tracker().snapshot().detector, DetectorKind::Harris);
        assert_eq!(link.source().snapshot().normalization, Normalization::Equalize);
    }

    #[test]
    fn test_execute_rejects_invalid_value() {
        let link = link(true, true);
        execute(
            &link,
            Command::parse("source clip_fraction=2").unwrap().unwrap(),
        );
        assert_eq!(link.source().snapshot(), SourceLiveConfig::default());
        assert_eq!(link.source().generation(), 0);
    }

    #[test]
    fn test_execute_respects_view_flags() {
        let link = link(false, true);
        execute(&link, Command::parse("source paused=true").unwrap().unwrap());
        assert!(!link.source().snapshot().paused);
    }

    #[test]
    fn test_stop_exits_and_requests_stop() {
        let shared = SharedState::new();
        let link = ControllerLink::new(
            LiveParameterStore::new(SourceLiveConfig::default(), TrackerLiveConfig::default()),
            shared.clone(),
            true,
            true,
            None,
        );
        assert_eq!(execute(&link, Command::Stop), Flow::Exit);
        assert!(shared.is_stop_requested());
    }

    #[test]
    fn test_console_requires_events() {
        assert!(run_console(&link(true, false)).is_err());
    }
}
