//! Positional command-line arguments.
//!
//! ```text
//! mono-flow [LAUNCH_FILE] [OUTPUT_DIR] [append]
//! ```
//!
//! The third argument is presence-only: any value switches track output from
//! create/truncate to append.

use std::path::{Path, PathBuf};

/// Launch file used when none is given, relative to the user's home directory.
pub const DEFAULT_LAUNCH_FILE: &str = "Documents/mono-flow/launch.yaml";

/// How persisted tracker output treats an existing file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WriteMode {
    /// Create the file, truncating previous contents.
    #[default]
    Create,
    /// Append to an existing file.
    Append,
}

/// Where (and whether) downstream stages persist their output.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OutputTarget {
    pub directory: Option<PathBuf>,
    pub mode: WriteMode,
}

impl OutputTarget {
    pub fn is_enabled(&self) -> bool {
        self.directory.is_some()
    }
}

/// Parsed process arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunArgs {
    pub config_path: PathBuf,
    /// True when `config_path` came from the command line.
    pub explicit_config: bool,
    pub output: OutputTarget,
}

impl RunArgs {
    /// Parse from the process arguments.
    pub fn from_env() -> Self {
        Self::parse(std::env::args().skip(1))
    }

    /// Parse from positional arguments, excluding the program name.
    pub fn parse<I, S>(args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let args: Vec<String> = args.into_iter().map(Into::into).collect();

        let (config_path, explicit_config) = match args.first() {
            Some(path) => (PathBuf::from(path), true),
            None => (default_config_path(), false),
        };

        let directory = args.get(1).map(PathBuf::from);
        let mode = if args.len() >= 3 {
            WriteMode::Append
        } else {
            WriteMode::Create
        };

        Self {
            config_path,
            explicit_config,
            output: OutputTarget { directory, mode },
        }
    }
}

/// Platform default launch file location.
pub fn default_config_path() -> PathBuf {
    let home_var = if cfg!(windows) { "USERPROFILE" } else { "HOME" };
    default_config_path_in(std::env::var_os(home_var).as_deref().map(Path::new))
}

fn default_config_path_in(home: Option<&Path>) -> PathBuf {
    match home {
        Some(home) => home.join(DEFAULT_LAUNCH_FILE),
        None => PathBuf::from(DEFAULT_LAUNCH_FILE),
    }
}
