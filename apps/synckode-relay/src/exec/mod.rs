//! Running participant code and commands on the host.
//!
//! [`dispatcher`] turns source text into a launch command, [`allowlist`]
//! admits raw command lines, and [`supervisor`] owns the one process a
//! connection may have running at a time. Nothing here is sandboxed beyond
//! the allowlist and the wall-clock timeout.

pub mod allowlist;
pub mod dispatcher;
pub mod rewrite;
mod scratch;
pub mod supervisor;

use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use thiserror::Error;

use crate::protocol::{ServerEvent, StreamKind};

pub use dispatcher::Dispatcher;
pub use supervisor::ExecutionSlot;

pub const DEFAULT_EXEC_TIMEOUT: Duration = Duration::from_secs(30);

/// Identifies one spawn within a connection's [`ExecutionSlot`].
pub type RunId = u64;

/// A program and its arguments, spawned without a shell.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandLine {
    pub program: String,
    pub args: Vec<String>,
}

impl CommandLine {
    pub fn new<I, S>(program: impl Into<String>, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ExecConfig {
    /// Working directory for raw commands and parent of per-run directories.
    pub scratch_dir: PathBuf,
    pub timeout: Duration,
}

impl Default for ExecConfig {
    fn default() -> Self {
        Self {
            scratch_dir: std::env::temp_dir().join("synckode"),
            timeout: DEFAULT_EXEC_TIMEOUT,
        }
    }
}

/// Execution state shared by every connection.
#[derive(Debug)]
pub struct ExecContext {
    pub config: ExecConfig,
    pub dispatcher: Dispatcher,
    running: AtomicUsize,
}

impl ExecContext {
    pub fn new(config: ExecConfig) -> Self {
        Self {
            config,
            dispatcher: Dispatcher::new(),
            running: AtomicUsize::new(0),
        }
    }

    /// Processes currently alive across all connections.
    pub fn running(&self) -> usize {
        self.running.load(Ordering::Relaxed)
    }

    pub(crate) fn process_started(&self) {
        self.running.fetch_add(1, Ordering::Relaxed);
        metrics::increment_gauge!("synckode_processes_running", 1.0);
    }

    pub(crate) fn process_finished(&self) {
        self.running.fetch_sub(1, Ordering::Relaxed);
        metrics::decrement_gauge!("synckode_processes_running", 1.0);
    }
}

/// What a `terminal-run` asks for. A non-blank `command` wins over `code`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunRequest {
    pub code: Option<String>,
    pub language: Option<String>,
    pub command: Option<String>,
}

/// Completion traffic from a running process back to the owning connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecEvent {
    Output {
        run: RunId,
        kind: StreamKind,
        data: String,
    },
    TimedOut {
        run: RunId,
    },
    Exited {
        run: RunId,
        status: i32,
    },
}

impl ExecEvent {
    pub fn run(&self) -> RunId {
        match self {
            ExecEvent::Output { run, .. } | ExecEvent::TimedOut { run } | ExecEvent::Exited { run, .. } => *run,
        }
    }
}

/// Terminal traffic addressed to the connection that started the run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TerminalFrame {
    Output { kind: StreamKind, data: String },
    Exit { status: i32 },
}

impl TerminalFrame {
    pub fn stdout(data: impl Into<String>) -> Self {
        TerminalFrame::Output {
            kind: StreamKind::Stdout,
            data: data.into(),
        }
    }

    pub fn stderr(data: impl Into<String>) -> Self {
        TerminalFrame::Output {
            kind: StreamKind::Stderr,
            data: data.into(),
        }
    }

    pub fn system(data: impl Into<String>) -> Self {
        TerminalFrame::Output {
            kind: StreamKind::System,
            data: data.into(),
        }
    }
}

impl From<TerminalFrame> for ServerEvent {
    fn from(frame: TerminalFrame) -> Self {
        match frame {
            TerminalFrame::Output { kind, data } => ServerEvent::TerminalOutput {
                data,
                stream_kind: kind,
            },
            TerminalFrame::Exit { status } => ServerEvent::TerminalExit {
                status_code: status,
            },
        }
    }
}

#[derive(Debug, Error)]
pub enum ExecError {
    #[error("failed to prepare run directory {path}: {source}")]
    Scratch {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to start \"{program}\": {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },
}

impl ExecError {
    /// Text streamed on stderr before the failing run exits with status 1.
    pub fn terminal_message(&self) -> String {
        match self {
            ExecError::Spawn { program, source } if source.kind() == std::io::ErrorKind::NotFound => {
                format!("Error: {self} (\"{program}\" is not installed or not in PATH)\n")
            }
            _ => format!("Error: {self}\n"),
        }
    }
}
