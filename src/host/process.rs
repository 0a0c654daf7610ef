//! Types exchanged across the host boundary

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;
use uuid::Uuid;

/// Identifier of a spawned process. Fresh per spawn, never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ProcessId(Uuid);

impl ProcessId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for ProcessId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // The first group is enough to tell processes apart in logs
        let s = self.0.simple().to_string();
        write!(f, "proc-{}", &s[..8])
    }
}

/// Expected lifetime / interaction style of a command
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum ProcessKind {
    /// Runs to completion; result returned in one piece
    #[default]
    OneShot,
    /// Server or watcher; output streamed until it ends
    LongRunning,
    /// REPL; later input lines go to its stdin
    Interactive,
}

impl ProcessKind {
    pub fn is_streaming(self) -> bool {
        !matches!(self, ProcessKind::OneShot)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProcessStatus {
    Running,
    Exited,
    Killed,
}

/// Registry record for a tracked process
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManagedProcess {
    pub id: ProcessId,
    pub command: String,
    pub started_at: DateTime<Utc>,
    pub kind: ProcessKind,
    pub status: ProcessStatus,
    pub exit_code: Option<i32>,
    /// OS process id (also the process group id on Unix)
    pub pid: Option<u32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChunkSource {
    Stdout,
    Stderr,
}

/// A piece of streamed output
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputChunk {
    /// Per-process sequence number, shared by stdout and stderr
    pub seq: u64,
    /// Raw text, may contain ANSI escape sequences
    pub text: String,
    pub source: ChunkSource,
    pub timestamp: DateTime<Utc>,
}

/// Final result of a one-shot command
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandResult {
    pub success: bool,
    /// Aggregated stdout + stderr in arrival order
    pub output: String,
    pub exit_code: Option<i32>,
    /// Working directory after the command (differs only for `cd`)
    pub working_dir: PathBuf,
    /// Resolved early by the silence heuristic; the process may still run
    pub stalled: bool,
    pub process_id: Option<ProcessId>,
}

impl CommandResult {
    /// Failure that never reached a running process
    pub fn failed(message: impl Into<String>, working_dir: PathBuf) -> Self {
        Self {
            success: false,
            output: message.into(),
            exit_code: None,
            working_dir,
            stalled: false,
            process_id: None,
        }
    }
}

/// Reply to a spawn request
#[derive(Debug, Clone)]
pub enum SpawnOutcome {
    /// One-shot command finished (or failed to start)
    Completed(CommandResult),
    /// Long-running or interactive process started; output arrives as events
    Streaming { process_id: ProcessId, kind: ProcessKind },
}

/// Events pushed from the host onto the shared feed
#[derive(Debug, Clone)]
pub enum HostEvent {
    Started {
        process_id: ProcessId,
        command: String,
        kind: ProcessKind,
    },
    Output {
        process_id: ProcessId,
        chunk: OutputChunk,
    },
    Ended {
        process_id: ProcessId,
        exit_code: Option<i32>,
        status: ProcessStatus,
    },
}

impl HostEvent {
    pub fn process_id(&self) -> ProcessId {
        match self {
            HostEvent::Started { process_id, .. }
            | HostEvent::Output { process_id, .. }
            | HostEvent::Ended { process_id, .. } => *process_id,
        }
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SupervisorError {
    #[error("no tracked process {0}")]
    UnknownProcess(ProcessId),

    #[error("process {0} does not accept input")]
    NotAcceptingInput(ProcessId),

    #[error("stdin of process {0} is closed")]
    InputClosed(ProcessId),

    #[error("process host is not running")]
    HostUnavailable,
}
