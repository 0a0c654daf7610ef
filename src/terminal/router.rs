//! Decides whether a submitted line is a new command or REPL input

use crate::core::config::RouterConfig;
use crate::core::sessions::SessionId;
use crate::host::{ProcessId, ProcessKind};
use std::collections::HashMap;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouterState {
    Idle,
    Forwarding(ProcessId),
}

/// Where a submitted line goes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    /// Run as an ordinary command
    Dispatch,
    /// Write to the interactive process's stdin
    Forward(ProcessId),
    /// Leave the interactive process (interrupt it) and run the line as a
    /// command
    Abandon(ProcessId),
}

/// Per-session Idle / Forwarding state machine
#[derive(Debug, Default)]
pub struct InteractiveRouter {
    forwarding: HashMap<SessionId, ProcessId>,
    escape_commands: Vec<String>,
}

impl InteractiveRouter {
    pub fn from_config(config: &RouterConfig) -> Self {
        Self {
            forwarding: HashMap::new(),
            escape_commands: config.escape_commands.clone(),
        }
    }

    pub fn state(&self, session_id: SessionId) -> RouterState {
        match self.forwarding.get(&session_id) {
            Some(pid) => RouterState::Forwarding(*pid),
            None => RouterState::Idle,
        }
    }

    pub fn route(&mut self, session_id: SessionId, line: &str) -> Route {
        let Some(&process_id) = self.forwarding.get(&session_id) else {
            return Route::Dispatch;
        };
        if self.is_escape(line) {
            debug!("Session {} leaves {} for {:?}", session_id, process_id, line);
            self.forwarding.remove(&session_id);
            return Route::Abandon(process_id);
        }
        Route::Forward(process_id)
    }

    /// A process started for `session_id`; only interactive ones switch
    /// the session to forwarding. Safe to call more than once.
    pub fn on_started(&mut self, session_id: SessionId, process_id: ProcessId, kind: ProcessKind) {
        if kind == ProcessKind::Interactive {
            self.forwarding.insert(session_id, process_id);
        }
    }

    /// Returns the session that was forwarding to `process_id`, if any
    pub fn on_ended(&mut self, process_id: ProcessId) -> Option<SessionId> {
        let session_id = self
            .forwarding
            .iter()
            .find(|(_, pid)| **pid == process_id)
            .map(|(sid, _)| *sid)?;
        self.forwarding.remove(&session_id);
        Some(session_id)
    }

    pub fn force_idle(&mut self, session_id: SessionId) {
        self.forwarding.remove(&session_id);
    }

    /// First token (basename) is one of the escape commands
    pub fn is_escape(&self, line: &str) -> bool {
        let Some(first) = line.split_whitespace().next() else {
            return false;
        };
        let program = first.rsplit('/').next().unwrap_or(first);
        self.escape_commands.iter().any(|c| c == program)
    }
}
