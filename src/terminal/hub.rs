//! The session-facing API
//!
//! [`TerminalHub`] owns every session and talks to the process supervisor
//! only through its handle and the host event feed. UI layers call into the
//! hub and listen for [`Notification`]s.
//!
//! Nothing here waits on a running command. Submitted lines are dispatched
//! and their outcomes come back on the hub's event feed, which the owner
//! drains into [`TerminalHub::handle_event`].

use super::demux::{OutputDemux, RedrawBatcher, Routed};
use super::executor::{CommandExecutor, ExecOutcome, PendingCommand};
use super::router::{InteractiveRouter, Route, RouterState};
use crate::ansi::{AnsiColor, SpanStyle, StyledSpan};
use crate::core::classifier::CommandClassifier;
use crate::core::config::Config;
use crate::core::events::{Notification, NotificationSender};
use crate::core::sessions::{LogOrigin, SessionId, SessionManager, SessionSnapshot, SharedCwd};
use crate::host::{
    self, HostEvent, ManagedProcess, ProcessId, ProcessKind, ProcessStatus, ShellSpec, SpawnOutcome,
    Supervisor, SupervisorError, SupervisorHandle,
};
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum HubError {
    #[error("no session with id {0}")]
    UnknownSession(SessionId),

    #[error("session {session_id} is still running {process_id} (interrupt it first)")]
    Busy {
        session_id: SessionId,
        process_id: ProcessId,
    },

    #[error(transparent)]
    Supervisor(#[from] SupervisorError),
}

/// Input for [`TerminalHub::handle_event`]
#[derive(Debug)]
pub enum HubEvent {
    Host(HostEvent),
    /// The host answered a dispatched line
    Reply {
        pending: PendingCommand,
        process_id: ProcessId,
        outcome: SpawnOutcome,
    },
}

/// Result of submitting a line with [`TerminalHub::send_key`]
#[derive(Debug, Clone)]
pub enum KeyOutcome {
    /// Ran as a command (possibly after leaving an interactive process)
    Executed(ExecOutcome),
    /// Written to the interactive process's terminal, which echoes it
    Forwarded(ProcessId),
    /// Forwarding failed; the session is back to running commands
    ForwardFailed(SupervisorError),
}

/// Short label for the sessions list
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSummary {
    pub id: SessionId,
    pub display_name: String,
    pub working_directory: PathBuf,
    pub is_active: bool,
    pub current_process: Option<ProcessId>,
}

pub struct TerminalHub {
    sessions: SessionManager,
    host: SupervisorHandle,
    events_tx: mpsc::UnboundedSender<HubEvent>,
    /// Event feed (taken by the event loop)
    events: Option<mpsc::UnboundedReceiver<HubEvent>>,
    /// Lines sent to the host whose outcome has not been applied yet
    in_flight: HashMap<SessionId, ProcessId>,
    demux: OutputDemux,
    router: InteractiveRouter,
    executor: CommandExecutor,
    notifications: NotificationSender,
    redraw: RedrawBatcher,
    shell_path: PathBuf,
}

impl TerminalHub {
    /// Start a supervisor for `shell` and build the hub around it.
    /// Must be called inside a tokio runtime.
    pub fn new(config: &Config, shell: ShellSpec, notifications: NotificationSender) -> Self {
        let (host_tx, mut host_rx) = mpsc::unbounded_channel();
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let shell_path = shell.program.clone();
        let host = Supervisor::new(config, shell, host_tx).start();

        let forward = events_tx.clone();
        tokio::spawn(async move {
            while let Some(event) = host_rx.recv().await {
                if forward.send(HubEvent::Host(event)).is_err() {
                    break;
                }
            }
        });

        Self {
            sessions: SessionManager::new(config.session.clone()),
            executor: CommandExecutor::new(
                host.clone(),
                CommandClassifier::from_config(&config.classifier),
                notifications.clone(),
            ),
            host,
            events_tx,
            events: Some(events_rx),
            in_flight: HashMap::new(),
            demux: OutputDemux::new(),
            router: InteractiveRouter::from_config(&config.router),
            notifications,
            redraw: RedrawBatcher::new(Duration::from_millis(config.display.redraw_interval_ms)),
            shell_path,
        }
    }

    /// Resolve the shell (and login environment) from config, then build the hub
    pub async fn start(config: &Config, notifications: NotificationSender) -> Self {
        let shell = host::resolve_shell(&config.shell).await;
        Self::new(config, shell, notifications)
    }

    /// Take the event receiver for the caller's event loop; feed each event
    /// back through [`handle_event`](Self::handle_event).
    pub fn take_events(&mut self) -> Option<mpsc::UnboundedReceiver<HubEvent>> {
        self.events.take()
    }

    /// Create a session in `initial_dir` (home directory if `None`) and
    /// make it active
    pub fn create_session(&mut self, initial_dir: Option<PathBuf>) -> SessionId {
        let dir = initial_dir.unwrap_or_else(default_directory);
        let id = self.sessions.create(dir, self.shell_path.clone());
        info!("Created session {}", id);
        self.mark_dirty();
        self.notifications.send(Notification::ActiveSessionChanged { session_id: Some(id) });
        id
    }

    pub fn switch_active(&mut self, id: SessionId) -> Result<(), HubError> {
        if !self.sessions.switch_active(id) {
            return Err(HubError::UnknownSession(id));
        }
        debug!("Switched to session {}", id);
        self.notifications.send(Notification::ActiveSessionChanged { session_id: Some(id) });
        Ok(())
    }

    /// Interrupt the session's live process and remove the session
    pub fn close_session(&mut self, id: SessionId) -> Result<(), HubError> {
        let was_active = self.sessions.active_session_id() == Some(id);
        let session = self.sessions.close(id).ok_or(HubError::UnknownSession(id))?;

        if let Some(process_id) = self.in_flight.remove(&id) {
            info!("Closing session {}: interrupting {}", id, process_id);
            self.host.kill(Some(process_id));
        }
        if let Some(process_id) = session.current_process {
            info!("Closing session {}: interrupting {}", id, process_id);
            self.host.kill(Some(process_id));
        }
        self.demux.unbind_session(id);
        self.router.force_idle(id);
        self.redraw.forget(id);

        if was_active {
            self.notifications.send(Notification::ActiveSessionChanged {
                session_id: self.sessions.active_session_id(),
            });
        }
        Ok(())
    }

    /// Run `text` as a command in the session, bypassing the router.
    ///
    /// Returns once the line is on its way; fails with [`HubError::Busy`]
    /// while the session's previous line has no outcome yet.
    pub fn execute(&mut self, id: SessionId, text: &str) -> Result<ExecOutcome, HubError> {
        if let Some(&process_id) = self.in_flight.get(&id) {
            return Err(HubError::Busy {
                session_id: id,
                process_id,
            });
        }
        let dispatched = self.executor.dispatch(&mut self.sessions, id, text);
        self.mark_dirty();
        let Some((pending, spawn)) = dispatched? else {
            return Ok(ExecOutcome::Skipped);
        };

        let process_id = spawn.process_id();
        self.in_flight.insert(id, process_id);
        // Bound before the host sees the request so no early output is lost;
        // the real kind arrives with `Started`
        self.demux.bind(process_id, id, ProcessKind::OneShot);

        let events = self.events_tx.clone();
        tokio::spawn(async move {
            let outcome = spawn.outcome().await;
            let _ = events.send(HubEvent::Reply {
                pending,
                process_id,
                outcome,
            });
        });
        Ok(ExecOutcome::Dispatched(process_id))
    }

    /// Submit a line as the user typed it: forwarded to an interactive
    /// process when one owns the session, executed otherwise.
    pub async fn send_key(&mut self, id: SessionId, text: &str) -> Result<KeyOutcome, HubError> {
        if self.sessions.get(id).is_none() {
            return Err(HubError::UnknownSession(id));
        }

        match self.router.route(id, text) {
            Route::Dispatch => Ok(KeyOutcome::Executed(self.execute(id, text)?)),
            Route::Forward(process_id) => {
                let result = self.host.send_input(process_id, format!("{}\n", text)).await;
                let outcome = match result {
                    Ok(()) => KeyOutcome::Forwarded(process_id),
                    Err(e) => {
                        warn!("Forwarding to {} failed: {}", process_id, e);
                        self.router.force_idle(id);
                        self.release_process(id, process_id);
                        self.system_line(id, &format!("input not delivered: {}", e), AnsiColor::Red);
                        KeyOutcome::ForwardFailed(e)
                    }
                };
                self.mark_dirty();
                Ok(outcome)
            }
            Route::Abandon(process_id) => {
                debug!("Session {} leaving {} for a command", id, process_id);
                self.host.kill(Some(process_id));
                self.release_process(id, process_id);
                Ok(KeyOutcome::Executed(self.execute(id, text)?))
            }
        }
    }

    pub fn snapshot(&self, id: SessionId) -> Option<SessionSnapshot> {
        self.sessions.snapshot(id)
    }

    pub fn sessions(&self) -> Vec<SessionSummary> {
        self.sessions
            .sessions()
            .iter()
            .map(|s| SessionSummary {
                id: s.id,
                display_name: s.display_name.clone(),
                working_directory: s.working_directory.clone(),
                is_active: s.is_active,
                current_process: s.current_process,
            })
            .collect()
    }

    pub fn active_session_id(&self) -> Option<SessionId> {
        self.sessions.active_session_id()
    }

    /// Whether input to the session currently goes to an interactive process
    pub fn router_state(&self, id: SessionId) -> RouterState {
        self.router.state(id)
    }

    /// Whether the session's last line is still waiting for its outcome
    pub fn is_busy(&self, id: SessionId) -> bool {
        self.in_flight.contains_key(&id)
    }

    /// Apply one event from the feed returned by
    /// [`take_events`](Self::take_events)
    pub fn handle_event(&mut self, event: HubEvent) {
        match event {
            HubEvent::Host(event) => self.handle_host_event(event),
            HubEvent::Reply {
                pending,
                process_id,
                outcome,
            } => self.apply_reply(pending, process_id, outcome),
        }
    }

    /// Apply one event from the host
    pub fn handle_host_event(&mut self, event: HostEvent) {
        match self.demux.route(event) {
            None => {}
            Some(Routed::Started {
                session_id,
                process_id,
                kind,
            }) => self.bind_process(session_id, process_id, kind),
            Some(Routed::Output {
                session_id,
                origin,
                spans,
            }) => {
                self.sessions.append(session_id, origin, spans);
            }
            Some(Routed::Ended {
                session_id,
                process_id,
                exit_code,
                status,
            }) => {
                self.router.on_ended(process_id);
                if let Some(session) = self.sessions.get_mut(session_id) {
                    if session.current_process == Some(process_id) {
                        session.current_process = None;
                    }
                }
                let (message, color) = match (status, exit_code) {
                    (ProcessStatus::Killed, _) => ("[process interrupted]".to_string(), AnsiColor::Yellow),
                    (_, Some(0)) => ("[process exited]".to_string(), AnsiColor::BrightBlack),
                    (_, Some(code)) => (format!("[process exited with code {}]", code), AnsiColor::Red),
                    (_, None) => ("[process terminated]".to_string(), AnsiColor::Red),
                };
                self.system_line(session_id, &message, color);
            }
        }
        self.mark_dirty();
    }

    /// Emit a coalesced `Redraw` if the batching window has elapsed.
    /// Returns true when a notification was sent.
    pub fn flush_redraws(&mut self) -> bool {
        self.mark_dirty();
        match self.redraw.flush(Instant::now()) {
            Some(sessions) => {
                self.notifications.send(Notification::Redraw { sessions });
                true
            }
            None => false,
        }
    }

    pub fn history_previous(&mut self, id: SessionId) -> Result<Option<String>, HubError> {
        let session = self.sessions.get_mut(id).ok_or(HubError::UnknownSession(id))?;
        Ok(session.history.previous().map(str::to_string))
    }

    pub fn history_next(&mut self, id: SessionId) -> Result<Option<String>, HubError> {
        let session = self.sessions.get_mut(id).ok_or(HubError::UnknownSession(id))?;
        Ok(session.history.next().map(str::to_string))
    }

    /// Ctrl+C: interrupt the command still running in the foreground, or
    /// else the session's streaming process. Returns false if there is none.
    pub fn interrupt(&mut self, id: SessionId) -> Result<bool, HubError> {
        let session = self.sessions.get(id).ok_or(HubError::UnknownSession(id))?;
        match self.in_flight.get(&id).copied().or(session.current_process) {
            Some(process_id) => {
                self.host.kill(Some(process_id));
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Processes currently tracked by the supervisor
    pub async fn processes(&self) -> Vec<ManagedProcess> {
        self.host.processes().await
    }

    pub fn shared_cwd(&self) -> SharedCwd {
        self.sessions.shared_cwd()
    }

    /// Force-kill every process and stop the supervisor
    pub async fn shutdown(&mut self) {
        info!("Shutting down terminal hub");
        self.host.shutdown().await;
    }

    /// Apply the host's answer to a dispatched line. Answers the session no
    /// longer waits for (closed, replaced or already ended) are dropped.
    fn apply_reply(&mut self, pending: PendingCommand, process_id: ProcessId, outcome: SpawnOutcome) {
        let session_id = pending.session_id;
        let awaited = self.in_flight.get(&session_id) == Some(&process_id);
        let attached = self
            .sessions
            .get(session_id)
            .is_some_and(|s| s.current_process == Some(process_id));

        match outcome {
            SpawnOutcome::Streaming { kind, .. } if awaited || attached => {
                info!("Session {} streaming {} ({:?})", session_id, process_id, kind);
                self.bind_process(session_id, process_id, kind);
            }
            SpawnOutcome::Completed(result) if awaited => {
                self.in_flight.remove(&session_id);
                self.demux.unbind(process_id);
                self.executor.finish(&mut self.sessions, &pending, &result);
            }
            _ => debug!("Dropping reply for {} (session {} moved on)", process_id, session_id),
        }
        self.mark_dirty();
    }

    /// Attach a streaming process to a session, replacing (and interrupting)
    /// any process it already had. Safe to call again for the same process.
    fn bind_process(&mut self, session_id: SessionId, process_id: ProcessId, kind: ProcessKind) {
        if self.in_flight.get(&session_id) == Some(&process_id) {
            self.in_flight.remove(&session_id);
        }
        let previous = match self.sessions.get_mut(session_id) {
            Some(session) => session.current_process.replace(process_id),
            None => return,
        };
        if let Some(old) = previous.filter(|old| *old != process_id) {
            debug!("Session {} replaces {} with {}", session_id, old, process_id);
            self.host.kill(Some(old));
            self.demux.unbind(old);
            self.router.on_ended(old);
        }
        self.demux.bind(process_id, session_id, kind);
        self.router.on_started(session_id, process_id, kind);
    }

    /// Detach a process from its session; its later events are dropped
    fn release_process(&mut self, session_id: SessionId, process_id: ProcessId) {
        self.demux.unbind(process_id);
        if let Some(session) = self.sessions.get_mut(session_id) {
            if session.current_process == Some(process_id) {
                session.current_process = None;
            }
        }
    }

    fn system_line(&mut self, id: SessionId, text: &str, color: AnsiColor) {
        self.sessions.append(
            id,
            LogOrigin::System,
            vec![StyledSpan::styled(format!("{}\n", text), SpanStyle::default().fg(color))],
        );
    }

    fn mark_dirty(&mut self) {
        let dirty = self.sessions.take_dirty();
        self.redraw.mark(dirty);
    }
}

fn default_directory() -> PathBuf {
    dirs::home_dir()
        .or_else(|| std::env::current_dir().ok())
        .unwrap_or_else(|| PathBuf::from("/"))
}
