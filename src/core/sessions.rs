//! Session registry for multiple terminal sessions
//!
//! Each session has its own working directory, output log, command history
//! and at most one live long-running process. The registry is owned by the
//! hub; nothing here talks to processes.

use super::history::CommandHistory;
use crate::ansi::StyledSpan;
use crate::core::config::SessionConfig;
use crate::host::ProcessId;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Unique identifier for a session
pub type SessionId = usize;

/// Working directory of the active session, readable by collaborators
pub type SharedCwd = Arc<RwLock<Option<PathBuf>>>;

/// Where a log entry came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LogOrigin {
    Stdout,
    Stderr,
    /// Prompt printed before a submitted command
    Prompt,
    /// The submitted text itself
    Echo,
    Banner,
    /// Diagnostics and lifecycle lines
    System,
}

/// One appended piece of output. Entries are concatenated for display, so
/// an entry does not have to be a whole line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    pub seq: u64,
    pub timestamp: DateTime<Utc>,
    pub origin: LogOrigin,
    pub spans: Vec<StyledSpan>,
}

impl LogEntry {
    /// Plain text of the entry
    pub fn text(&self) -> String {
        self.spans.iter().map(|s| s.text.as_str()).collect()
    }
}

/// A single terminal session
#[derive(Debug)]
pub struct TerminalSession {
    pub id: SessionId,
    pub display_name: String,
    pub working_directory: PathBuf,
    pub history: CommandHistory,
    pub is_active: bool,
    pub shell_path: PathBuf,
    /// Live long-running or interactive process bound to this session
    pub current_process: Option<ProcessId>,
    output_log: VecDeque<LogEntry>,
    next_seq: u64,
    scrollback: usize,
}

impl TerminalSession {
    fn new(id: SessionId, working_directory: PathBuf, shell_path: PathBuf, config: &SessionConfig) -> Self {
        Self {
            id,
            display_name: format!("Terminal {}", id),
            working_directory,
            history: CommandHistory::with_limit(config.history_limit),
            is_active: false,
            shell_path,
            current_process: None,
            output_log: VecDeque::new(),
            next_seq: 0,
            scrollback: config.scrollback,
        }
    }

    /// Append to the log, dropping the oldest entries past the scrollback.
    /// Empty span lists are ignored.
    pub fn append(&mut self, origin: LogOrigin, spans: Vec<StyledSpan>) -> bool {
        if spans.iter().all(|s| s.text.is_empty()) {
            return false;
        }
        self.output_log.push_back(LogEntry {
            seq: self.next_seq,
            timestamp: Utc::now(),
            origin,
            spans,
        });
        self.next_seq += 1;
        if self.scrollback > 0 {
            while self.output_log.len() > self.scrollback {
                self.output_log.pop_front();
            }
        }
        true
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            id: self.id,
            display_name: self.display_name.clone(),
            working_directory: self.working_directory.clone(),
            output_log: self.output_log.iter().cloned().collect(),
            history: self.history.entries().to_vec(),
            is_active: self.is_active,
            shell_path: self.shell_path.clone(),
            current_process: self.current_process,
        }
    }
}

/// Serializable copy of a session for UI layers
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSnapshot {
    pub id: SessionId,
    pub display_name: String,
    pub working_directory: PathBuf,
    pub output_log: Vec<LogEntry>,
    pub history: Vec<String>,
    pub is_active: bool,
    pub shell_path: PathBuf,
    pub current_process: Option<ProcessId>,
}

impl SessionSnapshot {
    /// Whole log as plain text
    pub fn text(&self) -> String {
        self.output_log.iter().map(LogEntry::text).collect()
    }
}

/// Manages multiple terminal sessions
pub struct SessionManager {
    /// All sessions, in creation order
    sessions: Vec<TerminalSession>,
    active: Option<SessionId>,
    next_id: SessionId,
    config: SessionConfig,
    shared_cwd: SharedCwd,
    /// Sessions whose log changed since the last `take_dirty`
    dirty: BTreeSet<SessionId>,
}

impl SessionManager {
    pub fn new(config: SessionConfig) -> Self {
        Self {
            sessions: Vec::new(),
            active: None,
            next_id: 1,
            config,
            shared_cwd: Arc::new(RwLock::new(None)),
            dirty: BTreeSet::new(),
        }
    }

    /// Create a session with its banner and make it active
    pub fn create(&mut self, working_directory: PathBuf, shell_path: PathBuf) -> SessionId {
        let id = self.next_id;
        self.next_id += 1;

        let mut session = TerminalSession::new(id, working_directory, shell_path, &self.config);
        if !self.config.banner.is_empty() {
            session.append(
                LogOrigin::Banner,
                vec![StyledSpan::plain(format!("{}\n", self.config.banner))],
            );
        }
        self.sessions.push(session);
        self.dirty.insert(id);
        self.activate(Some(id));
        id
    }

    /// Make `id` the active session. Returns false for unknown ids.
    pub fn switch_active(&mut self, id: SessionId) -> bool {
        if self.get(id).is_none() {
            return false;
        }
        self.activate(Some(id));
        true
    }

    /// Remove a session. If it was active, the most recently created
    /// remaining session takes over (none if it was the last one).
    pub fn close(&mut self, id: SessionId) -> Option<TerminalSession> {
        let idx = self.sessions.iter().position(|s| s.id == id)?;
        let removed = self.sessions.remove(idx);
        self.dirty.remove(&id);

        if self.active == Some(id) {
            let next = self.sessions.last().map(|s| s.id);
            self.activate(next);
        }
        Some(removed)
    }

    /// Record a new working directory. Returns false for unknown ids.
    pub fn update_working_directory(&mut self, id: SessionId, path: &Path) -> bool {
        let Some(session) = self.get_mut(id) else {
            return false;
        };
        session.working_directory = path.to_path_buf();
        if self.active == Some(id) {
            *self.shared_cwd.write() = Some(path.to_path_buf());
        }
        true
    }

    /// Append to a session's log and mark it for redraw
    pub fn append(&mut self, id: SessionId, origin: LogOrigin, spans: Vec<StyledSpan>) -> bool {
        let appended = match self.get_mut(id) {
            Some(session) => session.append(origin, spans),
            None => false,
        };
        if appended {
            self.dirty.insert(id);
        }
        appended
    }

    /// Append a single unstyled line
    pub fn append_line(&mut self, id: SessionId, origin: LogOrigin, text: &str) -> bool {
        self.append(id, origin, vec![StyledSpan::plain(format!("{}\n", text))])
    }

    /// Sessions changed since the last call
    pub fn take_dirty(&mut self) -> Vec<SessionId> {
        std::mem::take(&mut self.dirty).into_iter().collect()
    }

    pub fn snapshot(&self, id: SessionId) -> Option<SessionSnapshot> {
        self.get(id).map(TerminalSession::snapshot)
    }

    pub fn get(&self, id: SessionId) -> Option<&TerminalSession> {
        self.sessions.iter().find(|s| s.id == id)
    }

    pub fn get_mut(&mut self, id: SessionId) -> Option<&mut TerminalSession> {
        self.sessions.iter_mut().find(|s| s.id == id)
    }

    pub fn active_session_id(&self) -> Option<SessionId> {
        self.active
    }

    pub fn sessions(&self) -> &[TerminalSession] {
        &self.sessions
    }

    pub fn shared_cwd(&self) -> SharedCwd {
        self.shared_cwd.clone()
    }

    fn activate(&mut self, id: Option<SessionId>) {
        let mut cwd = None;
        for session in &mut self.sessions {
            session.is_active = Some(session.id) == id;
            if session.is_active {
                cwd = Some(session.working_directory.clone());
            }
        }
        self.active = id;
        *self.shared_cwd.write() = cwd;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manager() -> SessionManager {
        SessionManager::new(SessionConfig::default())
    }

    #[test]
    fn test_create_activates_and_writes_banner() {
        let mut manager = manager();
        let first = manager.create(PathBuf::from("/tmp/a"), PathBuf::from("/bin/sh"));
        let second = manager.create(PathBuf::from("/tmp/b"), PathBuf::from("/bin/sh"));

        assert_eq!(manager.active_session_id(), Some(second));
        assert!(!manager.get(first).unwrap().is_active);
        assert!(manager.get(second).unwrap().is_active);
        assert_eq!(*manager.shared_cwd().read(), Some(PathBuf::from("/tmp/b")));

        let snapshot = manager.snapshot(first).unwrap();
        assert_eq!(snapshot.display_name, "Terminal 1");
        assert_eq!(snapshot.output_log.len(), 1);
        assert_eq!(snapshot.output_log[0].origin, LogOrigin::Banner);
        assert_eq!(snapshot.text(), "Welcome to TermDeck\n");
    }

    #[test]
    fn test_switch_active_updates_shared_cwd() {
        let mut manager = manager();
        let first = manager.create(PathBuf::from("/tmp/a"), PathBuf::from("/bin/sh"));
        manager.create(PathBuf::from("/tmp/b"), PathBuf::from("/bin/sh"));

        assert!(manager.switch_active(first));
        assert_eq!(*manager.shared_cwd().read(), Some(PathBuf::from("/tmp/a")));
        assert!(!manager.switch_active(99));
        assert_eq!(manager.active_session_id(), Some(first));
    }

    #[test]
    fn test_close_active_picks_most_recent() {
        let mut manager = manager();
        let a = manager.create(PathBuf::from("/a"), PathBuf::from("/bin/sh"));
        let b = manager.create(PathBuf::from("/b"), PathBuf::from("/bin/sh"));
        let c = manager.create(PathBuf::from("/c"), PathBuf::from("/bin/sh"));

        manager.switch_active(b);
        assert!(manager.close(b).is_some());
        assert_eq!(manager.active_session_id(), Some(c));

        // Closing an inactive session keeps the active one
        manager.close(a);
        assert_eq!(manager.active_session_id(), Some(c));

        manager.close(c);
        assert_eq!(manager.active_session_id(), None);
        assert_eq!(*manager.shared_cwd().read(), None);
        assert!(manager.close(c).is_none());
    }

    #[test]
    fn test_update_working_directory() {
        let mut manager = manager();
        let a = manager.create(PathBuf::from("/a"), PathBuf::from("/bin/sh"));
        let b = manager.create(PathBuf::from("/b"), PathBuf::from("/bin/sh"));

        // Inactive session: shared pointer untouched
        assert!(manager.update_working_directory(a, Path::new("/a/src")));
        assert_eq!(*manager.shared_cwd().read(), Some(PathBuf::from("/b")));

        assert!(manager.update_working_directory(b, Path::new("/b/src")));
        assert_eq!(*manager.shared_cwd().read(), Some(PathBuf::from("/b/src")));
        assert!(!manager.update_working_directory(42, Path::new("/x")));
    }

    #[test]
    fn test_scrollback_drops_oldest() {
        let config = SessionConfig {
            scrollback: 3,
            banner: String::new(),
            ..SessionConfig::default()
        };
        let mut manager = SessionManager::new(config);
        let id = manager.create(PathBuf::from("/"), PathBuf::from("/bin/sh"));
        for i in 0..5 {
            manager.append_line(id, LogOrigin::Stdout, &format!("line {}", i));
        }
        let snapshot = manager.snapshot(id).unwrap();
        assert_eq!(snapshot.output_log.len(), 3);
        assert_eq!(snapshot.output_log[0].text(), "line 2\n");
        assert_eq!(snapshot.output_log[0].seq, 2);
    }

    #[test]
    fn test_dirty_tracking() {
        let mut manager = manager();
        let id = manager.create(PathBuf::from("/"), PathBuf::from("/bin/sh"));
        assert_eq!(manager.take_dirty(), vec![id]);
        assert!(manager.take_dirty().is_empty());

        assert!(!manager.append(id, LogOrigin::Stdout, vec![StyledSpan::plain("")]));
        assert!(manager.take_dirty().is_empty());

        manager.append_line(id, LogOrigin::System, "done");
        assert_eq!(manager.take_dirty(), vec![id]);
    }

    #[test]
    fn test_snapshot_serializes() {
        let mut manager = manager();
        let id = manager.create(PathBuf::from("/"), PathBuf::from("/bin/sh"));
        let snapshot = manager.snapshot(id).unwrap();
        let json = serde_json::to_string(&snapshot).unwrap();
        assert!(json.contains("Terminal 1"));
    }
}
