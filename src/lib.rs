//! TermDeck
//!
//! Terminal orchestration core for an IDE-like application.
//!
//! # Features
//! - Runs each submitted line in a fresh shell with live, styled output
//! - Tells one-shot commands from servers/watchers and interactive REPLs
//! - Forwards input to a running REPL until the user leaves it
//! - Several sessions, each with its own directory, log and history
//! - Notifications for collaborators (directory changes, completions, redraws)

pub mod ansi;
pub mod core;
pub mod host;
pub mod terminal;

pub use core::config::Config;
pub use core::events::{Notification, NotificationSender};
pub use core::sessions::{LogEntry, LogOrigin, SessionId, SessionManager, SessionSnapshot, SharedCwd};
pub use host::{HostEvent, ProcessId, ProcessKind, SupervisorHandle};
pub use terminal::{ExecOutcome, HubError, HubEvent, KeyOutcome, TerminalHub};
