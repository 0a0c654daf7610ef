//! Notifications pushed from the session layer to its consumers

use super::sessions::SessionId;
use std::path::PathBuf;
use tokio::sync::mpsc;
use tracing::trace;

/// Wrapper around `mpsc::UnboundedSender<Notification>`.
///
/// Sending never fails from the caller's point of view: a consumer that went
/// away simply stops receiving.
#[derive(Debug, Clone)]
pub struct NotificationSender {
    tx: mpsc::UnboundedSender<Notification>,
}

impl NotificationSender {
    pub fn new(tx: mpsc::UnboundedSender<Notification>) -> Self {
        Self { tx }
    }

    /// Create a sender together with its receiving end
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<Notification>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self::new(tx), rx)
    }

    pub fn send(&self, notification: Notification) {
        trace!("Notification: {:?}", notification);
        let _ = self.tx.send(notification);
    }
}

/// Events for collaborators (file tree, git panel, renderer)
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notification {
    /// A session's working directory changed (`cd`)
    WorkingDirectoryChanged { session_id: SessionId, path: PathBuf },

    /// A one-shot command finished (or was resolved by the silence check)
    CommandCompleted {
        session_id: SessionId,
        command: String,
        success: bool,
        exit_code: Option<i32>,
        stalled: bool,
    },

    /// The active session changed; `None` once the last session is closed
    ActiveSessionChanged { session_id: Option<SessionId> },

    /// These sessions have new output to draw
    Redraw { sessions: Vec<SessionId> },
}
