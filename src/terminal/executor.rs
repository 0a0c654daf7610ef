//! Runs a submitted line for a session and writes the result to its log

use super::hub::HubError;
use crate::ansi::{translate, AnsiColor, SpanStyle, StyledSpan};
use crate::core::classifier::{CommandCategory, CommandClassifier};
use crate::core::events::{Notification, NotificationSender};
use crate::core::sessions::{LogOrigin, SessionId, SessionManager};
use crate::host::{CommandResult, PendingSpawn, ProcessId, SupervisorHandle};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Result of executing one line
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecOutcome {
    /// Blank line; nothing dispatched
    Skipped,
    /// Sent to the host; the outcome arrives on the hub's event feed
    Dispatched(ProcessId),
}

/// What [`CommandExecutor::finish`] needs to know about a dispatched line
#[derive(Debug, Clone)]
pub struct PendingCommand {
    pub session_id: SessionId,
    pub command: String,
    /// Session directory when the line was submitted
    pub working_dir: PathBuf,
    /// Package-manager command: wrapped in installation banners
    pub installing: bool,
}

pub struct CommandExecutor {
    host: SupervisorHandle,
    classifier: CommandClassifier,
    notifications: NotificationSender,
}

impl CommandExecutor {
    pub fn new(host: SupervisorHandle, classifier: CommandClassifier, notifications: NotificationSender) -> Self {
        Self {
            host,
            classifier,
            notifications,
        }
    }

    /// Write the prompt and echo, record history and send the line to the
    /// host. `None` for a blank line.
    pub fn dispatch(
        &self,
        sessions: &mut SessionManager,
        session_id: SessionId,
        text: &str,
    ) -> Result<Option<(PendingCommand, PendingSpawn)>, HubError> {
        let working_dir = sessions
            .get(session_id)
            .ok_or(HubError::UnknownSession(session_id))?
            .working_directory
            .clone();
        let command = text.trim();

        sessions.append(session_id, LogOrigin::Prompt, prompt_spans(&working_dir));
        sessions.append(session_id, LogOrigin::Echo, vec![StyledSpan::plain(format!("{}\n", command))]);

        if command.is_empty() {
            return Ok(None);
        }
        if let Some(session) = sessions.get_mut(session_id) {
            session.history.push(command);
        }

        let category = self.classifier.classify(command);
        let installing = category == CommandCategory::PackageManager;
        if installing {
            sessions.append(
                session_id,
                LogOrigin::System,
                vec![StyledSpan::styled(
                    "Running installation...\n",
                    SpanStyle::default().fg(AnsiColor::Yellow),
                )],
            );
        }

        let spawn = self.host.dispatch(command, &working_dir);
        debug!(
            "Session {} dispatched {:?} as {} ({:?})",
            session_id,
            command,
            spawn.process_id(),
            category
        );
        let pending = PendingCommand {
            session_id,
            command: command.to_string(),
            working_dir,
            installing,
        };
        Ok(Some((pending, spawn)))
    }

    /// Write a one-shot result to the session log and notify collaborators
    pub fn finish(&self, sessions: &mut SessionManager, pending: &PendingCommand, result: &CommandResult) {
        let session_id = pending.session_id;

        if !result.output.is_empty() {
            let mut spans = translate(&result.output);
            if !result.output.ends_with('\n') {
                spans.push(StyledSpan::plain("\n"));
            }
            sessions.append(session_id, LogOrigin::Stdout, spans);
        }

        if !result.success && result.output.trim().is_empty() {
            let message = match result.exit_code {
                Some(code) => format!("Command failed with exit code {}\n", code),
                None => "Command failed\n".to_string(),
            };
            sessions.append(
                session_id,
                LogOrigin::System,
                vec![StyledSpan::styled(message, SpanStyle::default().fg(AnsiColor::Red))],
            );
        }

        if pending.installing {
            let (text, color) = if result.success {
                ("Installation completed successfully\n", AnsiColor::Green)
            } else {
                ("Installation failed\n", AnsiColor::Red)
            };
            sessions.append(
                session_id,
                LogOrigin::System,
                vec![StyledSpan::styled(text, SpanStyle::default().fg(color))],
            );
        }

        if result.success
            && result.working_dir != pending.working_dir
            && sessions.update_working_directory(session_id, &result.working_dir)
        {
            self.notifications.send(Notification::WorkingDirectoryChanged {
                session_id,
                path: result.working_dir.clone(),
            });
        }

        self.notifications.send(Notification::CommandCompleted {
            session_id,
            command: pending.command.clone(),
            success: result.success,
            exit_code: result.exit_code,
            stalled: result.stalled,
        });
    }
}

/// `~/src/app $ ` with the directory in bold cyan
fn prompt_spans(working_dir: &Path) -> Vec<StyledSpan> {
    vec![
        StyledSpan::styled(display_dir(working_dir), SpanStyle::default().bold().fg(AnsiColor::Cyan)),
        StyledSpan::plain(" $ "),
    ]
}

/// Home directory shown as `~`
pub fn display_dir(path: &Path) -> String {
    if let Some(home) = dirs::home_dir() {
        if path == home {
            return "~".to_string();
        }
        if let Ok(rest) = path.strip_prefix(&home) {
            return format!("~/{}", rest.display());
        }
    }
    path.display().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_dir() {
        if let Some(home) = dirs::home_dir() {
            assert_eq!(display_dir(&home), "~");
            assert_eq!(display_dir(&home.join("src")), "~/src");
        }
    }

    #[test]
    fn test_prompt_spans() {
        let spans = prompt_spans(Path::new("/srv"));
        assert_eq!(spans[0].text, "/srv");
        assert!(spans[0].style.bold);
        assert_eq!(spans[1], StyledSpan::plain(" $ "));
    }
}
