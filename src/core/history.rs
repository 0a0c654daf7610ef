//! Per-session command history with an up/down cursor

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CommandHistory {
    entries: Vec<String>,
    /// Index into `entries`; `None` = editing a fresh line
    #[serde(skip)]
    cursor: Option<usize>,
    /// Max entries kept (0 = unlimited)
    limit: usize,
}

impl CommandHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_limit(limit: usize) -> Self {
        Self {
            limit,
            ..Self::default()
        }
    }

    /// Record a submitted command and reset the cursor
    pub fn push(&mut self, command: &str) {
        self.cursor = None;
        if command.trim().is_empty() {
            return;
        }
        self.entries.push(command.to_string());
        if self.limit > 0 && self.entries.len() > self.limit {
            let excess = self.entries.len() - self.limit;
            self.entries.drain(..excess);
        }
    }

    /// Step toward older entries, stopping at the oldest
    pub fn previous(&mut self) -> Option<&str> {
        if self.entries.is_empty() {
            return None;
        }
        let idx = match self.cursor {
            None => self.entries.len() - 1,
            Some(i) => i.saturating_sub(1),
        };
        self.cursor = Some(idx);
        self.entries.get(idx).map(String::as_str)
    }

    /// Step toward newer entries. Moving past the newest returns `None`
    /// (empty input line) and unsets the cursor.
    #[allow(clippy::should_implement_trait)]
    pub fn next(&mut self) -> Option<&str> {
        let idx = self.cursor? + 1;
        if idx < self.entries.len() {
            self.cursor = Some(idx);
            self.entries.get(idx).map(String::as_str)
        } else {
            self.cursor = None;
            None
        }
    }

    pub fn cursor(&self) -> Option<usize> {
        self.cursor
    }

    pub fn entries(&self) -> &[String] {
        &self.entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
