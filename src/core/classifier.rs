//! Cosmetic command categorization
//!
//! Picks a [`CommandCategory`] by longest-prefix match against a table. The
//! result only changes banner wording; it never steers control flow.

use crate::core::config::ClassifierConfig;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum CommandCategory {
    PackageManager,
    VersionControl,
    FileSystem,
    System,
    #[default]
    Unknown,
}

/// Category -> prefix table
#[derive(Debug, Clone)]
pub struct CommandClassifier {
    table: Vec<(CommandCategory, Vec<String>)>,
}

impl Default for CommandClassifier {
    fn default() -> Self {
        Self::from_config(&ClassifierConfig::default())
    }
}

impl CommandClassifier {
    pub fn from_config(config: &ClassifierConfig) -> Self {
        Self {
            table: vec![
                (CommandCategory::PackageManager, config.package_manager.clone()),
                (CommandCategory::VersionControl, config.version_control.clone()),
                (CommandCategory::FileSystem, config.file_system.clone()),
                (CommandCategory::System, config.system.clone()),
            ],
        }
    }

    /// Add a prefix to a category at runtime
    pub fn add_prefix(&mut self, category: CommandCategory, prefix: impl Into<String>) {
        let prefix = prefix.into();
        match self.table.iter_mut().find(|(c, _)| *c == category) {
            Some((_, prefixes)) => prefixes.push(prefix),
            None => self.table.push((category, vec![prefix])),
        }
    }

    pub fn classify(&self, command: &str) -> CommandCategory {
        let normalized = normalize(command);
        let mut best: Option<(usize, CommandCategory)> = None;

        for (category, prefixes) in &self.table {
            for prefix in prefixes {
                let prefix = normalize(prefix);
                if prefix.is_empty() || !matches_prefix(&normalized, &prefix) {
                    continue;
                }
                if best.map_or(true, |(len, _)| prefix.len() > len) {
                    best = Some((prefix.len(), *category));
                }
            }
        }

        best.map(|(_, category)| category).unwrap_or_default()
    }
}

/// Collapse runs of whitespace so `npm   install` matches `npm install`
fn normalize(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Prefix match that stops at a word boundary (`git` matches `git status`
/// but not `gitk`)
fn matches_prefix(command: &str, prefix: &str) -> bool {
    command == prefix
        || (command.starts_with(prefix) && command[prefix.len()..].starts_with(' '))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_basic_categories() {
        let classifier = CommandClassifier::default();
        assert_eq!(classifier.classify("npm install react"), CommandCategory::PackageManager);
        assert_eq!(classifier.classify("git status"), CommandCategory::VersionControl);
        assert_eq!(classifier.classify("ls -la"), CommandCategory::FileSystem);
        assert_eq!(classifier.classify("whoami"), CommandCategory::System);
        assert_eq!(classifier.classify("2+2"), CommandCategory::Unknown);
        assert_eq!(classifier.classify(""), CommandCategory::Unknown);
    }

    #[test]
    fn test_word_boundary() {
        let classifier = CommandClassifier::default();
        assert_eq!(classifier.classify("gitk"), CommandCategory::Unknown);
        assert_eq!(classifier.classify("npm test"), CommandCategory::Unknown);
        assert_eq!(classifier.classify("npm i lodash"), CommandCategory::PackageManager);
    }

    #[test]
    fn test_longest_prefix_wins() {
        let mut classifier = CommandClassifier::default();
        classifier.add_prefix(CommandCategory::System, "cargo");
        // "cargo install" (PackageManager) is longer than "cargo" (System)
        assert_eq!(classifier.classify("cargo install ripgrep"), CommandCategory::PackageManager);
        assert_eq!(classifier.classify("cargo build"), CommandCategory::System);
    }

    #[test]
    fn test_whitespace_normalized() {
        let classifier = CommandClassifier::default();
        assert_eq!(classifier.classify("  npm   install  "), CommandCategory::PackageManager);
    }
}
