//! Decides whether a command is one-shot, long-running or interactive
//!
//! Fails open: anything not matched by a table is [`ProcessKind::OneShot`].
//! Never guess Interactive, since that would swallow later commands as
//! stdin.

use super::process::ProcessKind;
use crate::core::config::LifetimeConfig;

#[derive(Debug, Clone)]
pub struct LifetimeRules {
    interactive_programs: Vec<String>,
    long_running_keywords: Vec<String>,
    script_runners: Vec<String>,
    long_running_prefixes: Vec<String>,
}

impl Default for LifetimeRules {
    fn default() -> Self {
        Self::from_config(&LifetimeConfig::default())
    }
}

impl LifetimeRules {
    pub fn from_config(config: &LifetimeConfig) -> Self {
        Self {
            interactive_programs: config.interactive_programs.clone(),
            long_running_keywords: config.long_running_keywords.clone(),
            script_runners: config.script_runners.clone(),
            long_running_prefixes: config.long_running_prefixes.clone(),
        }
    }

    pub fn classify(&self, command: &str) -> ProcessKind {
        let command = command.trim();
        if command.is_empty() {
            return ProcessKind::OneShot;
        }
        if self.is_interactive(command) {
            return ProcessKind::Interactive;
        }
        if self.is_long_running(command) {
            return ProcessKind::LongRunning;
        }
        ProcessKind::OneShot
    }

    /// Interpreter launched with flags only (`python`, `node -i`). Flags are
    /// not inspected.
    fn is_interactive(&self, command: &str) -> bool {
        let mut tokens = command.split_whitespace();
        let Some(program) = tokens.next() else {
            return false;
        };
        let program = program.rsplit('/').next().unwrap_or(program);
        if !self.interactive_programs.iter().any(|p| p == program) {
            return false;
        }
        tokens.all(|t| t.starts_with('-'))
    }

    /// Keywords only count as a runner's script name (`npm run dev`,
    /// `yarn start:prod`) or as a flag (`tsc --watch`), so plain arguments
    /// like `git checkout dev` stay one-shot.
    fn is_long_running(&self, command: &str) -> bool {
        if self
            .long_running_prefixes
            .iter()
            .any(|prefix| !prefix.is_empty() && command.starts_with(prefix.as_str()))
        {
            return true;
        }

        let tokens: Vec<&str> = command.split_whitespace().collect();
        let flagged = tokens.iter().skip(1).any(|token| {
            token.starts_with("--")
                && token
                    .trim_start_matches('-')
                    .split(['=', ':'])
                    .next()
                    .is_some_and(|flag| self.is_keyword(flag))
        });
        if flagged {
            return true;
        }

        match self.script_name(&tokens) {
            Some(script) => script.split(':').any(|part| self.is_keyword(part)),
            None => false,
        }
    }

    /// `npm run dev` -> `dev`, `yarn start` -> `start`
    fn script_name<'a>(&self, tokens: &[&'a str]) -> Option<&'a str> {
        let program = tokens.first()?;
        let program = program.rsplit('/').next().unwrap_or(program);
        if !self.script_runners.iter().any(|r| r == program) {
            return None;
        }
        match tokens.get(1).copied()? {
            "run" | "run-script" => tokens.get(2).copied(),
            script => Some(script),
        }
    }

    fn is_keyword(&self, word: &str) -> bool {
        self.long_running_keywords.iter().any(|k| k == word)
    }
}
