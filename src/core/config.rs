//! Configuration management

use anyhow::{Context, Result};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Shell used to run each command line
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShellConfig {
    /// Shell program; empty = `$SHELL` or `/bin/sh` (`cmd.exe` on Windows)
    #[serde(default)]
    pub program: String,
    /// Arguments placed before the command line
    #[serde(default = "default_shell_args")]
    pub args: Vec<String>,
    /// Capture the login shell environment once at startup
    #[serde(default = "default_true")]
    pub inherit_login_env: bool,
    /// Extra environment variables for spawned commands
    #[serde(default)]
    pub env: BTreeMap<String, String>,
}

fn default_shell_args() -> Vec<String> {
    if cfg!(windows) {
        vec!["/C".to_string()]
    } else {
        vec!["-c".to_string()]
    }
}

fn default_true() -> bool {
    true
}

impl Default for ShellConfig {
    fn default() -> Self {
        Self {
            program: String::new(),
            args: default_shell_args(),
            inherit_login_env: default_true(),
            env: BTreeMap::new(),
        }
    }
}

/// Process supervisor configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SupervisorConfig {
    /// A one-shot command silent for this long is reported as failed
    /// (the process is left running)
    #[serde(default = "default_silence_timeout")]
    pub silence_timeout_ms: u64,
    /// Terminal size reported to interactive processes
    #[serde(default = "default_pty_rows")]
    pub pty_rows: u16,
    #[serde(default = "default_pty_cols")]
    pub pty_cols: u16,
}

fn default_silence_timeout() -> u64 {
    5000
}

fn default_pty_rows() -> u16 {
    50
}

fn default_pty_cols() -> u16 {
    120
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            silence_timeout_ms: default_silence_timeout(),
            pty_rows: default_pty_rows(),
            pty_cols: default_pty_cols(),
        }
    }
}

/// Tables deciding how long a spawned command is expected to live
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LifetimeConfig {
    /// Interpreters whose bare launch opens a REPL
    #[serde(default = "default_interactive_programs")]
    pub interactive_programs: Vec<String>,
    /// Script names and flags marking servers and watchers
    /// (`npm run dev`, `tsc --watch`)
    #[serde(default = "default_long_running_keywords")]
    pub long_running_keywords: Vec<String>,
    /// Programs whose first argument names a script (`npm start`, `yarn dev`)
    #[serde(default = "default_script_runners")]
    pub script_runners: Vec<String>,
    /// Command prefixes for direct interpreter invocations (`node server.js`)
    #[serde(default = "default_long_running_prefixes")]
    pub long_running_prefixes: Vec<String>,
}

fn default_interactive_programs() -> Vec<String> {
    [
        "python", "python3", "node", "irb", "ghci", "lua", "php", "deno", "bun", "sqlite3", "psql",
        "mysql", "redis-cli", "mongosh",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

fn default_long_running_keywords() -> Vec<String> {
    ["dev", "start", "serve", "watch"].iter().map(|s| s.to_string()).collect()
}

fn default_script_runners() -> Vec<String> {
    ["npm", "yarn", "pnpm", "bun"].iter().map(|s| s.to_string()).collect()
}

fn default_long_running_prefixes() -> Vec<String> {
    [
        "node ", "python ", "python3 ", "deno run", "bun run", "ts-node ", "nodemon", "cargo run",
        "go run", "flask run", "uvicorn ", "rails server", "ng serve", "hugo server",
        "jekyll serve", "mkdocs serve",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

impl Default for LifetimeConfig {
    fn default() -> Self {
        Self {
            interactive_programs: default_interactive_programs(),
            long_running_keywords: default_long_running_keywords(),
            script_runners: default_script_runners(),
            long_running_prefixes: default_long_running_prefixes(),
        }
    }
}

/// Interactive input routing
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouterConfig {
    /// A line starting with one of these leaves interactive mode and runs
    /// as a normal command
    #[serde(default = "default_escape_commands")]
    pub escape_commands: Vec<String>,
}

fn default_escape_commands() -> Vec<String> {
    [
        "git", "npm", "npx", "yarn", "pnpm", "cargo", "cd", "ls", "pwd", "mkdir", "rm", "cp", "mv",
        "touch", "clear",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            escape_commands: default_escape_commands(),
        }
    }
}

/// Command category prefix tables (cosmetic only)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassifierConfig {
    #[serde(default = "default_package_manager")]
    pub package_manager: Vec<String>,
    #[serde(default = "default_version_control")]
    pub version_control: Vec<String>,
    #[serde(default = "default_file_system")]
    pub file_system: Vec<String>,
    #[serde(default = "default_system")]
    pub system: Vec<String>,
}

fn default_package_manager() -> Vec<String> {
    [
        "npm install", "npm i", "npm ci", "npm uninstall", "yarn", "yarn add", "yarn install",
        "pnpm install", "pnpm add", "pip install", "pip3 install", "cargo install", "cargo add",
        "gem install", "bundle install", "brew install", "apt install", "apt-get install",
        "composer install", "go get",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

fn default_version_control() -> Vec<String> {
    ["git", "gh", "svn", "hg"].iter().map(|s| s.to_string()).collect()
}

fn default_file_system() -> Vec<String> {
    [
        "ls", "cd", "pwd", "mkdir", "rmdir", "rm", "cp", "mv", "touch", "cat", "find", "tree",
        "chmod", "chown", "ln",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

fn default_system() -> Vec<String> {
    [
        "ps", "top", "htop", "kill", "df", "du", "whoami", "uname", "env", "echo", "which",
        "clear", "date", "uptime",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            package_manager: default_package_manager(),
            version_control: default_version_control(),
            file_system: default_file_system(),
            system: default_system(),
        }
    }
}

/// Per-session limits and decoration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Number of log entries kept per session
    #[serde(default = "default_scrollback")]
    pub scrollback: usize,
    /// Number of submitted commands kept per session (0 = unlimited)
    #[serde(default = "default_history_limit")]
    pub history_limit: usize,
    /// First line written to every new session
    #[serde(default = "default_banner")]
    pub banner: String,
}

fn default_scrollback() -> usize {
    10_000
}

fn default_history_limit() -> usize {
    500
}

fn default_banner() -> String {
    "Welcome to TermDeck".to_string()
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            scrollback: default_scrollback(),
            history_limit: default_history_limit(),
            banner: default_banner(),
        }
    }
}

/// Display configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DisplayConfig {
    /// Minimum interval between redraw notifications
    #[serde(default = "default_redraw_interval")]
    pub redraw_interval_ms: u64,
}

fn default_redraw_interval() -> u64 {
    16
}

impl Default for DisplayConfig {
    fn default() -> Self {
        Self {
            redraw_interval_ms: default_redraw_interval(),
        }
    }
}

/// Main application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub shell: ShellConfig,
    #[serde(default)]
    pub supervisor: SupervisorConfig,
    #[serde(default)]
    pub lifetime: LifetimeConfig,
    #[serde(default)]
    pub router: RouterConfig,
    #[serde(default)]
    pub classifier: ClassifierConfig,
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub display: DisplayConfig,
}

impl Config {
    /// Load configuration from the user config file
    pub fn load() -> Result<Self> {
        let config_path = Self::config_path()?;
        Self::load_from(&config_path)
    }

    /// Load configuration from a specific file, defaults if it doesn't exist
    pub fn load_from(config_path: &Path) -> Result<Self> {
        if config_path.exists() {
            let content = std::fs::read_to_string(config_path)
                .with_context(|| format!("Failed to read config file: {:?}", config_path))?;
            let config: Config = toml::from_str(&content)
                .with_context(|| format!("Failed to parse config file: {:?}", config_path))?;
            Ok(config)
        } else {
            Ok(Config::default())
        }
    }

    /// Save configuration to the user config file
    pub fn save(&self) -> Result<()> {
        let config_path = Self::config_path()?;
        self.save_to(&config_path)
    }

    pub fn save_to(&self, config_path: &Path) -> Result<()> {
        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create config directory: {:?}", parent))?;
        }

        let content = toml::to_string_pretty(self).context("Failed to serialize config")?;
        std::fs::write(config_path, content)
            .with_context(|| format!("Failed to write config file: {:?}", config_path))?;

        Ok(())
    }

    /// Get the configuration file path
    pub fn config_path() -> Result<PathBuf> {
        let proj_dirs = ProjectDirs::from("com", "termdeck", "TermDeck")
            .context("Failed to determine config directory")?;
        Ok(proj_dirs.config_dir().join("config.toml"))
    }

    /// Get the default configuration embedded in the binary
    pub fn default_config_str() -> &'static str {
        include_str!("../../config/default.toml")
    }
}
