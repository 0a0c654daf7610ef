//! Shell selection, command construction and the `cd` built-in
//!
//! Every command runs in a fresh subshell, so directory changes cannot
//! persist on their own. `cd` is therefore resolved here and the new
//! directory reported back explicitly.

use crate::core::config::ShellConfig;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use portable_pty::CommandBuilder;
use std::process::Stdio;
use tokio::process::Command;

/// Variables that make tools emit colors even though stdout is a pipe
pub const COLOR_ENV: [(&str, &str); 4] = [
    ("FORCE_COLOR", "1"),
    ("CLICOLOR_FORCE", "1"),
    ("TERM", "xterm-256color"),
    ("COLORTERM", "truecolor"),
];

/// Applied last for commands running under a PTY. Interactive output is
/// shown without styling, so REPLs are kept to their plain line editors.
pub const PTY_ENV: [(&str, &str); 2] = [("TERM", "dumb"), ("PYTHON_BASIC_REPL", "1")];

/// Resolved shell invocation
#[derive(Debug, Clone)]
pub struct ShellSpec {
    pub program: PathBuf,
    pub args: Vec<String>,
    /// Environment applied on top of the inherited one
    pub env: HashMap<String, String>,
}

impl ShellSpec {
    /// Pick the shell from config, `$SHELL` or the platform default
    pub fn from_config(config: &ShellConfig) -> Self {
        let program = if !config.program.is_empty() {
            PathBuf::from(&config.program)
        } else {
            default_shell()
        };

        let mut env: HashMap<String, String> = COLOR_ENV
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        env.extend(config.env.iter().map(|(k, v)| (k.clone(), v.clone())));

        Self {
            program,
            args: config.args.clone(),
            env,
        }
    }

    /// Put a captured login environment underneath the configured one
    pub fn with_base_env(mut self, base: HashMap<String, String>) -> Self {
        let overrides = std::mem::take(&mut self.env);
        self.env = base;
        self.env.extend(overrides);
        self
    }

    /// Build the command for one line of input, with piped stdio and its
    /// own process group so an interrupt reaches the whole pipeline.
    pub fn command(&self, line: &str, working_dir: &Path) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .arg(line)
            .current_dir(working_dir)
            .envs(&self.env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        #[cfg(unix)]
        cmd.process_group(0);
        cmd
    }

    /// Same invocation for the slave side of a PTY
    pub fn pty_command(&self, line: &str, working_dir: &Path) -> CommandBuilder {
        let mut cmd = CommandBuilder::new(&self.program);
        for arg in &self.args {
            cmd.arg(arg);
        }
        cmd.arg(line);
        cmd.cwd(working_dir);
        for (key, value) in &self.env {
            cmd.env(key, value);
        }
        for (key, value) in PTY_ENV {
            cmd.env(key, value);
        }
        cmd
    }
}

#[cfg(unix)]
fn default_shell() -> PathBuf {
    std::env::var_os("SHELL")
        .filter(|s| !s.is_empty())
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("/bin/sh"))
}

#[cfg(not(unix))]
fn default_shell() -> PathBuf {
    std::env::var_os("COMSPEC")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("cmd.exe"))
}

/// If `line` is a plain `cd`, return its argument (`None` inside = home).
///
/// Compound lines (`cd src && make`) are left to the shell.
pub fn parse_cd(line: &str) -> Option<Option<String>> {
    let line = line.trim();
    let rest = line.strip_prefix("cd")?;
    if !rest.is_empty() && !rest.starts_with(char::is_whitespace) {
        return None;
    }
    if rest.contains(['&', '|', ';', '>', '<', '`', '$']) {
        return None;
    }
    let arg = rest.trim();
    if arg.is_empty() {
        return Some(None);
    }
    let arg = strip_quotes(arg);
    Some(Some(arg.to_string()))
}

fn strip_quotes(s: &str) -> &str {
    for quote in ['"', '\''] {
        if s.len() >= 2 && s.starts_with(quote) && s.ends_with(quote) {
            return &s[1..s.len() - 1];
        }
    }
    s
}

/// Resolve a `cd` target against `cwd`. Errors carry the shell-style
/// message shown to the user.
pub fn resolve_cd(target: Option<&str>, cwd: &Path) -> Result<PathBuf, String> {
    let home = dirs::home_dir();
    let path = match target {
        None | Some("~") => home.ok_or_else(|| "cd: HOME not set".to_string())?,
        Some(t) if t.starts_with("~/") => {
            let home = home.ok_or_else(|| "cd: HOME not set".to_string())?;
            home.join(&t[2..])
        }
        Some(t) => cwd.join(t),
    };

    if !path.is_dir() {
        let shown = target.unwrap_or("~");
        return Err(if path.exists() {
            format!("cd: not a directory: {}", shown)
        } else {
            format!("cd: no such file or directory: {}", shown)
        });
    }

    Ok(normalize_path(&path))
}

/// Canonicalize when possible, otherwise fold `.` and `..` lexically
fn normalize_path(path: &Path) -> PathBuf {
    if let Ok(canonical) = path.canonicalize() {
        return canonical;
    }
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            std::path::Component::CurDir => {}
            std::path::Component::ParentDir => {
                out.pop();
            }
            other => out.push(other),
        }
    }
    out
}

/// Incremental UTF-8 decoder that never splits a character across chunks
#[derive(Debug, Default)]
pub struct Utf8Decoder {
    pending: Vec<u8>,
}

impl Utf8Decoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decode as much as possible; an incomplete trailing sequence is kept
    /// for the next call. Invalid bytes become U+FFFD.
    pub fn decode(&mut self, data: &[u8]) -> String {
        self.pending.extend_from_slice(data);
        let mut out = String::new();
        let mut start = 0;

        loop {
            match std::str::from_utf8(&self.pending[start..]) {
                Ok(s) => {
                    out.push_str(s);
                    start = self.pending.len();
                    break;
                }
                Err(e) => {
                    let valid = e.valid_up_to();
                    out.push_str(&String::from_utf8_lossy(&self.pending[start..start + valid]));
                    match e.error_len() {
                        Some(bad) => {
                            out.push(char::REPLACEMENT_CHARACTER);
                            start += valid + bad;
                        }
                        None => {
                            start += valid;
                            break;
                        }
                    }
                }
            }
        }

        self.pending.drain(..start);
        out
    }

    /// Flush whatever is left (end of stream)
    pub fn finish(&mut self) -> String {
        let rest = String::from_utf8_lossy(&self.pending).into_owned();
        self.pending.clear();
        rest
    }
}
