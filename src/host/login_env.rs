//! Capture the user's login shell environment for spawned commands.
//!
//! An IDE started from a desktop launcher inherits a bare environment
//! (PATH = /usr/bin:/bin:...), so `npm`, `cargo` and friends would not be
//! found. The host runs the login shell once, reads `env -0` and uses that as
//! the base environment for every command.

use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;
use tracing::{info, warn};

/// How long the login shell may take before we give up
pub const LOGIN_ENV_TIMEOUT: Duration = Duration::from_secs(5);

/// Run `shell -l -c 'env -0'` and parse its output.
///
/// Falls back to the current process environment with a widened PATH on any
/// failure. Returns an empty map on non-Unix platforms, where GUI launches
/// already get the full environment.
pub async fn resolve_login_env(shell: &Path) -> HashMap<String, String> {
    #[cfg(unix)]
    {
        resolve_login_env_unix(shell).await
    }
    #[cfg(not(unix))]
    {
        let _ = shell;
        HashMap::new()
    }
}

#[cfg(unix)]
async fn resolve_login_env_unix(shell: &Path) -> HashMap<String, String> {
    use std::process::Stdio;
    use tokio::process::Command;

    info!("Resolving login environment from shell: {:?}", shell);

    let child = Command::new(shell)
        .args(["-l", "-c", "env -0"])
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .kill_on_drop(true)
        .spawn();

    let child = match child {
        Ok(c) => c,
        Err(e) => {
            warn!("Failed to spawn login shell {:?}: {}", shell, e);
            return fallback_env();
        }
    };

    match tokio::time::timeout(LOGIN_ENV_TIMEOUT, child.wait_with_output()).await {
        Ok(Ok(output)) if output.status.success() => {
            let env = parse_env_null_delimited(&output.stdout);
            if env.is_empty() || !env.contains_key("PATH") {
                warn!("Login shell produced no usable environment, using fallback");
                return fallback_env();
            }
            info!("Captured {} environment variables from login shell", env.len());
            env
        }
        Ok(Ok(output)) => {
            warn!("Login shell {:?} exited with status: {}", shell, output.status);
            fallback_env()
        }
        Ok(Err(e)) => {
            warn!("Login shell {:?} wait failed: {}", shell, e);
            fallback_env()
        }
        Err(_) => {
            warn!("Login shell {:?} timed out after {:?}", shell, LOGIN_ENV_TIMEOUT);
            fallback_env()
        }
    }
}

/// Parse NUL-delimited environment output (`env -0` format).
pub fn parse_env_null_delimited(data: &[u8]) -> HashMap<String, String> {
    let text = String::from_utf8_lossy(data);
    text.split('\0')
        .filter_map(|entry| entry.split_once('='))
        .filter(|(key, _)| !key.is_empty())
        .map(|(key, value)| (key.to_string(), value.to_string()))
        .collect()
}

/// Current environment plus the usual user-level bin directories
#[cfg(unix)]
fn fallback_env() -> HashMap<String, String> {
    let mut env: HashMap<String, String> = std::env::vars().collect();
    let home = env.get("HOME").cloned().unwrap_or_default();
    let current_path = env.get("PATH").cloned().unwrap_or_default();

    let mut paths = vec![
        "/opt/homebrew/bin".to_string(),
        "/usr/local/bin".to_string(),
        format!("{}/.cargo/bin", home),
        format!("{}/.local/bin", home),
        format!("{}/.npm-global/bin", home),
    ];
    if !current_path.is_empty() {
        paths.push(current_path);
    }

    env.insert("PATH".to_string(), paths.join(":"));
    env
}
