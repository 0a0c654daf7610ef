//! Host layer: spawning and supervising shell processes

pub mod lifetime;
pub mod login_env;
pub mod process;
mod pty;
pub mod shell;
pub mod supervisor;

pub use lifetime::LifetimeRules;
pub use process::{
    ChunkSource, CommandResult, HostEvent, ManagedProcess, OutputChunk, ProcessId, ProcessKind,
    ProcessStatus, SpawnOutcome, SupervisorError,
};
pub use shell::ShellSpec;
pub use supervisor::{PendingSpawn, Supervisor, SupervisorHandle};

use crate::core::config::ShellConfig;

/// Resolve the shell for spawned commands, capturing the login environment
/// first when enabled.
pub async fn resolve_shell(config: &ShellConfig) -> ShellSpec {
    let spec = ShellSpec::from_config(config);
    if !config.inherit_login_env {
        return spec;
    }
    let base = login_env::resolve_login_env(&spec.program).await;
    spec.with_base_env(base)
}
