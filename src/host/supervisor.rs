//! Process supervisor: the host-side actor owning every spawned process
//!
//! The supervisor runs as its own tokio task. Callers talk to it through a
//! [`SupervisorHandle`] (requests with oneshot replies) and observe streaming
//! processes through the shared [`HostEvent`] feed.

use super::lifetime::LifetimeRules;
use super::pty::{self, ChunkSender, ExitInfo, PtyChild};
use super::process::{
    ChunkSource, CommandResult, HostEvent, ManagedProcess, OutputChunk, ProcessId, ProcessKind,
    ProcessStatus, SpawnOutcome, SupervisorError,
};
use super::shell::{parse_cd, resolve_cd, ShellSpec, Utf8Decoder};
use crate::core::config::Config;
use anyhow::Result;
use chrono::Utc;
use parking_lot::Mutex;
use portable_pty::PtySize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::{Child, ChildStdin};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, trace, warn};

type Registry = Arc<Mutex<HashMap<ProcessId, TrackedProcess>>>;

/// Signal delivered to a process group
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum HostSignal {
    /// Ctrl+C
    Interrupt,
    /// Teardown
    Kill,
}

struct TrackedProcess {
    info: ManagedProcess,
    /// Present for streaming kinds only
    input_tx: Option<mpsc::UnboundedSender<Vec<u8>>>,
    signal_tx: mpsc::UnboundedSender<HostSignal>,
    kill_requested: bool,
}

enum HostRequest {
    Spawn {
        process_id: ProcessId,
        command: String,
        working_dir: PathBuf,
        reply: oneshot::Sender<SpawnOutcome>,
    },
    SendInput {
        process_id: ProcessId,
        data: Vec<u8>,
        reply: oneshot::Sender<Result<(), SupervisorError>>,
    },
    Kill {
        process_id: Option<ProcessId>,
    },
    List {
        reply: oneshot::Sender<Vec<ManagedProcess>>,
    },
    Shutdown {
        reply: oneshot::Sender<()>,
    },
}

/// Cloneable client of the supervisor task.
///
/// Once every handle is dropped the supervisor force-kills whatever is still
/// registered and stops.
#[derive(Debug, Clone)]
pub struct SupervisorHandle {
    tx: mpsc::UnboundedSender<HostRequest>,
}

impl std::fmt::Debug for HostRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HostRequest::Spawn { command, .. } => write!(f, "Spawn({:?})", command),
            HostRequest::SendInput { process_id, .. } => write!(f, "SendInput({})", process_id),
            HostRequest::Kill { process_id } => write!(f, "Kill({:?})", process_id),
            HostRequest::List { .. } => write!(f, "List"),
            HostRequest::Shutdown { .. } => write!(f, "Shutdown"),
        }
    }
}

/// A spawn request on its way to the supervisor.
///
/// The process id is fixed before the request is sent, so the process can
/// be interrupted with [`SupervisorHandle::kill`] before its outcome is in.
#[derive(Debug)]
pub struct PendingSpawn {
    process_id: ProcessId,
    working_dir: PathBuf,
    reply: Option<oneshot::Receiver<SpawnOutcome>>,
}

impl PendingSpawn {
    pub fn process_id(&self) -> ProcessId {
        self.process_id
    }

    /// One-shot commands resolve with their result; streaming kinds resolve
    /// as soon as the process is running. Never fails: problems starting the
    /// process come back as a failed [`CommandResult`].
    pub async fn outcome(self) -> SpawnOutcome {
        let PendingSpawn {
            working_dir, reply, ..
        } = self;
        let reply = match reply {
            Some(rx) => rx.await.ok(),
            None => None,
        };
        reply.unwrap_or_else(|| {
            SpawnOutcome::Completed(CommandResult::failed(
                SupervisorError::HostUnavailable.to_string(),
                working_dir,
            ))
        })
    }
}

impl SupervisorHandle {
    /// Send a request to run `command` in `working_dir` without waiting for
    /// it
    pub fn dispatch(&self, command: &str, working_dir: &Path) -> PendingSpawn {
        let process_id = ProcessId::generate();
        let (reply, rx) = oneshot::channel();
        let request = HostRequest::Spawn {
            process_id,
            command: command.to_string(),
            working_dir: working_dir.to_path_buf(),
            reply,
        };
        let reply = match self.tx.send(request) {
            Ok(()) => Some(rx),
            Err(_) => None,
        };
        PendingSpawn {
            process_id,
            working_dir: working_dir.to_path_buf(),
            reply,
        }
    }

    /// Run `command` in `working_dir` and wait for its
    /// [outcome](PendingSpawn::outcome)
    pub async fn spawn(&self, command: &str, working_dir: &Path) -> SpawnOutcome {
        self.dispatch(command, working_dir).outcome().await
    }

    /// Write raw bytes to a streaming process's stdin
    pub async fn send_input(
        &self,
        process_id: ProcessId,
        data: impl Into<Vec<u8>>,
    ) -> Result<(), SupervisorError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(HostRequest::SendInput {
                process_id,
                data: data.into(),
                reply,
            })
            .map_err(|_| SupervisorError::HostUnavailable)?;
        rx.await.map_err(|_| SupervisorError::HostUnavailable)?
    }

    /// Interrupt one process, or every tracked process with `None`.
    /// Fire-and-forget; unknown ids are ignored.
    pub fn kill(&self, process_id: Option<ProcessId>) {
        if self.tx.send(HostRequest::Kill { process_id }).is_err() {
            debug!("Kill request after supervisor shutdown");
        }
    }

    /// Snapshot of the registry
    pub async fn processes(&self) -> Vec<ManagedProcess> {
        let (reply, rx) = oneshot::channel();
        if self.tx.send(HostRequest::List { reply }).is_err() {
            return Vec::new();
        }
        rx.await.unwrap_or_default()
    }

    /// Force-kill everything and stop the supervisor
    pub async fn shutdown(&self) {
        let (reply, rx) = oneshot::channel();
        if self.tx.send(HostRequest::Shutdown { reply }).is_ok() {
            let _ = rx.await;
        }
    }
}

/// The supervisor actor
pub struct Supervisor {
    shell: ShellSpec,
    rules: LifetimeRules,
    silence_timeout: Duration,
    pty_size: PtySize,
    registry: Registry,
    events: mpsc::UnboundedSender<HostEvent>,
}

impl Supervisor {
    pub fn new(config: &Config, shell: ShellSpec, events: mpsc::UnboundedSender<HostEvent>) -> Self {
        Self {
            shell,
            rules: LifetimeRules::from_config(&config.lifetime),
            silence_timeout: Duration::from_millis(config.supervisor.silence_timeout_ms),
            pty_size: PtySize {
                rows: config.supervisor.pty_rows,
                cols: config.supervisor.pty_cols,
                pixel_width: 0,
                pixel_height: 0,
            },
            registry: Arc::new(Mutex::new(HashMap::new())),
            events,
        }
    }

    /// Start the actor on the current tokio runtime
    pub fn start(self) -> SupervisorHandle {
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(self.run(rx));
        SupervisorHandle { tx }
    }

    async fn run(self, mut requests: mpsc::UnboundedReceiver<HostRequest>) {
        info!("Process supervisor started (shell: {:?})", self.shell.program);

        while let Some(request) = requests.recv().await {
            trace!("Supervisor request: {:?}", request);
            match request {
                HostRequest::Spawn {
                    process_id,
                    command,
                    working_dir,
                    reply,
                } => self.spawn(process_id, command, working_dir, reply),
                HostRequest::SendInput {
                    process_id,
                    data,
                    reply,
                } => {
                    let _ = reply.send(self.send_input(process_id, data));
                }
                HostRequest::Kill { process_id } => self.signal(process_id, HostSignal::Interrupt),
                HostRequest::List { reply } => {
                    let _ = reply.send(self.list());
                }
                HostRequest::Shutdown { reply } => {
                    self.signal(None, HostSignal::Kill);
                    let _ = reply.send(());
                    info!("Process supervisor shut down");
                    return;
                }
            }
        }

        // Every handle dropped
        self.signal(None, HostSignal::Kill);
        info!("Process supervisor stopped");
    }

    fn spawn(
        &self,
        id: ProcessId,
        command: String,
        working_dir: PathBuf,
        reply: oneshot::Sender<SpawnOutcome>,
    ) {
        let command = command.trim().to_string();

        if let Some(target) = parse_cd(&command) {
            let result = match resolve_cd(target.as_deref(), &working_dir) {
                Ok(dir) => {
                    debug!("cd -> {:?}", dir);
                    CommandResult {
                        success: true,
                        output: String::new(),
                        exit_code: Some(0),
                        working_dir: dir,
                        stalled: false,
                        process_id: None,
                    }
                }
                Err(message) => CommandResult {
                    exit_code: Some(1),
                    ..CommandResult::failed(message, working_dir)
                },
            };
            let _ = reply.send(SpawnOutcome::Completed(result));
            return;
        }

        if !working_dir.is_dir() {
            let message = format!("working directory not found: {}", working_dir.display());
            warn!("Cannot run {:?}: {}", command, message);
            let _ = reply.send(SpawnOutcome::Completed(CommandResult::failed(message, working_dir)));
            return;
        }

        let kind = self.rules.classify(&command);
        let (chunk_tx, chunk_rx) = mpsc::unbounded_channel();
        let started = if kind == ProcessKind::Interactive {
            pty::spawn_pty(&self.shell, &command, &working_dir, self.pty_size, chunk_tx)
                .map(|(child, input)| (HostChild::Pty(child), Some(input)))
        } else {
            self.spawn_piped(&command, &working_dir, kind, chunk_tx)
        };
        let (child, input_tx) = match started {
            Ok(started) => started,
            Err(e) => {
                warn!("Failed to spawn {:?}: {:#}", command, e);
                let message = format!("failed to start `{}`: {:#}", command, e);
                let _ = reply.send(SpawnOutcome::Completed(CommandResult::failed(message, working_dir)));
                return;
            }
        };

        let pid = child.pid();
        info!("Spawned {} ({:?}, pid {:?}): {}", id, kind, pid, command);

        let (signal_tx, signal_rx) = mpsc::unbounded_channel();
        self.registry.lock().insert(
            id,
            TrackedProcess {
                info: ManagedProcess {
                    id,
                    command: command.clone(),
                    started_at: Utc::now(),
                    kind,
                    status: ProcessStatus::Running,
                    exit_code: None,
                    pid,
                },
                input_tx,
                signal_tx,
                kill_requested: false,
            },
        );

        let task = ProcessTask {
            id,
            kind,
            command: command.clone(),
            working_dir,
            pid,
            silence_timeout: self.silence_timeout,
            registry: self.registry.clone(),
            events: self.events.clone(),
        };

        if kind.is_streaming() {
            let _ = self.events.send(HostEvent::Started {
                process_id: id,
                command,
                kind,
            });
            let _ = reply.send(SpawnOutcome::Streaming { process_id: id, kind });
            tokio::spawn(task.run(child, chunk_rx, signal_rx, None));
        } else {
            tokio::spawn(task.run(child, chunk_rx, signal_rx, Some(reply)));
        }
    }

    /// Start a command with piped stdio; stdin stays open for streaming
    /// kinds only
    fn spawn_piped(
        &self,
        command: &str,
        working_dir: &Path,
        kind: ProcessKind,
        chunks: ChunkSender,
    ) -> Result<(HostChild, Option<mpsc::UnboundedSender<Vec<u8>>>)> {
        let mut child = self.shell.command(command, working_dir).spawn()?;

        if let Some(stdout) = child.stdout.take() {
            spawn_reader(stdout, ChunkSource::Stdout, chunks.clone());
        }
        if let Some(stderr) = child.stderr.take() {
            spawn_reader(stderr, ChunkSource::Stderr, chunks);
        }

        // One-shot commands get EOF on stdin right away
        let stdin = child.stdin.take();
        let input_tx = if kind.is_streaming() {
            stdin.map(spawn_writer)
        } else {
            None
        };
        Ok((HostChild::Piped(child), input_tx))
    }

    fn send_input(&self, process_id: ProcessId, data: Vec<u8>) -> Result<(), SupervisorError> {
        let registry = self.registry.lock();
        let tracked = registry
            .get(&process_id)
            .ok_or(SupervisorError::UnknownProcess(process_id))?;
        let input = tracked
            .input_tx
            .as_ref()
            .ok_or(SupervisorError::NotAcceptingInput(process_id))?;
        input
            .send(data)
            .map_err(|_| SupervisorError::InputClosed(process_id))
    }

    fn signal(&self, process_id: Option<ProcessId>, signal: HostSignal) {
        let mut registry = self.registry.lock();
        let targets: Vec<ProcessId> = match process_id {
            Some(id) if registry.contains_key(&id) => vec![id],
            Some(id) => {
                debug!("Ignoring {:?} for unknown process {}", signal, id);
                return;
            }
            None => registry.keys().copied().collect(),
        };

        for id in targets {
            if let Some(tracked) = registry.get_mut(&id) {
                debug!("Sending {:?} to {}", signal, id);
                tracked.kill_requested = true;
                let _ = tracked.signal_tx.send(signal);
            }
        }
    }

    fn list(&self) -> Vec<ManagedProcess> {
        let mut list: Vec<ManagedProcess> =
            self.registry.lock().values().map(|t| t.info.clone()).collect();
        list.sort_by_key(|p| p.started_at);
        list
    }
}

/// A spawned child, on pipes or on a PTY
enum HostChild {
    Piped(Child),
    Pty(PtyChild),
}

impl HostChild {
    fn pid(&self) -> Option<u32> {
        match self {
            HostChild::Piped(child) => child.id(),
            HostChild::Pty(child) => child.pid(),
        }
    }

    /// `None` if the exit status could not be collected
    async fn wait(&mut self) -> Option<ExitInfo> {
        match self {
            HostChild::Piped(child) => match child.wait().await {
                Ok(status) => Some((status.success(), status.code())),
                Err(e) => {
                    warn!("Failed to wait for child: {}", e);
                    None
                }
            },
            HostChild::Pty(child) => child.wait().await,
        }
    }

    /// Kill the child itself, without its process group
    fn kill(&mut self) {
        match self {
            HostChild::Piped(child) => {
                if let Err(e) = child.start_kill() {
                    debug!("Failed to kill child: {}", e);
                }
            }
            HostChild::Pty(child) => child.kill(),
        }
    }
}

/// Owns one child process until it exits
struct ProcessTask {
    id: ProcessId,
    kind: ProcessKind,
    command: String,
    working_dir: PathBuf,
    pid: Option<u32>,
    silence_timeout: Duration,
    registry: Registry,
    events: mpsc::UnboundedSender<HostEvent>,
}

impl ProcessTask {
    async fn run(
        self,
        mut child: HostChild,
        mut chunks: mpsc::UnboundedReceiver<(ChunkSource, String)>,
        mut signals: mpsc::UnboundedReceiver<HostSignal>,
        mut reply: Option<oneshot::Sender<SpawnOutcome>>,
    ) {
        let streaming = self.kind.is_streaming();
        let mut seq: u64 = 0;
        let mut output = String::new();
        let mut chunks_open = true;

        let silence = tokio::time::sleep(self.silence_timeout);
        tokio::pin!(silence);

        let exit = loop {
            tokio::select! {
                chunk = chunks.recv(), if chunks_open => match chunk {
                    Some((source, text)) => {
                        if streaming {
                            let chunk = OutputChunk {
                                seq,
                                text,
                                source,
                                timestamp: Utc::now(),
                            };
                            seq += 1;
                            let _ = self.events.send(HostEvent::Output {
                                process_id: self.id,
                                chunk,
                            });
                        } else if reply.is_some() {
                            output.push_str(&text);
                            silence
                                .as_mut()
                                .reset(tokio::time::Instant::now() + self.silence_timeout);
                        }
                    }
                    None => chunks_open = false,
                },
                Some(signal) = signals.recv() => self.deliver(&mut child, signal),
                () = &mut silence, if !streaming && reply.is_some() => {
                    warn!(
                        "{} silent for {:?}, resolving early (process left running)",
                        self.id, self.silence_timeout
                    );
                    if let Some(tx) = reply.take() {
                        let _ = tx.send(SpawnOutcome::Completed(self.stalled_result(&output)));
                    }
                }
                exit = child.wait(), if !chunks_open => break exit,
            }
        };

        let (succeeded, exit_code) = exit.unwrap_or((false, None));
        let killed = self
            .registry
            .lock()
            .remove(&self.id)
            .map(|t| t.kill_requested)
            .unwrap_or(false);
        let final_status = if killed {
            ProcessStatus::Killed
        } else {
            ProcessStatus::Exited
        };
        info!("{} ended ({:?}, exit code {:?})", self.id, final_status, exit_code);

        if streaming {
            let _ = self.events.send(HostEvent::Ended {
                process_id: self.id,
                exit_code,
                status: final_status,
            });
        } else if let Some(tx) = reply {
            let _ = tx.send(SpawnOutcome::Completed(CommandResult {
                success: succeeded && !killed,
                output,
                exit_code,
                working_dir: self.working_dir,
                stalled: false,
                process_id: Some(self.id),
            }));
        }
    }

    fn stalled_result(&self, output: &str) -> CommandResult {
        let mut text = output.to_string();
        if !text.is_empty() && !text.ends_with('\n') {
            text.push('\n');
        }
        text.push_str(&format!(
            "`{}` produced no output for {:.1}s and may still be running ({})",
            self.command,
            self.silence_timeout.as_secs_f64(),
            self.id
        ));
        CommandResult {
            success: false,
            output: text,
            exit_code: None,
            working_dir: self.working_dir.clone(),
            stalled: true,
            process_id: Some(self.id),
        }
    }

    fn deliver(&self, child: &mut HostChild, signal: HostSignal) {
        #[cfg(unix)]
        {
            use nix::sys::signal::{killpg, Signal};
            use nix::unistd::Pid;

            let Some(pid) = self.pid else {
                child.kill();
                return;
            };
            let signals: &[Signal] = match (signal, &*child) {
                (HostSignal::Kill, _) => &[Signal::SIGKILL],
                // REPLs survive SIGINT, so their terminal is hung up too
                (HostSignal::Interrupt, HostChild::Pty(_)) => &[Signal::SIGINT, Signal::SIGHUP],
                (HostSignal::Interrupt, HostChild::Piped(_)) => &[Signal::SIGINT],
            };
            // Piped shells are started as group leaders, PTY children as
            // session leaders
            for &sig in signals {
                if let Err(e) = killpg(Pid::from_raw(pid as i32), sig) {
                    debug!("{:?} to process group {} failed: {}", sig, pid, e);
                }
            }
        }
        #[cfg(not(unix))]
        {
            let _ = signal;
            child.kill();
        }
    }
}

fn spawn_reader<R>(mut reader: R, source: ChunkSource, tx: ChunkSender)
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut decoder = Utf8Decoder::new();
        let mut buf = [0u8; 4096];
        loop {
            match reader.read(&mut buf).await {
                Ok(0) => break,
                Ok(n) => {
                    let text = decoder.decode(&buf[..n]);
                    if !text.is_empty() && tx.send((source, text)).is_err() {
                        return;
                    }
                }
                Err(e) => {
                    debug!("{:?} read error: {}", source, e);
                    break;
                }
            }
        }
        let rest = decoder.finish();
        if !rest.is_empty() {
            let _ = tx.send((source, rest));
        }
    });
}

fn spawn_writer(mut stdin: ChildStdin) -> mpsc::UnboundedSender<Vec<u8>> {
    let (tx, mut rx) = mpsc::unbounded_channel::<Vec<u8>>();
    tokio::spawn(async move {
        while let Some(data) = rx.recv().await {
            if let Err(e) = stdin.write_all(&data).await {
                debug!("stdin write failed: {}", e);
                break;
            }
            if let Err(e) = stdin.flush().await {
                debug!("stdin flush failed: {}", e);
                break;
            }
        }
    });
    tx
}
