//! Pseudo-terminal processes
//!
//! REPLs only prompt and answer line by line when stdin is a terminal, so
//! interactive commands run under a PTY instead of pipes. stdout and stderr
//! arrive merged on the master side.

use super::process::ChunkSource;
use super::shell::{ShellSpec, Utf8Decoder};
use anyhow::{Context, Result};
use portable_pty::{native_pty_system, ChildKiller, MasterPty, PtySize};
use std::io::{Read, Write};
use std::path::Path;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

pub(super) type ChunkSender = mpsc::UnboundedSender<(ChunkSource, String)>;

/// Whether the child succeeded, and its exit code when known
pub(super) type ExitInfo = (bool, Option<i32>);

/// A child running on the slave side of a PTY
pub(super) struct PtyChild {
    pid: Option<u32>,
    /// Dropping the master hangs up the terminal
    _master: Box<dyn MasterPty + Send>,
    killer: Box<dyn ChildKiller + Send + Sync>,
    exit: oneshot::Receiver<ExitInfo>,
}

impl PtyChild {
    /// Also the process group id: the child leads its own session
    pub(super) fn pid(&self) -> Option<u32> {
        self.pid
    }

    pub(super) async fn wait(&mut self) -> Option<ExitInfo> {
        (&mut self.exit).await.ok()
    }

    pub(super) fn kill(&mut self) {
        if let Err(e) = self.killer.kill() {
            debug!("Failed to kill PTY child: {}", e);
        }
    }
}

/// Start `line` under a fresh PTY. Output goes to `chunks` (tagged stdout);
/// the returned sender writes to the terminal.
pub(super) fn spawn_pty(
    shell: &ShellSpec,
    line: &str,
    working_dir: &Path,
    size: PtySize,
    chunks: ChunkSender,
) -> Result<(PtyChild, mpsc::UnboundedSender<Vec<u8>>)> {
    let pair = native_pty_system()
        .openpty(size)
        .context("Failed to create PTY")?;

    let child = pair
        .slave
        .spawn_command(shell.pty_command(line, working_dir))
        .context("Failed to spawn command in PTY")?;
    // Reads only see EOF once the child holds the last slave handle
    drop(pair.slave);

    let reader = pair
        .master
        .try_clone_reader()
        .context("Failed to get PTY reader")?;
    let writer = pair
        .master
        .take_writer()
        .context("Failed to get PTY writer")?;

    let pid = child.process_id();
    let killer = child.clone_killer();

    start_reader_thread(reader, chunks);
    let input_tx = start_writer_thread(writer);
    let exit = start_wait_thread(child);

    Ok((
        PtyChild {
            pid,
            _master: pair.master,
            killer,
            exit,
        },
        input_tx,
    ))
}

fn start_reader_thread(mut reader: Box<dyn Read + Send>, chunks: ChunkSender) {
    std::thread::spawn(move || {
        let mut decoder = Utf8Decoder::new();
        let mut buffer = [0u8; 4096];
        loop {
            match reader.read(&mut buffer) {
                Ok(0) => break,
                Ok(n) => {
                    let text = decoder.decode(&buffer[..n]);
                    if !text.is_empty() && chunks.send((ChunkSource::Stdout, text)).is_err() {
                        return;
                    }
                }
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => {}
                // EIO once the slave side is closed
                Err(e) => {
                    debug!("PTY read ended: {}", e);
                    break;
                }
            }
        }
        let rest = decoder.finish();
        if !rest.is_empty() {
            let _ = chunks.send((ChunkSource::Stdout, rest));
        }
    });
}

fn start_writer_thread(mut writer: Box<dyn Write + Send>) -> mpsc::UnboundedSender<Vec<u8>> {
    let (tx, mut rx) = mpsc::unbounded_channel::<Vec<u8>>();
    std::thread::spawn(move || {
        while let Some(data) = rx.blocking_recv() {
            if let Err(e) = writer.write_all(&data).and_then(|()| writer.flush()) {
                debug!("PTY write failed: {}", e);
                break;
            }
        }
    });
    tx
}

fn start_wait_thread(mut child: Box<dyn portable_pty::Child + Send + Sync>) -> oneshot::Receiver<ExitInfo> {
    let (tx, rx) = oneshot::channel();
    std::thread::spawn(move || {
        let exit = match child.wait() {
            Ok(status) => (status.success(), Some(status.exit_code() as i32)),
            Err(e) => {
                warn!("Failed to wait for PTY child: {}", e);
                (false, None)
            }
        };
        let _ = tx.send(exit);
    });
    rx
}
