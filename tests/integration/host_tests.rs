//! Process supervisor tests with real `/bin/sh` processes

use std::time::Duration;
use termdeck::core::config::Config;
use termdeck::host::{
    HostEvent, ProcessId, ProcessKind, ProcessStatus, ShellSpec, SpawnOutcome, Supervisor,
    SupervisorError, SupervisorHandle,
};
use tokio::sync::mpsc;

fn start(config: &Config) -> (SupervisorHandle, mpsc::UnboundedReceiver<HostEvent>) {
    let mut shell = config.shell.clone();
    shell.program = "/bin/sh".to_string();
    let (tx, rx) = mpsc::unbounded_channel();
    let handle = Supervisor::new(config, ShellSpec::from_config(&shell), tx).start();
    (handle, rx)
}

async fn next_event(events: &mut mpsc::UnboundedReceiver<HostEvent>) -> HostEvent {
    tokio::time::timeout(Duration::from_secs(5), events.recv())
        .await
        .expect("timed out waiting for host event")
        .expect("host event feed closed")
}

async fn wait_for_end(events: &mut mpsc::UnboundedReceiver<HostEvent>, id: ProcessId) -> (String, ProcessStatus) {
    let mut output = String::new();
    loop {
        match next_event(events).await {
            HostEvent::Output { process_id, chunk } if process_id == id => output.push_str(&chunk.text),
            HostEvent::Ended { process_id, status, .. } if process_id == id => return (output, status),
            _ => {}
        }
    }
}

#[tokio::test]
async fn test_interactive_process_echoes_input() {
    let mut config = Config::default();
    config.lifetime.interactive_programs = vec!["cat".to_string()];
    let (host, mut events) = start(&config);
    let dir = tempfile::tempdir().unwrap();

    let SpawnOutcome::Streaming { process_id, kind } = host.spawn("cat", dir.path()).await else {
        panic!("cat should stream");
    };
    assert_eq!(kind, ProcessKind::Interactive);

    host.send_input(process_id, b"2+2\n".to_vec()).await.unwrap();
    // Once from the terminal's echo, once from cat; the PTY ends lines with CRLF
    let mut echoed = String::new();
    while echoed.matches("2+2\r\n").count() < 2 {
        if let HostEvent::Output { chunk, .. } = next_event(&mut events).await {
            echoed.push_str(&chunk.text);
        }
    }

    host.kill(Some(process_id));
    let (_, status) = wait_for_end(&mut events, process_id).await;
    assert_eq!(status, ProcessStatus::Killed);
    assert_eq!(
        host.send_input(process_id, b"x\n".to_vec()).await,
        Err(SupervisorError::UnknownProcess(process_id))
    );
}

#[tokio::test]
async fn test_interactive_process_runs_on_a_terminal() {
    let mut config = Config::default();
    config.lifetime.interactive_programs = vec!["sh".to_string()];
    let (host, mut events) = start(&config);
    let dir = tempfile::tempdir().unwrap();

    let SpawnOutcome::Streaming { process_id, kind } = host.spawn("sh", dir.path()).await else {
        panic!("sh should stream");
    };
    assert_eq!(kind, ProcessKind::Interactive);

    host.send_input(process_id, b"tty; exit\n".to_vec()).await.unwrap();
    let (output, status) = wait_for_end(&mut events, process_id).await;
    assert_eq!(status, ProcessStatus::Exited);
    assert!(output.contains("/dev/"), "unexpected output: {:?}", output);
    assert!(!output.contains("not a tty"));
}

#[tokio::test]
async fn test_one_shot_does_not_accept_input() {
    let mut config = Config::default();
    config.supervisor.silence_timeout_ms = 100;
    let (host, _events) = start(&config);
    let dir = tempfile::tempdir().unwrap();

    let SpawnOutcome::Completed(result) = host.spawn("sleep 1", dir.path()).await else {
        panic!("sleep is one-shot here");
    };
    let id = result.process_id.unwrap();
    assert!(result.stalled);
    assert_eq!(
        host.send_input(id, b"x".to_vec()).await,
        Err(SupervisorError::NotAcceptingInput(id))
    );
    host.shutdown().await;
}

#[tokio::test]
async fn test_stderr_and_stdout_are_tagged() {
    let mut config = Config::default();
    config.lifetime.long_running_prefixes = vec!["echo serve".to_string()];
    let (host, mut events) = start(&config);
    let dir = tempfile::tempdir().unwrap();

    let SpawnOutcome::Streaming { process_id, .. } =
        host.spawn("echo serve; echo oops 1>&2", dir.path()).await
    else {
        panic!("expected streaming");
    };

    let mut stdout = String::new();
    let mut stderr = String::new();
    loop {
        match next_event(&mut events).await {
            HostEvent::Output { chunk, .. } => match chunk.source {
                termdeck::host::ChunkSource::Stdout => stdout.push_str(&chunk.text),
                termdeck::host::ChunkSource::Stderr => stderr.push_str(&chunk.text),
            },
            HostEvent::Ended { process_id: id, exit_code, status } => {
                assert_eq!(id, process_id);
                assert_eq!(exit_code, Some(0));
                assert_eq!(status, ProcessStatus::Exited);
                break;
            }
            HostEvent::Started { .. } => {}
        }
    }
    assert_eq!(stdout, "serve\n");
    assert_eq!(stderr, "oops\n");
}

#[tokio::test]
async fn test_color_environment_is_set() {
    let (host, _events) = start(&Config::default());
    let dir = tempfile::tempdir().unwrap();

    let SpawnOutcome::Completed(result) =
        host.spawn("echo $FORCE_COLOR $TERM", dir.path()).await
    else {
        panic!("expected completed");
    };
    assert_eq!(result.output, "1 xterm-256color\n");
}

#[tokio::test]
async fn test_dropping_handles_kills_processes() {
    let mut config = Config::default();
    config.lifetime.long_running_prefixes = vec!["sleep ".to_string()];
    let (host, mut events) = start(&config);
    let dir = tempfile::tempdir().unwrap();

    let SpawnOutcome::Streaming { process_id, .. } = host.spawn("sleep 30", dir.path()).await else {
        panic!("expected streaming");
    };
    drop(host);

    let (_, status) = wait_for_end(&mut events, process_id).await;
    assert_eq!(status, ProcessStatus::Killed);
}
