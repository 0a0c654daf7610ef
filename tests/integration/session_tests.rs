//! End-to-end session flows through the hub

use std::future::Future;
use std::time::Duration;
use termdeck::core::config::Config;
use termdeck::host::{ChunkSource, HostEvent, OutputChunk, ProcessId, ShellSpec};
use termdeck::terminal::{ExecOutcome, KeyOutcome, RouterState, TerminalHub};
use termdeck::{HubEvent, Notification, NotificationSender, SessionId};
use tokio::sync::mpsc::UnboundedReceiver;

struct Harness {
    hub: TerminalHub,
    events: UnboundedReceiver<HubEvent>,
    notifications: UnboundedReceiver<Notification>,
    _dir: tempfile::TempDir,
    session: SessionId,
}

impl Harness {
    fn new(config: Config) -> Self {
        let mut config = config;
        config.shell.program = "/bin/sh".to_string();
        config.shell.inherit_login_env = false;
        config.session.banner = String::new();

        let (sender, notifications) = NotificationSender::channel();
        let shell = ShellSpec::from_config(&config.shell);
        let mut hub = TerminalHub::new(&config, shell, sender);
        let events = hub.take_events().expect("fresh hub has its feed");
        let dir = tempfile::tempdir().unwrap();
        let session = hub.create_session(Some(dir.path().to_path_buf()));
        Self {
            hub,
            events,
            notifications,
            _dir: dir,
            session,
        }
    }

    /// Feed hub events back into the hub until `done` holds
    async fn pump_until(&mut self, mut done: impl FnMut(&TerminalHub) -> bool) {
        let hub = &mut self.hub;
        let events = &mut self.events;
        with_timeout(async move {
            while !done(&*hub) {
                let event = events.recv().await.expect("hub feed closed");
                hub.handle_event(event);
            }
        })
        .await;
    }

    /// Submit a line and wait for the process it dispatched
    async fn start(&mut self, line: &str) -> ProcessId {
        let id = self.session;
        let outcome = self.hub.send_key(id, line).await.unwrap();
        let KeyOutcome::Executed(ExecOutcome::Dispatched(process_id)) = outcome else {
            panic!("{:?} should dispatch, got {:?}", line, outcome);
        };
        self.pump_until(|hub| hub.snapshot(id).unwrap().current_process == Some(process_id))
            .await;
        process_id
    }

    fn log_text(&self) -> String {
        self.hub.snapshot(self.session).unwrap().text()
    }

    fn notifications(&mut self) -> Vec<Notification> {
        let mut out = Vec::new();
        while let Ok(n) = self.notifications.try_recv() {
            out.push(n);
        }
        out
    }
}

async fn with_timeout<F: Future>(future: F) -> F::Output {
    tokio::time::timeout(Duration::from_secs(10), future)
        .await
        .expect("timed out")
}

/// Poll the supervisor until `id` is gone from its registry
async fn wait_unregistered(hub: &TerminalHub, id: ProcessId) {
    with_timeout(async {
        while hub.processes().await.iter().any(|p| p.id == id) {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await;
}

fn interactive_cat() -> Config {
    let mut config = Config::default();
    config.lifetime.interactive_programs = vec!["cat".to_string()];
    config
}

fn long_running_sleep() -> Config {
    let mut config = Config::default();
    config.lifetime.long_running_prefixes = vec!["sleep ".to_string()];
    config
}

fn has_python3() -> bool {
    std::process::Command::new("python3")
        .arg("--version")
        .output()
        .is_ok_and(|out| out.status.success())
}

#[tokio::test]
async fn test_repl_forwarding_and_escape() {
    let mut h = Harness::new(interactive_cat());
    let id = h.session;

    let process_id = h.start("cat").await;
    assert_eq!(h.hub.router_state(id), RouterState::Forwarding(process_id));

    let outcome = h.hub.send_key(id, "2+2").await.unwrap();
    assert!(matches!(outcome, KeyOutcome::Forwarded(pid) if pid == process_id));

    // Forwarded input: no prompt, no history entry
    let snapshot = h.hub.snapshot(id).unwrap();
    assert_eq!(snapshot.history, vec!["cat".to_string()]);

    // The terminal echoes the line, then cat writes it back
    h.pump_until(|hub| hub.snapshot(id).unwrap().text().matches("2+2\n").count() >= 2)
        .await;
    assert!(!h.log_text().contains('\r'));

    // An escape command leaves the REPL and runs as a one-shot
    let outcome = h.hub.send_key(id, "git status").await.unwrap();
    assert!(matches!(outcome, KeyOutcome::Executed(ExecOutcome::Dispatched(_))));
    assert_eq!(h.hub.router_state(id), RouterState::Idle);
    h.pump_until(|hub| !hub.is_busy(id)).await;

    let snapshot = h.hub.snapshot(id).unwrap();
    assert_eq!(snapshot.history, vec!["cat".to_string(), "git status".to_string()]);
    assert_eq!(snapshot.current_process, None);
    assert!(h
        .notifications()
        .iter()
        .any(|n| matches!(n, Notification::CommandCompleted { command, .. } if command == "git status")));

    wait_unregistered(&h.hub, process_id).await;
}

#[tokio::test]
async fn test_python_repl_answers_forwarded_input() {
    if !has_python3() {
        eprintln!("python3 not installed, skipping");
        return;
    }
    let mut h = Harness::new(Config::default());
    let id = h.session;

    let process_id = h.start("python3").await;
    assert_eq!(h.hub.router_state(id), RouterState::Forwarding(process_id));

    let outcome = h.hub.send_key(id, "2+2").await.unwrap();
    assert!(matches!(outcome, KeyOutcome::Forwarded(_)));
    h.pump_until(|hub| hub.snapshot(id).unwrap().text().lines().any(|l| l.trim() == "4"))
        .await;

    // Leaving through the REPL itself ends the process normally
    h.hub.send_key(id, "exit()").await.unwrap();
    h.pump_until(|hub| hub.router_state(id) == RouterState::Idle).await;
    assert!(h.log_text().contains("[process exited]"));
    wait_unregistered(&h.hub, process_id).await;
}

#[tokio::test]
async fn test_escape_from_python_repl_ends_it() {
    if !has_python3() {
        eprintln!("python3 not installed, skipping");
        return;
    }
    let mut h = Harness::new(Config::default());
    let id = h.session;

    let process_id = h.start("python3").await;
    h.hub.send_key(id, "ls").await.unwrap();
    h.pump_until(|hub| !hub.is_busy(id)).await;

    // SIGINT alone leaves a REPL at its prompt
    wait_unregistered(&h.hub, process_id).await;
}

#[tokio::test]
async fn test_repl_exit_returns_to_idle() {
    let mut h = Harness::new(interactive_cat());
    let id = h.session;

    let process_id = h.start("cat").await;

    assert!(h.hub.interrupt(id).unwrap());
    h.pump_until(|hub| hub.router_state(id) == RouterState::Idle).await;

    let snapshot = h.hub.snapshot(id).unwrap();
    assert_eq!(snapshot.current_process, None);
    assert!(h.log_text().contains("[process interrupted]"));
    assert!(!h.hub.interrupt(id).unwrap());
    wait_unregistered(&h.hub, process_id).await;
}

#[tokio::test]
async fn test_noisy_one_shot_can_be_interrupted() {
    let mut config = Config::default();
    config.supervisor.silence_timeout_ms = 300;
    let mut h = Harness::new(config);
    let id = h.session;
    let line = "while :; do echo tick; sleep 0.1; done";

    let ExecOutcome::Dispatched(process_id) = h.hub.execute(id, line).unwrap() else {
        panic!("expected a dispatched command");
    };

    // Steady output keeps the silence fallback from ever firing
    tokio::time::sleep(Duration::from_millis(1000)).await;
    while let Ok(event) = h.events.try_recv() {
        h.hub.handle_event(event);
    }
    assert!(h.hub.is_busy(id));
    assert!(matches!(h.hub.execute(id, "ls"), Err(termdeck::HubError::Busy { .. })));

    // Other sessions keep working meanwhile
    let other = h.hub.create_session(Some(std::env::temp_dir()));
    h.hub.execute(other, "echo elsewhere").unwrap();
    h.pump_until(|hub| !hub.is_busy(other)).await;
    assert!(h.hub.snapshot(other).unwrap().text().contains("elsewhere\n"));

    assert!(h.hub.interrupt(id).unwrap());
    h.pump_until(|hub| !hub.is_busy(id)).await;

    assert!(h.log_text().contains("tick\n"));
    assert!(h.notifications().iter().any(|n| matches!(
        n,
        Notification::CommandCompleted { command, success: false, stalled: false, .. } if command == line
    )));
    wait_unregistered(&h.hub, process_id).await;
}

#[tokio::test]
async fn test_kill_then_close_leaves_no_registry_entry() {
    let mut h = Harness::new(long_running_sleep());
    let id = h.session;

    let process_id = h.start("sleep 30").await;
    assert!(h.hub.processes().await.iter().any(|p| p.id == process_id));

    h.hub.interrupt(id).unwrap();
    h.hub.close_session(id).unwrap();
    assert!(h.hub.snapshot(id).is_none());

    wait_unregistered(&h.hub, process_id).await;
}

#[tokio::test]
async fn test_at_most_one_process_per_session() {
    let mut h = Harness::new(long_running_sleep());
    let id = h.session;

    let first = h.start("sleep 30").await;
    let second = h.start("sleep 31").await;

    assert_ne!(first, second);
    assert_eq!(h.hub.snapshot(id).unwrap().current_process, Some(second));

    // The replaced process is interrupted; its end is not reported to the session
    wait_unregistered(&h.hub, first).await;
    while let Ok(event) = h.events.try_recv() {
        h.hub.handle_event(event);
    }
    assert!(!h.log_text().contains("[process"));
    assert!(h.hub.processes().await.iter().any(|p| p.id == second));

    h.hub.shutdown().await;
}

#[tokio::test]
async fn test_unknown_process_output_is_dropped() {
    let mut h = Harness::new(Config::default());
    let id = h.session;
    h.hub.flush_redraws();
    h.notifications();
    let before = h.hub.snapshot(id).unwrap().output_log.len();

    h.hub.handle_host_event(HostEvent::Output {
        process_id: ProcessId::generate(),
        chunk: OutputChunk {
            seq: 0,
            text: "stray output\n".to_string(),
            source: ChunkSource::Stdout,
            timestamp: chrono::Utc::now(),
        },
    });

    assert_eq!(h.hub.snapshot(id).unwrap().output_log.len(), before);
    tokio::time::sleep(Duration::from_millis(30)).await;
    assert!(!h.hub.flush_redraws());
    assert!(h.notifications().is_empty());
}

#[tokio::test]
async fn test_silent_one_shot_resolves_as_stalled() {
    let mut config = Config::default();
    config.supervisor.silence_timeout_ms = 300;
    let mut h = Harness::new(config);
    let id = h.session;

    h.hub.execute(id, "sleep 2").unwrap();
    h.pump_until(|hub| !hub.is_busy(id)).await;

    assert!(h.log_text().contains("may still be running"));
    assert!(h
        .notifications()
        .iter()
        .any(|n| matches!(n, Notification::CommandCompleted { stalled: true, success: false, .. })));

    h.hub.shutdown().await;
}

#[tokio::test]
async fn test_long_running_output_is_styled_and_ends() {
    let mut config = Config::default();
    config.lifetime.long_running_prefixes = vec!["printf ".to_string()];
    let mut h = Harness::new(config);
    let id = h.session;

    let outcome = h.hub.execute(id, "printf '\\033[32mready\\033[0m\\n'").unwrap();
    assert!(matches!(outcome, ExecOutcome::Dispatched(_)));

    h.pump_until(|hub| hub.snapshot(id).unwrap().text().contains("[process exited]"))
        .await;

    let snapshot = h.hub.snapshot(id).unwrap();
    assert_eq!(snapshot.current_process, None);
    let ready = snapshot
        .output_log
        .iter()
        .flat_map(|e| e.spans.iter())
        .find(|s| s.text == "ready")
        .expect("styled span");
    assert_eq!(ready.style.fg, Some(termdeck::ansi::AnsiColor::Green));
}

#[tokio::test]
async fn test_forwarding_to_dead_process_fails_and_goes_idle() {
    let mut h = Harness::new(interactive_cat());
    let id = h.session;

    let process_id = h.start("cat").await;

    // The process is gone but its Ended event has not been applied yet
    h.hub.interrupt(id).unwrap();
    wait_unregistered(&h.hub, process_id).await;
    assert_eq!(h.hub.router_state(id), RouterState::Forwarding(process_id));

    let outcome = h.hub.send_key(id, "hello").await.unwrap();
    assert!(matches!(outcome, KeyOutcome::ForwardFailed(_)));
    assert_eq!(h.hub.router_state(id), RouterState::Idle);
    assert!(h.log_text().contains("input not delivered"));
}
