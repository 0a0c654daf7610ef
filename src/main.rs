//! TermDeck - Entry Point
//!
//! Line-oriented front-end over stdin/stdout. Each line is submitted to the
//! active session; lines starting with `:` control the sessions themselves.

use anyhow::{Context, Result};
use std::collections::HashMap;
use std::io::Write;
use std::path::PathBuf;
use std::time::Duration;
use termdeck::{
    ansi::{SpanStyle, StyledSpan},
    core::config::Config,
    terminal::executor::display_dir,
    KeyOutcome, Notification, NotificationSender, SessionId, TerminalHub,
};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Session control commands
#[derive(Debug, Clone, PartialEq, Eq)]
enum MetaCommand {
    New(Option<PathBuf>),
    Switch(SessionId),
    Close(Option<SessionId>),
    List,
    HistoryPrevious,
    HistoryNext,
    Interrupt,
    Processes,
    Help,
    Quit,
}

const HELP: &str = "\
:new [dir]          open a session (home directory by default)
:switch N           make session N active
:close [N]          close session N (the active one by default)
:list               list sessions
:history prev|next  recall a command from history
:interrupt          interrupt the active session's process
:ps                 list running processes
:quit               exit";

/// `None` for ordinary input
fn parse_meta(line: &str) -> Option<Result<MetaCommand, String>> {
    let rest = line.trim().strip_prefix(':')?;
    let mut parts = rest.split_whitespace();
    let name = parts.next().unwrap_or("");
    let arg = parts.next();

    let parse_id = |arg: &str| {
        arg.parse::<SessionId>()
            .map_err(|_| format!("not a session number: {}", arg))
    };

    let command = match (name, arg) {
        ("new", dir) => Ok(MetaCommand::New(dir.map(PathBuf::from))),
        ("switch", Some(id)) => parse_id(id).map(MetaCommand::Switch),
        ("switch", None) => Err("usage: :switch N".to_string()),
        ("close", Some(id)) => parse_id(id).map(|id| MetaCommand::Close(Some(id))),
        ("close", None) => Ok(MetaCommand::Close(None)),
        ("list", _) => Ok(MetaCommand::List),
        ("history", Some("prev")) => Ok(MetaCommand::HistoryPrevious),
        ("history", Some("next")) => Ok(MetaCommand::HistoryNext),
        ("history", _) => Err("usage: :history prev|next".to_string()),
        ("interrupt", _) => Ok(MetaCommand::Interrupt),
        ("ps", _) => Ok(MetaCommand::Processes),
        ("help", _) => Ok(MetaCommand::Help),
        ("quit", _) | ("q", _) => Ok(MetaCommand::Quit),
        (other, _) => Err(format!("unknown command :{} (try :help)", other)),
    };
    Some(command)
}

/// Render styled spans back to SGR escape sequences
fn render_spans(spans: &[StyledSpan]) -> String {
    let mut out = String::new();
    for span in spans {
        if span.style.is_plain() {
            out.push_str(&span.text);
        } else {
            out.push_str(&format!("\x1b[{}m{}\x1b[0m", sgr_codes(&span.style), span.text));
        }
    }
    out
}

fn sgr_codes(style: &SpanStyle) -> String {
    let mut codes = Vec::new();
    if style.bold {
        codes.push(1);
    }
    if style.dim {
        codes.push(2);
    }
    if let Some(color) = style.fg {
        codes.push(color.sgr_code());
    }
    codes.iter().map(|c| c.to_string()).collect::<Vec<_>>().join(";")
}

/// Prints each session's new log entries
#[derive(Default)]
struct Renderer {
    /// Next log sequence number to print, per session
    printed: HashMap<SessionId, u64>,
}

impl Renderer {
    fn on_notification(&mut self, hub: &TerminalHub, notification: Notification) {
        match notification {
            Notification::Redraw { sessions } => {
                if let Some(active) = hub.active_session_id().filter(|id| sessions.contains(id)) {
                    self.print_new(hub, active);
                }
            }
            Notification::ActiveSessionChanged { session_id: Some(id) } => {
                if let Some(snapshot) = hub.snapshot(id) {
                    println!(
                        "\x1b[2m-- {} ({}) --\x1b[0m",
                        snapshot.display_name,
                        display_dir(&snapshot.working_directory)
                    );
                }
                self.print_new(hub, id);
            }
            Notification::ActiveSessionChanged { session_id: None } => {
                println!("\x1b[2m-- no sessions (:new to open one) --\x1b[0m");
            }
            Notification::WorkingDirectoryChanged { session_id, path } => {
                info!("Session {} now in {:?}", session_id, path);
            }
            Notification::CommandCompleted { .. } => {}
        }
    }

    fn print_new(&mut self, hub: &TerminalHub, id: SessionId) {
        let Some(snapshot) = hub.snapshot(id) else {
            return;
        };
        let next = self.printed.entry(id).or_insert(0);
        let mut out = String::new();
        for entry in snapshot.output_log.iter() {
            if entry.seq >= *next {
                out.push_str(&render_spans(&entry.spans));
                *next = entry.seq + 1;
            }
        }
        if !out.is_empty() {
            print!("{}", out);
            let _ = std::io::stdout().flush();
        }
    }
}

/// Returns false when the user asked to quit
async fn handle_line(hub: &mut TerminalHub, line: &str) -> Result<bool> {
    let Some(meta) = parse_meta(line) else {
        let Some(active) = hub.active_session_id() else {
            println!("no active session (:new to open one)");
            return Ok(true);
        };
        match hub.send_key(active, line).await {
            Ok(KeyOutcome::ForwardFailed(e)) => warn!("Input not delivered: {}", e),
            Ok(_) => {}
            Err(e) => println!("{}", e),
        }
        return Ok(true);
    };

    let command = match meta {
        Ok(command) => command,
        Err(message) => {
            println!("{}", message);
            return Ok(true);
        }
    };

    match command {
        MetaCommand::New(dir) => {
            let dir = match dir {
                Some(dir) if dir.is_relative() => Some(std::env::current_dir()?.join(dir)),
                other => other,
            };
            hub.create_session(dir);
        }
        MetaCommand::Switch(id) => {
            if let Err(e) = hub.switch_active(id) {
                println!("{}", e);
            }
        }
        MetaCommand::Close(id) => match id.or_else(|| hub.active_session_id()) {
            Some(id) => {
                if let Err(e) = hub.close_session(id) {
                    println!("{}", e);
                }
            }
            None => println!("no session to close"),
        },
        MetaCommand::List => {
            for s in hub.sessions() {
                let marker = if s.is_active { "*" } else { " " };
                let busy = s.current_process.map(|p| format!(" [{}]", p)).unwrap_or_default();
                println!("{} {:>2} {} {}{}", marker, s.id, s.display_name, display_dir(&s.working_directory), busy);
            }
        }
        MetaCommand::HistoryPrevious | MetaCommand::HistoryNext => {
            let Some(active) = hub.active_session_id() else {
                return Ok(true);
            };
            let recalled = if command == MetaCommand::HistoryPrevious {
                hub.history_previous(active)?
            } else {
                hub.history_next(active)?
            };
            println!("{}", recalled.unwrap_or_default());
        }
        MetaCommand::Interrupt => {
            if let Some(active) = hub.active_session_id() {
                if !hub.interrupt(active)? {
                    println!("nothing to interrupt");
                }
            }
        }
        MetaCommand::Processes => {
            for p in hub.processes().await {
                println!(
                    "{} {:?} {:?} pid={} {}",
                    p.id,
                    p.kind,
                    p.status,
                    p.pid.map(|pid| pid.to_string()).unwrap_or_else(|| "-".to_string()),
                    p.command
                );
            }
        }
        MetaCommand::Help => println!("{}", HELP),
        MetaCommand::Quit => return Ok(false),
    }
    Ok(true)
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging (stderr, so it stays out of session output)
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    if std::env::args().any(|a| a == "--print-config-path") {
        println!("{}", Config::config_path()?.display());
        return Ok(());
    }

    info!("Starting TermDeck");

    let config = Config::load()?;
    info!("Configuration loaded");

    let (notifications, mut notification_rx) = NotificationSender::channel();
    let mut hub = TerminalHub::start(&config, notifications).await;
    let mut events = hub.take_events().context("Hub event feed already taken")?;

    hub.create_session(std::env::current_dir().ok());

    let mut renderer = Renderer::default();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut redraw_tick =
        tokio::time::interval(Duration::from_millis(config.display.redraw_interval_ms.max(1)));

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line.context("Failed to read stdin")? else {
                    break;
                };
                if !handle_line(&mut hub, &line).await? {
                    break;
                }
            }
            Some(event) = events.recv() => hub.handle_event(event),
            Some(notification) = notification_rx.recv() => renderer.on_notification(&hub, notification),
            _ = tokio::signal::ctrl_c() => {
                // Ctrl+C goes to the active session's process, not to us
                if let Some(active) = hub.active_session_id() {
                    hub.interrupt(active)?;
                }
            }
            _ = redraw_tick.tick() => {
                hub.flush_redraws();
            }
        }
    }

    hub.shutdown().await;
    info!("TermDeck exited");
    Ok(())
}
