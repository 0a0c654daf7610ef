//! Terminal module - session layer on top of the process host
//!
//! This module provides:
//! - `TerminalHub`: the upward API (sessions, input, snapshots)
//! - `OutputDemux`: host event feed to session logs
//! - `InteractiveRouter`: REPL input forwarding
//! - `CommandExecutor`: one submitted line to one result

pub mod demux;
pub mod executor;
pub mod hub;
pub mod router;

pub use demux::{OutputDemux, RedrawBatcher, Routed};
pub use executor::{CommandExecutor, ExecOutcome, PendingCommand};
pub use hub::{HubError, HubEvent, KeyOutcome, SessionSummary, TerminalHub};
pub use router::{InteractiveRouter, Route, RouterState};
