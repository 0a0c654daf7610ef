//! Core module - sessions, history, classification, configuration and events

pub mod classifier;
pub mod config;
pub mod events;
pub mod history;
pub mod sessions;
