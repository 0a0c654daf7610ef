//! Integration tests

mod ansi_tests;
#[cfg(unix)]
mod host_tests;
#[cfg(unix)]
mod session_tests;
