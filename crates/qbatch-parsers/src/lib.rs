//! Shared parsing utilities for batch scheduler command output.
//!
//! This crate provides the process invoker used for every scheduler CLI
//! call, plus the small value grammars (walltimes, memory amounts, shell
//! quoting) shared by the scheduler adapters.

pub mod command;
pub mod memory;
pub mod quote;
pub mod time;

pub use command::{run_command, run_command_allow_failure, run_command_merged, CommandError};
pub use memory::{format_memory_kb, kilobytes, parse_memory_bytes};
pub use quote::shell_quote;
pub use time::{format_duration, parse_walltime, ParseError};

/// Strip a `.server` style suffix from a scheduler job identifier.
///
/// `"12345.torque-server.example.org"` becomes `"12345"`. Identifiers
/// without a dot are returned unchanged.
pub fn base_job_id(id: &str) -> &str {
    let id = id.trim();
    id.split('.').next().unwrap_or(id)
}

/// Filter helper for optional string fields.
/// Returns None if the string is empty or a placeholder value.
pub fn non_empty_string(s: &str) -> Option<String> {
    let trimmed = s.trim();
    if trimmed.is_empty() || trimmed == "-" || trimmed == "--" {
        None
    } else {
        Some(trimmed.to_string())
    }
}
