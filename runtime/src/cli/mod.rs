//! CLI subcommand implementations for the `webfetch` binary.

pub mod doctor;
pub mod fetch_cmd;
pub mod output;
pub mod resolve_cmd;
pub mod session_cmd;
