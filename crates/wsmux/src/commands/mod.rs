//! Subcommand handlers.

pub mod attach;
pub mod config_cmd;
