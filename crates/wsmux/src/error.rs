//! CLI error types with miette diagnostics.
//!
//! Maps `ConfigError` variants into user-facing errors with actionable help
//! text and a process exit code.

use miette::Diagnostic;
use thiserror::Error;

use wsmux_config::ConfigError;

/// Process exit codes.
pub mod exit_code {
    pub const GENERAL: i32 = 1;
    pub const USAGE: i32 = 2;
    pub const CONFIG: i32 = 3;
    pub const CONNECTION: i32 = 7;
}

#[derive(Debug, Error, Diagnostic)]
pub enum CliError {
    // ── Connection ───────────────────────────────────────────────────
    #[error("Could not connect to {url}")]
    #[diagnostic(
        code(wsmux::connection_failed),
        help(
            "Check that the endpoint is running and accepts WebSocket upgrades.\n\
             Reason: {reason}"
        )
    )]
    ConnectionFailed { url: String, reason: String },

    // ── Configuration ────────────────────────────────────────────────
    #[error("Endpoint '{name}' not found in configuration")]
    #[diagnostic(
        code(wsmux::unknown_endpoint),
        help(
            "Run: wsmux config endpoints\n\
             Add one with: wsmux config set-endpoint {name} wss://host/path"
        )
    )]
    UnknownEndpoint { name: String },

    #[error("Invalid configuration: {field}: {reason}")]
    #[diagnostic(code(wsmux::invalid_config), help("Config file: {path}"))]
    InvalidConfig {
        field: String,
        reason: String,
        path: String,
    },

    #[error("No endpoint given")]
    #[diagnostic(
        code(wsmux::no_endpoint),
        help(
            "Pass an endpoint name or URL, or set default_endpoint in {path}\n\
             Example: wsmux config set-endpoint lab wss://lab.example.com/terminal --default"
        )
    )]
    NoEndpoint { path: String },

    #[error(transparent)]
    #[diagnostic(code(wsmux::config))]
    Config(Box<ConfigError>),

    // ── Validation ───────────────────────────────────────────────────
    #[error("Invalid value for {field}: {reason}")]
    #[diagnostic(code(wsmux::validation))]
    Validation { field: String, reason: String },

    // ── IO / Serialization ────────────────────────────────────────────
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("Failed to render output: {0}")]
    #[diagnostic(code(wsmux::json))]
    Json(#[from] serde_json::Error),
}

impl CliError {
    /// Map this error to an exit code for process termination.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::ConnectionFailed { .. } => exit_code::CONNECTION,
            Self::UnknownEndpoint { .. }
            | Self::InvalidConfig { .. }
            | Self::NoEndpoint { .. }
            | Self::Config(_) => exit_code::CONFIG,
            Self::Validation { .. } => exit_code::USAGE,
            Self::Io(_) | Self::Json(_) => exit_code::GENERAL,
        }
    }

    /// Attach the config file path to errors that benefit from it.
    pub fn from_config(err: ConfigError, path: &std::path::Path) -> Self {
        let path = path.display().to_string();
        match err {
            ConfigError::UnknownEndpoint { name } => Self::UnknownEndpoint { name },
            ConfigError::Validation { ref field, .. } if field == "endpoint" => {
                Self::NoEndpoint { path }
            }
            ConfigError::Validation { field, reason } => Self::InvalidConfig {
                field,
                reason,
                path,
            },
            ConfigError::Io(e) => Self::Io(e),
            other => Self::Config(Box::new(other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use super::*;

    #[test]
    fn config_errors_map_to_config_exit_code() {
        let path = Path::new("/tmp/wsmux.toml");
        let unknown = CliError::from_config(ConfigError::UnknownEndpoint { name: "x".into() }, path);
        assert_eq!(unknown.exit_code(), exit_code::CONFIG);

        let missing = CliError::from_config(
            ConfigError::Validation {
                field: "endpoint".into(),
                reason: "none".into(),
            },
            path,
        );
        assert!(matches!(missing, CliError::NoEndpoint { .. }));

        let invalid = CliError::from_config(
            ConfigError::Validation {
                field: "registry.outbound_buffer".into(),
                reason: "must be at least 1".into(),
            },
            path,
        );
        assert!(matches!(invalid, CliError::InvalidConfig { ref path, .. } if path == "/tmp/wsmux.toml"));
    }

    #[test]
    fn connection_and_usage_codes() {
        let conn = CliError::ConnectionFailed {
            url: "ws://127.0.0.1:1/".into(),
            reason: "refused".into(),
        };
        assert_eq!(conn.exit_code(), exit_code::CONNECTION);

        let usage = CliError::Validation {
            field: "grace".into(),
            reason: "too long".into(),
        };
        assert_eq!(usage.exit_code(), exit_code::USAGE);
    }
}
