//! Clap derive structures for the `wsmux` CLI.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

// ── Top-Level CLI ────────────────────────────────────────────────────

/// wsmux -- share one WebSocket session between many consumers
#[derive(Debug, Parser)]
#[command(
    name = "wsmux",
    version,
    about = "Attach to shared WebSocket sessions from the command line",
    long_about = "Attach to a WebSocket endpoint through a connection registry.\n\n\
        Every session key maps to one live connection. Detaching keeps the\n\
        connection alive for a grace period so a quick re-attach reuses it.",
    propagate_version = true,
    subcommand_required = true,
    arg_required_else_help = true
)]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalOpts,

    #[command(subcommand)]
    pub command: Command,
}

// ── Global Options ───────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct GlobalOpts {
    /// Config file to use instead of the platform default
    #[arg(long, env = "WSMUX_CONFIG", global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Output format for tables (`config endpoints`, `:stats`)
    #[arg(long, short = 'o', env = "WSMUX_OUTPUT", default_value = "table", global = true)]
    pub output: OutputFormat,

    /// When to use color output
    #[arg(long, default_value = "auto", global = true)]
    pub color: ColorMode,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(long, short = 'v', action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress status messages
    #[arg(long, short = 'q', global = true)]
    pub quiet: bool,
}

// ── Output & Color Enums ─────────────────────────────────────────────

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum OutputFormat {
    /// Pretty table (default, interactive)
    Table,
    /// Pretty-printed JSON
    Json,
    /// Compact single-line JSON
    JsonCompact,
    /// Plain text, one value per line (scripting)
    Plain,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum ColorMode {
    /// Auto-detect (color if terminal is interactive)
    Auto,
    /// Always emit color codes
    Always,
    /// Never emit color codes
    Never,
}

// ── Top-Level Command Enum ───────────────────────────────────────────

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Attach to a session and relay stdin/stdout
    #[command(alias = "a")]
    Attach(AttachArgs),

    /// Inspect and edit the configuration file
    Config(ConfigArgs),

    /// Generate shell completions
    Completions(CompletionsArgs),
}

// ── Attach ───────────────────────────────────────────────────────────

#[derive(Debug, Args)]
#[command(after_help = "Control lines typed on stdin:\n  \
    :detach   release this consumer (the connection survives the grace period)\n  \
    :attach   attach again (reuses the connection if it is still alive)\n  \
    :stats    show registry sessions\n  \
    :quit     exit")]
pub struct AttachArgs {
    /// Endpoint name from the config, or a ws:// / wss:// URL
    /// (defaults to `default_endpoint`)
    #[arg(value_name = "ENDPOINT|URL")]
    pub target: Option<String>,

    /// Session key (defaults to the endpoint's `session`, then the URL)
    #[arg(long, short = 's')]
    pub session: Option<String>,

    /// Grace period after detaching, e.g. `30s`, `10m`
    #[arg(long, short = 'g')]
    pub grace: Option<humantime::Duration>,
}

// ── Config ───────────────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub command: ConfigCommand,
}

#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Print the config file path
    Path,

    /// Display the resolved configuration (file + environment)
    Show,

    /// List named endpoints
    #[command(alias = "ls")]
    Endpoints,

    /// Add or replace a named endpoint
    SetEndpoint {
        /// Endpoint name
        name: String,

        /// ws:// or wss:// URL
        url: String,

        /// Default session key for this endpoint
        #[arg(long, short = 's')]
        session: Option<String>,

        /// Also make this the default endpoint
        #[arg(long)]
        default: bool,
    },

    /// Remove a named endpoint
    #[command(alias = "rm")]
    RemoveEndpoint {
        /// Endpoint name
        name: String,
    },
}

// ── Completions ──────────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct CompletionsArgs {
    /// Shell to generate completions for
    pub shell: clap_complete::Shell,
}
