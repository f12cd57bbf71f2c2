//! Output formatting: table, JSON, plain, plus colored status lines.
//!
//! Tables use `tabled`; structured formats use serde. Status lines go to
//! stderr so stdout carries only session data.

use std::io::{self, IsTerminal, Write};

use owo_colors::OwoColorize;
use tabled::{Table, Tabled, settings::Style};

use crate::cli::{ColorMode, OutputFormat};
use crate::error::CliError;

// ── Color helpers ────────────────────────────────────────────────────

/// Determine whether color output should be enabled.
pub fn should_color(mode: ColorMode) -> bool {
    match mode {
        ColorMode::Always => true,
        ColorMode::Never => false,
        ColorMode::Auto => io::stderr().is_terminal() && std::env::var_os("NO_COLOR").is_none(),
    }
}

/// Writes human-facing status lines to stderr.
#[derive(Debug, Clone, Copy)]
pub struct Painter {
    color: bool,
    quiet: bool,
}

impl Painter {
    pub fn new(mode: ColorMode, quiet: bool) -> Self {
        Self {
            color: should_color(mode),
            quiet,
        }
    }

    pub fn status(self, msg: &str) {
        if self.quiet {
            return;
        }
        if self.color {
            eprintln!("{} {}", "::".cyan().bold(), msg.dimmed());
        } else {
            eprintln!(":: {msg}");
        }
    }

    /// Warnings are shown even in quiet mode.
    pub fn warn(self, msg: &str) {
        if self.color {
            eprintln!("{} {}", "!!".yellow().bold(), msg.yellow());
        } else {
            eprintln!("!! {msg}");
        }
    }
}

// ── Render dispatchers ───────────────────────────────────────────────

/// Render a list of serde-serializable + tabled items in the chosen format.
pub fn render_list<T, R>(
    format: OutputFormat,
    data: &[T],
    to_row: impl Fn(&T) -> R,
    id_fn: impl Fn(&T) -> String,
) -> Result<String, CliError>
where
    T: serde::Serialize,
    R: Tabled,
{
    Ok(match format {
        OutputFormat::Table => {
            let rows: Vec<R> = data.iter().map(to_row).collect();
            Table::new(rows).with(Style::rounded()).to_string()
        }
        OutputFormat::Json => serde_json::to_string_pretty(data)?,
        OutputFormat::JsonCompact => serde_json::to_string(data)?,
        OutputFormat::Plain => data.iter().map(id_fn).collect::<Vec<_>>().join("\n"),
    })
}

/// Print rendered output to stdout, respecting quiet mode.
pub fn print_output(output: &str, quiet: bool) {
    if quiet || output.is_empty() {
        return;
    }
    let mut stdout = io::stdout().lock();
    let _ = writeln!(stdout, "{output}");
}
