//! Config subcommand handlers.

use serde::Serialize;
use tabled::Tabled;

use crate::cli::{ConfigArgs, ConfigCommand, GlobalOpts};
use crate::config;
use crate::error::CliError;
use crate::output;

// ── Table row ───────────────────────────────────────────────────────

#[derive(Serialize)]
struct EndpointView {
    name: String,
    url: String,
    session: Option<String>,
    default: bool,
}

#[derive(Tabled)]
struct EndpointRow {
    #[tabled(rename = "Name")]
    name: String,
    #[tabled(rename = "URL")]
    url: String,
    #[tabled(rename = "Session")]
    session: String,
    #[tabled(rename = "Default")]
    default: String,
}

impl From<&EndpointView> for EndpointRow {
    fn from(e: &EndpointView) -> Self {
        Self {
            name: e.name.clone(),
            url: e.url.clone(),
            session: e.session.clone().unwrap_or_default(),
            default: if e.default { "*".into() } else { String::new() },
        }
    }
}

// ── Handler ─────────────────────────────────────────────────────────

pub fn handle(args: ConfigArgs, global: &GlobalOpts) -> Result<(), CliError> {
    match args.command {
        ConfigCommand::Path => {
            println!("{}", config::config_path(global).display());
            Ok(())
        }

        ConfigCommand::Show => {
            let cfg = config::load(global)?;
            let rendered = toml::to_string_pretty(&cfg).map_err(|e| CliError::Validation {
                field: "config".into(),
                reason: format!("failed to serialize config: {e}"),
            })?;
            print!("{rendered}");
            Ok(())
        }

        ConfigCommand::Endpoints => {
            let cfg = config::load(global)?;
            let views: Vec<EndpointView> = cfg
                .endpoints
                .iter()
                .map(|(name, ep)| EndpointView {
                    name: name.clone(),
                    url: ep.url.clone(),
                    session: ep.session.clone(),
                    default: cfg.default_endpoint.as_deref() == Some(name.as_str()),
                })
                .collect();
            let out = output::render_list(global.output, &views, |e| EndpointRow::from(e), |e| e.name.clone())?;
            output::print_output(&out, false);
            Ok(())
        }

        ConfigCommand::SetEndpoint {
            name,
            url,
            session,
            default,
        } => {
            let mut cfg = config::load(global)?;
            let path = config::config_path(global);
            cfg.set_endpoint(&name, &url, session)
                .map_err(|e| CliError::from_config(e, &path))?;
            if default {
                cfg.default_endpoint = Some(name.clone());
            }
            let path = config::save(global, &cfg)?;
            if !global.quiet {
                eprintln!("Saved endpoint '{name}' to {}", path.display());
            }
            Ok(())
        }

        ConfigCommand::RemoveEndpoint { name } => {
            let mut cfg = config::load(global)?;
            let path = config::config_path(global);
            cfg.remove_endpoint(&name)
                .map_err(|e| CliError::from_config(e, &path))?;
            config::save(global, &cfg)?;
            if !global.quiet {
                eprintln!("Removed endpoint '{name}'");
            }
            Ok(())
        }
    }
}
