//! CLI configuration: thin wrapper around `wsmux_config` that honors the
//! `--config` flag.

use std::path::PathBuf;

use crate::cli::GlobalOpts;
use crate::error::CliError;

pub use wsmux_config::{Config, ResolvedEndpoint, resolve_endpoint, save_config_to};

/// Config file in effect: `--config` / `WSMUX_CONFIG`, else the platform path.
pub fn config_path(global: &GlobalOpts) -> PathBuf {
    global.config.clone().unwrap_or_else(wsmux_config::config_path)
}

/// Load file + environment. A missing file yields the defaults.
pub fn load(global: &GlobalOpts) -> Result<Config, CliError> {
    let path = config_path(global);
    wsmux_config::load_config_from(&path).map_err(|e| CliError::from_config(e, &path))
}

pub fn save(global: &GlobalOpts, cfg: &Config) -> Result<PathBuf, CliError> {
    let path = config_path(global);
    save_config_to(cfg, &path).map_err(|e| CliError::from_config(e, &path))?;
    Ok(path)
}
