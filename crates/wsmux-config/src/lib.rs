//! Configuration for wsmux.
//!
//! TOML file + `WSMUX_` environment overrides, named endpoints, and
//! translation to `wsmux_core::RegistryConfig` / `wsmux_api::WsConfig`.
//! The CLI layers its own flags on top.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::ProjectDirs;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

use wsmux_api::WsConfig;
use wsmux_core::RegistryConfig;

/// Environment variable prefix. Nested keys are separated by `__`.
pub const ENV_PREFIX: &str = "WSMUX_";

// ── Error ───────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid {field}: {reason}")]
    Validation { field: String, reason: String },

    #[error("unknown endpoint '{name}'")]
    UnknownEndpoint { name: String },

    #[error("failed to serialize config: {0}")]
    Serialization(#[from] toml::ser::Error),

    #[error("config loading failed: {0}")]
    Figment(Box<figment::Error>),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<figment::Error> for ConfigError {
    fn from(err: figment::Error) -> Self {
        Self::Figment(Box::new(err))
    }
}

// ── TOML config structs ─────────────────────────────────────────────

/// Top-level TOML configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct Config {
    /// Endpoint used when `attach` is given no target.
    pub default_endpoint: Option<String>,

    #[serde(default)]
    pub registry: RegistrySettings,

    /// Named endpoints.
    #[serde(default)]
    pub endpoints: BTreeMap<String, Endpoint>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct RegistrySettings {
    /// Seconds an unreferenced connection is kept alive.
    #[serde(default = "default_grace_period_secs")]
    pub grace_period_secs: u64,

    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,

    /// Outbound frames queued per connection before sends are dropped.
    #[serde(default = "default_outbound_buffer")]
    pub outbound_buffer: usize,
}

impl Default for RegistrySettings {
    fn default() -> Self {
        Self {
            grace_period_secs: default_grace_period_secs(),
            connect_timeout_secs: default_connect_timeout_secs(),
            outbound_buffer: default_outbound_buffer(),
        }
    }
}

fn default_grace_period_secs() -> u64 {
    wsmux_core::DEFAULT_GRACE_PERIOD.as_secs()
}
fn default_connect_timeout_secs() -> u64 {
    10
}
fn default_outbound_buffer() -> usize {
    256
}

/// A named WebSocket endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct Endpoint {
    /// `ws://` or `wss://` URL.
    pub url: String,

    /// Session key used when none is given on the command line.
    pub session: Option<String>,
}

/// An endpoint ready to connect to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedEndpoint {
    /// Endpoint name, if resolved from the config rather than a raw URL.
    pub name: Option<String>,
    pub url: Url,
    pub session: Option<String>,
}

impl ResolvedEndpoint {
    /// Explicit session key, else the endpoint's configured one, else the
    /// URL itself.
    pub fn session_key(&self, explicit: Option<&str>) -> String {
        explicit
            .map(str::to_owned)
            .or_else(|| self.session.clone())
            .unwrap_or_else(|| self.url.to_string())
    }
}

// ── Translation ─────────────────────────────────────────────────────

impl Config {
    pub fn registry_config(&self) -> RegistryConfig {
        RegistryConfig::default().with_grace_period(Duration::from_secs(self.registry.grace_period_secs))
    }

    pub fn ws_config(&self) -> WsConfig {
        WsConfig {
            connect_timeout: Duration::from_secs(self.registry.connect_timeout_secs),
            outbound_buffer: self.registry.outbound_buffer,
        }
    }

    /// Check every value that cannot be expressed in the type system.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.registry.outbound_buffer == 0 {
            return Err(ConfigError::Validation {
                field: "registry.outbound_buffer".into(),
                reason: "must be at least 1".into(),
            });
        }
        if self.registry.connect_timeout_secs == 0 {
            return Err(ConfigError::Validation {
                field: "registry.connect_timeout_secs".into(),
                reason: "must be at least 1".into(),
            });
        }
        for (name, endpoint) in &self.endpoints {
            parse_ws_url(&format!("endpoints.{name}.url"), &endpoint.url)?;
        }
        if let Some(ref name) = self.default_endpoint {
            if !self.endpoints.contains_key(name) {
                return Err(ConfigError::UnknownEndpoint { name: name.clone() });
            }
        }
        Ok(())
    }

    /// Add or replace a named endpoint.
    pub fn set_endpoint(
        &mut self,
        name: &str,
        url: &str,
        session: Option<String>,
    ) -> Result<(), ConfigError> {
        if name.is_empty() || name.contains('.') {
            return Err(ConfigError::Validation {
                field: "endpoint name".into(),
                reason: format!("'{name}' must be non-empty and contain no '.'"),
            });
        }
        let url = parse_ws_url("url", url)?;
        self.endpoints.insert(
            name.to_owned(),
            Endpoint {
                url: url.into(),
                session,
            },
        );
        Ok(())
    }

    /// Remove a named endpoint, clearing `default_endpoint` if it pointed
    /// there.
    pub fn remove_endpoint(&mut self, name: &str) -> Result<Endpoint, ConfigError> {
        let removed = self
            .endpoints
            .remove(name)
            .ok_or_else(|| ConfigError::UnknownEndpoint { name: name.into() })?;
        if self.default_endpoint.as_deref() == Some(name) {
            self.default_endpoint = None;
        }
        Ok(removed)
    }
}

fn parse_ws_url(field: &str, raw: &str) -> Result<Url, ConfigError> {
    let url = Url::parse(raw).map_err(|e| ConfigError::Validation {
        field: field.into(),
        reason: format!("invalid URL '{raw}': {e}"),
    })?;
    match url.scheme() {
        "ws" | "wss" => Ok(url),
        other => Err(ConfigError::Validation {
            field: field.into(),
            reason: format!("expected a ws:// or wss:// URL, got scheme '{other}'"),
        }),
    }
}

// ── Endpoint resolution ─────────────────────────────────────────────

/// Resolve a command-line target to a URL.
///
/// Anything containing `://` is taken as a raw URL; otherwise it names an
/// endpoint in `cfg`. `None` falls back to `default_endpoint`.
pub fn resolve_endpoint(cfg: &Config, name_or_url: Option<&str>) -> Result<ResolvedEndpoint, ConfigError> {
    let target = match name_or_url {
        Some(target) => target,
        None => cfg
            .default_endpoint
            .as_deref()
            .ok_or_else(|| ConfigError::Validation {
                field: "endpoint".into(),
                reason: "no endpoint given and no default_endpoint configured".into(),
            })?,
    };

    if target.contains("://") {
        return Ok(ResolvedEndpoint {
            name: None,
            url: parse_ws_url("url", target)?,
            session: None,
        });
    }

    let endpoint = cfg
        .endpoints
        .get(target)
        .ok_or_else(|| ConfigError::UnknownEndpoint {
            name: target.into(),
        })?;
    Ok(ResolvedEndpoint {
        name: Some(target.to_owned()),
        url: parse_ws_url(&format!("endpoints.{target}.url"), &endpoint.url)?,
        session: endpoint.session.clone(),
    })
}

// ── Config file path ────────────────────────────────────────────────

/// Resolve the config file path via XDG / platform conventions.
pub fn config_path() -> PathBuf {
    ProjectDirs::from("dev", "wsmux", "wsmux").map_or_else(
        || {
            let mut p = dirs_fallback();
            p.push("config.toml");
            p
        },
        |dirs| dirs.config_dir().join("config.toml"),
    )
}

fn dirs_fallback() -> PathBuf {
    let mut p = PathBuf::from(std::env::var("HOME").unwrap_or_else(|_| ".".into()));
    p.push(".config");
    p.push("wsmux");
    p
}

// ── Config loading ──────────────────────────────────────────────────

/// Load the full Config from the canonical file + environment.
pub fn load_config() -> Result<Config, ConfigError> {
    load_config_from(&config_path())
}

/// Load from `path` + environment. A missing file yields the defaults.
pub fn load_config_from(path: &Path) -> Result<Config, ConfigError> {
    let figment = Figment::new()
        .merge(Serialized::defaults(Config::default()))
        .merge(Toml::file(path))
        .merge(Env::prefixed(ENV_PREFIX).split("__"));

    let config: Config = figment.extract()?;
    config.validate()?;
    Ok(config)
}

/// Load config, returning a default if it is missing or invalid.
pub fn load_config_or_default() -> Config {
    load_config().unwrap_or_default()
}

// ── Config saving ───────────────────────────────────────────────────

/// Serialize config to TOML and write to the canonical config path.
pub fn save_config(cfg: &Config) -> Result<PathBuf, ConfigError> {
    let path = config_path();
    save_config_to(cfg, &path)?;
    Ok(path)
}

pub fn save_config_to(cfg: &Config, path: &Path) -> Result<(), ConfigError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let toml_str = toml::to_string_pretty(cfg)?;
    std::fs::write(path, toml_str)?;
    Ok(())
}
