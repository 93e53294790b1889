//! Shared configuration for Supernet client applications.
//!
//! TOML profiles, refresh-token resolution (env + keyring + plaintext),
//! translation to `supernet_core::ClientConfig`, and an opt-in tracing
//! subscriber. The engine crates never read disk; this crate is where
//! files and environment come in.

mod logging;

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::ProjectDirs;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;
use url::Url;

use supernet_core::{ClientConfig, Network, TlsMode, Tokens};

pub use logging::{LogFormat, LogSettings, init_tracing};

const KEYRING_SERVICE: &str = "supernet";

// ── Error ───────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid {field}: {reason}")]
    Validation { field: String, reason: String },

    #[error("no refresh token configured for profile '{profile}'")]
    NoCredentials { profile: String },

    #[error("profile '{profile}' not found")]
    UnknownProfile { profile: String },

    #[error("failed to serialize config: {0}")]
    Serialization(#[from] toml::ser::Error),

    #[error("config loading failed: {0}")]
    Figment(Box<figment::Error>),

    #[error("failed to install tracing subscriber: {0}")]
    Tracing(#[from] tracing_subscriber::util::TryInitError),

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
#[derive(Debug, Deserialize, Serialize)]
pub struct Config {
    /// Profile used when none is named explicitly.
    pub default_profile: Option<String>,

    #[serde(default)]
    pub defaults: Defaults,

    /// Named account profiles.
    #[serde(default)]
    pub profiles: HashMap<String, Profile>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            default_profile: Some("default".into()),
            defaults: Defaults::default(),
            profiles: HashMap::new(),
        }
    }
}

impl Config {
    /// Look up a profile by name, falling back to `default_profile`.
    pub fn profile<'a>(&'a self, name: Option<&'a str>) -> Result<(&'a str, &'a Profile), ConfigError> {
        let name = name
            .or(self.default_profile.as_deref())
            .unwrap_or("default");
        self.profiles
            .get(name)
            .map(|p| (name, p))
            .ok_or_else(|| ConfigError::UnknownProfile {
                profile: name.into(),
            })
    }
}

#[derive(Debug, Deserialize, Serialize)]
pub struct Defaults {
    #[serde(default)]
    pub network: Network,

    #[serde(default = "default_timeout")]
    pub timeout: u64,

    #[serde(default)]
    pub insecure: bool,

    #[serde(default)]
    pub log: LogSettings,
}

impl Default for Defaults {
    fn default() -> Self {
        Self {
            network: Network::default(),
            timeout: default_timeout(),
            insecure: false,
            log: LogSettings::default(),
        }
    }
}

fn default_timeout() -> u64 {
    30
}

/// A named account profile. Unset fields inherit `[defaults]` or the
/// production endpoints.
#[derive(Debug, Default, Deserialize, Serialize)]
pub struct Profile {
    pub rest_url: Option<String>,

    pub socket_url: Option<String>,

    /// Client instance id. A fresh one is generated per run when unset.
    pub app_id: Option<String>,

    pub network: Option<Network>,

    /// REST-only mode.
    #[serde(default)]
    pub disable_socket: bool,

    /// Refresh token (plaintext: prefer keyring or env var).
    pub refresh_token: Option<String>,

    /// Environment variable name holding the refresh token.
    pub refresh_token_env: Option<String>,

    /// Path to a custom CA certificate.
    pub ca_cert: Option<PathBuf>,

    pub insecure: Option<bool>,

    pub timeout: Option<u64>,
}

// ── Config file path ────────────────────────────────────────────────

/// Resolve the config file path via XDG / platform conventions.
pub fn config_path() -> PathBuf {
    ProjectDirs::from("ai", "supernet", "supernet").map_or_else(
        || dirs_fallback().join("config.toml"),
        |dirs| dirs.config_dir().join("config.toml"),
    )
}

fn dirs_fallback() -> PathBuf {
    let mut p = PathBuf::from(std::env::var("HOME").unwrap_or_else(|_| ".".into()));
    p.push(".config");
    p.push("supernet");
    p
}

// ── Config loading ──────────────────────────────────────────────────

/// Load the full Config from the canonical file + environment.
pub fn load_config() -> Result<Config, ConfigError> {
    load_config_from(&config_path())
}

/// Layer defaults, then `path` (if present), then `SUPERNET_*` variables.
pub fn load_config_from(path: &Path) -> Result<Config, ConfigError> {
    debug!(path = %path.display(), "loading config");
    let figment = Figment::new()
        .merge(Serialized::defaults(Config::default()))
        .merge(Toml::file(path))
        .merge(Env::prefixed("SUPERNET_").split("__"));

    let config: Config = figment.extract()?;
    Ok(config)
}

/// Load config, returning a default if it can't be read.
pub fn load_config_or_default() -> Config {
    load_config().unwrap_or_default()
}

// ── Config saving ───────────────────────────────────────────────────

/// Serialize config to TOML and write to the canonical config path.
pub fn save_config(cfg: &Config) -> Result<(), ConfigError> {
    save_config_to(cfg, &config_path())
}

pub fn save_config_to(cfg: &Config, path: &Path) -> Result<(), ConfigError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let toml_str = toml::to_string_pretty(cfg)?;
    std::fs::write(path, toml_str)?;
    Ok(())
}

// ── Credential resolution ───────────────────────────────────────────

fn keyring_entry(profile_name: &str) -> Result<keyring::Entry, keyring::Error> {
    keyring::Entry::new(KEYRING_SERVICE, &format!("{profile_name}/refresh-token"))
}

/// Resolve a refresh token from the credential chain.
pub fn resolve_refresh_token(
    profile: &Profile,
    profile_name: &str,
) -> Result<SecretString, ConfigError> {
    // 1. Profile's refresh_token_env → env var lookup
    if let Some(ref env_name) = profile.refresh_token_env {
        if let Ok(val) = std::env::var(env_name) {
            return Ok(SecretString::from(val));
        }
    }

    // 2. System keyring
    if let Ok(entry) = keyring_entry(profile_name) {
        if let Ok(secret) = entry.get_password() {
            return Ok(SecretString::from(secret));
        }
    }

    // 3. Plaintext in config
    if let Some(ref token) = profile.refresh_token {
        return Ok(SecretString::from(token.clone()));
    }

    Err(ConfigError::NoCredentials {
        profile: profile_name.into(),
    })
}

/// Refresh-only `Tokens` for `SupernetClient::authenticate`.
pub fn resolve_tokens(profile: &Profile, profile_name: &str) -> Result<Tokens, ConfigError> {
    let secret = resolve_refresh_token(profile, profile_name)?;
    Ok(Tokens::refresh_only(secret.expose_secret()))
}

/// Persist a (rotated) refresh token to the system keyring.
pub fn store_refresh_token(profile_name: &str, token: &SecretString) -> Result<(), ConfigError> {
    keyring_entry(profile_name)
        .and_then(|entry| entry.set_password(token.expose_secret()))
        .map_err(|e| ConfigError::Validation {
            field: "keyring".into(),
            reason: e.to_string(),
        })
}

// ── ClientConfig translation ────────────────────────────────────────

fn parse_url(field: &str, raw: &str) -> Result<Url, ConfigError> {
    raw.parse().map_err(|_| ConfigError::Validation {
        field: field.into(),
        reason: format!("invalid URL: {raw}"),
    })
}

/// Build a `ClientConfig` from a profile layered over `[defaults]`.
pub fn profile_to_client_config(
    profile: &Profile,
    defaults: &Defaults,
) -> Result<ClientConfig, ConfigError> {
    let app_id = profile
        .app_id
        .clone()
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
    if app_id.trim().is_empty() {
        return Err(ConfigError::Validation {
            field: "app_id".into(),
            reason: "must not be empty".into(),
        });
    }

    let mut config = ClientConfig::new(app_id).map_err(|e| ConfigError::Validation {
        field: "endpoint".into(),
        reason: e.to_string(),
    })?;

    if let Some(ref raw) = profile.rest_url {
        config.rest_url = parse_url("rest_url", raw)?;
    }
    if let Some(ref raw) = profile.socket_url {
        config.socket_url = parse_url("socket_url", raw)?;
    }

    config.network = profile.network.unwrap_or(defaults.network);
    config.disable_socket = profile.disable_socket;
    config.tls = if profile.insecure.unwrap_or(defaults.insecure) {
        TlsMode::DangerAcceptInvalid
    } else if let Some(ref ca_path) = profile.ca_cert {
        TlsMode::CustomCa(ca_path.clone())
    } else {
        TlsMode::System
    };
    config.timeout = Duration::from_secs(profile.timeout.unwrap_or(defaults.timeout));

    Ok(config)
}
