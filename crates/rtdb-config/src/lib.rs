//! Configuration for rtdb drivers.
//!
//! TOML profiles layered with `RTDB_` environment variables, API key
//! resolution (env var, then plaintext), and translation into
//! `rtdb_core::ConnectionConfig` / `DriverOptions`.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use directories::ProjectDirs;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;
use url::Url;

use rtdb_core::{ConnectionConfig, DriverOptions, ListenerErrorPolicy};

// ── Error ───────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid {field}: {reason}")]
    Validation { field: String, reason: String },

    #[error("no API key configured for profile '{profile}'")]
    NoCredentials { profile: String },

    #[error("unknown profile '{profile}'")]
    UnknownProfile { profile: String },

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
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct Config {
    /// Profile used when none is named.
    pub default_profile: Option<String>,

    #[serde(default)]
    pub defaults: Defaults,

    /// Named backend projects.
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

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct Defaults {
    /// What data streams do when the backend cancels their listener.
    #[serde(default)]
    pub listener_errors: ListenerErrorPolicy,
}

/// Credentials and endpoints of one backend project.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct Profile {
    /// API key (plaintext; prefer `api_key_env`).
    pub api_key: Option<String>,

    /// Environment variable name containing the API key.
    pub api_key_env: Option<String>,

    pub auth_domain: String,

    /// Root URL of the live database (e.g. "https://demo.example.com").
    pub database_url: String,

    #[serde(default)]
    pub messaging_sender_id: String,

    pub project_id: String,

    #[serde(default)]
    pub storage_bucket: String,

    /// Session id to register the app under. Defaults to the profile name.
    pub session: Option<String>,

    /// Override of `defaults.listener_errors`.
    pub listener_errors: Option<ListenerErrorPolicy>,
}

impl Profile {
    /// The session id this profile initializes.
    pub fn session_name<'a>(&'a self, profile_name: &'a str) -> &'a str {
        self.session.as_deref().unwrap_or(profile_name)
    }

    /// Validate the profile and resolve its API key.
    pub fn to_connection_config(
        &self,
        profile_name: &str,
    ) -> Result<ConnectionConfig, ConfigError> {
        let database_url: Url = self
            .database_url
            .parse()
            .map_err(|_| ConfigError::Validation {
                field: "database_url".into(),
                reason: format!("invalid URL: {}", self.database_url),
            })?;

        if self.project_id.trim().is_empty() {
            return Err(ConfigError::Validation {
                field: "project_id".into(),
                reason: "must not be empty".into(),
            });
        }

        Ok(ConnectionConfig {
            api_key: resolve_api_key(self, profile_name)?,
            auth_domain: self.auth_domain.clone(),
            database_url,
            messaging_sender_id: self.messaging_sender_id.clone(),
            project_id: self.project_id.clone(),
            storage_bucket: self.storage_bucket.clone(),
        })
    }
}

impl Config {
    /// Look up `name`, or the default profile when `name` is `None`.
    pub fn profile<'a>(
        &'a self,
        name: Option<&'a str>,
    ) -> Result<(&'a str, &'a Profile), ConfigError> {
        let name = name
            .or(self.default_profile.as_deref())
            .unwrap_or("default");
        self.profiles
            .get(name)
            .map(|profile| (name, profile))
            .ok_or_else(|| ConfigError::UnknownProfile {
                profile: name.into(),
            })
    }

    /// Driver switches for `profile_name`: the profile's overrides on top
    /// of `defaults`.
    pub fn driver_options(&self, profile_name: &str) -> DriverOptions {
        let listener_errors = self
            .profiles
            .get(profile_name)
            .and_then(|p| p.listener_errors)
            .unwrap_or(self.defaults.listener_errors);
        DriverOptions { listener_errors }
    }
}

// ── Config file path ────────────────────────────────────────────────

/// Resolve the config file path via XDG / platform conventions.
pub fn config_path() -> PathBuf {
    ProjectDirs::from("com", "rtdb", "rtdb").map_or_else(
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
    p.push("rtdb");
    p
}

// ── Config loading ──────────────────────────────────────────────────

/// Load the full Config from the canonical file + environment.
pub fn load_config() -> Result<Config, ConfigError> {
    load_config_from(&config_path())
}

/// Load from `path` + environment. A missing file yields the defaults.
///
/// Environment variables use `__` for nesting, e.g.
/// `RTDB_DEFAULTS__LISTENER_ERRORS=propagate` or
/// `RTDB_PROFILES__PROD__PROJECT_ID=demo-prod`.
pub fn load_config_from(path: &Path) -> Result<Config, ConfigError> {
    debug!(path = %path.display(), "loading config");
    let figment = Figment::new()
        .merge(Serialized::defaults(Config::default()))
        .merge(Toml::file(path))
        .merge(Env::prefixed("RTDB_").split("__"));

    let config: Config = figment.extract()?;
    Ok(config)
}

/// Load config, returning a default if loading fails.
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
    debug!(path = %path.display(), "config saved");
    Ok(())
}

// ── Credential resolution ───────────────────────────────────────────

/// Resolve the API key: the profile's `api_key_env` variable first, then
/// the plaintext `api_key`.
pub fn resolve_api_key(profile: &Profile, profile_name: &str) -> Result<SecretString, ConfigError> {
    if let Some(ref env_name) = profile.api_key_env {
        if let Ok(val) = std::env::var(env_name) {
            return Ok(SecretString::from(val));
        }
    }

    if let Some(ref key) = profile.api_key {
        return Ok(SecretString::from(key.clone()));
    }

    Err(ConfigError::NoCredentials {
        profile: profile_name.into(),
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use secrecy::ExposeSecret;

    const SAMPLE: &str = r#"
default_profile = "prod"

[defaults]
listener_errors = "swallow"

[profiles.prod]
api_key = "plain-key"
auth_domain = "demo.example.com"
database_url = "https://demo.example.com"
messaging_sender_id = "1234"
project_id = "demo"
storage_bucket = "demo.appspot.com"
listener_errors = "propagate"

[profiles.staging]
api_key_env = "RTDB_TEST_SURELY_UNSET_KEY"
auth_domain = "staging.example.com"
database_url = "https://staging.example.com"
project_id = "demo-staging"
session = "staging-session"
"#;

    fn write_sample(dir: &tempfile::TempDir) -> PathBuf {
        let path = dir.path().join("config.toml");
        std::fs::write(&path, SAMPLE).unwrap();
        path
    }

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = load_config_from(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(cfg.default_profile.as_deref(), Some("default"));
        assert!(cfg.profiles.is_empty());
        assert_eq!(cfg.defaults.listener_errors, ListenerErrorPolicy::Swallow);
    }

    #[test]
    fn profiles_load_and_resolve() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = load_config_from(&write_sample(&dir)).unwrap();

        let (name, profile) = cfg.profile(None).unwrap();
        assert_eq!(name, "prod");
        assert_eq!(profile.session_name(name), "prod");

        let conn = profile.to_connection_config(name).unwrap();
        assert_eq!(conn.api_key.expose_secret(), "plain-key");
        assert_eq!(conn.database_url.as_str(), "https://demo.example.com/");
        assert_eq!(conn.storage_bucket, "demo.appspot.com");
    }

    #[test]
    fn profile_overrides_default_listener_policy() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = load_config_from(&write_sample(&dir)).unwrap();
        assert_eq!(
            cfg.driver_options("prod").listener_errors,
            ListenerErrorPolicy::Propagate
        );
        assert_eq!(
            cfg.driver_options("staging").listener_errors,
            ListenerErrorPolicy::Swallow
        );
    }

    #[test]
    fn missing_api_key_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = load_config_from(&write_sample(&dir)).unwrap();
        let (name, profile) = cfg.profile(Some("staging")).unwrap();
        assert_eq!(profile.session_name(name), "staging-session");

        let err = profile.to_connection_config(name).unwrap_err();
        assert!(matches!(err, ConfigError::NoCredentials { ref profile } if profile == "staging"));
    }

    #[test]
    fn api_key_env_takes_precedence() {
        let profile = Profile {
            api_key: Some("plain".into()),
            api_key_env: Some("PATH".into()),
            auth_domain: String::new(),
            database_url: "https://demo.example.com".into(),
            messaging_sender_id: String::new(),
            project_id: "demo".into(),
            storage_bucket: String::new(),
            session: None,
            listener_errors: None,
        };
        let key = resolve_api_key(&profile, "p").unwrap();
        assert_eq!(key.expose_secret(), std::env::var("PATH").unwrap());
    }

    #[test]
    fn invalid_url_and_unknown_profile() {
        let dir = tempfile::tempdir().unwrap();
        let mut cfg = load_config_from(&write_sample(&dir)).unwrap();
        assert!(matches!(
            cfg.profile(Some("nope")),
            Err(ConfigError::UnknownProfile { .. })
        ));

        let prod = cfg.profiles.get_mut("prod").unwrap();
        prod.database_url = "not a url".into();
        let err = prod.to_connection_config("prod").unwrap_err();
        let ConfigError::Validation { field, .. } = err else {
            panic!("expected Validation error");
        };
        assert_eq!(field, "database_url");
    }

    #[test]
    fn save_then_load_keeps_profiles() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = load_config_from(&write_sample(&dir)).unwrap();

        let out = dir.path().join("nested").join("saved.toml");
        save_config_to(&cfg, &out).unwrap();
        let reloaded = load_config_from(&out).unwrap();
        assert_eq!(reloaded, cfg);
    }
}
