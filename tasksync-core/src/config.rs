//! YAML configuration with environment overrides.
//!
//! # Storage layout
//!
//! ```text
//! ~/.tasksync/
//!   config.yaml   (mode 0600, written atomically)
//! ```
//!
//! # API pattern
//!
//! Every filesystem function has two forms:
//! - `fn_at(home: &Path, …)`: explicit home; used in tests with `TempDir`
//! - `fn(…)`: derives home from `dirs::home_dir()`, delegates to `_at`
//!
//! The integration token is never written to disk; it is read from
//! `NOTION_API_KEY` by [`Settings::resolve`].

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::types::{AssigneeFilter, DatabaseId};

pub const DEFAULT_POLL_INTERVAL_SECS: u64 = 30;
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_LIVENESS_PORT: u16 = 8080;
pub const DEFAULT_NOTION_API_BASE: &str = "https://api.notion.com/v1";

pub const ENV_API_KEY: &str = "NOTION_API_KEY";
pub const ENV_SOURCE_DB: &str = "NOTION_SOURCE_DB";
pub const ENV_TARGET_DB: &str = "NOTION_TARGET_DB";
pub const ENV_ASSIGNEE: &str = "TASKSYNC_ASSIGNEE";
pub const ENV_POLL_INTERVAL: &str = "TASKSYNC_POLL_INTERVAL_SECS";
pub const ENV_PORT: &str = "PORT";

// ---------------------------------------------------------------------------
// 1. File model
// ---------------------------------------------------------------------------

/// On-disk configuration document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    pub source_database: DatabaseId,
    pub target_database: DatabaseId,
    #[serde(default)]
    pub assignee: String,
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
    #[serde(default = "default_liveness_port")]
    pub liveness_port: u16,
    #[serde(default = "default_api_base")]
    pub notion_api_base: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            source_database: DatabaseId::default(),
            target_database: DatabaseId::default(),
            assignee: String::new(),
            poll_interval_secs: DEFAULT_POLL_INTERVAL_SECS,
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
            liveness_port: DEFAULT_LIVENESS_PORT,
            notion_api_base: DEFAULT_NOTION_API_BASE.to_string(),
        }
    }
}

fn default_poll_interval() -> u64 {
    DEFAULT_POLL_INTERVAL_SECS
}

fn default_request_timeout() -> u64 {
    DEFAULT_REQUEST_TIMEOUT_SECS
}

fn default_liveness_port() -> u16 {
    DEFAULT_LIVENESS_PORT
}

fn default_api_base() -> String {
    DEFAULT_NOTION_API_BASE.to_string()
}

// ---------------------------------------------------------------------------
// 2. Resolved settings
// ---------------------------------------------------------------------------

/// Configuration after environment overrides and validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub source_database: DatabaseId,
    pub target_database: DatabaseId,
    pub assignee: AssigneeFilter,
    pub poll_interval: Duration,
    pub request_timeout: Duration,
    pub liveness_port: u16,
    pub notion_api_base: String,
    /// `None` when `NOTION_API_KEY` is unset; live clients refuse to build.
    pub api_key: Option<String>,
}

impl Settings {
    /// Apply environment overrides from `lookup` on top of `config`, then validate.
    ///
    /// `lookup` is `std::env::var(..).ok()` in production and a map in tests.
    pub fn resolve(
        mut config: Config,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, ConfigError> {
        let env = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(v) = env(ENV_SOURCE_DB) {
            config.source_database = DatabaseId::from(v);
        }
        if let Some(v) = env(ENV_TARGET_DB) {
            config.target_database = DatabaseId::from(v);
        }
        if let Some(v) = env(ENV_ASSIGNEE) {
            config.assignee = v;
        }
        if let Some(v) = env(ENV_POLL_INTERVAL) {
            config.poll_interval_secs = parse_number(ENV_POLL_INTERVAL, &v)?;
        }
        if let Some(v) = env(ENV_PORT) {
            config.liveness_port = parse_number(ENV_PORT, &v)?;
        }

        if config.source_database.is_empty() {
            return Err(ConfigError::Missing("source_database"));
        }
        if config.target_database.is_empty() {
            return Err(ConfigError::Missing("target_database"));
        }
        if config.poll_interval_secs == 0 {
            return Err(ConfigError::Invalid {
                key: "poll_interval_secs",
                reason: "must be at least 1 second".to_string(),
            });
        }
        if config.assignee.trim().is_empty() {
            tracing::warn!("no assignee configured; outbound creation is disabled");
        }

        Ok(Self {
            source_database: config.source_database,
            target_database: config.target_database,
            assignee: AssigneeFilter::new(config.assignee),
            poll_interval: Duration::from_secs(config.poll_interval_secs),
            request_timeout: Duration::from_secs(config.request_timeout_secs.max(1)),
            liveness_port: config.liveness_port,
            notion_api_base: config.notion_api_base.trim_end_matches('/').to_string(),
            api_key: env(ENV_API_KEY),
        })
    }

    /// The token, or [`ConfigError::Missing`] when unset.
    pub fn require_api_key(&self) -> Result<&str, ConfigError> {
        self.api_key.as_deref().ok_or(ConfigError::Missing(ENV_API_KEY))
    }
}

fn parse_number<N: std::str::FromStr>(key: &'static str, raw: &str) -> Result<N, ConfigError>
where
    N::Err: std::fmt::Display,
{
    raw.trim().parse().map_err(|e: N::Err| ConfigError::Invalid {
        key,
        reason: format!("'{raw}': {e}"),
    })
}

// ---------------------------------------------------------------------------
// 3. Paths
// ---------------------------------------------------------------------------

/// `<home>/.tasksync/`
pub fn root_at(home: &Path) -> PathBuf {
    home.join(".tasksync")
}

/// `<home>/.tasksync/config.yaml`: pure, no I/O.
pub fn config_path_at(home: &Path) -> PathBuf {
    root_at(home).join("config.yaml")
}

// ---------------------------------------------------------------------------
// 4. Load / save
// ---------------------------------------------------------------------------

/// Load `<home>/.tasksync/config.yaml`.
///
/// Returns `ConfigError::ConfigNotFound` if absent,
/// `ConfigError::Parse` (with path + line context) if malformed YAML.
pub fn load_at(home: &Path) -> Result<Config, ConfigError> {
    let path = config_path_at(home);
    if !path.exists() {
        return Err(ConfigError::ConfigNotFound { path });
    }
    let contents = std::fs::read_to_string(&path)?;
    serde_yaml::from_str(&contents).map_err(|e| ConfigError::Parse { path, source: e })
}

/// `load_at` convenience wrapper.
pub fn load() -> Result<Config, ConfigError> {
    load_at(&home()?)
}

/// Load the file and resolve it against the process environment.
pub fn load_settings_at(home: &Path) -> Result<Settings, ConfigError> {
    Settings::resolve(load_at(home)?, |key| std::env::var(key).ok())
}

/// `load_settings_at` convenience wrapper.
pub fn load_settings() -> Result<Settings, ConfigError> {
    load_settings_at(&home()?)
}

/// Atomically save `config` to `<home>/.tasksync/config.yaml`.
///
/// Write flow: serialize → `.yaml.tmp` sibling → `chmod 0600` → `rename`.
pub fn save_at(home: &Path, config: &Config) -> Result<(), ConfigError> {
    let dir = root_at(home);
    if !dir.exists() {
        std::fs::create_dir_all(&dir)?;
        set_dir_permissions(&dir)?;
    }
    let path = config_path_at(home);
    let tmp_path = path.with_file_name("config.yaml.tmp");

    let yaml = serde_yaml::to_string(config)?;
    std::fs::write(&tmp_path, yaml)?;
    set_file_permissions(&tmp_path)?;
    std::fs::rename(&tmp_path, &path)?;
    Ok(())
}

/// `save_at` convenience wrapper.
pub fn save(config: &Config) -> Result<(), ConfigError> {
    save_at(&home()?, config)
}

/// Write `config` unless a config file already exists.
///
/// Idempotent: if the file exists it is loaded and returned unchanged unless
/// `overwrite` is set.
pub fn init_at(home: &Path, config: Config, overwrite: bool) -> Result<Config, ConfigError> {
    if config_path_at(home).exists() && !overwrite {
        return load_at(home);
    }
    save_at(home, &config)?;
    Ok(config)
}

/// `init_at` convenience wrapper.
pub fn init(config: Config, overwrite: bool) -> Result<Config, ConfigError> {
    init_at(&home()?, config, overwrite)
}

// ---------------------------------------------------------------------------
// Private helpers
// ---------------------------------------------------------------------------

fn home() -> Result<PathBuf, ConfigError> {
    dirs::home_dir().ok_or(ConfigError::HomeNotFound)
}

#[cfg(unix)]
fn set_dir_permissions(path: &Path) -> Result<(), ConfigError> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o700))?;
    Ok(())
}
#[cfg(not(unix))]
fn set_dir_permissions(_path: &Path) -> Result<(), ConfigError> {
    Ok(())
}

#[cfg(unix)]
fn set_file_permissions(path: &Path) -> Result<(), ConfigError> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))?;
    Ok(())
}
#[cfg(not(unix))]
fn set_file_permissions(_path: &Path) -> Result<(), ConfigError> {
    Ok(())
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::TempDir;

    fn config() -> Config {
        Config {
            source_database: DatabaseId::from("src-db"),
            target_database: DatabaseId::from("dst-db"),
            assignee: "Ada".to_string(),
            ..Config::default()
        }
    }

    fn no_env(_: &str) -> Option<String> {
        None
    }

    #[test]
    fn config_path_is_correct() {
        let home = TempDir::new().expect("tempdir");
        assert!(config_path_at(home.path()).ends_with(".tasksync/config.yaml"));
    }

    #[test]
    fn save_and_load_roundtrip() {
        let home = TempDir::new().expect("tempdir");
        save_at(home.path(), &config()).expect("save");
        let loaded = load_at(home.path()).expect("load");
        assert_eq!(loaded, config());

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = std::fs::metadata(config_path_at(home.path()))
                .unwrap()
                .permissions()
                .mode()
                & 0o777;
            assert_eq!(mode, 0o600);
        }
    }

    #[test]
    fn load_missing_returns_not_found() {
        let home = TempDir::new().expect("tempdir");
        let err = load_at(home.path()).unwrap_err();
        assert!(matches!(err, ConfigError::ConfigNotFound { .. }));
    }

    #[test]
    fn defaults_fill_omitted_fields() {
        let parsed: Config =
            serde_yaml::from_str("source_database: a\ntarget_database: b\n").expect("parse");
        assert_eq!(parsed.poll_interval_secs, DEFAULT_POLL_INTERVAL_SECS);
        assert_eq!(parsed.liveness_port, DEFAULT_LIVENESS_PORT);
        assert_eq!(parsed.notion_api_base, DEFAULT_NOTION_API_BASE);
        assert!(parsed.assignee.is_empty());
    }

    #[test]
    fn init_is_idempotent_without_overwrite() {
        let home = TempDir::new().expect("tempdir");
        init_at(home.path(), config(), false).expect("first init");

        let mut other = config();
        other.assignee = "Grace".to_string();
        let kept = init_at(home.path(), other.clone(), false).expect("second init");
        assert_eq!(kept.assignee, "Ada");

        let replaced = init_at(home.path(), other, true).expect("overwrite");
        assert_eq!(replaced.assignee, "Grace");
        assert_eq!(load_at(home.path()).unwrap().assignee, "Grace");
    }

    #[test]
    fn env_overrides_file_values() {
        let env: HashMap<&str, &str> = [
            (ENV_SOURCE_DB, "env-src"),
            (ENV_ASSIGNEE, "Grace"),
            (ENV_POLL_INTERVAL, "5"),
            (ENV_PORT, "9090"),
            (ENV_API_KEY, "secret_token"),
        ]
        .into_iter()
        .collect();

        let settings =
            Settings::resolve(config(), |k| env.get(k).map(|v| v.to_string())).expect("resolve");

        assert_eq!(settings.source_database, DatabaseId::from("env-src"));
        assert_eq!(settings.target_database, DatabaseId::from("dst-db"));
        assert_eq!(settings.assignee.identity(), "Grace");
        assert_eq!(settings.poll_interval, Duration::from_secs(5));
        assert_eq!(settings.liveness_port, 9090);
        assert_eq!(settings.require_api_key().unwrap(), "secret_token");
    }

    #[test]
    fn missing_database_is_rejected() {
        let mut cfg = config();
        cfg.target_database = DatabaseId::from("");
        let err = Settings::resolve(cfg, no_env).unwrap_err();
        assert!(matches!(err, ConfigError::Missing("target_database")));
    }

    #[test]
    fn zero_interval_is_rejected() {
        let mut cfg = config();
        cfg.poll_interval_secs = 0;
        let err = Settings::resolve(cfg, no_env).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { key: "poll_interval_secs", .. }));
    }

    #[test]
    fn unparsable_port_override_is_rejected() {
        let err = Settings::resolve(config(), |k| (k == ENV_PORT).then(|| "http".to_string()))
            .unwrap_err();
        assert!(err.to_string().contains("PORT"), "got: {err}");
    }

    #[test]
    fn missing_api_key_is_reported() {
        let settings = Settings::resolve(config(), no_env).expect("resolve");
        let err = settings.require_api_key().unwrap_err();
        assert!(err.to_string().contains(ENV_API_KEY));
    }

    #[test]
    fn api_base_trailing_slash_is_trimmed() {
        let mut cfg = config();
        cfg.notion_api_base = "http://localhost:1234/v1/".to_string();
        let settings = Settings::resolve(cfg, no_env).expect("resolve");
        assert_eq!(settings.notion_api_base, "http://localhost:1234/v1");
    }
}
