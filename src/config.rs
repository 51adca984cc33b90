use crate::session::SessionPolicy;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_BASE_URL: &str = "https://nrgug-api-production.up.railway.app";
const CONFIG_DIR: &str = ".nrgadmin";

/// A validation error in the configuration
#[derive(Debug, Clone)]
pub struct ValidationError {
    pub field: String,
    pub message: String,
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}]: {}", self.field, self.message)
    }
}

/// Remote REST API settings
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct ApiConfig {
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default)]
    pub timeout_ms: Option<u64>,
    /// Timeout for the dashboard summary requests
    #[serde(default)]
    pub fast_timeout_ms: Option<u64>,
}

impl ApiConfig {
    pub fn base_url(&self) -> &str {
        self.base_url.as_deref().unwrap_or(DEFAULT_BASE_URL)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms.unwrap_or(10_000))
    }

    pub fn fast_timeout(&self) -> Duration {
        Duration::from_millis(self.fast_timeout_ms.unwrap_or(3_000))
    }
}

/// Inactivity timeout settings
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct SessionConfig {
    #[serde(default)]
    pub timeout_secs: Option<u64>,
    #[serde(default)]
    pub warning_secs: Option<u64>,
    #[serde(default)]
    pub poll_interval_secs: Option<u64>,
    #[serde(default)]
    pub activity_throttle_secs: Option<u64>,
    #[serde(default)]
    pub countdown_tick_ms: Option<u64>,
}

/// Where session state and audit logs live
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct StorageConfig {
    #[serde(default)]
    pub state_dir: Option<PathBuf>,
    #[serde(default)]
    pub audit_log: Option<bool>,
}

/// Main configuration structure
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct Config {
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub storage: StorageConfig,
}

impl Config {
    /// Load configuration from default paths
    /// Priority: local (.nrgadmin/config.local.toml) > project (.nrgadmin/config.toml)
    /// > user (~/.nrgadmin/config.toml) > built-in defaults
    pub fn load() -> Result<Self> {
        let mut config = Self::default();

        if let Some(home) = dirs::home_dir() {
            let user_config = home.join(CONFIG_DIR).join("config.toml");
            if user_config.exists() {
                config.merge(Self::load_from(&user_config)?);
            }
        }

        let project_config = Path::new(CONFIG_DIR).join("config.toml");
        if project_config.exists() {
            config.merge(Self::load_from(&project_config)?);
        }

        // Should be gitignored
        let local_config = Path::new(CONFIG_DIR).join("config.local.toml");
        if local_config.exists() {
            config.merge(Self::load_from(&local_config)?);
        }

        Ok(config)
    }

    /// Load configuration from a specific path
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        let config: Config = toml::from_str(&content)
            .with_context(|| format!("parsing config {}", path.display()))?;
        Ok(config)
    }

    /// Merge another config into this one (other takes priority for every value it sets)
    pub fn merge(&mut self, other: Config) {
        fn take<T>(slot: &mut Option<T>, other: Option<T>) {
            if other.is_some() {
                *slot = other;
            }
        }

        take(&mut self.api.base_url, other.api.base_url);
        take(&mut self.api.timeout_ms, other.api.timeout_ms);
        take(&mut self.api.fast_timeout_ms, other.api.fast_timeout_ms);

        take(&mut self.session.timeout_secs, other.session.timeout_secs);
        take(&mut self.session.warning_secs, other.session.warning_secs);
        take(
            &mut self.session.poll_interval_secs,
            other.session.poll_interval_secs,
        );
        take(
            &mut self.session.activity_throttle_secs,
            other.session.activity_throttle_secs,
        );
        take(
            &mut self.session.countdown_tick_ms,
            other.session.countdown_tick_ms,
        );

        take(&mut self.storage.state_dir, other.storage.state_dir);
        take(&mut self.storage.audit_log, other.storage.audit_log);
    }

    /// Session timing with defaults applied
    pub fn session_policy(&self) -> SessionPolicy {
        let defaults = SessionPolicy::default();
        let secs = |v: Option<u64>, d: Duration| v.map(Duration::from_secs).unwrap_or(d);
        SessionPolicy {
            timeout: secs(self.session.timeout_secs, defaults.timeout),
            warning: secs(self.session.warning_secs, defaults.warning),
            poll_interval: secs(self.session.poll_interval_secs, defaults.poll_interval),
            activity_throttle: secs(
                self.session.activity_throttle_secs,
                defaults.activity_throttle,
            ),
            countdown_tick: self
                .session
                .countdown_tick_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.countdown_tick),
        }
    }

    /// Resolve the state directory, expanding a leading `~`
    pub fn state_dir(&self) -> PathBuf {
        match &self.storage.state_dir {
            Some(dir) => expand_home(dir),
            None => dirs::home_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join(CONFIG_DIR)
                .join("state"),
        }
    }

    pub fn audit_enabled(&self) -> bool {
        self.storage.audit_log.unwrap_or(true)
    }

    /// Validate configuration and return any errors found
    pub fn validate(&self) -> Result<(), Vec<ValidationError>> {
        let mut errors = Vec::new();

        let base_url = self.api.base_url();
        if !(base_url.starts_with("http://") || base_url.starts_with("https://")) {
            errors.push(ValidationError {
                field: "api.base_url".to_string(),
                message: format!("Must be an http(s) URL, got '{}'", base_url),
            });
        }

        for (field, value) in [
            ("api.timeout_ms", self.api.timeout_ms),
            ("api.fast_timeout_ms", self.api.fast_timeout_ms),
            ("session.timeout_secs", self.session.timeout_secs),
            ("session.poll_interval_secs", self.session.poll_interval_secs),
            (
                "session.activity_throttle_secs",
                self.session.activity_throttle_secs,
            ),
            ("session.countdown_tick_ms", self.session.countdown_tick_ms),
        ] {
            if value == Some(0) {
                errors.push(ValidationError {
                    field: field.to_string(),
                    message: "Must be greater than 0".to_string(),
                });
            }
        }

        let policy = self.session_policy();
        if policy.warning >= policy.timeout {
            errors.push(ValidationError {
                field: "session.warning_secs".to_string(),
                message: format!(
                    "Must be less than session.timeout_secs ({}s), got {}s",
                    policy.timeout.as_secs(),
                    policy.warning.as_secs()
                ),
            });
        }
        if policy.poll_interval >= policy.timeout {
            errors.push(ValidationError {
                field: "session.poll_interval_secs".to_string(),
                message: "Must be less than session.timeout_secs".to_string(),
            });
        }
        if policy.activity_throttle >= policy.timeout {
            errors.push(ValidationError {
                field: "session.activity_throttle_secs".to_string(),
                message: "Must be less than session.timeout_secs".to_string(),
            });
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

fn expand_home(path: &Path) -> PathBuf {
    if let Ok(rest) = path.strip_prefix("~") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    path.to_path_buf()
}
