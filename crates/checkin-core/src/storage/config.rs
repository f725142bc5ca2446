//! TOML-based application configuration.
//!
//! Stores:
//! - The reference timezone every date computation uses
//! - Remote completion store location and timeouts
//! - Streak lookback and the task completion rule
//! - Catalog file location
//! - The achievement table
//!
//! Configuration is stored at `~/.config/checkin/config.toml`.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::data_dir;
use crate::achievements::{default_rules, AchievementEngine, AchievementRule};
use crate::catalog::TaskCatalog;
use crate::clock::ReferenceZone;
use crate::completion::CompletionRule;
use crate::error::ConfigError;
use crate::streak::{StreakConfig, DEFAULT_MAX_LOOKBACK_DAYS};

/// Reference timezone configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimezoneSection {
    /// Fixed offset from UTC in minutes, e.g. 540 for UTC+9.
    #[serde(default)]
    pub utc_offset_minutes: i32,
}

/// Remote completion store configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteSection {
    /// Base URL of the remote store. Unset means the local SQLite store.
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    /// Bounded wait for the startup reconcile before degrading.
    #[serde(default = "default_reconcile_timeout_secs")]
    pub reconcile_timeout_secs: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistorySection {
    #[serde(default = "default_max_lookback_days")]
    pub max_lookback_days: u32,
    /// Days shown by `history` when none are requested.
    #[serde(default = "default_history_days")]
    pub default_days: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompletionSection {
    #[serde(default)]
    pub rule: CompletionRule,
}

/// Application configuration.
///
/// Serialized to/from TOML at `~/.config/checkin/config.toml`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// JSON catalog file. Unset means the built-in catalog.
    #[serde(default)]
    pub catalog_path: Option<String>,
    #[serde(default)]
    pub timezone: TimezoneSection,
    #[serde(default)]
    pub remote: RemoteSection,
    #[serde(default)]
    pub history: HistorySection,
    #[serde(default)]
    pub completion: CompletionSection,
    #[serde(default = "default_rules")]
    pub achievements: Vec<AchievementRule>,
}

fn default_request_timeout_secs() -> u64 {
    10
}
fn default_reconcile_timeout_secs() -> u64 {
    5
}
fn default_max_lookback_days() -> u32 {
    DEFAULT_MAX_LOOKBACK_DAYS
}
fn default_history_days() -> u32 {
    30
}

impl Default for RemoteSection {
    fn default() -> Self {
        Self {
            base_url: None,
            request_timeout_secs: default_request_timeout_secs(),
            reconcile_timeout_secs: default_reconcile_timeout_secs(),
        }
    }
}

impl Default for HistorySection {
    fn default() -> Self {
        Self {
            max_lookback_days: default_max_lookback_days(),
            default_days: default_history_days(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            catalog_path: None,
            timezone: TimezoneSection::default(),
            remote: RemoteSection::default(),
            history: HistorySection::default(),
            completion: CompletionSection::default(),
            achievements: default_rules(),
        }
    }
}

impl Config {
    fn get_json_value_by_path<'a>(
        root: &'a serde_json::Value,
        key: &str,
    ) -> Option<&'a serde_json::Value> {
        if key.is_empty() {
            return None;
        }

        let mut current = root;
        for part in key.split('.') {
            current = current.get(part)?;
        }
        Some(current)
    }

    fn set_json_value_by_path(
        root: &mut serde_json::Value,
        key: &str,
        value: &str,
    ) -> Result<(), ConfigError> {
        let unknown = || ConfigError::MissingKey(key.to_string());
        let invalid = |message: String| ConfigError::InvalidValue {
            key: key.to_string(),
            message,
        };

        let mut parts = key.split('.').peekable();
        if parts.peek().map_or(true, |p| p.is_empty()) {
            return Err(unknown());
        }

        let mut current = root;
        while let Some(part) = parts.next() {
            let is_leaf = parts.peek().is_none();
            if is_leaf {
                let obj = current.as_object_mut().ok_or_else(unknown)?;
                let existing = obj.get(part).ok_or_else(unknown)?;

                let new_value = match existing {
                    serde_json::Value::Bool(_) => serde_json::Value::Bool(
                        value.parse::<bool>().map_err(|e| invalid(e.to_string()))?,
                    ),
                    serde_json::Value::Number(_) => {
                        if let Ok(n) = value.parse::<i64>() {
                            serde_json::Value::Number(n.into())
                        } else {
                            return Err(invalid(format!("cannot parse '{value}' as number")));
                        }
                    }
                    serde_json::Value::Object(_) | serde_json::Value::Array(_) => {
                        serde_json::from_str(value).map_err(|e| invalid(e.to_string()))?
                    }
                    // Optional fields: an empty string unsets them.
                    serde_json::Value::Null | serde_json::Value::String(_) if value.is_empty() => {
                        serde_json::Value::Null
                    }
                    _ => serde_json::Value::String(value.into()),
                };

                obj.insert(part.to_string(), new_value);
                return Ok(());
            }

            current = current.get_mut(part).ok_or_else(unknown)?;
        }

        Err(unknown())
    }

    /// `config.toml` inside the data directory.
    pub fn path() -> Result<PathBuf, ConfigError> {
        data_dir()
            .map(|dir| dir.join("config.toml"))
            .map_err(|e| ConfigError::LoadFailed {
                path: PathBuf::from("config.toml"),
                message: e.to_string(),
            })
    }

    /// Load from the data directory, writing defaults when no file exists.
    ///
    /// # Errors
    ///
    /// Returns an error if the config file exists but cannot be parsed,
    /// or if the default config cannot be written to disk.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(&Self::path()?)
    }

    /// Load from `path`, writing defaults there when it does not exist.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        match std::fs::read_to_string(path) {
            Ok(content) => {
                let cfg: Config =
                    toml::from_str(&content).map_err(|e| ConfigError::ParseFailed(e.to_string()))?;
                cfg.validate()?;
                Ok(cfg)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                let cfg = Self::default();
                cfg.save_to(path)?;
                Ok(cfg)
            }
            Err(e) => Err(ConfigError::LoadFailed {
                path: path.to_path_buf(),
                message: e.to_string(),
            }),
        }
    }

    /// Persist to the data directory.
    pub fn save(&self) -> Result<(), ConfigError> {
        self.save_to(&Self::path()?)
    }

    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        let failed = |message: String| ConfigError::SaveFailed {
            path: path.to_path_buf(),
            message,
        };
        let content = toml::to_string_pretty(self).map_err(|e| failed(e.to_string()))?;
        std::fs::write(path, content).map_err(|e| failed(e.to_string()))
    }

    /// Load from disk, returning default on error.
    /// This is a convenience method that never fails.
    pub fn load_or_default() -> Self {
        Self::load().unwrap_or_else(|e| {
            tracing::warn!(error = %e, "config unreadable, using defaults");
            Self::default()
        })
    }

    /// Get a config value as string by dot-separated key.
    pub fn get(&self, key: &str) -> Option<String> {
        let json = serde_json::to_value(self).ok()?;
        let val = Self::get_json_value_by_path(&json, key)?;
        match val {
            serde_json::Value::String(s) => Some(s.clone()),
            other => Some(other.to_string()),
        }
    }

    /// Set a config value by key. The change is validated but not saved.
    ///
    /// # Errors
    ///
    /// Returns an error if the key is unknown or the value cannot be parsed.
    pub fn set(&mut self, key: &str, value: &str) -> Result<(), ConfigError> {
        let mut json =
            serde_json::to_value(&*self).map_err(|e| ConfigError::ParseFailed(e.to_string()))?;
        Self::set_json_value_by_path(&mut json, key, value)?;
        let updated: Config = serde_json::from_value(json).map_err(|e| ConfigError::InvalidValue {
            key: key.to_string(),
            message: e.to_string(),
        })?;
        updated.validate()?;
        *self = updated;
        Ok(())
    }

    /// Every dot-separated leaf key with its current value.
    pub fn entries(&self) -> Vec<(String, String)> {
        fn walk(prefix: &str, value: &serde_json::Value, out: &mut Vec<(String, String)>) {
            match value {
                serde_json::Value::Object(map) => {
                    for (k, v) in map {
                        let key = if prefix.is_empty() {
                            k.clone()
                        } else {
                            format!("{prefix}.{k}")
                        };
                        walk(&key, v, out);
                    }
                }
                serde_json::Value::String(s) => out.push((prefix.to_string(), s.clone())),
                other => out.push((prefix.to_string(), other.to_string())),
            }
        }

        let mut out = Vec::new();
        if let Ok(json) = serde_json::to_value(self) {
            walk("", &json, &mut out);
        }
        out
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.zone()?;
        if self.history.max_lookback_days == 0 {
            return Err(ConfigError::InvalidValue {
                key: "history.max_lookback_days".into(),
                message: "must be at least 1".into(),
            });
        }
        if let Some(url) = &self.remote.base_url {
            url::Url::parse(url).map_err(|e| ConfigError::InvalidValue {
                key: "remote.base_url".into(),
                message: e.to_string(),
            })?;
        }
        Ok(())
    }

    pub fn zone(&self) -> Result<ReferenceZone, ConfigError> {
        ReferenceZone::from_offset_minutes(self.timezone.utc_offset_minutes)
    }

    pub fn streak_config(&self) -> StreakConfig {
        StreakConfig {
            max_lookback_days: self.history.max_lookback_days,
            rule: self.completion.rule,
        }
    }

    pub fn achievement_engine(&self) -> AchievementEngine {
        AchievementEngine::new(self.achievements.clone())
    }

    /// The configured catalog, or the built-in one when unset or unreadable.
    pub fn catalog(&self) -> TaskCatalog {
        TaskCatalog::load_or_default(self.catalog_path.as_deref().map(Path::new))
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.remote.request_timeout_secs.max(1))
    }

    pub fn reconcile_timeout(&self) -> Duration {
        Duration::from_secs(self.remote.reconcile_timeout_secs.max(1))
    }
}
