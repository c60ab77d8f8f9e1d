// Configuration for chromabuddy
// Defaults, then <repo>/.chromabuddy/config.json, then CHROMABUDDY_* env vars

use crate::util;
use serde::{Deserialize, Serialize};
use std::env;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;
use tracing::warn;

pub const CONFIG_FILE: &str = "config.json";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("no API key configured; set CHROMABUDDY_API_KEY or `api_key` in config.json")]
    MissingApiKey,
    #[error("invalid configuration in {path}: {message}")]
    Invalid { path: String, message: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Collaborator credential (CHROMABUDDY_API_KEY)
    pub api_key: String,
    /// OpenAI-compatible base URL (CHROMABUDDY_API_BASE)
    pub api_base: String,
    pub model: String,
    pub max_tokens: u32,
    pub temperature: f32,
    pub cache_enabled: bool,
    /// Default TTL for cache entries written without a stage-specific TTL
    pub cache_ttl_secs: u64,
    /// Run the verification loop after applying changes
    pub auto_test: bool,
    /// Total verification runs per file (CHROMABUDDY_FIX_ATTEMPTS)
    pub auto_fix_attempts: u32,
    /// Ask before writing each proposed change
    pub diff_approval: bool,
    pub verify_timeout_secs: u64,
    /// Program used to run a file during verification
    pub interpreter: String,
    pub max_targets: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            api_base: "https://api.openai.com/v1".to_string(),
            model: "gpt-4o-mini".to_string(),
            max_tokens: 4000,
            temperature: 0.7,
            cache_enabled: true,
            cache_ttl_secs: 3600,
            auto_test: true,
            auto_fix_attempts: 3,
            diff_approval: true,
            verify_timeout_secs: 10,
            interpreter: "python3".to_string(),
            max_targets: 5,
        }
    }
}

impl Config {
    pub fn path_for(repo_root: &Path) -> PathBuf {
        util::state_dir(repo_root).join(CONFIG_FILE)
    }

    /// Defaults overlaid with the repo's config file and the process
    /// environment.
    pub fn load(repo_root: &Path) -> Result<Self, ConfigError> {
        let mut config = Self::from_file(&Self::path_for(repo_root))?;
        config.apply_env(|key| env::var(key).ok());
        Ok(config)
    }

    fn from_file(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let invalid = |message: String| ConfigError::Invalid {
            path: path.display().to_string(),
            message,
        };
        let raw = util::read_to_string(path).map_err(|err| invalid(format!("{err:#}")))?;
        serde_json::from_str(&raw).map_err(|err| invalid(err.to_string()))
    }

    /// Applies `CHROMABUDDY_*` overrides. Values that fail to parse are
    /// reported and ignored.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(val) = lookup("CHROMABUDDY_API_KEY") {
            self.api_key = val;
        }
        if let Some(val) = lookup("CHROMABUDDY_API_BASE") {
            self.api_base = val;
        }
        if let Some(val) = lookup("CHROMABUDDY_MODEL") {
            self.model = val;
        }
        if let Some(val) = lookup("CHROMABUDDY_INTERPRETER") {
            self.interpreter = val;
        }
        parse_env(&lookup, "CHROMABUDDY_MAX_TOKENS", &mut self.max_tokens);
        parse_env(&lookup, "CHROMABUDDY_TEMPERATURE", &mut self.temperature);
        parse_env(&lookup, "CHROMABUDDY_CACHE_ENABLED", &mut self.cache_enabled);
        parse_env(&lookup, "CHROMABUDDY_AUTO_TEST", &mut self.auto_test);
        parse_env(&lookup, "CHROMABUDDY_FIX_ATTEMPTS", &mut self.auto_fix_attempts);
        parse_env(&lookup, "CHROMABUDDY_DIFF_APPROVAL", &mut self.diff_approval);
        parse_env(
            &lookup,
            "CHROMABUDDY_VERIFY_TIMEOUT_SECS",
            &mut self.verify_timeout_secs,
        );
    }

    pub fn save(&self, repo_root: &Path) -> anyhow::Result<PathBuf> {
        let path = Self::path_for(repo_root);
        let json = serde_json::to_string_pretty(self)?;
        util::write_string(&path, &json)?;
        Ok(path)
    }

    /// Updates one key from its textual form, as typed in `/config set`.
    pub fn set_value(&mut self, key: &str, value: &str) -> Result<(), ConfigError> {
        let invalid = |message: String| ConfigError::Invalid {
            path: key.to_string(),
            message,
        };
        let mut json = serde_json::to_value(&*self).map_err(|err| invalid(err.to_string()))?;
        let Some(slot) = json.get_mut(key) else {
            return Err(invalid("unknown key".to_string()));
        };
        let kind = json_kind(slot);
        let replacement = if slot.is_string() {
            serde_json::Value::String(value.to_string())
        } else {
            serde_json::from_str(value)
                .map_err(|err| invalid(format!("expected a {kind} value: {err}")))?
        };
        *slot = replacement;
        *self = serde_json::from_value(json).map_err(|err| invalid(err.to_string()))?;
        Ok(())
    }

    pub fn require_api_key(&self) -> Result<&str, ConfigError> {
        if self.api_key.trim().is_empty() {
            return Err(ConfigError::MissingApiKey);
        }
        Ok(&self.api_key)
    }

    pub fn verify_timeout(&self) -> Duration {
        Duration::from_secs(self.verify_timeout_secs)
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }

    /// Display form with the API key masked.
    pub fn redacted(&self) -> Self {
        let mut copy = self.clone();
        if !copy.api_key.is_empty() {
            let tail: String = copy
                .api_key
                .chars()
                .rev()
                .take(4)
                .collect::<Vec<_>>()
                .into_iter()
                .rev()
                .collect();
            copy.api_key = format!("****{tail}");
        }
        copy
    }
}

fn parse_env<T: FromStr + std::fmt::Display>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    slot: &mut T,
) {
    let Some(val) = lookup(key) else {
        return;
    };
    match val.trim().parse() {
        Ok(parsed) => *slot = parsed,
        Err(_) => warn!("invalid {key} value: {val}, keeping {slot}"),
    }
}

fn json_kind(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Bool(_) => "boolean",
        serde_json::Value::Number(_) => "numeric",
        _ => "JSON",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.max_tokens, 4000);
        assert_eq!(config.auto_fix_attempts, 3);
        assert_eq!(config.verify_timeout_secs, 10);
        assert_eq!(config.max_targets, 5);
        assert!(config.diff_approval);
        assert!(config.require_api_key().is_err());
    }

    #[test]
    fn env_overrides_and_bad_values_keep_previous() {
        let vars: HashMap<&str, &str> = HashMap::from([
            ("CHROMABUDDY_API_KEY", "sk-test"),
            ("CHROMABUDDY_FIX_ATTEMPTS", "5"),
            ("CHROMABUDDY_MAX_TOKENS", "lots"),
            ("CHROMABUDDY_DIFF_APPROVAL", "false"),
        ]);
        let mut config = Config::default();
        config.apply_env(|key| vars.get(key).map(|v| v.to_string()));
        assert_eq!(config.require_api_key().unwrap(), "sk-test");
        assert_eq!(config.auto_fix_attempts, 5);
        assert_eq!(config.max_tokens, 4000);
        assert!(!config.diff_approval);
    }

    #[test]
    fn file_round_trip_and_set_value() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.set_value("model", "local-model").unwrap();
        config.set_value("auto_fix_attempts", "2").unwrap();
        config.set_value("auto_test", "false").unwrap();
        assert!(config.set_value("auto_test", "maybe").is_err());
        assert!(config.set_value("nope", "1").is_err());
        config.save(dir.path()).unwrap();

        let loaded = Config::from_file(&Config::path_for(dir.path())).unwrap();
        assert_eq!(loaded, config);
        assert_eq!(loaded.model, "local-model");
        assert_eq!(loaded.auto_fix_attempts, 2);
        assert!(!loaded.auto_test);
    }

    #[test]
    fn invalid_file_is_a_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = Config::path_for(dir.path());
        util::write_string(&path, "{ not json").unwrap();
        let err = Config::from_file(&path).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { .. }));
    }

    #[test]
    fn redacted_masks_key() {
        let config = Config {
            api_key: "sk-abcdef123456".to_string(),
            ..Default::default()
        };
        assert_eq!(config.redacted().api_key, "****3456");
    }
}
