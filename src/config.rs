use eyre::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use throttlr::{RateLimitConfig, ThrottleConfig, ThrottlerConfig};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub log_level: Option<String>,
    pub throttler: ThrottlerConfig,
    /// Per-call settings used when no profile is named.
    pub defaults: ThrottleConfig,
    /// Profiles layered over the built-in ones.
    pub profiles: BTreeMap<String, ThrottleConfig>,
    pub rate_limit: RateLimitConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: Some("info".to_string()),
            throttler: ThrottlerConfig::default(),
            defaults: ThrottleConfig::default(),
            profiles: BTreeMap::new(),
            rate_limit: RateLimitConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration with fallback chain
    pub fn load(config_path: Option<&PathBuf>) -> Result<Self> {
        // If explicit config path provided, try to load it
        if let Some(path) = config_path {
            return Self::load_from_file(path).context(format!("Failed to load config from {}", path.display()));
        }

        // Try primary location: ~/.config/<project>/<project>.yml
        if let Some(config_dir) = dirs::config_dir() {
            let project_name = env!("CARGO_PKG_NAME");
            let primary_config = config_dir.join(project_name).join(format!("{}.yml", project_name));
            if primary_config.exists() {
                match Self::load_from_file(&primary_config) {
                    Ok(config) => return Ok(config),
                    Err(e) => {
                        log::warn!("Failed to load config from {}: {}", primary_config.display(), e);
                    }
                }
            }
        }

        // Try fallback location: ./<project>.yml
        let project_name = env!("CARGO_PKG_NAME");
        let fallback_config = PathBuf::from(format!("{}.yml", project_name));
        if fallback_config.exists() {
            match Self::load_from_file(&fallback_config) {
                Ok(config) => return Ok(config),
                Err(e) => {
                    log::warn!("Failed to load config from {}: {}", fallback_config.display(), e);
                }
            }
        }

        // No config file found, use defaults
        log::info!("No config file found, using defaults");
        Ok(Self::default())
    }

    fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path).context("Failed to read config file")?;

        let config: Self = serde_yaml::from_str(&content).context("Failed to parse config file")?;
        config.validate()?;

        log::info!("Loaded config from: {}", path.as_ref().display());
        Ok(config)
    }

    /// Reject configs whose throttle settings could never be scheduled.
    pub fn validate(&self) -> Result<()> {
        self.defaults.validate().context("Invalid defaults")?;
        for (name, profile) in &self.profiles {
            profile.validate().context(format!("Invalid profile '{}'", name))?;
        }
        Ok(())
    }

    /// Built-in profiles with configured overrides applied.
    pub fn effective_profiles(&self) -> BTreeMap<String, ThrottleConfig> {
        let mut profiles = ThrottleConfig::builtin_profiles();
        profiles.extend(self.profiles.clone());
        profiles
    }

    /// Resolve a profile by name; `None` selects the defaults.
    pub fn throttle_config(&self, profile: Option<&str>) -> Result<ThrottleConfig> {
        match profile {
            None => Ok(self.defaults.clone()),
            Some(name) => self
                .effective_profiles()
                .remove(name)
                .ok_or_else(|| eyre::eyre!("Unknown profile '{}'", name)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_config_default() {
        let config = Config::default();
        assert_eq!(config.log_level.as_deref(), Some("info"));
        assert!(config.profiles.is_empty());
        assert_eq!(config.effective_profiles().len(), 4);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_load_from_explicit_path() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("throttlr.yml");
        fs::write(
            &path,
            r#"
log_level: debug
throttler:
  fallback_max_concurrent: 4
  concurrency_scope: queued
  backoff:
    base_delay_ms: 250
defaults:
  max_concurrent: 6
profiles:
  search:
    max_concurrent: 8
    priority: 0
  batch:
    max_concurrent: 1
    priority: 9
rate_limit:
  max_requests: 10
  window_ms: 1000
"#,
        )
        .unwrap();

        let config = Config::load(Some(&path)).unwrap();
        assert_eq!(config.log_level.as_deref(), Some("debug"));
        assert_eq!(config.throttler.fallback_max_concurrent, 4);
        assert_eq!(config.throttler.backoff.base_delay_ms, 250);
        assert_eq!(config.throttler.backoff.max_delay_ms, 30000);
        assert_eq!(config.defaults.max_concurrent, 6);
        assert_eq!(config.rate_limit.max_requests, 10);

        let profiles = config.effective_profiles();
        assert_eq!(profiles.len(), 5);
        assert_eq!(profiles["search"].max_concurrent, 8);
        assert_eq!(profiles["batch"].priority, 9);
    }

    #[test]
    fn test_load_missing_explicit_path_fails() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("missing.yml");
        assert!(Config::load(Some(&path)).is_err());
    }

    #[test]
    fn test_load_rejects_invalid_profile() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("throttlr.yml");
        fs::write(&path, "profiles:\n  broken:\n    max_concurrent: 0\n").unwrap();
        assert!(Config::load(Some(&path)).is_err());
    }

    #[test]
    fn test_throttle_config_lookup() {
        let config = Config::default();
        assert_eq!(config.throttle_config(None).unwrap(), ThrottleConfig::default());
        assert_eq!(
            config.throttle_config(Some("ai_inference")).unwrap(),
            ThrottleConfig::ai_inference()
        );
        assert!(config.throttle_config(Some("nope")).is_err());
    }
}
