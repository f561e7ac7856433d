//! Engine configuration.
//!
//! A single JSON document; every field has a default so partial files load.
//! [`ConfigStore`] keeps the current snapshot behind an `Arc` so a dispatch
//! works against one immutable view while a long-lived process can reload.

use crate::error::ConfigError;
use crate::types::ActionKind;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};
use std::time::Duration;

/// Base delays in seconds
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Delays {
    pub follow: f64,
    pub unfollow: f64,
    pub dm: f64,
    pub like: f64,
    pub comment: f64,
    pub story_view: f64,
    pub between_actions: f64,
    pub scrape: f64,
}

impl Default for Delays {
    fn default() -> Self {
        Self {
            follow: 10.0,
            unfollow: 10.0,
            dm: 20.0,
            like: 2.0,
            comment: 3.0,
            story_view: 1.0,
            between_actions: 1.0,
            scrape: 5.0,
        }
    }
}

impl Delays {
    pub fn base(&self, kind: ActionKind) -> f64 {
        match kind {
            ActionKind::Follow => self.follow,
            ActionKind::Unfollow => self.unfollow,
            ActionKind::Dm => self.dm,
            ActionKind::Like => self.like,
            ActionKind::Comment => self.comment,
            ActionKind::StoryView => self.story_view,
            ActionKind::Scrape => self.scrape,
        }
    }
}

/// Jitter in seconds, applied symmetrically around the base delay
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Jitter {
    pub follow: f64,
    pub unfollow: f64,
    pub dm: f64,
    pub like: f64,
    pub comment: f64,
    pub story_view: f64,
    pub scrape: f64,
}

impl Default for Jitter {
    fn default() -> Self {
        Self {
            follow: 2.0,
            unfollow: 2.0,
            dm: 2.0,
            like: 0.5,
            comment: 1.0,
            story_view: 0.5,
            scrape: 1.0,
        }
    }
}

impl Jitter {
    pub fn of(&self, kind: ActionKind) -> f64 {
        match kind {
            ActionKind::Follow => self.follow,
            ActionKind::Unfollow => self.unfollow,
            ActionKind::Dm => self.dm,
            ActionKind::Like => self.like,
            ActionKind::Comment => self.comment,
            ActionKind::StoryView => self.story_view,
            ActionKind::Scrape => self.scrape,
        }
    }
}

/// Per-kind daily caps. `story_view` and `scrape` are unlimited.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DailyLimits {
    pub follow: u32,
    pub unfollow: u32,
    pub like: u32,
    pub comment: u32,
    pub dm: u32,
}

impl DailyLimits {
    pub fn limit(&self, kind: ActionKind) -> Option<u32> {
        match kind {
            ActionKind::Follow => Some(self.follow),
            ActionKind::Unfollow => Some(self.unfollow),
            ActionKind::Like => Some(self.like),
            ActionKind::Comment => Some(self.comment),
            ActionKind::Dm => Some(self.dm),
            ActionKind::StoryView | ActionKind::Scrape => None,
        }
    }

    /// Same cap for every limited kind. Handy in tests.
    pub fn uniform(limit: u32) -> Self {
        Self {
            follow: limit,
            unfollow: limit,
            like: limit,
            comment: limit,
            dm: limit,
        }
    }
}

impl Default for DailyLimits {
    fn default() -> Self {
        EngineConfig::default().limits()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub delays: Delays,
    pub jitter: Jitter,
    /// Lower bound for any randomized delay, in seconds
    pub delay_floor: f64,
    pub debug: bool,
    pub max_attempts: u32,
    /// When false, exhausting attempts aborts the whole dispatch
    pub safe_mode: bool,
    pub dm_daily_limit: u32,
    pub like_limit: u32,
    pub comment_limit: u32,
    pub follow_limit: u32,
    pub unfollow_limit: u32,
    /// 0 = every scraped post, 1 = most recent post only
    pub scrape_likes_mode: u8,
    pub location_posts_limit: u32,
    pub max_posts_to_scrape: u32,
    pub max_following_limit: u64,
    pub max_threads: usize,
    pub rate_limit_cooldown_secs: f64,
    pub retry_backoff_secs: f64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            delays: Delays::default(),
            jitter: Jitter::default(),
            delay_floor: 0.5,
            debug: true,
            max_attempts: 3,
            safe_mode: true,
            dm_daily_limit: 50,
            like_limit: 300,
            comment_limit: 100,
            follow_limit: 200,
            unfollow_limit: 200,
            scrape_likes_mode: 0,
            location_posts_limit: 20,
            max_posts_to_scrape: 20,
            max_following_limit: 7500,
            max_threads: 5,
            rate_limit_cooldown_secs: 60.0,
            retry_backoff_secs: 5.0,
        }
    }
}

impl EngineConfig {
    /// Read and validate a config file.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|e| ConfigError::IoError {
            path: path.display().to_string(),
            msg: e.to_string(),
        })?;
        let config: EngineConfig =
            serde_json::from_str(&content).map_err(|e| ConfigError::ParseError {
                path: path.display().to_string(),
                msg: e.to_string(),
            })?;
        config.validate()?;
        Ok(config)
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let path = path.as_ref();
        let json = serde_json::to_string_pretty(self).map_err(|e| ConfigError::ParseError {
            path: path.display().to_string(),
            msg: e.to_string(),
        })?;
        crate::utils::atomic_write(path, json.as_bytes()).map_err(|e| ConfigError::IoError {
            path: path.display().to_string(),
            msg: e.to_string(),
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_attempts == 0 {
            return Err(invalid("max_attempts", "must be at least 1"));
        }
        if self.max_threads == 0 {
            return Err(invalid("max_threads", "must be at least 1"));
        }
        if !(self.delay_floor.is_finite() && self.delay_floor >= 0.0) {
            return Err(invalid("delay_floor", "must be a non-negative number"));
        }
        for kind in ActionKind::ALL {
            let base = self.delays.base(kind);
            let jitter = self.jitter.of(kind);
            if !(base.is_finite() && base >= 0.0) {
                return Err(invalid(&format!("delays.{}", kind), "must be non-negative"));
            }
            if !(jitter.is_finite() && jitter >= 0.0) {
                return Err(invalid(&format!("jitter.{}", kind), "must be non-negative"));
            }
        }
        if !(self.delays.between_actions.is_finite() && self.delays.between_actions >= 0.0) {
            return Err(invalid("delays.between_actions", "must be non-negative"));
        }
        if self.rate_limit_cooldown_secs < 0.0 || self.retry_backoff_secs < 0.0 {
            return Err(invalid("retry", "cooldown and backoff must be non-negative"));
        }
        Ok(())
    }

    pub fn limits(&self) -> DailyLimits {
        DailyLimits {
            follow: self.follow_limit,
            unfollow: self.unfollow_limit,
            like: self.like_limit,
            comment: self.comment_limit,
            dm: self.dm_daily_limit,
        }
    }

    pub fn min_spacing(&self) -> Duration {
        secs(self.delays.between_actions)
    }

    pub fn rate_limit_cooldown(&self) -> Duration {
        secs(self.rate_limit_cooldown_secs)
    }

    pub fn retry_backoff(&self) -> Duration {
        secs(self.retry_backoff_secs)
    }
}

fn invalid(field: &str, reason: &str) -> ConfigError {
    ConfigError::InvalidValue {
        field: field.to_string(),
        reason: reason.to_string(),
    }
}

pub(crate) fn secs(value: f64) -> Duration {
    Duration::try_from_secs_f64(value).unwrap_or(Duration::ZERO)
}

/// File-backed config with reloadable snapshots.
#[derive(Debug)]
pub struct ConfigStore {
    path: PathBuf,
    current: RwLock<Arc<EngineConfig>>,
}

impl ConfigStore {
    /// Load `path`, writing a default config there first if it does not exist.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, ConfigError> {
        let path = path.into();
        if !path.exists() {
            tracing::info!("Config not found at {}, writing defaults", path.display());
            EngineConfig::default().save(&path)?;
        }
        let config = EngineConfig::from_path(&path)?;
        Ok(Self {
            path,
            current: RwLock::new(Arc::new(config)),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn snapshot(&self) -> Arc<EngineConfig> {
        crate::utils::read_unpoisoned(&self.current).clone()
    }

    /// Re-read the file. On failure the previous snapshot stays in place.
    pub fn reload(&self) -> Result<Arc<EngineConfig>, ConfigError> {
        let fresh = Arc::new(EngineConfig::from_path(&self.path)?);
        *crate::utils::write_unpoisoned(&self.current) = fresh.clone();
        tracing::debug!("Config reloaded from {}", self.path.display());
        Ok(fresh)
    }
}

/// Proxy endpoint for one identity's remote client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProxyConfig {
    pub url: String,
    pub username: Option<String>,
    pub password: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_json_uses_defaults() {
        let config: EngineConfig =
            serde_json::from_str(r#"{"follow_limit": 5, "delays": {"follow": 30}}"#).unwrap();
        assert_eq!(config.follow_limit, 5);
        assert_eq!(config.delays.follow, 30.0);
        assert_eq!(config.delays.dm, 20.0);
        assert_eq!(config.max_attempts, 3);
        assert!(config.safe_mode);
    }

    #[test]
    fn test_limits_only_for_capped_kinds() {
        let limits = EngineConfig::default().limits();
        assert_eq!(limits.limit(ActionKind::Dm), Some(50));
        assert_eq!(limits.limit(ActionKind::Like), Some(300));
        assert_eq!(limits.limit(ActionKind::StoryView), None);
        assert_eq!(limits.limit(ActionKind::Scrape), None);
    }

    #[test]
    fn test_validate_rejects_zero_attempts() {
        let config = EngineConfig {
            max_attempts: 0,
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidValue { ref field, .. }) if field == "max_attempts"
        ));
    }
}
