//! Monitor configuration: TOML-backed, validated once at startup.
//!
//! [`MonitorConfig`] is immutable after load. A polling cycle reads one
//! `Arc<MonitorConfig>` from start to finish, so a reload only affects the
//! next cycle.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::artifact::ArtifactKind;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("invalid TOML: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("{field} must be within [0, 1], got {value}")]
    OutOfUnitRange { field: &'static str, value: f64 },
    #[error("{0} must be greater than zero")]
    Zero(&'static str),
    #[error("cooldown of {0:?} is too large")]
    CooldownTooLarge(Duration),
    #[error("requirement ID list contains an empty entry")]
    EmptyRequirementId,
}

/// Weights applied to each field's change when scoring significance.
///
/// State and priority share the `state` weight.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FieldWeights {
    pub title: f64,
    pub description: f64,
    pub state: f64,
}

impl Default for FieldWeights {
    fn default() -> Self {
        Self {
            title: 0.8,
            description: 0.6,
            state: 0.2,
        }
    }
}

/// Delay growth between retry attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Backoff {
    Fixed,
    /// `delay * 2^attempt`.
    Exponential,
}

/// How often and how patiently a network call is retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first one. Always at least 1.
    pub attempts: u32,
    pub delay: Duration,
    pub backoff: Backoff,
}

impl RetryPolicy {
    /// Single attempt, no waiting.
    pub const fn none() -> Self {
        Self {
            attempts: 1,
            delay: Duration::ZERO,
            backoff: Backoff::Fixed,
        }
    }

    /// Wait before retrying after failed attempt number `attempt` (0-based).
    pub fn delay_after(&self, attempt: u32) -> Duration {
        match self.backoff {
            Backoff::Fixed => self.delay,
            Backoff::Exponential => self.delay.saturating_mul(2u32.saturating_pow(attempt)),
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            delay: Duration::from_secs(5),
            backoff: Backoff::Exponential,
        }
    }
}

/// Validated, process-wide monitor configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct MonitorConfig {
    pub poll_interval: Duration,
    pub significance_threshold: f64,
    /// Cap on change-triggered re-extractions per requirement. 0 = unlimited.
    pub max_changes_per_requirement: u32,
    pub cooldown: Duration,
    pub field_weights: FieldWeights,
    pub skip_duplicate_check: bool,
    pub manual_override_enabled: bool,
    pub auto_extract_new: bool,
    pub enable_change_based_extraction: bool,
    pub max_concurrent_syncs: usize,
    /// Consecutive failures after which a requirement is flagged.
    pub error_flag_threshold: u32,
    pub history_limit: usize,
    pub artifact_kind: ArtifactKind,
    pub upload: bool,
    pub retry: RetryPolicy,
    pub requirement_ids: Vec<String>,
    pub state_dir: PathBuf,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        // Defaults live on the raw form so file and code agree.
        RawConfig::default().into_config()
    }
}

impl MonitorConfig {
    /// Parse and validate a TOML document.
    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        let raw: RawConfig = toml::from_str(s)?;
        raw.validate()
    }

    /// Read, parse, and validate a TOML file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config = Self::from_toml_str(&text)?;
        tracing::debug!(
            path = %path.display(),
            requirements = config.requirement_ids.len(),
            threshold = config.significance_threshold,
            "loaded monitor config"
        );
        Ok(config)
    }
}

/// On-disk configuration shape. Every field has a default.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RawConfig {
    pub poll_interval_secs: u64,
    pub significance_threshold: f64,
    pub max_changes_per_requirement: u32,
    pub cooldown_secs: u64,
    pub field_weights: FieldWeights,
    pub skip_duplicate_check: bool,
    pub manual_override_enabled: bool,
    pub auto_extract_new: bool,
    pub enable_change_based_extraction: bool,
    pub max_concurrent_syncs: usize,
    pub error_flag_threshold: u32,
    pub history_limit: usize,
    pub artifact_kind: ArtifactKind,
    pub upload: bool,
    pub retry: RawRetry,
    pub requirement_ids: Vec<String>,
    pub state_dir: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RawRetry {
    pub attempts: u32,
    pub delay_secs: u64,
    pub backoff: Backoff,
}

impl Default for RawRetry {
    fn default() -> Self {
        let policy = RetryPolicy::default();
        Self {
            attempts: policy.attempts,
            delay_secs: policy.delay.as_secs(),
            backoff: policy.backoff,
        }
    }
}

impl Default for RawConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: 1800,
            significance_threshold: 0.4,
            max_changes_per_requirement: 5,
            cooldown_secs: 3600,
            field_weights: FieldWeights::default(),
            skip_duplicate_check: false,
            manual_override_enabled: true,
            auto_extract_new: true,
            enable_change_based_extraction: true,
            max_concurrent_syncs: 1,
            error_flag_threshold: 3,
            history_limit: 20,
            artifact_kind: ArtifactKind::UserStory,
            upload: true,
            retry: RawRetry::default(),
            requirement_ids: Vec::new(),
            state_dir: PathBuf::from(".reqwatch"),
        }
    }
}

impl RawConfig {
    pub fn validate(self) -> Result<MonitorConfig, ConfigError> {
        self.check()?;
        Ok(self.into_config())
    }

    fn check(&self) -> Result<(), ConfigError> {
        unit_range("significance_threshold", self.significance_threshold)?;
        unit_range("field_weights.title", self.field_weights.title)?;
        unit_range("field_weights.description", self.field_weights.description)?;
        unit_range("field_weights.state", self.field_weights.state)?;

        if self.poll_interval_secs == 0 {
            return Err(ConfigError::Zero("poll_interval_secs"));
        }
        if self.max_concurrent_syncs == 0 {
            return Err(ConfigError::Zero("max_concurrent_syncs"));
        }
        if self.error_flag_threshold == 0 {
            return Err(ConfigError::Zero("error_flag_threshold"));
        }
        if self.history_limit == 0 {
            return Err(ConfigError::Zero("history_limit"));
        }
        if self.retry.attempts == 0 {
            return Err(ConfigError::Zero("retry.attempts"));
        }

        let cooldown = Duration::from_secs(self.cooldown_secs);
        if chrono::TimeDelta::from_std(cooldown).is_err() {
            return Err(ConfigError::CooldownTooLarge(cooldown));
        }

        if self.requirement_ids.iter().any(|id| id.trim().is_empty()) {
            return Err(ConfigError::EmptyRequirementId);
        }
        Ok(())
    }

    fn into_config(self) -> MonitorConfig {
        MonitorConfig {
            poll_interval: Duration::from_secs(self.poll_interval_secs),
            significance_threshold: self.significance_threshold,
            max_changes_per_requirement: self.max_changes_per_requirement,
            cooldown: Duration::from_secs(self.cooldown_secs),
            field_weights: self.field_weights,
            skip_duplicate_check: self.skip_duplicate_check,
            manual_override_enabled: self.manual_override_enabled,
            auto_extract_new: self.auto_extract_new,
            enable_change_based_extraction: self.enable_change_based_extraction,
            max_concurrent_syncs: self.max_concurrent_syncs,
            error_flag_threshold: self.error_flag_threshold,
            history_limit: self.history_limit,
            artifact_kind: self.artifact_kind,
            upload: self.upload,
            retry: RetryPolicy {
                attempts: self.retry.attempts,
                delay: Duration::from_secs(self.retry.delay_secs),
                backoff: self.retry.backoff,
            },
            requirement_ids: self
                .requirement_ids
                .into_iter()
                .map(|id| id.trim().to_string())
                .collect(),
            state_dir: self.state_dir,
        }
    }
}

fn unit_range(field: &'static str, value: f64) -> Result<(), ConfigError> {
    // NaN fails the range check too.
    if (0.0..=1.0).contains(&value) {
        Ok(())
    } else {
        Err(ConfigError::OutOfUnitRange { field, value })
    }
}
