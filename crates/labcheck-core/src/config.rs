//! Run configuration.
//!
//! Every field has a default, so an empty TOML file is a valid config.
//!
//! ```toml
//! parallelism = 4
//! stop_on_blocker = true
//!
//! [cache]
//! dir = ".labcheck/cache"
//!
//! [retry]
//! base_delay_ms = 2000
//! factor = 2
//! max_attempts = 3
//!
//! [device_timeouts]
//! juniper = 3.0
//!
//! [idempotency]
//! cycles = 3
//!
//! [scoring.weights]
//! P2 = 10
//! ```

use std::path::Path;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::cache::CacheConfig;
use crate::domain::{OrchestrationError, Result, Severity};
use crate::idempotency::IdempotencyConfig;
use crate::lifecycle::GradingMarkers;
use crate::pool::{DeviceTimeouts, PoolConfig, RetryPolicy};
use crate::scoring::ScoringConfig;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RunConfig {
    /// Concurrent exercise workers.
    pub parallelism: usize,
    /// Skip the rest of a phase once a check reports `blocked`.
    pub stop_on_blocker: bool,
    /// Base timeout for lifecycle commands without their own.
    pub command_timeout_secs: u64,
    pub cache: CacheConfig,
    pub retry: RetryPolicy,
    pub device_timeouts: DeviceTimeouts,
    pub idempotency: IdempotencyConfig,
    pub scoring: ScoringConfig,
    pub grading: GradingMarkers,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            parallelism: 1,
            stop_on_blocker: true,
            command_timeout_secs: 300,
            cache: CacheConfig::default(),
            retry: RetryPolicy::default(),
            device_timeouts: DeviceTimeouts::default(),
            idempotency: IdempotencyConfig::default(),
            scoring: ScoringConfig::default(),
            grading: GradingMarkers::default(),
        }
    }
}

impl RunConfig {
    pub fn from_toml_str(s: &str) -> Result<Self> {
        let config: RunConfig = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    pub fn pool_config(&self) -> PoolConfig {
        PoolConfig {
            retry: self.retry.clone(),
            device_timeouts: self.device_timeouts.clone(),
        }
    }

    /// Reject configurations the engine cannot run with.
    pub fn validate(&self) -> Result<()> {
        let invalid = |msg: String| Err(OrchestrationError::InvalidConfig(msg));

        if self.parallelism == 0 {
            return invalid("parallelism must be at least 1".into());
        }
        if self.command_timeout_secs == 0 {
            return invalid("command_timeout_secs must be positive".into());
        }
        if self.retry.max_attempts == 0 {
            return invalid("retry.max_attempts must be at least 1".into());
        }
        if self.retry.factor == 0 {
            return invalid("retry.factor must be at least 1".into());
        }
        for (class, multiplier) in self.device_timeouts.overrides() {
            if !multiplier.is_finite() || multiplier <= 0.0 {
                return invalid(format!(
                    "device_timeouts.{class} must be a positive number, got {multiplier}"
                ));
            }
        }

        let scoring = &self.scoring;
        for severity in Severity::ALL {
            let weight = scoring.weights.weight(severity);
            if !weight.is_finite() || weight < 0.0 {
                return invalid(format!("scoring weight for {severity} must be >= 0"));
            }
        }
        if !(0.0..=100.0).contains(&scoring.ready_threshold)
            || !(0.0..=100.0).contains(&scoring.conditional_threshold)
        {
            return invalid("scoring thresholds must lie within 0..=100".into());
        }
        if scoring.conditional_threshold > scoring.ready_threshold {
            return invalid("conditional_threshold must not exceed ready_threshold".into());
        }

        let patterns = self
            .idempotency
            .volatile_patterns
            .iter()
            .chain([&self.grading.pass_pattern, &self.grading.fail_pattern]);
        for pattern in patterns {
            if let Err(e) = Regex::new(pattern) {
                return invalid(format!("invalid pattern `{pattern}`: {e}"));
            }
        }

        Ok(())
    }
}
