/**
 * Policy Configuration Module
 *
 * DESIGN DECISION: One TOML-loadable PolicyConfig with per-field serde
 * defaults, validated after parse
 * WHY: Every tunable the decision engine consults (budgets, windows, depth
 * limits, backoff bounds) must be overridable per deployment without
 * recompiling, and a partial TOML file must still yield a working policy
 *
 * REASONING CHAIN:
 * 1. serde(default) per field lets operators override only what they need
 * 2. deny_unknown_fields catches typos instead of silently ignoring them
 * 3. validate() rejects values that would wedge the breaker (zero windows,
 *    inverted backoff bounds, budgets outside (0, 1])
 * 4. Defaults are the shipped reference values, so PolicyConfig::default() is the
 *    reference policy
 *
 * PATTERN: Pattern-CONFIG-001 (Layered Policy Configuration)
 * RELATED: breaker.rs, cascade.rs, backoff.rs, orchestrator.rs
 *
 * # Examples
 *
 * ```rust
 * use selfheal_core::config::PolicyConfig;
 *
 * let config = PolicyConfig::from_toml_str(r#"
 *     [breaker]
 *     logic_max_attempts = 6
 *
 *     [cascade]
 *     max_cascade_depth = 5
 * "#).unwrap();
 *
 * assert_eq!(config.breaker.logic_max_attempts, 6);
 * assert_eq!(config.breaker.syntax_max_attempts, 3); // default preserved
 * ```
 */

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Breaker budgets and trend tunables
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BreakerConfig {
    pub syntax_max_attempts: u32,
    pub logic_max_attempts: u32,
    /// Error-density budget (errors per line) for the syntax side
    pub syntax_error_budget: f64,
    /// Error-density budget (errors per line) for the logic/runtime side
    pub logic_error_budget: f64,
    /// Length of the recent windows the trend predicates consult
    pub improvement_window: u32,
    /// Minimum latest confidence for a promote recommendation
    pub promotion_confidence_floor: f64,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            syntax_max_attempts: 3,
            logic_max_attempts: 10,
            syntax_error_budget: 0.03,
            logic_error_budget: 0.10,
            improvement_window: 3,
            promotion_confidence_floor: 0.85,
        }
    }
}

/// Cascade chain limits
///
/// Deployments disagree on how long an error chain is worth following;
/// 10 is the default and the value stays configurable for operators who
/// want a stricter cut.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CascadeConfig {
    pub max_cascade_depth: usize,
}

impl Default for CascadeConfig {
    fn default() -> Self {
        Self {
            max_cascade_depth: 10,
        }
    }
}

/// Backoff pacing bounds and guidance constraints
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BackoffConfig {
    pub min_ms: u64,
    pub max_ms: u64,
    /// Constraint stamped into every guidance envelope
    pub max_lines_changed: u32,
    /// Keywords the next patch must not touch
    pub disallow_keywords: Vec<String>,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            min_ms: 1_000,
            max_ms: 30_000,
            max_lines_changed: 25,
            disallow_keywords: vec![
                "database_schema_change".to_string(),
                "authentication_bypass".to_string(),
                "production_data_modification".to_string(),
            ],
        }
    }
}

/// Confidence scorer tunables
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ScorerConfig {
    /// Softmax temperature applied to incoming logits. Below 1.0 sharpens
    /// the distribution; a confidently-peaked logit set must clear the 0.95
    /// syntax admission floor, which unit temperature cannot reach
    pub temperature: f64,
    /// Bound of the rolling calibration window
    pub calibration_samples: usize,
}

impl Default for ScorerConfig {
    fn default() -> Self {
        Self {
            temperature: 0.7,
            calibration_samples: 1_000,
        }
    }
}

/// MemoryStore bounds
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StoreConfig {
    pub max_size: usize,
    /// Entries older than this are evicted lazily on every access
    pub ttl_ms: Option<u64>,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            max_size: 100,
            ttl_ms: None,
        }
    }
}

/// Per-session orchestrator thresholds
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SessionConfig {
    /// Patch JSON larger than this is flagged for a developer unseen
    pub max_patch_bytes: usize,
    /// Confidence floor for the final-polish success path
    pub polish_confidence_floor: f64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_patch_bytes: 1_000,
            polish_confidence_floor: 0.95,
        }
    }
}

/**
 * Complete policy for one orchestration deployment
 */
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default, deny_unknown_fields)]
pub struct PolicyConfig {
    pub breaker: BreakerConfig,
    pub cascade: CascadeConfig,
    pub backoff: BackoffConfig,
    pub scorer: ScorerConfig,
    pub store: StoreConfig,
    pub session: SessionConfig,
}

impl PolicyConfig {
    /// Parse from TOML text; missing sections and fields take defaults
    pub fn from_toml_str(input: &str) -> Result<Self> {
        let config: PolicyConfig = toml::from_str(input)?;
        config.validate()?;
        Ok(config)
    }

    /// Load from a TOML file (init-time only; not a session suspension point)
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let text = std::fs::read_to_string(path.as_ref())
            .map_err(|e| Error::Configuration(format!("failed to read policy file: {}", e)))?;
        Self::from_toml_str(&text)
    }

    /// Reject values that would wedge the decision engine
    pub fn validate(&self) -> Result<()> {
        if self.breaker.improvement_window == 0 {
            return Err(Error::Configuration(
                "breaker.improvement_window must be at least 1".to_string(),
            ));
        }
        for (name, budget) in [
            ("breaker.syntax_error_budget", self.breaker.syntax_error_budget),
            ("breaker.logic_error_budget", self.breaker.logic_error_budget),
        ] {
            if !(budget > 0.0 && budget <= 1.0) {
                return Err(Error::Configuration(format!(
                    "{} must be in (0, 1], got {}",
                    name, budget
                )));
            }
        }
        if !(0.0..=1.0).contains(&self.breaker.promotion_confidence_floor) {
            return Err(Error::Configuration(format!(
                "breaker.promotion_confidence_floor must be in [0, 1], got {}",
                self.breaker.promotion_confidence_floor
            )));
        }
        if self.cascade.max_cascade_depth == 0 {
            return Err(Error::Configuration(
                "cascade.max_cascade_depth must be at least 1".to_string(),
            ));
        }
        if self.backoff.min_ms == 0 || self.backoff.min_ms > self.backoff.max_ms {
            return Err(Error::Configuration(format!(
                "backoff bounds invalid: min_ms={} max_ms={}",
                self.backoff.min_ms, self.backoff.max_ms
            )));
        }
        if self.scorer.temperature <= 0.0 {
            return Err(Error::Configuration(format!(
                "scorer.temperature must be positive, got {}",
                self.scorer.temperature
            )));
        }
        if self.scorer.calibration_samples == 0 {
            return Err(Error::Configuration(
                "scorer.calibration_samples must be at least 1".to_string(),
            ));
        }
        if self.store.max_size == 0 {
            return Err(Error::Configuration(
                "store.max_size must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}
