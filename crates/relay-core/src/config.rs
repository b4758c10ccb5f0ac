//! Engine configuration.
//!
//! All policy knobs live here: matching weights and threshold, retry bounds,
//! concurrency limit, timeouts, and what a failed quality gate does.
//!
//! ```yaml
//! min_confidence: 0.4
//! max_retries: 3
//! max_alternates: 2
//! concurrency_limit: 4
//! default_step_timeout_secs: 300
//! gate_failure: halt        # halt | record
//! match_weights:
//!   strength: 3.0
//!   capability: 2.0
//!   output: 1.0
//!   limitation_penalty: 4.0
//! ```

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::OrchestratorError;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Minimum matcher confidence (0.0–1.0) for an agent to be assigned.
    #[serde(default = "default_min_confidence")]
    pub min_confidence: f64,

    /// Upper bound on enhanced-retry attempts per failing step.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Upper bound on alternate agents tried per failing step.
    #[serde(default = "default_max_alternates")]
    pub max_alternates: u32,

    /// Maximum number of steps of one parallel group running at once.
    #[serde(default = "default_concurrency_limit")]
    pub concurrency_limit: usize,

    /// Timeout applied to steps that don't declare their own.
    #[serde(default = "default_step_timeout_secs")]
    pub default_step_timeout_secs: u64,

    /// What to do when a quality gate fails.
    #[serde(default)]
    pub gate_failure: GateFailurePolicy,

    #[serde(default)]
    pub match_weights: MatchWeights,
}

fn default_min_confidence() -> f64 {
    0.4
}

fn default_max_retries() -> u32 {
    3
}

fn default_max_alternates() -> u32 {
    2
}

fn default_concurrency_limit() -> usize {
    4
}

fn default_step_timeout_secs() -> u64 {
    300
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            min_confidence: default_min_confidence(),
            max_retries: default_max_retries(),
            max_alternates: default_max_alternates(),
            concurrency_limit: default_concurrency_limit(),
            default_step_timeout_secs: default_step_timeout_secs(),
            gate_failure: GateFailurePolicy::default(),
            match_weights: MatchWeights::default(),
        }
    }
}

/// Policy applied when a quality gate does not pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GateFailurePolicy {
    /// Abort the run and compensate completed steps.
    #[default]
    Halt,
    /// Record the failure in the report and keep going.
    Record,
}

/// Scoring weights for the capability matcher.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatchWeights {
    /// A requirement term found in the agent's strengths.
    #[serde(default = "default_strength_weight")]
    pub strength: f64,
    /// A requirement term found only in the agent's capabilities.
    #[serde(default = "default_capability_weight")]
    pub capability: f64,
    /// A needed output the agent can produce.
    #[serde(default = "default_output_weight")]
    pub output: f64,
    /// Subtracted for each requirement term listed as a limitation.
    #[serde(default = "default_limitation_penalty")]
    pub limitation_penalty: f64,
}

fn default_strength_weight() -> f64 {
    3.0
}

fn default_capability_weight() -> f64 {
    2.0
}

fn default_output_weight() -> f64 {
    1.0
}

fn default_limitation_penalty() -> f64 {
    4.0
}

impl Default for MatchWeights {
    fn default() -> Self {
        Self {
            strength: default_strength_weight(),
            capability: default_capability_weight(),
            output: default_output_weight(),
            limitation_penalty: default_limitation_penalty(),
        }
    }
}

impl EngineConfig {
    /// Parse a configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self, OrchestratorError> {
        let config: Self = serde_yaml::from_str(yaml)
            .map_err(|e| OrchestratorError::Config(format!("Failed to parse config YAML: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Load a configuration file.
    pub fn from_file(path: &str) -> Result<Self, OrchestratorError> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            OrchestratorError::Config(format!("Failed to read config file '{}': {}", path, e))
        })?;
        Self::from_yaml(&content)
    }

    /// Apply `RELAY_*` environment overrides on top of this configuration.
    pub fn with_env_overrides(mut self) -> Result<Self, OrchestratorError> {
        if let Some(v) = env_parse::<usize>("RELAY_CONCURRENCY_LIMIT")? {
            self.concurrency_limit = v;
        }
        if let Some(v) = env_parse::<f64>("RELAY_MIN_CONFIDENCE")? {
            self.min_confidence = v;
        }
        if let Some(v) = env_parse::<u32>("RELAY_MAX_RETRIES")? {
            self.max_retries = v;
        }
        if let Some(v) = env_parse::<u64>("RELAY_STEP_TIMEOUT_SECS")? {
            self.default_step_timeout_secs = v;
        }
        self.validate()?;
        Ok(self)
    }

    pub fn validate(&self) -> Result<(), OrchestratorError> {
        if !(0.0..=1.0).contains(&self.min_confidence) {
            return Err(OrchestratorError::Config(format!(
                "min_confidence must be within 0.0..=1.0, got {}",
                self.min_confidence
            )));
        }
        if self.concurrency_limit == 0 {
            return Err(OrchestratorError::Config(
                "concurrency_limit must be at least 1".to_string(),
            ));
        }
        if self.default_step_timeout_secs == 0 {
            return Err(OrchestratorError::Config(
                "default_step_timeout_secs must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    pub fn default_step_timeout(&self) -> Duration {
        Duration::from_secs(self.default_step_timeout_secs)
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Result<Option<T>, OrchestratorError> {
    match std::env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|_| OrchestratorError::Config(format!("Invalid value for {}: '{}'", key, raw))),
        Err(_) => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_from_empty_yaml() {
        let config = EngineConfig::from_yaml("{}").unwrap();
        assert_eq!(config.max_retries, 3);
        assert_eq!(config.concurrency_limit, 4);
        assert_eq!(config.gate_failure, GateFailurePolicy::Halt);
        assert_eq!(config.match_weights.strength, 3.0);
    }

    #[test]
    fn test_partial_yaml() {
        let yaml = r#"
min_confidence: 0.25
gate_failure: record
match_weights:
  limitation_penalty: 10.0
"#;
        let config = EngineConfig::from_yaml(yaml).unwrap();
        assert_eq!(config.min_confidence, 0.25);
        assert_eq!(config.gate_failure, GateFailurePolicy::Record);
        assert_eq!(config.match_weights.limitation_penalty, 10.0);
        assert_eq!(config.match_weights.output, 1.0);
    }

    #[test]
    fn test_rejects_out_of_range_confidence() {
        let err = EngineConfig::from_yaml("min_confidence: 1.5").unwrap_err();
        assert!(err.to_string().contains("min_confidence"));
    }

    #[test]
    fn test_rejects_zero_concurrency() {
        assert!(EngineConfig::from_yaml("concurrency_limit: 0").is_err());
    }
}
