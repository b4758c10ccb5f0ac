use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A named multi-validator checkpoint.
///
/// ```yaml
/// name: "security-review"
/// phase: "build"                # evaluated after this phase; omit for end-of-run
/// validators: [security-reviewer, code-reviewer]
/// criteria:
///   - "no secrets in source"
///   - "inputs are validated"
/// artifacts: [implement]        # omit to hand every artifact to validators
/// concerns: [security]          # cross-cutting categories appended to criteria
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualityGate {
    pub name: String,

    /// Validators that must all pass
    pub validators: Vec<String>,

    /// Pass/fail criteria handed to every validator
    #[serde(default)]
    pub criteria: Vec<String>,

    /// Phase after which the gate runs
    #[serde(default)]
    pub phase: Option<String>,

    /// Artifact keys handed to validators (empty = all)
    #[serde(default)]
    pub artifacts: Vec<String>,

    /// Cross-cutting concern categories whose requirements join the criteria
    #[serde(default)]
    pub concerns: Vec<String>,
}

impl QualityGate {
    pub fn new(name: impl Into<String>, validators: &[&str]) -> Self {
        Self {
            name: name.into(),
            validators: validators.iter().map(|v| v.to_string()).collect(),
            criteria: Vec::new(),
            phase: None,
            artifacts: Vec::new(),
            concerns: Vec::new(),
        }
    }

    pub fn with_criterion(mut self, criterion: impl Into<String>) -> Self {
        self.criteria.push(criterion.into());
        self
    }

    pub fn after_phase(mut self, phase: impl Into<String>) -> Self {
        self.phase = Some(phase.into());
        self
    }

    pub fn with_artifact(mut self, key: impl Into<String>) -> Self {
        self.artifacts.push(key.into());
        self
    }

    pub fn with_concern(mut self, category: impl Into<String>) -> Self {
        self.concerns.push(category.into());
        self
    }
}

/// Validator contract return value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationOutcome {
    pub passed: bool,
    #[serde(default)]
    pub details: String,
}

impl ValidationOutcome {
    pub fn pass(details: impl Into<String>) -> Self {
        Self {
            passed: true,
            details: details.into(),
        }
    }

    pub fn fail(details: impl Into<String>) -> Self {
        Self {
            passed: false,
            details: details.into(),
        }
    }
}

/// Result of one validator inside a gate evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    Passed,
    Failed,
    /// The validator could not run; counts as a failure.
    Indeterminate,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckDetail {
    pub validator: String,
    pub verdict: Verdict,
    pub details: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QualityGateResult {
    pub gate: String,
    pub passed: bool,
    pub checks: Vec<CheckDetail>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub recommendations: Vec<String>,
    pub evaluated_at: DateTime<Utc>,
}

impl QualityGateResult {
    pub fn passed_checks(&self) -> usize {
        self.checks
            .iter()
            .filter(|c| c.verdict == Verdict::Passed)
            .count()
    }
}
