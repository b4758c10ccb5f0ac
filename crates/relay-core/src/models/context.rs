//! The single mutable state object threaded through
//! one execution.
//!
//! Field paths understood by [`WorkflowContext::has_field`]:
//!
//! | path | present when |
//! |---|---|
//! | `feature`, `feature.id`, `feature.description` | non-empty |
//! | `feature.acceptance_criteria` | at least one criterion |
//! | `domain_constraints` | at least one constraint |
//! | `domain_constraints.<key>` | the key exists |
//! | `artifacts.<step>` | the step's result was committed |
//! | `cross_cutting.<category>` | the category has requirements |
//! | `<key>` | a domain constraint named `<key>` exists |
//!
//! Any path is also satisfied by a supplement stored under that exact path.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::OrchestratorError;
use crate::models::agent::AgentResult;
use crate::models::gate::QualityGate;

/// The feature being delivered. Read-only once the context exists.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeatureSpec {
    pub id: String,
    pub description: String,
    #[serde(default)]
    pub acceptance_criteria: Vec<String>,
}

impl FeatureSpec {
    pub fn new(id: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            description: description.into(),
            acceptance_criteria: Vec::new(),
        }
    }

    pub fn with_criterion(mut self, criterion: impl Into<String>) -> Self {
        self.acceptance_criteria.push(criterion.into());
        self
    }
}

/// What happened to the context when its execution ended.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ContextDisposition {
    #[default]
    Active,
    Archived,
    RetainedFailed { reason: String },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowContext {
    feature: FeatureSpec,

    /// Workflow-specific requirements; only checked for presence.
    #[serde(default)]
    pub domain_constraints: serde_json::Map<String, serde_json::Value>,

    #[serde(default)]
    artifacts: BTreeMap<String, AgentResult>,

    #[serde(default)]
    pub quality_gates: Vec<QualityGate>,

    /// Requirement lists by category (security, performance, testing, ...).
    #[serde(default)]
    pub cross_cutting: BTreeMap<String, Vec<String>>,

    /// Fields added while recovering from context failures.
    #[serde(default)]
    supplements: BTreeMap<String, serde_json::Value>,

    #[serde(default)]
    disposition: ContextDisposition,
}

impl WorkflowContext {
    pub fn new(feature: FeatureSpec) -> Self {
        Self {
            feature,
            domain_constraints: serde_json::Map::new(),
            artifacts: BTreeMap::new(),
            quality_gates: Vec::new(),
            cross_cutting: BTreeMap::new(),
            supplements: BTreeMap::new(),
            disposition: ContextDisposition::Active,
        }
    }

    pub fn with_constraint(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.domain_constraints.insert(key.into(), value);
        self
    }

    pub fn with_cross_cutting(mut self, category: impl Into<String>, requirements: &[&str]) -> Self {
        self.cross_cutting.insert(
            category.into(),
            requirements.iter().map(|r| r.to_string()).collect(),
        );
        self
    }

    pub fn with_quality_gate(mut self, gate: QualityGate) -> Self {
        self.quality_gates.push(gate);
        self
    }

    pub fn feature(&self) -> &FeatureSpec {
        &self.feature
    }

    pub fn artifacts(&self) -> &BTreeMap<String, AgentResult> {
        &self.artifacts
    }

    pub fn artifact(&self, key: &str) -> Option<&AgentResult> {
        self.artifacts.get(key)
    }

    /// Write a step's result. Each key can be written once per execution.
    pub fn commit_artifact(&mut self, key: &str, result: AgentResult) -> Result<(), OrchestratorError> {
        if self.artifacts.contains_key(key) {
            return Err(OrchestratorError::ArtifactConflict(key.to_string()));
        }
        self.artifacts.insert(key.to_string(), result);
        Ok(())
    }

    pub fn supplements(&self) -> &BTreeMap<String, serde_json::Value> {
        &self.supplements
    }

    /// Add an enrichment field. Existing values are kept; returns whether
    /// the field was newly added.
    pub fn supplement(&mut self, field: impl Into<String>, value: serde_json::Value) -> bool {
        let field = field.into();
        if self.supplements.contains_key(&field) {
            return false;
        }
        self.supplements.insert(field, value);
        true
    }

    pub fn disposition(&self) -> &ContextDisposition {
        &self.disposition
    }

    pub fn mark_archived(&mut self) {
        self.disposition = ContextDisposition::Archived;
    }

    pub fn mark_failed(&mut self, reason: impl Into<String>) {
        self.disposition = ContextDisposition::RetainedFailed {
            reason: reason.into(),
        };
    }

    /// Whether a field path is satisfied. See the module docs for paths.
    pub fn has_field(&self, path: &str) -> bool {
        if self.supplements.contains_key(path) {
            return true;
        }
        let (head, rest) = match path.split_once('.') {
            Some((head, rest)) => (head, Some(rest)),
            None => (path, None),
        };

        match (head, rest) {
            ("feature", None) => !self.feature.id.is_empty(),
            ("feature", Some("id")) => !self.feature.id.is_empty(),
            ("feature", Some("description")) => !self.feature.description.trim().is_empty(),
            ("feature", Some("acceptance_criteria")) => !self.feature.acceptance_criteria.is_empty(),
            ("domain_constraints", None) => !self.domain_constraints.is_empty(),
            ("domain_constraints", Some(key)) => self.domain_constraints.contains_key(key),
            ("artifacts", Some(step)) => self.artifacts.contains_key(step),
            ("cross_cutting", Some(category)) => self
                .cross_cutting
                .get(category)
                .map(|reqs| !reqs.is_empty())
                .unwrap_or(false),
            _ => self.domain_constraints.contains_key(path),
        }
    }

    /// Every path in `required` that is not satisfied, in input order.
    pub fn missing_fields(&self, required: &[String]) -> Vec<String> {
        required
            .iter()
            .filter(|field| !self.has_field(field))
            .cloned()
            .collect()
    }

    /// Search committed artifacts, in key order, for a top-level output field
    /// with the given name. Returns the artifact key it was found under.
    pub fn find_in_artifacts(&self, field: &str) -> Option<(String, serde_json::Value)> {
        self.artifacts.iter().find_map(|(key, result)| {
            result
                .output_field(field)
                .map(|value| (key.clone(), value.clone()))
        })
    }
}
