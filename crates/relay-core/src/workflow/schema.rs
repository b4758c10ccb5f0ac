//! YAML schema types for workflow definitions.
//!
//! A workflow is an ordered list of phases. Each phase picks an execution
//! strategy and lists its steps; steps name the capability they need and the
//! steps they depend on.
//!
//! ```yaml
//! name: "User login"
//! description: "Deliver the login feature end to end"
//! version: "1.0"
//!
//! phases:
//!   - name: design
//!     strategy: sequential          # sequential | parallel | domain_chain
//!     steps:
//!       - id: design
//!         capability: { category: architecture, outputs: [api-spec], tags: [api] }
//!         compensation: discard-design
//!
//!   - name: build
//!     strategy: parallel
//!     steps:
//!       - id: backend
//!         capability: { category: implementation, outputs: [code], tags: [backend] }
//!         depends_on: [design]
//!         timeout_secs: 600
//!         estimate_secs: 300
//!       - id: frontend
//!         capability: { category: implementation, outputs: [code], tags: [frontend] }
//!         depends_on: [design]
//!
//!   - name: release
//!     strategy: domain_chain
//!     steps:
//!       - id: package
//!         capability: { category: deployment }
//!         inputs:
//!           api: design.api_contract    # <step> or <step>.<output field>
//!       - id: publish
//!         capability: { category: deployment }
//!         inputs:
//!           bundle: package
//!
//! quality_gates:
//!   - name: review
//!     phase: build
//!     validators: [code-reviewer]
//!     criteria: ["public functions are tested"]
//! ```

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::OrchestratorError;
use crate::models::QualityGate;

/// Top-level workflow definition loaded from a YAML file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowDefinition {
    /// Workflow name
    pub name: String,

    /// Optional description
    #[serde(default)]
    pub description: Option<String>,

    /// Version string
    #[serde(default = "default_version")]
    pub version: String,

    /// Phases, executed in declaration order
    pub phases: Vec<PhaseDef>,

    /// Gates merged into the context's gate list at execution start
    #[serde(default)]
    pub quality_gates: Vec<QualityGate>,
}

fn default_version() -> String {
    "1.0".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PhaseDef {
    pub name: String,

    #[serde(default)]
    pub strategy: ExecutionStrategy,

    pub steps: Vec<StepDef>,
}

/// How the steps of one phase are driven.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStrategy {
    /// One step at a time in topological order.
    #[default]
    Sequential,
    /// Independent steps grouped and run concurrently behind a barrier.
    Parallel,
    /// Declared order, with named results injected into each stage.
    DomainChain,
}

impl ExecutionStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sequential => "sequential",
            Self::Parallel => "parallel",
            Self::DomainChain => "domain_chain",
        }
    }
}

impl std::fmt::Display for ExecutionStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The capability a step needs; this is what the matcher scores against.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CapabilityQuery {
    /// Task category (e.g. "implementation", "testing")
    pub category: String,

    /// Output formats the step must produce
    #[serde(default)]
    pub outputs: Vec<String>,

    /// Domain tags (e.g. "backend", "api")
    #[serde(default)]
    pub tags: Vec<String>,
}

impl CapabilityQuery {
    pub fn new(category: impl Into<String>) -> Self {
        Self {
            category: category.into(),
            outputs: Vec::new(),
            tags: Vec::new(),
        }
    }

    pub fn with_outputs(mut self, outputs: &[&str]) -> Self {
        self.outputs = outputs.iter().map(|o| o.to_string()).collect();
        self
    }

    pub fn with_tags(mut self, tags: &[&str]) -> Self {
        self.tags = tags.iter().map(|t| t.to_string()).collect();
        self
    }

    /// Category and tags, lowercased and de-duplicated, in that order.
    pub fn terms(&self) -> Vec<String> {
        let mut terms: Vec<String> = Vec::new();
        for term in std::iter::once(&self.category).chain(self.tags.iter()) {
            let term = term.trim().to_lowercase();
            if !term.is_empty() && !terms.contains(&term) {
                terms.push(term);
            }
        }
        terms
    }
}

/// A single node of the workflow graph.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepDef {
    /// Unique step id; also the artifact key of its result
    pub id: String,

    pub capability: CapabilityQuery,

    #[serde(default)]
    pub depends_on: Vec<String>,

    /// Compensating action handed to the agent on rollback
    #[serde(default)]
    pub compensation: Option<String>,

    /// Free-form instructions for the agent
    #[serde(default)]
    pub instructions: Option<String>,

    /// Overrides the engine's default step timeout
    #[serde(default)]
    pub timeout_secs: Option<u64>,

    /// Expected duration, used for the critical-path estimate
    #[serde(default)]
    pub estimate_secs: Option<u64>,

    /// Named inputs for domain-chain stages: `name -> step` or `name -> step.field`
    #[serde(default)]
    pub inputs: BTreeMap<String, String>,
}

/// Seconds assumed for steps that declare no estimate.
pub const DEFAULT_ESTIMATE_SECS: u64 = 60;

impl StepDef {
    pub fn new(id: impl Into<String>, capability: CapabilityQuery) -> Self {
        Self {
            id: id.into(),
            capability,
            depends_on: Vec::new(),
            compensation: None,
            instructions: None,
            timeout_secs: None,
            estimate_secs: None,
            inputs: BTreeMap::new(),
        }
    }

    pub fn depends_on(mut self, ids: &[&str]) -> Self {
        self.depends_on = ids.iter().map(|d| d.to_string()).collect();
        self
    }

    pub fn with_compensation(mut self, action: impl Into<String>) -> Self {
        self.compensation = Some(action.into());
        self
    }

    pub fn with_instructions(mut self, text: impl Into<String>) -> Self {
        self.instructions = Some(text.into());
        self
    }

    pub fn with_timeout_secs(mut self, secs: u64) -> Self {
        self.timeout_secs = Some(secs);
        self
    }

    pub fn with_estimate_secs(mut self, secs: u64) -> Self {
        self.estimate_secs = Some(secs);
        self
    }

    pub fn with_input(mut self, name: impl Into<String>, reference: impl Into<String>) -> Self {
        self.inputs.insert(name.into(), reference.into());
        self
    }

    pub fn estimate(&self) -> u64 {
        self.estimate_secs.unwrap_or(DEFAULT_ESTIMATE_SECS)
    }
}

/// Split an input reference into `(step, optional output field)`.
pub fn split_input_ref(reference: &str) -> (&str, Option<&str>) {
    match reference.split_once('.') {
        Some((step, field)) => (step, Some(field)),
        None => (reference, None),
    }
}

impl WorkflowDefinition {
    /// Parse a workflow definition from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self, OrchestratorError> {
        serde_yaml::from_str(yaml).map_err(|e| {
            OrchestratorError::InvalidDefinition(format!("Failed to parse workflow YAML: {}", e))
        })
    }

    /// Load a workflow definition from a file path.
    pub fn from_file(path: &str) -> Result<Self, OrchestratorError> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            OrchestratorError::InvalidDefinition(format!(
                "Failed to read workflow file '{}': {}",
                path, e
            ))
        })?;
        Self::from_yaml(&content)
    }

    /// All steps with their phase index, in declaration order.
    pub fn steps(&self) -> impl Iterator<Item = (usize, &StepDef)> {
        self.phases
            .iter()
            .enumerate()
            .flat_map(|(i, phase)| phase.steps.iter().map(move |s| (i, s)))
    }

    pub fn step(&self, id: &str) -> Option<&StepDef> {
        self.steps().map(|(_, s)| s).find(|s| s.id == id)
    }

    pub fn step_count(&self) -> usize {
        self.phases.iter().map(|p| p.steps.len()).sum()
    }
}
