//! Simulated agents and validators for running workflows from the command line.
//!
//! An agents file lists descriptors with an optional `simulate` block:
//!
//! ```yaml
//! agents:
//!   - name: backend-developer
//!     strengths: [implementation, backend]
//!     output_formats: [code]
//!     simulate:
//!       delay_ms: 150
//!       provides: { api_contract: { routes: ["/login"] } }
//!       failures:
//!         implement:
//!           - { kind: context_insufficient, missing: [api_contract] }
//!       refuse_compensation: [implement]
//! validators:
//!   - { name: lint }
//!   - { name: coverage, pass: false, details: "coverage 61%" }
//! ```
//!
//! Without a file, the built-in catalog is used and every built-in agent
//! also acts as a passing validator.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};

use relay_core::agents::{AgentInvocation, CompensationRequest};
use relay_core::error::FailureKind;
use relay_core::models::{AgentDescriptor, AgentResult, ValidationOutcome};
use relay_core::{Agent, AgentError, CapabilityRegistry, QualityValidator};

// ─── File format ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AgentsFile {
    #[serde(default)]
    pub agents: Vec<AgentEntry>,
    #[serde(default)]
    pub validators: Vec<ValidatorEntry>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AgentEntry {
    #[serde(flatten)]
    pub descriptor: AgentDescriptor,
    #[serde(default)]
    pub simulate: Simulation,
}

/// Scripted behaviour of one simulated agent.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Simulation {
    /// Time every invocation takes
    #[serde(default)]
    pub delay_ms: u64,
    /// Failures to raise, per step, in order; later invocations succeed
    #[serde(default)]
    pub failures: BTreeMap<String, Vec<SimulatedFailure>>,
    /// Fields added to the output of every result
    #[serde(default)]
    pub provides: serde_json::Map<String, Value>,
    /// Steps whose compensation is refused
    #[serde(default)]
    pub refuse_compensation: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SimulatedFailure {
    pub kind: String,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub critical: bool,
    /// Missing fields, for `context_insufficient`
    #[serde(default)]
    pub missing: Vec<String>,
}

impl SimulatedFailure {
    pub fn to_error(&self) -> Result<AgentError, String> {
        let message = self
            .message
            .clone()
            .unwrap_or_else(|| format!("simulated {}", self.kind));
        let kind = match self.kind.as_str() {
            "context_insufficient" => FailureKind::ContextInsufficient {
                missing: self.missing.clone(),
            },
            "capability_mismatch" => FailureKind::CapabilityMismatch,
            "task_complexity" => FailureKind::TaskComplexity,
            "no_capable_agent" => FailureKind::NoCapableAgent,
            "timeout" => FailureKind::Timeout { after_ms: 0 },
            "execution" => FailureKind::Execution,
            other => return Err(format!("Unknown simulated failure kind '{}'", other)),
        };
        let error = AgentError::new(kind, message);
        Ok(if self.critical { error.critical() } else { error })
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ValidatorEntry {
    pub name: String,
    #[serde(default = "default_pass")]
    pub pass: bool,
    #[serde(default)]
    pub details: Option<String>,
}

fn default_pass() -> bool {
    true
}

impl AgentsFile {
    pub fn from_yaml(yaml: &str) -> Result<Self, String> {
        serde_yaml::from_str(yaml).map_err(|e| format!("Failed to parse agents YAML: {}", e))
    }

    pub fn from_file(path: &str) -> Result<Self, String> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| format!("Failed to read agents file '{}': {}", path, e))?;
        Self::from_yaml(&content)
    }

    /// The built-in catalog with no scripted behaviour.
    pub fn builtin() -> Self {
        let agents: Vec<AgentEntry> = CapabilityRegistry::builtin_descriptors()
            .into_iter()
            .map(|descriptor| AgentEntry {
                descriptor,
                simulate: Simulation::default(),
            })
            .collect();
        let validators = agents
            .iter()
            .map(|a| ValidatorEntry {
                name: a.descriptor.name.clone(),
                pass: true,
                details: None,
            })
            .collect();
        Self { agents, validators }
    }

    /// Load the given file, or fall back to the built-in catalog.
    pub fn load(path: Option<&str>) -> Result<Self, String> {
        match path {
            Some(path) => Self::from_file(path),
            None => Ok(Self::builtin()),
        }
    }

    pub fn build_registry(&self) -> Result<Arc<CapabilityRegistry>, String> {
        let mut builder = CapabilityRegistry::builder();
        for entry in &self.agents {
            let agent = ScriptedAgent::new(&entry.descriptor.name, &entry.simulate)?;
            builder = builder
                .register(entry.descriptor.clone(), Arc::new(agent))
                .map_err(|e| e.to_string())?;
        }
        for validator in &self.validators {
            builder = builder.register_validator(
                validator.name.clone(),
                Arc::new(SimulatedValidator {
                    pass: validator.pass,
                    details: validator.details.clone(),
                }),
            );
        }
        Ok(builder.build())
    }
}

// ─── Agents ────────────────────────────────────────────────────────────────

pub struct ScriptedAgent {
    name: String,
    delay: Duration,
    failures: Mutex<HashMap<String, VecDeque<AgentError>>>,
    provides: serde_json::Map<String, Value>,
    refuse_compensation: Vec<String>,
}

impl ScriptedAgent {
    pub fn new(name: &str, simulation: &Simulation) -> Result<Self, String> {
        let mut failures = HashMap::new();
        for (step, queue) in &simulation.failures {
            let errors = queue
                .iter()
                .map(|f| f.to_error())
                .collect::<Result<VecDeque<_>, _>>()?;
            failures.insert(step.clone(), errors);
        }
        Ok(Self {
            name: name.to_string(),
            delay: Duration::from_millis(simulation.delay_ms),
            failures: Mutex::new(failures),
            provides: simulation.provides.clone(),
            refuse_compensation: simulation.refuse_compensation.clone(),
        })
    }

    fn next_failure(&self, step: &str) -> Option<AgentError> {
        let mut failures = match self.failures.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        failures.get_mut(step).and_then(|queue| queue.pop_front())
    }
}

#[async_trait]
impl Agent for ScriptedAgent {
    async fn execute(&self, invocation: AgentInvocation) -> Result<AgentResult, AgentError> {
        let step = invocation.task.step.clone();
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        if let Some(error) = self.next_failure(&step) {
            tracing::debug!("[Simulation] {} fails '{}': {}", self.name, step, error);
            return Err(error);
        }

        let mut output = Value::Object(self.provides.clone());
        output["step"] = json!(step);
        if !invocation.instructions.inputs.is_empty() {
            output["inputs"] = json!(invocation.instructions.inputs);
        }

        let mut result = AgentResult::new(&self.name, format!("{} completed {}", self.name, step))
            .with_output(output)
            .with_decision(format!("{} handled by {}", step, self.name));
        if let Some(from) = &invocation.handoff.from_step {
            result = result.with_decision(format!("built on {}", from));
        }
        Ok(result)
    }

    async fn compensate(&self, request: CompensationRequest) -> Result<(), AgentError> {
        if self.refuse_compensation.contains(&request.step) {
            return Err(AgentError::failed(format!(
                "{} refused to {}",
                self.name, request.action
            )));
        }
        tracing::info!(
            "[Simulation] {} compensated '{}' ({})",
            self.name,
            request.step,
            request.action
        );
        Ok(())
    }
}

// ─── Validators ────────────────────────────────────────────────────────────

pub struct SimulatedValidator {
    pass: bool,
    details: Option<String>,
}

#[async_trait]
impl QualityValidator for SimulatedValidator {
    async fn validate(
        &self,
        criteria: &[String],
        artifacts: &BTreeMap<String, AgentResult>,
    ) -> Result<ValidationOutcome, AgentError> {
        let details = self.details.clone().unwrap_or_else(|| {
            format!(
                "checked {} criteria against {} artifacts",
                criteria.len(),
                artifacts.len()
            )
        });
        Ok(if self.pass {
            ValidationOutcome::pass(details)
        } else {
            ValidationOutcome::fail(details)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const AGENTS: &str = r#"
agents:
  - name: dev
    strengths: [implementation]
    simulate:
      provides: { api_contract: "v1" }
      failures:
        build:
          - { kind: capability_mismatch }
          - { kind: execution, critical: true, message: "disk full" }
validators:
  - { name: lint }
  - { name: coverage, pass: false }
"#;

    #[test]
    fn test_parse_agents_file() {
        let file = AgentsFile::from_yaml(AGENTS).unwrap();
        assert_eq!(file.agents.len(), 1);
        assert_eq!(file.agents[0].descriptor.strengths, vec!["implementation"]);
        assert_eq!(file.agents[0].simulate.failures["build"].len(), 2);
        assert!(file.validators[0].pass);
        assert!(!file.validators[1].pass);
    }

    #[test]
    fn test_failure_kinds() {
        let failure = SimulatedFailure {
            kind: "context_insufficient".into(),
            message: None,
            critical: false,
            missing: vec!["api_contract".into()],
        };
        let error = failure.to_error().unwrap();
        assert_eq!(error.missing_fields(), ["api_contract".to_string()]);

        let unknown = SimulatedFailure {
            kind: "meltdown".into(),
            message: None,
            critical: false,
            missing: Vec::new(),
        };
        assert!(unknown.to_error().is_err());
    }

    #[test]
    fn test_builtin_registers_validators() {
        let registry = AgentsFile::builtin().build_registry().unwrap();
        assert_eq!(registry.len(), 7);
        assert!(registry.has_validator("security-reviewer"));
    }

    #[test]
    fn test_failures_are_consumed_in_order() {
        let file = AgentsFile::from_yaml(AGENTS).unwrap();
        let agent = ScriptedAgent::new("dev", &file.agents[0].simulate).unwrap();
        assert_eq!(
            agent.next_failure("build").unwrap().kind,
            FailureKind::CapabilityMismatch
        );
        let second = agent.next_failure("build").unwrap();
        assert!(second.is_critical());
        assert_eq!(second.message, "disk full");
        assert!(agent.next_failure("build").is_none());
    }
}
