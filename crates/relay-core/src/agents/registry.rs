//! The catalog of agents and validators.
//!
//! Built once through [`RegistryBuilder`], then frozen behind an `Arc` and
//! shared read-only by every component of every execution.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use serde::Deserialize;

use crate::agents::{Agent, QualityValidator};
use crate::error::OrchestratorError;
use crate::models::AgentDescriptor;

struct RegisteredAgent {
    descriptor: AgentDescriptor,
    executor: Arc<dyn Agent>,
}

/// Immutable catalog: descriptors in declaration order, their executors, and
/// named quality validators.
pub struct CapabilityRegistry {
    agents: Vec<RegisteredAgent>,
    index: HashMap<String, usize>,
    validators: HashMap<String, Arc<dyn QualityValidator>>,
}

impl std::fmt::Debug for CapabilityRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CapabilityRegistry")
            .field("agents", &self.agents.iter().map(|a| &a.descriptor.name).collect::<Vec<_>>())
            .field("validators", &self.validators.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl CapabilityRegistry {
    pub fn builder() -> RegistryBuilder {
        RegistryBuilder::default()
    }

    /// Descriptors in declaration order.
    pub fn descriptors(&self) -> impl Iterator<Item = &AgentDescriptor> {
        self.agents.iter().map(|a| &a.descriptor)
    }

    pub fn descriptor(&self, name: &str) -> Option<&AgentDescriptor> {
        self.index.get(name).map(|&i| &self.agents[i].descriptor)
    }

    pub fn agent(&self, name: &str) -> Option<Arc<dyn Agent>> {
        self.index
            .get(name)
            .map(|&i| Arc::clone(&self.agents[i].executor))
    }

    pub fn validator(&self, name: &str) -> Option<Arc<dyn QualityValidator>> {
        self.validators.get(name).cloned()
    }

    pub fn has_validator(&self, name: &str) -> bool {
        self.validators.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.agents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.agents.is_empty()
    }

    /// Built-in descriptor catalog for a typical feature-delivery team.
    pub fn builtin_descriptors() -> Vec<AgentDescriptor> {
        vec![
            AgentDescriptor::new("architect")
                .with_description("Designs system structure and API contracts")
                .with_capabilities(&["api", "database", "backend", "frontend"])
                .with_strengths(&["architecture", "design"])
                .with_limitations(&["implementation", "deployment"])
                .with_outputs(&["api-spec", "design-doc", "schema"])
                .with_required_inputs(&["feature.description"]),
            AgentDescriptor::new("backend-developer")
                .with_description("Implements server-side features")
                .with_capabilities(&["api", "database", "rust", "migration"])
                .with_strengths(&["implementation", "backend"])
                .with_limitations(&["frontend", "design"])
                .with_outputs(&["code", "migration"])
                .with_required_inputs(&["feature.acceptance_criteria"]),
            AgentDescriptor::new("frontend-developer")
                .with_description("Implements user interfaces")
                .with_capabilities(&["ui", "css", "typescript", "accessibility"])
                .with_strengths(&["implementation", "frontend"])
                .with_limitations(&["backend", "database"])
                .with_outputs(&["code", "component"])
                .with_required_inputs(&["feature.acceptance_criteria"]),
            AgentDescriptor::new("test-engineer")
                .with_description("Writes and runs test suites")
                .with_capabilities(&["backend", "frontend", "e2e", "integration"])
                .with_strengths(&["testing", "verification"])
                .with_limitations(&["design"])
                .with_outputs(&["test-report", "code"]),
            AgentDescriptor::new("security-reviewer")
                .with_description("Audits changes for security issues")
                .with_capabilities(&["authentication", "authorization", "secrets", "backend"])
                .with_strengths(&["security", "review"])
                .with_limitations(&["implementation"])
                .with_outputs(&["review-report"]),
            AgentDescriptor::new("performance-reviewer")
                .with_description("Profiles and reviews hot paths")
                .with_capabilities(&["database", "caching", "backend"])
                .with_strengths(&["performance", "review"])
                .with_limitations(&["design"])
                .with_outputs(&["review-report", "benchmark"]),
            AgentDescriptor::new("code-reviewer")
                .with_description("Reviews code quality and maintainability")
                .with_capabilities(&["backend", "frontend", "rust", "typescript"])
                .with_strengths(&["review", "quality"])
                .with_limitations(&["deployment"])
                .with_outputs(&["review-report"]),
        ]
    }
}

/// Collects descriptors, executors and validators before freezing them.
#[derive(Default)]
pub struct RegistryBuilder {
    agents: Vec<RegisteredAgent>,
    index: HashMap<String, usize>,
    validators: HashMap<String, Arc<dyn QualityValidator>>,
}

impl RegistryBuilder {
    /// Register an agent. Names must be unique; declaration order is kept
    /// and breaks matcher ties.
    pub fn register(
        mut self,
        descriptor: AgentDescriptor,
        executor: Arc<dyn Agent>,
    ) -> Result<Self, OrchestratorError> {
        if descriptor.name.trim().is_empty() {
            return Err(OrchestratorError::Config(
                "agent descriptor has an empty name".to_string(),
            ));
        }
        if self.index.contains_key(&descriptor.name) {
            return Err(OrchestratorError::Config(format!(
                "agent '{}' is registered twice",
                descriptor.name
            )));
        }
        tracing::debug!("[Registry] Registered agent: {}", descriptor.name);
        self.index.insert(descriptor.name.clone(), self.agents.len());
        self.agents.push(RegisteredAgent {
            descriptor,
            executor,
        });
        Ok(self)
    }

    pub fn register_validator(
        mut self,
        name: impl Into<String>,
        validator: Arc<dyn QualityValidator>,
    ) -> Self {
        let name = name.into();
        tracing::debug!("[Registry] Registered validator: {}", name);
        self.validators.insert(name, validator);
        self
    }

    pub fn build(self) -> Arc<CapabilityRegistry> {
        tracing::info!(
            "[Registry] Capability registry ready: {} agents, {} validators",
            self.agents.len(),
            self.validators.len()
        );
        Arc::new(CapabilityRegistry {
            agents: self.agents,
            index: self.index,
            validators: self.validators,
        })
    }
}

#[derive(Deserialize)]
struct DescriptorFile {
    agents: Vec<AgentDescriptor>,
}

/// Parse a descriptor catalog: either a list or a map with an `agents` list.
pub fn descriptors_from_yaml(yaml: &str) -> Result<Vec<AgentDescriptor>, OrchestratorError> {
    if let Ok(list) = serde_yaml::from_str::<Vec<AgentDescriptor>>(yaml) {
        return Ok(list);
    }
    serde_yaml::from_str::<DescriptorFile>(yaml)
        .map(|file| file.agents)
        .map_err(|e| OrchestratorError::Config(format!("Failed to parse agent catalog YAML: {}", e)))
}

/// Load a descriptor catalog from a YAML file.
pub fn descriptors_from_file(path: &Path) -> Result<Vec<AgentDescriptor>, OrchestratorError> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        OrchestratorError::Config(format!(
            "Failed to read agent catalog '{}': {}",
            path.display(),
            e
        ))
    })?;
    let descriptors = descriptors_from_yaml(&content)?;
    tracing::info!(
        "[Registry] Loaded {} agent descriptors from '{}'",
        descriptors.len(),
        path.display()
    );
    Ok(descriptors)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::AgentInvocation;
    use crate::error::AgentError;
    use crate::models::AgentResult;
    use async_trait::async_trait;

    struct Noop;

    #[async_trait]
    impl Agent for Noop {
        async fn execute(&self, invocation: AgentInvocation) -> Result<AgentResult, AgentError> {
            Ok(AgentResult::new(invocation.agent, "ok"))
        }
    }

    #[test]
    fn test_builtin_descriptors() {
        let builtins = CapabilityRegistry::builtin_descriptors();
        assert_eq!(builtins.len(), 7);
        assert!(builtins.iter().any(|d| d.name == "architect"));
        assert!(builtins.iter().any(|d| d.name == "test-engineer"));
        assert!(builtins.iter().all(|d| !d.strengths.is_empty()));
    }

    #[test]
    fn test_rejects_duplicate_names() {
        let result = CapabilityRegistry::builder()
            .register(AgentDescriptor::new("a"), Arc::new(Noop))
            .and_then(|b| b.register(AgentDescriptor::new("a"), Arc::new(Noop)));
        assert!(matches!(result, Err(OrchestratorError::Config(msg)) if msg.contains("twice")));
    }

    #[test]
    fn test_lookup_keeps_declaration_order() {
        let registry = CapabilityRegistry::builder()
            .register(AgentDescriptor::new("b"), Arc::new(Noop))
            .unwrap()
            .register(AgentDescriptor::new("a"), Arc::new(Noop))
            .unwrap()
            .build();
        let names: Vec<_> = registry.descriptors().map(|d| d.name.as_str()).collect();
        assert_eq!(names, vec!["b", "a"]);
        assert!(registry.agent("a").is_some());
        assert!(registry.agent("c").is_none());
        assert!(!registry.has_validator("a"));
    }

    #[test]
    fn test_descriptors_from_yaml_both_shapes() {
        let list = "- name: a\n  strengths: [testing]\n- name: b\n";
        assert_eq!(descriptors_from_yaml(list).unwrap().len(), 2);

        let map = "agents:\n  - name: a\n";
        assert_eq!(descriptors_from_yaml(map).unwrap()[0].name, "a");

        assert!(descriptors_from_yaml("agents: 3").is_err());
    }
}
