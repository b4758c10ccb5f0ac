use serde::{Deserialize, Serialize};

/// Capability catalog entry for one agent.
///
/// Descriptors are loaded once into the [`CapabilityRegistry`](crate::agents::CapabilityRegistry)
/// and never change afterwards.
///
/// ```yaml
/// name: "backend-developer"
/// description: "Implements server-side features"
/// capabilities: [rust, api, database]
/// strengths: [implementation, backend]
/// limitations: [frontend, design]
/// output_formats: [code, migration]
/// required_inputs: [feature.acceptance_criteria, api_contract]
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct AgentDescriptor {
    /// Unique agent name
    pub name: String,

    /// What this agent does
    #[serde(default)]
    pub description: Option<String>,

    /// Domain tags the agent can work with
    #[serde(default)]
    pub capabilities: Vec<String>,

    /// Task categories the agent excels at
    #[serde(default)]
    pub strengths: Vec<String>,

    /// Task categories the agent cannot perform
    #[serde(default)]
    pub limitations: Vec<String>,

    /// Output formats the agent produces
    #[serde(default)]
    pub output_formats: Vec<String>,

    /// Context fields that must be present before the agent is invoked
    #[serde(default)]
    pub required_inputs: Vec<String>,
}

impl AgentDescriptor {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: None,
            capabilities: Vec::new(),
            strengths: Vec::new(),
            limitations: Vec::new(),
            output_formats: Vec::new(),
            required_inputs: Vec::new(),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_capabilities(mut self, tags: &[&str]) -> Self {
        self.capabilities = to_strings(tags);
        self
    }

    pub fn with_strengths(mut self, tags: &[&str]) -> Self {
        self.strengths = to_strings(tags);
        self
    }

    pub fn with_limitations(mut self, tags: &[&str]) -> Self {
        self.limitations = to_strings(tags);
        self
    }

    pub fn with_outputs(mut self, formats: &[&str]) -> Self {
        self.output_formats = to_strings(formats);
        self
    }

    pub fn with_required_inputs(mut self, fields: &[&str]) -> Self {
        self.required_inputs = to_strings(fields);
        self
    }

    /// Parse a descriptor from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self, String> {
        serde_yaml::from_str(yaml).map_err(|e| format!("Failed to parse agent descriptor YAML: {}", e))
    }
}

fn to_strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

/// What an agent hands back after a successful step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentResult {
    /// Agent that produced the result
    pub agent: String,

    /// Short human-readable summary
    pub summary: String,

    /// Structured payload (opaque to the engine, searched during enrichment)
    #[serde(default)]
    pub output: serde_json::Value,

    /// Key decisions the next agent should know about
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub decisions: Vec<String>,

    /// Known gaps or caveats in this result
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub limitations: Vec<String>,
}

impl AgentResult {
    pub fn new(agent: impl Into<String>, summary: impl Into<String>) -> Self {
        Self {
            agent: agent.into(),
            summary: summary.into(),
            output: serde_json::Value::Null,
            decisions: Vec::new(),
            limitations: Vec::new(),
        }
    }

    pub fn with_output(mut self, output: serde_json::Value) -> Self {
        self.output = output;
        self
    }

    pub fn with_decision(mut self, decision: impl Into<String>) -> Self {
        self.decisions.push(decision.into());
        self
    }

    pub fn with_limitation(mut self, limitation: impl Into<String>) -> Self {
        self.limitations.push(limitation.into());
        self
    }

    /// Look up a top-level field of the structured output.
    pub fn output_field(&self, field: &str) -> Option<&serde_json::Value> {
        self.output.as_object().and_then(|o| o.get(field))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_descriptor_yaml() {
        let yaml = r#"
name: "test-engineer"
capabilities: [testing, rust]
strengths: [testing]
limitations: [design]
output_formats: [test-report]
required_inputs: [artifacts.implement]
"#;
        let desc = AgentDescriptor::from_yaml(yaml).unwrap();
        assert_eq!(desc.name, "test-engineer");
        assert_eq!(desc.strengths, vec!["testing"]);
        assert_eq!(desc.required_inputs, vec!["artifacts.implement"]);
        assert!(desc.description.is_none());
    }

    #[test]
    fn test_output_field() {
        let result = AgentResult::new("architect", "designed the API")
            .with_output(serde_json::json!({ "api_contract": "openapi.yaml" }));
        assert_eq!(
            result.output_field("api_contract"),
            Some(&serde_json::json!("openapi.yaml"))
        );
        assert!(result.output_field("schema").is_none());
    }
}
