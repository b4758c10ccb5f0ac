//! Scores registered agents against a step's requirements.
//!
//! For each requirement term (category and domain tags):
//!
//! - `+strength` if the agent lists it as a strength, otherwise
//!   `+capability` if it lists it as a capability;
//! - `-limitation_penalty` if the agent lists it as a limitation.
//!
//! Each needed output the agent produces adds `+output`. Confidence is the raw
//! score divided by the best possible score, clamped to `0.0..=1.0`.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::agents::CapabilityRegistry;
use crate::config::MatchWeights;
use crate::error::OrchestratorError;
use crate::models::AgentDescriptor;
use crate::workflow::schema::CapabilityQuery;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentSelection {
    pub primary: String,
    pub confidence: f64,
    /// Agents whose strengths cover the primary's gaps
    pub supporting: Vec<String>,
    pub rationale: String,
}

#[derive(Debug, Clone)]
struct Score {
    confidence: f64,
    matched: Vec<String>,
    uncovered: Vec<String>,
    limited: Vec<String>,
    outputs: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct CapabilityMatcher {
    registry: Arc<CapabilityRegistry>,
    weights: MatchWeights,
    min_confidence: f64,
}

impl CapabilityMatcher {
    pub fn new(registry: Arc<CapabilityRegistry>, weights: MatchWeights, min_confidence: f64) -> Self {
        Self {
            registry,
            weights,
            min_confidence,
        }
    }

    pub fn select_agent(
        &self,
        step: &str,
        requirements: &CapabilityQuery,
    ) -> Result<AgentSelection, OrchestratorError> {
        self.select_agent_excluding(step, requirements, &[])
    }

    /// Same as [`select_agent`](Self::select_agent), ignoring the named agents.
    pub fn select_agent_excluding(
        &self,
        step: &str,
        requirements: &CapabilityQuery,
        excluded: &[String],
    ) -> Result<AgentSelection, OrchestratorError> {
        let mut best: Option<(&AgentDescriptor, Score)> = None;
        for descriptor in self.registry.descriptors() {
            if excluded.iter().any(|e| e == &descriptor.name) {
                continue;
            }
            let score = self.score(descriptor, requirements);
            // Strictly greater: ties keep the earlier declaration.
            let better = match &best {
                Some((_, current)) => score.confidence > current.confidence,
                None => true,
            };
            if better {
                best = Some((descriptor, score));
            }
        }

        let Some((primary, score)) = best else {
            return Err(OrchestratorError::NoCapableAgent {
                step: step.to_string(),
                best_confidence: 0.0,
                required: self.min_confidence,
            });
        };

        if score.confidence < self.min_confidence {
            return Err(OrchestratorError::NoCapableAgent {
                step: step.to_string(),
                best_confidence: score.confidence,
                required: self.min_confidence,
            });
        }

        let supporting = self.supporting_agents(primary, &score, excluded);
        let rationale = rationale(primary, &score, requirements);

        tracing::debug!(
            "[Matcher] Step '{}' -> {} (confidence {:.2})",
            step,
            primary.name,
            score.confidence
        );

        Ok(AgentSelection {
            primary: primary.name.clone(),
            confidence: score.confidence,
            supporting,
            rationale,
        })
    }

    /// Every registered agent with its confidence, in declaration order.
    pub fn rank(&self, requirements: &CapabilityQuery) -> Vec<(String, f64)> {
        self.registry
            .descriptors()
            .map(|d| (d.name.clone(), self.score(d, requirements).confidence))
            .collect()
    }

    fn score(&self, descriptor: &AgentDescriptor, requirements: &CapabilityQuery) -> Score {
        let w = &self.weights;
        let terms = requirements.terms();
        let mut raw = 0.0;
        let mut matched = Vec::new();
        let mut uncovered = Vec::new();
        let mut limited = Vec::new();

        for term in &terms {
            if contains(&descriptor.strengths, term) {
                raw += w.strength;
                matched.push(term.clone());
            } else if contains(&descriptor.capabilities, term) {
                raw += w.capability;
                matched.push(term.clone());
            } else {
                uncovered.push(term.clone());
            }
            if contains(&descriptor.limitations, term) {
                raw -= w.limitation_penalty;
                limited.push(term.clone());
            }
        }

        let mut outputs = Vec::new();
        for output in &requirements.outputs {
            if contains(&descriptor.output_formats, output) {
                raw += w.output;
                outputs.push(output.to_lowercase());
            }
        }

        let max = terms.len() as f64 * w.strength + requirements.outputs.len() as f64 * w.output;
        let confidence = if max > 0.0 {
            (raw / max).clamp(0.0, 1.0)
        } else {
            0.0
        };

        Score {
            confidence,
            matched,
            uncovered,
            limited,
            outputs,
        }
    }

    fn supporting_agents(
        &self,
        primary: &AgentDescriptor,
        score: &Score,
        excluded: &[String],
    ) -> Vec<String> {
        let mut gaps: Vec<String> = primary.limitations.iter().map(|l| l.to_lowercase()).collect();
        for term in &score.uncovered {
            if !gaps.contains(term) {
                gaps.push(term.clone());
            }
        }
        if gaps.is_empty() {
            return Vec::new();
        }

        self.registry
            .descriptors()
            .filter(|d| d.name != primary.name && !excluded.iter().any(|e| e == &d.name))
            .filter(|d| gaps.iter().any(|gap| contains(&d.strengths, gap)))
            .map(|d| d.name.clone())
            .collect()
    }
}

fn contains(haystack: &[String], needle: &str) -> bool {
    haystack.iter().any(|h| h.eq_ignore_ascii_case(needle))
}

fn rationale(primary: &AgentDescriptor, score: &Score, requirements: &CapabilityQuery) -> String {
    let total = score.matched.len() + score.uncovered.len();
    let mut parts = vec![format!(
        "{} matched {}/{} terms",
        primary.name,
        score.matched.len(),
        total
    )];
    if !score.matched.is_empty() {
        parts[0].push_str(&format!(" ({})", score.matched.join(", ")));
    }
    if !requirements.outputs.is_empty() {
        parts.push(format!(
            "produces {}/{} outputs",
            score.outputs.len(),
            requirements.outputs.len()
        ));
    }
    if !score.limited.is_empty() {
        parts.push(format!("limited on {}", score.limited.join(", ")));
    }
    parts.push(format!("confidence {:.2}", score.confidence));
    parts.join("; ")
}
