//! Quality gate evaluation.
//!
//! Every validator of a gate is invoked concurrently with the gate's criteria
//! and the selected artifacts. The gate passes only if every check passed;
//! a validator that cannot run is `Indeterminate` and fails the gate.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;

use crate::agents::CapabilityRegistry;
use crate::models::{
    AgentResult, CheckDetail, QualityGate, QualityGateResult, Verdict, WorkflowContext,
};

#[derive(Debug, Clone)]
pub struct QualityGateOrchestrator {
    registry: Arc<CapabilityRegistry>,
    validator_timeout: Duration,
}

impl QualityGateOrchestrator {
    pub fn new(registry: Arc<CapabilityRegistry>, validator_timeout: Duration) -> Self {
        Self {
            registry,
            validator_timeout,
        }
    }

    /// Criteria handed to validators: the gate's own, then the requirements
    /// of every cross-cutting concern the gate names.
    pub fn criteria_for(gate: &QualityGate, context: &WorkflowContext) -> Vec<String> {
        let mut criteria = gate.criteria.clone();
        for concern in &gate.concerns {
            if let Some(requirements) = context.cross_cutting.get(concern) {
                criteria.extend(requirements.iter().map(|r| format!("[{}] {}", concern, r)));
            }
        }
        criteria
    }

    /// Artifacts a gate looks at; all of them when the gate names none.
    pub fn select_artifacts(
        gate: &QualityGate,
        context: &WorkflowContext,
    ) -> BTreeMap<String, AgentResult> {
        context
            .artifacts()
            .iter()
            .filter(|(key, _)| gate.artifacts.is_empty() || gate.artifacts.contains(*key))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    pub async fn evaluate(
        &self,
        gate: &QualityGate,
        context: &WorkflowContext,
        artifacts: &BTreeMap<String, AgentResult>,
    ) -> QualityGateResult {
        let criteria = Self::criteria_for(gate, context);

        let checks = futures::future::join_all(
            gate.validators
                .iter()
                .map(|name| self.run_check(name, &criteria, artifacts)),
        )
        .await;

        let passed = !checks.is_empty() && checks.iter().all(|c| c.verdict == Verdict::Passed);

        let mut recommendations = Vec::new();
        if checks.is_empty() {
            recommendations.push(format!("Gate '{}' has no validators; add at least one", gate.name));
        }
        for check in &checks {
            match check.verdict {
                Verdict::Passed => {}
                Verdict::Failed => recommendations.push(format!(
                    "Address findings from {}: {}",
                    check.validator, check.details
                )),
                Verdict::Indeterminate => recommendations.push(format!(
                    "Re-run {} once it is available ({})",
                    check.validator, check.details
                )),
            }
        }

        if passed {
            tracing::info!(
                "[QualityGate] Gate '{}' passed ({} checks)",
                gate.name,
                checks.len()
            );
        } else {
            tracing::warn!(
                "[QualityGate] Gate '{}' failed: {}/{} checks passed",
                gate.name,
                checks.iter().filter(|c| c.verdict == Verdict::Passed).count(),
                checks.len()
            );
        }

        QualityGateResult {
            gate: gate.name.clone(),
            passed,
            checks,
            recommendations,
            evaluated_at: Utc::now(),
        }
    }

    async fn run_check(
        &self,
        name: &str,
        criteria: &[String],
        artifacts: &BTreeMap<String, AgentResult>,
    ) -> CheckDetail {
        let Some(validator) = self.registry.validator(name) else {
            return CheckDetail {
                validator: name.to_string(),
                verdict: Verdict::Indeterminate,
                details: "validator is not registered".to_string(),
            };
        };

        let outcome =
            tokio::time::timeout(self.validator_timeout, validator.validate(criteria, artifacts)).await;

        let (verdict, details) = match outcome {
            Ok(Ok(outcome)) if outcome.passed => (Verdict::Passed, outcome.details),
            Ok(Ok(outcome)) => (Verdict::Failed, outcome.details),
            Ok(Err(e)) => {
                tracing::warn!("[QualityGate] Validator {} could not run: {}", name, e);
                (Verdict::Indeterminate, e.to_string())
            }
            Err(_) => (
                Verdict::Indeterminate,
                format!(
                    "validator timed out after {}ms",
                    self.validator_timeout.as_millis()
                ),
            ),
        };

        CheckDetail {
            validator: name.to_string(),
            verdict,
            details,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::QualityValidator;
    use crate::error::AgentError;
    use crate::models::{FeatureSpec, ValidationOutcome};
    use async_trait::async_trait;

    struct Fixed(Option<bool>);

    #[async_trait]
    impl QualityValidator for Fixed {
        async fn validate(
            &self,
            criteria: &[String],
            _artifacts: &BTreeMap<String, AgentResult>,
        ) -> Result<ValidationOutcome, AgentError> {
            match self.0 {
                Some(true) => Ok(ValidationOutcome::pass(format!("{} criteria met", criteria.len()))),
                Some(false) => Ok(ValidationOutcome::fail("missing tests")),
                None => Err(AgentError::failed("validator crashed")),
            }
        }
    }

    fn orchestrator(verdicts: &[(&str, Option<bool>)]) -> QualityGateOrchestrator {
        let mut builder = CapabilityRegistry::builder();
        for (name, verdict) in verdicts {
            builder = builder.register_validator(*name, Arc::new(Fixed(*verdict)));
        }
        QualityGateOrchestrator::new(builder.build(), Duration::from_secs(5))
    }

    fn context() -> WorkflowContext {
        WorkflowContext::new(FeatureSpec::new("F", "feature"))
            .with_cross_cutting("security", &["no secrets in logs"])
    }

    #[tokio::test]
    async fn test_gate_is_and_of_checks() {
        let names = ["v1", "v2", "v3"];
        let all_pass: Vec<_> = names.iter().map(|n| (*n, Some(true))).collect();
        let gate = QualityGate::new("review", &names);
        let ctx = context();

        let result = orchestrator(&all_pass)
            .evaluate(&gate, &ctx, &BTreeMap::new())
            .await;
        assert!(result.passed);
        assert_eq!(result.passed_checks(), 3);

        for flipped in 0..names.len() {
            let verdicts: Vec<_> = names
                .iter()
                .enumerate()
                .map(|(i, n)| (*n, Some(i != flipped)))
                .collect();
            let result = orchestrator(&verdicts)
                .evaluate(&gate, &ctx, &BTreeMap::new())
                .await;
            assert!(!result.passed, "flipping {} must fail the gate", names[flipped]);
            assert_eq!(result.recommendations.len(), 1);
        }
    }

    #[tokio::test]
    async fn test_infrastructure_error_is_indeterminate() {
        let gate = QualityGate::new("review", &["ok", "broken", "ghost"]);
        let result = orchestrator(&[("ok", Some(true)), ("broken", None)])
            .evaluate(&gate, &context(), &BTreeMap::new())
            .await;
        assert!(!result.passed);
        assert_eq!(result.checks[1].verdict, Verdict::Indeterminate);
        assert_eq!(result.checks[2].verdict, Verdict::Indeterminate);
        assert_eq!(result.checks[2].details, "validator is not registered");
    }

    #[test]
    fn test_concerns_join_criteria() {
        let gate = QualityGate::new("sec", &["v"])
            .with_criterion("inputs validated")
            .with_concern("security")
            .with_concern("performance");
        let criteria = QualityGateOrchestrator::criteria_for(&gate, &context());
        assert_eq!(criteria, vec!["inputs validated", "[security] no secrets in logs"]);
    }

    #[test]
    fn test_select_artifacts() {
        let mut ctx = context();
        ctx.commit_artifact("a", AgentResult::new("x", "a")).unwrap();
        ctx.commit_artifact("b", AgentResult::new("x", "b")).unwrap();

        let all = QualityGateOrchestrator::select_artifacts(&QualityGate::new("g", &["v"]), &ctx);
        assert_eq!(all.len(), 2);

        let only_b = QualityGateOrchestrator::select_artifacts(
            &QualityGate::new("g", &["v"]).with_artifact("b"),
            &ctx,
        );
        assert_eq!(only_b.keys().collect::<Vec<_>>(), vec!["b"]);
    }
}
