//! Dependency graph over the steps of a workflow definition.
//!
//! Edges come from `depends_on`, from domain-chain input references, and from
//! the declared order of domain-chain stages (each stage follows the previous
//! one). Phases themselves run in order, so a step may depend on anything in
//! its own or an earlier phase, never a later one.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::error::OrchestratorError;
use crate::workflow::schema::{split_input_ref, ExecutionStrategy, WorkflowDefinition};

#[derive(Debug, Clone)]
pub struct GraphNode {
    pub id: String,
    pub phase: usize,
    /// Effective predecessors (explicit and implied)
    pub deps: Vec<String>,
    pub estimate_secs: u64,
}

/// Longest estimated dependency chain.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CriticalPath {
    pub steps: Vec<String>,
    pub estimated_secs: u64,
}

#[derive(Debug, Clone)]
pub struct DependencyGraph {
    nodes: Vec<GraphNode>,
    index: HashMap<String, usize>,
}

impl DependencyGraph {
    /// Build and validate the graph. Fails with `CyclicDependency` or
    /// `InvalidDefinition` before anything runs.
    pub fn build(definition: &WorkflowDefinition) -> Result<Self, OrchestratorError> {
        let mut nodes = Vec::new();
        let mut index = HashMap::new();

        for (phase_idx, step) in definition.steps() {
            if step.id.trim().is_empty() {
                return Err(OrchestratorError::InvalidDefinition(format!(
                    "phase '{}' contains a step with an empty id",
                    definition.phases[phase_idx].name
                )));
            }
            if index.insert(step.id.clone(), nodes.len()).is_some() {
                return Err(OrchestratorError::InvalidDefinition(format!(
                    "duplicate step id '{}'",
                    step.id
                )));
            }
            nodes.push(GraphNode {
                id: step.id.clone(),
                phase: phase_idx,
                deps: Vec::new(),
                estimate_secs: step.estimate(),
            });
        }

        for phase in &definition.phases {
            let mut previous_stage: Option<&str> = None;
            for step in &phase.steps {
                let mut deps: Vec<String> = Vec::new();
                let mut push = |dep: &str| {
                    if !deps.iter().any(|d| d == dep) {
                        deps.push(dep.to_string());
                    }
                };

                for dep in &step.depends_on {
                    if !index.contains_key(dep) {
                        return Err(OrchestratorError::InvalidDefinition(format!(
                            "step '{}' depends on unknown step '{}'",
                            step.id, dep
                        )));
                    }
                    push(dep);
                }

                for (name, reference) in &step.inputs {
                    let (source, _) = split_input_ref(reference);
                    if !index.contains_key(source) {
                        return Err(OrchestratorError::InvalidDefinition(format!(
                            "input '{}' of step '{}' references unknown step '{}'",
                            name, step.id, source
                        )));
                    }
                    push(source);
                }

                if phase.strategy == ExecutionStrategy::DomainChain {
                    if let Some(prev) = previous_stage {
                        push(prev);
                    }
                    previous_stage = Some(step.id.as_str());
                }

                nodes[index[&step.id]].deps = deps;
            }
        }

        let graph = Self { nodes, index };

        if let Some(cycle) = graph.detect_cycle() {
            return Err(OrchestratorError::CyclicDependency { cycle });
        }
        graph.check_ordering(definition)?;

        Ok(graph)
    }

    /// Depth-first search with a visiting set. Returns the first cycle found as
    /// a path that starts and ends on the same step.
    pub fn detect_cycle(&self) -> Option<Vec<String>> {
        let mut visiting: HashSet<usize> = HashSet::new();
        let mut visited: HashSet<usize> = HashSet::new();
        let mut path: Vec<usize> = Vec::new();

        for start in 0..self.nodes.len() {
            if visited.contains(&start) {
                continue;
            }
            if let Some(cycle) = self.visit(start, &mut visiting, &mut visited, &mut path) {
                return Some(cycle);
            }
        }
        None
    }

    fn visit(
        &self,
        node: usize,
        visiting: &mut HashSet<usize>,
        visited: &mut HashSet<usize>,
        path: &mut Vec<usize>,
    ) -> Option<Vec<String>> {
        visiting.insert(node);
        path.push(node);

        for dep in &self.nodes[node].deps {
            let next = self.index[dep];
            if visiting.contains(&next) {
                let start = path.iter().position(|&n| n == next).unwrap_or(0);
                let mut cycle: Vec<String> = path[start..]
                    .iter()
                    .map(|&n| self.nodes[n].id.clone())
                    .collect();
                cycle.push(self.nodes[next].id.clone());
                return Some(cycle);
            }
            if !visited.contains(&next) {
                if let Some(cycle) = self.visit(next, visiting, visited, path) {
                    return Some(cycle);
                }
            }
        }

        path.pop();
        visiting.remove(&node);
        visited.insert(node);
        None
    }

    /// Dependencies must not point at a later phase, and inside a domain
    /// chain only at an earlier stage.
    fn check_ordering(&self, definition: &WorkflowDefinition) -> Result<(), OrchestratorError> {
        for (phase_idx, phase) in definition.phases.iter().enumerate() {
            for (pos, step) in phase.steps.iter().enumerate() {
                for dep in &self.nodes[self.index[&step.id]].deps {
                    let dep_phase = self.nodes[self.index[dep]].phase;
                    if dep_phase > phase_idx {
                        return Err(OrchestratorError::InvalidDefinition(format!(
                            "step '{}' in phase '{}' depends on '{}' from a later phase '{}'",
                            step.id, phase.name, dep, definition.phases[dep_phase].name
                        )));
                    }
                    if phase.strategy == ExecutionStrategy::DomainChain && dep_phase == phase_idx {
                        let dep_pos = phase.steps.iter().position(|s| &s.id == dep).unwrap_or(pos);
                        if dep_pos >= pos {
                            return Err(OrchestratorError::InvalidDefinition(format!(
                                "domain-chain stage '{}' consumes '{}', which is not an earlier stage",
                                step.id, dep
                            )));
                        }
                    }
                }
            }
        }
        Ok(())
    }

    pub fn node(&self, id: &str) -> Option<&GraphNode> {
        self.index.get(id).map(|&i| &self.nodes[i])
    }

    pub fn dependencies(&self, id: &str) -> &[String] {
        self.node(id).map(|n| n.deps.as_slice()).unwrap_or(&[])
    }

    /// Steps that list `id` as a predecessor, in declaration order.
    pub fn dependents(&self, id: &str) -> Vec<&str> {
        self.nodes
            .iter()
            .filter(|n| n.deps.iter().any(|d| d == id))
            .map(|n| n.id.as_str())
            .collect()
    }

    /// Stable topological order of `ids`; ties go to declaration order.
    /// Predecessors outside `ids` are treated as already satisfied.
    pub fn topological_order(&self, ids: &[String]) -> Vec<String> {
        let members: HashSet<&str> = ids.iter().map(|s| s.as_str()).collect();
        let mut done: HashSet<&str> = HashSet::new();
        let mut order = Vec::with_capacity(ids.len());

        while order.len() < ids.len() {
            let next = ids.iter().find(|id| {
                !done.contains(id.as_str())
                    && self
                        .dependencies(id)
                        .iter()
                        .all(|d| !members.contains(d.as_str()) || done.contains(d.as_str()))
            });
            match next {
                Some(id) => {
                    done.insert(id.as_str());
                    order.push(id.clone());
                }
                // Unreachable for a validated graph.
                None => break,
            }
        }
        order
    }

    /// Partition `ids` into levels of mutually independent steps. Every step
    /// of a level depends only on steps of earlier levels (or outside `ids`).
    pub fn levels(&self, ids: &[String]) -> Vec<Vec<String>> {
        let members: HashSet<&str> = ids.iter().map(|s| s.as_str()).collect();
        let mut depth: HashMap<String, usize> = HashMap::new();

        for id in self.topological_order(ids) {
            let level = self
                .dependencies(&id)
                .iter()
                .filter(|d| members.contains(d.as_str()))
                .filter_map(|d| depth.get(d))
                .map(|l| l + 1)
                .max()
                .unwrap_or(0);
            depth.insert(id, level);
        }

        let height = depth.values().copied().max().map(|h| h + 1).unwrap_or(0);
        let mut levels: Vec<Vec<String>> = vec![Vec::new(); height];
        for id in ids {
            if let Some(&level) = depth.get(id) {
                levels[level].push(id.clone());
            }
        }
        levels
    }

    /// Longest chain of estimated durations through the whole graph.
    pub fn critical_path(&self) -> CriticalPath {
        let all: Vec<String> = self.nodes.iter().map(|n| n.id.clone()).collect();
        let mut best: HashMap<String, (u64, Option<String>)> = HashMap::new();

        for id in self.topological_order(&all) {
            let node = &self.nodes[self.index[&id]];
            let (base, via) = node
                .deps
                .iter()
                .filter_map(|d| best.get(d).map(|(cost, _)| (*cost, d.clone())))
                .fold((0, None), |acc, (cost, dep)| {
                    if cost > acc.0 || acc.1.is_none() {
                        (cost, Some(dep))
                    } else {
                        acc
                    }
                });
            best.insert(id, (base + node.estimate_secs, via));
        }

        let mut end: Option<(&String, u64)> = None;
        for id in &all {
            if let Some((cost, _)) = best.get(id) {
                if end.map_or(true, |(_, longest)| *cost > longest) {
                    end = Some((id, *cost));
                }
            }
        }
        let Some((end, total)) = end else {
            return CriticalPath::default();
        };

        let mut steps = vec![end.clone()];
        let mut cursor = best.get(end).and_then(|(_, via)| via.clone());
        while let Some(step) = cursor {
            cursor = best.get(&step).and_then(|(_, via)| via.clone());
            steps.push(step);
        }
        steps.reverse();

        CriticalPath {
            steps,
            estimated_secs: total,
        }
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::schema::{CapabilityQuery, PhaseDef, StepDef};

    fn step(id: &str, deps: &[&str]) -> StepDef {
        StepDef::new(id, CapabilityQuery::new("implementation")).depends_on(deps)
    }

    fn workflow(phases: Vec<(ExecutionStrategy, Vec<StepDef>)>) -> WorkflowDefinition {
        WorkflowDefinition {
            name: "test".into(),
            description: None,
            version: "1.0".into(),
            phases: phases
                .into_iter()
                .enumerate()
                .map(|(i, (strategy, steps))| PhaseDef {
                    name: format!("p{}", i),
                    strategy,
                    steps,
                })
                .collect(),
            quality_gates: Vec::new(),
        }
    }

    fn ids(v: &[&str]) -> Vec<String> {
        v.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_detects_cycle_with_path() {
        let wf = workflow(vec![(
            ExecutionStrategy::Sequential,
            vec![step("a", &["c"]), step("b", &["a"]), step("c", &["b"])],
        )]);
        match DependencyGraph::build(&wf) {
            Err(OrchestratorError::CyclicDependency { cycle }) => {
                assert_eq!(cycle, ids(&["a", "c", "b", "a"]));
            }
            other => panic!("expected cycle, got {:?}", other.map(|g| g.len())),
        }
    }

    #[test]
    fn test_self_dependency_is_a_cycle() {
        let wf = workflow(vec![(ExecutionStrategy::Sequential, vec![step("a", &["a"])])]);
        let err = DependencyGraph::build(&wf).unwrap_err();
        assert_eq!(err.to_string(), "Cyclic dependency: a -> a");
    }

    #[test]
    fn test_rejects_unknown_and_duplicate_steps() {
        let wf = workflow(vec![(ExecutionStrategy::Sequential, vec![step("a", &["ghost"])])]);
        assert!(matches!(
            DependencyGraph::build(&wf),
            Err(OrchestratorError::InvalidDefinition(msg)) if msg.contains("ghost")
        ));

        let wf = workflow(vec![(
            ExecutionStrategy::Sequential,
            vec![step("a", &[]), step("a", &[])],
        )]);
        assert!(DependencyGraph::build(&wf).is_err());
    }

    #[test]
    fn test_rejects_dependency_on_later_phase() {
        let wf = workflow(vec![
            (ExecutionStrategy::Sequential, vec![step("a", &["b"])]),
            (ExecutionStrategy::Sequential, vec![step("b", &[])]),
        ]);
        let err = DependencyGraph::build(&wf).unwrap_err();
        assert!(err.to_string().contains("later phase"));
    }

    #[test]
    fn test_levels_group_independent_steps() {
        let wf = workflow(vec![(
            ExecutionStrategy::Parallel,
            vec![
                step("api", &[]),
                step("ui", &[]),
                step("db", &[]),
                step("integrate", &["api", "ui"]),
                step("docs", &["db"]),
            ],
        )]);
        let graph = DependencyGraph::build(&wf).unwrap();
        let levels = graph.levels(&ids(&["api", "ui", "db", "integrate", "docs"]));
        assert_eq!(levels, vec![ids(&["api", "ui", "db"]), ids(&["integrate", "docs"])]);
    }

    #[test]
    fn test_topological_order_is_stable() {
        let wf = workflow(vec![(
            ExecutionStrategy::Sequential,
            vec![step("c", &["b"]), step("a", &[]), step("b", &["a"])],
        )]);
        let graph = DependencyGraph::build(&wf).unwrap();
        assert_eq!(graph.topological_order(&ids(&["c", "a", "b"])), ids(&["a", "b", "c"]));
        assert_eq!(graph.dependents("a"), vec!["b"]);
    }

    #[test]
    fn test_domain_chain_links_stages() {
        let wf = workflow(vec![(
            ExecutionStrategy::DomainChain,
            vec![
                step("schema", &[]),
                step("models", &[]).with_input("tables", "schema.tables"),
                step("api", &[]),
            ],
        )]);
        let graph = DependencyGraph::build(&wf).unwrap();
        assert_eq!(graph.dependencies("models"), ids(&["schema"]).as_slice());
        assert_eq!(graph.dependencies("api"), ids(&["models"]).as_slice());
    }

    #[test]
    fn test_domain_chain_rejects_forward_input() {
        let wf = workflow(vec![(
            ExecutionStrategy::DomainChain,
            vec![step("a", &[]).with_input("x", "b.out"), step("b", &[])],
        )]);
        assert!(DependencyGraph::build(&wf).is_err());
    }

    #[test]
    fn test_critical_path() {
        let wf = workflow(vec![(
            ExecutionStrategy::Parallel,
            vec![
                step("a", &[]).with_estimate_secs(10),
                step("b", &["a"]).with_estimate_secs(50),
                step("c", &["a"]).with_estimate_secs(20),
                step("d", &["b", "c"]).with_estimate_secs(5),
            ],
        )]);
        let graph = DependencyGraph::build(&wf).unwrap();
        let path = graph.critical_path();
        assert_eq!(path.steps, ids(&["a", "b", "d"]));
        assert_eq!(path.estimated_secs, 65);
    }
}
