//! YAML-defined phases of capability-matched steps.
//!
//! # Architecture
//!
//! ```text
//! workflow.yaml ──► WorkflowDefinition ──► DependencyGraph (validate, levels)
//!                                              │
//!                   CapabilityRegistry ──► Orchestrator::plan ──► ExecutionPlan
//!                                              │
//!                                        Orchestrator::execute
//!                                         │        │        │
//!                                    handoff    gates    recovery
//! ```

pub mod executor;
pub mod graph;
pub mod schema;
pub mod state;

pub use executor::{ExecutionPlan, Orchestrator, PlannedPhase, StepAssignment};
pub use graph::{CriticalPath, DependencyGraph};
pub use schema::{CapabilityQuery, ExecutionStrategy, PhaseDef, StepDef, WorkflowDefinition};
pub use state::{RunState, StepBoard};
