//! Relay Core: multi-agent workflow orchestration.
//!
//! Runs a workflow of capability-matched steps across registered agents:
//! dependency-ordered phases, parallel groups behind barriers, a shared
//! write-once context handed from agent to agent, quality gates, typed
//! failure recovery and saga compensation. Agents themselves are opaque;
//! the engine only talks to them through [`agents::Agent`].
//!
//! The crate has no transport dependency. `relay-cli` drives it from the
//! command line with scripted agents.

pub mod agents;
pub mod config;
pub mod db;
pub mod error;
pub mod events;
pub mod gates;
pub mod handoff;
pub mod models;
pub mod monitor;
pub mod recovery;
pub mod store;
pub mod workflow;

// Convenience re-exports
pub use agents::{Agent, CapabilityMatcher, CapabilityRegistry, QualityValidator};
pub use config::EngineConfig;
pub use db::Database;
pub use error::{AgentError, OrchestratorError};
pub use monitor::{WorkflowMonitor, WorkflowReport};
pub use recovery::{ContextProvider, EscalationHandler, RecoveryManager, TaskDecomposer};
pub use store::ExecutionStore;
pub use workflow::{ExecutionPlan, Orchestrator, WorkflowDefinition};
