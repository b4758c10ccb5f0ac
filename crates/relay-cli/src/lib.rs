//! Relay CLI library: command implementations and the simulated agents
//! used to drive workflows from the command line.

pub mod commands;
pub mod simulation;
