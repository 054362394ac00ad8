//! Symbolic planning layer for the CoT agent.
//!
//! This crate owns everything that touches PDDL text: the fact/delta model,
//! deterministic problem assembly, domain patching, the classical planner
//! adapter, and the granularity translator bridging physical and logical
//! fact namespaces.

pub mod delta;
pub mod domain;
pub mod fact;
pub mod granularity;
pub mod planner;
pub mod problem;

pub use delta::Delta;
pub use fact::{Fact, FactSet};
pub use planner::{PlanFailure, PlanStep, Planner, PlanningResult, SubprocessPlanner};
pub use problem::{ObjectMap, TypeInference};

/// Sentinel returned by the problem synthesizer when the goal already holds.
pub const GOAL_FINISHED: &str = "GOAL_FINISHED_ALREADY";
