//! Deterministic HTN planning over a first-order goal resolver.
//!
//! A [`Domain`] holds operators (primitive tasks) and methods (compound-task
//! refinements); the [`Planner`] decomposes a goal task list against a
//! [`htn_logic::RuleSet`] into ordered plans of ground operator heads.
//! Enumeration order is fixed by method document order, resolver enumeration
//! order, and left-to-right task expansion.

#![forbid(unsafe_code)]

pub mod domain;
pub mod planner;

pub use domain::{
    Domain, DomainError, DomainLoader, Method, MethodType, Operator, RESERVED_TASK_NAMES,
};
pub use planner::{
    AbortToken, FailureDiagnostic, PlanState, Planner, PlannerConfig, PlanningReport, Solution,
};
