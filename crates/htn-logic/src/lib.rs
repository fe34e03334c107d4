//! First-order logic primitives for deterministic planning.
//!
//! Terms are interned by a [`TermFactory`] and referenced by copyable
//! [`TermId`] handles; structural equality is handle equality. On top of the
//! terms sit Robinson unification, copy-on-write [`RuleSet`] state, and an
//! SLD [`GoalResolver`] that enumerates every binding set satisfying a
//! conjunction of goals.

#![forbid(unsafe_code)]

pub mod factory;
pub mod resolver;
pub mod ruleset;
pub mod term;
pub mod unify;

pub use factory::TermFactory;
pub use resolver::{GoalResolver, GoalResolverConfig, Resolution};
pub use ruleset::{Rule, RuleSet};
pub use term::{resolve_arithmetic_terms, Number, TermId, TermKind};
pub use unify::{unify, Unifier};
