//! SLD resolution of goal conjunctions against a rule set.
//!
//! Supported builtin goals: `true/0`, `=/2` (unification), `is/2`,
//! arithmetic comparison (`< > <= >= =< =:= =\=`), and `not/1` (negation as
//! failure). Everything else resolves against the rule set in document
//! order, left to right within a conjunction, with rule variables renamed
//! fresh per application.

use std::mem;

use crate::factory::TermFactory;
use crate::ruleset::{Rule, RuleSet};
use crate::term::{resolve_arithmetic_terms, TermId, TermKind};
use crate::unify::{unify, Unifier};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct GoalResolverConfig {
    /// Max rule-chaining depth before a path is treated as failed. Guards
    /// the call stack against runaway recursive rule bases; the planner's
    /// own search stack is explicit and unaffected.
    pub max_depth: usize,
}

impl Default for GoalResolverConfig {
    fn default() -> Self {
        Self { max_depth: 4096 }
    }
}

/// Outcome of [`GoalResolver::resolve_all`].
#[derive(Debug, Clone)]
pub struct Resolution {
    /// Every binding set satisfying the conjunction, in enumeration order.
    /// `None` means no solution; a vector holding one empty unifier means
    /// the conjunction is trivially true.
    pub solutions: Option<Vec<Unifier>>,
    /// Approximate bytes allocated while resolving.
    pub memory_used: usize,
    /// Farthest position in the input conjunction at which the deepest
    /// failure occurred.
    pub furthest_failure_index: Option<usize>,
    /// Residual conjunction at that failure.
    pub failure_context: Vec<TermId>,
}

/// Resolves conjunctions of goals against a [`RuleSet`].
#[derive(Debug, Default)]
pub struct GoalResolver {
    config: GoalResolverConfig,
}

impl GoalResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(mut self, config: GoalResolverConfig) -> Self {
        self.config = config;
        self
    }

    pub fn config(&self) -> GoalResolverConfig {
        self.config
    }

    /// Enumerate all binding sets that satisfy `goals` against `state`.
    ///
    /// The resolver participates in the caller's memory budget: when its
    /// allocations exceed `budget` it sets the factory's out-of-memory latch
    /// and returns the solutions found so far.
    pub fn resolve_all(
        &self,
        factory: &mut TermFactory,
        state: &RuleSet,
        goals: &[TermId],
        budget: usize,
    ) -> Resolution {
        let mut goal_vars = Vec::new();
        for goal in goals {
            collect_vars(factory, *goal, &mut goal_vars);
        }

        let start_size = factory.dynamic_size();
        let mut search = Search {
            factory,
            rules: state.rules().cloned().collect(),
            goal_vars,
            budget,
            start_size,
            solution_bytes: 0,
            solutions: Vec::new(),
            max_depth: self.config.max_depth,
            rename_serial: 0,
            furthest: None,
            context: Vec::new(),
            stopped: false,
        };

        let worklist: Vec<(TermId, usize)> = goals.iter().copied().zip(0..).collect();
        search.solve(&worklist, &Unifier::default(), 0);

        let memory_used = search.memory_used();
        Resolution {
            solutions: if search.solutions.is_empty() {
                None
            } else {
                Some(search.solutions)
            },
            memory_used,
            furthest_failure_index: search.furthest,
            failure_context: search.context,
        }
    }
}

struct Search<'a> {
    factory: &'a mut TermFactory,
    rules: Vec<Rule>,
    goal_vars: Vec<TermId>,
    budget: usize,
    start_size: usize,
    solution_bytes: usize,
    solutions: Vec<Unifier>,
    max_depth: usize,
    rename_serial: usize,
    furthest: Option<usize>,
    context: Vec<TermId>,
    stopped: bool,
}

enum Builtin {
    True,
    Not,
    Eq,
    Is,
    Compare,
}

impl Search<'_> {
    fn solve(&mut self, goals: &[(TermId, usize)], bindings: &Unifier, depth: usize) {
        if self.stopped {
            return;
        }
        self.charge();
        if self.stopped {
            return;
        }

        let Some((&(goal, index), rest)) = goals.split_first() else {
            self.emit(bindings);
            return;
        };

        if depth >= self.max_depth {
            let g = bindings.substitute(self.factory, goal);
            self.record_failure(index, g, rest, bindings);
            return;
        }

        let g = bindings.substitute(self.factory, goal);
        if self.factory.is_variable(g) {
            self.record_failure(index, g, rest, bindings);
            return;
        }

        match self.builtin_of(g) {
            Some(Builtin::True) => self.solve(rest, bindings, depth + 1),
            Some(Builtin::Not) => {
                let target = self.factory.args_of(g)[0];
                let proven = self.prove_any(target, depth);
                if self.stopped {
                    return;
                }
                if proven {
                    self.record_failure(index, g, rest, bindings);
                } else {
                    self.solve(rest, bindings, depth + 1);
                }
            }
            Some(Builtin::Eq) => {
                let args = self.factory.args_of(g).to_vec();
                match unify(self.factory, args[0], args[1]) {
                    Some(mgu) => {
                        let composed = bindings.compose(self.factory, &mgu);
                        self.solve(rest, &composed, depth + 1);
                    }
                    None => self.record_failure(index, g, rest, bindings),
                }
            }
            Some(Builtin::Is) => {
                let args = self.factory.args_of(g).to_vec();
                let value = resolve_arithmetic_terms(self.factory, args[1])
                    .filter(|v| self.factory.number(*v).is_some());
                match value {
                    Some(value) => match unify(self.factory, args[0], value) {
                        Some(mgu) => {
                            let composed = bindings.compose(self.factory, &mgu);
                            self.solve(rest, &composed, depth + 1);
                        }
                        None => self.record_failure(index, g, rest, bindings),
                    },
                    None => self.record_failure(index, g, rest, bindings),
                }
            }
            Some(Builtin::Compare) => match resolve_arithmetic_terms(self.factory, g) {
                Some(reduced) if self.factory.is_true_constant(reduced) => {
                    self.solve(rest, bindings, depth + 1);
                }
                _ => self.record_failure(index, g, rest, bindings),
            },
            None => self.solve_against_rules(g, index, rest, bindings, depth),
        }
    }

    fn solve_against_rules(
        &mut self,
        goal: TermId,
        index: usize,
        rest: &[(TermId, usize)],
        bindings: &Unifier,
        depth: usize,
    ) {
        let mut matched = false;
        for rule_index in 0..self.rules.len() {
            if self.stopped {
                return;
            }
            let rule = self.rules[rule_index].clone();
            if self.quick_mismatch(goal, rule.head()) {
                continue;
            }
            let (head, body) = self.rename(&rule);
            let Some(mgu) = unify(self.factory, goal, head) else {
                continue;
            };
            matched = true;
            let composed = bindings.compose(self.factory, &mgu);
            let mut next: Vec<(TermId, usize)> = Vec::with_capacity(body.len() + rest.len());
            next.extend(body.iter().map(|b| (*b, index)));
            next.extend(rest.iter().copied());
            self.solve(&next, &composed, depth + 1);
        }
        if !matched {
            self.record_failure(index, goal, rest, bindings);
        }
    }

    fn builtin_of(&self, goal: TermId) -> Option<Builtin> {
        let arity = self.factory.arity_of(goal);
        match (self.factory.name_of(goal), arity) {
            ("true", 0) => Some(Builtin::True),
            ("not", 1) | ("\\+", 1) => Some(Builtin::Not),
            ("=", 2) => Some(Builtin::Eq),
            ("is", 2) => Some(Builtin::Is),
            ("<" | ">" | "<=" | "=<" | ">=" | "=:=" | "=\\=", 2) => Some(Builtin::Compare),
            _ => None,
        }
    }

    /// Cheap head-shape check before paying for renaming.
    fn quick_mismatch(&self, goal: TermId, head: TermId) -> bool {
        match (self.factory.kind_of(goal), self.factory.kind_of(head)) {
            (TermKind::Functor, TermKind::Functor) => {
                self.factory.symbol_of(goal) != self.factory.symbol_of(head)
                    || self.factory.arity_of(goal) != self.factory.arity_of(head)
            }
            (TermKind::Constant, TermKind::Constant) => goal != head,
            (TermKind::Constant, TermKind::Functor) | (TermKind::Functor, TermKind::Constant) => {
                true
            }
            _ => false,
        }
    }

    /// Standardize a rule apart by renaming its variables fresh.
    fn rename(&mut self, rule: &Rule) -> (TermId, Vec<TermId>) {
        let mut vars = Vec::new();
        collect_vars(self.factory, rule.head(), &mut vars);
        for goal in rule.body() {
            collect_vars(self.factory, *goal, &mut vars);
        }
        if vars.is_empty() {
            return (rule.head(), rule.body().to_vec());
        }

        let serial = self.rename_serial;
        self.rename_serial += 1;
        let mut renaming = Unifier::default();
        for var in vars {
            let fresh_name = format!("{}@{}", self.factory.name_of(var), serial);
            let fresh = self.factory.variable(&fresh_name);
            renaming.bind(var, fresh);
        }
        let head = renaming.substitute(self.factory, rule.head());
        let body = renaming.substitute_all(self.factory, rule.body());
        (head, body)
    }

    /// Existence check used by negation as failure. Solutions, failure
    /// records, and projection vars are saved around the inner search.
    fn prove_any(&mut self, goal: TermId, depth: usize) -> bool {
        let saved_solutions = mem::take(&mut self.solutions);
        let saved_bytes = self.solution_bytes;
        let saved_vars = mem::take(&mut self.goal_vars);
        let saved_furthest = self.furthest.take();
        let saved_context = mem::take(&mut self.context);

        self.solve(&[(goal, 0)], &Unifier::default(), depth + 1);
        let proven = !self.solutions.is_empty();

        self.solutions = saved_solutions;
        self.solution_bytes = saved_bytes;
        self.goal_vars = saved_vars;
        self.furthest = saved_furthest;
        self.context = saved_context;
        proven
    }

    /// Project the accumulated bindings onto the input conjunction's
    /// variables and record a solution.
    fn emit(&mut self, bindings: &Unifier) {
        let mut projected = Unifier::default();
        let vars = self.goal_vars.clone();
        for var in vars {
            let value = bindings.substitute(self.factory, var);
            if value != var {
                projected.bind(var, value);
            }
        }
        self.solution_bytes += projected.dynamic_size();
        self.solutions.push(projected);
        self.charge();
    }

    fn record_failure(
        &mut self,
        index: usize,
        goal: TermId,
        rest: &[(TermId, usize)],
        bindings: &Unifier,
    ) {
        if self.furthest.map_or(true, |f| index >= f) {
            self.furthest = Some(index);
            let mut context = Vec::with_capacity(rest.len() + 1);
            context.push(goal);
            for (term, _) in rest {
                context.push(bindings.substitute(self.factory, *term));
            }
            self.context = context;
        }
    }

    fn memory_used(&self) -> usize {
        self.factory.dynamic_size().saturating_sub(self.start_size) + self.solution_bytes
    }

    fn charge(&mut self) {
        if self.memory_used() > self.budget {
            self.factory.set_out_of_memory(true);
            self.stopped = true;
        }
    }
}

fn collect_vars(factory: &TermFactory, term: TermId, out: &mut Vec<TermId>) {
    match factory.kind_of(term) {
        TermKind::Constant => {}
        TermKind::Variable => {
            if !out.contains(&term) {
                out.push(term);
            }
        }
        TermKind::Functor => {
            if factory.is_ground(term) {
                return;
            }
            for arg in factory.args_of(term) {
                collect_vars(factory, *arg, out);
            }
        }
    }
}
