//! Explicit-stack HTN search.
//!
//! The search never recurses: each [`PlanNode`] frame carries a continuation
//! tag naming the point at which it resumes, and a single loop advances the
//! top of the stack one step per iteration. Backtracking is popping a frame;
//! enumeration of further solutions resumes the parent frame the same way.
//! Every push records the accounted memory of the whole search so a caller
//! budget can stop it with a partial result.

use std::collections::VecDeque;
use std::mem;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use htn_logic::{
    resolve_arithmetic_terms, unify, GoalResolver, Number, RuleSet, TermFactory, TermId, Unifier,
};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::domain::{Domain, MethodType};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct PlannerConfig {
    /// One push growing the accounted size by more than this logs a warning.
    pub high_node_memory_warning: usize,
}

impl Default for PlannerConfig {
    fn default() -> Self {
        Self {
            high_node_memory_warning: 1 << 20,
        }
    }
}

/// Resumption point of a [`PlanNode`].
///
/// Operators have no tag of their own: applying one has exactly one
/// continuation, so it advances the current frame in place instead of
/// parking a pass-through parent under a child.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ContinuePoint {
    Fail,
    NextTask,
    NextMethodThatApplies,
    NextNormalMethodCondition,
    OutOfMemory,
    ReturnFromNextNormalMethodCondition,
    ReturnFromHandleTryTerm,
    ReturnFromSetOfConditions,
    Abort,
}

/// One frame of the search stack.
#[derive(Debug)]
struct PlanNode {
    node_id: usize,
    state: RuleSet,
    tasks: VecDeque<TermId>,
    operators: Vec<TermId>,
    task: Option<TermId>,
    unified_methods: VecDeque<(usize, Unifier)>,
    method: Option<(usize, Unifier)>,
    condition_resolutions: Vec<Unifier>,
    condition_index: usize,
    continue_point: ContinuePoint,
    retry: bool,
    method_had_solution: bool,
    at_least_one_method_had_solution: bool,
    try_any_of_success_count: usize,
    total_memory_at_push: usize,
}

impl PlanNode {
    fn new(node_id: usize, state: RuleSet, tasks: VecDeque<TermId>, operators: Vec<TermId>) -> Self {
        Self {
            node_id,
            state,
            tasks,
            operators,
            task: None,
            unified_methods: VecDeque::new(),
            method: None,
            condition_resolutions: Vec::new(),
            condition_index: 0,
            continue_point: ContinuePoint::NextTask,
            retry: false,
            method_had_solution: false,
            at_least_one_method_had_solution: false,
            try_any_of_success_count: 0,
            total_memory_at_push: 0,
        }
    }

    /// Pop the next candidate method and reset the condition cursor.
    fn set_next_method(&mut self) {
        self.condition_index = 0;
        self.condition_resolutions.clear();
        self.method = self.unified_methods.pop_front();
    }

    fn current_method(&self) -> (usize, Unifier) {
        match &self.method {
            Some((index, unifier)) => (*index, unifier.clone()),
            None => panic!("internal error: no method selected on frame {}", self.node_id),
        }
    }

    fn dynamic_size(&self) -> usize {
        let term = mem::size_of::<TermId>();
        let unifiers: usize = self
            .unified_methods
            .iter()
            .map(|(_, u)| mem::size_of::<(usize, Unifier)>() + u.dynamic_size())
            .sum();
        let resolutions: usize = self
            .condition_resolutions
            .iter()
            .map(Unifier::dynamic_size)
            .sum();
        let method = self
            .method
            .as_ref()
            .map(|(_, u)| u.dynamic_size())
            .unwrap_or(0);
        mem::size_of::<PlanNode>()
            + self.tasks.len() * term
            + self.operators.len() * term
            + unifiers
            + resolutions
            + method
            + self.state.dynamic_size()
    }
}

/// Cancellation token polled at the top of the search loop.
#[derive(Debug, Clone)]
pub struct AbortToken {
    flag: Arc<AtomicBool>,
}

impl AbortToken {
    pub fn abort(&self) {
        self.flag.store(true, Ordering::Relaxed);
    }

    pub fn is_aborted(&self) -> bool {
        self.flag.load(Ordering::Relaxed)
    }
}

/// Restartable search state for [`Planner::find_next_plan`].
#[derive(Debug)]
pub struct PlanState {
    stack: Vec<PlanNode>,
    initial_state: RuleSet,
    next_node_id: usize,
    return_value: bool,
    memory_budget: usize,
    highest_memory_used: usize,
    deepest_task_failure: Option<usize>,
    furthest_criteria_failure: Option<usize>,
    furthest_criteria_failure_context: Vec<TermId>,
    abort: Arc<AtomicBool>,
    start_time: Instant,
    terminal: bool,
}

impl PlanState {
    pub fn new(initial_state: &RuleSet, goals: &[TermId], memory_budget: usize) -> Self {
        let shared = initial_state.create_copy();
        let root = PlanNode::new(
            0,
            shared.create_copy(),
            goals.iter().copied().collect(),
            Vec::new(),
        );
        Self {
            stack: vec![root],
            initial_state: shared,
            next_node_id: 1,
            return_value: false,
            memory_budget,
            highest_memory_used: 0,
            deepest_task_failure: None,
            furthest_criteria_failure: None,
            furthest_criteria_failure_context: Vec::new(),
            abort: Arc::new(AtomicBool::new(false)),
            start_time: Instant::now(),
            terminal: false,
        }
    }

    pub fn abort_token(&self) -> AbortToken {
        AbortToken {
            flag: Arc::clone(&self.abort),
        }
    }

    pub fn highest_memory_used(&self) -> usize {
        self.highest_memory_used
    }

    pub fn memory_budget(&self) -> usize {
        self.memory_budget
    }

    /// Depth of the deepest recorded task failure.
    pub fn deepest_task_failure(&self) -> Option<usize> {
        self.deepest_task_failure
    }

    pub fn furthest_criteria_failure(&self) -> Option<usize> {
        self.furthest_criteria_failure
    }

    pub fn furthest_criteria_failure_context(&self) -> &[TermId] {
        &self.furthest_criteria_failure_context
    }

    /// True once the search ended by out-of-memory or abort; such a state
    /// refuses to resume.
    pub fn is_terminal(&self) -> bool {
        self.terminal
    }

    fn do_return(&mut self, return_value: bool) {
        self.stack.pop();
        self.return_value = return_value;
    }

    /// Approximate live size of the whole search. Also tracks the highest
    /// value ever observed.
    fn dynamic_size(&mut self, factory: &TermFactory) -> usize {
        let stack_bytes: usize = self.stack.iter().map(PlanNode::dynamic_size).sum();
        let total = mem::size_of::<PlanState>()
            + self.initial_state.dynamic_shared_size()
            + factory.dynamic_size()
            + self.furthest_criteria_failure_context.len() * mem::size_of::<TermId>()
            + stack_bytes;
        self.note_memory(total);
        total
    }

    fn note_memory(&mut self, current: usize) {
        if current > self.highest_memory_used {
            self.highest_memory_used = current;
        }
    }

    /// Keep the failure that is deepest in the task tree, and at equal depth
    /// the one farthest along its conjunction.
    fn record_failure(&mut self, furthest: Option<usize>, context: Vec<TermId>) {
        let depth = self.stack.len();
        let deeper = self.deepest_task_failure.map_or(true, |d| depth > d);
        let farther = self.deepest_task_failure == Some(depth)
            && furthest > self.furthest_criteria_failure;
        if deeper || farther {
            self.deepest_task_failure = Some(depth);
            self.furthest_criteria_failure = furthest;
            self.furthest_criteria_failure_context = context;
        }
    }

    fn node_with_id_mut(&mut self, id: usize) -> &mut PlanNode {
        match self.stack.iter_mut().find(|n| n.node_id == id) {
            Some(node) => node,
            None => panic!("internal error: no frame with id {id} on the search stack"),
        }
    }
}

/// An ordered sequence of ground, non-hidden operator heads plus the state
/// they produce.
#[derive(Debug, Clone)]
pub struct Solution {
    pub plan: Vec<TermId>,
    pub final_state: RuleSet,
    pub highest_memory_used: usize,
    pub elapsed: Duration,
}

impl Solution {
    pub fn plan_to_string(&self, factory: &TermFactory) -> String {
        format!("[{}]", factory.display_list(&self.plan))
    }
}

/// Diagnostics returned when no plan exists.
#[derive(Debug, Clone)]
pub struct FailureDiagnostic {
    pub deepest_task_failure: Option<usize>,
    pub furthest_criteria_failure: Option<usize>,
    pub failure_context: Vec<TermId>,
}

/// Everything [`Planner::find_all_plans`] learned in one search.
#[derive(Debug)]
pub struct PlanningReport {
    /// All solutions in enumeration order; empty when there are none. The
    /// last entry is partial when `out_of_memory` is set.
    pub solutions: Vec<Solution>,
    pub highest_memory_used: usize,
    pub out_of_memory: bool,
    /// Set when `solutions` is empty.
    pub failure: Option<FailureDiagnostic>,
}

/// Depth-first HTN planner over a [`Domain`].
#[derive(Debug, Default)]
pub struct Planner {
    domain: Domain,
    resolver: GoalResolver,
    config: PlannerConfig,
}

impl Planner {
    pub fn new(domain: Domain) -> Self {
        Self {
            domain,
            resolver: GoalResolver::new(),
            config: PlannerConfig::default(),
        }
    }

    pub fn with_config(mut self, config: PlannerConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_resolver(mut self, resolver: GoalResolver) -> Self {
        self.resolver = resolver;
        self
    }

    pub fn domain(&self) -> &Domain {
        &self.domain
    }

    /// First plan for `goals`, or `None` when there is no plan.
    pub fn find_plan(
        &self,
        factory: &mut TermFactory,
        initial_state: &RuleSet,
        goals: &[TermId],
        memory_budget: usize,
    ) -> Option<Solution> {
        let mut plan_state = PlanState::new(initial_state, goals, memory_budget);
        self.find_next_plan(factory, &mut plan_state)
    }

    /// Every plan for `goals`, in deterministic enumeration order.
    pub fn find_all_plans(
        &self,
        factory: &mut TermFactory,
        initial_state: &RuleSet,
        goals: &[TermId],
        memory_budget: usize,
    ) -> PlanningReport {
        tracing::debug!(goals = %factory.display_list(goals), "finding all plans");
        let mut plan_state = PlanState::new(initial_state, goals, memory_budget);
        let mut solutions = Vec::new();
        while let Some(solution) = self.find_next_plan(factory, &mut plan_state) {
            tracing::debug!(
                plan = %solution.plan_to_string(factory),
                highest_memory = solution.highest_memory_used,
                "solution found"
            );
            solutions.push(solution);
            if factory.out_of_memory() {
                // The last solution is partial; the caller decides whether
                // to keep it.
                break;
            }
        }

        let failure = if solutions.is_empty() {
            Some(FailureDiagnostic {
                deepest_task_failure: plan_state.deepest_task_failure,
                furthest_criteria_failure: plan_state.furthest_criteria_failure,
                failure_context: plan_state.furthest_criteria_failure_context.clone(),
            })
        } else {
            None
        };

        PlanningReport {
            solutions,
            highest_memory_used: plan_state.highest_memory_used,
            out_of_memory: factory.out_of_memory(),
            failure,
        }
    }

    /// Advance the search to its next solution.
    ///
    /// Returns the solution without unwinding past it, so the next call
    /// resumes the parent frame and continues enumerating. Returns `None`
    /// when the search space is exhausted or the state is terminal.
    pub fn find_next_plan(
        &self,
        factory: &mut TermFactory,
        plan_state: &mut PlanState,
    ) -> Option<Solution> {
        if plan_state.terminal {
            return None;
        }
        plan_state.start_time = Instant::now();

        while !plan_state.stack.is_empty() {
            let mut continue_point = plan_state
                .stack
                .last()
                .map(|n| n.continue_point)
                .unwrap_or(ContinuePoint::Fail);
            if plan_state.abort.load(Ordering::Relaxed) {
                continue_point = ContinuePoint::Abort;
            }

            match continue_point {
                ContinuePoint::Fail => {
                    panic!("internal error: resumed a failed search frame");
                }

                ContinuePoint::Abort => {
                    tracing::debug!(stack = plan_state.stack.len(), "aborted; returning partial plan");
                    return Some(Self::seal_partial(factory, plan_state, false));
                }

                ContinuePoint::OutOfMemory => {
                    tracing::debug!(
                        budget = plan_state.memory_budget,
                        stack = plan_state.stack.len(),
                        "out of memory; returning partial plan"
                    );
                    return Some(Self::seal_partial(factory, plan_state, true));
                }

                ContinuePoint::NextTask => {
                    if let Some(solution) = self.next_task(factory, plan_state) {
                        return Some(solution);
                    }
                }

                ContinuePoint::NextMethodThatApplies => {
                    self.next_method_that_applies(factory, plan_state);
                }

                ContinuePoint::NextNormalMethodCondition => {
                    self.next_normal_method_condition(factory, plan_state);
                }

                ContinuePoint::ReturnFromNextNormalMethodCondition => {
                    let returned = plan_state.return_value;
                    let node = top(plan_state);
                    if returned {
                        node.method_had_solution = true;
                    }
                    node.continue_point = ContinuePoint::NextNormalMethodCondition;
                }

                ContinuePoint::ReturnFromHandleTryTerm => {
                    let returned = plan_state.return_value;
                    let node = top(plan_state);
                    if !returned && node.retry {
                        // The try clause itself failed: drop it and carry on
                        // with the remaining tasks of this frame.
                        tracing::debug!(frame = node.node_id, "try clause failed; skipping it");
                        node.continue_point = ContinuePoint::NextTask;
                    } else {
                        plan_state.do_return(returned);
                    }
                }

                ContinuePoint::ReturnFromSetOfConditions => {
                    let returned = plan_state.return_value;
                    let node = top(plan_state);
                    if returned {
                        node.method_had_solution = true;
                    }
                    node.continue_point = ContinuePoint::NextMethodThatApplies;
                }
            }
        }

        None
    }

    /// `NextTask`: consume one task and dispatch it. Returns the solution
    /// when the frame's task list ran dry.
    fn next_task(&self, factory: &mut TermFactory, plan_state: &mut PlanState) -> Option<Solution> {
        let raw = {
            let node = top(plan_state);
            node.task = node.tasks.pop_front();
            node.task
        };

        let Some(raw) = raw else {
            // No tasks remain: this frame is a solution. Unwind one frame
            // now so the next call resumes the parent and keeps enumerating.
            tracing::debug!(
                stack = plan_state.stack.len(),
                highest_memory = plan_state.highest_memory_used,
                "no tasks remain; solution found"
            );
            let node = match plan_state.stack.pop() {
                Some(node) => node,
                None => panic!("internal error: success without a frame"),
            };
            plan_state.return_value = true;
            return Some(Solution {
                plan: node.operators,
                final_state: node.state,
                highest_memory_used: plan_state.highest_memory_used,
                elapsed: plan_state.start_time.elapsed(),
            });
        };

        let Some(task) = resolve_arithmetic_terms(factory, raw) else {
            tracing::debug!(task = %factory.display(raw), "arithmetic in task failed to resolve");
            plan_state.do_return(false);
            return None;
        };
        top(plan_state).task = Some(task);

        tracing::trace!(
            stack = plan_state.stack.len(),
            task = %factory.display(task),
            "solving task"
        );

        if self.check_for_operator(factory, plan_state) {
            return None;
        }
        if self.check_for_special_task(factory, plan_state) {
            return None;
        }

        let candidates = self.domain.find_methods_that_unify(factory, task);
        if candidates.is_empty() {
            tracing::debug!(task = %factory.display(task), "no methods unify");
            plan_state.record_failure(None, vec![task]);
            plan_state.do_return(false);
        } else {
            tracing::trace!(count = candidates.len(), "methods unify");
            let node = top(plan_state);
            node.unified_methods = candidates.into();
            node.continue_point = ContinuePoint::NextMethodThatApplies;
        }
        None
    }

    /// Try to treat the current task as an operator. Returns false when the
    /// task name is not an operator name.
    fn check_for_operator(&self, factory: &mut TermFactory, plan_state: &mut PlanState) -> bool {
        let task = current_task(plan_state);
        let name = factory.name_of(task).to_string();
        let Some(op) = self.domain.operator(&name) else {
            return false;
        };

        let mgu = unify(factory, task, op.head());
        match mgu {
            Some(mgu) if mgu.is_ground(factory) => {
                let substituted_head = mgu.substitute(factory, op.head());
                let removals = mgu.substitute_all(factory, op.deletions());
                let additions = mgu.substitute_all(factory, op.additions());
                tracing::debug!(
                    operator = %factory.display(substituted_head),
                    hidden = op.is_hidden(),
                    deletes = %factory.display_list(&removals),
                    adds = %factory.display_list(&additions),
                    "operator unifies"
                );

                // An operator has exactly one continuation, so no frame is
                // pushed: the effects land on this frame in place and it
                // carries on with its next task.
                let hidden = op.is_hidden();
                let node = top(plan_state);
                node.state.update(factory, &removals, &additions);
                if !hidden {
                    node.operators.push(substituted_head);
                }
                node.continue_point = ContinuePoint::NextTask;
            }
            _ => {
                tracing::debug!(
                    operator = %factory.display(op.head()),
                    task = %factory.display(task),
                    "operator did not unify to ground"
                );
                plan_state.do_return(false);
            }
        }
        true
    }

    /// Handle the reserved bookkeeping tasks. Returns false for ordinary
    /// tasks.
    fn check_for_special_task(&self, factory: &mut TermFactory, plan_state: &mut PlanState) -> bool {
        let task = current_task(plan_state);
        let name = factory.name_of(task).to_string();
        match name.as_str() {
            "try" => {
                // Two alternatives: run the clause, or (on failure) skip it.
                // tryEnd(id) marks that the clause itself completed, which
                // disarms the retry.
                let node_id = top(plan_state).node_id;
                let mut subtasks: Vec<TermId> = factory.args_of(task).to_vec();
                let id_term = factory.int_constant(node_id as i64);
                subtasks.push(factory.functor("tryEnd", &[id_term]));
                tracing::debug!(frame = node_id, "entering try clause");
                self.push_child(
                    factory,
                    plan_state,
                    subtasks,
                    ContinuePoint::ReturnFromHandleTryTerm,
                );
                let depth = plan_state.stack.len();
                plan_state.stack[depth - 2].retry = true;
                true
            }
            "tryEnd" => {
                let id = bookkeeping_id(factory, task);
                plan_state.node_with_id_mut(id).retry = false;
                top(plan_state).continue_point = ContinuePoint::NextTask;
                true
            }
            "countAnyOf" => {
                let id = bookkeeping_id(factory, task);
                plan_state.node_with_id_mut(id).try_any_of_success_count += 1;
                top(plan_state).continue_point = ContinuePoint::NextTask;
                true
            }
            "failIfNoneOf" => {
                let id = bookkeeping_id(factory, task);
                if plan_state.node_with_id_mut(id).try_any_of_success_count == 0 {
                    tracing::debug!("anyOf had zero solutions");
                    plan_state.do_return(false);
                } else {
                    top(plan_state).continue_point = ContinuePoint::NextTask;
                }
                true
            }
            _ => false,
        }
    }

    /// `NextMethodThatApplies`: pop the next candidate, honor `else` chains,
    /// and resolve its condition.
    fn next_method_that_applies(&self, factory: &mut TermFactory, plan_state: &mut PlanState) {
        let selected = {
            let node = top(plan_state);
            node.set_next_method();

            if node.method_had_solution {
                node.at_least_one_method_had_solution = true;
                // A solved group ends its else chain; consecutive defaults
                // are alternatives to something that already worked.
                loop {
                    let skip = match &node.method {
                        Some((index, _)) => self.domain.method(*index).is_default(),
                        None => false,
                    };
                    if !skip {
                        break;
                    }
                    node.set_next_method();
                }
                // Reset so if/else groups can interleave down the list.
                node.method_had_solution = false;
            }
            node.method.clone()
        };

        let Some((method_index, head_unifier)) = selected else {
            let had_one = top(plan_state).at_least_one_method_had_solution;
            plan_state.do_return(had_one);
            return;
        };

        let method = self.domain.method(method_index);
        tracing::trace!(
            method = %method.to_display_string(factory),
            default = method.is_default(),
            "resolving method condition"
        );

        let resolutions = if method.condition().is_empty() {
            // Empty condition is trivially true.
            vec![Unifier::default()]
        } else {
            let substituted = head_unifier.substitute_all(factory, method.condition());
            let current = plan_state.dynamic_size(factory);
            let remaining = plan_state.memory_budget.saturating_sub(current);
            let state = &plan_state.stack[plan_state.stack.len() - 1].state;
            let resolution = self
                .resolver
                .resolve_all(factory, state, &substituted, remaining);
            plan_state.note_memory(current + resolution.memory_used);

            if factory.out_of_memory() {
                top(plan_state).continue_point = ContinuePoint::OutOfMemory;
                return;
            }

            match resolution.solutions {
                None => {
                    tracing::trace!(
                        condition = %factory.display_list(&substituted),
                        "no condition alternatives"
                    );
                    plan_state.record_failure(
                        resolution.furthest_failure_index,
                        resolution.failure_context,
                    );
                    top(plan_state).continue_point = ContinuePoint::NextMethodThatApplies;
                    return;
                }
                Some(solutions) => solutions,
            }
        };

        let method_type = method.method_type();
        top(plan_state).condition_resolutions = resolutions;
        match method_type {
            MethodType::Normal => {
                top(plan_state).continue_point = ContinuePoint::NextNormalMethodCondition;
            }
            MethodType::AllSetOf => {
                self.handle_all_of(factory, plan_state, method_index, &head_unifier);
            }
            MethodType::AnySetOf => {
                self.handle_any_of(factory, plan_state, method_index, &head_unifier);
            }
        }
    }

    /// `NextNormalMethodCondition`: each resolution is its own alternative
    /// solution; push a backtrackable frame for the next one.
    fn next_normal_method_condition(&self, factory: &mut TermFactory, plan_state: &mut PlanState) {
        let (condition, method_index, head_unifier) = {
            let node = top(plan_state);
            let index = node.condition_index;
            if index >= node.condition_resolutions.len() {
                node.continue_point = ContinuePoint::NextMethodThatApplies;
                return;
            }
            node.condition_index += 1;
            let (method_index, head_unifier) = node.current_method();
            (
                node.condition_resolutions[index].clone(),
                method_index,
                head_unifier,
            )
        };

        let subtasks = self.domain.method(method_index).subtasks().to_vec();
        let head_bound = head_unifier.substitute_all(factory, &subtasks);
        let bound = condition.substitute_all(factory, &head_bound);
        tracing::trace!(subtasks = %factory.display_list(&bound), "expanding method");
        self.push_child(
            factory,
            plan_state,
            bound,
            ContinuePoint::ReturnFromNextNormalMethodCondition,
        );
    }

    /// `allOf`: concatenate the subtasks of every resolution into one
    /// refinement; the depth-first default (all tasks must resolve) gives
    /// the all-must-succeed semantics.
    fn handle_all_of(
        &self,
        factory: &mut TermFactory,
        plan_state: &mut PlanState,
        method_index: usize,
        head_unifier: &Unifier,
    ) {
        let resolutions = top(plan_state).condition_resolutions.clone();
        let subtasks = self.domain.method(method_index).subtasks().to_vec();
        let mut combined = Vec::new();
        for condition in &resolutions {
            let head_bound = head_unifier.substitute_all(factory, &subtasks);
            let bound = condition.substitute_all(factory, &head_bound);
            combined.extend(bound);
        }
        tracing::debug!(
            tasks = %factory.display_list(&combined),
            "allOf: all condition alternatives become one refinement"
        );
        self.push_child(
            factory,
            plan_state,
            combined,
            ContinuePoint::ReturnFromSetOfConditions,
        );
    }

    /// `anyOf`: wrap each resolution's subtasks in `try`, count the ones
    /// that complete, and fail afterward only if none did.
    fn handle_any_of(
        &self,
        factory: &mut TermFactory,
        plan_state: &mut PlanState,
        method_index: usize,
        head_unifier: &Unifier,
    ) {
        let resolutions = top(plan_state).condition_resolutions.clone();
        let subtasks = self.domain.method(method_index).subtasks().to_vec();

        // The frame pushed below gets this id; countAnyOf/failIfNoneOf
        // address it from arbitrarily deep in the expansion.
        let any_of_id = plan_state.next_node_id;
        let id_term = factory.int_constant(any_of_id as i64);

        let mut combined = Vec::with_capacity(resolutions.len() + 1);
        for condition in &resolutions {
            let head_bound = head_unifier.substitute_all(factory, &subtasks);
            let mut bound = condition.substitute_all(factory, &head_bound);
            bound.push(factory.functor("countAnyOf", &[id_term]));
            combined.push(factory.functor("try", &bound));
        }
        combined.push(factory.functor("failIfNoneOf", &[id_term]));

        tracing::debug!(
            tasks = %factory.display_list(&combined),
            "anyOf: condition alternatives wrapped in try"
        );
        self.push_child(
            factory,
            plan_state,
            combined,
            ContinuePoint::ReturnFromSetOfConditions,
        );
    }

    /// Push a child frame holding `additional` tasks ahead of the current
    /// frame's remaining tasks, with a state snapshot, and record the memory
    /// watermark. A budget breach tags the child `OutOfMemory` instead of
    /// aborting mid-step.
    fn push_child(
        &self,
        factory: &mut TermFactory,
        plan_state: &mut PlanState,
        additional: Vec<TermId>,
        return_point: ContinuePoint,
    ) {
        let (tasks, state, operators) = {
            let node = top(plan_state);
            let mut merged: VecDeque<TermId> =
                VecDeque::with_capacity(additional.len() + node.tasks.len());
            merged.extend(additional);
            merged.extend(node.tasks.iter().copied());
            (merged, node.state.create_copy(), node.operators.clone())
        };

        let node_id = plan_state.next_node_id;
        plan_state.next_node_id += 1;
        let mut child = PlanNode::new(node_id, state, tasks, operators);

        let total = plan_state.dynamic_size(factory);
        child.total_memory_at_push = total;
        let previous = top(plan_state).total_memory_at_push;
        let delta = total.saturating_sub(previous);
        if delta > self.config.high_node_memory_warning {
            tracing::warn!(
                delta,
                total,
                term_strings = factory.string_size(),
                term_other = factory.other_allocation_size(),
                "high node memory"
            );
        }
        if total > plan_state.memory_budget {
            child.continue_point = ContinuePoint::OutOfMemory;
        }

        top(plan_state).continue_point = return_point;
        plan_state.stack.push(child);
    }

    /// Build the partial solution for out-of-memory or abort, and make the
    /// state terminal.
    fn seal_partial(
        factory: &mut TermFactory,
        plan_state: &mut PlanState,
        out_of_memory: bool,
    ) -> Solution {
        if out_of_memory {
            factory.set_out_of_memory(true);
        }
        plan_state.terminal = true;
        let (plan, final_state) = {
            let node = top(plan_state);
            node.continue_point = ContinuePoint::Fail;
            (node.operators.clone(), node.state.create_copy())
        };
        Solution {
            plan,
            final_state,
            highest_memory_used: plan_state.highest_memory_used,
            elapsed: plan_state.start_time.elapsed(),
        }
    }
}

fn top(plan_state: &mut PlanState) -> &mut PlanNode {
    match plan_state.stack.last_mut() {
        Some(node) => node,
        None => panic!("internal error: empty search stack"),
    }
}

fn current_task(plan_state: &mut PlanState) -> TermId {
    match top(plan_state).task {
        Some(task) => task,
        None => panic!("internal error: no current task on frame"),
    }
}

fn bookkeeping_id(factory: &TermFactory, task: TermId) -> usize {
    let id = factory
        .args_of(task)
        .first()
        .and_then(|arg| factory.number(*arg));
    match id {
        Some(Number::Int(i)) if i >= 0 => i as usize,
        _ => panic!(
            "internal error: malformed bookkeeping task {}",
            factory.display(task)
        ),
    }
}
