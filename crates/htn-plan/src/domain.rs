//! HTN domain: operators, methods, and the loader surface.

use std::collections::BTreeMap;

use htn_logic::{unify, RuleSet, TermFactory, TermId, Unifier};
use thiserror::Error;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Task names the planner interprets directly, before operator or method
/// dispatch. Loaders must not expose them as regular task names; a
/// registration under one of these names is never reached.
pub const RESERVED_TASK_NAMES: [&str; 4] = ["try", "tryEnd", "countAnyOf", "failIfNoneOf"];

/// How a method treats the resolutions of its condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum MethodType {
    /// Each resolution is a separate alternative solution.
    Normal,
    /// All resolutions are concatenated into one refinement; all must
    /// succeed.
    AllSetOf,
    /// Each resolution is tried; at least one must succeed.
    AnySetOf,
}

#[derive(Debug, Error)]
pub enum DomainError {
    #[error("duplicate operator name `{0}`")]
    DuplicateOperator(String),
    #[error("malformed domain: {0}")]
    Malformed(String),
}

/// Primitive action: a head plus the facts it deletes and adds. Immutable.
#[derive(Debug, Clone)]
pub struct Operator {
    head: TermId,
    additions: Vec<TermId>,
    deletions: Vec<TermId>,
    hidden: bool,
}

impl Operator {
    pub fn head(&self) -> TermId {
        self.head
    }

    pub fn additions(&self) -> &[TermId] {
        &self.additions
    }

    pub fn deletions(&self) -> &[TermId] {
        &self.deletions
    }

    /// Hidden operators apply their effects but stay out of the plan.
    pub fn is_hidden(&self) -> bool {
        self.hidden
    }

    pub fn to_display_string(&self, factory: &TermFactory) -> String {
        format!(
            "{} => del({}), add({})",
            factory.display(self.head),
            factory.display_list(&self.deletions),
            factory.display_list(&self.additions),
        )
    }
}

/// Compound-task refinement. Immutable once added to a domain.
#[derive(Debug, Clone)]
pub struct Method {
    head: TermId,
    condition: Vec<TermId>,
    subtasks: Vec<TermId>,
    method_type: MethodType,
    is_default: bool,
    document_order: u32,
}

impl Method {
    pub fn head(&self) -> TermId {
        self.head
    }

    pub fn condition(&self) -> &[TermId] {
        &self.condition
    }

    pub fn subtasks(&self) -> &[TermId] {
        &self.subtasks
    }

    pub fn method_type(&self) -> MethodType {
        self.method_type
    }

    /// The `else` flag: tried only when no earlier sibling in the group
    /// produced a solution.
    pub fn is_default(&self) -> bool {
        self.is_default
    }

    /// Order the method was written down in; monotonically assigned at load
    /// time and used to sort candidates at every decision point.
    pub fn document_order(&self) -> u32 {
        self.document_order
    }

    pub fn to_display_string(&self, factory: &TermFactory) -> String {
        format!(
            "{} => if({}), do({})",
            factory.display(self.head),
            factory.display_list(&self.condition),
            factory.display_list(&self.subtasks),
        )
    }
}

/// Storage of methods (indexed by head id) and operators (indexed by head
/// name, at most one per name).
#[derive(Debug, Default)]
pub struct Domain {
    methods: Vec<Method>,
    methods_by_head: BTreeMap<TermId, Vec<usize>>,
    operators: BTreeMap<String, Operator>,
    next_document_order: u32,
}

impl Domain {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a method for its head's compound task. Always succeeds and
    /// assigns the next document order.
    pub fn add_method(
        &mut self,
        head: TermId,
        condition: Vec<TermId>,
        subtasks: Vec<TermId>,
        method_type: MethodType,
        is_default: bool,
    ) -> u32 {
        self.next_document_order += 1;
        let document_order = self.next_document_order;
        let index = self.methods.len();
        self.methods.push(Method {
            head,
            condition,
            subtasks,
            method_type,
            is_default,
            document_order,
        });
        self.methods_by_head.entry(head).or_default().push(index);
        document_order
    }

    /// Register the single operator for a primitive-task name. The only
    /// rejection is a duplicate name.
    pub fn add_operator(
        &mut self,
        factory: &TermFactory,
        head: TermId,
        additions: Vec<TermId>,
        deletions: Vec<TermId>,
        hidden: bool,
    ) -> Result<(), DomainError> {
        let name = factory.name_of(head).to_string();
        if self.operators.contains_key(&name) {
            return Err(DomainError::DuplicateOperator(name));
        }
        self.operators.insert(
            name,
            Operator {
                head,
                additions,
                deletions,
                hidden,
            },
        );
        Ok(())
    }

    pub fn operator(&self, name: &str) -> Option<&Operator> {
        self.operators.get(name)
    }

    pub fn method(&self, index: usize) -> &Method {
        &self.methods[index]
    }

    pub fn method_count(&self) -> usize {
        self.methods.len()
    }

    pub fn operator_count(&self) -> usize {
        self.operators.len()
    }

    /// Every method whose head unifies with `task`, sorted by ascending
    /// document order so `else` chains and document-order enumeration work.
    pub fn find_methods_that_unify(
        &self,
        factory: &mut TermFactory,
        task: TermId,
    ) -> Vec<(usize, Unifier)> {
        let mut found = Vec::new();
        for indices in self.methods_by_head.values() {
            for &index in indices {
                if let Some(unifier) = unify(factory, self.methods[index].head, task) {
                    found.push((index, unifier));
                }
            }
        }
        found.sort_by_key(|(index, _)| self.methods[*index].document_order);
        found
    }

    /// String-rendered operator lookup, for tests and debugging.
    pub fn has_operator(
        &self,
        factory: &TermFactory,
        head: &str,
        deletions: &str,
        additions: &str,
    ) -> bool {
        let composed = format!("{head} => del({deletions}), add({additions})");
        let name = head.split('(').next().unwrap_or(head);
        self.operators
            .get(name)
            .map(|op| op.to_display_string(factory) == composed)
            .unwrap_or(false)
    }

    /// String-rendered method lookup, for tests and debugging.
    pub fn has_method(
        &self,
        factory: &TermFactory,
        head: &str,
        condition: &str,
        subtasks: &str,
    ) -> bool {
        let composed = format!("{head} => if({condition}), do({subtasks})");
        self.methods
            .iter()
            .any(|m| m.to_display_string(factory) == composed)
    }
}

/// Populates a domain and an initial state through the factory.
///
/// This is the seam where a concrete front end (a text syntax, a generated
/// model, a test fixture) hands the planner its inputs; the core never
/// parses anything itself.
pub trait DomainLoader {
    fn load(
        &self,
        factory: &mut TermFactory,
        domain: &mut Domain,
        state: &mut RuleSet,
    ) -> Result<(), DomainError>;
}
