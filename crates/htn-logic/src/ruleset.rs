//! Facts and Horn rules with copy-on-write snapshots.
//!
//! A `RuleSet` is a locked shared base (installed by the loader, never
//! mutated once the first copy exists) plus a per-copy delta of added rules
//! and tombstoned base facts. Copies are cheap: the base is shared behind an
//! `Arc`, only the delta is cloned.

use std::collections::BTreeSet;
use std::mem;
use std::sync::Arc;

use crate::factory::TermFactory;
use crate::term::TermId;
use crate::unify::unify;

/// A head plus a conjunction of body goals; a fact is a rule with an empty
/// body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rule {
    head: TermId,
    body: Vec<TermId>,
}

impl Rule {
    pub fn new(head: TermId, body: Vec<TermId>) -> Self {
        Self { head, body }
    }

    pub fn fact(head: TermId) -> Self {
        Self {
            head,
            body: Vec::new(),
        }
    }

    pub fn head(&self) -> TermId {
        self.head
    }

    pub fn body(&self) -> &[TermId] {
        &self.body
    }

    pub fn is_fact(&self) -> bool {
        self.body.is_empty()
    }

    fn dynamic_size(&self) -> usize {
        mem::size_of::<Rule>() + self.body.len() * mem::size_of::<TermId>()
    }
}

#[derive(Debug, Clone, Default)]
pub struct RuleSet {
    base: Arc<Vec<Rule>>,
    added: Vec<Rule>,
    removed_base: BTreeSet<usize>,
}

impl RuleSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a fact. Lands in the base while this set is exclusively owned,
    /// in the delta once any copy shares the base.
    pub fn add_fact(&mut self, head: TermId) {
        self.add_rule(head, Vec::new());
    }

    pub fn add_rule(&mut self, head: TermId, body: Vec<TermId>) {
        let rule = Rule::new(head, body);
        match Arc::get_mut(&mut self.base) {
            Some(base) => base.push(rule),
            None => self.added.push(rule),
        }
    }

    /// An independent delta over the same locked base.
    pub fn create_copy(&self) -> RuleSet {
        self.clone()
    }

    /// Rules in document order: base insertion order minus tombstones, then
    /// delta insertion order.
    pub fn rules(&self) -> impl Iterator<Item = &Rule> {
        self.base
            .iter()
            .enumerate()
            .filter(|(i, _)| !self.removed_base.contains(i))
            .map(|(_, r)| r)
            .chain(self.added.iter())
    }

    pub fn facts(&self) -> impl Iterator<Item = &Rule> {
        self.rules().filter(|r| r.is_fact())
    }

    fn contains_fact(&self, head: TermId) -> bool {
        self.facts().any(|r| r.head() == head)
    }

    /// Apply an operator match: delete every visible fact whose head unifies
    /// with a removal pattern, then append additions that are not already
    /// visible. Rules with bodies are never deleted.
    pub fn update(&mut self, factory: &mut TermFactory, removals: &[TermId], additions: &[TermId]) {
        for &pattern in removals {
            let doomed_base: Vec<usize> = self
                .base
                .iter()
                .enumerate()
                .filter(|(i, r)| {
                    !self.removed_base.contains(i)
                        && r.is_fact()
                        && unify(factory, pattern, r.head()).is_some()
                })
                .map(|(i, _)| i)
                .collect();
            self.removed_base.extend(doomed_base);

            let mut index = 0;
            while index < self.added.len() {
                let head = self.added[index].head();
                if self.added[index].is_fact() && unify(factory, pattern, head).is_some() {
                    self.added.remove(index);
                } else {
                    index += 1;
                }
            }
        }

        for &fact in additions {
            if !self.contains_fact(fact) {
                self.added.push(Rule::fact(fact));
            }
        }
    }

    /// Approximate size of the locked base, counted once per search.
    pub fn dynamic_shared_size(&self) -> usize {
        self.base.iter().map(Rule::dynamic_size).sum()
    }

    /// Approximate size of this copy's delta.
    pub fn dynamic_size(&self) -> usize {
        mem::size_of::<RuleSet>()
            + self.added.iter().map(Rule::dynamic_size).sum::<usize>()
            + self.removed_base.len() * mem::size_of::<usize>()
    }

    pub fn to_string_facts(&self, factory: &TermFactory) -> String {
        let mut out = String::new();
        for (i, rule) in self.facts().enumerate() {
            if i > 0 {
                out.push_str(", ");
            }
            out.push_str(&factory.term_to_string(rule.head()));
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(factory: &mut TermFactory, a: &str, b: &str) -> TermId {
        let a = factory.constant(a);
        let b = factory.constant(b);
        factory.functor("at", &[a, b])
    }

    #[test]
    fn copy_shares_base_and_isolates_delta() {
        let mut f = TermFactory::new();
        let home = at(&mut f, "p", "home");
        let park = at(&mut f, "p", "park");

        let mut state = RuleSet::new();
        state.add_fact(home);

        let mut copy = state.create_copy();
        copy.update(&mut f, &[home], &[park]);

        assert_eq!(state.to_string_facts(&f), "at(p,home)");
        assert_eq!(copy.to_string_facts(&f), "at(p,park)");
    }

    #[test]
    fn copy_without_updates_prints_identically() {
        let mut f = TermFactory::new();
        let a = at(&mut f, "a", "start");
        let b = at(&mut f, "b", "start");
        let mut state = RuleSet::new();
        state.add_fact(a);
        state.add_fact(b);

        let copy = state.create_copy();
        assert_eq!(copy.to_string_facts(&f), state.to_string_facts(&f));
    }

    #[test]
    fn additions_after_lock_land_in_delta() {
        let mut f = TermFactory::new();
        let a = at(&mut f, "a", "start");
        let b = at(&mut f, "b", "start");
        let mut state = RuleSet::new();
        state.add_fact(a);

        let _copy = state.create_copy();
        let shared_before = state.dynamic_shared_size();
        state.add_fact(b);
        assert_eq!(
            state.dynamic_shared_size(),
            shared_before,
            "locked base must not grow"
        );
        assert_eq!(state.to_string_facts(&f), "at(a,start), at(b,start)");
    }

    #[test]
    fn removal_patterns_match_by_unification() {
        let mut f = TermFactory::new();
        let a = f.constant("a");
        let z = f.variable("z");
        let start = at(&mut f, "a", "start");
        let goal = at(&mut f, "a", "goal");
        let other = at(&mut f, "b", "start");
        let pattern = f.functor("at", &[a, z]);

        let mut state = RuleSet::new();
        state.add_fact(start);
        state.add_fact(goal);
        state.add_fact(other);

        let mut copy = state.create_copy();
        copy.update(&mut f, &[pattern], &[]);
        assert_eq!(copy.to_string_facts(&f), "at(b,start)");
    }

    #[test]
    fn duplicate_additions_are_skipped() {
        let mut f = TermFactory::new();
        let fact = at(&mut f, "a", "start");
        let mut state = RuleSet::new();
        state.add_fact(fact);

        let mut copy = state.create_copy();
        copy.update(&mut f, &[], &[fact]);
        copy.update(&mut f, &[], &[fact]);
        assert_eq!(copy.to_string_facts(&f), "at(a,start)");
        assert_eq!(copy.facts().count(), 1);
    }

    #[test]
    fn rules_with_bodies_survive_updates() {
        let mut f = TermFactory::new();
        let x = f.variable("x");
        let near = f.functor("near", &[x]);
        let atx = f.functor("at", &[x]);
        let a = f.constant("a");
        let at_a = f.functor("at", &[a]);
        let pattern = f.functor("at", &[x]);

        let mut state = RuleSet::new();
        state.add_rule(near, vec![atx]);
        state.add_fact(at_a);

        let mut copy = state.create_copy();
        copy.update(&mut f, &[pattern], &[]);
        assert_eq!(copy.rules().count(), 1, "rule with body must remain");
        assert!(copy.facts().next().is_none());
    }
}
