//! Substitutions and Robinson unification (no occurs-check).

use std::mem;

use crate::factory::TermFactory;
use crate::term::{TermId, TermKind};

/// An ordered mapping from variables to terms.
///
/// Bindings are applied left to right and iterated to a fixed point, so a
/// binding may reference variables bound later in the list. The mapping is
/// cycle-free by construction of [`unify`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Unifier {
    bindings: Vec<(TermId, TermId)>,
}

impl Unifier {
    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }

    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &(TermId, TermId)> {
        self.bindings.iter()
    }

    /// The value bound to `variable`, if any.
    pub fn bound(&self, variable: TermId) -> Option<TermId> {
        self.bindings
            .iter()
            .find(|(v, _)| *v == variable)
            .map(|(_, t)| *t)
    }

    pub(crate) fn bind(&mut self, variable: TermId, value: TermId) {
        self.bindings.push((variable, value));
    }

    /// True when no right-hand side contains an unbound variable.
    pub fn is_ground(&self, factory: &TermFactory) -> bool {
        self.bindings.iter().all(|(_, t)| factory.is_ground(*t))
    }

    fn apply_once(&self, factory: &mut TermFactory, term: TermId) -> TermId {
        match factory.kind_of(term) {
            TermKind::Constant => term,
            TermKind::Variable => self.bound(term).unwrap_or(term),
            TermKind::Functor => {
                if factory.is_ground(term) {
                    return term;
                }
                let name = factory.symbol_of(term);
                let args: Vec<TermId> = factory.args_of(term).to_vec();
                let replaced: Vec<TermId> =
                    args.iter().map(|a| self.apply_once(factory, *a)).collect();
                if replaced == args {
                    term
                } else {
                    factory.functor_from_symbol(name, &replaced)
                }
            }
        }
    }

    /// Apply the substitution to `term` until a fixed point.
    ///
    /// Iteration is bounded by the binding count, which is the longest
    /// dependency chain a cycle-free mapping can produce.
    pub fn substitute(&self, factory: &mut TermFactory, term: TermId) -> TermId {
        let mut current = term;
        for _ in 0..=self.bindings.len() {
            let next = self.apply_once(factory, current);
            if next == current {
                return current;
            }
            current = next;
        }
        current
    }

    pub fn substitute_all(&self, factory: &mut TermFactory, terms: &[TermId]) -> Vec<TermId> {
        terms
            .iter()
            .map(|t| self.substitute(factory, *t))
            .collect()
    }

    /// Combine with `other`, failing when the two disagree on a shared
    /// variable.
    pub fn merge(&self, factory: &mut TermFactory, other: &Unifier) -> Option<Unifier> {
        let mut out = self.clone();
        for (var, value) in other.iter() {
            match out.bound(*var) {
                None => out.bind(*var, *value),
                Some(existing) => {
                    let a = out.substitute(factory, existing);
                    let b = out.substitute(factory, *value);
                    if a != b {
                        return None;
                    }
                }
            }
        }
        Some(out)
    }

    /// Composition: apply `other` to every right-hand side of `self`, then
    /// append the bindings of `other` for variables `self` leaves free.
    pub fn compose(&self, factory: &mut TermFactory, other: &Unifier) -> Unifier {
        let mut out = Unifier::default();
        for (var, value) in self.iter() {
            out.bind(*var, other.substitute(factory, *value));
        }
        for (var, value) in other.iter() {
            if out.bound(*var).is_none() {
                out.bind(*var, *value);
            }
        }
        out
    }

    /// Approximate heap size for memory accounting.
    pub fn dynamic_size(&self) -> usize {
        mem::size_of::<Unifier>() + self.bindings.len() * mem::size_of::<(TermId, TermId)>()
    }
}

/// Most general unifier of `a` and `b`, or `None` when they do not unify.
///
/// Constants unify only with the same constant; a variable unifies with any
/// term; functors unify when name and arity match and all children unify.
/// There is no occurs-check.
pub fn unify(factory: &mut TermFactory, a: TermId, b: TermId) -> Option<Unifier> {
    let mut out = Unifier::default();
    if unify_into(factory, a, b, &mut out) {
        Some(out)
    } else {
        None
    }
}

fn unify_into(factory: &mut TermFactory, a: TermId, b: TermId, out: &mut Unifier) -> bool {
    let a = out.substitute(factory, a);
    let b = out.substitute(factory, b);
    if a == b {
        return true;
    }
    match (factory.kind_of(a), factory.kind_of(b)) {
        (TermKind::Variable, _) => {
            out.bind(a, b);
            true
        }
        (_, TermKind::Variable) => {
            out.bind(b, a);
            true
        }
        (TermKind::Functor, TermKind::Functor) => {
            if factory.symbol_of(a) != factory.symbol_of(b)
                || factory.arity_of(a) != factory.arity_of(b)
            {
                return false;
            }
            let pairs: Vec<(TermId, TermId)> = factory
                .args_of(a)
                .iter()
                .copied()
                .zip(factory.args_of(b).iter().copied())
                .collect();
            pairs
                .into_iter()
                .all(|(x, y)| unify_into(factory, x, y, out))
        }
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identical_terms_unify_with_empty_unifier() {
        let mut f = TermFactory::new();
        let a = f.constant("a");
        let t = f.functor("at", &[a, a]);
        let u = unify(&mut f, t, t).expect("unifies");
        assert!(u.is_empty());
        assert_eq!(u.substitute(&mut f, t), t);
    }

    #[test]
    fn variable_binds_to_term() {
        let mut f = TermFactory::new();
        let x = f.variable("x");
        let a = f.constant("a");
        let u = unify(&mut f, x, a).expect("unifies");
        assert_eq!(u.bound(x), Some(a));
        assert!(u.is_ground(&f));
    }

    #[test]
    fn functors_unify_childwise() {
        let mut f = TermFactory::new();
        let x = f.variable("x");
        let y = f.variable("y");
        let a = f.constant("a");
        let b = f.constant("b");
        let open = f.functor("at", &[x, y]);
        let ground = f.functor("at", &[a, b]);
        let u = unify(&mut f, open, ground).expect("unifies");
        assert_eq!(u.substitute(&mut f, open), ground);
    }

    #[test]
    fn arity_and_name_mismatch_fail() {
        let mut f = TermFactory::new();
        let a = f.constant("a");
        let one = f.functor("at", &[a]);
        let two = f.functor("at", &[a, a]);
        let other = f.functor("in", &[a]);
        assert!(unify(&mut f, one, two).is_none());
        assert!(unify(&mut f, one, other).is_none());
    }

    #[test]
    fn conflicting_repeated_variable_fails() {
        let mut f = TermFactory::new();
        let x = f.variable("x");
        let a = f.constant("a");
        let b = f.constant("b");
        let open = f.functor("pair", &[x, x]);
        let ground = f.functor("pair", &[a, b]);
        assert!(unify(&mut f, open, ground).is_none());
        let same = f.functor("pair", &[a, a]);
        assert!(unify(&mut f, open, same).is_some());
    }

    #[test]
    fn unification_is_symmetric() {
        let mut f = TermFactory::new();
        let x = f.variable("x");
        let a = f.constant("a");
        let left = f.functor("at", &[x, a]);
        let y = f.variable("y");
        let right = f.functor("at", &[a, y]);

        let u1 = unify(&mut f, left, right).expect("unifies");
        let u2 = unify(&mut f, right, left).expect("unifies");
        let via1 = u1.substitute(&mut f, left);
        let via2 = u2.substitute(&mut f, left);
        assert_eq!(via1, via2);
        assert_eq!(u1.substitute(&mut f, right), via1);
    }

    #[test]
    fn substitution_is_idempotent_after_fixed_point() {
        let mut f = TermFactory::new();
        let x = f.variable("x");
        let y = f.variable("y");
        let a = f.constant("a");
        let mut u = Unifier::default();
        // x -> f(y), y -> a: fixed point resolves x fully.
        let fy = f.functor("f", &[y]);
        u.bind(x, fy);
        u.bind(y, a);
        let once = u.substitute(&mut f, x);
        let twice = u.substitute(&mut f, once);
        assert_eq!(once, twice);
        let fa = f.functor("f", &[a]);
        assert_eq!(once, fa);
    }

    #[test]
    fn merge_rejects_conflicts_and_accepts_agreement() {
        let mut f = TermFactory::new();
        let x = f.variable("x");
        let a = f.constant("a");
        let b = f.constant("b");

        let mut u1 = Unifier::default();
        u1.bind(x, a);
        let mut u2 = Unifier::default();
        u2.bind(x, b);
        assert!(u1.merge(&mut f, &u2).is_none());

        let mut u3 = Unifier::default();
        u3.bind(x, a);
        let merged = u1.merge(&mut f, &u3).expect("agreeing unifiers merge");
        assert_eq!(merged.bound(x), Some(a));
    }
}
