use htn_logic::{unify, GoalResolver, RuleSet, TermFactory, TermId, Unifier};

fn sample_terms(f: &mut TermFactory) -> Vec<TermId> {
    let a = f.constant("a");
    let b = f.constant("b");
    let x = f.variable("x");
    let y = f.variable("y");
    let fa = f.functor("f", &[a]);
    let fx = f.functor("f", &[x]);
    let gxy = f.functor("g", &[x, y]);
    let gab = f.functor("g", &[a, b]);
    let nested = f.functor("h", &[fx, gab]);
    vec![a, b, x, y, fa, fx, gxy, gab, nested]
}

#[test]
fn self_unification_is_empty_and_empty_substitution_is_identity() {
    let mut f = TermFactory::new();
    let terms = sample_terms(&mut f);
    let empty = Unifier::default();
    for term in terms {
        let u = unify(&mut f, term, term).expect("every term unifies with itself");
        assert!(u.is_empty(), "Unify(a, a) must be the empty unifier");
        assert_eq!(
            empty.substitute(&mut f, term),
            term,
            "the empty substitution must be the identity"
        );
    }
}

fn occurs_in(f: &TermFactory, var: TermId, term: TermId) -> bool {
    if var == term {
        return true;
    }
    f.args_of(term).iter().any(|arg| occurs_in(f, var, *arg))
}

#[test]
fn unification_success_is_symmetric() {
    let mut f = TermFactory::new();
    let terms = sample_terms(&mut f);
    for &left in &terms {
        for &right in &terms {
            // Without an occurs-check, a variable against a term containing
            // it yields a rational-tree binding; skip those pairs.
            let cyclic = (f.is_variable(left) && left != right && occurs_in(&f, left, right))
                || (f.is_variable(right) && left != right && occurs_in(&f, right, left));
            if cyclic {
                continue;
            }

            let forward = unify(&mut f, left, right);
            let backward = unify(&mut f, right, left);
            assert_eq!(
                forward.is_some(),
                backward.is_some(),
                "Unify({}, {}) succeeds iff the reverse does",
                f.display(left),
                f.display(right)
            );
            if let (Some(fw), Some(bw)) = (forward, backward) {
                assert_eq!(
                    fw.substitute(&mut f, left),
                    fw.substitute(&mut f, right),
                    "a unifier makes its two terms structurally equal"
                );
                assert_eq!(bw.substitute(&mut f, left), bw.substitute(&mut f, right));
            }
        }
    }
}

#[test]
fn substitution_is_idempotent() {
    let mut f = TermFactory::new();
    let x = f.variable("x");
    let y = f.variable("y");
    let a = f.constant("a");
    let gya = f.functor("g", &[y, a]);
    let open = f.functor("h", &[x, y]);
    let closed = f.functor("h", &[gya, y]);

    let u = unify(&mut f, open, closed).expect("unifies");
    for &term in &[open, closed, x, y] {
        let once = u.substitute(&mut f, term);
        let twice = u.substitute(&mut f, once);
        assert_eq!(once, twice, "Subst(u, Subst(u, t)) = Subst(u, t)");
    }
}

#[test]
fn empty_conjunction_is_trivially_true() {
    let mut f = TermFactory::new();
    let state = RuleSet::new();
    let resolver = GoalResolver::new();
    let result = resolver.resolve_all(&mut f, &state, &[], 1 << 20);
    let solutions = result.solutions.expect("trivially true");
    assert_eq!(solutions.len(), 1);
    assert!(solutions[0].is_empty());
    assert_eq!(result.furthest_failure_index, None);
}

#[test]
fn resolver_is_deterministic_with_rule_renaming() {
    let run = || {
        let mut f = TermFactory::new();
        let mut state = RuleSet::new();

        for name in ["a", "b", "c"] {
            let c = f.constant(name);
            let node = f.functor("node", &[c]);
            state.add_fact(node);
        }
        let x = f.variable("x");
        let y = f.variable("y");
        let head = f.functor("pair", &[x, y]);
        let bx = f.functor("node", &[x]);
        let by = f.functor("node", &[y]);
        state.add_rule(head, vec![bx, by]);

        let p = f.variable("p");
        let q = f.variable("q");
        let goal = f.functor("pair", &[p, q]);
        let resolver = GoalResolver::new();
        let result = resolver.resolve_all(&mut f, &state, &[goal], 1 << 20);
        let solutions = result.solutions.expect("nine pairs");
        assert_eq!(solutions.len(), 9);
        solutions
            .iter()
            .map(|u| {
                u.iter()
                    .map(|(var, value)| format!("{}={}", f.display(*var), f.display(*value)))
                    .collect::<Vec<_>>()
                    .join(",")
            })
            .collect::<Vec<_>>()
    };
    assert_eq!(run(), run());
}
