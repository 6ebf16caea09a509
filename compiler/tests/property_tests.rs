// Property-based tests for front-end invariants.
//
// Three categories:
// 1. Unification: ground types unify exactly when equal, bindings are
//    honoured, the occurs-check rejects infinite types, failures roll back
// 2. Initialization lattice: meet is commutative, associative, idempotent
// 3. Incremental soundness: an edited session agrees with a fresh one
//
// Uses proptest with explicit configuration to prevent CI flakiness.

use emc::init_check::InitState;
use emc::session::Session;
use emc::types::Type;
use emc::unify::{Substitution, UnifyError};
use proptest::prelude::*;

// ── Generators ──────────────────────────────────────────────────────────────

/// Ground types (no variables, no error type), nesting functions.
fn arb_type() -> impl Strategy<Value = Type> {
    let leaf = prop_oneof![
        Just(Type::Int),
        Just(Type::Bool),
        Just(Type::Str),
        Just(Type::Unit),
    ];
    leaf.prop_recursive(3, 16, 3, |inner| {
        (prop::collection::vec(inner.clone(), 0..3), inner).prop_map(|(params, ret)| Type::func(params, ret))
    })
}

fn arb_state() -> impl Strategy<Value = InitState> {
    prop_oneof![
        Just(InitState::Unassigned),
        Just(InitState::MaybeAssigned),
        Just(InitState::DefinitelyAssigned),
    ]
}

/// One statement over the variables `v0`..`v2`.
fn arb_stmt() -> impl Strategy<Value = String> {
    let var = (0u8..3).prop_map(|i| format!("v{i}"));
    let int = 0i64..100;
    prop_oneof![
        var.clone().prop_map(|v| format!("let {v};")),
        (var.clone(), int.clone()).prop_map(|(v, n)| format!("let {v} = {n};")),
        (var.clone(), int.clone()).prop_map(|(v, n)| format!("{v} = {n};")),
        var.clone().prop_map(|v| format!("print({v});")),
        (var.clone(), any::<bool>()).prop_map(|(v, b)| format!("{v} = {b};")),
        (any::<bool>(), var.clone(), int.clone())
            .prop_map(|(c, v, n)| format!("if {c} {{ {v} = {n}; }}")),
        (var.clone(), var).prop_map(|(a, b)| format!("let {a} = {b} + 1;")),
    ]
}

fn arb_program() -> impl Strategy<Value = String> {
    prop::collection::vec(arb_stmt(), 1..8).prop_map(|stmts| stmts.join("\n"))
}

// ── 1. Unification ──────────────────────────────────────────────────────────

proptest! {
    #![proptest_config(ProptestConfig {
        cases: 200,
        max_shrink_iters: 200,
        .. ProptestConfig::default()
    })]

    #[test]
    fn ground_types_unify_iff_equal(a in arb_type(), b in arb_type()) {
        let mut subst = Substitution::new();
        prop_assert_eq!(subst.unify(&a, &b).is_ok(), a == b);
    }

    #[test]
    fn bound_variable_applies_to_its_type(t in arb_type()) {
        let mut subst = Substitution::new();
        let v = subst.fresh();
        prop_assert!(subst.unify(&Type::Var(v), &t).is_ok());
        prop_assert_eq!(subst.apply(&Type::Var(v)), t.clone());
        prop_assert!(subst.unify(&t, &Type::Var(v)).is_ok());
    }

    #[test]
    fn occurs_check_rejects_infinite_types(t in arb_type()) {
        let mut subst = Substitution::new();
        let v = subst.fresh();
        let infinite = Type::func(vec![Type::Var(v)], t);
        let result = subst.unify(&Type::Var(v), &infinite);
        prop_assert!(
            matches!(result, Err(UnifyError::Occurs { .. })),
            "expected occurs failure, got {:?}", result
        );
        prop_assert_eq!(subst.lookup(v), None);
    }

    #[test]
    fn failed_unification_rolls_back(a in arb_type(), b in arb_type()) {
        prop_assume!(a != b);
        let mut subst = Substitution::new();
        let v = subst.fresh();
        let w = subst.fresh();
        prop_assert!(subst.unify(&Type::Var(v), &Type::Int).is_ok());
        let before = subst.clone();
        // `w` would be bound on the way to the mismatch.
        let lhs = Type::func(vec![Type::Var(w), a], Type::Unit);
        let rhs = Type::func(vec![Type::Bool, b], Type::Unit);
        prop_assert!(subst.unify(&lhs, &rhs).is_err());
        prop_assert_eq!(subst, before);
    }

    #[test]
    fn error_type_unifies_with_everything(t in arb_type()) {
        let mut subst = Substitution::new();
        prop_assert!(subst.unify(&Type::Error, &t).is_ok());
        prop_assert!(subst.unify(&t, &Type::Error).is_ok());
    }
}

// ── 2. Initialization lattice ───────────────────────────────────────────────

proptest! {
    #![proptest_config(ProptestConfig {
        cases: 64,
        .. ProptestConfig::default()
    })]

    #[test]
    fn meet_is_a_semilattice(a in arb_state(), b in arb_state(), c in arb_state()) {
        prop_assert_eq!(a.meet(b), b.meet(a));
        prop_assert_eq!(a.meet(b).meet(c), a.meet(b.meet(c)));
        prop_assert_eq!(a.meet(a), a);
    }

    #[test]
    fn maybe_absorbs(a in arb_state()) {
        prop_assert_eq!(a.meet(InitState::MaybeAssigned), InitState::MaybeAssigned);
    }
}

// ── 3. Incremental soundness ────────────────────────────────────────────────

proptest! {
    #![proptest_config(ProptestConfig {
        cases: 48,
        max_shrink_iters: 100,
        .. ProptestConfig::default()
    })]

    #[test]
    fn edited_session_matches_fresh_session(before in arb_program(), after in arb_program()) {
        let session = Session::default();
        let file = session.open_file("p.em", before.as_str());
        session.all_diagnostics(file).unwrap();
        session.set_text(file, after.as_str()).unwrap();
        let incremental = session.all_diagnostics(file).unwrap();

        let fresh = Session::default();
        let fresh_file = fresh.open_file("p.em", after.as_str());
        let expected = fresh.all_diagnostics(fresh_file).unwrap();
        prop_assert_eq!(incremental.as_ref(), expected.as_ref());
    }

    #[test]
    fn checking_is_idempotent(program in arb_program()) {
        let session = Session::default();
        let file = session.open_file("p.em", program.as_str());
        let first = session.all_diagnostics(file).unwrap();
        session.reset_stats();
        let second = session.all_diagnostics(file).unwrap();
        prop_assert_eq!(first, second);
        prop_assert_eq!(session.stats().total_executions(), 0);
    }
}
