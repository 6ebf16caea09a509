// unify.rs — Substitution and unification with occurs-check
//
// A `Substitution` maps inference variables to types. Binding a variable
// first checks that it does not occur in the bound type (after applying
// the current substitution), so the substitution never describes an
// infinite type and `apply` always terminates.
//
// Preconditions: variables passed in were produced by `fresh` on the same
//   substitution.
// Postconditions: after a successful `unify(a, b)`, `apply(a) == apply(b)`
//   unless one side contains `Type::Error`. A failed `unify` leaves the
//   substitution exactly as it was.
// Failure modes: `UnifyError::Mismatch`, `UnifyError::Arity`,
//   `UnifyError::Occurs`.
// Side effects: none.

use thiserror::Error;

use crate::types::{Type, TypeVar};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum UnifyError {
    #[error("mismatched types: expected `{expected}`, found `{found}`")]
    Mismatch { expected: Type, found: Type },
    #[error("this function takes {expected} argument(s) but {found} were supplied")]
    Arity { expected: usize, found: usize },
    #[error("type `{ty}` would have to contain itself")]
    Occurs { var: TypeVar, ty: Type },
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Substitution {
    bindings: Vec<Option<Type>>,
}

impl Substitution {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate an unbound variable.
    pub fn fresh(&mut self) -> TypeVar {
        let var = TypeVar(self.bindings.len() as u32);
        self.bindings.push(None);
        var
    }

    pub fn lookup(&self, var: TypeVar) -> Option<&Type> {
        self.bindings.get(var.index()).and_then(Option::as_ref)
    }

    /// Follow variable bindings until reaching a non-variable or an
    /// unbound variable. Does not descend into function types.
    pub fn shallow(&self, ty: &Type) -> Type {
        let mut current = ty.clone();
        while let Type::Var(var) = current {
            match self.lookup(var) {
                Some(bound) => current = bound.clone(),
                None => break,
            }
        }
        current
    }

    /// Apply the substitution everywhere inside `ty`.
    pub fn apply(&self, ty: &Type) -> Type {
        match self.shallow(ty) {
            Type::Fn(params, ret) => Type::Fn(
                params.iter().map(|p| self.apply(p)).collect(),
                Box::new(self.apply(&ret)),
            ),
            other => other,
        }
    }

    /// Apply the substitution, then default any variable left unbound to
    /// `Unit`. The result contains no variables.
    pub fn finalize(&self, ty: &Type) -> Type {
        default_vars(self.apply(ty))
    }

    /// Bind an unbound variable to `Error`. Bound variables are left alone.
    pub fn poison(&mut self, var: TypeVar) {
        if let Some(slot) = self.bindings.get_mut(var.index()) {
            if slot.is_none() {
                *slot = Some(Type::Error);
            }
        }
    }

    /// Make `expected` and `found` equal, or leave the substitution untouched
    /// and report why they cannot be.
    pub fn unify(&mut self, expected: &Type, found: &Type) -> Result<(), UnifyError> {
        let saved = self.bindings.clone();
        let result = self.unify_inner(expected, found);
        if result.is_err() {
            self.bindings = saved;
        }
        result
    }

    fn unify_inner(&mut self, expected: &Type, found: &Type) -> Result<(), UnifyError> {
        let a = self.shallow(expected);
        let b = self.shallow(found);
        match (a, b) {
            (Type::Var(x), Type::Var(y)) if x == y => Ok(()),
            // An unbound variable meeting the error type becomes the error
            // type, so later uses are absorbed as well.
            (Type::Var(var), ty) | (ty, Type::Var(var)) => self.bind(var, ty),
            (Type::Error, _) | (_, Type::Error) => Ok(()),
            (Type::Int, Type::Int)
            | (Type::Bool, Type::Bool)
            | (Type::Str, Type::Str)
            | (Type::Unit, Type::Unit) => Ok(()),
            (Type::Fn(ps, r), Type::Fn(qs, s)) => {
                if ps.len() != qs.len() {
                    return Err(UnifyError::Arity {
                        expected: ps.len(),
                        found: qs.len(),
                    });
                }
                for (p, q) in ps.iter().zip(qs.iter()) {
                    self.unify_inner(p, q)?;
                }
                self.unify_inner(&r, &s)
            }
            (a, b) => Err(UnifyError::Mismatch {
                expected: self.apply(&a),
                found: self.apply(&b),
            }),
        }
    }

    fn bind(&mut self, var: TypeVar, ty: Type) -> Result<(), UnifyError> {
        let ty = self.apply(&ty);
        if ty.mentions(var) {
            return Err(UnifyError::Occurs { var, ty });
        }
        if let Some(slot) = self.bindings.get_mut(var.index()) {
            *slot = Some(ty);
        }
        Ok(())
    }
}

fn default_vars(ty: Type) -> Type {
    match ty {
        Type::Var(_) => Type::Unit,
        Type::Fn(params, ret) => Type::Fn(
            params.into_iter().map(default_vars).collect(),
            Box::new(default_vars(*ret)),
        ),
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn binds_variable_to_concrete_type() {
        let mut s = Substitution::new();
        let a = s.fresh();
        s.unify(&Type::Var(a), &Type::Int).unwrap();
        assert_eq!(s.apply(&Type::Var(a)), Type::Int);
    }

    #[test]
    fn chains_through_variables() {
        let mut s = Substitution::new();
        let a = s.fresh();
        let b = s.fresh();
        s.unify(&Type::Var(a), &Type::Var(b)).unwrap();
        s.unify(&Type::Var(b), &Type::Bool).unwrap();
        assert_eq!(s.apply(&Type::Var(a)), Type::Bool);
    }

    #[test]
    fn mismatch_reports_both_sides() {
        let mut s = Substitution::new();
        let err = s.unify(&Type::Int, &Type::Bool).unwrap_err();
        assert_eq!(
            err,
            UnifyError::Mismatch {
                expected: Type::Int,
                found: Type::Bool
            }
        );
        assert_eq!(
            err.to_string(),
            "mismatched types: expected `Int`, found `Bool`"
        );
    }

    #[test]
    fn error_type_absorbs() {
        let mut s = Substitution::new();
        s.unify(&Type::Error, &Type::Int).unwrap();
        s.unify(&Type::func(vec![], Type::Unit), &Type::Error).unwrap();
    }

    #[test]
    fn variable_meeting_error_becomes_error() {
        let mut s = Substitution::new();
        let a = s.fresh();
        s.unify(&Type::Var(a), &Type::Error).unwrap();
        assert_eq!(s.apply(&Type::Var(a)), Type::Error);
        s.unify(&Type::Int, &Type::Var(a)).unwrap();
    }

    #[test]
    fn occurs_check_rejects_infinite_types() {
        let mut s = Substitution::new();
        let a = s.fresh();
        let looped = Type::func(vec![Type::Var(a)], Type::Int);
        let err = s.unify(&Type::Var(a), &looped).unwrap_err();
        assert!(matches!(err, UnifyError::Occurs { var, .. } if var == a));
        assert_eq!(s.lookup(a), None);
    }

    #[test]
    fn occurs_check_sees_through_bindings() {
        let mut s = Substitution::new();
        let a = s.fresh();
        let b = s.fresh();
        s.unify(&Type::Var(b), &Type::func(vec![], Type::Var(a))).unwrap();
        assert!(s.unify(&Type::Var(a), &Type::Var(b)).is_err());
    }

    #[test]
    fn failed_unification_rolls_back_partial_bindings() {
        let mut s = Substitution::new();
        let a = s.fresh();
        let expected = Type::func(vec![Type::Var(a), Type::Int], Type::Unit);
        let found = Type::func(vec![Type::Bool, Type::Bool], Type::Unit);
        assert!(s.unify(&expected, &found).is_err());
        assert_eq!(s.lookup(a), None);
    }

    #[test]
    fn arity_mismatch() {
        let mut s = Substitution::new();
        let err = s
            .unify(
                &Type::func(vec![Type::Int], Type::Unit),
                &Type::func(vec![], Type::Unit),
            )
            .unwrap_err();
        assert_eq!(
            err,
            UnifyError::Arity {
                expected: 1,
                found: 0
            }
        );
    }

    #[test]
    fn finalize_defaults_unbound_to_unit() {
        let mut s = Substitution::new();
        let a = s.fresh();
        let b = s.fresh();
        s.unify(&Type::Var(b), &Type::Int).unwrap();
        let ty = Type::func(vec![Type::Var(a)], Type::Var(b));
        assert_eq!(s.finalize(&ty), Type::func(vec![Type::Unit], Type::Int));
    }

    #[test]
    fn poison_only_binds_unbound_variables() {
        let mut s = Substitution::new();
        let a = s.fresh();
        let b = s.fresh();
        s.unify(&Type::Var(b), &Type::Int).unwrap();
        s.poison(a);
        s.poison(b);
        assert_eq!(s.apply(&Type::Var(a)), Type::Error);
        assert_eq!(s.apply(&Type::Var(b)), Type::Int);
    }
}
