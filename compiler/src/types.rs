// types.rs — Semantic types for Ember
//
// Concrete nominal types, structural function types, inference variables,
// and the absorbing error type. Aliases never appear here; they are
// resolved to their target before a `Type` is built.
//
// Preconditions: none (types only).
// Postconditions: none (types only).
// Failure modes: none.
// Side effects: none.

use std::fmt;

/// An inference variable, numbered per item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TypeVar(pub u32);

impl TypeVar {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Type {
    Int,
    Bool,
    Str,
    Unit,
    Fn(Vec<Type>, Box<Type>),
    Var(TypeVar),
    /// Sentinel for ill-typed nodes. Unifies with anything.
    Error,
}

impl Type {
    pub fn func(params: Vec<Type>, ret: Type) -> Type {
        Type::Fn(params, Box::new(ret))
    }

    /// The builtin type spelled `name`, if any.
    pub fn builtin(name: &str) -> Option<Type> {
        match name {
            "Int" => Some(Type::Int),
            "Bool" => Some(Type::Bool),
            "Str" => Some(Type::Str),
            "Unit" => Some(Type::Unit),
            _ => None,
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Type::Error)
    }

    /// Whether `var` appears anywhere in this type (no substitution applied).
    pub fn mentions(&self, var: TypeVar) -> bool {
        match self {
            Type::Var(v) => *v == var,
            Type::Fn(params, ret) => params.iter().any(|p| p.mentions(var)) || ret.mentions(var),
            _ => false,
        }
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Type::Int => f.write_str("Int"),
            Type::Bool => f.write_str("Bool"),
            Type::Str => f.write_str("Str"),
            Type::Unit => f.write_str("Unit"),
            Type::Fn(params, ret) => {
                f.write_str("fn(")?;
                for (i, param) in params.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{param}")?;
                }
                write!(f, ") -> {ret}")
            }
            Type::Var(_) => f.write_str("_"),
            Type::Error => f.write_str("{error}"),
        }
    }
}
