// type_infer.rs — Constraint-based type inference per item
//
// Generates equality constraints over one item's untyped graph in a single
// post-order pass, solves them in generation order by unification, and
// applies the resulting substitution to every node. Each node `n` owns the
// inference variable numbered `n`, so numbering is a pure function of the
// item's graph.
//
// A constraint that fails to unify reports one TypeMismatch at its origin
// node; the origin and the nodes it blames become the error type, the
// origin's own variable is bound to the error type, and the origin's
// remaining constraints are skipped. The error type unifies with anything,
// so one root cause yields one diagnostic.
//
// Preconditions: the item's untyped graph, signature and referenced alias
//   targets are available as queries.
// Postconditions: every node has a variable-free type (unconstrained
//   variables default to `Unit`); diagnostics are item-relative and sorted.
// Failure modes: a type alias that reaches itself fails `alias_target` with
//   a cycle; signatures and annotations absorb it as the error type.
// Side effects: none.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use crate::ast::{BinOp, Span, UnaryOp};
use crate::diag::{sort_diagnostics, DiagKind, Diagnostic};
use crate::hir::{NodeKind, UntypedItem};
use crate::id::{ItemRef, LocalId, NodeId, ScopeIdx};
use crate::queries::{AliasTargetQuery, InferItemQuery, ResolveNameQuery, SignatureQuery, UntypedItemQuery};
use crate::query::{CycleError, Database, Query, QueryError, QueryKey, QueryResult};
use crate::resolve::{Builtin, NameKey, Resolution, ScopeRef};
use crate::types::{Type, TypeVar};
use crate::unify::Substitution;

// ── Results ─────────────────────────────────────────────────────────────────

/// A function item's type as declared by its annotations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Signature {
    pub ty: Type,
    pub diagnostics: Vec<Diagnostic>,
}

/// The type a type alias stands for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AliasTarget {
    pub ty: Type,
    pub diagnostics: Vec<Diagnostic>,
}

/// What a `name` node refers to, as seen by inference.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Binding {
    /// A `let` or parameter of the same item.
    Local(LocalId),
    Item(ItemRef),
    Builtin(Builtin),
}

/// Inference result for one item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Inference {
    /// Resolved type per node, indexed by LocalId.
    pub types: Vec<Type>,
    pub bindings: BTreeMap<LocalId, Binding>,
    /// Item-relative spans.
    pub diagnostics: Vec<Diagnostic>,
}

impl Inference {
    pub fn type_of(&self, local: LocalId) -> Option<&Type> {
        self.types.get(local.index())
    }
}

// ── Queries ─────────────────────────────────────────────────────────────────

pub fn signature(db: &Database, item: &ItemRef) -> QueryResult<Signature> {
    let untyped = db.query::<UntypedItemQuery>(item)?;
    let mut diagnostics = Vec::new();
    let ty = match untyped.get(UntypedItem::ROOT).map(|n| &n.kind) {
        Some(NodeKind::Function { params, ret, .. }) => {
            let mut param_types = Vec::with_capacity(params.len());
            for &param in params {
                let ty = match untyped.get(param).map(|n| &n.kind) {
                    Some(NodeKind::Param { ty, .. }) => {
                        absorb_cycle(resolve_type(db, *item, &untyped, *ty, &mut diagnostics))?
                    }
                    _ => Type::Error,
                };
                param_types.push(ty);
            }
            let ret = match ret {
                Some(ret) => absorb_cycle(resolve_type(db, *item, &untyped, *ret, &mut diagnostics))?,
                None => Type::Unit,
            };
            Type::func(param_types, ret)
        }
        Some(NodeKind::TopLevel { .. }) => Type::func(Vec::new(), Type::Unit),
        _ => Type::Error,
    };
    Ok(Signature { ty, diagnostics })
}

pub fn alias_target(db: &Database, item: &ItemRef) -> QueryResult<AliasTarget> {
    let untyped = db.query::<UntypedItemQuery>(item)?;
    let mut diagnostics = Vec::new();
    let Some(NodeKind::Alias { target, .. }) = untyped.get(UntypedItem::ROOT).map(|n| &n.kind) else {
        return Ok(AliasTarget {
            ty: Type::Error,
            diagnostics,
        });
    };
    let ty = match resolve_written(db, *item, &untyped, *target, &mut diagnostics)? {
        Written::Type(ty) => ty,
        Written::Alias(next) => {
            // Deepest first: each of these finds its successor already
            // computed, so alias queries nest at most one level.
            for alias in pending_aliases(db, *item, next)?.iter().rev() {
                db.query::<AliasTargetQuery>(alias)?;
            }
            db.query::<AliasTargetQuery>(&next)?.ty.clone()
        }
    };
    Ok(AliasTarget { ty, diagnostics })
}

/// The aliases of the chain starting at `next` whose targets are not yet
/// computed at this revision, in chain order. A chain that comes back to an
/// alias it already passed through (`origin` included) is a cycle.
fn pending_aliases(db: &Database, origin: ItemRef, next: ItemRef) -> QueryResult<Vec<ItemRef>> {
    let mut chain = vec![origin];
    let mut position = HashMap::from([(origin, 0)]);
    let mut current = next;
    loop {
        if let Some(&start) = position.get(&current) {
            let path = chain[start..]
                .iter()
                .chain(std::iter::once(&current))
                .map(|&alias| QueryKey::new(AliasTargetQuery::KIND, alias))
                .collect();
            return Err(CycleError { path }.into());
        }
        if db.is_current(&QueryKey::new(AliasTargetQuery::KIND, current)) {
            break;
        }
        position.insert(current, chain.len());
        chain.push(current);
        let untyped = db.query::<UntypedItemQuery>(&current)?;
        let Some(NodeKind::Alias { target, .. }) = untyped.get(UntypedItem::ROOT).map(|n| &n.kind) else {
            break;
        };
        match resolve_written(db, current, &untyped, *target, &mut Vec::new())? {
            Written::Alias(alias) => current = alias,
            Written::Type(_) => break,
        }
    }
    chain.remove(0);
    Ok(chain)
}

pub fn infer_item(db: &Database, item: &ItemRef) -> QueryResult<Inference> {
    let untyped = db.query::<UntypedItemQuery>(item)?;
    let mut inferencer = Inferencer::new(db, *item, &untyped);
    inferencer.visit(UntypedItem::ROOT)?;
    db.check_cancelled()?;
    Ok(inferencer.solve())
}

pub fn type_of(db: &Database, node: &NodeId) -> QueryResult<Type> {
    let inference = db.query::<InferItemQuery>(&node.item_ref())?;
    Ok(inference.type_of(node.local).cloned().unwrap_or(Type::Error))
}

/// A written type, resolved one step.
enum Written {
    Type(Type),
    Alias(ItemRef),
}

/// Resolve a written type in the module's type namespace.
fn resolve_type(
    db: &Database,
    item: ItemRef,
    untyped: &UntypedItem,
    node: LocalId,
    diagnostics: &mut Vec<Diagnostic>,
) -> QueryResult<Type> {
    match resolve_written(db, item, untyped, node, diagnostics)? {
        Written::Type(ty) => Ok(ty),
        Written::Alias(alias) => Ok(db.query::<AliasTargetQuery>(&alias)?.ty.clone()),
    }
}

/// Resolve a written type without looking through aliases.
fn resolve_written(
    db: &Database,
    item: ItemRef,
    untyped: &UntypedItem,
    node: LocalId,
    diagnostics: &mut Vec<Diagnostic>,
) -> QueryResult<Written> {
    let Some(n) = untyped.get(node) else {
        return Ok(Written::Type(Type::Error));
    };
    let NodeKind::TypeRef { name } = &n.kind else {
        return Ok(Written::Type(Type::Error));
    };
    match db.query::<ResolveNameQuery>(&NameKey::ty(item.file, name.clone()))? {
        Some(Resolution::BuiltinType(ty)) => Ok(Written::Type(ty)),
        Some(Resolution::Alias(alias)) => Ok(Written::Alias(alias)),
        Some(_) | None => {
            diagnostics.push(
                Diagnostic::error(
                    DiagKind::UnresolvedName,
                    item.file,
                    n.span,
                    format!("cannot find type `{name}` in this scope"),
                )
                .with_hint("the builtin types are `Int`, `Bool`, `Str` and `Unit`"),
            );
            Ok(Written::Type(Type::Error))
        }
    }
}

/// Treat a cyclic alias as the error type. The alias itself reports the cycle.
fn absorb_cycle(result: QueryResult<Type>) -> QueryResult<Type> {
    match result {
        Err(QueryError::Cycle(_)) => Ok(Type::Error),
        other => other,
    }
}

// ── Constraint generation ───────────────────────────────────────────────────

/// `expected == found`, reported at `origin`.
#[derive(Debug)]
struct Constraint {
    expected: Type,
    found: Type,
    origin: LocalId,
    blame: Vec<LocalId>,
}

struct Inferencer<'a> {
    db: &'a Database,
    item: ItemRef,
    untyped: &'a UntypedItem,
    subst: Substitution,
    constraints: Vec<Constraint>,
    bindings: BTreeMap<LocalId, Binding>,
    diagnostics: Vec<Diagnostic>,
    poisoned: BTreeSet<LocalId>,
    ret: Type,
}

fn var(id: LocalId) -> Type {
    Type::Var(TypeVar(id.0))
}

impl<'a> Inferencer<'a> {
    fn new(db: &'a Database, item: ItemRef, untyped: &'a UntypedItem) -> Self {
        let mut subst = Substitution::new();
        for _ in 0..untyped.len() {
            subst.fresh();
        }
        Self {
            db,
            item,
            untyped,
            subst,
            constraints: Vec::new(),
            bindings: BTreeMap::new(),
            diagnostics: Vec::new(),
            poisoned: BTreeSet::new(),
            ret: Type::Unit,
        }
    }

    fn constrain(&mut self, expected: Type, found: Type, origin: LocalId, blame: Vec<LocalId>) {
        self.constraints.push(Constraint {
            expected,
            found,
            origin,
            blame,
        });
    }

    /// Give `id` its result type. Emitted after the node's other constraints.
    fn equate(&mut self, id: LocalId, ty: Type) {
        self.constrain(var(id), ty, id, Vec::new());
    }

    fn poison(&mut self, id: LocalId) {
        self.poisoned.insert(id);
        self.subst.poison(TypeVar(id.0));
    }

    fn kind(&self, id: LocalId) -> Option<&'a NodeKind> {
        self.untyped.get(id).map(|n| &n.kind)
    }

    fn visit(&mut self, id: LocalId) -> QueryResult<()> {
        let untyped = self.untyped;
        let Some(node) = untyped.get(id) else {
            return Ok(());
        };
        match &node.kind {
            NodeKind::Function {
                params, ret, body, ..
            } => {
                let signature = self.db.query::<SignatureQuery>(&self.item)?;
                let (param_types, ret_type) = match &signature.ty {
                    Type::Fn(params, ret) => (params.clone(), (**ret).clone()),
                    _ => (Vec::new(), Type::Error),
                };
                self.ret = ret_type.clone();
                self.equate(id, signature.ty.clone());
                for (i, &param) in params.iter().enumerate() {
                    let ty = param_types.get(i).cloned().unwrap_or(Type::Error);
                    if let Some(NodeKind::Param { ty: written, .. }) = self.kind(param) {
                        self.equate(*written, ty.clone());
                    }
                    self.equate(param, ty);
                }
                if let Some(ret) = ret {
                    self.equate(*ret, ret_type);
                }
                self.visit(*body)?;
            }
            NodeKind::TopLevel { body } => {
                self.ret = Type::Unit;
                for &stmt in body {
                    self.visit(stmt)?;
                }
                self.equate(id, Type::func(Vec::new(), Type::Unit));
            }
            NodeKind::Alias { target, .. } => {
                let ty = self.db.query::<AliasTargetQuery>(&self.item)?.ty.clone();
                self.equate(*target, ty.clone());
                self.equate(id, ty);
            }
            NodeKind::Param { .. } | NodeKind::TypeRef { .. } => {}
            NodeKind::Block { stmts, .. } => {
                for &stmt in stmts {
                    self.visit(stmt)?;
                }
                self.equate(id, Type::Unit);
            }
            NodeKind::Let { ty, init, .. } => {
                if let Some(written) = ty {
                    let mut diagnostics = Vec::new();
                    let annotated = absorb_cycle(resolve_type(
                        self.db,
                        self.item,
                        self.untyped,
                        *written,
                        &mut diagnostics,
                    ))?;
                    self.diagnostics.extend(diagnostics);
                    self.equate(*written, annotated.clone());
                    self.equate(id, annotated);
                }
                if let Some(init) = init {
                    self.visit(*init)?;
                    self.constrain(var(id), var(*init), id, vec![*init]);
                }
            }
            NodeKind::Assign { target, value } => {
                self.visit(*target)?;
                self.visit(*value)?;
                self.constrain(var(*target), var(*value), id, vec![*value]);
                self.equate(id, Type::Unit);
            }
            NodeKind::ExprStmt(expr) => {
                self.visit(*expr)?;
                self.equate(id, Type::Unit);
            }
            NodeKind::If {
                cond,
                then_block,
                else_branch,
            } => {
                self.visit(*cond)?;
                self.constrain(Type::Bool, var(*cond), id, vec![*cond]);
                self.visit(*then_block)?;
                if let Some(else_branch) = else_branch {
                    self.visit(*else_branch)?;
                }
                self.equate(id, Type::Unit);
            }
            NodeKind::While { cond, body } => {
                self.visit(*cond)?;
                self.constrain(Type::Bool, var(*cond), id, vec![*cond]);
                self.visit(*body)?;
                self.equate(id, Type::Unit);
            }
            NodeKind::Return(value) => {
                match value {
                    Some(value) => {
                        self.visit(*value)?;
                        self.constrain(self.ret.clone(), var(*value), id, vec![*value]);
                    }
                    None => self.constrain(self.ret.clone(), Type::Unit, id, Vec::new()),
                }
                self.equate(id, Type::Unit);
            }
            NodeKind::Int(_) => self.equate(id, Type::Int),
            NodeKind::Bool(_) => self.equate(id, Type::Bool),
            NodeKind::Str(_) => self.equate(id, Type::Str),
            NodeKind::Name { name, scope } => self.visit_name(id, node.span, name, *scope)?,
            NodeKind::Unary { op, operand } => {
                self.visit(*operand)?;
                let ty = match op {
                    UnaryOp::Neg => Type::Int,
                    UnaryOp::Not => Type::Bool,
                };
                self.constrain(ty.clone(), var(*operand), id, vec![*operand]);
                self.equate(id, ty);
            }
            NodeKind::Binary { op, lhs, rhs } => {
                self.visit(*lhs)?;
                self.visit(*rhs)?;
                self.visit_binary(id, *op, *lhs, *rhs);
            }
            NodeKind::Call { callee, args } => {
                self.visit(*callee)?;
                for &arg in args {
                    self.visit(arg)?;
                }
                let result = Type::Var(self.subst.fresh());
                let shape = Type::func(args.iter().map(|&a| var(a)).collect(), result.clone());
                self.constrain(var(*callee), shape, id, vec![*callee]);
                self.equate(id, result);
            }
            NodeKind::Error => self.poison(id),
        }
        Ok(())
    }

    fn visit_name(
        &mut self,
        id: LocalId,
        span: Span,
        name: &str,
        scope: ScopeIdx,
    ) -> QueryResult<()> {
        let key = NameKey::value(ScopeRef::Local(self.item, scope), name);
        match self.db.query::<ResolveNameQuery>(&key)? {
            Some(Resolution::Local(decl)) => {
                self.bindings.insert(id, Binding::Local(decl.local));
                self.equate(id, var(decl.local));
            }
            Some(Resolution::Function(function)) => {
                self.bindings.insert(id, Binding::Item(function));
                let ty = absorb_cycle(self.db.query::<SignatureQuery>(&function).map(|s| s.ty.clone()))?;
                self.equate(id, ty);
            }
            Some(Resolution::BuiltinFn(builtin)) => {
                self.bindings.insert(id, Binding::Builtin(builtin));
                let ty = match builtin {
                    // Accepts a value of any type.
                    Builtin::Print => Type::func(vec![Type::Var(self.subst.fresh())], Type::Unit),
                };
                self.equate(id, ty);
            }
            Some(Resolution::Alias(_) | Resolution::BuiltinType(_)) | None => {
                self.diagnostics.push(Diagnostic::error(
                    DiagKind::UnresolvedName,
                    self.item.file,
                    span,
                    format!("cannot find value `{name}` in this scope"),
                ));
                self.poison(id);
            }
        }
        Ok(())
    }

    fn visit_binary(&mut self, id: LocalId, op: BinOp, lhs: LocalId, rhs: LocalId) {
        match op {
            BinOp::And | BinOp::Or => {
                self.constrain(Type::Bool, var(lhs), id, vec![lhs]);
                self.constrain(Type::Bool, var(rhs), id, vec![rhs]);
                self.equate(id, Type::Bool);
            }
            BinOp::Eq | BinOp::NotEq => {
                self.constrain(var(lhs), var(rhs), id, vec![lhs, rhs]);
                self.equate(id, Type::Bool);
            }
            _ => {
                self.constrain(var(lhs), var(rhs), id, vec![lhs, rhs]);
                self.constrain(Type::Int, var(lhs), id, vec![lhs, rhs]);
                let result = if op.is_ordering() { Type::Bool } else { Type::Int };
                self.equate(id, result);
            }
        }
    }

    // ── Solving ─────────────────────────────────────────────────────────────

    fn solve(mut self) -> Inference {
        let mut failed: BTreeSet<LocalId> = BTreeSet::new();
        let constraints = std::mem::take(&mut self.constraints);
        for constraint in constraints {
            if failed.contains(&constraint.origin) {
                continue;
            }
            if let Err(err) = self.subst.unify(&constraint.expected, &constraint.found) {
                failed.insert(constraint.origin);
                let span = self
                    .untyped
                    .get(constraint.origin)
                    .map(|n| n.span)
                    .unwrap_or_else(|| (0..0).into());
                self.diagnostics.push(Diagnostic::error(
                    DiagKind::TypeMismatch,
                    self.item.file,
                    span,
                    err.to_string(),
                ));
                self.poison(constraint.origin);
                self.poisoned.extend(constraint.blame);
            }
        }

        let types = self
            .untyped
            .ids()
            .map(|id| {
                if self.poisoned.contains(&id) {
                    Type::Error
                } else {
                    self.subst.finalize(&var(id))
                }
            })
            .collect();
        sort_diagnostics(&mut self.diagnostics);
        Inference {
            types,
            bindings: self.bindings,
            diagnostics: self.diagnostics,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hir::DeclKind;
    use crate::id::{FileId, ItemId};
    use crate::queries::{test_db, ItemTreeQuery, TypeOfQuery};
    use crate::query::Query;

    fn items(db: &Database, file: FileId) -> Vec<(DeclKind, ItemRef)> {
        db.query::<ItemTreeQuery>(&file)
            .unwrap()
            .iter()
            .map(|e| (e.kind, ItemRef::new(file, e.id)))
            .collect()
    }

    /// (label, type) for every node of the first item.
    fn typed(source: &str) -> (Vec<(String, Type)>, Vec<Diagnostic>) {
        let (db, files) = test_db(&[source]);
        let (_, item) = items(&db, files[0])[0];
        let untyped = db.query::<UntypedItemQuery>(&item).unwrap();
        let inference = db.query::<InferItemQuery>(&item).unwrap();
        let rows = untyped
            .nodes
            .iter()
            .zip(inference.types.iter())
            .map(|(n, t)| (n.kind.label(), t.clone()))
            .collect();
        (rows, inference.diagnostics.clone())
    }

    fn type_of_label(rows: &[(String, Type)], label: &str) -> Type {
        rows.iter()
            .find(|(l, _)| l == label)
            .map(|(_, t)| t.clone())
            .unwrap_or_else(|| panic!("no node labelled {label}"))
    }

    #[test]
    fn literals_and_arithmetic() {
        let (rows, diags) = typed("let x = 1 + 2 * 3; let b = x < 4;");
        assert!(diags.is_empty(), "{diags:?}");
        assert_eq!(type_of_label(&rows, "let x"), Type::Int);
        assert_eq!(type_of_label(&rows, "let b"), Type::Bool);
    }

    #[test]
    fn mismatch_poisons_operands_and_result() {
        let (rows, diags) = typed("let x = 1; let y = x + true;");
        assert_eq!(diags.len(), 1);
        assert_eq!(diags[0].kind, DiagKind::TypeMismatch);
        assert_eq!(type_of_label(&rows, "let x"), Type::Int);
        assert_eq!(type_of_label(&rows, "let y"), Type::Error);
        assert_eq!(type_of_label(&rows, "binary +"), Type::Error);
        assert_eq!(type_of_label(&rows, "bool true"), Type::Error);
    }

    #[test]
    fn error_does_not_cascade() {
        let (_, diags) = typed("let y = 1 + true; let z = y + 1; let w = z * 2;");
        assert_eq!(diags.len(), 1);
    }

    #[test]
    fn unresolved_name_reports_once() {
        let (rows, diags) = typed("let a = missing + 1;");
        assert_eq!(diags.len(), 1);
        assert_eq!(diags[0].kind, DiagKind::UnresolvedName);
        assert_eq!(type_of_label(&rows, "name missing"), Type::Error);
    }

    #[test]
    fn calls_use_signatures() {
        let (db, files) = test_db(&["fn add(a: Int, b: Int) -> Int { return a + b; }\nlet r = add(1, 2);"]);
        let all = items(&db, files[0]);
        let (_, top) = all.iter().find(|(k, _)| *k == DeclKind::TopLevel).copied().unwrap();
        let inference = db.query::<InferItemQuery>(&top).unwrap();
        assert!(inference.diagnostics.is_empty(), "{:?}", inference.diagnostics);
        // root, let r, call, name add, int 1, int 2
        assert_eq!(inference.types[1], Type::Int);
        assert_eq!(inference.types[3], Type::func(vec![Type::Int, Type::Int], Type::Int));
    }

    #[test]
    fn wrong_argument_is_one_mismatch_at_the_call() {
        let (db, files) = test_db(&["fn f(a: Int) {}\nf(true);"]);
        let top = items(&db, files[0])
            .into_iter()
            .find(|(k, _)| *k == DeclKind::TopLevel)
            .map(|(_, i)| i)
            .unwrap();
        let inference = db.query::<InferItemQuery>(&top).unwrap();
        assert_eq!(inference.diagnostics.len(), 1);
        assert_eq!(inference.diagnostics[0].kind, DiagKind::TypeMismatch);
    }

    #[test]
    fn print_accepts_any_type() {
        let (_, diags) = typed("print(1); print(true); print(\"s\");");
        assert!(diags.is_empty(), "{diags:?}");
    }

    #[test]
    fn unconstrained_variables_default_to_unit() {
        let (rows, diags) = typed("let x;");
        assert!(diags.is_empty());
        assert_eq!(type_of_label(&rows, "let x"), Type::Unit);
    }

    #[test]
    fn annotation_and_initializer_must_agree() {
        let (rows, diags) = typed("let x: Int = true; let y = x + 1;");
        assert_eq!(diags.len(), 1);
        assert_eq!(type_of_label(&rows, "let y"), Type::Int);
    }

    #[test]
    fn conditions_must_be_bool() {
        let (_, diags) = typed("if 1 { } while true { }");
        assert_eq!(diags.len(), 1);
        assert!(diags[0].message.contains("expected `Bool`, found `Int`"));
    }

    #[test]
    fn return_checks_declared_type() {
        let (_, diags) = typed("fn f() -> Int { return true; }");
        assert_eq!(diags.len(), 1);
        let (_, diags) = typed("fn g() -> Bool { return; }");
        assert_eq!(diags.len(), 1);
    }

    #[test]
    fn aliases_are_transparent() {
        let (db, files) = test_db(&["type Meters = Int;\nfn f(m: Meters) -> Int { return m + 1; }"]);
        let f = ItemRef::new(files[0], ItemId::derive("fn", "f", 0));
        let sig = db.query::<SignatureQuery>(&f).unwrap();
        assert_eq!(sig.ty, Type::func(vec![Type::Int], Type::Int));
        assert!(db.query::<InferItemQuery>(&f).unwrap().diagnostics.is_empty());
    }

    #[test]
    fn unknown_type_annotation_is_reported_by_the_signature() {
        let (db, files) = test_db(&["fn f(x: Nope) {}"]);
        let f = ItemRef::new(files[0], ItemId::derive("fn", "f", 0));
        let sig = db.query::<SignatureQuery>(&f).unwrap();
        assert_eq!(sig.ty, Type::func(vec![Type::Error], Type::Unit));
        assert_eq!(sig.diagnostics.len(), 1);
        assert_eq!(sig.diagnostics[0].kind, DiagKind::UnresolvedName);
    }

    #[test]
    fn alias_chains_fill_in_every_link() {
        let (db, files) = test_db(&["type A = B;\ntype B = C;\ntype C = Bool;\nfn f(x: A) {}"]);
        let alias = |name: &str| ItemRef::new(files[0], ItemId::derive("type", name, 0));
        let f = ItemRef::new(files[0], ItemId::derive("fn", "f", 0));
        let sig = db.query::<SignatureQuery>(&f).unwrap();
        assert_eq!(sig.ty, Type::func(vec![Type::Bool], Type::Unit));
        for name in ["A", "B", "C"] {
            let key = QueryKey::new(AliasTargetQuery::KIND, alias(name));
            assert!(db.is_current(&key), "{name} was not computed");
        }
        db.reset_stats();
        assert_eq!(db.query::<AliasTargetQuery>(&alias("B")).unwrap().ty, Type::Bool);
        assert_eq!(db.stats().total_executions(), 0);
    }

    #[test]
    fn alias_reaching_a_cycle_names_only_the_cycle() {
        let (db, files) = test_db(&["type C = A;\ntype A = B;\ntype B = A;"]);
        let alias = |name: &str| ItemRef::new(files[0], ItemId::derive("type", name, 0));
        let Err(QueryError::Cycle(cycle)) = db.query::<AliasTargetQuery>(&alias("C")) else {
            panic!("expected a cycle");
        };
        let expected: Vec<QueryKey> = ["A", "B", "A"]
            .iter()
            .map(|name| QueryKey::new(AliasTargetQuery::KIND, alias(name)))
            .collect();
        assert_eq!(cycle.path, expected);
    }

    #[test]
    fn self_referential_alias_is_a_cycle() {
        let (db, files) = test_db(&["type T = T;"]);
        let t = ItemRef::new(files[0], ItemId::derive("type", "T", 0));
        let err = db.query::<AliasTargetQuery>(&t).unwrap_err();
        assert!(matches!(err, QueryError::Cycle(_)));
        let root = t.node(UntypedItem::ROOT);
        assert!(matches!(db.query::<TypeOfQuery>(&root), Err(QueryError::Cycle(_))));
    }

    #[test]
    fn syntax_error_nodes_are_silent() {
        let (db, files) = test_db(&["let x = (1 + ) ; let y = x + 1;"]);
        let top = items(&db, files[0])[0].1;
        let inference = db.query::<InferItemQuery>(&top).unwrap();
        assert!(inference.diagnostics.is_empty(), "{:?}", inference.diagnostics);
    }

    #[test]
    fn inference_is_deterministic() {
        let source = "fn f(a: Int) -> Bool { let b = a == 2; return b && true; }";
        assert_eq!(typed(source), typed(source));
    }
}
