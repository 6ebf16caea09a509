// hir.rs — Untyped semantic graph, one per item
//
// Splits a file's syntax tree into items (functions, type aliases, and the
// implicit top-level body), gives each a stable `ItemId`, and lowers each
// item into a flat node table. Nodes are numbered in preorder, carry spans
// relative to the start of their item, and never own syntax. Scopes live in
// a per-item table: one scope per block and one per `let`, each chaining to
// its parent; the item's root scope chains to the module scope.
//
// Preconditions: the syntax tree comes from `parser::parse` (error nodes
//   allowed).
// Postconditions: `nodes[0]` is the item root; every node's parent has a
//   smaller LocalId; an item whose syntax is unchanged lowers to an equal
//   `UntypedItem` wherever it sits in the file.
// Failure modes: none (syntax errors lower to `NodeKind::Error`).
// Side effects: none.

use std::collections::HashMap;
use std::fmt;

use crate::ast::{self, BinOp, Program, Span, StmtKind, TypeExpr, UnaryOp};
use crate::id::{ItemId, LocalId, ScopeIdx};

/// Name given to the implicit top-level body.
pub const TOP_LEVEL_NAME: &str = "<top>";

// ── Items ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum DeclKind {
    Function,
    Alias,
    TopLevel,
}

impl DeclKind {
    /// Tag mixed into the item's identity digest.
    pub fn tag(self) -> &'static str {
        match self {
            DeclKind::Function => "fn",
            DeclKind::Alias => "type",
            DeclKind::TopLevel => "top",
        }
    }

    /// Whether the item has a body the initialization analysis runs on.
    pub fn has_body(self) -> bool {
        matches!(self, DeclKind::Function | DeclKind::TopLevel)
    }
}

impl fmt::Display for DeclKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

/// Span-free summary of one item; the content of `item_tree`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemEntry {
    pub id: ItemId,
    pub kind: DeclKind,
    pub name: String,
}

/// An item located in its file's syntax tree.
#[derive(Debug)]
pub struct ItemSource<'a> {
    pub id: ItemId,
    pub kind: DeclKind,
    pub name: String,
    pub name_span: Span,
    pub parts: Vec<&'a ast::Item>,
}

impl ItemSource<'_> {
    /// Absolute byte range from the first part's start to the last part's end.
    pub fn span(&self) -> Span {
        let start = self.parts.first().map_or(0, |p| p.span.start);
        let end = self.parts.last().map_or(start, |p| p.span.end);
        (start..end).into()
    }

    pub fn entry(&self) -> ItemEntry {
        ItemEntry {
            id: self.id,
            kind: self.kind,
            name: self.name.clone(),
        }
    }

    /// The item's syntax with spans relative to its own start.
    pub fn to_syntax(&self) -> ItemSyntax {
        let origin = self.span().start;
        let name_span = (self.name_span.start.saturating_sub(origin)
            ..self.name_span.end.saturating_sub(origin))
            .into();
        ItemSyntax {
            kind: self.kind,
            name: self.name.clone(),
            name_span,
            parts: self.parts.iter().map(|p| p.rebased(origin)).collect(),
        }
    }
}

/// Item-relative syntax of one item; the input to lowering.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemSyntax {
    pub kind: DeclKind,
    pub name: String,
    pub name_span: Span,
    pub parts: Vec<ast::Item>,
}

/// Split a program into items in order of first appearance.
///
/// Identity is `(kind, name, occurrence)`: the n-th function named `f` keeps
/// its ItemId however the rest of the file changes. All top-level statements
/// belong to one item named [`TOP_LEVEL_NAME`].
pub fn collect_items(program: &Program) -> Vec<ItemSource<'_>> {
    let mut sources: Vec<ItemSource<'_>> = Vec::new();
    let mut occurrences: HashMap<(DeclKind, &str), u32> = HashMap::new();
    let mut top_level: Option<usize> = None;

    for item in &program.items {
        let (kind, name, name_span) = match &item.kind {
            ast::ItemKind::Function(decl) => (DeclKind::Function, decl.name.name.as_str(), decl.name.span),
            ast::ItemKind::TypeAlias(decl) => (DeclKind::Alias, decl.name.name.as_str(), decl.name.span),
            ast::ItemKind::Stmt(_) => {
                match top_level {
                    Some(index) => sources[index].parts.push(item),
                    None => {
                        top_level = Some(sources.len());
                        sources.push(ItemSource {
                            id: ItemId::derive(DeclKind::TopLevel.tag(), TOP_LEVEL_NAME, 0),
                            kind: DeclKind::TopLevel,
                            name: TOP_LEVEL_NAME.to_string(),
                            name_span: item.span,
                            parts: vec![item],
                        });
                    }
                }
                continue;
            }
        };
        let occurrence = occurrences.entry((kind, name)).or_insert(0);
        sources.push(ItemSource {
            id: ItemId::derive(kind.tag(), name, *occurrence),
            kind,
            name: name.to_string(),
            name_span,
            parts: vec![item],
        });
        *occurrence += 1;
    }
    sources
}

// ── Untyped graph ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UntypedItem {
    pub kind: DeclKind,
    pub name: String,
    pub nodes: Vec<Node>,
    pub scopes: Vec<Scope>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Node {
    pub kind: NodeKind,
    /// Relative to the start of the item.
    pub span: Span,
    pub parent: Option<LocalId>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeKind {
    // Item roots
    Function {
        name: String,
        params: Vec<LocalId>,
        ret: Option<LocalId>,
        body: LocalId,
    },
    Alias {
        name: String,
        target: LocalId,
    },
    TopLevel {
        body: Vec<LocalId>,
    },
    Param {
        name: String,
        ty: LocalId,
    },
    /// A type written in source, resolved in the module's type namespace.
    TypeRef {
        name: String,
    },

    // Statements
    Block {
        stmts: Vec<LocalId>,
        scope: ScopeIdx,
    },
    Let {
        name: String,
        ty: Option<LocalId>,
        init: Option<LocalId>,
    },
    Assign {
        target: LocalId,
        value: LocalId,
    },
    ExprStmt(LocalId),
    If {
        cond: LocalId,
        then_block: LocalId,
        else_branch: Option<LocalId>,
    },
    While {
        cond: LocalId,
        body: LocalId,
    },
    Return(Option<LocalId>),

    // Expressions
    Int(i64),
    Bool(bool),
    Str(String),
    /// A use of a value name, looked up starting at `scope`.
    Name {
        name: String,
        scope: ScopeIdx,
    },
    Unary {
        op: UnaryOp,
        operand: LocalId,
    },
    Binary {
        op: BinOp,
        lhs: LocalId,
        rhs: LocalId,
    },
    Call {
        callee: LocalId,
        args: Vec<LocalId>,
    },

    /// Recovered syntax error; typed as the error type.
    Error,
}

impl NodeKind {
    /// Short human-readable label used by graph dumps.
    pub fn label(&self) -> String {
        match self {
            NodeKind::Function { name, .. } => format!("fn {name}"),
            NodeKind::Alias { name, .. } => format!("type {name}"),
            NodeKind::TopLevel { .. } => "top-level".to_string(),
            NodeKind::Param { name, .. } => format!("param {name}"),
            NodeKind::TypeRef { name } => format!("type-ref {name}"),
            NodeKind::Block { .. } => "block".to_string(),
            NodeKind::Let { name, .. } => format!("let {name}"),
            NodeKind::Assign { .. } => "assign".to_string(),
            NodeKind::ExprStmt(_) => "expr-stmt".to_string(),
            NodeKind::If { .. } => "if".to_string(),
            NodeKind::While { .. } => "while".to_string(),
            NodeKind::Return(_) => "return".to_string(),
            NodeKind::Int(v) => format!("int {v}"),
            NodeKind::Bool(v) => format!("bool {v}"),
            NodeKind::Str(s) => format!("str {s:?}"),
            NodeKind::Name { name, .. } => format!("name {name}"),
            NodeKind::Unary { op, .. } => format!("unary {op}"),
            NodeKind::Binary { op, .. } => format!("binary {op}"),
            NodeKind::Call { args, .. } => format!("call/{}", args.len()),
            NodeKind::Error => "error".to_string(),
        }
    }
}

/// A lexical scope. Bindings are value names only.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Scope {
    pub parent: Option<ScopeIdx>,
    pub bindings: Vec<(String, LocalId)>,
}

impl UntypedItem {
    pub const ROOT: LocalId = LocalId(0);

    pub fn get(&self, id: LocalId) -> Option<&Node> {
        self.nodes.get(id.index())
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn ids(&self) -> impl Iterator<Item = LocalId> + '_ {
        (0..self.nodes.len()).map(|i| LocalId(i as u32))
    }

    /// A binding made directly in `scope` (parents are not consulted).
    pub fn binding_in(&self, scope: ScopeIdx, name: &str) -> Option<LocalId> {
        self.scopes
            .get(scope.index())?
            .bindings
            .iter()
            .rev()
            .find(|(bound, _)| bound == name)
            .map(|&(_, id)| id)
    }

    pub fn scope_parent(&self, scope: ScopeIdx) -> Option<ScopeIdx> {
        self.scopes.get(scope.index()).and_then(|s| s.parent)
    }

    /// Number of ancestors of `id`.
    pub fn depth(&self, id: LocalId) -> usize {
        let mut depth = 0;
        let mut current = self.get(id).and_then(|n| n.parent);
        while let Some(parent) = current {
            depth += 1;
            current = self.get(parent).and_then(|n| n.parent);
        }
        depth
    }

    /// The smallest node whose span covers `start..end` (item-relative).
    /// Among equally sized candidates the deepest (latest in preorder) wins.
    pub fn innermost_covering(&self, start: usize, end: usize) -> Option<LocalId> {
        self.ids()
            .filter(|&id| {
                let span = self.nodes[id.index()].span;
                span.start <= start && end <= span.end
            })
            .min_by_key(|&id| {
                let span = self.nodes[id.index()].span;
                (span.end - span.start, std::cmp::Reverse(id))
            })
    }
}

// ── Lowering ────────────────────────────────────────────────────────────────

/// Lower one item's (item-relative) syntax into its untyped graph.
pub fn lower_item(syntax: &ItemSyntax) -> UntypedItem {
    let mut lowerer = Lowerer::default();
    let root_scope = lowerer.new_scope(None, Vec::new());
    let item_span: Span = {
        let end = syntax.parts.last().map_or(0, |p| p.span.end);
        (0..end).into()
    };

    match syntax.kind {
        DeclKind::TopLevel => {
            let root = lowerer.alloc(item_span, None);
            let mut scope = root_scope;
            let mut body = Vec::new();
            for part in &syntax.parts {
                if let ast::ItemKind::Stmt(stmt) = &part.kind {
                    let (id, next) = lowerer.lower_stmt(stmt, root, scope);
                    body.push(id);
                    scope = next;
                }
            }
            lowerer.set(root, NodeKind::TopLevel { body });
        }
        DeclKind::Function | DeclKind::Alias => {
            if let Some(part) = syntax.parts.first() {
                lowerer.lower_decl(part, root_scope);
            }
        }
    }

    UntypedItem {
        kind: syntax.kind,
        name: syntax.name.clone(),
        nodes: lowerer.nodes,
        scopes: lowerer.scopes,
    }
}

#[derive(Default)]
struct Lowerer {
    nodes: Vec<Node>,
    scopes: Vec<Scope>,
}

impl Lowerer {
    /// Reserve the next preorder slot; the kind is filled in by `set`.
    fn alloc(&mut self, span: Span, parent: Option<LocalId>) -> LocalId {
        let id = LocalId(self.nodes.len() as u32);
        self.nodes.push(Node {
            kind: NodeKind::Error,
            span,
            parent,
        });
        id
    }

    fn set(&mut self, id: LocalId, kind: NodeKind) {
        self.nodes[id.index()].kind = kind;
    }

    fn new_scope(&mut self, parent: Option<ScopeIdx>, bindings: Vec<(String, LocalId)>) -> ScopeIdx {
        let idx = ScopeIdx(self.scopes.len() as u32);
        self.scopes.push(Scope { parent, bindings });
        idx
    }

    fn lower_decl(&mut self, item: &ast::Item, root_scope: ScopeIdx) {
        let root = self.alloc(item.span, None);
        match &item.kind {
            ast::ItemKind::Function(decl) => {
                let mut params = Vec::with_capacity(decl.params.len());
                for param in &decl.params {
                    let id = self.alloc(param.span, Some(root));
                    let ty = self.lower_type(&param.ty, id);
                    self.set(
                        id,
                        NodeKind::Param {
                            name: param.name.name.clone(),
                            ty,
                        },
                    );
                    self.scopes[root_scope.index()]
                        .bindings
                        .push((param.name.name.clone(), id));
                    params.push(id);
                }
                let ret = decl.ret.as_ref().map(|ty| self.lower_type(ty, root));
                let body = self.lower_block(&decl.body, root, root_scope);
                self.set(
                    root,
                    NodeKind::Function {
                        name: decl.name.name.clone(),
                        params,
                        ret,
                        body,
                    },
                );
            }
            ast::ItemKind::TypeAlias(decl) => {
                let target = self.lower_type(&decl.target, root);
                self.set(
                    root,
                    NodeKind::Alias {
                        name: decl.name.name.clone(),
                        target,
                    },
                );
            }
            ast::ItemKind::Stmt(_) => {}
        }
    }

    fn lower_type(&mut self, ty: &TypeExpr, parent: LocalId) -> LocalId {
        let id = self.alloc(ty.span(), Some(parent));
        if let TypeExpr::Named(ident) = ty {
            self.set(
                id,
                NodeKind::TypeRef {
                    name: ident.name.clone(),
                },
            );
        }
        id
    }

    fn lower_block(&mut self, block: &ast::Block, parent: LocalId, scope: ScopeIdx) -> LocalId {
        let id = self.alloc(block.span, Some(parent));
        let inner = self.new_scope(Some(scope), Vec::new());
        let mut current = inner;
        let mut stmts = Vec::with_capacity(block.stmts.len());
        for stmt in &block.stmts {
            let (stmt_id, next) = self.lower_stmt(stmt, id, current);
            stmts.push(stmt_id);
            current = next;
        }
        self.set(id, NodeKind::Block { stmts, scope: inner });
        id
    }

    /// Lower a statement in `scope`; returns the node and the scope that
    /// following statements see.
    fn lower_stmt(&mut self, stmt: &ast::Stmt, parent: LocalId, scope: ScopeIdx) -> (LocalId, ScopeIdx) {
        if let StmtKind::Block(block) = &stmt.kind {
            return (self.lower_block(block, parent, scope), scope);
        }

        let id = self.alloc(stmt.span, Some(parent));
        let mut next = scope;
        let kind = match &stmt.kind {
            StmtKind::Let { name, ty, init } => {
                let ty = ty.as_ref().map(|t| self.lower_type(t, id));
                // The initializer cannot see the variable it initializes.
                let init = init.as_ref().map(|e| self.lower_expr(e, id, scope));
                next = self.new_scope(Some(scope), vec![(name.name.clone(), id)]);
                NodeKind::Let {
                    name: name.name.clone(),
                    ty,
                    init,
                }
            }
            StmtKind::Assign { target, value } => {
                let target_id = self.alloc(target.span, Some(id));
                self.set(
                    target_id,
                    NodeKind::Name {
                        name: target.name.clone(),
                        scope,
                    },
                );
                let value = self.lower_expr(value, id, scope);
                NodeKind::Assign {
                    target: target_id,
                    value,
                }
            }
            StmtKind::Expr(expr) => NodeKind::ExprStmt(self.lower_expr(expr, id, scope)),
            StmtKind::If {
                cond,
                then_block,
                else_branch,
            } => {
                let cond = self.lower_expr(cond, id, scope);
                let then_block = self.lower_block(then_block, id, scope);
                let else_branch = else_branch
                    .as_ref()
                    .map(|s| self.lower_stmt(s, id, scope).0);
                NodeKind::If {
                    cond,
                    then_block,
                    else_branch,
                }
            }
            StmtKind::While { cond, body } => {
                let cond = self.lower_expr(cond, id, scope);
                let body = self.lower_block(body, id, scope);
                NodeKind::While { cond, body }
            }
            StmtKind::Return(value) => {
                NodeKind::Return(value.as_ref().map(|e| self.lower_expr(e, id, scope)))
            }
            StmtKind::Block(_) | StmtKind::Error => NodeKind::Error,
        };
        self.set(id, kind);
        (id, next)
    }

    fn lower_expr(&mut self, expr: &ast::Expr, parent: LocalId, scope: ScopeIdx) -> LocalId {
        let id = self.alloc(expr.span, Some(parent));
        let kind = match &expr.kind {
            ast::ExprKind::Int(v) => NodeKind::Int(*v),
            ast::ExprKind::Bool(v) => NodeKind::Bool(*v),
            ast::ExprKind::Str(s) => NodeKind::Str(s.clone()),
            ast::ExprKind::Name(ident) => NodeKind::Name {
                name: ident.name.clone(),
                scope,
            },
            ast::ExprKind::Unary { op, operand } => NodeKind::Unary {
                op: *op,
                operand: self.lower_expr(operand, id, scope),
            },
            ast::ExprKind::Binary { op, lhs, rhs } => {
                let lhs = self.lower_expr(lhs, id, scope);
                let rhs = self.lower_expr(rhs, id, scope);
                NodeKind::Binary { op: *op, lhs, rhs }
            }
            ast::ExprKind::Call { callee, args } => {
                let callee = self.lower_expr(callee, id, scope);
                let args = args.iter().map(|a| self.lower_expr(a, id, scope)).collect();
                NodeKind::Call { callee, args }
            }
            ast::ExprKind::Error => NodeKind::Error,
        };
        self.set(id, kind);
        id
    }
}
