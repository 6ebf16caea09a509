// AST node types for Ember source files.
//
// Mirrors the grammar accepted by `parser.rs`. Every node carries a
// `SimpleSpan` for error reporting in downstream phases. Malformed input is
// represented by explicit `Error` variants produced during parser recovery.
//
// Preconditions: produced by the parser from a valid or partially-valid token stream.
// Postconditions: each node's span covers the source range of the construct.
// Failure modes: none (data-only module).
// Side effects: none.

use std::fmt;

use chumsky::span::SimpleSpan;

/// Byte-offset span (alias for chumsky's `SimpleSpan`).
pub type Span = SimpleSpan;

// ── Root ──

/// A complete Ember file: a sequence of top-level items.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Program {
    pub items: Vec<Item>,
    pub span: Span,
}

/// A top-level item with its source span.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Item {
    pub kind: ItemKind,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ItemKind {
    Function(FnDecl),
    TypeAlias(TypeAliasDecl),
    /// A statement outside any function; part of the top-level body.
    Stmt(Stmt),
}

// ── fn_decl: 'fn' IDENT '(' params ')' ('->' type)? block ──

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FnDecl {
    pub name: Ident,
    pub params: Vec<Param>,
    pub ret: Option<TypeExpr>,
    pub body: Block,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Param {
    pub name: Ident,
    pub ty: TypeExpr,
    pub span: Span,
}

// ── type_alias: 'type' IDENT '=' type ';' ──

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypeAliasDecl {
    pub name: Ident,
    pub target: TypeExpr,
}

/// A type written in source. Only named types exist at the surface.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TypeExpr {
    Named(Ident),
    Error(Span),
}

impl TypeExpr {
    pub fn span(&self) -> Span {
        match self {
            TypeExpr::Named(ident) => ident.span,
            TypeExpr::Error(span) => *span,
        }
    }
}

// ── Statements ──

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Block {
    pub stmts: Vec<Stmt>,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Stmt {
    pub kind: StmtKind,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StmtKind {
    Let {
        name: Ident,
        ty: Option<TypeExpr>,
        init: Option<Expr>,
    },
    Assign {
        target: Ident,
        value: Expr,
    },
    Expr(Expr),
    If {
        cond: Expr,
        then_block: Block,
        else_branch: Option<Box<Stmt>>,
    },
    While {
        cond: Expr,
        body: Block,
    },
    Return(Option<Expr>),
    Block(Block),
    /// Recovered from a malformed statement.
    Error,
}

// ── Expressions ──

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Expr {
    pub kind: ExprKind,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExprKind {
    Int(i64),
    Bool(bool),
    Str(String),
    Name(Ident),
    Unary {
        op: UnaryOp,
        operand: Box<Expr>,
    },
    Binary {
        op: BinOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
    Call {
        callee: Box<Expr>,
        args: Vec<Expr>,
    },
    /// Recovered from a malformed expression.
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Eq,
    NotEq,
    Lt,
    LtEq,
    Gt,
    GtEq,
    And,
    Or,
}

impl BinOp {
    /// Operators whose operands and result are `Int`.
    pub fn is_arithmetic(self) -> bool {
        matches!(
            self,
            BinOp::Add | BinOp::Sub | BinOp::Mul | BinOp::Div | BinOp::Rem
        )
    }

    /// Operators comparing two `Int` operands.
    pub fn is_ordering(self) -> bool {
        matches!(self, BinOp::Lt | BinOp::LtEq | BinOp::Gt | BinOp::GtEq)
    }
}

impl fmt::Display for BinOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            BinOp::Add => "+",
            BinOp::Sub => "-",
            BinOp::Mul => "*",
            BinOp::Div => "/",
            BinOp::Rem => "%",
            BinOp::Eq => "==",
            BinOp::NotEq => "!=",
            BinOp::Lt => "<",
            BinOp::LtEq => "<=",
            BinOp::Gt => ">",
            BinOp::GtEq => ">=",
            BinOp::And => "&&",
            BinOp::Or => "||",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UnaryOp {
    Neg,
    Not,
}

impl fmt::Display for UnaryOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UnaryOp::Neg => f.write_str("-"),
            UnaryOp::Not => f.write_str("!"),
        }
    }
}

// ── Shared ──

/// An identifier with its source span.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ident {
    pub name: String,
    pub span: Span,
}

// ── Re-anchoring ──
//
// Items are analyzed with spans relative to their own start, so that moving
// an item within its file leaves its per-item results value-equal.

fn rebase_span(span: Span, origin: usize) -> Span {
    let start = span.start.saturating_sub(origin);
    let end = span.end.saturating_sub(origin);
    (start..end).into()
}

impl Item {
    /// This item with every span made relative to byte `origin`.
    pub fn rebased(&self, origin: usize) -> Item {
        let kind = match &self.kind {
            ItemKind::Function(decl) => ItemKind::Function(FnDecl {
                name: decl.name.rebased(origin),
                params: decl
                    .params
                    .iter()
                    .map(|p| Param {
                        name: p.name.rebased(origin),
                        ty: p.ty.rebased(origin),
                        span: rebase_span(p.span, origin),
                    })
                    .collect(),
                ret: decl.ret.as_ref().map(|t| t.rebased(origin)),
                body: decl.body.rebased(origin),
            }),
            ItemKind::TypeAlias(decl) => ItemKind::TypeAlias(TypeAliasDecl {
                name: decl.name.rebased(origin),
                target: decl.target.rebased(origin),
            }),
            ItemKind::Stmt(stmt) => ItemKind::Stmt(stmt.rebased(origin)),
        };
        Item {
            kind,
            span: rebase_span(self.span, origin),
        }
    }
}

impl Ident {
    fn rebased(&self, origin: usize) -> Ident {
        Ident {
            name: self.name.clone(),
            span: rebase_span(self.span, origin),
        }
    }
}

impl TypeExpr {
    fn rebased(&self, origin: usize) -> TypeExpr {
        match self {
            TypeExpr::Named(ident) => TypeExpr::Named(ident.rebased(origin)),
            TypeExpr::Error(span) => TypeExpr::Error(rebase_span(*span, origin)),
        }
    }
}

impl Block {
    fn rebased(&self, origin: usize) -> Block {
        Block {
            stmts: self.stmts.iter().map(|s| s.rebased(origin)).collect(),
            span: rebase_span(self.span, origin),
        }
    }
}

impl Stmt {
    fn rebased(&self, origin: usize) -> Stmt {
        let kind = match &self.kind {
            StmtKind::Let { name, ty, init } => StmtKind::Let {
                name: name.rebased(origin),
                ty: ty.as_ref().map(|t| t.rebased(origin)),
                init: init.as_ref().map(|e| e.rebased(origin)),
            },
            StmtKind::Assign { target, value } => StmtKind::Assign {
                target: target.rebased(origin),
                value: value.rebased(origin),
            },
            StmtKind::Expr(expr) => StmtKind::Expr(expr.rebased(origin)),
            StmtKind::If {
                cond,
                then_block,
                else_branch,
            } => StmtKind::If {
                cond: cond.rebased(origin),
                then_block: then_block.rebased(origin),
                else_branch: else_branch.as_ref().map(|s| Box::new(s.rebased(origin))),
            },
            StmtKind::While { cond, body } => StmtKind::While {
                cond: cond.rebased(origin),
                body: body.rebased(origin),
            },
            StmtKind::Return(value) => StmtKind::Return(value.as_ref().map(|e| e.rebased(origin))),
            StmtKind::Block(block) => StmtKind::Block(block.rebased(origin)),
            StmtKind::Error => StmtKind::Error,
        };
        Stmt {
            kind,
            span: rebase_span(self.span, origin),
        }
    }
}

impl Expr {
    fn rebased(&self, origin: usize) -> Expr {
        let kind = match &self.kind {
            ExprKind::Int(v) => ExprKind::Int(*v),
            ExprKind::Bool(v) => ExprKind::Bool(*v),
            ExprKind::Str(s) => ExprKind::Str(s.clone()),
            ExprKind::Name(ident) => ExprKind::Name(ident.rebased(origin)),
            ExprKind::Unary { op, operand } => ExprKind::Unary {
                op: *op,
                operand: Box::new(operand.rebased(origin)),
            },
            ExprKind::Binary { op, lhs, rhs } => ExprKind::Binary {
                op: *op,
                lhs: Box::new(lhs.rebased(origin)),
                rhs: Box::new(rhs.rebased(origin)),
            },
            ExprKind::Call { callee, args } => ExprKind::Call {
                callee: Box::new(callee.rebased(origin)),
                args: args.iter().map(|a| a.rebased(origin)).collect(),
            },
            ExprKind::Error => ExprKind::Error,
        };
        Expr {
            kind,
            span: rebase_span(self.span, origin),
        }
    }
}
