// cfg.rs — Control-flow graph over one item's statements
//
// Builds basic blocks from a function (or top-level body) untyped graph.
// Blocks hold the variable reads and writes that initialization analysis
// cares about, in evaluation order. `if` splits into then/else blocks that
// meet at a join, `while` gets a header that the body loops back to, and
// `return` jumps to the exit and continues in a fresh unreachable block.
//
// Preconditions: `bindings` comes from inference over the same untyped
//   graph.
// Postconditions: block 0 is the entry and block 1 the exit; `preds` and
//   `succs` mirror each other; every `let` and parameter has one VarId.
// Failure modes: none.
// Side effects: none.

use std::collections::BTreeMap;
use std::fmt;

use crate::dataflow::DataflowGraph;
use crate::hir::{NodeKind, UntypedItem};
use crate::id::LocalId;
use crate::type_infer::Binding;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BlockId(pub u32);

impl BlockId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "bb{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct VarId(pub u32);

impl VarId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// A `let` or parameter of the item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Variable {
    pub decl: LocalId,
    pub name: String,
    pub param: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    Write(VarId),
    /// A use of `var` by the `name` node `node`.
    Read { var: VarId, node: LocalId },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockRole {
    Entry,
    Exit,
    Then,
    Else,
    Join,
    LoopHeader,
    LoopBody,
    LoopExit,
    /// Code following a `return`.
    Unreachable,
}

impl fmt::Display for BlockRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            BlockRole::Entry => "entry",
            BlockRole::Exit => "exit",
            BlockRole::Then => "then",
            BlockRole::Else => "else",
            BlockRole::Join => "join",
            BlockRole::LoopHeader => "loop-header",
            BlockRole::LoopBody => "loop-body",
            BlockRole::LoopExit => "loop-exit",
            BlockRole::Unreachable => "unreachable",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BasicBlock {
    pub role: BlockRole,
    pub ops: Vec<Op>,
    pub succs: Vec<BlockId>,
    pub preds: Vec<BlockId>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cfg {
    pub blocks: Vec<BasicBlock>,
    pub variables: Vec<Variable>,
}

impl Cfg {
    pub const ENTRY: BlockId = BlockId(0);
    pub const EXIT: BlockId = BlockId(1);

    pub fn block(&self, id: BlockId) -> Option<&BasicBlock> {
        self.blocks.get(id.index())
    }

    pub fn variable(&self, var: VarId) -> Option<&Variable> {
        self.variables.get(var.index())
    }

    pub fn var_of(&self, decl: LocalId) -> Option<VarId> {
        self.variables
            .iter()
            .position(|v| v.decl == decl)
            .map(|i| VarId(i as u32))
    }

    pub fn block_ids(&self) -> impl Iterator<Item = BlockId> + '_ {
        (0..self.blocks.len()).map(|i| BlockId(i as u32))
    }
}

impl DataflowGraph for Cfg {
    type Node = BlockId;

    fn num_nodes(&self) -> usize {
        self.blocks.len()
    }

    fn index(&self, node: BlockId) -> usize {
        node.index()
    }

    fn preds(&self, node: BlockId) -> &[BlockId] {
        self.blocks
            .get(node.index())
            .map_or(&[], |b| b.preds.as_slice())
    }

    fn succs(&self, node: BlockId) -> &[BlockId] {
        self.blocks
            .get(node.index())
            .map_or(&[], |b| b.succs.as_slice())
    }
}

// ── Construction ────────────────────────────────────────────────────────────

pub fn build_cfg(untyped: &UntypedItem, bindings: &BTreeMap<LocalId, Binding>) -> Cfg {
    let variables: Vec<Variable> = untyped
        .ids()
        .zip(untyped.nodes.iter())
        .filter_map(|(decl, node)| match &node.kind {
            NodeKind::Param { name, .. } => Some(Variable {
                decl,
                name: name.clone(),
                param: true,
            }),
            NodeKind::Let { name, .. } => Some(Variable {
                decl,
                name: name.clone(),
                param: false,
            }),
            _ => None,
        })
        .collect();
    let vars: BTreeMap<LocalId, VarId> = variables
        .iter()
        .enumerate()
        .map(|(i, v)| (v.decl, VarId(i as u32)))
        .collect();

    let mut builder = Builder {
        untyped,
        bindings,
        vars: &vars,
        blocks: Vec::new(),
        current: Cfg::ENTRY,
    };
    builder.new_block(BlockRole::Entry);
    builder.new_block(BlockRole::Exit);

    match untyped.get(UntypedItem::ROOT).map(|n| &n.kind) {
        Some(NodeKind::Function { body, .. }) => builder.stmt(*body),
        Some(NodeKind::TopLevel { body }) => {
            for &stmt in body {
                builder.stmt(stmt);
            }
        }
        _ => {}
    }
    let last = builder.current;
    builder.edge(last, Cfg::EXIT);

    Cfg {
        blocks: builder.blocks,
        variables,
    }
}

struct Builder<'a> {
    untyped: &'a UntypedItem,
    bindings: &'a BTreeMap<LocalId, Binding>,
    vars: &'a BTreeMap<LocalId, VarId>,
    blocks: Vec<BasicBlock>,
    current: BlockId,
}

impl Builder<'_> {
    fn new_block(&mut self, role: BlockRole) -> BlockId {
        let id = BlockId(self.blocks.len() as u32);
        self.blocks.push(BasicBlock {
            role,
            ops: Vec::new(),
            succs: Vec::new(),
            preds: Vec::new(),
        });
        id
    }

    fn edge(&mut self, from: BlockId, to: BlockId) {
        if !self.blocks[from.index()].succs.contains(&to) {
            self.blocks[from.index()].succs.push(to);
            self.blocks[to.index()].preds.push(from);
        }
    }

    fn push(&mut self, op: Op) {
        let current = self.current;
        self.blocks[current.index()].ops.push(op);
    }

    /// The variable a `name` node refers to, if it is a local of this item.
    fn local_var(&self, name_node: LocalId) -> Option<VarId> {
        match self.bindings.get(&name_node)? {
            Binding::Local(decl) => self.vars.get(decl).copied(),
            Binding::Item(_) | Binding::Builtin(_) => None,
        }
    }

    fn kind(&self, id: LocalId) -> Option<&NodeKind> {
        self.untyped.get(id).map(|n| &n.kind)
    }

    fn stmt(&mut self, id: LocalId) {
        let Some(kind) = self.kind(id).cloned() else {
            return;
        };
        match kind {
            NodeKind::Block { stmts, .. } => {
                for stmt in stmts {
                    self.stmt(stmt);
                }
            }
            NodeKind::Let { init, .. } => {
                if let Some(init) = init {
                    self.expr(init);
                    if let Some(&var) = self.vars.get(&id) {
                        self.push(Op::Write(var));
                    }
                }
            }
            NodeKind::Assign { target, value } => {
                self.expr(value);
                if let Some(var) = self.local_var(target) {
                    self.push(Op::Write(var));
                }
            }
            NodeKind::ExprStmt(expr) => self.expr(expr),
            NodeKind::If {
                cond,
                then_block,
                else_branch,
            } => {
                self.expr(cond);
                let branch = self.current;

                let then_start = self.new_block(BlockRole::Then);
                self.edge(branch, then_start);
                self.current = then_start;
                self.stmt(then_block);
                let then_end = self.current;

                let else_end = match else_branch {
                    Some(else_branch) => {
                        let else_start = self.new_block(BlockRole::Else);
                        self.edge(branch, else_start);
                        self.current = else_start;
                        self.stmt(else_branch);
                        self.current
                    }
                    None => branch,
                };

                let join = self.new_block(BlockRole::Join);
                self.edge(then_end, join);
                self.edge(else_end, join);
                self.current = join;
            }
            NodeKind::While { cond, body } => {
                let header = self.new_block(BlockRole::LoopHeader);
                let before = self.current;
                self.edge(before, header);
                self.current = header;
                self.expr(cond);

                let body_start = self.new_block(BlockRole::LoopBody);
                self.edge(header, body_start);
                self.current = body_start;
                self.stmt(body);
                let body_end = self.current;
                self.edge(body_end, header);

                let exit = self.new_block(BlockRole::LoopExit);
                self.edge(header, exit);
                self.current = exit;
            }
            NodeKind::Return(value) => {
                if let Some(value) = value {
                    self.expr(value);
                }
                let from = self.current;
                self.edge(from, Cfg::EXIT);
                self.current = self.new_block(BlockRole::Unreachable);
            }
            // Expressions never appear in statement position; error
            // statements have no effect on initialization.
            _ => {}
        }
    }

    fn expr(&mut self, id: LocalId) {
        let Some(kind) = self.kind(id).cloned() else {
            return;
        };
        match kind {
            NodeKind::Name { .. } => {
                if let Some(var) = self.local_var(id) {
                    self.push(Op::Read { var, node: id });
                }
            }
            NodeKind::Unary { operand, .. } => self.expr(operand),
            NodeKind::Binary { lhs, rhs, .. } => {
                self.expr(lhs);
                self.expr(rhs);
            }
            NodeKind::Call { callee, args } => {
                self.expr(callee);
                for arg in args {
                    self.expr(arg);
                }
            }
            _ => {}
        }
    }
}
