// init_check.rs — Definite-initialization analysis per function item
//
// Runs a forward dataflow fixpoint over the item's control-flow graph with
// one lattice value per variable. Writes make a variable definitely
// assigned; at merge points a variable assigned on some paths but not on
// others becomes maybe-assigned. Every read whose incoming state is not
// definitely-assigned is reported, including maybe-assigned reads.
//
// Preconditions: the item's inference has completed, so name bindings are
//   known.
// Postconditions: diagnostics are item-relative, sorted, and name only
//   reads in blocks reachable from the entry.
// Failure modes: none of its own; engine errors from nested queries
//   propagate.
// Side effects: none.

use std::collections::BTreeMap;

use crate::cfg::{build_cfg, BlockId, Cfg, Op};
use crate::dataflow::{solve_forward, DataflowResult};
use crate::diag::{sort_diagnostics, DiagKind, Diagnostic};
use crate::hir::UntypedItem;
use crate::id::{FileId, FunctionId, LocalId};
use crate::queries::{InferItemQuery, InitAnalysisQuery, ItemSpansQuery, UntypedItemQuery};
use crate::query::{Database, QueryResult};
use crate::type_infer::Binding;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum InitState {
    Unassigned,
    MaybeAssigned,
    DefinitelyAssigned,
}

impl InitState {
    /// Merge the states reaching a join point.
    pub fn meet(self, other: InitState) -> InitState {
        if self == other {
            self
        } else {
            InitState::MaybeAssigned
        }
    }

    pub fn symbol(self) -> char {
        match self {
            InitState::Unassigned => 'U',
            InitState::MaybeAssigned => 'M',
            InitState::DefinitelyAssigned => 'D',
        }
    }
}

/// One state per variable, indexed by `VarId`.
pub type VarStates = Vec<InitState>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InitAnalysis {
    pub cfg: Cfg,
    /// Per block; `None` for blocks the entry never reaches.
    pub block_in: Vec<Option<VarStates>>,
    pub block_out: Vec<Option<VarStates>>,
    /// Item-relative spans.
    pub diagnostics: Vec<Diagnostic>,
}

fn meet_all(states: &[&VarStates]) -> VarStates {
    let mut iter = states.iter();
    let Some(first) = iter.next() else {
        return Vec::new();
    };
    iter.fold((*first).clone(), |acc, next| {
        acc.iter().zip(next.iter()).map(|(a, b)| a.meet(*b)).collect()
    })
}

fn transfer(cfg: &Cfg, block: BlockId, input: &VarStates) -> VarStates {
    let mut state = input.clone();
    if let Some(block) = cfg.block(block) {
        for op in &block.ops {
            if let Op::Write(var) = op {
                if let Some(slot) = state.get_mut(var.index()) {
                    *slot = InitState::DefinitelyAssigned;
                }
            }
        }
    }
    state
}

/// Analyze one item given its name bindings.
pub fn analyze(file: FileId, untyped: &UntypedItem, bindings: &BTreeMap<LocalId, Binding>) -> InitAnalysis {
    let cfg = build_cfg(untyped, bindings);
    let entry: VarStates = cfg
        .variables
        .iter()
        .map(|v| {
            if v.param {
                InitState::DefinitelyAssigned
            } else {
                InitState::Unassigned
            }
        })
        .collect();

    let DataflowResult { in_map, out_map } =
        solve_forward(&cfg, Cfg::ENTRY, entry, meet_all, |block, input| transfer(&cfg, block, input));

    let mut diagnostics = Vec::new();
    for (block, input) in cfg.blocks.iter().zip(in_map.iter()) {
        let Some(input) = input else {
            continue;
        };
        let mut state = input.clone();
        for op in &block.ops {
            match *op {
                Op::Write(var) => {
                    if let Some(slot) = state.get_mut(var.index()) {
                        *slot = InitState::DefinitelyAssigned;
                    }
                }
                Op::Read { var, node } => {
                    let current = state.get(var.index()).copied();
                    if let (Some(current), Some(variable)) = (current, cfg.variable(var)) {
                        if current != InitState::DefinitelyAssigned {
                            diagnostics.push(uninitialized_use(file, untyped, &variable.name, variable.decl, node, current));
                        }
                    }
                }
            }
        }
    }
    sort_diagnostics(&mut diagnostics);

    InitAnalysis {
        cfg,
        block_in: in_map,
        block_out: out_map,
        diagnostics,
    }
}

fn uninitialized_use(
    file: FileId,
    untyped: &UntypedItem,
    name: &str,
    decl: LocalId,
    read: LocalId,
    state: InitState,
) -> Diagnostic {
    let span = untyped.get(read).map_or_else(|| (0..0).into(), |n| n.span);
    let message = match state {
        InitState::MaybeAssigned => format!("use of possibly-uninitialized variable `{name}`"),
        _ => format!("use of uninitialized variable `{name}`"),
    };
    let mut diag = Diagnostic::error(DiagKind::UninitializedUse, file, span, message)
        .with_hint(format!("assign `{name}` on every path before this use"));
    if let Some(decl) = untyped.get(decl) {
        diag = diag.with_related(decl.span, format!("`{name}` declared here"));
    }
    diag
}

// ── Queries ─────────────────────────────────────────────────────────────────

pub fn init_analysis(db: &Database, function: &FunctionId) -> QueryResult<InitAnalysis> {
    let untyped = db.query::<UntypedItemQuery>(function)?;
    if !untyped.kind.has_body() {
        return Ok(analyze(function.file, &untyped, &BTreeMap::new()));
    }
    let inference = db.query::<InferItemQuery>(function)?;
    Ok(analyze(function.file, &untyped, &inference.bindings))
}

/// Initialization diagnostics of one function, in file coordinates.
pub fn initialization_diagnostics(db: &Database, function: &FunctionId) -> QueryResult<Vec<Diagnostic>> {
    let analysis = db.query::<InitAnalysisQuery>(function)?;
    let spans = db.query::<ItemSpansQuery>(&function.file)?;
    let offset = spans.get(&function.item).map_or(0, |span| span.start);
    Ok(analysis
        .diagnostics
        .iter()
        .cloned()
        .map(|d| d.rebase(offset))
        .collect())
}
