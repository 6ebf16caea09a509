// dot.rs — Graphviz DOT output for function control-flow graphs
//
// Renders one function's CFG with the initialization state of every
// variable on entry to and exit from each block, suitable for rendering
// with `dot`. Unreachable blocks are drawn dashed and carry no states.
//
// Preconditions: `analysis` was computed from `untyped`.
// Postconditions: returns a valid DOT document; output is deterministic.
// Failure modes: none (pure string formatting).
// Side effects: none.

use std::fmt;

use crate::cfg::{BlockRole, Op, VarId};
use crate::hir::UntypedItem;
use crate::init_check::{InitAnalysis, VarStates};

/// Emit the CFG of `name` as a Graphviz DOT string.
pub fn emit_cfg_dot(name: &str, untyped: &UntypedItem, analysis: &InitAnalysis) -> String {
    CfgDot {
        name,
        untyped,
        analysis,
    }
    .to_string()
}

struct CfgDot<'a> {
    name: &'a str,
    untyped: &'a UntypedItem,
    analysis: &'a InitAnalysis,
}

impl CfgDot<'_> {
    fn states(&self, states: &VarStates) -> String {
        self.analysis
            .cfg
            .variables
            .iter()
            .zip(states.iter())
            .map(|(var, state)| format!("{}={}", var.name, state.symbol()))
            .collect::<Vec<_>>()
            .join(" ")
    }

    fn op_label(&self, op: &Op) -> String {
        let name = |var: VarId| {
            self.analysis
                .cfg
                .variable(var)
                .map_or("?", |v| v.name.as_str())
                .to_string()
        };
        match *op {
            Op::Write(var) => format!("write {}", name(var)),
            Op::Read { var, node } => match self.untyped.get(node) {
                Some(n) => format!("read {} @{}..{}", name(var), n.span.start, n.span.end),
                None => format!("read {}", name(var)),
            },
        }
    }
}

fn escape(text: &str) -> String {
    text.replace('\\', "\\\\").replace('"', "\\\"")
}

impl fmt::Display for CfgDot<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let cfg = &self.analysis.cfg;
        writeln!(f, "digraph \"{}\" {{", escape(self.name))?;
        writeln!(f, "    node [shape=box, fontname=\"Helvetica\", fontsize=10];")?;
        writeln!(f, "    edge [fontname=\"Helvetica\", fontsize=9];")?;

        for id in cfg.block_ids() {
            let Some(block) = cfg.block(id) else {
                continue;
            };
            let input = self.analysis.block_in.get(id.index()).and_then(Option::as_ref);
            let output = self.analysis.block_out.get(id.index()).and_then(Option::as_ref);

            let mut lines = vec![format!("{id} ({})", block.role)];
            if let Some(input) = input {
                lines.push(format!("in: {}", self.states(input)));
            }
            lines.extend(block.ops.iter().map(|op| self.op_label(op)));
            if let Some(output) = output {
                lines.push(format!("out: {}", self.states(output)));
            }
            let label: String = lines.iter().map(|l| format!("{}\\l", escape(l))).collect();

            let style = match (input.is_some(), block.role) {
                (false, _) => ", style=dashed, color=gray60",
                (true, BlockRole::Entry | BlockRole::Exit) => ", style=bold",
                (true, _) => "",
            };
            writeln!(f, "    {id} [label=\"{label}\"{style}];")?;
        }

        for id in cfg.block_ids() {
            let Some(block) = cfg.block(id) else {
                continue;
            };
            for succ in &block.succs {
                let back = cfg
                    .block(*succ)
                    .is_some_and(|s| s.role == BlockRole::LoopHeader && succ <= &id);
                if back {
                    writeln!(f, "    {id} -> {succ} [style=dashed, label=\"loop\"];")?;
                } else {
                    writeln!(f, "    {id} -> {succ};")?;
                }
            }
        }
        writeln!(f, "}}")
    }
}
