// dataflow.rs — Generic forward dataflow solver
//
// Iterates a worklist over any graph that exposes predecessor and successor
// lists until no node's out-state changes. Nodes that no path from the entry
// reaches keep `None` states and take no part in the meet at their
// successors.
//
// Preconditions: `meet` and `transfer` are monotone over a lattice of finite
//   height, so the iteration terminates.
// Postconditions: for every reached node, `out = transfer(node, in)` and
//   `in = meet(out of reached predecessors)` (the entry takes
//   `entry_state`).
// Failure modes: none.
// Side effects: none.

use std::collections::VecDeque;

pub trait DataflowGraph {
    type Node: Copy + Eq;

    fn num_nodes(&self) -> usize;
    fn index(&self, node: Self::Node) -> usize;
    fn preds(&self, node: Self::Node) -> &[Self::Node];
    fn succs(&self, node: Self::Node) -> &[Self::Node];
}

/// Per-node states; `None` marks a node the entry never reaches.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataflowResult<T> {
    pub in_map: Vec<Option<T>>,
    pub out_map: Vec<Option<T>>,
}

impl<T> DataflowResult<T> {
    pub fn reached(&self, idx: usize) -> bool {
        self.in_map.get(idx).is_some_and(Option::is_some)
    }
}

pub fn solve_forward<T, G, FMeet, FTransfer>(
    graph: &G,
    entry_node: G::Node,
    entry_state: T,
    meet: FMeet,
    transfer: FTransfer,
) -> DataflowResult<T>
where
    T: Clone + PartialEq,
    G: DataflowGraph,
    FMeet: Fn(&[&T]) -> T,
    FTransfer: Fn(G::Node, &T) -> T,
{
    let num_nodes = graph.num_nodes();
    let mut in_map: Vec<Option<T>> = vec![None; num_nodes];
    let mut out_map: Vec<Option<T>> = vec![None; num_nodes];
    let mut in_worklist = vec![false; num_nodes];
    let mut worklist = VecDeque::new();

    let entry_idx = graph.index(entry_node);
    if entry_idx >= num_nodes {
        return DataflowResult { in_map, out_map };
    }
    in_worklist[entry_idx] = true;
    worklist.push_back(entry_node);

    while let Some(node) = worklist.pop_front() {
        let idx = graph.index(node);
        in_worklist[idx] = false;

        let in_state = if node == entry_node {
            entry_state.clone()
        } else {
            let pred_states: Vec<&T> = graph
                .preds(node)
                .iter()
                .filter_map(|&pred| out_map[graph.index(pred)].as_ref())
                .collect();
            if pred_states.is_empty() {
                continue;
            }
            meet(&pred_states)
        };

        let out_state = transfer(node, &in_state);

        let out_changed = out_map[idx].as_ref() != Some(&out_state);
        in_map[idx] = Some(in_state);
        if out_changed {
            out_map[idx] = Some(out_state);
            for &succ in graph.succs(node) {
                let s_idx = graph.index(succ);
                if !in_worklist[s_idx] {
                    in_worklist[s_idx] = true;
                    worklist.push_back(succ);
                }
            }
        }
    }

    DataflowResult { in_map, out_map }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    struct ToyNode(usize);

    struct ToyGraph {
        preds: Vec<Vec<ToyNode>>,
        succs: Vec<Vec<ToyNode>>,
    }

    impl ToyGraph {
        fn from_edges(len: usize, edges: &[(usize, usize)]) -> Self {
            let mut preds = vec![vec![]; len];
            let mut succs = vec![vec![]; len];
            for &(from, to) in edges {
                succs[from].push(ToyNode(to));
                preds[to].push(ToyNode(from));
            }
            Self { preds, succs }
        }
    }

    impl DataflowGraph for ToyGraph {
        type Node = ToyNode;

        fn num_nodes(&self) -> usize {
            self.preds.len()
        }

        fn index(&self, node: Self::Node) -> usize {
            node.0
        }

        fn preds(&self, node: Self::Node) -> &[Self::Node] {
            &self.preds[node.0]
        }

        fn succs(&self, node: Self::Node) -> &[Self::Node] {
            &self.succs[node.0]
        }
    }

    fn min(states: &[&i32]) -> i32 {
        states.iter().map(|s| **s).min().unwrap_or(0)
    }

    #[test]
    fn solve_forward_chain() {
        let graph = ToyGraph::from_edges(3, &[(0, 1), (1, 2)]);
        let result = solve_forward(&graph, ToyNode(0), 0, min, |_, s| s + 1);
        assert_eq!(result.in_map, vec![Some(0), Some(1), Some(2)]);
        assert_eq!(result.out_map, vec![Some(1), Some(2), Some(3)]);
    }

    #[test]
    fn unreached_nodes_stay_none_and_skip_the_meet() {
        // 0 -> 2, 1 -> 2; node 1 is unreachable from the entry.
        let graph = ToyGraph::from_edges(3, &[(0, 2), (1, 2)]);
        let result = solve_forward(&graph, ToyNode(0), 5, min, |_, s| *s);
        assert!(!result.reached(1));
        assert_eq!(result.in_map[2], Some(5));
    }

    #[test]
    fn loops_reach_a_fixpoint() {
        // 0 -> 1 -> 2 -> 1, 1 -> 3; saturating counter capped at 3.
        let graph = ToyGraph::from_edges(4, &[(0, 1), (1, 2), (2, 1), (1, 3)]);
        let result = solve_forward(
            &graph,
            ToyNode(0),
            0,
            |states| states.iter().map(|s| **s).max().unwrap_or(0),
            |_, s| (s + 1).min(3),
        );
        assert_eq!(result.in_map[1], Some(3));
        assert_eq!(result.out_map[3], Some(3));
    }
}
