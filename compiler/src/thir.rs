// thir.rs — Typed graph: untyped nodes paired with their resolved types
//
// The consumer-facing view of a checked file. Each item's untyped nodes are
// paired with the types inference assigned them and with spans in file
// coordinates. Built fresh per revision from per-item query results and
// never mutated afterwards.
//
// Preconditions: built from the same revision's untyped graphs, inference
//   results and item spans.
// Postconditions: every node carries a variable-free type.
// Failure modes: none (items whose inference failed carry the error type).
// Side effects: none.

use std::fmt;

use crate::ast::Span;
use crate::diag::shift;
use crate::hir::{DeclKind, NodeKind, UntypedItem};
use crate::id::{FileId, ItemRef, LocalId, NodeId};
use crate::queries::{InferItemQuery, ItemSpansQuery, ItemTreeQuery, UntypedItemQuery};
use crate::query::{Database, QueryError, QueryResult};
use crate::type_infer::Inference;
use crate::types::Type;

/// An untyped node plus its resolved type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypedNode {
    pub id: NodeId,
    pub kind: NodeKind,
    pub ty: Type,
    /// File coordinates.
    pub span: Span,
    pub parent: Option<LocalId>,
    pub depth: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypedItem {
    pub item: ItemRef,
    pub kind: DeclKind,
    pub name: String,
    pub span: Span,
    pub nodes: Vec<TypedNode>,
}

impl TypedItem {
    /// Pair an item's nodes with inferred types. Without an inference result
    /// (an alias caught in a cycle) every node has the error type.
    pub fn build(item: ItemRef, untyped: &UntypedItem, inference: Option<&Inference>, offset: usize) -> Self {
        let nodes = untyped
            .ids()
            .zip(untyped.nodes.iter())
            .map(|(local, node)| TypedNode {
                id: item.node(local),
                kind: node.kind.clone(),
                ty: inference
                    .and_then(|inf| inf.type_of(local))
                    .cloned()
                    .unwrap_or(Type::Error),
                span: shift(node.span, offset),
                parent: node.parent,
                depth: untyped.depth(local),
            })
            .collect::<Vec<_>>();
        let span = nodes
            .first()
            .map(|n| n.span)
            .unwrap_or_else(|| (offset..offset).into());
        TypedItem {
            item,
            kind: untyped.kind,
            name: untyped.name.clone(),
            span,
            nodes,
        }
    }

    pub fn root(&self) -> Option<&TypedNode> {
        self.nodes.first()
    }
}

/// All items of one file, in source order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypedGraph {
    pub file: FileId,
    pub items: Vec<TypedItem>,
}

impl TypedGraph {
    pub fn node(&self, id: NodeId) -> Option<&TypedNode> {
        self.items
            .iter()
            .find(|item| item.item.item == id.item)?
            .nodes
            .get(id.local.index())
    }

    pub fn item_named(&self, name: &str) -> Option<&TypedItem> {
        self.items.iter().find(|item| item.name == name)
    }

    /// The smallest node whose span contains byte `offset`.
    pub fn node_at(&self, offset: usize) -> Option<&TypedNode> {
        self.items
            .iter()
            .flat_map(|item| item.nodes.iter())
            .filter(|n| n.span.start <= offset && offset < n.span.end)
            .min_by_key(|n| (n.span.end - n.span.start, std::cmp::Reverse(n.depth)))
    }
}

impl fmt::Display for TypedGraph {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, item) in self.items.iter().enumerate() {
            if i > 0 {
                writeln!(f)?;
            }
            writeln!(f, "{} {} @{}..{}", item.kind, item.name, item.span.start, item.span.end)?;
            for node in &item.nodes {
                writeln!(
                    f,
                    "{:indent$}{} : {}  @{}..{}",
                    "",
                    node.kind.label(),
                    node.ty,
                    node.span.start,
                    node.span.end,
                    indent = 2 * (node.depth + 1)
                )?;
            }
        }
        Ok(())
    }
}

/// Build the typed graph of `file` from its per-item results.
pub fn typed_graph(db: &Database, file: &FileId) -> QueryResult<TypedGraph> {
    let tree = db.query::<ItemTreeQuery>(file)?;
    let spans = db.query::<ItemSpansQuery>(file)?;
    let mut items = Vec::with_capacity(tree.len());
    for entry in tree.iter() {
        let item = ItemRef::new(*file, entry.id);
        let untyped = db.query::<UntypedItemQuery>(&item)?;
        let inference = match db.query::<InferItemQuery>(&item) {
            Ok(inference) => Some(inference),
            Err(QueryError::Cycle(_)) => None,
            Err(err) => return Err(err),
        };
        let offset = spans.get(&entry.id).map_or(0, |span| span.start);
        items.push(TypedItem::build(item, &untyped, inference.as_deref(), offset));
    }
    Ok(TypedGraph { file: *file, items })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queries::{test_db, TypedGraphQuery};

    #[test]
    fn spans_are_in_file_coordinates() {
        let (db, files) = test_db(&["fn a() {}\nfn b() { 1; }"]);
        let graph = db.query::<TypedGraphQuery>(&files[0]).unwrap();
        let b = graph.item_named("b").unwrap();
        assert_eq!(b.span.start, 10);
        let int = b.nodes.iter().find(|n| n.kind == NodeKind::Int(1)).unwrap();
        assert_eq!(int.span.start, 19);
        assert_eq!(int.ty, Type::Int);
    }

    #[test]
    fn node_at_finds_the_innermost_node() {
        let (db, files) = test_db(&["let x = 40 + 2;"]);
        let graph = db.query::<TypedGraphQuery>(&files[0]).unwrap();
        let node = graph.node_at(9).unwrap();
        assert_eq!(node.kind, NodeKind::Int(40));
        assert_eq!(graph.node(node.id), Some(node));
    }

    #[test]
    fn cyclic_alias_nodes_have_the_error_type() {
        let (db, files) = test_db(&["type T = T;"]);
        let graph = db.query::<TypedGraphQuery>(&files[0]).unwrap();
        let t = graph.item_named("T").unwrap();
        assert!(t.nodes.iter().all(|n| n.ty == Type::Error));
    }

    #[test]
    fn display_indents_by_depth() {
        let (db, files) = test_db(&["let x = 1;"]);
        let graph = db.query::<TypedGraphQuery>(&files[0]).unwrap();
        assert_eq!(
            graph.to_string(),
            "top <top> @0..10\n  top-level : fn() -> Unit  @0..10\n    let x : Int  @0..10\n      int 1 : Int  @8..9\n"
        );
    }
}
