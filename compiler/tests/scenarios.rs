// End-to-end checks of the four reference scenarios through the public
// `Session` API: uninitialized use, a type mismatch absorbed by the error
// type, incremental reuse across items, and a self-referential alias.

use emc::diag::DiagKind;
use emc::hir::UntypedItem;
use emc::queries::{InferItemQuery, SignatureQuery, TypeOfQuery, UntypedItemQuery};
use emc::query::{Query, QueryError, QueryKey};
use emc::session::{Session, SessionError};
use emc::source::TextEdit;
use emc::thir::TypedGraph;
use emc::types::Type;

fn kinds(session: &Session, file: emc::id::FileId) -> Vec<DiagKind> {
    session
        .all_diagnostics(file)
        .unwrap()
        .iter()
        .map(|d| d.kind)
        .collect()
}

/// Type of the first node labelled `label` in the item named `item`.
fn labelled_type(graph: &TypedGraph, item: &str, label: &str) -> Type {
    graph
        .item_named(item)
        .and_then(|i| i.nodes.iter().find(|n| n.kind.label() == label))
        .map(|n| n.ty.clone())
        .unwrap_or_else(|| panic!("no node `{label}` in `{item}`"))
}

#[test]
fn scenario_uninitialized_use() {
    let session = Session::default();
    let file = session.open_file("s1.em", "let x; print(x);");

    assert_eq!(kinds(&session, file), vec![DiagKind::UninitializedUse]);
    let diags = session.all_diagnostics(file).unwrap();
    assert_eq!(diags[0].message, "use of uninitialized variable `x`");
    // The use inside `print(x)` is blamed, not the declaration.
    assert_eq!(diags[0].span.start, 13);
}

#[test]
fn scenario_mismatch_is_absorbed() {
    let source = "let x = 1; let y = x + true;";
    let session = Session::default();
    let file = session.open_file("s2.em", source);

    let diags = session.all_diagnostics(file).unwrap();
    assert_eq!(diags.len(), 1, "{diags:?}");
    assert_eq!(diags[0].kind, DiagKind::TypeMismatch);
    let plus = source.find("x + true").unwrap();
    assert_eq!(diags[0].span.start, plus);
    assert_eq!(diags[0].span.end, plus + "x + true".len());

    let graph = session.typed_graph(file).unwrap();
    assert_eq!(labelled_type(&graph, "<top>", "let x"), Type::Int);
    assert_eq!(labelled_type(&graph, "<top>", "let y"), Type::Error);
}

#[test]
fn scenario_unrelated_edit_reuses_cached_types() {
    let source = "fn f() { let a = 1; }\nfn g() { let b = true; }";
    let session = Session::default();
    let file = session.open_file("s3.em", source);

    let g = session.find_item(file, "g").unwrap().unwrap();
    let untyped = session.untyped_item(g).unwrap();
    let let_b = untyped
        .ids()
        .find(|&id| untyped.get(id).is_some_and(|n| n.kind.label() == "let b"))
        .unwrap();
    let node = g.node(let_b);
    assert_eq!(session.type_of(node).unwrap(), Type::Bool);

    // Rewrite `1` in f's body to `100`, shifting g within the file.
    let one = source.find('1').unwrap();
    session.edit(file, &[TextEdit::new(one..one + 1, "100")]).unwrap();
    session.reset_stats();

    assert_eq!(session.type_of(node).unwrap(), Type::Bool);
    let stats = session.stats();
    for kind in [
        UntypedItemQuery::KIND,
        SignatureQuery::KIND,
        InferItemQuery::KIND,
        TypeOfQuery::KIND,
    ] {
        assert_eq!(stats.executions(kind), 0, "{kind} was recomputed");
    }
    assert!(stats.cutoffs >= 1);
}

#[test]
fn scenario_self_referential_alias() {
    let session = Session::default();
    let file = session.open_file("s4.em", "type T = T;");

    let t = session.find_item(file, "T").unwrap().unwrap();
    let root = t.node(UntypedItem::ROOT);
    let err = session.type_of(root).unwrap_err();
    let SessionError::Query(QueryError::Cycle(cycle)) = &err else {
        panic!("expected a cycle, got {err:?}");
    };
    assert!(!cycle.path.is_empty());

    let key = QueryKey::new(TypeOfQuery::KIND, root);
    assert!(!session.database().is_memoized(&key));

    let diags = session.all_diagnostics(file).unwrap();
    assert_eq!(
        diags.iter().map(|d| d.kind).collect::<Vec<_>>(),
        vec![DiagKind::CycleDetected]
    );
    assert_eq!(diags[0].message, "type alias `T` refers to itself");
}
