// Incremental behaviour through the public `Session` API.
//
// Every test compares an edited session against what a fresh session
// computes for the same final text (soundness), or counts executions to
// check that unaffected work is reused (early cutoff). The later tests
// cover cyclic aliases, deep alias chains, concurrent writers and names
// resolved across files.

use std::collections::BTreeMap;
use std::thread;

use emc::config::SessionConfig;
use emc::diag::{DiagKind, Diagnostic};
use emc::id::FileId;
use emc::queries::{
    AllDiagnosticsQuery, InferItemQuery, InitAnalysisQuery, SignatureQuery, SourceTextInput, UntypedItemQuery,
};
use emc::query::{Query, QueryKey};
use emc::session::Session;
use emc::source::TextEdit;
use emc::types::Type;

const PROGRAM: &str = "\
fn double(n: Int) -> Int { return n * 2; }
fn pick(flag: Bool) -> Int {
    let out;
    if flag { out = double(3); } else { out = 0; }
    return out;
}
let total = pick(true) + 1;
print(total);
";

fn fresh_diagnostics(text: &str) -> Vec<Diagnostic> {
    let session = Session::default();
    let file = session.open_file("fresh.em", text);
    session.all_diagnostics(file).unwrap().as_ref().clone()
}

fn open(text: &str) -> (Session, FileId) {
    let session = Session::default();
    let file = session.open_file("main.em", text);
    (session, file)
}

#[test]
fn requery_without_edits_executes_nothing() {
    let (session, file) = open(PROGRAM);
    let first = session.all_diagnostics(file).unwrap();
    session.reset_stats();
    let second = session.all_diagnostics(file).unwrap();
    assert_eq!(first, second);
    assert_eq!(session.stats().total_executions(), 0);
    assert!(session.stats().hits >= 1);
}

#[test]
fn whitespace_edit_is_cut_off_after_lowering() {
    let (session, file) = open(PROGRAM);
    session.all_diagnostics(file).unwrap();

    session.edit(file, &[TextEdit::insert(0, "\n\n")]).unwrap();
    session.reset_stats();
    let diags = session.all_diagnostics(file).unwrap();
    assert!(diags.is_empty(), "{diags:?}");

    let stats = session.stats();
    assert_eq!(stats.executions(UntypedItemQuery::KIND), 0);
    assert_eq!(stats.executions(InferItemQuery::KIND), 0);
    assert_eq!(stats.executions(InitAnalysisQuery::KIND), 0);
}

#[test]
fn body_edit_recomputes_only_that_item() {
    let (session, file) = open(PROGRAM);
    session.all_diagnostics(file).unwrap();

    let at = PROGRAM.find("n * 2").unwrap();
    session.edit(file, &[TextEdit::new(at..at + 5, "n + n")]).unwrap();
    session.reset_stats();
    session.all_diagnostics(file).unwrap();

    let stats = session.stats();
    assert_eq!(stats.executions(UntypedItemQuery::KIND), 1);
    assert_eq!(stats.executions(InferItemQuery::KIND), 1);
    // The signature of `double` did not change, so callers are reused.
    assert_eq!(stats.executions(SignatureQuery::KIND), 1);
    assert!(stats.cutoffs >= 1);
}

#[test]
fn signature_change_reaches_callers() {
    let (session, file) = open(PROGRAM);
    assert!(session.all_diagnostics(file).unwrap().is_empty());

    let at = PROGRAM.find("-> Int { return n").unwrap();
    let edit = TextEdit::new(at..at + "-> Int".len(), "-> Bool");
    session.edit(file, &[edit]).unwrap();

    let diags = session.all_diagnostics(file).unwrap();
    let text = session.source(file).unwrap();
    assert_eq!(diags.as_ref(), &fresh_diagnostics(&text));
    assert!(!diags.is_empty());
}

#[test]
fn edits_and_fresh_sessions_agree() {
    let steps: &[(&str, &str)] = &[
        ("out = 0;", "out = true;"),
        ("out = true;", ""),
        ("print(total);", "print(missing);"),
        ("print(missing);", "print(total);"),
        ("let out;", "let out = 5;"),
    ];
    let (session, file) = open(PROGRAM);
    session.all_diagnostics(file).unwrap();
    for (from, to) in steps {
        let text = session.source(file).unwrap();
        let at = text
            .find(from)
            .unwrap_or_else(|| panic!("`{from}` not found in:\n{text}"));
        session
            .edit(file, &[TextEdit::new(at..at + from.len(), *to)])
            .unwrap();
        let text = session.source(file).unwrap();
        assert_eq!(
            session.all_diagnostics(file).unwrap().as_ref(),
            &fresh_diagnostics(&text),
            "after replacing `{from}` with `{to}`"
        );
    }
}

#[test]
fn adding_a_declaration_resolves_earlier_errors() {
    let (session, file) = open("let v = helper(1);");
    let diags = session.all_diagnostics(file).unwrap();
    assert_eq!(diags.len(), 1);

    let len = session.source(file).unwrap().len();
    session
        .edit(file, &[TextEdit::insert(len, "\nfn helper(a: Int) -> Int { return a; }")])
        .unwrap();
    assert!(session.all_diagnostics(file).unwrap().is_empty());
}

#[test]
fn parallel_and_sequential_checks_agree() {
    let sources = [
        PROGRAM,
        "let x; print(x);",
        "let a = 1; let b = a + true;",
        "type T = T;\nfn f(t: T) {}",
        "fn f() {}\nfn f() {}",
    ];
    let run = |parallel: bool| -> Vec<Vec<Diagnostic>> {
        let session = Session::new(SessionConfig {
            parallel,
            jobs: Some(3),
            ..SessionConfig::default()
        })
        .unwrap();
        for (i, text) in sources.iter().enumerate() {
            session.open_file(format!("f{i}.em"), *text);
        }
        let all: BTreeMap<FileId, _> = session.check_all().unwrap();
        all.into_values().map(|d| d.as_ref().clone()).collect()
    };
    assert_eq!(run(true), run(false));
}

#[test]
fn edits_in_one_file_leave_others_cached() {
    let session = Session::default();
    let a = session.open_file("a.em", PROGRAM);
    let b = session.open_file("b.em", "let y = 2; print(y);");
    session.check_all().unwrap();

    session.edit(a, &[TextEdit::insert(0, "let z = 0;\n")]).unwrap();
    session.reset_stats();
    session.all_diagnostics(b).unwrap();
    assert_eq!(session.stats().total_executions(), 0);
}

#[test]
fn cyclic_alias_dependents_stay_cached() {
    let (session, file) = open("type T = T;\nfn f(t: T) { let a = 1; }");
    let first = session.all_diagnostics(file).unwrap();
    assert_eq!(first.len(), 1);

    session.reset_stats();
    let second = session.all_diagnostics(file).unwrap();
    assert_eq!(first, second);
    assert_eq!(session.stats().total_executions(), 0);

    let f = session.find_item(file, "f").unwrap().unwrap();
    let db = session.database();
    assert!(db.is_memoized(&QueryKey::new(InferItemQuery::KIND, f)));
    assert!(db.is_memoized(&QueryKey::new(SignatureQuery::KIND, f)));
    assert!(db.is_memoized(&QueryKey::new(AllDiagnosticsQuery::KIND, file)));
}

#[test]
fn cyclic_alias_dependents_survive_unrelated_edits() {
    let (session, file) = open("type T = T;\nfn f(t: T) { let a = 1; }\nlet z = 2;");
    session.all_diagnostics(file).unwrap();

    let at = session.source(file).unwrap().find("z = 2").unwrap();
    session.edit(file, &[TextEdit::new(at + 4..at + 5, "3")]).unwrap();
    session.reset_stats();
    let diags = session.all_diagnostics(file).unwrap();
    let text = session.source(file).unwrap();
    assert_eq!(diags.as_ref(), &fresh_diagnostics(&text));
    assert_eq!(session.stats().executions(InferItemQuery::KIND), 1);
}

#[test]
fn long_alias_chain_resolves() {
    const LINKS: usize = 3000;
    let mut text = String::new();
    for i in 0..LINKS - 1 {
        text.push_str(&format!("type A{i} = A{};\n", i + 1));
    }
    text.push_str(&format!("type A{} = Int;\n", LINKS - 1));
    text.push_str("fn f(x: A0) -> A0 { return x; }\n");

    let (session, file) = open(&text);
    let diags = session.all_diagnostics(file).unwrap();
    assert!(diags.is_empty(), "{diags:?}");
    let f = session.find_item(file, "f").unwrap().unwrap();
    let signature = session.database().query::<SignatureQuery>(&f).unwrap();
    assert_eq!(signature.ty, Type::func(vec![Type::Int], Type::Int));

    // Retargeting the last link reaches the head of the chain.
    let at = text.rfind("= Int;").unwrap();
    session.edit(file, &[TextEdit::new(at + 2..at + 5, "Bool")]).unwrap();
    let signature = session.database().query::<SignatureQuery>(&f).unwrap();
    assert_eq!(signature.ty, Type::func(vec![Type::Bool], Type::Bool));
    assert!(session.all_diagnostics(file).unwrap().is_empty());
}

#[test]
fn long_alias_cycle_is_reported_on_every_member() {
    const LINKS: usize = 300;
    let mut text = String::new();
    for i in 0..LINKS {
        text.push_str(&format!("type A{i} = A{};\n", (i + 1) % LINKS));
    }
    text.push_str("type Outside = A0;\nfn f(x: Outside) {}\n");
    let (session, file) = open(&text);
    let diags = session.all_diagnostics(file).unwrap();
    assert_eq!(diags.len(), LINKS);
    assert!(diags.iter().all(|d| d.kind == DiagKind::CycleDetected));
}

#[test]
fn concurrent_edits_commit_in_store_order() {
    const WRITERS: usize = 4;
    const EDITS: usize = 25;
    let (session, file) = open("let n = 0;\n");
    thread::scope(|s| {
        for writer in 0..WRITERS {
            let session = &session;
            s.spawn(move || {
                for i in 0..EDITS {
                    let line = format!("let v{writer}_{i} = {i};\n");
                    session.edit(file, &[TextEdit::insert(0, line)]).unwrap();
                }
            });
        }
    });

    let text = session.source(file).unwrap();
    assert_eq!(text.lines().count(), WRITERS * EDITS + 1);
    let committed = session.database().input::<SourceTextInput>(&file).unwrap();
    assert_eq!(committed, text);
    assert_eq!(session.all_diagnostics(file).unwrap().as_ref(), &fresh_diagnostics(&text));
}

#[test]
fn other_files_supply_missing_names() {
    let session = Session::default();
    let a = session.open_file("a.em", "let v = helper(1) + 1;\nprint(v);");
    let b = session.open_file("b.em", "fn helper(n: Int) -> Bool { return true; }");
    assert_eq!(session.all_diagnostics(a).unwrap().len(), 1);

    let at = session.source(b).unwrap().find("Bool").unwrap();
    session.edit(b, &[TextEdit::new(at..at + 4, "Int")]).unwrap();
    let at = session.source(b).unwrap().find("true").unwrap();
    session.edit(b, &[TextEdit::new(at..at + 4, "n")]).unwrap();
    assert!(session.all_diagnostics(a).unwrap().is_empty());
    assert!(session.all_diagnostics(b).unwrap().is_empty());
}
