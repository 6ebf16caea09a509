// queries.rs — Front-end query catalogue
//
// Declares every query family of the Ember front end and registers it with
// the engine. Each family is a zero-sized type naming its kind tag, its
// argument and value types, and the function that computes it. Values are
// reference-counted so reads clone cheaply.
//
// Per-file queries (parse, item_tree, item_spans, item_syntaxes,
// module_scope, diagnostics) sit above per-item queries (item_syntax,
// untyped_item, signature, infer_item, init_analysis). Only per-file queries
// see byte offsets of items, so editing one item leaves every other item's
// per-item queries valid through early cutoff. `item_by_name` is the one query that reads
// every open file; name lookups reach it only when a file-local lookup
// misses.
//
// Preconditions: `source_files` lists the open files and `source_text` is
//   set for every file that is queried.
// Postconditions: diagnostics of a file are sorted by span, then code.
// Failure modes: engine errors propagate; a cyclic alias is turned into a
//   CycleDetected diagnostic by `diagnostics`.
// Side effects: none.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::ast::Span;
use crate::diag::{shift, sort_diagnostics, DiagKind, Diagnostic};
use crate::hir::{collect_items, lower_item, DeclKind, ItemEntry, ItemSyntax, UntypedItem};
use crate::id::{FileId, FunctionId, ItemId, ItemRef, NodeId};
use crate::init_check::{init_analysis, initialization_diagnostics, InitAnalysis};
use crate::parser::{parse, ParseResult};
use crate::query::{Database, Input, Query, QueryError, QueryKey, QueryKind, QueryResult};
use crate::resolve::{build_module_scope, item_by_name, resolve_name, ItemName, ModuleScope, NameKey, Resolution};
use crate::thir::{typed_graph, TypedGraph};
use crate::type_infer::{alias_target, infer_item, signature, type_of, AliasTarget, Inference, Signature};
use crate::types::Type;

// ── Inputs ──────────────────────────────────────────────────────────────────

/// Current text of a file.
pub struct SourceTextInput;

impl Input for SourceTextInput {
    const KIND: QueryKind = QueryKind("source_text");
    type Key = FileId;
    type Value = Arc<str>;
}

/// Every open file, in the order the files were opened.
pub struct SourceFilesInput;

impl Input for SourceFilesInput {
    const KIND: QueryKind = QueryKind("source_files");
    type Key = ();
    type Value = Arc<[FileId]>;
}

// ── Derived queries ─────────────────────────────────────────────────────────

macro_rules! define_query {
    ($(#[$meta:meta])* $name:ident, $kind:literal, $key:ty => $value:ty, $exec:expr) => {
        $(#[$meta])*
        pub struct $name;

        impl Query for $name {
            const KIND: QueryKind = QueryKind($kind);
            type Key = $key;
            type Value = $value;

            fn execute(db: &Database, key: &$key) -> QueryResult<$value> {
                let exec: fn(&Database, &$key) -> QueryResult<$value> = $exec;
                exec(db, key)
            }
        }
    };
}

define_query!(
    /// Syntax tree and syntax errors of a file.
    ParseQuery, "parse", FileId => Arc<ParseResult>,
    |db, file| {
        let text = db.input::<SourceTextInput>(file)?;
        Ok(Arc::new(parse(&text)))
    }
);

define_query!(
    /// Span-free list of a file's items in source order.
    ItemTreeQuery, "item_tree", FileId => Arc<Vec<ItemEntry>>,
    |db, file| {
        let parsed = db.query::<ParseQuery>(file)?;
        Ok(Arc::new(collect_items(&parsed.program).iter().map(|s| s.entry()).collect()))
    }
);

define_query!(
    /// Absolute byte range of every item of a file.
    ItemSpansQuery, "item_spans", FileId => Arc<BTreeMap<ItemId, Span>>,
    |db, file| {
        let parsed = db.query::<ParseQuery>(file)?;
        Ok(Arc::new(collect_items(&parsed.program).iter().map(|s| (s.id, s.span())).collect()))
    }
);

define_query!(
    /// Every item's syntax in a file, keyed by identity.
    ItemSyntaxesQuery, "item_syntaxes", FileId => Arc<BTreeMap<ItemId, Arc<ItemSyntax>>>,
    |db, file| {
        let parsed = db.query::<ParseQuery>(file)?;
        Ok(Arc::new(
            collect_items(&parsed.program)
                .iter()
                .map(|s| (s.id, Arc::new(s.to_syntax())))
                .collect(),
        ))
    }
);

define_query!(
    /// One item's syntax with item-relative spans.
    ItemSyntaxQuery, "item_syntax", ItemRef => Arc<ItemSyntax>,
    |db, item| {
        let syntaxes = db.query::<ItemSyntaxesQuery>(&item.file)?;
        syntaxes
            .get(&item.item)
            .cloned()
            .ok_or_else(|| missing_item(*item))
    }
);

define_query!(
    UntypedItemQuery, "untyped_item", ItemRef => Arc<UntypedItem>,
    |db, item| {
        let syntax = db.query::<ItemSyntaxQuery>(item)?;
        Ok(Arc::new(lower_item(&syntax)))
    }
);

define_query!(
    ModuleScopeQuery, "module_scope", FileId => Arc<ModuleScope>,
    |db, file| {
        let tree = db.query::<ItemTreeQuery>(file)?;
        Ok(Arc::new(build_module_scope(*file, &tree)))
    }
);

define_query!(
    /// One name lookup, memoized per scope.
    ResolveNameQuery, "resolve_name", NameKey => Option<Resolution>,
    resolve_name
);

define_query!(
    /// First module-level item with a given name across all open files.
    ItemByNameQuery, "item_by_name", ItemName => Option<ItemRef>,
    item_by_name
);

define_query!(
    SignatureQuery, "signature", ItemRef => Arc<Signature>,
    |db, item| signature(db, item).map(Arc::new)
);

define_query!(
    AliasTargetQuery, "alias_target", ItemRef => Arc<AliasTarget>,
    |db, item| alias_target(db, item).map(Arc::new)
);

define_query!(
    InferItemQuery, "infer_item", ItemRef => Arc<Inference>,
    |db, item| infer_item(db, item).map(Arc::new)
);

define_query!(
    /// Resolved type of one node.
    TypeOfQuery, "type_of", NodeId => Type,
    type_of
);

define_query!(
    /// Syntax, resolution and type diagnostics of a file.
    DiagnosticsQuery, "diagnostics", FileId => Arc<Vec<Diagnostic>>,
    |db, file| file_diagnostics(db, file).map(Arc::new)
);

define_query!(
    InitAnalysisQuery, "init_analysis", FunctionId => Arc<InitAnalysis>,
    |db, function| init_analysis(db, function).map(Arc::new)
);

define_query!(
    /// Uninitialized-use diagnostics of one function, in file coordinates.
    InitializationDiagnosticsQuery, "initialization_diagnostics", FunctionId => Arc<Vec<Diagnostic>>,
    |db, function| initialization_diagnostics(db, function).map(Arc::new)
);

define_query!(
    TypedGraphQuery, "typed_graph", FileId => Arc<TypedGraph>,
    |db, file| typed_graph(db, file).map(Arc::new)
);

define_query!(
    /// Type diagnostics plus initialization diagnostics of every function.
    AllDiagnosticsQuery, "all_diagnostics", FileId => Arc<Vec<Diagnostic>>,
    |db, file| all_diagnostics(db, file).map(Arc::new)
);

/// Register every front-end query family.
pub fn register(db: &mut Database) {
    db.register_input::<SourceTextInput>();
    db.register_input::<SourceFilesInput>();
    db.register::<ParseQuery>();
    db.register::<ItemTreeQuery>();
    db.register::<ItemSpansQuery>();
    db.register::<ItemSyntaxesQuery>();
    db.register::<ItemSyntaxQuery>();
    db.register::<UntypedItemQuery>();
    db.register::<ModuleScopeQuery>();
    db.register::<ResolveNameQuery>();
    db.register::<ItemByNameQuery>();
    db.register::<SignatureQuery>();
    db.register::<AliasTargetQuery>();
    db.register::<InferItemQuery>();
    db.register::<TypeOfQuery>();
    db.register::<DiagnosticsQuery>();
    db.register::<InitAnalysisQuery>();
    db.register::<InitializationDiagnosticsQuery>();
    db.register::<TypedGraphQuery>();
    db.register::<AllDiagnosticsQuery>();
}

fn missing_item(item: ItemRef) -> QueryError {
    QueryError::diagnostic(Diagnostic::error(
        DiagKind::UnresolvedName,
        item.file,
        (0..0).into(),
        format!("item {} does not exist in {}", item.item, item.file),
    ))
}

// ── File diagnostics ────────────────────────────────────────────────────────

/// Offset of an item's start within its file.
fn item_offset(spans: &BTreeMap<ItemId, Span>, item: ItemId) -> usize {
    spans.get(&item).map_or(0, |span| span.start)
}

/// An item's name span in file coordinates.
fn name_span(db: &Database, spans: &BTreeMap<ItemId, Span>, item: ItemRef) -> QueryResult<Span> {
    let syntax = db.query::<ItemSyntaxQuery>(&item)?;
    Ok(shift(syntax.name_span, item_offset(spans, item.item)))
}

/// Whether `alias` itself sits on the cycle (rather than merely reaching it).
fn on_cycle(path: &[QueryKey], alias: ItemRef) -> bool {
    path.iter()
        .any(|key| key.kind() == AliasTargetQuery::KIND && key.arg::<ItemRef>() == Some(&alias))
}

fn file_diagnostics(db: &Database, file: &FileId) -> QueryResult<Vec<Diagnostic>> {
    let parsed = db.query::<ParseQuery>(file)?;
    let tree = db.query::<ItemTreeQuery>(file)?;
    let spans = db.query::<ItemSpansQuery>(file)?;
    let module = db.query::<ModuleScopeQuery>(file)?;

    let mut out: Vec<Diagnostic> = parsed
        .errors
        .iter()
        .map(|e| Diagnostic::error(DiagKind::SyntaxError, *file, e.span, e.message.clone()))
        .collect();

    for duplicate in &module.duplicates {
        let at = name_span(db, &spans, duplicate.item)?;
        let first = name_span(db, &spans, duplicate.first)?;
        out.push(
            Diagnostic::error(
                DiagKind::DuplicateDefinition,
                *file,
                at,
                format!("the name `{}` is defined multiple times", duplicate.name),
            )
            .with_related(first, format!("previous definition of `{}` here", duplicate.name))
            .with_hint("later definitions are ignored; rename or remove this one"),
        );
    }

    for entry in tree.iter() {
        let item = ItemRef::new(*file, entry.id);
        let offset = item_offset(&spans, entry.id);
        let rebased = |diags: &[Diagnostic]| diags.iter().cloned().map(|d| d.rebase(offset)).collect::<Vec<_>>();
        let result = match entry.kind {
            DeclKind::Alias => db.query::<AliasTargetQuery>(&item).map(|t| rebased(&t.diagnostics[..])),
            DeclKind::Function | DeclKind::TopLevel => db.query::<SignatureQuery>(&item).and_then(|sig| {
                let inference = db.query::<InferItemQuery>(&item)?;
                let mut diags = rebased(&sig.diagnostics[..]);
                diags.extend(rebased(&inference.diagnostics[..]));
                Ok(diags)
            }),
        };
        match result {
            Ok(diags) => out.extend(diags),
            Err(QueryError::Cycle(cycle)) => {
                if entry.kind == DeclKind::Alias && !on_cycle(&cycle.path, item) {
                    continue;
                }
                out.push(cycle_diagnostic(db, &spans, item, entry)?);
            }
            Err(err) => return Err(err),
        }
    }

    sort_diagnostics(&mut out);
    Ok(out)
}

fn cycle_diagnostic(
    db: &Database,
    spans: &BTreeMap<ItemId, Span>,
    item: ItemRef,
    entry: &ItemEntry,
) -> QueryResult<Diagnostic> {
    let at = name_span(db, spans, item)?;
    let message = match entry.kind {
        DeclKind::Alias => format!("type alias `{}` refers to itself", entry.name),
        _ => format!("`{}` depends on itself", entry.name),
    };
    Ok(Diagnostic::error(DiagKind::CycleDetected, item.file, at, message)
        .with_hint("a type alias must eventually name a builtin type"))
}

fn all_diagnostics(db: &Database, file: &FileId) -> QueryResult<Vec<Diagnostic>> {
    let mut out = db.query::<DiagnosticsQuery>(file)?.as_ref().clone();
    let tree = db.query::<ItemTreeQuery>(file)?;
    for entry in tree.iter().filter(|e| e.kind.has_body()) {
        let function = ItemRef::new(*file, entry.id);
        out.extend(db.query::<InitializationDiagnosticsQuery>(&function)?.iter().cloned());
    }
    sort_diagnostics(&mut out);
    Ok(out)
}

/// A database with every query registered and `sources` loaded as files
/// 0, 1, ...
#[cfg(test)]
pub(crate) fn test_db(sources: &[&str]) -> (Database, Vec<FileId>) {
    let mut db = Database::new();
    register(&mut db);
    let files: Vec<FileId> = (0..sources.len()).map(|i| FileId(i as u32)).collect();
    db.commit(|batch| {
        for (file, text) in files.iter().zip(sources) {
            batch.set_input::<SourceTextInput>(*file, Arc::from(*text));
        }
        batch.set_input::<SourceFilesInput>((), Arc::from(files.as_slice()));
    });
    (db, files)
}
