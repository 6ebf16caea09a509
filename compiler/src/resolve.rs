// resolve.rs — Name resolution for Ember
//
// Builds each file's module scope from its item tree and answers single
// name lookups as `resolve_name` queries, one per (scope, name, namespace).
// A local lookup that misses asks the parent scope's query, and the item's
// root scope asks the module scope, so each lookup depends only on the
// scopes it actually walked through. The module scope falls back to the
// builtins, and a name no file-local scope or builtin defines is looked up
// among the items of every open file.
//
// Preconditions: scopes named by `ScopeRef::Local` exist in the item's
//   untyped graph.
// Postconditions: a lookup returns the innermost visible declaration;
//   duplicate module-level names resolve to their first definition.
// Failure modes: unknown names resolve to `None` (callers report them);
//   engine errors from nested queries propagate.
// Side effects: none.

use std::collections::BTreeMap;
use std::fmt;

use crate::hir::{DeclKind, ItemEntry};
use crate::id::{FileId, ItemRef, NodeId, ScopeIdx};
use crate::query::{Database, QueryResult};
use crate::queries::{ItemByNameQuery, ModuleScopeQuery, ResolveNameQuery, SourceFilesInput, UntypedItemQuery};
use crate::types::Type;

// ── Public types ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Namespace {
    Value,
    Type,
}

/// Where a lookup starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ScopeRef {
    Module(FileId),
    Local(ItemRef, ScopeIdx),
}

/// Argument of the `resolve_name` query.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct NameKey {
    pub scope: ScopeRef,
    pub name: String,
    pub namespace: Namespace,
}

impl NameKey {
    pub fn value(scope: ScopeRef, name: impl Into<String>) -> Self {
        Self {
            scope,
            name: name.into(),
            namespace: Namespace::Value,
        }
    }

    pub fn ty(file: FileId, name: impl Into<String>) -> Self {
        Self {
            scope: ScopeRef::Module(file),
            name: name.into(),
            namespace: Namespace::Type,
        }
    }
}

/// Argument of the cross-file `item_by_name` query.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ItemName {
    pub namespace: Namespace,
    pub name: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Builtin {
    Print,
}

impl fmt::Display for Builtin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Builtin::Print => f.write_str("print"),
        }
    }
}

/// What a name refers to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// A `let` or parameter declaration.
    Local(NodeId),
    Function(ItemRef),
    Alias(ItemRef),
    BuiltinType(Type),
    BuiltinFn(Builtin),
}

/// Module-level names of one file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ModuleScope {
    pub values: BTreeMap<String, ItemRef>,
    pub types: BTreeMap<String, ItemRef>,
    pub duplicates: Vec<Duplicate>,
}

/// A module-level name defined more than once. `first` keeps the name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Duplicate {
    pub name: String,
    pub item: ItemRef,
    pub first: ItemRef,
}

// ── Module scope ────────────────────────────────────────────────────────────

/// Collect a file's functions (value namespace) and type aliases (type
/// namespace). The top-level body declares no module names.
pub fn build_module_scope(file: FileId, entries: &[ItemEntry]) -> ModuleScope {
    let mut scope = ModuleScope::default();
    for entry in entries {
        let item = ItemRef::new(file, entry.id);
        let table = match entry.kind {
            DeclKind::Function => &mut scope.values,
            DeclKind::Alias => &mut scope.types,
            DeclKind::TopLevel => continue,
        };
        match table.get(&entry.name) {
            Some(&first) => scope.duplicates.push(Duplicate {
                name: entry.name.clone(),
                item,
                first,
            }),
            None => {
                table.insert(entry.name.clone(), item);
            }
        }
    }
    scope
}

// ── Lookup ──────────────────────────────────────────────────────────────────

/// Resolve one name starting at `key.scope`.
pub fn resolve_name(db: &Database, key: &NameKey) -> QueryResult<Option<Resolution>> {
    match key.scope {
        // Types are only declared at module level.
        ScopeRef::Local(item, _) if key.namespace == Namespace::Type => db.query::<ResolveNameQuery>(&NameKey {
            scope: ScopeRef::Module(item.file),
            ..key.clone()
        }),
        ScopeRef::Local(item, scope) => {
            let untyped = db.query::<UntypedItemQuery>(&item)?;
            if let Some(local) = untyped.binding_in(scope, &key.name) {
                return Ok(Some(Resolution::Local(item.node(local))));
            }
            let next = match untyped.scope_parent(scope) {
                Some(parent) => ScopeRef::Local(item, parent),
                None => ScopeRef::Module(item.file),
            };
            db.query::<ResolveNameQuery>(&NameKey {
                scope: next,
                ..key.clone()
            })
        }
        ScopeRef::Module(file) => {
            let module = db.query::<ModuleScopeQuery>(&file)?;
            if let Some(found) = lookup_module(&module, key) {
                return Ok(Some(found));
            }
            let elsewhere = db.query::<ItemByNameQuery>(&ItemName {
                namespace: key.namespace,
                name: key.name.clone(),
            })?;
            Ok(elsewhere.map(|item| match key.namespace {
                Namespace::Value => Resolution::Function(item),
                Namespace::Type => Resolution::Alias(item),
            }))
        }
    }
}

/// First module-level item named `key.name` in any open file, scanning files
/// in the order they were opened.
pub fn item_by_name(db: &Database, key: &ItemName) -> QueryResult<Option<ItemRef>> {
    let files = db.input::<SourceFilesInput>(&())?;
    for file in files.iter() {
        let module = db.query::<ModuleScopeQuery>(file)?;
        let table = match key.namespace {
            Namespace::Value => &module.values,
            Namespace::Type => &module.types,
        };
        if let Some(&item) = table.get(&key.name) {
            return Ok(Some(item));
        }
    }
    Ok(None)
}

fn lookup_module(module: &ModuleScope, key: &NameKey) -> Option<Resolution> {
    match key.namespace {
        Namespace::Value => module
            .values
            .get(&key.name)
            .map(|&item| Resolution::Function(item))
            .or_else(|| builtin_fn(&key.name).map(Resolution::BuiltinFn)),
        Namespace::Type => module
            .types
            .get(&key.name)
            .map(|&item| Resolution::Alias(item))
            .or_else(|| Type::builtin(&key.name).map(Resolution::BuiltinType)),
    }
}

fn builtin_fn(name: &str) -> Option<Builtin> {
    match name {
        "print" => Some(Builtin::Print),
        _ => None,
    }
}
