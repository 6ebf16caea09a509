// session.rs — Compilation session: sources, edits and query entry points
//
// Owns the query database and the source store for one editing session.
// Opening a file or editing it commits one revision; every read afterwards
// goes through the database, so only work the edit actually invalidated is
// redone. Edits report which untyped nodes they dirtied directly: the
// innermost pre-edit node covering each changed range, plus the roots of
// items the edit added or removed.
//
// The source store lock is held from applying a change until its revision
// is committed, so the store and the database see edits in the same order.
//
// Preconditions: none.
// Postconditions: after `open_file`/`edit`/`set_text` return, every query
//   observes the new text.
// Failure modes: `SessionError` wraps source-store and engine errors.
// Side effects: memos beyond `cache_capacity` are evicted after each edit.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;
use thiserror::Error;
use tracing::{debug, info};

use crate::config::SessionConfig;
use crate::diag::Diagnostic;
use crate::hir::{ItemEntry, UntypedItem};
use crate::id::{FileId, FunctionId, ItemId, ItemRef, NodeId};
use crate::init_check::InitAnalysis;
use crate::parser::ParseResult;
use crate::queries::{
    self, AllDiagnosticsQuery, DiagnosticsQuery, InitAnalysisQuery, InitializationDiagnosticsQuery,
    ItemByNameQuery, ItemSpansQuery, ItemTreeQuery, ParseQuery, SourceFilesInput, SourceTextInput,
    TypeOfQuery, TypedGraphQuery, UntypedItemQuery,
};
use crate::query::{Database, QueryError, QueryStats, Revision};
use crate::resolve::{ItemName, Namespace};
use crate::source::{ChangedRange, SourceError, SourceStore, TextEdit};
use crate::thir::{TypedGraph, TypedNode};
use crate::types::Type;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error(transparent)]
    Source(#[from] SourceError),
    #[error(transparent)]
    Query(#[from] QueryError),
    #[error("cannot build worker pool: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),
}

pub type SessionResult<T> = Result<T, SessionError>;

/// What one committed edit did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EditOutcome {
    pub revision: Revision,
    pub changed_ranges: Vec<ChangedRange>,
    /// Directly dirtied nodes, sorted and de-duplicated.
    pub dirtied: Vec<NodeId>,
}

pub struct Session {
    db: Database,
    sources: Mutex<SourceStore>,
    config: SessionConfig,
    pool: Option<rayon::ThreadPool>,
}

impl Default for Session {
    fn default() -> Self {
        Self::with_pool(SessionConfig::default(), None)
    }
}

impl Session {
    pub fn new(config: SessionConfig) -> SessionResult<Self> {
        let pool = match config.jobs {
            Some(jobs) => Some(rayon::ThreadPoolBuilder::new().num_threads(jobs).build()?),
            None => None,
        };
        Ok(Self::with_pool(config, pool))
    }

    fn with_pool(config: SessionConfig, pool: Option<rayon::ThreadPool>) -> Self {
        let mut db = Database::new();
        queries::register(&mut db);
        Self {
            db,
            sources: Mutex::new(SourceStore::new()),
            config,
            pool,
        }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    pub fn revision(&self) -> Revision {
        self.db.revision()
    }

    // ── Sources ──

    pub fn open_file(&self, name: impl Into<String>, text: impl Into<Arc<str>>) -> FileId {
        let name = name.into();
        let text: Arc<str> = text.into();
        let mut sources = self.sources.lock();
        let file = sources.add(name.clone(), text.clone());
        let files: Arc<[FileId]> = sources.files().collect();
        let revision = self.db.commit(|batch| {
            batch.set_input::<SourceTextInput>(file, text);
            batch.set_input::<SourceFilesInput>((), files);
        });
        drop(sources);
        info!(%file, name = %name, %revision, "opened file");
        self.enforce_capacity();
        file
    }

    pub fn files(&self) -> Vec<FileId> {
        self.sources.lock().files().collect()
    }

    pub fn file_name(&self, file: FileId) -> Option<String> {
        self.sources.lock().name(file).map(str::to_string)
    }

    pub fn find_file(&self, name: &str) -> Option<FileId> {
        self.sources.lock().find(name)
    }

    pub fn source(&self, file: FileId) -> SessionResult<Arc<str>> {
        Ok(self.sources.lock().text(file)?)
    }

    /// Apply a batch of edits to one file and commit it as one revision.
    pub fn edit(&self, file: FileId, edits: &[TextEdit]) -> SessionResult<EditOutcome> {
        let mut sources = self.sources.lock();
        let before = sources.text(file)?;
        let (_, changes) = crate::source::apply_edits(&before, edits)?;
        let directly = self.covering_nodes(file, &changes)?;
        sources.apply(file, edits)?;
        let after = sources.text(file)?;
        self.commit_text(file, after, changes, directly)
    }

    /// Replace a file's whole text.
    pub fn set_text(&self, file: FileId, text: impl Into<Arc<str>>) -> SessionResult<EditOutcome> {
        let text: Arc<str> = text.into();
        let mut sources = self.sources.lock();
        let before = sources.text(file)?;
        let changes: Vec<ChangedRange> = crate::source::diff_ranges(&before, &text).into_iter().collect();
        let directly = self.covering_nodes(file, &changes)?;
        sources.replace(file, text.clone())?;
        self.commit_text(file, text, changes, directly)
    }

    fn commit_text(
        &self,
        file: FileId,
        text: Arc<str>,
        changed_ranges: Vec<ChangedRange>,
        directly: BTreeSet<NodeId>,
    ) -> SessionResult<EditOutcome> {
        let old_tree = self.db.query::<ItemTreeQuery>(&file)?;
        let revision = self.db.commit(|batch| {
            batch.set_input::<SourceTextInput>(file, text);
        });
        let new_tree = self.db.query::<ItemTreeQuery>(&file)?;

        let mut dirtied = directly;
        let old_ids: BTreeSet<ItemId> = old_tree.iter().map(|e| e.id).collect();
        let new_ids: BTreeSet<ItemId> = new_tree.iter().map(|e| e.id).collect();
        for id in old_ids.symmetric_difference(&new_ids) {
            dirtied.insert(ItemRef::new(file, *id).node(UntypedItem::ROOT));
        }
        let dirtied: Vec<NodeId> = dirtied.into_iter().collect();
        info!(%file, %revision, ranges = changed_ranges.len(), dirtied = dirtied.len(), "committed edit");
        self.enforce_capacity();
        Ok(EditOutcome {
            revision,
            changed_ranges,
            dirtied,
        })
    }

    /// Innermost pre-edit node covering each changed range. A range that no
    /// single item covers dirties the root of every item it touches.
    fn covering_nodes(&self, file: FileId, changes: &[ChangedRange]) -> SessionResult<BTreeSet<NodeId>> {
        let spans = self.db.query::<ItemSpansQuery>(&file)?;
        let mut out = BTreeSet::new();
        for change in changes {
            let range = &change.old;
            let covering = spans
                .iter()
                .filter(|(_, span)| span.start <= range.start && range.end <= span.end)
                .min_by_key(|(_, span)| span.end - span.start);
            match covering {
                Some((&id, span)) => {
                    let item = ItemRef::new(file, id);
                    let untyped = self.db.query::<UntypedItemQuery>(&item)?;
                    let offset = span.start;
                    if let Some(local) = untyped.innermost_covering(range.start - offset, range.end - offset) {
                        out.insert(item.node(local));
                    }
                }
                None => {
                    for (&id, span) in spans.iter() {
                        if span.start < range.end && range.start < span.end {
                            out.insert(ItemRef::new(file, id).node(UntypedItem::ROOT));
                        }
                    }
                }
            }
        }
        Ok(out)
    }

    fn enforce_capacity(&self) {
        if let Some(capacity) = self.config.cache_capacity {
            let evicted = self.db.evict_lru(capacity);
            if evicted > 0 {
                debug!(evicted, capacity, "cache capacity enforced");
            }
        }
    }

    // ── Queries ──

    pub fn parse(&self, file: FileId) -> SessionResult<Arc<ParseResult>> {
        Ok(self.db.query::<ParseQuery>(&file)?)
    }

    pub fn items(&self, file: FileId) -> SessionResult<Arc<Vec<ItemEntry>>> {
        Ok(self.db.query::<ItemTreeQuery>(&file)?)
    }

    /// Items with a body: every `fn` and the top-level body, in source order.
    pub fn functions(&self, file: FileId) -> SessionResult<Vec<(ItemEntry, FunctionId)>> {
        Ok(self
            .items(file)?
            .iter()
            .filter(|e| e.kind.has_body())
            .map(|e| (e.clone(), ItemRef::new(file, e.id)))
            .collect())
    }

    /// First item named `name` (functions and aliases share no names with the
    /// top-level body, which is named `<top>`).
    pub fn find_item(&self, file: FileId, name: &str) -> SessionResult<Option<ItemRef>> {
        Ok(self
            .items(file)?
            .iter()
            .find(|e| e.name == name)
            .map(|e| ItemRef::new(file, e.id)))
    }

    /// First item named `name` in `namespace` across every open file.
    pub fn lookup_item(&self, namespace: Namespace, name: &str) -> SessionResult<Option<ItemRef>> {
        Ok(self.db.query::<ItemByNameQuery>(&ItemName {
            namespace,
            name: name.to_string(),
        })?)
    }

    pub fn untyped_item(&self, item: ItemRef) -> SessionResult<Arc<UntypedItem>> {
        Ok(self.db.query::<UntypedItemQuery>(&item)?)
    }

    pub fn type_of(&self, node: NodeId) -> SessionResult<Type> {
        Ok(self.db.query::<TypeOfQuery>(&node)?)
    }

    pub fn typed_graph(&self, file: FileId) -> SessionResult<Arc<TypedGraph>> {
        Ok(self.db.query::<TypedGraphQuery>(&file)?)
    }

    /// The innermost typed node at byte `offset` of `file`.
    pub fn node_at(&self, file: FileId, offset: usize) -> SessionResult<Option<TypedNode>> {
        Ok(self.typed_graph(file)?.node_at(offset).cloned())
    }

    pub fn diagnostics(&self, file: FileId) -> SessionResult<Arc<Vec<Diagnostic>>> {
        Ok(self.db.query::<DiagnosticsQuery>(&file)?)
    }

    pub fn init_analysis(&self, function: FunctionId) -> SessionResult<Arc<InitAnalysis>> {
        Ok(self.db.query::<InitAnalysisQuery>(&function)?)
    }

    pub fn initialization_diagnostics(&self, function: FunctionId) -> SessionResult<Arc<Vec<Diagnostic>>> {
        Ok(self.db.query::<InitializationDiagnosticsQuery>(&function)?)
    }

    pub fn all_diagnostics(&self, file: FileId) -> SessionResult<Arc<Vec<Diagnostic>>> {
        Ok(self.db.query::<AllDiagnosticsQuery>(&file)?)
    }

    /// All diagnostics of every open file, in parallel when configured.
    pub fn check_all(&self) -> SessionResult<BTreeMap<FileId, Arc<Vec<Diagnostic>>>> {
        let files = self.files();
        let start = Instant::now();
        let results = if self.config.parallel {
            match &self.pool {
                Some(pool) => pool.install(|| self.db.par_query::<AllDiagnosticsQuery>(&files)),
                None => self.db.par_query::<AllDiagnosticsQuery>(&files),
            }
        } else {
            files
                .iter()
                .map(|file| self.db.query::<AllDiagnosticsQuery>(file))
                .collect()
        };
        let mut out = BTreeMap::new();
        for (file, result) in files.into_iter().zip(results) {
            out.insert(file, result?);
        }
        debug!(
            files = out.len(),
            parallel = self.config.parallel,
            elapsed_ms = start.elapsed().as_secs_f64() * 1000.0,
            "checked all files"
        );
        Ok(out)
    }

    pub fn stats(&self) -> QueryStats {
        self.db.stats()
    }

    pub fn reset_stats(&self) {
        self.db.reset_stats();
    }
}
