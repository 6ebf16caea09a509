// query.rs — Incremental query engine
//
// Memoizes query functions keyed by (kind, argument), records the keys each
// execution reads, and revalidates cached results against those edges when
// inputs change. A recomputed value that compares equal to its predecessor
// keeps its old `changed_at` revision, which stops invalidation from
// travelling further downstream (early cutoff).
//
// The cache is an arena of records addressed by `RecordId`. Each thread's
// active computations are kept as an explicit frame stack inside the shared
// state; cycle detection checks that stack (and, across threads, the
// wait-for chain) before descending into a dependency.
//
// Preconditions: every query kind reached through `compute` is registered
//   with `Database::register` or `Database::register_input`.
// Postconditions: a memo verified at revision R reflects inputs as of R, and
//   its dependency list is the keys read by its last execution, with reads
//   of queries that left no memo replaced by what those queries read.
// Failure modes: cycles surface as `QueryError::Cycle` and edits during an
//   execution surface as `QueryError::Cancelled`. Queries on a cycle leave
//   no memo; a dependent that recovers from the cycle error is memoized
//   against the dependencies the cycle itself read. Query functions may
//   fail with `QueryError::Diagnostic`, which is memoized like a value.
// Side effects: none outside the database.

use std::any::{Any, TypeId};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, ThreadId};

use parking_lot::{Condvar, Mutex, MutexGuard};
use rayon::prelude::*;
use thiserror::Error;
use tracing::{debug, info, trace};

use crate::diag::Diagnostic;

// ── Revisions ────────────────────────────────────────────────────────────

/// Logical timestamp, advanced once per committed edit batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Revision(pub u64);

impl fmt::Display for Revision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "r{}", self.0)
    }
}

// ── Keys ─────────────────────────────────────────────────────────────────

/// Tag naming a query family. The engine dispatches on it without knowing
/// the concrete query type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct QueryKind(pub &'static str);

impl fmt::Display for QueryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.0)
    }
}

/// Type-erased query argument. Implemented for every `Eq + Hash` value.
pub trait QueryArg: Any + fmt::Debug + Send + Sync {
    fn arg_any(&self) -> &dyn Any;
    fn arg_eq(&self, other: &dyn QueryArg) -> bool;
    fn arg_hash(&self, state: &mut dyn Hasher);
}

impl<T> QueryArg for T
where
    T: Any + fmt::Debug + Eq + Hash + Send + Sync,
{
    fn arg_any(&self) -> &dyn Any {
        self
    }

    fn arg_eq(&self, other: &dyn QueryArg) -> bool {
        other
            .arg_any()
            .downcast_ref::<T>()
            .is_some_and(|other| self == other)
    }

    fn arg_hash(&self, mut state: &mut dyn Hasher) {
        TypeId::of::<T>().hash(&mut state);
        self.hash(&mut state);
    }
}

/// Identifies one memoized computation: a query kind plus its argument.
#[derive(Clone)]
pub struct QueryKey {
    kind: QueryKind,
    arg: Arc<dyn QueryArg>,
}

impl QueryKey {
    pub fn new<A: QueryArg>(kind: QueryKind, arg: A) -> Self {
        Self {
            kind,
            arg: Arc::new(arg),
        }
    }

    pub fn kind(&self) -> QueryKind {
        self.kind
    }

    /// The argument, if it has type `A`.
    pub fn arg<A: 'static>(&self) -> Option<&A> {
        self.arg.arg_any().downcast_ref::<A>()
    }
}

impl PartialEq for QueryKey {
    fn eq(&self, other: &Self) -> bool {
        self.kind == other.kind && self.arg.arg_eq(&*other.arg)
    }
}

impl Eq for QueryKey {}

impl Hash for QueryKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.kind.hash(state);
        self.arg.arg_hash(state);
    }
}

impl fmt::Debug for QueryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({:?})", self.kind, self.arg)
    }
}

impl fmt::Display for QueryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

// ── Values ───────────────────────────────────────────────────────────────

/// Type-erased query value, compared by value for early cutoff.
pub trait QueryValue: Any + fmt::Debug + Send + Sync {
    fn value_any(&self) -> &dyn Any;
    fn value_eq(&self, other: &dyn QueryValue) -> bool;
}

impl<T> QueryValue for T
where
    T: Any + fmt::Debug + Eq + Send + Sync,
{
    fn value_any(&self) -> &dyn Any {
        self
    }

    fn value_eq(&self, other: &dyn QueryValue) -> bool {
        other
            .value_any()
            .downcast_ref::<T>()
            .is_some_and(|other| self == other)
    }
}

pub type AnyValue = Arc<dyn QueryValue>;

/// What a memo holds: a value, or a failure recorded as data.
#[derive(Debug, Clone)]
enum Outcome {
    Value(AnyValue),
    Failed(Arc<Diagnostic>),
}

impl Outcome {
    fn same_as(&self, other: &Outcome) -> bool {
        match (self, other) {
            (Outcome::Value(a), Outcome::Value(b)) => a.value_eq(&**b),
            (Outcome::Failed(a), Outcome::Failed(b)) => a == b,
            _ => false,
        }
    }

    fn to_result(&self) -> QueryResult<AnyValue> {
        match self {
            Outcome::Value(value) => Ok(Arc::clone(value)),
            Outcome::Failed(diag) => Err(QueryError::Diagnostic(Arc::clone(diag))),
        }
    }
}

// ── Query families ───────────────────────────────────────────────────────

/// A derived query: a pure function of the database, memoized per key.
pub trait Query: 'static {
    const KIND: QueryKind;
    type Key: Clone + fmt::Debug + Eq + Hash + Send + Sync + 'static;
    type Value: Clone + fmt::Debug + Eq + Send + Sync + 'static;

    fn execute(db: &Database, key: &Self::Key) -> QueryResult<Self::Value>;
}

/// An input: a value set from outside through `Database::commit`.
pub trait Input: 'static {
    const KIND: QueryKind;
    type Key: Clone + fmt::Debug + Eq + Hash + Send + Sync + 'static;
    type Value: Clone + fmt::Debug + Eq + Send + Sync + 'static;
}

// ── Errors ───────────────────────────────────────────────────────────────

pub type QueryResult<T> = Result<T, QueryError>;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum QueryError {
    #[error(transparent)]
    Cycle(#[from] CycleError),
    #[error("{}", .0.message)]
    Diagnostic(Arc<Diagnostic>),
    #[error("query cancelled: started at {started}, revision is now {current}")]
    Cancelled { started: Revision, current: Revision },
    #[error("no query registered for kind `{0}`")]
    UnknownQuery(QueryKind),
    #[error("input {0} has not been set")]
    MissingInput(QueryKey),
    #[error("query `{0}` was asked for a value of a different type")]
    ValueType(QueryKind),
}

impl QueryError {
    /// Fail a query with a diagnostic that is memoized like a value.
    pub fn diagnostic(diag: Diagnostic) -> Self {
        QueryError::Diagnostic(Arc::new(diag))
    }
}

/// A query that depended on itself before completing. `path` runs from the
/// first occurrence of the repeated key to its re-entry.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("cycle detected: {}", render_path(.path))]
pub struct CycleError {
    pub path: Vec<QueryKey>,
}

fn render_path(path: &[QueryKey]) -> String {
    path.iter()
        .map(|key| key.to_string())
        .collect::<Vec<_>>()
        .join(" -> ")
}

// ── Statistics ───────────────────────────────────────────────────────────

/// Counters observed since the database was created or last reset.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueryStats {
    /// Query function executions per kind (the recomputation counter).
    pub executions: BTreeMap<QueryKind, u64>,
    /// Lookups answered from a memo already verified at the current revision.
    pub hits: u64,
    /// Memos re-tagged for a new revision without re-execution.
    pub validations: u64,
    /// Re-executions whose value equalled the previous one.
    pub cutoffs: u64,
    pub cycles: u64,
    pub cancelled: u64,
    pub evicted: u64,
}

impl QueryStats {
    pub fn executions(&self, kind: QueryKind) -> u64 {
        self.executions.get(&kind).copied().unwrap_or(0)
    }

    pub fn total_executions(&self) -> u64 {
        self.executions.values().sum()
    }
}

// ── Records ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct RecordId(u32);

impl RecordId {
    fn index(self) -> usize {
        self.0 as usize
    }
}

struct Memo {
    outcome: Outcome,
    /// Revision at which the value last differed from its predecessor.
    changed_at: Revision,
    /// Revision at which the value was last known to be current.
    verified_at: Revision,
    deps: Vec<RecordId>,
}

struct Running {
    owner: ThreadId,
    done: Arc<Condvar>,
}

/// Reads of an execution that finished without a memo.
struct Detached {
    revision: Revision,
    deps: Vec<RecordId>,
}

struct Record {
    key: QueryKey,
    input: bool,
    memo: Option<Memo>,
    running: Option<Running>,
    /// Invalidated directly by an edit batch; must re-execute.
    dirty: bool,
    detached: Option<Detached>,
}

/// One entry of a thread's active-computation stack.
struct Frame {
    record: RecordId,
    revision: Revision,
    /// False for verification frames and for lineage frames borrowed from a
    /// parallel fan-out; reads are only recorded into executing frames.
    recording: bool,
    deps: Vec<RecordId>,
    seen: HashSet<RecordId>,
    /// Part of a detected cycle; the execution must not be memoized.
    on_cycle: bool,
    /// For lineage frames: the thread and stack index of the frame copied.
    origin: Option<(ThreadId, usize)>,
}

impl Frame {
    fn executing(record: RecordId, revision: Revision) -> Self {
        Self {
            record,
            revision,
            recording: true,
            deps: Vec::new(),
            seen: HashSet::new(),
            on_cycle: false,
            origin: None,
        }
    }

    fn passive(record: RecordId, revision: Revision) -> Self {
        Self {
            recording: false,
            ..Self::executing(record, revision)
        }
    }

    fn lineage(entry: &Lineage) -> Self {
        Self {
            origin: Some(entry.origin),
            ..Self::passive(entry.record, entry.revision)
        }
    }
}

/// A frame of a fan-out parent, handed to the workers of `par_compute`.
struct Lineage {
    record: RecordId,
    revision: Revision,
    origin: (ThreadId, usize),
}

#[derive(Default)]
struct State {
    records: Vec<Record>,
    index: HashMap<QueryKey, RecordId>,
    stacks: HashMap<ThreadId, Vec<Frame>>,
    blocked_on: HashMap<ThreadId, RecordId>,
    stats: QueryStats,
}

impl State {
    fn intern(&mut self, key: &QueryKey, input: bool) -> RecordId {
        if let Some(&id) = self.index.get(key) {
            return id;
        }
        let id = RecordId(self.records.len() as u32);
        self.records.push(Record {
            key: key.clone(),
            input,
            memo: None,
            running: None,
            dirty: false,
            detached: None,
        });
        self.index.insert(key.clone(), id);
        id
    }

    fn record(&self, id: RecordId) -> &Record {
        &self.records[id.index()]
    }

    fn record_mut(&mut self, id: RecordId) -> &mut Record {
        &mut self.records[id.index()]
    }

    fn stack(&self, thread: ThreadId) -> &[Frame] {
        self.stacks.get(&thread).map(Vec::as_slice).unwrap_or(&[])
    }

    fn push_frame(&mut self, thread: ThreadId, frame: Frame) {
        self.stacks.entry(thread).or_default().push(frame);
    }

    fn pop_frame(&mut self, thread: ThreadId) -> Option<Frame> {
        let stack = self.stacks.get_mut(&thread)?;
        let frame = stack.pop();
        if stack.is_empty() {
            self.stacks.remove(&thread);
        }
        frame
    }

    fn truncate_stack(&mut self, thread: ThreadId, depth: usize) {
        if let Some(stack) = self.stacks.get_mut(&thread) {
            stack.truncate(depth);
            if stack.is_empty() {
                self.stacks.remove(&thread);
            }
        }
    }

    /// Record a read of `id` as a dependency edge of the executing frame.
    fn record_read(&mut self, thread: ThreadId, id: RecordId) {
        if let Some(frame) = self.stacks.get_mut(&thread).and_then(|s| s.last_mut()) {
            if frame.recording && frame.seen.insert(id) {
                frame.deps.push(id);
            }
        }
    }

    /// Mark the frames of `thread` from the first occurrence of `from` to the
    /// top as part of a cycle, following lineage frames back to the thread
    /// that forked them.
    fn mark_cycle(&mut self, thread: ThreadId, from: RecordId) {
        let mut origins = Vec::new();
        if let Some(stack) = self.stacks.get_mut(&thread) {
            if let Some(start) = stack.iter().position(|frame| frame.record == from) {
                for frame in &mut stack[start..] {
                    frame.on_cycle = true;
                    origins.extend(frame.origin);
                }
            }
        }
        while let Some((owner, index)) = origins.pop() {
            if let Some(frame) = self.stacks.get_mut(&owner).and_then(|s| s.get_mut(index)) {
                if !frame.on_cycle {
                    frame.on_cycle = true;
                    origins.extend(frame.origin);
                }
            }
        }
    }

    /// Replace every dependency that left no memo at `revision` by the
    /// dependencies its execution read, transitively. `None` when some
    /// dependency has neither a fresh memo nor recorded reads.
    fn settle(&self, deps: Vec<RecordId>, revision: Revision) -> Option<Vec<RecordId>> {
        let mut settled = Vec::with_capacity(deps.len());
        let mut seen = HashSet::new();
        let mut pending: Vec<RecordId> = deps.into_iter().rev().collect();
        while let Some(dep) = pending.pop() {
            if !seen.insert(dep) {
                continue;
            }
            if self.is_fresh(dep, revision) {
                settled.push(dep);
                continue;
            }
            match &self.record(dep).detached {
                Some(detached) if detached.revision == revision => {
                    pending.extend(detached.deps.iter().rev());
                }
                _ => return None,
            }
        }
        Some(settled)
    }

    fn is_fresh(&self, id: RecordId, revision: Revision) -> bool {
        let record = self.record(id);
        !record.dirty
            && record
                .memo
                .as_ref()
                .is_some_and(|memo| memo.verified_at == revision)
    }

    /// If `id` is already on this thread's stack, the keys from its first
    /// occurrence up to and including the re-entry.
    fn active_path(&self, thread: ThreadId, id: RecordId) -> Option<Vec<QueryKey>> {
        let stack = self.stack(thread);
        let start = stack.iter().position(|frame| frame.record == id)?;
        let mut path: Vec<QueryKey> = stack[start..]
            .iter()
            .map(|frame| self.record(frame.record).key.clone())
            .collect();
        path.push(self.record(id).key.clone());
        Some(path)
    }

    /// If waiting for `target` would eventually wait for `thread`, each
    /// (owner, record) hop of that chain, ending with the record `thread`
    /// itself is computing.
    fn wait_chain(&self, thread: ThreadId, target: RecordId) -> Option<Vec<(ThreadId, RecordId)>> {
        let mut visited = HashSet::new();
        let mut hops = Vec::new();
        let mut current = target;
        loop {
            let owner = self.record(current).running.as_ref().map(|r| r.owner)?;
            hops.push((owner, current));
            if owner == thread {
                return Some(hops);
            }
            if !visited.insert(owner) {
                return None;
            }
            current = *self.blocked_on.get(&owner)?;
        }
    }

    fn stack_path(&self, thread: ThreadId, target: RecordId) -> Vec<QueryKey> {
        let mut path: Vec<QueryKey> = self
            .stack(thread)
            .iter()
            .map(|frame| self.record(frame.record).key.clone())
            .collect();
        path.push(self.record(target).key.clone());
        path
    }
}

type Executor = dyn Fn(&Database, &QueryKey) -> QueryResult<AnyValue> + Send + Sync;

// ── Database ─────────────────────────────────────────────────────────────

/// The session-wide query cache and executor registry.
///
/// Created at session start, handed by reference to every query function,
/// and torn down on drop. `clear` and `evict_lru` drop memos on demand.
pub struct Database {
    state: Mutex<State>,
    executors: HashMap<QueryKind, Arc<Executor>>,
    inputs: HashSet<QueryKind>,
    revision: AtomicU64,
}

impl Default for Database {
    fn default() -> Self {
        Self::new()
    }
}

impl Database {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State::default()),
            executors: HashMap::new(),
            inputs: HashSet::new(),
            revision: AtomicU64::new(0),
        }
    }

    // ── Registry ──

    /// Register a derived query family.
    pub fn register<Q: Query>(&mut self) {
        let executor = |db: &Database, key: &QueryKey| -> QueryResult<AnyValue> {
            let arg = key
                .arg::<Q::Key>()
                .ok_or(QueryError::ValueType(Q::KIND))?;
            let value = Q::execute(db, arg)?;
            Ok(Arc::new(value) as AnyValue)
        };
        self.executors.insert(Q::KIND, Arc::new(executor));
    }

    /// Register an input family.
    pub fn register_input<I: Input>(&mut self) {
        self.inputs.insert(I::KIND);
    }

    pub fn revision(&self) -> Revision {
        Revision(self.revision.load(Ordering::SeqCst))
    }

    // ── Reads ──

    /// Typed read of a derived query.
    pub fn query<Q: Query>(&self, key: &Q::Key) -> QueryResult<Q::Value> {
        let value = self.compute(&QueryKey::new(Q::KIND, key.clone()))?;
        downcast(&value, Q::KIND)
    }

    /// Typed read of an input.
    pub fn input<I: Input>(&self, key: &I::Key) -> QueryResult<I::Value> {
        let value = self.compute(&QueryKey::new(I::KIND, key.clone()))?;
        downcast(&value, I::KIND)
    }

    /// Return the value for `key`, from a memo valid at the current revision
    /// or by (re)executing its query function.
    ///
    /// When called from inside another query, the read is recorded as a
    /// dependency edge of that query.
    pub fn compute(&self, key: &QueryKey) -> QueryResult<AnyValue> {
        let thread = thread::current().id();
        let mut state = self.state.lock();
        if let Some(frame) = state.stack(thread).last() {
            let current = self.revision();
            if frame.revision != current {
                return Err(QueryError::Cancelled {
                    started: frame.revision,
                    current,
                });
            }
        }
        let id = state.intern(key, self.inputs.contains(&key.kind()));
        state.record_read(thread, id);
        self.fetch(&mut state, thread, id)
    }

    /// Compute independent keys on the rayon pool.
    ///
    /// Workers inherit the caller's active stack as lineage, so a key that
    /// reaches back into its fan-out parent is reported as a cycle instead
    /// of waiting on it.
    pub fn par_compute(&self, keys: &[QueryKey]) -> Vec<QueryResult<AnyValue>> {
        let thread = thread::current().id();
        let lineage: Vec<Lineage> = {
            let mut state = self.state.lock();
            for key in keys {
                let id = state.intern(key, self.inputs.contains(&key.kind()));
                state.record_read(thread, id);
            }
            state
                .stack(thread)
                .iter()
                .enumerate()
                .map(|(index, frame)| Lineage {
                    record: frame.record,
                    revision: frame.revision,
                    origin: frame.origin.unwrap_or((thread, index)),
                })
                .collect()
        };

        keys.par_iter()
            .map(|key| self.compute_with_lineage(key, &lineage))
            .collect()
    }

    /// Typed parallel read of a derived query.
    pub fn par_query<Q: Query>(&self, keys: &[Q::Key]) -> Vec<QueryResult<Q::Value>> {
        let erased: Vec<QueryKey> = keys
            .iter()
            .map(|key| QueryKey::new(Q::KIND, key.clone()))
            .collect();
        self.par_compute(&erased)
            .into_iter()
            .map(|result| result.and_then(|value| downcast(&value, Q::KIND)))
            .collect()
    }

    fn compute_with_lineage(&self, key: &QueryKey, lineage: &[Lineage]) -> QueryResult<AnyValue> {
        if lineage.is_empty() {
            return self.compute(key);
        }
        let thread = thread::current().id();
        let depth = {
            let mut state = self.state.lock();
            let depth = state.stack(thread).len();
            for entry in lineage {
                state.push_frame(thread, Frame::lineage(entry));
            }
            depth
        };
        let result = self.compute(key);
        self.state.lock().truncate_stack(thread, depth);
        result
    }

    /// Cooperative cancellation point for long-running query bodies.
    pub fn check_cancelled(&self) -> QueryResult<()> {
        let thread = thread::current().id();
        let state = self.state.lock();
        let current = self.revision();
        match state.stack(thread).last() {
            Some(frame) if frame.revision != current => Err(QueryError::Cancelled {
                started: frame.revision,
                current,
            }),
            _ => Ok(()),
        }
    }

    fn fetch(
        &self,
        state: &mut MutexGuard<'_, State>,
        thread: ThreadId,
        id: RecordId,
    ) -> QueryResult<AnyValue> {
        loop {
            let revision = self.revision();

            if let Some(path) = state.active_path(thread, id) {
                state.stats.cycles += 1;
                debug!(query = %state.record(id).key, "cycle detected");
                state.mark_cycle(thread, id);
                return Err(CycleError { path }.into());
            }

            if let Some(done) = state.record(id).running.as_ref().map(|r| Arc::clone(&r.done)) {
                if let Some(hops) = state.wait_chain(thread, id) {
                    state.stats.cycles += 1;
                    debug!(query = %state.record(id).key, "cycle across workers detected");
                    for (owner, record) in hops {
                        state.mark_cycle(owner, record);
                    }
                    let path = state.stack_path(thread, id);
                    return Err(CycleError { path }.into());
                }
                trace!(query = %state.record(id).key, "waiting for another worker");
                state.blocked_on.insert(thread, id);
                done.wait(state);
                state.blocked_on.remove(&thread);
                continue;
            }

            if state.is_fresh(id, revision) {
                state.stats.hits += 1;
                if let Some(memo) = &state.record(id).memo {
                    trace!(query = %state.record(id).key, "cache hit");
                    return memo.outcome.to_result();
                }
            }

            if state.record(id).input {
                let record = state.record_mut(id);
                return match record.memo.as_mut() {
                    Some(memo) => {
                        memo.verified_at = revision;
                        memo.outcome.to_result()
                    }
                    None => Err(QueryError::MissingInput(record.key.clone())),
                };
            }

            // Claim the key: other workers asking for it now block on `done`.
            let done = Arc::new(Condvar::new());
            state.record_mut(id).running = Some(Running {
                owner: thread,
                done: Arc::clone(&done),
            });

            let reusable = !state.record(id).dirty && state.record(id).memo.is_some();
            let result = if reusable {
                match self.deps_unchanged(state, thread, id, revision) {
                    Ok(true) => self.revalidate(state, id, revision),
                    Ok(false) => self.execute(state, thread, id, revision),
                    Err(err) => Err(err),
                }
            } else {
                self.execute(state, thread, id, revision)
            };

            state.record_mut(id).running = None;
            done.notify_all();
            return result;
        }
    }

    /// Walk the recorded dependency edges of `id` in order, bringing each
    /// one up to date. Stops at the first dependency whose value changed
    /// after `id` was last verified.
    fn deps_unchanged(
        &self,
        state: &mut MutexGuard<'_, State>,
        thread: ThreadId,
        id: RecordId,
        revision: Revision,
    ) -> QueryResult<bool> {
        let Some((deps, verified_at)) = state
            .record(id)
            .memo
            .as_ref()
            .map(|memo| (memo.deps.clone(), memo.verified_at))
        else {
            return Ok(false);
        };

        state.push_frame(thread, Frame::passive(id, revision));
        let mut verdict = Ok(true);
        for dep in deps {
            match self.fetch(state, thread, dep) {
                Ok(_) | Err(QueryError::Diagnostic(_)) => {}
                Err(err @ QueryError::Cancelled { .. }) => {
                    verdict = Err(err);
                    break;
                }
                // Re-execution reports cycles and faults with full context.
                Err(_) => {
                    verdict = Ok(false);
                    break;
                }
            }
            let changed = state
                .record(dep)
                .memo
                .as_ref()
                .is_none_or(|memo| memo.changed_at > verified_at || memo.verified_at != revision);
            if changed {
                verdict = Ok(false);
                break;
            }
        }
        state.pop_frame(thread);
        verdict
    }

    fn revalidate(
        &self,
        state: &mut MutexGuard<'_, State>,
        id: RecordId,
        revision: Revision,
    ) -> QueryResult<AnyValue> {
        state.stats.validations += 1;
        let record = state.record_mut(id);
        trace!(query = %record.key, revision = %revision, "dependencies unchanged");
        match record.memo.as_mut() {
            Some(memo) => {
                memo.verified_at = revision;
                memo.outcome.to_result()
            }
            None => Err(QueryError::MissingInput(record.key.clone())),
        }
    }

    fn execute(
        &self,
        state: &mut MutexGuard<'_, State>,
        thread: ThreadId,
        id: RecordId,
        revision: Revision,
    ) -> QueryResult<AnyValue> {
        let key = state.record(id).key.clone();
        let Some(executor) = self.executors.get(&key.kind()).cloned() else {
            return Err(QueryError::UnknownQuery(key.kind()));
        };

        state.push_frame(thread, Frame::executing(id, revision));
        debug!(query = %key, revision = %revision, "executing");
        let result = MutexGuard::unlocked(state, || executor(self, &key));
        let (deps, on_cycle) = match state.pop_frame(thread) {
            Some(frame) => (frame.deps, frame.on_cycle),
            None => (Vec::new(), true),
        };
        *state.stats.executions.entry(key.kind()).or_default() += 1;

        let current = self.revision();
        if current != revision {
            state.stats.cancelled += 1;
            debug!(query = %key, started = %revision, current = %current, "discarding stale result");
            return Err(QueryError::Cancelled {
                started: revision,
                current,
            });
        }

        let outcome = match result {
            Ok(value) => Outcome::Value(value),
            Err(QueryError::Diagnostic(diag)) => Outcome::Failed(diag),
            Err(err) => {
                state.record_mut(id).detached = Some(Detached { revision, deps });
                return Err(err);
            }
        };
        let result = outcome.to_result();
        if on_cycle {
            trace!(query = %key, "not memoized: on a dependency cycle");
            state.record_mut(id).detached = Some(Detached { revision, deps });
            return result;
        }
        let Some(deps) = state.settle(deps, revision) else {
            trace!(query = %key, "not memoized: a dependency left no memo");
            state.record_mut(id).detached = None;
            return result;
        };

        let record = state.record_mut(id);
        let previous = record.memo.take();
        let cutoff = previous
            .as_ref()
            .is_some_and(|old| old.outcome.same_as(&outcome));
        let changed_at = match previous {
            Some(old) if cutoff => old.changed_at,
            _ => revision,
        };
        record.memo = Some(Memo {
            outcome,
            changed_at,
            verified_at: revision,
            deps,
        });
        record.dirty = false;
        record.detached = None;
        if cutoff {
            state.stats.cutoffs += 1;
            debug!(query = %key, "early cutoff: value unchanged");
        }
        result
    }

    // ── Edits ──

    /// Apply one edit batch and advance the revision exactly once.
    pub fn commit(&self, edits: impl FnOnce(&mut EditBatch<'_>)) -> Revision {
        let mut state = self.state.lock();
        let revision = Revision(self.revision().0 + 1);
        let mut batch = EditBatch {
            state: &mut state,
            revision,
            changed: 0,
            invalidated: 0,
        };
        edits(&mut batch);
        let (changed, invalidated) = (batch.changed, batch.invalidated);
        self.revision.store(revision.0, Ordering::SeqCst);
        info!(revision = %revision, changed, invalidated, "committed edit batch");
        revision
    }

    // ── Introspection and lifecycle ──

    pub fn stats(&self) -> QueryStats {
        self.state.lock().stats.clone()
    }

    pub fn reset_stats(&self) {
        self.state.lock().stats = QueryStats::default();
    }

    /// The dependency edges recorded by the last execution of `key`.
    pub fn dependencies(&self, key: &QueryKey) -> Option<Vec<QueryKey>> {
        let state = self.state.lock();
        let id = *state.index.get(key)?;
        let memo = state.record(id).memo.as_ref()?;
        Some(
            memo.deps
                .iter()
                .map(|&dep| state.record(dep).key.clone())
                .collect(),
        )
    }

    /// Whether `key` currently has a memoized result (of any revision).
    pub fn is_memoized(&self, key: &QueryKey) -> bool {
        let state = self.state.lock();
        state
            .index
            .get(key)
            .is_some_and(|&id| state.record(id).memo.is_some())
    }

    /// Whether `key` holds a memo verified at the current revision, so that
    /// reading it now is a cache hit.
    pub fn is_current(&self, key: &QueryKey) -> bool {
        let state = self.state.lock();
        let revision = self.revision();
        state
            .index
            .get(key)
            .is_some_and(|&id| state.is_fresh(id, revision))
    }

    /// Number of records holding a memo.
    pub fn record_count(&self) -> usize {
        self.state
            .lock()
            .records
            .iter()
            .filter(|record| record.memo.is_some())
            .count()
    }

    /// Drop derived memos, least recently verified first, until at most
    /// `keep` remain. Inputs and records being computed are never evicted.
    pub fn evict_lru(&self, keep: usize) -> usize {
        let mut state = self.state.lock();
        let mut candidates: Vec<(Revision, RecordId)> = state
            .records
            .iter()
            .enumerate()
            .filter(|(_, record)| !record.input && record.running.is_none())
            .filter_map(|(index, record)| {
                record
                    .memo
                    .as_ref()
                    .map(|memo| (memo.verified_at, RecordId(index as u32)))
            })
            .collect();
        if candidates.len() <= keep {
            return 0;
        }
        candidates.sort_by_key(|&(verified_at, id)| (verified_at, id.0));
        let evict = candidates.len() - keep;
        for &(_, id) in &candidates[..evict] {
            state.record_mut(id).memo = None;
        }
        state.stats.evicted += evict as u64;
        debug!(evicted = evict, kept = keep, "evicted least-recently-verified memos");
        evict
    }

    /// Drop every derived memo. Inputs are kept.
    pub fn clear(&self) {
        let mut state = self.state.lock();
        for record in state.records.iter_mut() {
            if !record.input && record.running.is_none() {
                record.memo = None;
            }
        }
    }
}

fn downcast<V: Clone + 'static>(value: &AnyValue, kind: QueryKind) -> QueryResult<V> {
    value
        .value_any()
        .downcast_ref::<V>()
        .cloned()
        .ok_or(QueryError::ValueType(kind))
}

/// Mutations applied atomically by `Database::commit`.
pub struct EditBatch<'a> {
    state: &'a mut State,
    revision: Revision,
    changed: usize,
    invalidated: usize,
}

impl EditBatch<'_> {
    /// The revision this batch will commit as.
    pub fn revision(&self) -> Revision {
        self.revision
    }

    /// Set an input. Returns whether the value differs from the previous one;
    /// an equal value keeps its old `changed_at`, so dependents stay valid.
    pub fn set_input<I: Input>(&mut self, key: I::Key, value: I::Value) -> bool {
        let key = QueryKey::new(I::KIND, key);
        let id = self.state.intern(&key, true);
        let outcome = Outcome::Value(Arc::new(value));
        let record = self.state.record_mut(id);
        record.input = true;
        let previous = record.memo.take();
        let changed_at = match previous {
            Some(old) if old.outcome.same_as(&outcome) => old.changed_at,
            _ => self.revision,
        };
        let changed = changed_at == self.revision;
        record.memo = Some(Memo {
            outcome,
            changed_at,
            verified_at: self.revision,
            deps: Vec::new(),
        });
        if changed {
            self.changed += 1;
        }
        changed
    }

    /// Force the next read of a derived `key` to re-execute. Early cutoff
    /// still applies to the re-executed value.
    pub fn invalidate(&mut self, key: &QueryKey) -> bool {
        match self.state.index.get(key).copied() {
            Some(id) => {
                self.state.record_mut(id).dirty = true;
                self.invalidated += 1;
                true
            }
            None => false,
        }
    }
}
