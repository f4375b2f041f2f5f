//! The memoized async cell.
//!
//! # Design
//!
//! A [`Memo<R>`] owns a lazily evaluated invocation trigger: a
//! [`Computed`] whose evaluation calls the producer once and records the new
//! [`InvocationId`] as current. Whatever the producer reads while running
//! becomes a source of the trigger, as do the statuses of the await list, so
//! the next read after any of them changed invokes the producer again.
//!
//! Outcomes are committed through a single check: an outcome tagged with id
//! `i` is accepted only while `i` is still current. Older futures are left to
//! run and their results are dropped when they arrive.
//!
//! Cell state lives behind a mutex; every change is announced through an
//! [`Atom`] so observers of `status`, `result` and `error` re-run.
//!
//! # Invariants
//!
//! 1. The current id only increases, by one per producer call.
//! 2. At most the outcome of the current invocation is ever committed.
//! 3. A synchronous resolution rules out any later commit for its invocation.
//! 4. The producer is never called while a dependency is not complete.

use std::fmt;
use std::sync::{Arc, Weak};

use futures::future::BoxFuture;
use futures::FutureExt;
use parking_lot::Mutex;

use crate::dependency::{Awaitable, Dependency, DependencyFn};
use crate::invocation::{Invocation, InvocationId, InvocationKind, Producer, Resolution, ResolveSync};
use crate::tracer::{CommitOutcome, MemoId, TracerMemoKey};
use crate::{Atom, Computed, MemoError, Runtime, Status, StatusKind};

pub(crate) type ResultCallback<R> = Box<dyn Fn(R) + Send + Sync>;
pub(crate) type ErrorCallback = Box<dyn Fn(MemoError) + Send + Sync>;

/// Everything a cell is built from.
pub(crate) struct MemoConfig<R> {
    pub name: Option<Arc<str>>,
    pub producer: Producer<R>,
    pub dependencies: Option<DependencyFn>,
    pub default: Option<R>,
    pub on_result: Option<ResultCallback<R>>,
    pub on_error: Option<ErrorCallback>,
}

/// Last settled outcome of a cell.
enum Outcome<R> {
    /// In flight, carrying the last known good value.
    Pending(Option<R>),
    Complete(R),
    Error(MemoError),
}

impl<R> Outcome<R> {
    fn kind(&self) -> StatusKind {
        match self {
            Outcome::Pending(_) => StatusKind::Pending,
            Outcome::Complete(_) => StatusKind::Complete,
            Outcome::Error(_) => StatusKind::Error,
        }
    }
}

struct CellState<R> {
    outcome: Outcome<R>,
    current: InvocationId,
    /// Kind of the current invocation; `None` before the first one.
    latest: Option<InvocationKind>,
}

struct MemoInner<R> {
    runtime: Runtime,
    key: TracerMemoKey,
    atom: Atom,
    state: Mutex<CellState<R>>,
    producer: Producer<R>,
    dependencies: Option<DependencyFn>,
    default: Option<R>,
    on_result: Option<ResultCallback<R>>,
    on_error: Option<ErrorCallback>,
    trigger: Computed<Option<Invocation>>,
}

/// A single-value cache filled by an asynchronous producer.
///
/// The producer is called lazily, the first time the status, result or error
/// is read, and again on the next read after anything it read changed. Only
/// the latest invocation can settle the cell; results of superseded
/// invocations are dropped.
///
/// Reads are memoized even outside a reaction or computed value: reading again
/// without an intervening change returns the cached outcome and does not call
/// the producer.
///
/// This is cheap to clone - all data is behind `Arc`.
///
/// # Example
///
/// ```
/// use memo_flow::{Memo, MemoError, Observable, Resolution, Runtime, StatusKind};
///
/// let runtime = Runtime::new();
/// let user_id = Observable::new(&runtime, 1);
///
/// let profile = Memo::builder(&runtime)
///     .name("profile")
///     .invoke({
///         let user_id = user_id.clone();
///         move |_| {
///             let id = user_id.get();
///             Resolution::future(async move { Ok::<_, MemoError>(format!("user {id}")) })
///         }
///     })
///     .default_result("loading".to_string())
///     .build()
///     .unwrap();
///
/// assert_eq!(profile.status(), StatusKind::Pending);
/// assert_eq!(profile.result().as_deref(), Some("loading"));
///
/// runtime.run_until_stalled();
/// assert_eq!(profile.result().as_deref(), Some("user 1"));
///
/// user_id.set(2);
/// // Last known good value while the new invocation is in flight.
/// assert_eq!(profile.result().as_deref(), Some("user 1"));
/// runtime.run_until_stalled();
/// assert_eq!(profile.result().as_deref(), Some("user 2"));
/// ```
pub struct Memo<R> {
    inner: Arc<MemoInner<R>>,
}

impl<R> Clone for Memo<R> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<R> fmt::Debug for Memo<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.state.lock();
        f.debug_struct("Memo")
            .field("key", &format_args!("{}", self.inner.key))
            .field("status", &state.outcome.kind())
            .field("current", &state.current)
            .field("latest", &state.latest)
            .finish()
    }
}

impl<R: Clone + Send + Sync + 'static> Memo<R> {
    pub(crate) fn new(runtime: &Runtime, config: MemoConfig<R>) -> Self {
        let key = TracerMemoKey::new(runtime.next_memo_id(), config.name);
        let inner = Arc::new_cyclic(|weak: &Weak<MemoInner<R>>| {
            let weak = weak.clone();
            MemoInner {
                runtime: runtime.clone(),
                key,
                atom: Atom::new(runtime),
                state: Mutex::new(CellState {
                    outcome: Outcome::Pending(None),
                    current: InvocationId::default(),
                    latest: None,
                }),
                producer: config.producer,
                dependencies: config.dependencies,
                default: config.default,
                on_result: config.on_result,
                on_error: config.on_error,
                trigger: Computed::new(runtime, move || {
                    weak.upgrade().map(|inner| inner.invoke())
                }),
            }
        });
        runtime.tracer().on_memo_created(&inner.key);
        Self { inner }
    }

    /// Current status, invoking the producer if needed.
    ///
    /// While a dependency is not complete, returns that dependency's status
    /// without invoking this cell's producer.
    pub fn status(&self) -> StatusKind {
        self.inner.probe().kind()
    }

    /// Current status without invoking the producer.
    pub fn peek_status(&self) -> StatusKind {
        self.inner.peek_status()
    }

    /// The committed value, the last known good value while pending, or the
    /// default. Invokes the producer like [`status`](Memo::status).
    pub fn result(&self) -> Option<R> {
        self.inner.snapshot().into_result()
    }

    /// The first error among the dependencies while they are not all
    /// complete, otherwise the error of this cell's latest invocation.
    pub fn error(&self) -> Option<MemoError> {
        self.inner.error()
    }

    /// Status, result and error from one evaluation.
    pub fn snapshot(&self) -> Status<R> {
        self.inner.snapshot()
    }

    /// Returns `true` if [`status`](Memo::status) is pending.
    pub fn is_pending(&self) -> bool {
        self.status() == StatusKind::Pending
    }

    /// Returns `true` if [`status`](Memo::status) is complete.
    pub fn is_complete(&self) -> bool {
        self.status() == StatusKind::Complete
    }

    /// Returns `true` if [`status`](Memo::status) is error.
    pub fn is_error(&self) -> bool {
        self.status() == StatusKind::Error
    }

    /// This cell as an entry of another cell's await list.
    pub fn dependency(&self) -> Dependency {
        Dependency::new(self.inner.clone())
    }
}

impl<R> Memo<R> {
    /// The latest invocation, or `None` if the producer was never called.
    ///
    /// Does not invoke the producer or subscribe.
    pub fn invocation(&self) -> Option<Invocation> {
        let state = self.inner.state.lock();
        state.latest.map(|kind| Invocation {
            id: state.current,
            kind,
        })
    }

    /// Runtime-unique id of this cell.
    pub fn id(&self) -> MemoId {
        self.inner.key.id
    }

    /// Name given with `MemoBuilder::name`.
    pub fn name(&self) -> Option<&str> {
        self.inner.key.name.as_deref()
    }

    /// The runtime this cell belongs to.
    pub fn runtime(&self) -> &Runtime {
        &self.inner.runtime
    }
}

impl<R: Clone + Send + Sync + 'static> From<&Memo<R>> for Dependency {
    fn from(memo: &Memo<R>) -> Self {
        memo.dependency()
    }
}

impl<R: Clone + Send + Sync + 'static> From<Memo<R>> for Dependency {
    fn from(memo: Memo<R>) -> Self {
        Dependency::new(memo.inner)
    }
}

impl<R: Clone + Send + Sync + 'static> MemoInner<R> {
    fn dependencies(&self) -> Vec<Dependency> {
        self.dependencies
            .as_ref()
            .map(|dependencies| dependencies())
            .unwrap_or_default()
    }

    /// Force each dependency in order and stop at the first one that is not
    /// complete.
    fn gate(&self) -> Result<(), Status<()>> {
        for (index, dependency) in self.dependencies().iter().enumerate() {
            let probe = dependency.probe();
            if !probe.is_complete() {
                self.runtime
                    .tracer()
                    .on_gate_blocked(&self.key, index, probe.kind());
                return Err(probe);
            }
        }
        Ok(())
    }

    fn peek_status(&self) -> StatusKind {
        for dependency in self.dependencies() {
            let kind = dependency.peek_status();
            if kind != StatusKind::Complete {
                return kind;
            }
        }
        self.atom.report_observed();
        self.state.lock().outcome.kind()
    }

    /// Make sure the latest invocation happened and subscribe to the outcome.
    fn force(&self) {
        self.trigger.get();
        self.atom.report_observed();
    }

    fn probe(&self) -> Status<()> {
        if let Err(blocked) = self.gate() {
            return blocked;
        }
        self.force();
        match &self.state.lock().outcome {
            Outcome::Pending(_) => Status::Pending { result: None },
            Outcome::Complete(_) => Status::Complete { result: () },
            Outcome::Error(error) => Status::Error {
                result: None,
                error: error.clone(),
            },
        }
    }

    fn snapshot(&self) -> Status<R> {
        match self.gate() {
            Ok(()) => {}
            Err(Status::Error { error, .. }) => {
                return Status::Error {
                    result: self.default.clone(),
                    error,
                }
            }
            Err(_) => {
                self.atom.report_observed();
                let last_good = match &self.state.lock().outcome {
                    Outcome::Pending(Some(value)) | Outcome::Complete(value) => Some(value.clone()),
                    _ => None,
                };
                return Status::Pending {
                    result: last_good.or_else(|| self.default.clone()),
                };
            }
        }
        self.force();
        match &self.state.lock().outcome {
            Outcome::Pending(last_good) => Status::Pending {
                result: last_good.clone().or_else(|| self.default.clone()),
            },
            Outcome::Complete(value) => Status::Complete {
                result: value.clone(),
            },
            Outcome::Error(error) => Status::Error {
                result: self.default.clone(),
                error: error.clone(),
            },
        }
    }

    fn error(&self) -> Option<MemoError> {
        let dependencies = self.dependencies();
        if dependencies
            .iter()
            .any(|dependency| dependency.status() != StatusKind::Complete)
        {
            return dependencies.iter().find_map(Dependency::error);
        }
        self.force();
        let state = self.state.lock();
        match (&state.outcome, state.latest) {
            (_, Some(InvocationKind::Sync)) => None,
            (Outcome::Error(error), _) => Some(error.clone()),
            _ => None,
        }
    }

    // ------------------------------------------------------------------
    // Invocation
    // ------------------------------------------------------------------

    /// Call the producer once. Runs as the evaluation of the trigger.
    fn invoke(self: &Arc<Self>) -> Invocation {
        // Status changes of the await list re-arm the trigger.
        for dependency in self.dependencies() {
            dependency.peek_status();
        }

        let resolve = ResolveSync::new();
        let resolution = (self.producer)(&resolve);
        let id = {
            let mut state = self.state.lock();
            state.current = state.current.next();
            state.current
        };

        match (resolve.into_value(), resolution) {
            (Some(value), discarded) => {
                if let Resolution::Async(future) = discarded {
                    // Runs to completion; its outcome is never looked at.
                    self.runtime.spawn(future.map(drop));
                }
                self.commit_sync(id, value)
            }
            (None, Resolution::Sync(value)) => self.commit_sync(id, value),
            (None, Resolution::Async(future)) => self.start_async(id, future),
        }
    }

    fn commit_sync(self: &Arc<Self>, id: InvocationId, value: R) -> Invocation {
        let tracer = self.runtime.tracer();
        tracer.on_invocation_start(&self.key, id, InvocationKind::Sync);
        {
            let mut state = self.state.lock();
            state.outcome = Outcome::Complete(value);
            state.latest = Some(InvocationKind::Sync);
        }
        tracer.on_commit(&self.key, id, &CommitOutcome::Sync);
        self.atom.report_changed();

        // Delivered from the task queue, never from inside the evaluation.
        if self.on_result.is_some() {
            let weak = Arc::downgrade(self);
            self.runtime.spawn(async move {
                if let Some(inner) = weak.upgrade() {
                    inner.deliver_sync_result(id);
                }
            });
        }
        Invocation {
            id,
            kind: InvocationKind::Sync,
        }
    }

    fn deliver_sync_result(&self, id: InvocationId) {
        let committed = {
            let state = self.state.lock();
            match &state.outcome {
                Outcome::Complete(value) if state.current == id => Ok(value.clone()),
                _ => Err(state.current),
            }
        };
        match committed {
            Ok(value) => {
                if let Some(on_result) = &self.on_result {
                    self.runtime.batch(|| on_result(value));
                }
            }
            Err(current) => self.runtime.tracer().on_stale_dropped(&self.key, id, current),
        }
    }

    fn start_async(
        self: &Arc<Self>,
        id: InvocationId,
        future: BoxFuture<'static, Result<R, MemoError>>,
    ) -> Invocation {
        self.runtime
            .tracer()
            .on_invocation_start(&self.key, id, InvocationKind::Async);
        self.set_pending();

        let weak = Arc::downgrade(self);
        self.runtime.spawn(async move {
            let outcome = future.await;
            if let Some(inner) = weak.upgrade() {
                inner.settle(id, outcome);
            }
        });
        Invocation {
            id,
            kind: InvocationKind::Async,
        }
    }

    // ------------------------------------------------------------------
    // Commit
    // ------------------------------------------------------------------

    /// Keep the last known good value and report pending.
    fn set_pending(&self) {
        let changed = {
            let mut state = self.state.lock();
            state.latest = Some(InvocationKind::Async);
            let previous = std::mem::replace(&mut state.outcome, Outcome::Pending(None));
            let changed = !matches!(previous, Outcome::Pending(_));
            state.outcome = match previous {
                Outcome::Pending(last_good) => Outcome::Pending(last_good),
                Outcome::Complete(value) => Outcome::Pending(Some(value)),
                Outcome::Error(_) => Outcome::Pending(None),
            };
            changed
        };
        if changed {
            self.atom.report_changed();
        }
    }

    fn settle(&self, id: InvocationId, outcome: Result<R, MemoError>) {
        self.runtime.batch(|| match outcome {
            Ok(value) => self.set_complete(id, value),
            Err(error) => self.set_error(id, error),
        });
    }

    /// Store `outcome` if `id` is still current.
    fn accept(&self, id: InvocationId, outcome: Outcome<R>) -> bool {
        let mut state = self.state.lock();
        if state.current == id {
            state.outcome = outcome;
            return true;
        }
        let current = state.current;
        drop(state);
        self.runtime.tracer().on_stale_dropped(&self.key, id, current);
        false
    }

    fn set_complete(&self, id: InvocationId, value: R) {
        if !self.accept(id, Outcome::Complete(value.clone())) {
            return;
        }
        self.runtime
            .tracer()
            .on_commit(&self.key, id, &CommitOutcome::Complete);
        self.atom.report_changed();
        if let Some(on_result) = &self.on_result {
            on_result(value);
        }
    }

    fn set_error(&self, id: InvocationId, error: MemoError) {
        if !self.accept(id, Outcome::Error(error.clone())) {
            return;
        }
        self.runtime.tracer().on_commit(
            &self.key,
            id,
            &CommitOutcome::Error {
                message: error.to_string(),
            },
        );
        self.atom.report_changed();
        if let Some(on_error) = &self.on_error {
            on_error(error);
        }
    }
}

impl<R: Clone + Send + Sync + 'static> Awaitable for MemoInner<R> {
    fn status(&self) -> StatusKind {
        self.probe().kind()
    }

    fn peek_status(&self) -> StatusKind {
        MemoInner::peek_status(self)
    }

    fn error(&self) -> Option<MemoError> {
        MemoInner::error(self)
    }

    fn probe(&self) -> Status<()> {
        MemoInner::probe(self)
    }

    fn key(&self) -> Option<&TracerMemoKey> {
        Some(&self.key)
    }
}

#[test]
fn test_send_sync() {
    fn assert_send<T: Send>() {}
    fn assert_sync<T: Sync>() {}
    assert_send::<Memo<String>>();
    assert_sync::<Memo<String>>();
}
