//! The reactive runtime: dependency graph, batching, reactions and tasks.

use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};

use futures::future::BoxFuture;
use futures::stream::FuturesUnordered;
use futures::task::{waker, ArcWake, AtomicWaker};
use futures::{FutureExt, StreamExt};
use parking_lot::Mutex;

use crate::node::{record_read, Graph, NodeId, NodeKind, Rerun, TrackingScope};
use crate::reaction::Reaction;
use crate::tracer::{MemoId, NoopTracer, Tracer};

/// Default number of flush rounds before reactions are considered divergent.
pub const DEFAULT_MAX_REACTION_ITERATIONS: usize = 100;

static NEXT_RUNTIME_ID: AtomicU64 = AtomicU64::new(1);

/// The runtime tracks which nodes read which, marks derivations dirty when a
/// source changes, re-runs reactions at the end of each batch and drives the
/// futures spawned by cells.
///
/// This is cheap to clone - all data is behind `Arc`.
///
/// # Example
///
/// ```
/// use std::sync::Arc;
/// use parking_lot::Mutex;
/// use memo_flow::{Observable, Runtime};
///
/// let runtime = Runtime::new();
/// let count = Observable::new(&runtime, 1);
///
/// let seen = Arc::new(Mutex::new(Vec::new()));
/// let reaction = {
///     let count = count.clone();
///     let seen = seen.clone();
///     runtime.autorun(move || seen.lock().push(count.get()))
/// };
///
/// runtime.batch(|| {
///     count.set(2);
///     count.set(3);
/// });
/// assert_eq!(*seen.lock(), vec![1, 3]);
/// reaction.dispose();
/// ```
#[derive(Clone)]
pub struct Runtime {
    inner: Arc<RuntimeInner>,
}

struct RuntimeInner {
    id: u64,
    graph: Mutex<Graph>,
    scheduler: Mutex<Scheduler>,
    tasks: Mutex<FuturesUnordered<BoxFuture<'static, ()>>>,
    signal: Arc<WakeSignal>,
    tracer: Arc<dyn Tracer>,
    max_reaction_iterations: usize,
    next_memo_id: AtomicU64,
    /// Logical time, advanced by every change.
    clock: AtomicU64,
}

#[derive(Default)]
struct Scheduler {
    batch_depth: usize,
    flushing: bool,
    pending: Vec<NodeId>,
}

/// Wakes whoever drives the task queue.
#[derive(Default)]
struct WakeSignal {
    woken: AtomicBool,
    waker: AtomicWaker,
}

impl ArcWake for WakeSignal {
    fn wake_by_ref(arc_self: &Arc<Self>) {
        arc_self.woken.store(true, Ordering::SeqCst);
        arc_self.waker.wake();
    }
}

impl Default for Runtime {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Runtime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Runtime")
            .field("id", &self.inner.id)
            .field("nodes", &self.inner.graph.lock().len())
            .field("pending_tasks", &self.pending_tasks())
            .finish()
    }
}

#[test]
fn test_send_sync() {
    fn assert_send<T: Send>() {}
    fn assert_sync<T: Sync>() {}
    assert_send::<Runtime>();
    assert_sync::<Runtime>();
}

impl Runtime {
    /// Create a new runtime with the default settings.
    pub fn new() -> Self {
        RuntimeBuilder::new().build()
    }

    /// Create a builder for customizing the runtime.
    pub fn builder() -> RuntimeBuilder {
        RuntimeBuilder::new()
    }

    /// Create a new runtime that reports to `tracer`.
    pub fn with_tracer(tracer: impl Tracer) -> Self {
        RuntimeBuilder::new().tracer(Arc::new(tracer)).build()
    }

    /// The tracer of this runtime.
    pub fn tracer(&self) -> &dyn Tracer {
        &*self.inner.tracer
    }

    /// Returns true if both handles refer to the same runtime.
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    pub(crate) fn next_memo_id(&self) -> MemoId {
        MemoId(self.inner.next_memo_id.fetch_add(1, Ordering::Relaxed))
    }

    // ------------------------------------------------------------------
    // Graph
    // ------------------------------------------------------------------

    pub(crate) fn add_node(&self, kind: NodeKind) -> NodeId {
        self.inner.graph.lock().insert(kind, None)
    }

    pub(crate) fn add_reaction_node(&self, rerun: std::sync::Weak<dyn Rerun>) -> NodeId {
        self.inner
            .graph
            .lock()
            .insert(NodeKind::Reaction, Some(rerun))
    }

    pub(crate) fn remove_node(&self, node: NodeId) {
        self.inner.graph.lock().remove(node);
        self.inner.scheduler.lock().pending.retain(|id| *id != node);
    }

    pub(crate) fn is_dirty(&self, node: NodeId) -> bool {
        self.inner.graph.lock().is_dirty(node)
    }

    pub(crate) fn observer_count(&self, node: NodeId) -> usize {
        self.inner.graph.lock().observer_count(node)
    }

    /// Record that the current evaluation read `node`.
    pub(crate) fn report_observed(&self, node: NodeId) {
        record_read(self.inner.id, node, self.inner.clock.load(Ordering::SeqCst));
    }

    fn tick(&self) -> u64 {
        self.inner.clock.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Mark everything downstream of `node` dirty and schedule affected reactions.
    pub(crate) fn report_changed(&self, node: NodeId) {
        let at = self.tick();
        let reactions = self.inner.graph.lock().invalidate_from(node, at);
        self.schedule(reactions);
    }

    /// Mark `node` itself dirty and schedule affected reactions.
    pub(crate) fn invalidate(&self, node: NodeId) {
        let at = self.tick();
        let reactions = self.inner.graph.lock().force_dirty(node, at);
        self.schedule(reactions);
    }

    /// Evaluate `f` as `observer`, replacing its sources with the nodes `f` reads.
    ///
    /// The observer is marked clean before `f` runs. A source that changes
    /// during the evaluation leaves it dirty unless `f` read that source again
    /// afterwards. A panicking evaluation leaves it dirty.
    pub(crate) fn track<T>(&self, observer: NodeId, f: impl FnOnce() -> T) -> T {
        struct Redirty<'a> {
            runtime: &'a Runtime,
            observer: NodeId,
            armed: bool,
        }
        impl Drop for Redirty<'_> {
            fn drop(&mut self) {
                if self.armed {
                    self.runtime
                        .inner
                        .graph
                        .lock()
                        .abandon_evaluation(self.observer);
                    self.runtime.invalidate(self.observer);
                }
            }
        }

        self.inner.graph.lock().begin_evaluation(observer);
        let mut redirty = Redirty {
            runtime: self,
            observer,
            armed: true,
        };
        let scope = TrackingScope::enter(self.inner.id, Some(observer));
        let output = f();
        let reads = scope.finish();
        redirty.armed = false;
        self.inner.graph.lock().finish_evaluation(observer, reads);
        output
    }

    /// Run `f` without recording any of its reads in the current evaluation.
    pub fn untracked<T>(&self, f: impl FnOnce() -> T) -> T {
        let scope = TrackingScope::enter(self.inner.id, None);
        let output = f();
        scope.finish();
        output
    }

    // ------------------------------------------------------------------
    // Batching and reactions
    // ------------------------------------------------------------------

    /// Run `f` as one batch: reactions scheduled by changes inside `f` run once,
    /// after the outermost batch ends.
    pub fn batch<T>(&self, f: impl FnOnce() -> T) -> T {
        struct EndBatch<'a>(&'a Runtime);
        impl Drop for EndBatch<'_> {
            fn drop(&mut self) {
                let outermost = {
                    let mut scheduler = self.0.inner.scheduler.lock();
                    scheduler.batch_depth -= 1;
                    scheduler.batch_depth == 0
                };
                if outermost && !std::thread::panicking() {
                    self.0.flush();
                }
            }
        }

        self.inner.scheduler.lock().batch_depth += 1;
        let _end = EndBatch(self);
        f()
    }

    /// Returns true while a batch is open.
    pub fn in_batch(&self) -> bool {
        self.inner.scheduler.lock().batch_depth > 0
    }

    fn schedule(&self, reactions: Vec<NodeId>) {
        if reactions.is_empty() {
            return;
        }
        let idle = {
            let mut scheduler = self.inner.scheduler.lock();
            for reaction in reactions {
                if !scheduler.pending.contains(&reaction) {
                    scheduler.pending.push(reaction);
                }
            }
            scheduler.batch_depth == 0
        };
        if idle && !std::thread::panicking() {
            self.flush();
        }
    }

    /// Re-run scheduled reactions until none are left.
    fn flush(&self) {
        struct EndFlush<'a>(&'a Runtime);
        impl Drop for EndFlush<'_> {
            fn drop(&mut self) {
                self.0.inner.scheduler.lock().flushing = false;
            }
        }

        {
            let mut scheduler = self.inner.scheduler.lock();
            if scheduler.flushing || scheduler.batch_depth > 0 {
                return;
            }
            scheduler.flushing = true;
        }
        let _end = EndFlush(self);

        let mut iterations = 0;
        loop {
            let pending = std::mem::take(&mut self.inner.scheduler.lock().pending);
            if pending.is_empty() {
                break;
            }
            iterations += 1;
            if iterations > self.inner.max_reaction_iterations {
                self.inner
                    .tracer
                    .on_reaction_limit(iterations - 1, pending.len());
                break;
            }
            for id in pending {
                let rerun = {
                    let graph = self.inner.graph.lock();
                    // Caught up with its changes while it ran.
                    if !graph.is_dirty(id) {
                        continue;
                    }
                    graph.reaction(id)
                };
                if let Some(rerun) = rerun.and_then(|weak| weak.upgrade()) {
                    self.inner.tracer.on_reaction_run(id);
                    rerun.rerun();
                }
            }
        }
    }

    /// Run `effect` now, tracking what it reads, and re-run it after any of
    /// those sources change.
    ///
    /// The returned [`Reaction`] stops the effect when disposed or dropped.
    #[must_use = "dropping the reaction disposes it"]
    pub fn autorun(&self, effect: impl FnMut() + Send + 'static) -> Reaction {
        Reaction::new(self, effect)
    }

    // ------------------------------------------------------------------
    // Tasks
    // ------------------------------------------------------------------

    /// Queue a future on this runtime.
    ///
    /// Queued futures make progress only while the runtime is driven by
    /// [`run_until_stalled`](Runtime::run_until_stalled) or
    /// [`settle`](Runtime::settle).
    pub fn spawn(&self, future: impl Future<Output = ()> + Send + 'static) {
        self.inner.tasks.lock().push(future.boxed());
        ArcWake::wake_by_ref(&self.inner.signal);
    }

    /// Number of queued futures that have not finished.
    pub fn pending_tasks(&self) -> usize {
        self.inner.tasks.lock().len()
    }

    /// Poll every queued future once, returning true if any of them finished.
    fn poll_tasks(&self, cx: &mut Context<'_>) -> bool {
        // Futures spawn and commit while polled, so the queue is not locked meanwhile.
        let mut tasks = std::mem::take(&mut *self.inner.tasks.lock());
        let mut progressed = false;
        while let Poll::Ready(Some(())) = tasks.poll_next_unpin(cx) {
            progressed = true;
        }
        let mut queue = self.inner.tasks.lock();
        tasks.extend(std::mem::take(&mut *queue));
        *queue = tasks;
        progressed
    }

    /// Drive queued futures until none of them can make progress.
    ///
    /// Returns true if any future finished.
    pub fn run_until_stalled(&self) -> bool {
        let waker = waker(self.inner.signal.clone());
        let mut cx = Context::from_waker(&waker);
        let mut any = false;
        loop {
            self.inner.signal.woken.store(false, Ordering::SeqCst);
            let progressed = self.poll_tasks(&mut cx);
            any |= progressed;
            if !progressed && !self.inner.signal.woken.load(Ordering::SeqCst) {
                return any;
            }
        }
    }

    /// Drive queued futures until the queue is empty, yielding to the calling
    /// executor while they wait.
    pub async fn settle(&self) {
        futures::future::poll_fn(|cx| {
            self.inner.signal.waker.register(cx.waker());
            loop {
                self.inner.signal.woken.store(false, Ordering::SeqCst);
                let progressed = self.poll_tasks(cx);
                if self.inner.tasks.lock().is_empty() {
                    return Poll::Ready(());
                }
                if !progressed && !self.inner.signal.woken.load(Ordering::SeqCst) {
                    return Poll::Pending;
                }
            }
        })
        .await
    }
}

/// Builder for [`Runtime`] with customizable settings.
///
/// # Example
///
/// ```
/// use memo_flow::{NoopTracer, Runtime};
/// use std::sync::Arc;
///
/// let runtime = Runtime::builder()
///     .tracer(Arc::new(NoopTracer))
///     .max_reaction_iterations(10)
///     .build();
/// # let _ = runtime;
/// ```
pub struct RuntimeBuilder {
    tracer: Arc<dyn Tracer>,
    max_reaction_iterations: usize,
}

impl Default for RuntimeBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl RuntimeBuilder {
    /// Create a new builder with default settings.
    pub fn new() -> Self {
        Self {
            tracer: Arc::new(NoopTracer),
            max_reaction_iterations: DEFAULT_MAX_REACTION_ITERATIONS,
        }
    }

    /// Set the tracer that receives runtime and cell events.
    pub fn tracer(mut self, tracer: Arc<dyn Tracer>) -> Self {
        self.tracer = tracer;
        self
    }

    /// Set how many rounds of reactions one flush may run before the rest are
    /// dropped and [`Tracer::on_reaction_limit`] is called.
    ///
    /// Values below 1 are raised to 1.
    pub fn max_reaction_iterations(mut self, iterations: usize) -> Self {
        self.max_reaction_iterations = iterations.max(1);
        self
    }

    /// Build the runtime.
    pub fn build(self) -> Runtime {
        Runtime {
            inner: Arc::new(RuntimeInner {
                id: NEXT_RUNTIME_ID.fetch_add(1, Ordering::Relaxed),
                graph: Mutex::new(Graph::default()),
                scheduler: Mutex::new(Scheduler::default()),
                tasks: Mutex::new(FuturesUnordered::new()),
                signal: Arc::new(WakeSignal::default()),
                tracer: self.tracer,
                max_reaction_iterations: self.max_reaction_iterations,
                next_memo_id: AtomicU64::new(1),
                clock: AtomicU64::new(0),
            }),
        }
    }
}
