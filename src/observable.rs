//! Mutable sources of the dependency graph.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::node::{NodeId, NodeKind};
use crate::Runtime;

/// A valueless source node.
///
/// State that lives outside the graph reports reads with
/// [`report_observed`](Atom::report_observed) and writes with
/// [`report_changed`](Atom::report_changed); observers of the atom are then
/// invalidated like observers of any other source.
pub struct Atom {
    runtime: Runtime,
    node: NodeId,
}

impl Atom {
    /// Create an atom in `runtime`.
    pub fn new(runtime: &Runtime) -> Self {
        Self {
            runtime: runtime.clone(),
            node: runtime.add_node(NodeKind::Atom),
        }
    }

    /// Record that the current evaluation depends on this atom.
    pub fn report_observed(&self) {
        self.runtime.report_observed(self.node);
    }

    /// Invalidate every observer of this atom.
    pub fn report_changed(&self) {
        self.runtime.report_changed(self.node);
    }

    /// Returns true if any evaluation currently depends on this atom.
    pub fn is_observed(&self) -> bool {
        self.runtime.observer_count(self.node) > 0
    }

    /// The graph node of this atom.
    pub fn node(&self) -> NodeId {
        self.node
    }
}

impl Drop for Atom {
    fn drop(&mut self) {
        self.runtime.remove_node(self.node);
    }
}

impl std::fmt::Debug for Atom {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Atom").field("node", &self.node).finish()
    }
}

struct ObservableInner<T> {
    atom: Atom,
    value: Mutex<T>,
    version: AtomicU64,
}

/// A shared, version-tracked value.
///
/// Reading with [`get`](Observable::get) inside an evaluation subscribes that
/// evaluation; [`set`](Observable::set) invalidates the subscribers.
///
/// Cloning an `Observable` creates a new handle to the **same** value.
///
/// # Invariants
///
/// 1. Version increments exactly once per mutation that changes the value.
/// 2. Setting a value equal to the current value is a no-op.
pub struct Observable<T> {
    inner: Arc<ObservableInner<T>>,
}

impl<T> Clone for Observable<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: std::fmt::Debug> std::fmt::Debug for Observable<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Observable")
            .field("value", &*self.inner.value.lock())
            .field("version", &self.version())
            .finish()
    }
}

impl<T> Observable<T> {
    /// Create an observable in `runtime` holding `value`.
    pub fn new(runtime: &Runtime, value: T) -> Self {
        Self {
            inner: Arc::new(ObservableInner {
                atom: Atom::new(runtime),
                value: Mutex::new(value),
                version: AtomicU64::new(0),
            }),
        }
    }

    /// Access the value by reference, subscribing the current evaluation.
    pub fn with<U>(&self, f: impl FnOnce(&T) -> U) -> U {
        self.inner.atom.report_observed();
        let value = self.inner.value.lock();
        f(&value)
    }

    /// Mutate the value in place and notify subscribers unconditionally.
    pub fn update(&self, f: impl FnOnce(&mut T)) {
        {
            let mut value = self.inner.value.lock();
            f(&mut value);
        }
        self.inner.version.fetch_add(1, Ordering::SeqCst);
        self.inner.atom.report_changed();
    }

    /// Number of changes applied so far.
    pub fn version(&self) -> u64 {
        self.inner.version.load(Ordering::SeqCst)
    }

    /// The graph node of this observable.
    pub fn node(&self) -> NodeId {
        self.inner.atom.node()
    }
}

impl<T: Clone> Observable<T> {
    /// Get a clone of the value, subscribing the current evaluation.
    pub fn get(&self) -> T {
        self.with(T::clone)
    }

    /// Get a clone of the value without subscribing.
    pub fn get_untracked(&self) -> T {
        self.inner.value.lock().clone()
    }
}

impl<T: PartialEq> Observable<T> {
    /// Replace the value. Does nothing if `value` equals the current value.
    pub fn set(&self, value: T) {
        {
            let mut current = self.inner.value.lock();
            if *current == value {
                return;
            }
            *current = value;
        }
        self.inner.version.fetch_add(1, Ordering::SeqCst);
        self.inner.atom.report_changed();
    }
}
