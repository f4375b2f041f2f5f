//! Lazy computed values that track what they read.
//!
//! # Design
//!
//! [`Computed<T>`] wraps a compute function and its cached result. Every
//! evaluation runs inside a tracking scope, so the nodes the function reads
//! become its sources. When any source changes, the runtime marks the value
//! dirty; the next [`get()`](Computed::get) recomputes and caches it.
//!
//! # Invariants
//!
//! 1. `get()` never returns a value computed before its latest invalidation.
//! 2. The compute function is called at most once per invalidation.
//! 3. Nothing is recomputed while nobody reads the value.
//! 4. Version increments by exactly 1 per recomputation.
//!
//! # Failure Modes
//!
//! - **Compute function panics**: the cached value remains from the last
//!   successful computation and the value stays dirty, so the next `get()`
//!   retries.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::node::{NodeId, NodeKind};
use crate::Runtime;

struct ComputedInner<T> {
    runtime: Runtime,
    node: NodeId,
    compute: Box<dyn Fn() -> T + Send + Sync>,
    /// Cached result (None only before first computation).
    cached: Mutex<Option<T>>,
    version: AtomicU64,
}

impl<T> Drop for ComputedInner<T> {
    fn drop(&mut self) {
        self.runtime.remove_node(self.node);
    }
}

/// A lazily-evaluated, memoized value derived from whatever its compute
/// function reads.
///
/// Cloning a `Computed` creates a new handle to the **same** inner state.
///
/// ```
/// use memo_flow::{Computed, Observable, Runtime};
///
/// let runtime = Runtime::new();
/// let width = Observable::new(&runtime, 3);
/// let area = {
///     let width = width.clone();
///     Computed::new(&runtime, move || width.get() * width.get())
/// };
///
/// assert_eq!(area.get(), 9);
/// width.set(4);
/// assert_eq!(area.get(), 16);
/// ```
pub struct Computed<T> {
    inner: Arc<ComputedInner<T>>,
}

impl<T> Clone for Computed<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: std::fmt::Debug> std::fmt::Debug for Computed<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Computed")
            .field("cached", &*self.inner.cached.lock())
            .field("dirty", &self.is_dirty())
            .field("version", &self.version())
            .finish()
    }
}

impl<T: Clone> Computed<T> {
    /// Create a computed value in `runtime`. Nothing is computed until the
    /// first `get()`.
    pub fn new(runtime: &Runtime, compute: impl Fn() -> T + Send + Sync + 'static) -> Self {
        Self {
            inner: Arc::new(ComputedInner {
                runtime: runtime.clone(),
                node: runtime.add_node(NodeKind::Computed),
                compute: Box::new(compute),
                cached: Mutex::new(None),
                version: AtomicU64::new(0),
            }),
        }
    }

    /// Get the current value, recomputing if any source changed.
    ///
    /// The current evaluation, if any, becomes an observer of this value.
    pub fn get(&self) -> T {
        let inner = &self.inner;
        inner.runtime.report_observed(inner.node);
        if !inner.runtime.is_dirty(inner.node) {
            if let Some(value) = inner.cached.lock().as_ref() {
                return value.clone();
            }
        }
        // Writes made while computing are delivered once the value is cached.
        let value = inner.runtime.batch(|| {
            let value = inner.runtime.track(inner.node, || (inner.compute)());
            *inner.cached.lock() = Some(value.clone());
            inner.version.fetch_add(1, Ordering::SeqCst);
            value
        });
        if !inner.runtime.is_dirty(inner.node) {
            // The caller holds the value as of now.
            inner.runtime.report_observed(inner.node);
        }
        value
    }

    /// The cached value without recomputing or subscribing.
    pub fn peek(&self) -> Option<T> {
        self.inner.cached.lock().clone()
    }
}

impl<T> Computed<T> {
    /// Whether the cached value is stale.
    pub fn is_dirty(&self) -> bool {
        self.inner.runtime.is_dirty(self.inner.node)
    }

    /// Force invalidation of the cached value. The next `get()` will
    /// recompute, and observers are invalidated.
    pub fn invalidate(&self) {
        self.inner.runtime.invalidate(self.inner.node);
    }

    /// Current version number. Increments by 1 on each recomputation.
    pub fn version(&self) -> u64 {
        self.inner.version.load(Ordering::SeqCst)
    }

    /// The graph node of this value.
    pub fn node(&self) -> NodeId {
        self.inner.node
    }
}
