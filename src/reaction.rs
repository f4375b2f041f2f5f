//! Side effects that re-run when what they read changes.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use crate::node::{NodeId, Rerun};
use crate::Runtime;

struct ReactionInner {
    runtime: Runtime,
    node: NodeId,
    effect: Mutex<Box<dyn FnMut() + Send>>,
    disposed: AtomicBool,
}

impl Rerun for ReactionInner {
    fn rerun(&self) {
        if self.disposed.load(Ordering::SeqCst) {
            return;
        }
        let runtime = &self.runtime;
        runtime.batch(|| {
            runtime.track(self.node, || {
                let mut effect = self.effect.lock();
                (*effect)()
            })
        });
    }
}

/// Handle of an effect created with [`Runtime::autorun`].
///
/// The effect runs once when the reaction is created, then again at the end of
/// every batch in which one of the nodes it read during its last run changed.
/// Dropping the handle disposes the reaction.
pub struct Reaction {
    inner: Arc<ReactionInner>,
}

impl Reaction {
    pub(crate) fn new(runtime: &Runtime, effect: impl FnMut() + Send + 'static) -> Self {
        let inner = Arc::new_cyclic(|weak: &Weak<ReactionInner>| {
            let rerun: Weak<dyn Rerun> = weak.clone();
            ReactionInner {
                runtime: runtime.clone(),
                node: runtime.add_reaction_node(rerun),
                effect: Mutex::new(Box::new(effect)),
                disposed: AtomicBool::new(false),
            }
        });
        inner.rerun();
        Self { inner }
    }

    /// Stop re-running the effect and unlink it from everything it read.
    pub fn dispose(self) {
        drop(self);
    }

    /// The graph node of this reaction.
    pub fn node(&self) -> NodeId {
        self.inner.node
    }
}

impl Drop for Reaction {
    fn drop(&mut self) {
        self.inner.disposed.store(true, Ordering::SeqCst);
        self.inner.runtime.remove_node(self.inner.node);
    }
}

impl std::fmt::Debug for Reaction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reaction")
            .field("node", &self.inner.node)
            .field("disposed", &self.inner.disposed.load(Ordering::SeqCst))
            .finish()
    }
}
