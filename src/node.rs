//! Dependency graph nodes and read tracking.

use std::cell::RefCell;
use std::sync::Weak;

use slab::Slab;

/// Identifier of a node in a runtime's dependency graph.
///
/// A node id is a slab slot paired with a generation, so an id held after its
/// node was removed never aliases a node created later in the same slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId {
    key: usize,
    generation: u64,
}

/// What a node represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum NodeKind {
    /// A mutable source with no inputs.
    Atom,
    /// A memoized derivation: both an observer and a source.
    Computed,
    /// A side effect re-run when its sources change.
    Reaction,
}

/// Something the runtime can re-run after its sources changed.
pub(crate) trait Rerun: Send + Sync {
    fn rerun(&self);
}

/// Node is the graph-side state of an atom, computed value, or reaction.
///
/// The values themselves live in the handles; the graph only knows edges and
/// the dirty flag.
pub(crate) struct Node {
    generation: u64,
    kind: NodeKind,
    /// Set when a source changed since the last evaluation.
    dirty: bool,
    /// Nodes read during the last evaluation.
    sources: Vec<NodeId>,
    /// Nodes that read this node during their last evaluation.
    observers: Vec<NodeId>,
    reaction: Option<Weak<dyn Rerun>>,
    /// Open evaluations of this node.
    evaluating: usize,
    /// Sources that changed during the open evaluation, with the change time.
    changed_sources: Vec<(NodeId, u64)>,
    /// Invalidated directly during the open evaluation.
    forced: bool,
}

#[derive(Default)]
pub(crate) struct Graph {
    nodes: Slab<Node>,
    next_generation: u64,
}

impl Graph {
    pub fn insert(&mut self, kind: NodeKind, reaction: Option<Weak<dyn Rerun>>) -> NodeId {
        let generation = self.next_generation;
        self.next_generation += 1;
        let key = self.nodes.insert(Node {
            generation,
            kind,
            // Derivations have never been evaluated.
            dirty: kind != NodeKind::Atom,
            sources: Vec::new(),
            observers: Vec::new(),
            reaction,
            evaluating: 0,
            changed_sources: Vec::new(),
            forced: false,
        });
        NodeId { key, generation }
    }

    fn get(&self, id: NodeId) -> Option<&Node> {
        self.nodes
            .get(id.key)
            .filter(|node| node.generation == id.generation)
    }

    fn get_mut(&mut self, id: NodeId) -> Option<&mut Node> {
        self.nodes
            .get_mut(id.key)
            .filter(|node| node.generation == id.generation)
    }

    pub fn contains(&self, id: NodeId) -> bool {
        self.get(id).is_some()
    }

    /// Remove a node and unlink it from both sides of every edge.
    pub fn remove(&mut self, id: NodeId) {
        if !self.contains(id) {
            return;
        }
        let node = self.nodes.remove(id.key);
        for source in node.sources {
            if let Some(source) = self.get_mut(source) {
                source.observers.retain(|o| *o != id);
            }
        }
        for observer in node.observers {
            if let Some(observer) = self.get_mut(observer) {
                observer.sources.retain(|s| *s != id);
            }
        }
    }

    /// Returns true if the node must be re-evaluated. Unknown nodes are dirty.
    pub fn is_dirty(&self, id: NodeId) -> bool {
        self.get(id).map(|node| node.dirty).unwrap_or(true)
    }

    pub fn set_clean(&mut self, id: NodeId) {
        if let Some(node) = self.get_mut(id) {
            node.dirty = false;
        }
    }

    pub fn observer_count(&self, id: NodeId) -> usize {
        self.get(id).map(|node| node.observers.len()).unwrap_or(0)
    }

    pub fn reaction(&self, id: NodeId) -> Option<Weak<dyn Rerun>> {
        self.get(id).and_then(|node| node.reaction.clone())
    }

    /// Replace the sources of an observer with the reads of its latest evaluation.
    pub fn replace_sources(&mut self, observer: NodeId, sources: Vec<NodeId>) {
        let Some(node) = self.get_mut(observer) else {
            return;
        };
        let previous = std::mem::take(&mut node.sources);
        for source in previous.iter().filter(|s| !sources.contains(s)) {
            if let Some(source) = self.get_mut(*source) {
                source.observers.retain(|o| *o != observer);
            }
        }
        let mut kept = Vec::with_capacity(sources.len());
        for source in sources {
            // Reads of removed nodes are not edges.
            let Some(source_node) = self.get_mut(source) else {
                continue;
            };
            if !source_node.observers.contains(&observer) {
                source_node.observers.push(observer);
            }
            kept.push(source);
        }
        if let Some(node) = self.get_mut(observer) {
            node.sources = kept;
        }
    }

    /// Mark everything downstream of `changed` dirty, returning the reactions
    /// that must be scheduled.
    ///
    /// Propagation stops at nodes that are already dirty; their observers were
    /// marked when they became dirty. Nodes being evaluated remember which of
    /// their sources changed at time `at`, dirty or not.
    pub fn invalidate_from(&mut self, changed: NodeId, at: u64) -> Vec<NodeId> {
        let mut reactions = Vec::new();
        let mut stack: Vec<(NodeId, NodeId)> = match self.get(changed) {
            Some(node) => node.observers.iter().map(|o| (*o, changed)).collect(),
            None => return reactions,
        };
        while let Some((id, via)) = stack.pop() {
            let Some(node) = self.get_mut(id) else {
                continue;
            };
            if node.evaluating > 0 {
                node.changed_sources.push((via, at));
            }
            if node.dirty {
                continue;
            }
            node.dirty = true;
            match node.kind {
                NodeKind::Computed => stack.extend(node.observers.iter().map(|o| (*o, id))),
                NodeKind::Reaction => reactions.push(id),
                NodeKind::Atom => {}
            }
        }
        reactions
    }

    /// Mark a node dirty regardless of its sources and propagate downstream.
    pub fn force_dirty(&mut self, id: NodeId, at: u64) -> Vec<NodeId> {
        let mut reactions = self.invalidate_from(id, at);
        if let Some(node) = self.get_mut(id) {
            if node.evaluating > 0 {
                node.forced = true;
            }
            if !node.dirty {
                node.dirty = true;
                if node.kind == NodeKind::Reaction {
                    reactions.push(id);
                }
            }
        }
        reactions
    }

    /// Mark `id` clean and open an evaluation of it.
    pub fn begin_evaluation(&mut self, id: NodeId) {
        if let Some(node) = self.get_mut(id) {
            node.dirty = false;
            if node.evaluating == 0 {
                node.changed_sources.clear();
                node.forced = false;
            }
            node.evaluating += 1;
        }
    }

    /// Close an evaluation of `id` that read `reads`, each with the time of
    /// its last read.
    ///
    /// A node invalidated while it evaluated stays dirty unless it read every
    /// changed source again after the change and all of its sources are clean.
    pub fn finish_evaluation(&mut self, id: NodeId, reads: Vec<(NodeId, u64)>) {
        let Some(node) = self.get_mut(id) else {
            return;
        };
        node.evaluating = node.evaluating.saturating_sub(1);
        let outermost = node.evaluating == 0;
        let changed = if outermost {
            std::mem::take(&mut node.changed_sources)
        } else {
            Vec::new()
        };
        let forced = outermost && std::mem::take(&mut node.forced);

        let sources: Vec<NodeId> = reads.iter().map(|(source, _)| *source).collect();
        self.replace_sources(id, sources);
        if !outermost || forced || !self.is_dirty(id) {
            return;
        }
        let caught_up = changed.iter().all(|(via, at)| {
            reads
                .iter()
                .find(|(source, _)| source == via)
                .map(|(_, seen)| seen >= at)
                .unwrap_or(true)
        });
        let sources_clean = reads.iter().all(|(source, _)| match self.get(*source) {
            Some(source) => !source.dirty,
            None => true,
        });
        if caught_up && sources_clean {
            self.set_clean(id);
        }
    }

    /// Close an evaluation that did not finish.
    pub fn abandon_evaluation(&mut self, id: NodeId) {
        if let Some(node) = self.get_mut(id) {
            node.evaluating = node.evaluating.saturating_sub(1);
            if node.evaluating == 0 {
                node.changed_sources.clear();
                node.forced = false;
            }
        }
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }
}

/// One evaluation in progress on this thread.
struct Frame {
    runtime: u64,
    /// `None` for untracked scopes, which swallow reads.
    observer: Option<NodeId>,
    /// Nodes read so far with the time of their latest read.
    reads: Vec<(NodeId, u64)>,
}

// Thread-local stack of evaluations, innermost last.
thread_local! {
    static TRACKING: RefCell<Vec<Frame>> = const { RefCell::new(Vec::new()) };
}

/// Record a read of `node` at time `at` by the innermost evaluation of `runtime`.
pub(crate) fn record_read(runtime: u64, node: NodeId, at: u64) {
    TRACKING.with(|stack| {
        let mut stack = stack.borrow_mut();
        let Some(frame) = stack.last_mut() else {
            return;
        };
        if frame.runtime != runtime || frame.observer.is_none() || frame.observer == Some(node) {
            return;
        }
        match frame.reads.iter_mut().find(|(read, _)| *read == node) {
            Some((_, seen)) => *seen = (*seen).max(at),
            None => frame.reads.push((node, at)),
        }
    });
}

/// Guard for a pushed tracking frame.
///
/// `finish` pops the frame and returns the reads. Dropping the guard without
/// finishing (a panicking evaluation) pops the frame and discards the reads.
pub(crate) struct TrackingScope {
    depth: usize,
    finished: bool,
}

impl TrackingScope {
    pub fn enter(runtime: u64, observer: Option<NodeId>) -> Self {
        let depth = TRACKING.with(|stack| {
            let mut stack = stack.borrow_mut();
            stack.push(Frame {
                runtime,
                observer,
                reads: Vec::new(),
            });
            stack.len()
        });
        Self {
            depth,
            finished: false,
        }
    }

    pub fn finish(mut self) -> Vec<(NodeId, u64)> {
        self.finished = true;
        self.pop()
    }

    fn pop(&self) -> Vec<(NodeId, u64)> {
        TRACKING.with(|stack| {
            let mut stack = stack.borrow_mut();
            stack.truncate(self.depth);
            stack.pop().map(|frame| frame.reads).unwrap_or_default()
        })
    }
}

impl Drop for TrackingScope {
    fn drop(&mut self) {
        if !self.finished {
            self.pop();
        }
    }
}
