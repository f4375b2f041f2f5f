//! Tracer trait for observing cell and runtime activity.
//!
//! This module defines the [`Tracer`] trait and related types. The default
//! [`NoopTracer`] discards every event. With the `tracing` feature enabled,
//! [`TracingTracer`] forwards events to the `tracing` crate.
//!
//! # Example
//!
//! ```
//! use std::sync::atomic::{AtomicUsize, Ordering};
//! use std::sync::Arc;
//!
//! use memo_flow::{InvocationId, InvocationKind, Runtime, Tracer, TracerMemoKey};
//!
//! #[derive(Default)]
//! struct CountInvocations(AtomicUsize);
//!
//! impl Tracer for CountInvocations {
//!     fn on_invocation_start(&self, _: &TracerMemoKey, _: InvocationId, _: InvocationKind) {
//!         self.0.fetch_add(1, Ordering::Relaxed);
//!     }
//! }
//!
//! let tracer = Arc::new(CountInvocations::default());
//! let runtime = Runtime::builder().tracer(tracer.clone()).build();
//! # let _ = runtime;
//! ```

use std::fmt;
use std::sync::Arc;

use crate::invocation::{InvocationId, InvocationKind};
use crate::node::NodeId;
use crate::status::StatusKind;

/// Runtime-unique identifier of a cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MemoId(pub u64);

/// Identifies a cell in tracer events.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TracerMemoKey {
    /// Runtime-unique id.
    pub id: MemoId,
    /// Name given with `MemoBuilder::name`, if any.
    pub name: Option<Arc<str>>,
}

impl TracerMemoKey {
    /// Create a new tracer memo key.
    #[inline]
    pub fn new(id: MemoId, name: Option<Arc<str>>) -> Self {
        Self { id, name }
    }
}

impl fmt::Display for TracerMemoKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.name {
            Some(name) => write!(f, "{}#{}", name, self.id.0),
            None => write!(f, "memo#{}", self.id.0),
        }
    }
}

/// How an invocation's outcome was committed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommitOutcome {
    /// A value committed through `ResolveSync` or `Resolution::Sync`.
    Sync,
    /// A value committed when the producer's future resolved.
    Complete,
    /// The producer's future rejected.
    Error {
        /// Display of the error.
        message: String,
    },
}

/// Tracer trait for observing cells and the runtime.
///
/// All methods have empty default implementations, so implementors only
/// override the events they care about.
///
/// Implementations must be `Send + Sync`; events are reported from whichever
/// thread drives the runtime.
pub trait Tracer: Send + Sync + 'static {
    /// Called when a cell is built.
    #[inline]
    fn on_memo_created(&self, _memo: &TracerMemoKey) {}

    /// Called each time a cell calls its producer.
    #[inline]
    fn on_invocation_start(&self, _memo: &TracerMemoKey, _id: InvocationId, _kind: InvocationKind) {}

    /// Called when an invocation's outcome is committed to the cell.
    #[inline]
    fn on_commit(&self, _memo: &TracerMemoKey, _id: InvocationId, _outcome: &CommitOutcome) {}

    /// Called when an outcome or a deferred callback is dropped because a newer
    /// invocation is current.
    #[inline]
    fn on_stale_dropped(&self, _memo: &TracerMemoKey, _id: InvocationId, _current: InvocationId) {
    }

    /// Called when a read that would invoke the producer stops at a dependency
    /// that is not complete. Reads through `peek_status` report nothing.
    #[inline]
    fn on_gate_blocked(&self, _memo: &TracerMemoKey, _dependency: usize, _status: StatusKind) {}

    /// Called before a reaction re-runs.
    #[inline]
    fn on_reaction_run(&self, _reaction: NodeId) {}

    /// Called when reactions kept scheduling each other past the configured
    /// iteration limit and the remaining ones were dropped.
    #[inline]
    fn on_reaction_limit(&self, _iterations: usize, _dropped: usize) {}
}

/// Tracer that discards all events.
///
/// This is the default tracer of a [`Runtime`](crate::Runtime).
pub struct NoopTracer;

impl Tracer for NoopTracer {}

/// Tracer that forwards events to the `tracing` crate.
#[cfg(feature = "tracing")]
pub struct TracingTracer;

#[cfg(feature = "tracing")]
impl Tracer for TracingTracer {
    fn on_memo_created(&self, memo: &TracerMemoKey) {
        tracing::trace!(memo = %memo, "memo created");
    }

    fn on_invocation_start(&self, memo: &TracerMemoKey, id: InvocationId, kind: InvocationKind) {
        tracing::debug!(memo = %memo, invocation = id.0, ?kind, "invocation started");
    }

    fn on_commit(&self, memo: &TracerMemoKey, id: InvocationId, outcome: &CommitOutcome) {
        match outcome {
            CommitOutcome::Error { message } => {
                tracing::warn!(memo = %memo, invocation = id.0, error = %message, "producer rejected")
            }
            _ => tracing::debug!(memo = %memo, invocation = id.0, ?outcome, "outcome committed"),
        }
    }

    fn on_stale_dropped(&self, memo: &TracerMemoKey, id: InvocationId, current: InvocationId) {
        tracing::debug!(
            memo = %memo,
            invocation = id.0,
            current = current.0,
            "stale outcome dropped"
        );
    }

    fn on_gate_blocked(&self, memo: &TracerMemoKey, dependency: usize, status: StatusKind) {
        tracing::trace!(memo = %memo, dependency, %status, "waiting on dependency");
    }

    fn on_reaction_run(&self, reaction: NodeId) {
        tracing::trace!(?reaction, "reaction run");
    }

    fn on_reaction_limit(&self, iterations: usize, dropped: usize) {
        tracing::error!(
            iterations,
            dropped,
            "reactions did not converge; dropping the remaining ones"
        );
    }
}
