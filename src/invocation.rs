//! Producer invocations and their resolutions.

use std::future::Future;

use futures::future::BoxFuture;
use futures::FutureExt;
use parking_lot::Mutex;

use crate::MemoError;

/// Identifies one call of a cell's producer.
///
/// Ids are cell-local and strictly increasing; `InvocationId(0)` means the
/// producer was never called.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, PartialOrd, Ord)]
pub struct InvocationId(pub u64);

impl InvocationId {
    /// The id following this one.
    #[must_use]
    pub fn next(self) -> Self {
        InvocationId(self.0 + 1)
    }
}

/// How an invocation resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InvocationKind {
    /// The producer supplied its value before returning.
    Sync,
    /// The producer returned a future that settles later.
    Async,
}

/// The invocation a cell currently recognizes as latest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Invocation {
    /// Id of the invocation.
    pub id: InvocationId,
    /// Whether it resolved synchronously.
    pub kind: InvocationKind,
}

/// What a producer returns.
pub enum Resolution<R> {
    /// The value is available now.
    Sync(R),
    /// The value arrives when the future settles.
    Async(BoxFuture<'static, Result<R, MemoError>>),
}

impl<R> Resolution<R> {
    /// A synchronous value.
    pub fn ready(value: R) -> Self {
        Resolution::Sync(value)
    }

    /// A future that settles with the value or rejects.
    pub fn future<F, E>(future: F) -> Self
    where
        F: Future<Output = Result<R, E>> + Send + 'static,
        R: 'static,
        E: Into<MemoError> + 'static,
    {
        Resolution::Async(future.map(|output| output.map_err(Into::into)).boxed())
    }

    /// A future that has already rejected with `error`.
    pub fn rejected(error: impl Into<MemoError>) -> Self
    where
        R: Send + 'static,
    {
        Resolution::Async(futures::future::ready(Err(error.into())).boxed())
    }
}

impl<R> std::fmt::Debug for Resolution<R>
where
    R: std::fmt::Debug,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Resolution::Sync(value) => write!(f, "Resolution::Sync({:?})", value),
            Resolution::Async(_) => write!(f, "Resolution::Async(..)"),
        }
    }
}

/// Handle a producer uses to resolve its invocation synchronously.
///
/// When [`resolve`](ResolveSync::resolve) is called, the invocation is
/// synchronous: the value commits immediately and whatever the producer
/// returns is disregarded, including a future that later rejects.
///
/// ```
/// use memo_flow::{Memo, MemoError, Resolution, Runtime};
///
/// let runtime = Runtime::new();
/// let memo = Memo::builder(&runtime)
///     .invoke(|resolve| {
///         resolve.resolve("cached");
///         Resolution::future(async { Ok::<_, MemoError>("fresh") })
///     })
///     .build()
///     .unwrap();
///
/// assert_eq!(memo.result(), Some("cached"));
/// ```
pub struct ResolveSync<R> {
    slot: Mutex<Option<R>>,
}

impl<R> ResolveSync<R> {
    pub(crate) fn new() -> Self {
        Self {
            slot: Mutex::new(None),
        }
    }

    /// Resolve the current invocation with `value`. Only the first call counts.
    pub fn resolve(&self, value: R) {
        let mut slot = self.slot.lock();
        if slot.is_none() {
            *slot = Some(value);
        }
    }

    /// Returns `true` once `resolve` was called.
    pub fn is_resolved(&self) -> bool {
        self.slot.lock().is_some()
    }

    pub(crate) fn into_value(self) -> Option<R> {
        self.slot.into_inner()
    }
}

/// Boxed producer of a cell.
pub type Producer<R> = Box<dyn Fn(&ResolveSync<R>) -> Resolution<R> + Send + Sync>;
