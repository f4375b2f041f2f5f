//! Error types for memoized cells.

use std::fmt;
use std::sync::Arc;

/// The error a cell reports when its producer rejected.
///
/// There is a single kind of cell error: the future returned by the producer
/// settled with a failure. Failures of dependencies are not wrapped; they are
/// surfaced unchanged through [`Memo::error`](crate::Memo::error).
///
/// Any type implementing `Into<anyhow::Error>` converts into `MemoError`, so
/// producers can use the `?` operator:
///
/// ```
/// use memo_flow::MemoError;
///
/// fn parse(input: &str) -> Result<i32, MemoError> {
///     Ok(input.parse::<i32>()?)
/// }
///
/// assert!(parse("nope").is_err());
/// ```
#[derive(Clone)]
pub struct MemoError(Arc<anyhow::Error>);

impl MemoError {
    /// Create an error from a message.
    pub fn msg(message: impl fmt::Display + fmt::Debug + Send + Sync + 'static) -> Self {
        MemoError(Arc::new(anyhow::Error::msg(message)))
    }

    /// Returns the shared inner error.
    pub fn inner(&self) -> &Arc<anyhow::Error> {
        &self.0
    }

    /// Attempts to downcast the inner error to a specific type.
    pub fn downcast_ref<E: std::error::Error + Send + Sync + 'static>(&self) -> Option<&E> {
        self.0.downcast_ref::<E>()
    }

    /// Returns `true` if the inner error is of type `E`.
    pub fn is<E: std::error::Error + Send + Sync + 'static>(&self) -> bool {
        self.downcast_ref::<E>().is_some()
    }

    /// Returns `true` if both values share the same underlying error.
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl fmt::Display for MemoError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "producer rejected: {}", self.0)
    }
}

impl fmt::Debug for MemoError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("MemoError").field(&self.0).finish()
    }
}

impl<T: Into<anyhow::Error>> From<T> for MemoError {
    fn from(err: T) -> Self {
        MemoError(Arc::new(err.into()))
    }
}

/// Errors raised while configuring a cell.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    /// `MemoBuilder::build` was called without a producer.
    #[error("memo `{name}` has no producer; call `invoke` before `build`")]
    MissingProducer {
        /// Name given to the builder, or `"<unnamed>"`.
        name: String,
    },
}
