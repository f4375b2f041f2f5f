//! Type-erased dependencies of a cell.

use std::sync::Arc;

use crate::tracer::TracerMemoKey;
use crate::{MemoError, Status, StatusKind};

/// Something a cell can wait on before invoking its producer.
///
/// [`Memo`](crate::Memo) implements this for every result type, which lets one
/// cell wait on cells of other types. All reads subscribe the current
/// evaluation like the matching methods of `Memo`.
pub trait Awaitable: Send + Sync {
    /// Status, invoking the producer if needed.
    fn status(&self) -> StatusKind;

    /// Status, never invoking the producer.
    fn peek_status(&self) -> StatusKind;

    /// The first error visible through this value, if any.
    fn error(&self) -> Option<MemoError>;

    /// Status together with its error, taken from one evaluation.
    fn probe(&self) -> Status<()>;

    /// The cell behind this value, for `Debug` output.
    fn key(&self) -> Option<&TracerMemoKey> {
        None
    }
}

/// A dependency in a cell's await list.
///
/// This is cheap to clone - all data is behind `Arc`.
#[derive(Clone)]
pub struct Dependency(Arc<dyn Awaitable>);

impl Dependency {
    /// Wrap any awaitable value.
    pub fn new(awaitable: Arc<dyn Awaitable>) -> Self {
        Dependency(awaitable)
    }

    /// Status, invoking the dependency's producer if needed.
    pub fn status(&self) -> StatusKind {
        self.0.status()
    }

    /// Status, never invoking the dependency's producer.
    pub fn peek_status(&self) -> StatusKind {
        self.0.peek_status()
    }

    /// The dependency's error, if any.
    pub fn error(&self) -> Option<MemoError> {
        self.0.error()
    }

    pub(crate) fn probe(&self) -> Status<()> {
        self.0.probe()
    }
}

impl std::fmt::Debug for Dependency {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.0.key() {
            Some(key) => write!(f, "Dependency({})", key),
            None => f.write_str("Dependency(..)"),
        }
    }
}

/// Boxed function returning a cell's current await list.
pub type DependencyFn = Box<dyn Fn() -> Vec<Dependency> + Send + Sync>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Fixed status, counting forced reads.
    struct Fixed {
        kind: StatusKind,
        forced: AtomicUsize,
    }

    impl Awaitable for Fixed {
        fn status(&self) -> StatusKind {
            self.forced.fetch_add(1, Ordering::SeqCst);
            self.kind
        }

        fn peek_status(&self) -> StatusKind {
            self.kind
        }

        fn error(&self) -> Option<MemoError> {
            (self.kind == StatusKind::Error).then(|| MemoError::msg("fixed"))
        }

        fn probe(&self) -> Status<()> {
            match self.status() {
                StatusKind::Pending => Status::Pending { result: None },
                StatusKind::Complete => Status::Complete { result: () },
                StatusKind::Error => Status::Error {
                    result: None,
                    error: MemoError::msg("fixed"),
                },
            }
        }
    }

    #[test]
    fn test_dependency_delegates() {
        let fixed = Arc::new(Fixed {
            kind: StatusKind::Error,
            forced: AtomicUsize::new(0),
        });
        let dep = Dependency::new(fixed.clone());

        assert_eq!(dep.peek_status(), StatusKind::Error);
        assert_eq!(fixed.forced.load(Ordering::SeqCst), 0);

        assert_eq!(dep.status(), StatusKind::Error);
        assert!(dep.error().is_some());
        assert!(dep.probe().is_error());
        assert_eq!(fixed.forced.load(Ordering::SeqCst), 2);
        assert_eq!(format!("{:?}", dep), "Dependency(..)");
    }
}
