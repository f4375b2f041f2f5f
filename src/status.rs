//! Tri-state status of a memoized cell.

use std::fmt;

use crate::MemoError;

/// The kind of a cell's status, without its payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StatusKind {
    /// The latest invocation has not settled yet, or a dependency is pending.
    Pending,
    /// The latest invocation produced a value.
    Complete,
    /// The latest invocation rejected, or a dependency is in error.
    Error,
}

impl StatusKind {
    /// Returns the lowercase name of this status.
    pub fn as_str(self) -> &'static str {
        match self {
            StatusKind::Pending => "pending",
            StatusKind::Complete => "complete",
            StatusKind::Error => "error",
        }
    }
}

impl fmt::Display for StatusKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl PartialEq<&str> for StatusKind {
    fn eq(&self, other: &&str) -> bool {
        self.as_str() == *other
    }
}

/// A consistent view of a cell: its status together with the derived result
/// and error.
///
/// `result` and `error` only exist as part of a tag, so they can never
/// disagree with the status.
#[derive(Debug, Clone)]
pub enum Status<R> {
    /// Waiting. `result` is the last known good value, or the default.
    Pending {
        /// Last known good value, or the configured default.
        result: Option<R>,
    },
    /// Failed. `result` is the configured default.
    Error {
        /// The configured default.
        result: Option<R>,
        /// The error of the cell or of the first failing dependency.
        error: MemoError,
    },
    /// Produced a value.
    Complete {
        /// The committed value.
        result: R,
    },
}

impl<R> Status<R> {
    /// The kind of this status.
    pub fn kind(&self) -> StatusKind {
        match self {
            Status::Pending { .. } => StatusKind::Pending,
            Status::Error { .. } => StatusKind::Error,
            Status::Complete { .. } => StatusKind::Complete,
        }
    }

    /// The result carried by this status, if any.
    pub fn result(&self) -> Option<&R> {
        match self {
            Status::Pending { result } | Status::Error { result, .. } => result.as_ref(),
            Status::Complete { result } => Some(result),
        }
    }

    /// Consume the status and return its result.
    pub fn into_result(self) -> Option<R> {
        match self {
            Status::Pending { result } | Status::Error { result, .. } => result,
            Status::Complete { result } => Some(result),
        }
    }

    /// The error carried by this status, if any.
    pub fn error(&self) -> Option<&MemoError> {
        match self {
            Status::Error { error, .. } => Some(error),
            _ => None,
        }
    }

    /// Returns `true` for [`Status::Pending`].
    pub fn is_pending(&self) -> bool {
        matches!(self, Status::Pending { .. })
    }

    /// Returns `true` for [`Status::Complete`].
    pub fn is_complete(&self) -> bool {
        matches!(self, Status::Complete { .. })
    }

    /// Returns `true` for [`Status::Error`].
    pub fn is_error(&self) -> bool {
        matches!(self, Status::Error { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_display() {
        assert_eq!(StatusKind::Pending.to_string(), "pending");
        assert_eq!(StatusKind::Complete, "complete");
        assert_eq!(StatusKind::Error.as_str(), "error");
    }

    #[test]
    fn test_status_projections() {
        let pending: Status<i32> = Status::Pending { result: Some(1) };
        assert_eq!(pending.kind(), StatusKind::Pending);
        assert_eq!(pending.result(), Some(&1));
        assert!(pending.error().is_none());

        let error: Status<i32> = Status::Error {
            result: None,
            error: MemoError::msg("nope"),
        };
        assert!(error.is_error());
        assert!(error.result().is_none());
        assert!(error.error().is_some());

        let complete = Status::Complete { result: 7 };
        assert!(complete.is_complete());
        assert_eq!(complete.into_result(), Some(7));
    }
}
