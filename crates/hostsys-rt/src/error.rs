//! Error types for hostsys-rt.
//!
//! Every failure that originates in the OS carries the raw platform error
//! code (see [`Error::raw_os_error`]) so the host's translation layer can
//! render it. Timeouts are not errors: waits report them through
//! [`WaitStatus`](crate::sync::WaitStatus) and `Channel::get` through `None`.

use std::io;

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Status codes returned across the C ABI.
pub mod status {
    pub const OK: i32 = 0;
    pub const TIMED_OUT: i32 = 1;
    pub const OS_ERROR: i32 = -1;
    pub const USAGE_ERROR: i32 = -2;
    pub const INIT_FAILURE: i32 = -3;
    pub const INTERRUPTED: i32 = -4;
    pub const CAPACITY: i32 = -5;
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A resource could not be created. Nothing partially built escapes.
    #[error("failed to initialize {what}: {source}")]
    Initialization {
        what: &'static str,
        #[source]
        source: io::Error,
    },

    /// The caller broke a precondition.
    #[error("usage error: {0}")]
    Usage(#[from] UsageError),

    /// A native call failed.
    #[error("{op} failed: {source}")]
    Os {
        op: &'static str,
        #[source]
        source: io::Error,
    },

    /// A blocking call was interrupted and could not be retried.
    #[error("{op} interrupted by a signal")]
    Interrupted { op: &'static str },

    /// The polling backend cannot hold this descriptor.
    #[error("descriptor {fd} exceeds backend capacity of {limit}")]
    Capacity { fd: i32, limit: usize },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum UsageError {
    #[error("message must contain at least one value")]
    EmptyMessage,
    #[error("threading not initialized")]
    NotInitialized,
    #[error("unknown or stale handle")]
    UnknownHandle,
    #[error("handle refers to a different kind of resource")]
    WrongResource,
    #[error("descriptor already registered")]
    AlreadyRegistered,
    #[error("descriptor not registered")]
    NotRegistered,
    #[error("invalid descriptor")]
    InvalidDescriptor,
    #[error("invalid argument")]
    InvalidArgument,
}

impl Error {
    pub(crate) fn init(what: &'static str, source: io::Error) -> Self {
        Self::Initialization { what, source }
    }

    /// Wrap `errno` after a failed libc call.
    pub(crate) fn last_os(op: &'static str) -> Self {
        Self::os(op, io::Error::last_os_error())
    }

    /// Wrap an error code returned directly (pthread style).
    pub(crate) fn from_code(op: &'static str, code: i32) -> Self {
        Self::os(op, io::Error::from_raw_os_error(code))
    }

    pub(crate) fn os(op: &'static str, source: io::Error) -> Self {
        if source.kind() == io::ErrorKind::Interrupted {
            Self::Interrupted { op }
        } else {
            Self::Os { op, source }
        }
    }

    /// The raw platform error code, when the failure came from the OS.
    pub fn raw_os_error(&self) -> Option<i32> {
        match self {
            Self::Initialization { source, .. } | Self::Os { source, .. } => source.raw_os_error(),
            Self::Interrupted { .. } => Some(libc::EINTR),
            Self::Usage(_) => None,
            Self::Capacity { .. } => Some(libc::EINVAL),
        }
    }

    /// Map to the C ABI status code.
    pub fn status(&self) -> i32 {
        match self {
            Self::Initialization { .. } => status::INIT_FAILURE,
            Self::Usage(_) => status::USAGE_ERROR,
            Self::Os { .. } => status::OS_ERROR,
            Self::Interrupted { .. } => status::INTERRUPTED,
            Self::Capacity { .. } => status::CAPACITY,
        }
    }

    pub fn is_usage(&self) -> bool {
        matches!(self, Self::Usage(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn os_errors_keep_raw_code() {
        let err = Error::from_code("pthread_mutex_init", libc::ENOMEM);
        assert_eq!(err.raw_os_error(), Some(libc::ENOMEM));
        assert_eq!(err.status(), status::OS_ERROR);
        assert!(err.to_string().starts_with("pthread_mutex_init failed"));
    }

    #[test]
    fn eintr_becomes_interrupted() {
        let err = Error::from_code("select", libc::EINTR);
        assert!(matches!(err, Error::Interrupted { op: "select" }));
        assert_eq!(err.status(), status::INTERRUPTED);
    }

    #[test]
    fn usage_errors_have_no_os_code() {
        let err: Error = UsageError::EmptyMessage.into();
        assert!(err.is_usage());
        assert_eq!(err.raw_os_error(), None);
        assert_eq!(err.status(), status::USAGE_ERROR);
    }
}
