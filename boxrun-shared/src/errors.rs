//! Error taxonomy for process orchestration.
//!
//! Variants follow the recovery path:
//! - [`BoxrunError::Config`], [`BoxrunError::RootfsNotFound`], [`BoxrunError::Factory`]:
//!   fatal to the invocation, raised before anything is allocated
//! - [`BoxrunError::Start`], [`BoxrunError::Ownership`]: fatal to one launch,
//!   the sandbox can still be torn down cleanly
//! - [`BoxrunError::Forwarding`]: raised after start, teardown still proceeds

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Result alias used across the workspace.
pub type BoxrunResult<T> = Result<T, BoxrunError>;

/// Errors raised while creating sandboxes and launching processes in them.
#[derive(Debug, Error)]
pub enum BoxrunError {
    /// Malformed environment or configuration (not retryable).
    #[error("config: {0}")]
    Config(String),

    /// Configured root filesystem does not exist.
    #[error("rootfs ({}) does not exist", .0.display())]
    RootfsNotFound(PathBuf),

    /// Sandbox construction failed.
    #[error("factory: {0}")]
    Factory(String),

    /// Process could not be started inside an existing sandbox.
    #[error("start: {0}")]
    Start(String),

    /// Re-owning a descriptor for the sandbox's mapped root failed.
    #[error("ownership of fd {fd} to {uid}:{gid}: {source}")]
    Ownership {
        fd: i32,
        uid: u32,
        gid: u32,
        #[source]
        source: io::Error,
    },

    /// Signal or I/O relay failed after the process started.
    #[error("forwarding: {0}")]
    Forwarding(String),

    /// Generic IO error (catch-all).
    #[error("io: {0}")]
    Io(#[from] io::Error),

    /// Invariant violation inside the orchestrator.
    #[error("internal: {0}")]
    Internal(String),
}

impl BoxrunError {
    /// Create an ownership error.
    pub fn ownership(fd: i32, uid: u32, gid: u32, source: io::Error) -> Self {
        Self::Ownership {
            fd,
            uid,
            gid,
            source,
        }
    }

    /// Whether this error happened before any sandbox resource was allocated.
    pub fn is_precondition(&self) -> bool {
        matches!(
            self,
            Self::Config(_) | Self::RootfsNotFound(_) | Self::Factory(_)
        )
    }
}

impl From<String> for BoxrunError {
    fn from(msg: String) -> Self {
        Self::Internal(msg)
    }
}

impl From<&str> for BoxrunError {
    fn from(msg: &str) -> Self {
        Self::Internal(msg.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = BoxrunError::RootfsNotFound(PathBuf::from("/var/lib/rootfs"));
        assert_eq!(err.to_string(), "rootfs (/var/lib/rootfs) does not exist");

        let err = BoxrunError::ownership(
            1,
            100000,
            100000,
            io::Error::new(io::ErrorKind::PermissionDenied, "denied"),
        );
        assert!(err.to_string().starts_with("ownership of fd 1 to 100000:100000"));

        let err = BoxrunError::Config("LISTEN_FDS=abc is not a number".into());
        assert_eq!(err.to_string(), "config: LISTEN_FDS=abc is not a number");
    }

    #[test]
    fn test_precondition_classification() {
        assert!(BoxrunError::Config("x".into()).is_precondition());
        assert!(BoxrunError::RootfsNotFound(PathBuf::from("/x")).is_precondition());
        assert!(BoxrunError::Factory("x".into()).is_precondition());
        assert!(!BoxrunError::Start("x".into()).is_precondition());
        assert!(!BoxrunError::Forwarding("x".into()).is_precondition());
    }

    #[test]
    fn test_string_conversion() {
        let err: BoxrunError = "boom".into();
        assert!(matches!(err, BoxrunError::Internal(_)));
        let err: BoxrunError = io::Error::other("eof").into();
        assert!(matches!(err, BoxrunError::Io(_)));
    }
}
