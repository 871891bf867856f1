//! Errors raised inside the libcontainer backend.
//!
//! Converted at the [`Container`](crate::runtime::Container) boundary:
//! construction failures become [`BoxrunError::Factory`], launch failures
//! become [`BoxrunError::Start`].

use boxrun_shared::errors::BoxrunError;
use std::io;
use std::os::fd::RawFd;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum BackendError {
    /// Container id rejected before touching the state root.
    #[error("invalid container id {id:?}: {reason}")]
    InvalidId { id: String, reason: &'static str },

    /// A container with this id already has state.
    #[error("container {0} already exists")]
    AlreadyExists(String),

    /// No state for this id.
    #[error("container {0} does not exist")]
    NotFound(String),

    /// Failed to prepare or remove a directory or file.
    #[error("{path}: {source}")]
    Filesystem {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// The configuration carries no usable OCI spec.
    #[error("oci spec: {0}")]
    Spec(String),

    /// Inherited descriptors must follow stdio without gaps.
    #[error("extra fds must be contiguous from 3, got {0:?}")]
    NonContiguousFds(Vec<RawFd>),

    /// libcontainer refused or failed.
    #[error("libcontainer: {0}")]
    Libcontainer(String),
}

impl BackendError {
    pub(crate) fn filesystem(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Filesystem {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn libcontainer(context: &str, err: impl std::fmt::Display) -> Self {
        Self::Libcontainer(format!("{}: {}", context, err))
    }

    pub fn into_factory(self) -> BoxrunError {
        BoxrunError::Factory(self.to_string())
    }

    pub fn into_start(self) -> BoxrunError {
        BoxrunError::Start(self.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_conversion_picks_taxonomy() {
        let err = BackendError::NonContiguousFds(vec![3, 5]);
        assert!(err.to_string().contains("[3, 5]"));
        assert!(matches!(err.into_start(), BoxrunError::Start(_)));

        let err = BackendError::AlreadyExists("web".into());
        assert!(matches!(err.into_factory(), BoxrunError::Factory(_)));
    }
}
