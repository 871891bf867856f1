//! Sandbox boundary consumed by the orchestrator.
//!
//! The orchestration layer never builds namespaces, cgroups or mounts itself.
//! It talks to two narrow interfaces:
//!
//! - [`Factory`]: turns a resolved [`ContainerConfig`] into a [`Container`] handle
//! - [`Container`]: `create`, `start`, `status`, `destroy`
//!
//! The production implementation lives in [`crate::backend`]; tests use the
//! process-spawning fakes from `boxrun-test-utils`.

mod config;
mod options;
mod process;

pub use config::{BindMount, ContainerConfig, IdMapping};
pub use options::RuntimeOptions;
pub use process::{Process, ProcessSpec, ProcessStdio, User};

use boxrun_shared::errors::BoxrunResult;
use std::fmt;

/// Lifecycle state of a sandbox.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ContainerState {
    /// Sandbox exists, no process running in it.
    Created,
    /// At least the init process is running.
    Running,
    /// The init process exited.
    Stopped,
    /// State was checkpointed; destruction must preserve it.
    Checkpointed,
    /// Resources released. Terminal state.
    Destroyed,
}

impl ContainerState {
    /// Whether `destroy` has anything left to do in this state.
    pub fn is_destroyable(&self) -> bool {
        !matches!(self, Self::Checkpointed | Self::Destroyed)
    }
}

impl fmt::Display for ContainerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Created => "created",
            Self::Running => "running",
            Self::Stopped => "stopped",
            Self::Checkpointed => "checkpointed",
            Self::Destroyed => "destroyed",
        };
        f.write_str(s)
    }
}

/// Builds sandboxes from resolved configuration.
pub trait Factory: Send + Sync {
    /// Materialize a new sandbox. No process is started.
    fn create(&self, id: &str, config: ContainerConfig) -> BoxrunResult<Box<dyn Container>>;

    /// Re-attach to a sandbox created by an earlier invocation.
    fn load(&self, id: &str) -> BoxrunResult<Box<dyn Container>>;
}

/// Handle to one sandbox.
///
/// Owned by the caller for its whole lifetime and never copied. `destroy` is
/// idempotent: once in [`ContainerState::Destroyed`] it must be a no-op.
pub trait Container: Send {
    /// Sandbox identity.
    fn id(&self) -> &str;

    /// Configuration the sandbox was created from.
    fn config(&self) -> &ContainerConfig;

    /// Register the default process template.
    fn create(&mut self, template: &ProcessSpec) -> BoxrunResult<()>;

    /// Start `process` inside the sandbox.
    ///
    /// Implementations take the process-side stdio from
    /// [`Process::take_stdio`], hand it to the new process, and record the pid
    /// with [`Process::set_pid`]. Descriptors taken must be closed in the
    /// caller's address space before returning.
    fn start(&mut self, process: &mut Process) -> BoxrunResult<()>;

    /// Current lifecycle state.
    fn status(&self) -> BoxrunResult<ContainerState>;

    /// Release every resource held by the sandbox.
    fn destroy(&mut self) -> BoxrunResult<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_destroyable_states() {
        assert!(ContainerState::Created.is_destroyable());
        assert!(ContainerState::Running.is_destroyable());
        assert!(ContainerState::Stopped.is_destroyable());
        assert!(!ContainerState::Checkpointed.is_destroyable());
        assert!(!ContainerState::Destroyed.is_destroyable());
    }

    #[test]
    fn test_state_display() {
        assert_eq!(ContainerState::Checkpointed.to_string(), "checkpointed");
        assert_eq!(ContainerState::Running.to_string(), "running");
    }
}
