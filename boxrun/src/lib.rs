//! Boxrun - process lifecycle and I/O orchestration for containers
//!
//! Given an already-resolved container configuration, boxrun creates a sandbox
//! through a [`runtime::Factory`], starts one or more processes inside it,
//! wires their standard streams, relays socket-activation descriptors and host
//! signals, reports exit status, and tears the sandbox down.
//!
//! # Architecture
//!
//! - [`lifecycle`]: sandbox creation and best-effort destruction
//! - [`launcher`]: one process launch, start to exit status
//! - [`io`]: pty, direct-binding and pipe-proxy stdio strategies
//! - [`signals`]: host signal relay and exit observation
//! - [`activation`]: sd_listen_fds / sd_notify relay across the sandbox boundary
//! - [`batch`]: sequential script execution inside one sandbox
//! - [`init`]: in-sandbox init mode (re-executed binary)
//! - [`backend`]: libcontainer-backed factory (Linux)

#[cfg(not(unix))]
compile_error!("boxrun supports Unix targets only");

pub mod activation;
#[cfg(target_os = "linux")]
pub mod backend;
pub mod batch;
pub mod bundle;
pub mod init;
pub mod io;
pub mod launcher;
pub mod lifecycle;
pub mod runtime;
pub mod signals;

pub use activation::{ActivationDescriptors, ActivationEnv};
pub use batch::{BatchRunner, ScriptSource};
pub use bundle::Bundle;
pub use launcher::{LaunchOptions, ProcessLauncher, StdinMode};
pub use lifecycle::{ContainerLifecycleManager, DestroyGuard};
pub use runtime::{
    Container, ContainerConfig, ContainerState, Factory, Process, ProcessSpec, RuntimeOptions,
};
pub use signals::SignalForwarder;

pub use boxrun_shared::errors::{BoxrunError, BoxrunResult};
