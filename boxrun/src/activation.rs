//! Socket activation and readiness notification relay.
//!
//! A supervisor hands a service its listening sockets as descriptors
//! `3..3+LISTEN_FDS` and names the intended pid in `LISTEN_PID`. Inside the
//! sandbox the service is pid 1, so the descriptors are passed through as
//! extra fds and the environment is rewritten to match. `NOTIFY_SOCKET` is
//! relayed by bind-mounting the socket into the sandbox.

use crate::runtime::{BindMount, ContainerConfig, ProcessSpec};
use boxrun_shared::constants::{activation, notify};
use boxrun_shared::errors::{BoxrunError, BoxrunResult};
use nix::sys::resource::{getrlimit, Resource};
use std::os::fd::RawFd;
use std::path::PathBuf;

/// Activation-related environment, read once at the orchestration boundary.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ActivationEnv {
    pub listen_fds: Option<String>,
    pub listen_pid: Option<String>,
    pub notify_socket: Option<PathBuf>,
}

impl ActivationEnv {
    pub fn from_env() -> Self {
        Self {
            listen_fds: std::env::var(activation::LISTEN_FDS).ok(),
            listen_pid: std::env::var(activation::LISTEN_PID).ok(),
            notify_socket: std::env::var_os(notify::NOTIFY_SOCKET)
                .filter(|v| !v.is_empty())
                .map(PathBuf::from),
        }
    }

    /// Parsed `LISTEN_FDS`, if set.
    ///
    /// The highest passed descriptor has to fit under `RLIMIT_NOFILE`.
    fn count(&self) -> BoxrunResult<Option<u32>> {
        let Some(raw) = self.listen_fds.as_deref() else {
            return Ok(None);
        };
        let count = raw.trim().parse::<u32>().map_err(|e| {
            BoxrunError::Config(format!(
                "invalid {} value {:?}: {}",
                activation::LISTEN_FDS,
                raw,
                e
            ))
        })?;

        let limit = descriptor_limit();
        let end = u64::from(count) + activation::SD_LISTEN_FDS_START as u64;
        if end > limit {
            return Err(BoxrunError::Config(format!(
                "{} value {} exceeds the open file limit {}",
                activation::LISTEN_FDS,
                count,
                limit
            )));
        }
        Ok(Some(count))
    }

    /// Whether `LISTEN_PID` names `pid`.
    fn addressed_to(&self, pid: u32) -> bool {
        self.listen_pid
            .as_deref()
            .and_then(|p| p.trim().parse::<u32>().ok())
            == Some(pid)
    }
}

/// Exclusive upper bound on descriptor numbers in this process.
fn descriptor_limit() -> u64 {
    let cap = RawFd::MAX as u64;
    match getrlimit(Resource::RLIMIT_NOFILE) {
        Ok((soft, _)) => (soft as u64).min(cap),
        Err(e) => {
            tracing::debug!("Failed to read RLIMIT_NOFILE: {}", e);
            cap
        }
    }
}

/// Inherited listening descriptors, contiguous from 3.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ActivationDescriptors(Vec<RawFd>);

impl ActivationDescriptors {
    pub fn none() -> Self {
        Self::default()
    }

    /// Descriptors `3..3+count`, clamped to the descriptor range.
    pub fn from_count(count: u32) -> Self {
        let start = activation::SD_LISTEN_FDS_START;
        let count = RawFd::try_from(count).unwrap_or(RawFd::MAX);
        Self((start..start.saturating_add(count)).collect())
    }

    pub fn as_slice(&self) -> &[RawFd] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Apply the activation environment to a launch.
///
/// Returns the descriptors to pass as extra fds. `template` gets
/// `LISTEN_FDS`/`LISTEN_PID` (when descriptors are passed) and
/// `NOTIFY_SOCKET`; `config` gets the notify socket bind mount.
/// A malformed count is rejected before anything is modified.
pub fn prepare(
    env: &ActivationEnv,
    pid: u32,
    config: &mut ContainerConfig,
    template: &mut ProcessSpec,
) -> BoxrunResult<ActivationDescriptors> {
    let count = env.count()?;

    let descriptors = match count {
        Some(n) if env.addressed_to(pid) => {
            let fds = ActivationDescriptors::from_count(n);
            template.push_env(activation::LISTEN_FDS, n.to_string());
            template.push_env(activation::LISTEN_PID, activation::CONTAINER_LISTEN_PID);
            tracing::debug!(count = n, "Passing socket activation descriptors");
            fds
        }
        _ => ActivationDescriptors::none(),
    };

    if let Some(socket) = env.notify_socket.as_ref() {
        config.add_mount(BindMount {
            source: socket.clone(),
            destination: socket.clone(),
            options: notify::MOUNT_OPTIONS.iter().map(|o| o.to_string()).collect(),
        });
        template.push_env(notify::NOTIFY_SOCKET, socket.to_string_lossy());
        tracing::debug!(socket = %socket.display(), "Relaying notify socket");
    }

    Ok(descriptors)
}
