//! Test support for boxrun.
//!
//! [`HostFactory`] builds sandboxes that are not sandboxes at all: processes
//! are spawned directly on the host with the descriptors the launcher
//! attached, so launcher, forwarder and batch behaviour can be exercised
//! without root or a container runtime. Every call is recorded, and
//! failures can be injected per container.

mod host;
mod stdio;

pub use host::{Behavior, HostContainer, HostFactory, Launch, Record};
pub use stdio::{capture_launcher, feeding_launcher, SharedBuffer};

use boxrun::runtime::{ContainerConfig, IdMapping, ProcessSpec};
use tempfile::TempDir;

/// Search path every template gets, since spawned processes start with a
/// cleared environment.
pub const TEST_PATH: &str = "/usr/local/bin:/usr/bin:/bin";

/// An empty directory to stand in for a root filesystem.
pub fn rootfs() -> TempDir {
    TempDir::new().expect("create rootfs tempdir")
}

/// Configuration whose sandbox root maps to the current user.
///
/// Descriptors re-owned for the sandbox end up owned by whoever runs the
/// tests, so `fchown` succeeds without privileges.
pub fn config(rootfs: &TempDir) -> ContainerConfig {
    // SAFETY: geteuid/getegid cannot fail.
    let (uid, gid) = unsafe { (libc::geteuid(), libc::getegid()) };
    ContainerConfig::new(rootfs.path())
        .with_user_namespace(vec![IdMapping::new(0, uid, 1)], vec![IdMapping::new(0, gid, 1)])
}

/// Configuration whose sandbox root maps to host root.
///
/// Unprivileged, re-owning descriptors for this sandbox fails.
pub fn root_owned_config(rootfs: &TempDir) -> ContainerConfig {
    ContainerConfig::new(rootfs.path())
        .with_user_namespace(vec![IdMapping::new(0, 0, 1)], vec![IdMapping::new(0, 0, 1)])
}

/// Process template running `args` with a usable `PATH`.
pub fn template<I, S>(args: I) -> ProcessSpec
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    let mut spec = ProcessSpec::new(args);
    spec.push_env("PATH", TEST_PATH);
    spec
}

/// `sh -c <script>` template.
pub fn sh(script: &str) -> ProcessSpec {
    template(["sh", "-c", script])
}

/// Number of descriptors currently open in this process.
pub fn open_fd_count() -> usize {
    std::fs::read_dir("/proc/self/fd")
        .or_else(|_| std::fs::read_dir("/dev/fd"))
        .map(|entries| entries.count())
        .expect("list open descriptors")
}
