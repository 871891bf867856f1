//! Resolved sandbox configuration.
//!
//! Everything here is already decided by the time it reaches the orchestrator.
//! The only question the orchestrator asks of it is which host uid/gid the
//! sandbox's root maps to, so inherited descriptors can be re-owned.

use boxrun_shared::errors::{BoxrunError, BoxrunResult};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// One contiguous uid or gid range of a user namespace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdMapping {
    /// First id inside the sandbox
    pub container_id: u32,
    /// First id on the host
    pub host_id: u32,
    /// Number of ids in the range
    pub size: u32,
}

impl IdMapping {
    pub fn new(container_id: u32, host_id: u32, size: u32) -> Self {
        Self {
            container_id,
            host_id,
            size,
        }
    }

    /// Host id for `id`, if this range covers it.
    pub fn host_for(&self, id: u32) -> Option<u32> {
        let offset = id.checked_sub(self.container_id)?;
        if offset < self.size {
            self.host_id.checked_add(offset)
        } else {
            None
        }
    }
}

/// Bind mount added on top of the base configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BindMount {
    /// Path on the host
    pub source: PathBuf,
    /// Path inside the sandbox
    pub destination: PathBuf,
    /// Mount options
    pub options: Vec<String>,
}

/// Configuration handed to a [`super::Factory`].
///
/// Opaque to the orchestration core apart from the rootfs precondition and the
/// root id mapping. The OCI spec it was loaded from, if any, travels along
/// for backends that need it.
#[derive(Debug, Clone)]
pub struct ContainerConfig {
    /// Root filesystem of the sandbox
    pub rootfs: PathBuf,

    /// Bundle directory the configuration was loaded from
    pub bundle: Option<PathBuf>,

    /// Whether the sandbox gets its own user namespace
    pub user_namespace: bool,

    /// uid ranges (only meaningful with `user_namespace`)
    pub uid_mappings: Vec<IdMapping>,

    /// gid ranges (only meaningful with `user_namespace`)
    pub gid_mappings: Vec<IdMapping>,

    /// Extra bind mounts requested by the orchestrator (e.g. sd_notify socket)
    pub mounts: Vec<BindMount>,

    /// Source OCI runtime spec
    pub oci: Option<oci_spec::runtime::Spec>,
}

impl ContainerConfig {
    /// Minimal configuration: a rootfs and nothing else.
    pub fn new(rootfs: impl Into<PathBuf>) -> Self {
        Self {
            rootfs: rootfs.into(),
            bundle: None,
            user_namespace: false,
            uid_mappings: Vec::new(),
            gid_mappings: Vec::new(),
            mounts: Vec::new(),
            oci: None,
        }
    }

    /// Enable a user namespace with the given mappings.
    pub fn with_user_namespace(mut self, uids: Vec<IdMapping>, gids: Vec<IdMapping>) -> Self {
        self.user_namespace = true;
        self.uid_mappings = uids;
        self.gid_mappings = gids;
        self
    }

    pub fn rootfs(&self) -> &Path {
        &self.rootfs
    }

    /// Host uid that the sandbox's uid 0 maps to.
    ///
    /// Without a user namespace this is the host's own root (0).
    pub fn host_root_uid(&self) -> BoxrunResult<u32> {
        resolve_root(self.user_namespace, &self.uid_mappings, "user")
    }

    /// Host gid that the sandbox's gid 0 maps to.
    pub fn host_root_gid(&self) -> BoxrunResult<u32> {
        resolve_root(self.user_namespace, &self.gid_mappings, "group")
    }

    /// Append a bind mount.
    pub fn add_mount(&mut self, mount: BindMount) {
        self.mounts.push(mount);
    }
}

fn resolve_root(user_namespace: bool, mappings: &[IdMapping], kind: &str) -> BoxrunResult<u32> {
    if !user_namespace {
        return Ok(0);
    }
    mappings
        .iter()
        .find_map(|m| m.host_for(0))
        .ok_or_else(|| {
            BoxrunError::Config(format!(
                "user namespaces enabled, but no root {} mapping found",
                kind
            ))
        })
}
