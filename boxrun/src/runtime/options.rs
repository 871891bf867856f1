//! Configuration for the boxrun runtime.

use boxrun_shared::constants::runtime as const_runtime;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Process-wide runtime options.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuntimeOptions {
    /// Directory holding container state and generated bundles.
    ///
    /// Default: /run/boxrun (or `BOXRUN_ROOT`)
    #[serde(default = "default_state_root")]
    pub state_root: PathBuf,

    /// Let systemd manage the sandbox's cgroup.
    ///
    /// Default: false
    #[serde(default)]
    pub systemd_cgroup: bool,
}

fn default_state_root() -> PathBuf {
    std::env::var_os(const_runtime::ROOT_ENV)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(const_runtime::DEFAULT_STATE_ROOT))
}

impl Default for RuntimeOptions {
    fn default() -> Self {
        Self {
            state_root: default_state_root(),
            systemd_cgroup: false,
        }
    }
}

impl RuntimeOptions {
    /// libcontainer state directory.
    pub fn containers_dir(&self) -> PathBuf {
        self.state_root.join(const_runtime::CONTAINERS_DIR)
    }

    /// Generated per-container bundles.
    pub fn bundles_dir(&self) -> PathBuf {
        self.state_root.join(const_runtime::BUNDLES_DIR)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_layout() {
        let options = RuntimeOptions {
            state_root: PathBuf::from("/tmp/br"),
            systemd_cgroup: false,
        };
        assert_eq!(options.containers_dir(), PathBuf::from("/tmp/br/containers"));
        assert_eq!(options.bundles_dir(), PathBuf::from("/tmp/br/bundles"));
    }

    #[test]
    fn test_deserialize_defaults() {
        let options: RuntimeOptions =
            serde_json::from_str(r#"{"state_root": "/var/run/br"}"#).unwrap();
        assert_eq!(options.state_root, PathBuf::from("/var/run/br"));
        assert!(!options.systemd_cgroup);
    }
}
