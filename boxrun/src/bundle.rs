//! OCI bundle loading.
//!
//! Reads `<bundle>/config.json` with `oci-spec` and splits it into the two
//! things the orchestrator consumes: an opaque [`ContainerConfig`] and the
//! default [`ProcessSpec`] template.

use crate::runtime::{ContainerConfig, IdMapping, ProcessSpec, User};
use boxrun_shared::constants::runtime::CONFIG_FILE;
use boxrun_shared::errors::{BoxrunError, BoxrunResult};
use oci_spec::runtime::{LinuxIdMapping, LinuxNamespaceType, Spec};
use std::path::{Path, PathBuf};

/// An OCI bundle directory and its parsed runtime spec.
#[derive(Debug, Clone)]
pub struct Bundle {
    path: PathBuf,
    spec: Spec,
}

impl Bundle {
    pub fn load(path: impl AsRef<Path>) -> BoxrunResult<Self> {
        let path = path.as_ref();
        let path = path.canonicalize().map_err(|e| {
            BoxrunError::Config(format!("bundle {}: {}", path.display(), e))
        })?;
        let config = path.join(CONFIG_FILE);
        let spec = Spec::load(&config).map_err(|e| {
            BoxrunError::Config(format!("failed to load {}: {}", config.display(), e))
        })?;

        tracing::debug!(bundle = %path.display(), "Loaded bundle");
        Ok(Self { path, spec })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn spec(&self) -> &Spec {
        &self.spec
    }

    /// Container id used when none is given: the bundle directory name.
    pub fn default_id(&self) -> BoxrunResult<String> {
        self.path
            .file_name()
            .and_then(|name| name.to_str())
            .map(str::to_string)
            .ok_or_else(|| {
                BoxrunError::Config(format!(
                    "cannot derive container id from {}",
                    self.path.display()
                ))
            })
    }

    /// Root filesystem path, resolved against the bundle directory.
    pub fn rootfs(&self) -> BoxrunResult<PathBuf> {
        let root = self
            .spec
            .root()
            .as_ref()
            .ok_or_else(|| BoxrunError::Config("config.json has no root".into()))?;
        let path = root.path();
        if path.is_absolute() {
            Ok(path.clone())
        } else {
            Ok(self.path.join(path))
        }
    }

    /// The default process described by the bundle.
    pub fn process_template(&self) -> BoxrunResult<ProcessSpec> {
        let process = self
            .spec
            .process()
            .as_ref()
            .ok_or_else(|| BoxrunError::Config("config.json has no process".into()))?;

        let user = process.user();
        Ok(ProcessSpec {
            args: process.args().clone().unwrap_or_default(),
            env: process.env().clone().unwrap_or_default(),
            cwd: process.cwd().clone(),
            terminal: process.terminal().unwrap_or(false),
            user: User {
                uid: user.uid(),
                gid: user.gid(),
                additional_gids: user.additional_gids().clone().unwrap_or_default(),
            },
            extra_fds: Vec::new(),
        })
    }

    /// Sandbox configuration, carrying the spec along for the backend.
    pub fn container_config(&self) -> BoxrunResult<ContainerConfig> {
        let mut config = ContainerConfig::new(self.rootfs()?);
        config.bundle = Some(self.path.clone());

        if let Some(linux) = self.spec.linux() {
            let user_namespace = linux
                .namespaces()
                .as_ref()
                .is_some_and(|ns| ns.iter().any(|n| n.typ() == LinuxNamespaceType::User));
            if user_namespace {
                config = config.with_user_namespace(
                    convert_mappings(linux.uid_mappings()),
                    convert_mappings(linux.gid_mappings()),
                );
            }
        }

        config.oci = Some(self.spec.clone());
        Ok(config)
    }
}

fn convert_mappings(mappings: &Option<Vec<LinuxIdMapping>>) -> Vec<IdMapping> {
    mappings
        .iter()
        .flatten()
        .map(|m| IdMapping::new(m.container_id(), m.host_id(), m.size()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const CONFIG: &str = r#"{
        "ociVersion": "1.0.2",
        "root": { "path": "rootfs" },
        "process": {
            "terminal": true,
            "user": { "uid": 1000, "gid": 1000 },
            "args": ["sh", "-c", "echo hi"],
            "env": ["PATH=/usr/bin:/bin", "TERM=xterm"],
            "cwd": "/srv"
        },
        "linux": {
            "namespaces": [ { "type": "pid" }, { "type": "user" } ],
            "uidMappings": [ { "containerID": 0, "hostID": 100000, "size": 65536 } ],
            "gidMappings": [ { "containerID": 0, "hostID": 200000, "size": 65536 } ]
        }
    }"#;

    fn write_bundle(config: &str) -> TempDir {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join(CONFIG_FILE), config).unwrap();
        std::fs::create_dir(dir.path().join("rootfs")).unwrap();
        dir
    }

    #[test]
    fn test_load_template_and_config() {
        let dir = write_bundle(CONFIG);
        let bundle = Bundle::load(dir.path()).unwrap();

        let template = bundle.process_template().unwrap();
        assert_eq!(template.args, vec!["sh", "-c", "echo hi"]);
        assert_eq!(template.env_lookup("TERM"), Some("xterm"));
        assert_eq!(template.cwd, PathBuf::from("/srv"));
        assert!(template.terminal);
        assert_eq!(template.user.uid, 1000);

        let config = bundle.container_config().unwrap();
        assert_eq!(config.rootfs(), bundle.path().join("rootfs"));
        assert!(config.user_namespace);
        assert_eq!(config.host_root_uid().unwrap(), 100000);
        assert_eq!(config.host_root_gid().unwrap(), 200000);
    }

    #[test]
    fn test_default_id_is_directory_name() {
        let dir = write_bundle(CONFIG);
        let bundle = Bundle::load(dir.path()).unwrap();
        let expected = dir.path().file_name().unwrap().to_str().unwrap();
        assert_eq!(bundle.default_id().unwrap(), expected);
    }

    #[test]
    fn test_without_user_namespace_root_is_zero() {
        let dir = write_bundle(
            r#"{ "ociVersion": "1.0.2", "root": { "path": "/" },
                 "process": { "user": { "uid": 0, "gid": 0 }, "args": ["true"], "cwd": "/" } }"#,
        );
        let config = Bundle::load(dir.path()).unwrap().container_config().unwrap();
        assert!(!config.user_namespace);
        assert_eq!(config.host_root_uid().unwrap(), 0);
        assert_eq!(config.rootfs(), Path::new("/"));
    }

    #[test]
    fn test_missing_bundle_is_config_error() {
        let err = Bundle::load("/nonexistent/bundle").unwrap_err();
        assert!(matches!(err, BoxrunError::Config(_)));
    }

    #[test]
    fn test_malformed_config_is_config_error() {
        let dir = write_bundle("{ not json");
        let err = Bundle::load(dir.path()).unwrap_err();
        assert!(matches!(err, BoxrunError::Config(_)));
    }
}
