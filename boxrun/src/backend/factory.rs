use super::container::LibcontainerContainer;
use super::error::BackendError;
use crate::bundle::Bundle;
use crate::runtime::{Container, ContainerConfig, Factory, RuntimeOptions};
use boxrun_shared::errors::BoxrunResult;
use libcontainer::container::Container as LibContainer;
use std::path::PathBuf;

/// Creates and loads libcontainer-backed sandboxes under one state root.
#[derive(Debug, Clone)]
pub struct LibcontainerFactory {
    options: RuntimeOptions,
}

impl LibcontainerFactory {
    pub fn new(options: RuntimeOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> &RuntimeOptions {
        &self.options
    }

    fn prepare_dir(path: PathBuf) -> Result<PathBuf, BackendError> {
        std::fs::create_dir_all(&path).map_err(|e| BackendError::filesystem(&path, e))?;
        Ok(path)
    }
}

impl Factory for LibcontainerFactory {
    fn create(&self, id: &str, config: ContainerConfig) -> BoxrunResult<Box<dyn Container>> {
        validate_id(id).map_err(BackendError::into_factory)?;
        if config.oci.is_none() {
            return Err(BackendError::Spec("configuration has no OCI runtime spec".into()).into_factory());
        }

        let state_root =
            Self::prepare_dir(self.options.containers_dir()).map_err(BackendError::into_factory)?;
        if state_root.join(id).exists() {
            return Err(BackendError::AlreadyExists(id.to_string()).into_factory());
        }
        let bundle_dir = Self::prepare_dir(self.options.bundles_dir().join(id))
            .map_err(BackendError::into_factory)?;

        tracing::debug!(
            container_id = %id,
            state_root = %state_root.display(),
            bundle = %bundle_dir.display(),
            "Prepared container directories"
        );

        Ok(Box::new(LibcontainerContainer::new(
            id,
            config,
            state_root,
            bundle_dir,
            self.options.systemd_cgroup,
        )))
    }

    fn load(&self, id: &str) -> BoxrunResult<Box<dyn Container>> {
        validate_id(id).map_err(BackendError::into_factory)?;
        let state_root = self.options.containers_dir();
        let bundle_dir = self.options.bundles_dir().join(id);

        // A container that was created but never started has no libcontainer
        // state yet, only its bundle directory.
        let source_bundle = match LibContainer::load(state_root.join(id)) {
            Ok(state) => state.bundle().clone(),
            Err(_) if bundle_dir.is_dir() => bundle_dir.clone(),
            Err(_) => return Err(BackendError::NotFound(id.to_string()).into_factory()),
        };

        let config = match Bundle::load(&source_bundle).and_then(|b| b.container_config()) {
            Ok(config) => config,
            Err(e) => {
                tracing::debug!(container_id = %id, "Bundle not readable, using minimal config: {}", e);
                ContainerConfig::new(source_bundle)
            }
        };

        Ok(Box::new(LibcontainerContainer::loaded(
            id,
            config,
            state_root,
            bundle_dir,
            self.options.systemd_cgroup,
        )))
    }
}

/// Reject ids that would escape the state root.
fn validate_id(id: &str) -> Result<(), BackendError> {
    let reason = if id.is_empty() {
        "empty"
    } else if id == "." || id == ".." {
        "reserved name"
    } else if id.contains('/') {
        "contains '/'"
    } else {
        return Ok(());
    };
    Err(BackendError::InvalidId {
        id: id.to_string(),
        reason,
    })
}
