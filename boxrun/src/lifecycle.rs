//! Sandbox creation and teardown.

use crate::runtime::{Container, ContainerConfig, Factory, ProcessSpec};
use boxrun_shared::errors::{BoxrunError, BoxrunResult};
use std::io::ErrorKind;
use std::ops::{Deref, DerefMut};

/// Creates sandboxes through a [`Factory`] and tears them down.
pub struct ContainerLifecycleManager<'a> {
    factory: &'a dyn Factory,
}

impl<'a> ContainerLifecycleManager<'a> {
    pub fn new(factory: &'a dyn Factory) -> Self {
        Self { factory }
    }

    /// Create a sandbox for `template`. No process is started.
    ///
    /// # Errors
    ///
    /// - [`BoxrunError::RootfsNotFound`] if the rootfs is absent
    /// - [`BoxrunError::Config`] if the rootfs cannot be inspected
    /// - [`BoxrunError::Factory`] if the factory or template registration fails
    pub fn create(
        &self,
        id: &str,
        config: ContainerConfig,
        template: &ProcessSpec,
    ) -> BoxrunResult<Box<dyn Container>> {
        match std::fs::metadata(config.rootfs()) {
            Ok(_) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(BoxrunError::RootfsNotFound(config.rootfs().to_path_buf()));
            }
            Err(e) => {
                return Err(BoxrunError::Config(format!(
                    "rootfs {}: {}",
                    config.rootfs().display(),
                    e
                )));
            }
        }

        let mut container = self.factory.create(id, config).map_err(|e| match e {
            BoxrunError::Factory(_) => e,
            other => BoxrunError::Factory(other.to_string()),
        })?;

        if let Err(e) = container.create(template) {
            tracing::warn!(container_id = %id, "Failed to register process template: {}", e);
            self.destroy(container.as_mut());
            return Err(match e {
                BoxrunError::Factory(_) => e,
                other => BoxrunError::Factory(other.to_string()),
            });
        }

        tracing::info!(container_id = %id, "Container created");
        Ok(container)
    }

    /// Destroy `container`, tolerating partial failure.
    ///
    /// Checkpointed and already destroyed sandboxes are left alone. Nothing
    /// is propagated: a status query failure or destroy failure is logged.
    pub fn destroy(&self, container: &mut dyn Container) {
        destroy_container(container);
    }

    /// Wrap `container` so it is destroyed when the guard is dropped.
    pub fn guard(&self, container: Box<dyn Container>) -> DestroyGuard {
        DestroyGuard::new(container)
    }
}

fn destroy_container(container: &mut dyn Container) {
    let id = container.id().to_string();
    match container.status() {
        Ok(state) if !state.is_destroyable() => {
            tracing::info!(container_id = %id, state = %state, "Skipping destroy");
            return;
        }
        Ok(state) => tracing::debug!(container_id = %id, state = %state, "Destroying container"),
        Err(e) => tracing::warn!(container_id = %id, "Failed to query status: {}", e),
    }

    match container.destroy() {
        Ok(()) => tracing::info!(container_id = %id, "Container destroyed"),
        Err(e) => tracing::warn!(container_id = %id, "Failed to destroy container: {}", e),
    }
}

/// Owns a container and destroys it on drop unless disarmed.
pub struct DestroyGuard {
    container: Option<Box<dyn Container>>,
}

impl DestroyGuard {
    pub fn new(container: Box<dyn Container>) -> Self {
        Self {
            container: Some(container),
        }
    }

    /// Keep the container alive past the guard (detached launches).
    pub fn disarm(mut self) -> Box<dyn Container> {
        match self.container.take() {
            Some(container) => container,
            None => unreachable!("container is only taken by disarm or drop"),
        }
    }
}

impl Deref for DestroyGuard {
    type Target = dyn Container;

    fn deref(&self) -> &Self::Target {
        match self.container.as_deref() {
            Some(container) => container,
            None => unreachable!("container is only taken by disarm or drop"),
        }
    }
}

impl DerefMut for DestroyGuard {
    fn deref_mut(&mut self) -> &mut Self::Target {
        match self.container.as_deref_mut() {
            Some(container) => container,
            None => unreachable!("container is only taken by disarm or drop"),
        }
    }
}

impl Drop for DestroyGuard {
    fn drop(&mut self) {
        if let Some(mut container) = self.container.take() {
            destroy_container(container.as_mut());
        }
    }
}
