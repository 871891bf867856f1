//! Subcommand implementations.

pub mod batch;
pub mod create;
pub mod delete;
pub mod init;
pub mod run;
pub mod start;

use boxrun::{activation, ActivationDescriptors, ActivationEnv, Bundle, ContainerConfig, ProcessSpec};
use clap::Args;
use std::path::PathBuf;

/// Bundle selection shared by the commands that create containers.
#[derive(Args, Debug, Clone)]
pub struct BundleArgs {
    /// Path to the OCI bundle
    #[arg(short, long, default_value = ".")]
    pub bundle: PathBuf,

    /// Container id (defaults to the bundle directory name)
    #[arg(long)]
    pub id: Option<String>,
}

/// Everything needed to create a container and launch into it.
pub struct Prepared {
    pub id: String,
    pub config: ContainerConfig,
    pub template: ProcessSpec,
    pub extra_fds: ActivationDescriptors,
}

impl BundleArgs {
    /// Load the bundle and apply the socket-activation environment.
    pub fn prepare(&self) -> anyhow::Result<Prepared> {
        let bundle = Bundle::load(&self.bundle)?;
        let id = match &self.id {
            Some(id) => id.clone(),
            None => bundle.default_id()?,
        };
        let mut config = bundle.container_config()?;
        let mut template = bundle.process_template()?;
        let extra_fds = activation::prepare(
            &ActivationEnv::from_env(),
            std::process::id(),
            &mut config,
            &mut template,
        )?;

        tracing::debug!(
            container_id = %id,
            bundle = %bundle.path().display(),
            extra_fds = extra_fds.len(),
            "Prepared bundle"
        );
        Ok(Prepared {
            id,
            config,
            template,
            extra_fds,
        })
    }
}
