use super::BundleArgs;
use boxrun::ContainerLifecycleManager;
use clap::Args;
use std::path::PathBuf;

#[derive(Args, Debug)]
pub struct CreateArgs {
    #[command(flatten)]
    pub bundle: BundleArgs,

    /// Accepted like run's; create starts no process, so it is unused
    #[arg(long, value_name = "PATH")]
    pub console: Option<PathBuf>,
}

pub async fn execute(args: CreateArgs, global: &crate::cli::GlobalFlags) -> anyhow::Result<i32> {
    if let Some(console) = &args.console {
        tracing::debug!(console = %console.display(), "Ignoring console for create");
    }
    let prepared = args.bundle.prepare()?;

    let factory = global.create_factory();
    let manager = ContainerLifecycleManager::new(&factory);
    let container = manager.create(&prepared.id, prepared.config, &prepared.template)?;

    println!("{}", container.id());
    Ok(0)
}
