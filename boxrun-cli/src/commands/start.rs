use super::BundleArgs;
use boxrun::{ContainerLifecycleManager, LaunchOptions, ProcessLauncher};
use clap::Args;
use std::path::PathBuf;

#[derive(Args, Debug)]
pub struct StartArgs {
    #[command(flatten)]
    pub bundle: BundleArgs,

    /// Return once the process has started and keep the container
    #[arg(short, long)]
    pub detach: bool,

    /// Write the process pid to this file
    #[arg(long)]
    pub pid_file: Option<PathBuf>,

    /// Pty slave to use as the process's terminal instead of a new pty
    #[arg(long, value_name = "PATH")]
    pub console: Option<PathBuf>,
}

/// Run the bundle's own process as configured.
pub async fn execute(args: StartArgs, global: &crate::cli::GlobalFlags) -> anyhow::Result<i32> {
    let prepared = args.bundle.prepare()?;

    let factory = global.create_factory();
    let manager = ContainerLifecycleManager::new(&factory);
    let container = manager.create(&prepared.id, prepared.config, &prepared.template)?;
    let mut guard = manager.guard(container);

    let options = LaunchOptions {
        pid_file: args.pid_file,
        detach: args.detach,
        console: args.console,
        ..Default::default()
    };
    let code = ProcessLauncher::new()
        .run(
            &mut *guard,
            &prepared.template,
            prepared.extra_fds.as_slice(),
            &options,
        )
        .await?;

    if args.detach {
        guard.disarm();
    }
    Ok(code)
}
