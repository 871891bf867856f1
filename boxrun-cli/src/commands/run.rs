use super::BundleArgs;
use boxrun::{ContainerLifecycleManager, LaunchOptions, ProcessLauncher};
use clap::Args;
use std::path::PathBuf;

#[derive(Args, Debug)]
pub struct RunArgs {
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

    /// Command to run instead of the bundle's process args
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    pub command: Vec<String>,
}

pub async fn execute(args: RunArgs, global: &crate::cli::GlobalFlags) -> anyhow::Result<i32> {
    let prepared = args.bundle.prepare()?;
    let spec = if args.command.is_empty() {
        prepared.template.clone()
    } else {
        prepared.template.with_args(args.command)
    };

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
        .run(&mut *guard, &spec, prepared.extra_fds.as_slice(), &options)
        .await?;

    if args.detach {
        guard.disarm();
    }
    Ok(code)
}
