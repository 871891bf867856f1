use super::BundleArgs;
use boxrun::{BatchRunner, ContainerLifecycleManager, ProcessLauncher, ScriptSource};
use clap::Args;
use std::path::PathBuf;

#[derive(Args, Debug)]
pub struct BatchArgs {
    #[command(flatten)]
    pub bundle: BundleArgs,

    /// Write each command's pid to this file
    #[arg(long)]
    pub pid_file: Option<PathBuf>,

    /// Pty slave to use as the terminal of each command
    #[arg(long, value_name = "PATH")]
    pub console: Option<PathBuf>,

    /// Script to run, one command per line ("-" reads stdin)
    #[arg(value_name = "SCRIPT")]
    pub script: String,
}

pub async fn execute(args: BatchArgs, global: &crate::cli::GlobalFlags) -> anyhow::Result<i32> {
    let source = ScriptSource::parse(&args.script);
    // Open before creating anything so a bad path costs no sandbox.
    let script = source.open().await?;
    let prepared = args.bundle.prepare()?;

    let factory = global.create_factory();
    let manager = ContainerLifecycleManager::new(&factory);
    let container = manager.create(&prepared.id, prepared.config, &prepared.template)?;
    let mut guard = manager.guard(container);

    let mut runner = BatchRunner::new(ProcessLauncher::new());
    if let Some(path) = args.pid_file {
        runner = runner.with_pid_file(path);
    }
    if let Some(path) = args.console {
        runner = runner.with_console(path);
    }
    let code = runner
        .run_batch(
            &mut *guard,
            &prepared.template,
            script,
            source.is_stdin(),
            prepared.extra_fds.as_slice(),
        )
        .await?;
    Ok(code)
}
