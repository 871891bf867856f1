use crate::commands::{batch, create, delete, init, run, start};
use boxrun::backend::LibcontainerFactory;
use boxrun::RuntimeOptions;
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "boxrun", author, version, about = "Run processes inside OCI sandboxes")]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalFlags,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Args, Debug, Clone)]
pub struct GlobalFlags {
    /// Directory for container state and generated bundles
    #[arg(long, global = true, env = "BOXRUN_ROOT")]
    pub root: Option<PathBuf>,

    /// Let systemd manage the sandbox cgroup
    #[arg(long, global = true)]
    pub systemd_cgroup: bool,

    /// Enable debug logging (RUST_LOG takes precedence)
    #[arg(long, global = true)]
    pub debug: bool,
}

impl GlobalFlags {
    pub fn runtime_options(&self) -> RuntimeOptions {
        let mut options = RuntimeOptions::default();
        if let Some(root) = &self.root {
            options.state_root = root.clone();
        }
        options.systemd_cgroup = self.systemd_cgroup;
        options
    }

    pub fn create_factory(&self) -> LibcontainerFactory {
        LibcontainerFactory::new(self.runtime_options())
    }
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Create a container, run one process in it and tear it down
    Run(run::RunArgs),

    /// Create a container and run its configured process
    Start(start::StartArgs),

    /// Create a container without starting anything
    Create(create::CreateArgs),

    /// Destroy a container
    Delete(delete::DeleteArgs),

    /// Run a script of commands one after another in one container
    Batch(batch::BatchArgs),

    /// Run as the sandbox's init process
    #[command(hide = true)]
    Init(init::InitArgs),
}

/// How this invocation of the binary behaves.
pub enum EntryMode {
    /// On the host: create sandboxes and launch into them
    Orchestrator(Commands),
    /// Inside a sandbox: supervise the workload as its parent
    SandboxInit(init::InitArgs),
}

impl From<Commands> for EntryMode {
    fn from(command: Commands) -> Self {
        match command {
            Commands::Init(args) => EntryMode::SandboxInit(args),
            other => EntryMode::Orchestrator(other),
        }
    }
}

pub async fn dispatch(cli: Cli) -> anyhow::Result<i32> {
    let global = cli.global;
    match EntryMode::from(cli.command) {
        EntryMode::SandboxInit(args) => init::execute(args).await,
        EntryMode::Orchestrator(command) => {
            require_root()?;
            match command {
                Commands::Run(args) => run::execute(args, &global).await,
                Commands::Start(args) => start::execute(args, &global).await,
                Commands::Create(args) => create::execute(args, &global).await,
                Commands::Delete(args) => delete::execute(args, &global).await,
                Commands::Batch(args) => batch::execute(args, &global).await,
                Commands::Init(args) => init::execute(args).await,
            }
        }
    }
}

fn require_root() -> anyhow::Result<()> {
    if !nix::unistd::geteuid().is_root() {
        anyhow::bail!("boxrun should be run as root");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_is_sandbox_mode() {
        let cli = Cli::try_parse_from(["boxrun", "init", "--", "sh", "-c", "exit 0"]).unwrap();
        match EntryMode::from(cli.command) {
            EntryMode::SandboxInit(args) => assert_eq!(args.args, vec!["sh", "-c", "exit 0"]),
            EntryMode::Orchestrator(_) => panic!("init must not run in orchestrator mode"),
        }
    }

    #[test]
    fn test_run_is_orchestrator_mode() {
        let cli = Cli::try_parse_from(["boxrun", "run", "-b", "/b", "-d", "echo", "hi"]).unwrap();
        assert!(matches!(
            EntryMode::from(cli.command),
            EntryMode::Orchestrator(Commands::Run(_))
        ));
    }

    #[test]
    fn test_root_flag_overrides_state_root() {
        let cli = Cli::try_parse_from(["boxrun", "--root", "/tmp/br", "delete", "--id", "x"]).unwrap();
        assert_eq!(cli.global.runtime_options().state_root, PathBuf::from("/tmp/br"));
    }
}
