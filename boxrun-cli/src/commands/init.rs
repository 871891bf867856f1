use clap::Args;

#[derive(Args, Debug)]
pub struct InitArgs {
    /// Workload to supervise
    #[arg(required = true, trailing_var_arg = true, allow_hyphen_values = true)]
    pub args: Vec<String>,
}

/// Run the workload as a child and mirror its exit status.
pub async fn execute(args: InitArgs) -> anyhow::Result<i32> {
    Ok(boxrun::init::run(&args.args).await?)
}
