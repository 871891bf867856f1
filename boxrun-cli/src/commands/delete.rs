use boxrun::{ContainerLifecycleManager, Factory};
use clap::Args;

#[derive(Args, Debug)]
pub struct DeleteArgs {
    /// Id of the container to delete (repeatable)
    #[arg(long = "id", required = true)]
    pub ids: Vec<String>,
}

pub async fn execute(args: DeleteArgs, global: &crate::cli::GlobalFlags) -> anyhow::Result<i32> {
    let factory = global.create_factory();
    let manager = ContainerLifecycleManager::new(&factory);

    let mut failed = false;
    for id in args.ids {
        match factory.load(&id) {
            Ok(mut container) => {
                manager.destroy(container.as_mut());
                println!("{}", id);
            }
            Err(e) => {
                eprintln!("Error deleting container '{}': {}", id, e);
                failed = true;
            }
        }
    }

    if failed {
        anyhow::bail!("Some containers could not be deleted");
    }
    Ok(0)
}
