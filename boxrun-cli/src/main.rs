//! boxrun: run OCI bundles with pty/pipe stdio, socket activation and
//! signal forwarding.

#[cfg(not(target_os = "linux"))]
compile_error!("the boxrun CLI requires Linux");

mod cli;
mod commands;

use clap::Parser;
use cli::Cli;

fn main() {
    let cli = Cli::parse();
    init_tracing(cli.global.debug);

    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            eprintln!("boxrun: failed to start async runtime: {}", e);
            std::process::exit(1);
        }
    };

    let code = match runtime.block_on(cli::dispatch(cli)) {
        Ok(code) => code,
        Err(e) => {
            tracing::error!("boxrun: {:#}", e);
            1
        }
    };

    // A relay may still be parked on a blocking stdin read.
    runtime.shutdown_background();
    std::process::exit(exit_status(code));
}

fn init_tracing(debug: bool) {
    let default = if debug { "debug" } else { "warn" };
    if let Err(e) = tracing_subscriber::fmt()
        .with_target(true)
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default)),
        )
        .try_init()
    {
        eprintln!("[ERROR] Failed to initialize tracing: {}", e);
    }
}

/// Map a result code onto a process exit status (`-1` becomes 255).
fn exit_status(code: i32) -> i32 {
    code.rem_euclid(256)
}
