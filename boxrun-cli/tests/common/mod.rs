#![allow(dead_code)]

use assert_cmd::Command;
use std::time::Duration;
use tempfile::TempDir;

pub struct TestContext {
    pub cmd: Command,
    pub root: TempDir,
}

impl TestContext {
    /// Another invocation sharing this context's state root.
    pub fn new_cmd(&self) -> Command {
        command(&self.root)
    }
}

fn command(root: &TempDir) -> Command {
    let bin_path = env!("CARGO_BIN_EXE_boxrun");
    let mut cmd = Command::new(bin_path);
    cmd.timeout(Duration::from_secs(30));
    cmd.env_remove("BOXRUN_ROOT");
    cmd.env_remove("RUST_LOG");
    cmd.env_remove("LISTEN_FDS");
    cmd.env_remove("LISTEN_PID");
    cmd.env_remove("NOTIFY_SOCKET");
    cmd.arg("--root").arg(root.path());
    cmd
}

pub fn boxrun() -> TestContext {
    let root = TempDir::new().expect("Failed to create state root");
    TestContext {
        cmd: command(&root),
        root,
    }
}

pub fn is_root() -> bool {
    nix::unistd::geteuid().is_root()
}
