//! Integration tests for single process launches.
//!
//! Processes run on the host through `HostFactory`, with the launcher's
//! real stdio strategies and forwarder in between.

use boxrun::runtime::{Container, ProcessSpec};
use boxrun::{BoxrunError, LaunchOptions};
use boxrun_test_utils::{
    capture_launcher, config, root_owned_config, rootfs, sh, template, Behavior, HostContainer,
    HostFactory, SharedBuffer,
};
use std::time::{Duration, Instant};
use tempfile::TempDir;

// ============================================================================
// TEST FIXTURES
// ============================================================================

struct TestContext {
    factory: HostFactory,
    container: HostContainer,
    launcher: boxrun::ProcessLauncher,
    stdout: SharedBuffer,
    stderr: SharedBuffer,
    _rootfs: TempDir,
}

impl TestContext {
    fn new() -> Self {
        Self::with_behavior(Behavior::default())
    }

    fn with_behavior(behavior: Behavior) -> Self {
        let rootfs = rootfs();
        let factory = HostFactory::with_behavior(behavior);
        let container = factory.container("launcher-test", config(&rootfs));
        let (launcher, stdout, stderr) = capture_launcher();
        Self {
            factory,
            container,
            launcher,
            stdout,
            stderr,
            _rootfs: rootfs,
        }
    }

    async fn run(&mut self, spec: &ProcessSpec) -> Result<i32, BoxrunError> {
        self.run_with(spec, &[], &LaunchOptions::default()).await
    }

    async fn run_with(
        &mut self,
        spec: &ProcessSpec,
        extra_fds: &[i32],
        options: &LaunchOptions,
    ) -> Result<i32, BoxrunError> {
        self.launcher
            .run(&mut self.container, spec, extra_fds, options)
            .await
    }
}

// ============================================================================
// EXIT STATUS
// ============================================================================

#[tokio::test]
async fn run_returns_zero_for_success() {
    let mut ctx = TestContext::new();
    assert_eq!(ctx.run(&template(["true"])).await.unwrap(), 0);
}

#[tokio::test]
async fn run_returns_exit_code() {
    let mut ctx = TestContext::new();
    assert_eq!(ctx.run(&sh("exit 3")).await.unwrap(), 3);
}

#[tokio::test]
async fn run_reports_signal_death_as_128_plus_n() {
    let mut ctx = TestContext::new();
    assert_eq!(ctx.run(&sh("kill -9 $$")).await.unwrap(), 137);
    assert_eq!(ctx.run(&sh("kill -15 $$")).await.unwrap(), 143);
}

// ============================================================================
// PIPE PROXY
// ============================================================================

#[tokio::test]
async fn pipes_relay_stdout_and_stderr_separately() {
    let mut ctx = TestContext::new();
    let code = ctx.run(&sh("echo out; echo err >&2")).await.unwrap();

    assert_eq!(code, 0);
    assert_eq!(ctx.stdout.text(), "out\n");
    assert_eq!(ctx.stderr.text(), "err\n");
}

#[tokio::test]
async fn pipes_drain_output_written_right_before_exit() {
    let mut ctx = TestContext::new();
    let code = ctx
        .run(&sh("i=0; while [ $i -lt 2000 ]; do echo line$i; i=$((i+1)); done; exit 4"))
        .await
        .unwrap();

    assert_eq!(code, 4);
    let text = ctx.stdout.text();
    assert_eq!(text.lines().count(), 2000);
    assert!(text.ends_with("line1999\n"));
}

#[tokio::test]
async fn pipes_give_the_process_an_empty_stdin() {
    let mut ctx = TestContext::new();
    // `cat` only exits once stdin reaches EOF.
    assert_eq!(ctx.run(&template(["cat"])).await.unwrap(), 0);
    assert!(ctx.stdout.contents().is_empty());
}

#[tokio::test]
async fn environment_reaches_the_process() {
    let mut ctx = TestContext::new();
    let mut spec = sh("echo $GREETING");
    spec.push_env("GREETING", "first");
    spec.push_env("GREETING", "second");

    ctx.run(&spec).await.unwrap();
    assert_eq!(ctx.stdout.text(), "second\n");
}

// ============================================================================
// PTY
// ============================================================================

#[tokio::test]
async fn terminal_process_sees_a_tty() {
    let mut ctx = TestContext::new();
    let mut spec = sh("test -t 0 && test -t 1 && echo tty");
    spec.terminal = true;

    assert_eq!(ctx.run(&spec).await.unwrap(), 0);
    assert!(ctx.stdout.text().contains("tty"));
    assert!(ctx.factory.record().lock().launches[0].terminal);
}

#[tokio::test]
async fn terminal_process_uses_given_console() {
    use std::io::Read;
    use std::os::fd::AsFd;

    let mut ctx = TestContext::new();
    let pty = nix::pty::openpty(None, None).unwrap();
    let console = nix::unistd::ttyname(pty.slave.as_fd()).unwrap();
    let mut spec = sh("test -t 0 && test -t 1 && echo on-console");
    spec.terminal = true;
    let options = LaunchOptions {
        console: Some(console),
        ..Default::default()
    };

    assert_eq!(ctx.run_with(&spec, &[], &options).await.unwrap(), 0);
    // Nothing is relayed; the output waits on our master.
    assert!(ctx.stdout.contents().is_empty());
    let mut master = std::fs::File::from(pty.master);
    let mut buf = [0u8; 64];
    let n = master.read(&mut buf).unwrap();
    assert!(String::from_utf8_lossy(&buf[..n]).contains("on-console"));
}

#[tokio::test]
async fn non_terminal_process_sees_no_tty() {
    let mut ctx = TestContext::new();
    assert_eq!(ctx.run(&sh("test -t 1")).await.unwrap(), 1);
}

// ============================================================================
// DETACH, PID FILE, EXTRA FDS
// ============================================================================

#[tokio::test]
async fn detached_terminal_launch_returns_without_waiting() {
    let mut ctx = TestContext::new();
    let mut spec = template(["sleep", "5"]);
    spec.terminal = true;
    let options = LaunchOptions {
        detach: true,
        ..Default::default()
    };

    let started = Instant::now();
    assert_eq!(ctx.run_with(&spec, &[], &options).await.unwrap(), 0);
    assert!(started.elapsed() < Duration::from_secs(4));

    let pid = ctx.factory.record().lock().launches[0].pid;
    let _ = nix::sys::signal::kill(nix::unistd::Pid::from_raw(pid), nix::sys::signal::SIGKILL);
    let _ = nix::sys::wait::waitpid(nix::unistd::Pid::from_raw(pid), None);
}

#[tokio::test]
async fn pid_file_holds_decimal_pid() {
    let mut ctx = TestContext::new();
    let dir = TempDir::new().unwrap();
    let pid_file = dir.path().join("proc.pid");
    let options = LaunchOptions {
        pid_file: Some(pid_file.clone()),
        ..Default::default()
    };

    ctx.run_with(&template(["true"]), &[], &options).await.unwrap();

    let pid = ctx.factory.record().lock().launches[0].pid;
    assert_eq!(std::fs::read_to_string(&pid_file).unwrap(), pid.to_string());
}

#[tokio::test]
async fn unwritable_pid_file_does_not_fail_the_launch() {
    let mut ctx = TestContext::new();
    let options = LaunchOptions {
        pid_file: Some("/nonexistent/dir/proc.pid".into()),
        ..Default::default()
    };
    assert_eq!(ctx.run_with(&sh("exit 6"), &[], &options).await.unwrap(), 6);
}

#[tokio::test]
async fn extra_fds_follow_the_template_in_order() {
    let mut ctx = TestContext::new();
    let mut spec = template(["true"]);
    spec.extra_fds = vec![3];

    ctx.run_with(&spec, &[4, 5], &LaunchOptions::default())
        .await
        .unwrap();

    let record = ctx.factory.record();
    assert_eq!(record.lock().launches[0].extra_fds, vec![3, 4, 5]);
}

// ============================================================================
// FAILURES
// ============================================================================

#[tokio::test]
async fn start_failure_is_start_error() {
    let mut ctx = TestContext::with_behavior(Behavior {
        fail_start: true,
        ..Default::default()
    });

    let err = ctx.run(&template(["true"])).await.unwrap_err();
    assert!(matches!(err, BoxrunError::Start(_)));
    assert_eq!(ctx.factory.record().lock().failed_starts, 1);
}

#[tokio::test]
async fn spawn_failure_is_start_error() {
    let mut ctx = TestContext::new();
    let err = ctx.run(&template(["/nonexistent/program"])).await.unwrap_err();
    assert!(matches!(err, BoxrunError::Start(_)));
}

#[tokio::test]
async fn missing_root_mapping_fails_before_start() {
    let rootfs = rootfs();
    let factory = HostFactory::new();
    let mut config = config(&rootfs);
    config.uid_mappings.clear();
    let mut container = factory.container("unmapped", config);
    let (launcher, _, _) = capture_launcher();

    let err = launcher
        .run(&mut container, &template(["true"]), &[], &LaunchOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, BoxrunError::Config(_)));
    assert!(factory.record().lock().launches.is_empty());
    assert_eq!(container.id(), "unmapped");
}

#[tokio::test]
async fn unowned_sandbox_root_fails_with_ownership_error() {
    if nix::unistd::geteuid().is_root() {
        eprintln!("skipping: root may re-own anything");
        return;
    }

    let rootfs = rootfs();
    let factory = HostFactory::new();
    let mut container = factory.container("foreign", root_owned_config(&rootfs));
    let (launcher, _, _) = capture_launcher();

    for terminal in [false, true] {
        let mut spec = template(["true"]);
        spec.terminal = terminal;
        let err = launcher
            .run(&mut container, &spec, &[], &LaunchOptions::default())
            .await
            .unwrap_err();
        assert!(
            matches!(err, BoxrunError::Ownership { uid: 0, gid: 0, .. }),
            "terminal={}: {:?}",
            terminal,
            err
        );
    }
    assert!(factory.record().lock().launches.is_empty());
}

// ============================================================================
// DIRECT BINDING
// ============================================================================

#[tokio::test]
async fn detached_plain_launch_binds_host_stdio() {
    // Re-owning the test harness's own stdio needs privileges.
    if !nix::unistd::geteuid().is_root() {
        eprintln!("skipping: requires root");
        return;
    }

    let mut ctx = TestContext::new();
    let options = LaunchOptions {
        detach: true,
        ..Default::default()
    };
    assert_eq!(ctx.run_with(&template(["true"]), &[], &options).await.unwrap(), 0);

    let pid = ctx.factory.record().lock().launches[0].pid;
    let _ = nix::sys::wait::waitpid(nix::unistd::Pid::from_raw(pid), None);
}
