use boxrun::runtime::{Container, ContainerConfig, ContainerState, Factory, Process, ProcessSpec};
use boxrun::{BoxrunError, BoxrunResult};
use parking_lot::Mutex;
use std::os::fd::RawFd;
use std::os::unix::process::CommandExt;
use std::process::{Command, Stdio};
use std::sync::Arc;

/// Failures to inject and state to report.
#[derive(Debug, Clone, Default)]
pub struct Behavior {
    pub fail_create: bool,
    pub fail_start: bool,
    pub fail_status: bool,
    pub fail_destroy: bool,
    /// Reported by `status()` instead of the tracked state
    pub state: Option<ContainerState>,
    /// Reported by `start()` instead of the spawned child's pid
    pub report_pid: Option<i32>,
}

/// One `start()` call as seen by the container.
#[derive(Debug, Clone)]
pub struct Launch {
    pub args: Vec<String>,
    pub env: Vec<String>,
    pub terminal: bool,
    pub extra_fds: Vec<RawFd>,
    pub pid: i32,
}

/// Everything the containers of one factory were asked to do.
#[derive(Debug, Default)]
pub struct Record {
    pub created: Vec<String>,
    pub templates: Vec<ProcessSpec>,
    pub launches: Vec<Launch>,
    pub failed_starts: usize,
    pub destroy_calls: usize,
}

/// Factory of [`HostContainer`]s sharing one [`Record`].
#[derive(Debug, Clone, Default)]
pub struct HostFactory {
    behavior: Behavior,
    record: Arc<Mutex<Record>>,
}

impl HostFactory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_behavior(behavior: Behavior) -> Self {
        Self {
            behavior,
            record: Arc::default(),
        }
    }

    pub fn record(&self) -> Arc<Mutex<Record>> {
        Arc::clone(&self.record)
    }

    /// A container without going through the lifecycle manager.
    pub fn container(&self, id: &str, config: ContainerConfig) -> HostContainer {
        HostContainer {
            id: id.to_string(),
            config,
            behavior: self.behavior.clone(),
            record: self.record(),
            state: ContainerState::Created,
        }
    }
}

impl Factory for HostFactory {
    fn create(&self, id: &str, config: ContainerConfig) -> BoxrunResult<Box<dyn Container>> {
        if self.behavior.fail_create {
            return Err(BoxrunError::Factory(format!("injected create failure for {}", id)));
        }
        self.record.lock().created.push(id.to_string());
        Ok(Box::new(self.container(id, config)))
    }

    fn load(&self, id: &str) -> BoxrunResult<Box<dyn Container>> {
        Err(BoxrunError::Factory(format!("container {} has no persistent state", id)))
    }
}

/// Runs processes directly on the host.
#[derive(Debug)]
pub struct HostContainer {
    id: String,
    config: ContainerConfig,
    behavior: Behavior,
    record: Arc<Mutex<Record>>,
    state: ContainerState,
}

impl HostContainer {
    fn spawn(&self, process: &mut Process) -> BoxrunResult<i32> {
        let stdio = process
            .take_stdio()
            .ok_or_else(|| BoxrunError::Internal("process has no stdio attached".into()))?;
        let spec = process.spec();
        let (program, args) = spec
            .args
            .split_first()
            .ok_or_else(|| BoxrunError::Start("empty argument vector".into()))?;

        let mut cmd = Command::new(program);
        cmd.args(args)
            .env_clear()
            .envs(spec.env_pairs())
            .stdin(Stdio::from(stdio.stdin))
            .stdout(Stdio::from(stdio.stdout))
            .stderr(Stdio::from(stdio.stderr));

        if spec.terminal {
            // SAFETY: setsid and ioctl are async-signal-safe.
            unsafe {
                cmd.pre_exec(|| {
                    if libc::setsid() == -1 {
                        return Err(std::io::Error::last_os_error());
                    }
                    if libc::ioctl(0, libc::TIOCSCTTY, 0) == -1 {
                        return Err(std::io::Error::last_os_error());
                    }
                    Ok(())
                });
            }
        }

        let child = cmd
            .spawn()
            .map_err(|e| BoxrunError::Start(format!("spawn {}: {}", program, e)))?;
        Ok(child.id() as i32)
    }
}

impl Container for HostContainer {
    fn id(&self) -> &str {
        &self.id
    }

    fn config(&self) -> &ContainerConfig {
        &self.config
    }

    fn create(&mut self, template: &ProcessSpec) -> BoxrunResult<()> {
        self.record.lock().templates.push(template.clone());
        Ok(())
    }

    fn start(&mut self, process: &mut Process) -> BoxrunResult<()> {
        if self.behavior.fail_start {
            self.record.lock().failed_starts += 1;
            return Err(BoxrunError::Start("injected start failure".into()));
        }

        let pid = self.spawn(process)?;
        let pid = self.behavior.report_pid.unwrap_or(pid);
        process.set_pid(pid);
        self.state = ContainerState::Running;

        let spec = process.spec();
        self.record.lock().launches.push(Launch {
            args: spec.args.clone(),
            env: spec.env.clone(),
            terminal: spec.terminal,
            extra_fds: spec.extra_fds.clone(),
            pid,
        });
        Ok(())
    }

    fn status(&self) -> BoxrunResult<ContainerState> {
        if self.behavior.fail_status {
            return Err(BoxrunError::Internal("injected status failure".into()));
        }
        Ok(self.behavior.state.unwrap_or(self.state))
    }

    fn destroy(&mut self) -> BoxrunResult<()> {
        self.record.lock().destroy_calls += 1;
        if self.behavior.fail_destroy {
            return Err(BoxrunError::Internal("injected destroy failure".into()));
        }
        self.state = ContainerState::Destroyed;
        Ok(())
    }
}
