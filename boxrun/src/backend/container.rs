use super::error::BackendError;
use super::kill;
use crate::runtime::{Container, ContainerConfig, ContainerState, Process, ProcessSpec, ProcessStdio};
use boxrun_shared::constants::activation::SD_LISTEN_FDS_START;
use boxrun_shared::constants::runtime::CONFIG_FILE;
use boxrun_shared::errors::{BoxrunError, BoxrunResult};
use libcontainer::container::builder::ContainerBuilder;
use libcontainer::container::{Container as LibContainer, ContainerStatus};
use libcontainer::syscall::syscall::SyscallType;
use oci_spec::runtime::{MountBuilder, Spec};
use std::collections::HashMap;
use std::os::fd::RawFd;
use std::path::PathBuf;

/// A sandbox managed by libcontainer.
#[derive(Debug)]
pub struct LibcontainerContainer {
    id: String,
    config: ContainerConfig,
    state_root: PathBuf,
    bundle_dir: PathBuf,
    systemd: bool,
    destroyed: bool,
}

impl LibcontainerContainer {
    pub(super) fn new(
        id: &str,
        config: ContainerConfig,
        state_root: PathBuf,
        bundle_dir: PathBuf,
        systemd: bool,
    ) -> Self {
        Self {
            id: id.to_string(),
            config,
            state_root,
            bundle_dir,
            systemd,
            destroyed: false,
        }
    }

    /// Handle for a container created by an earlier invocation.
    pub(super) fn loaded(
        id: &str,
        config: ContainerConfig,
        state_root: PathBuf,
        bundle_dir: PathBuf,
        systemd: bool,
    ) -> Self {
        Self::new(id, config, state_root, bundle_dir, systemd)
    }

    fn state_path(&self) -> PathBuf {
        self.state_root.join(&self.id)
    }

    fn load_state(&self) -> Option<LibContainer> {
        LibContainer::load(self.state_path()).ok()
    }

    /// Write the init process's bundle: the base spec with the process,
    /// root path and extra mounts replaced.
    fn write_bundle(&self, spec: &ProcessSpec) -> Result<(), BackendError> {
        let mut oci: Spec = self
            .config
            .oci
            .clone()
            .ok_or_else(|| BackendError::Spec("configuration has no OCI runtime spec".into()))?;

        let mut process = oci.process().clone().unwrap_or_default();
        process
            .set_args(Some(spec.args.clone()))
            .set_env(Some(spec.env.clone()))
            .set_cwd(spec.cwd.clone())
            // stdio is already a pty slave or pipe; libcontainer must not allocate one
            .set_terminal(Some(false));
        process
            .user_mut()
            .set_uid(spec.user.uid)
            .set_gid(spec.user.gid)
            .set_additional_gids(Some(spec.user.additional_gids.clone()));
        oci.set_process(Some(process));

        let mut root = oci.root().clone().unwrap_or_default();
        root.set_path(self.config.rootfs().to_path_buf());
        oci.set_root(Some(root));

        if !self.config.mounts.is_empty() {
            let mut mounts = oci.mounts().clone().unwrap_or_default();
            for mount in &self.config.mounts {
                mounts.push(
                    MountBuilder::default()
                        .destination(&mount.destination)
                        .typ("bind")
                        .source(&mount.source)
                        .options(mount.options.clone())
                        .build()
                        .map_err(|e| {
                            BackendError::Spec(format!(
                                "bind mount {} → {}: {}",
                                mount.source.display(),
                                mount.destination.display(),
                                e
                            ))
                        })?,
                );
            }
            oci.set_mounts(Some(mounts));
        }

        let path = self.bundle_dir.join(CONFIG_FILE);
        oci.save(&path)
            .map_err(|e| BackendError::Spec(format!("write {}: {}", path.display(), e)))
    }

    fn builder(&self, stdio: ProcessStdio, preserved: usize) -> Result<ContainerBuilder, BackendError> {
        ContainerBuilder::new(self.id.clone(), SyscallType::default())
            .with_root_path(self.state_root.clone())
            .map_err(|e| BackendError::libcontainer("set root path", e))?
            .with_preserved_fds(preserved as i32)
            .with_stdin(stdio.stdin)
            .with_stdout(stdio.stdout)
            .with_stderr(stdio.stderr)
            .validate_id()
            .map_err(|e| BackendError::libcontainer("validate id", e))
    }

    fn start_init(&mut self, process: &Process, stdio: ProcessStdio) -> Result<i32, BackendError> {
        let spec = process.spec();

        // A previous init left stopped state behind; it has to go first.
        if let Some(mut stale) = self.load_state() {
            kill::delete_container(&mut stale)
                .map_err(|e| BackendError::libcontainer("remove stopped init", e))?;
        }
        self.write_bundle(spec)?;

        let mut container = self
            .builder(stdio, spec.extra_fds.len())?
            .as_init(&self.bundle_dir)
            .with_systemd(self.systemd)
            .with_detach(process.detach())
            .build()
            .map_err(|e| BackendError::libcontainer("create init", e))?;
        container
            .start()
            .map_err(|e| BackendError::libcontainer("start init", e))?;

        let pid = container
            .pid()
            .ok_or_else(|| BackendError::Libcontainer("init started without a pid".into()))?;
        Ok(pid.as_raw())
    }

    fn start_tenant(&self, process: &Process, stdio: ProcessStdio) -> Result<i32, BackendError> {
        let spec = process.spec();
        let env: HashMap<String, String> = spec.env_pairs().into_iter().collect();

        let pid = self
            .builder(stdio, spec.extra_fds.len())?
            .as_tenant()
            .with_detach(process.detach())
            .with_cwd(Some(spec.cwd.clone()))
            .with_env(env)
            .with_container_args(spec.args.clone())
            .build()
            .map_err(|e| {
                BackendError::libcontainer(&format!("spawn {:?}", spec.args), e)
            })?;
        Ok(pid.as_raw())
    }
}

impl Container for LibcontainerContainer {
    fn id(&self) -> &str {
        &self.id
    }

    fn config(&self) -> &ContainerConfig {
        &self.config
    }

    /// Nothing is persisted: every launch writes its own process into the
    /// bundle, so the template is only checked here.
    fn create(&mut self, template: &ProcessSpec) -> BoxrunResult<()> {
        if template.args.is_empty() {
            return Err(BoxrunError::Factory("process template has no args".into()));
        }
        Ok(())
    }

    fn start(&mut self, process: &mut Process) -> BoxrunResult<()> {
        if self.destroyed {
            return Err(BoxrunError::Start(format!("container {} is destroyed", self.id)));
        }
        check_contiguous(&process.spec().extra_fds).map_err(BackendError::into_start)?;
        let stdio = process
            .take_stdio()
            .ok_or_else(|| BoxrunError::Internal("process has no stdio attached".into()))?;

        if !process.detach() {
            // Init and tenants are re-parented away from us otherwise.
            nix::sys::prctl::set_child_subreaper(true)
                .map_err(|e| BoxrunError::Start(format!("set child subreaper: {}", e)))?;
        }

        let running = self
            .load_state()
            .is_some_and(|c| c.status() == ContainerStatus::Running);
        let pid = if running {
            self.start_tenant(process, stdio)
        } else {
            self.start_init(process, stdio)
        }
        .map_err(BackendError::into_start)?;

        tracing::debug!(container_id = %self.id, pid, tenant = running, "libcontainer process started");
        process.set_pid(pid);
        Ok(())
    }

    fn status(&self) -> BoxrunResult<ContainerState> {
        if self.destroyed {
            return Ok(ContainerState::Destroyed);
        }
        let path = self.state_path();
        if !path.exists() {
            return Ok(ContainerState::Created);
        }
        let container = LibContainer::load(path).map_err(|e| {
            BoxrunError::Internal(format!("load state of {}: {}", self.id, e))
        })?;
        Ok(map_status(container.status()))
    }

    fn destroy(&mut self) -> BoxrunResult<()> {
        if self.destroyed {
            return Ok(());
        }

        if let Some(mut container) = self.load_state() {
            kill::kill_container(&mut container);
            kill::delete_container(&mut container).map_err(|e| {
                BoxrunError::Internal(format!("delete container {}: {}", self.id, e))
            })?;
        }

        match std::fs::remove_dir_all(&self.bundle_dir) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                return Err(BackendError::filesystem(&self.bundle_dir, e).into_factory());
            }
        }

        self.destroyed = true;
        Ok(())
    }
}

fn map_status(status: ContainerStatus) -> ContainerState {
    match status {
        ContainerStatus::Creating | ContainerStatus::Created => ContainerState::Created,
        ContainerStatus::Running | ContainerStatus::Paused => ContainerState::Running,
        ContainerStatus::Stopped => ContainerState::Stopped,
    }
}

/// Extra descriptors have to be 3, 4, 5, ... for `preserve_fds` to pass them.
fn check_contiguous(fds: &[RawFd]) -> Result<(), BackendError> {
    let contiguous = fds
        .iter()
        .enumerate()
        .all(|(i, &fd)| fd == SD_LISTEN_FDS_START + i as RawFd);
    if contiguous {
        Ok(())
    } else {
        Err(BackendError::NonContiguousFds(fds.to_vec()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn container(root: &TempDir) -> LibcontainerContainer {
        let mut config = ContainerConfig::new("/");
        config.oci = Some(Spec::default());
        LibcontainerContainer::new(
            "test",
            config,
            root.path().join("containers"),
            root.path().join("bundles/test"),
            false,
        )
    }

    #[test]
    fn test_check_contiguous() {
        assert!(check_contiguous(&[]).is_ok());
        assert!(check_contiguous(&[3, 4, 5]).is_ok());
        assert!(check_contiguous(&[4]).is_err());
        assert!(check_contiguous(&[3, 5]).is_err());
    }

    #[test]
    fn test_status_and_idempotent_destroy() {
        let root = TempDir::new().unwrap();
        let mut c = container(&root);
        assert_eq!(c.status().unwrap(), ContainerState::Created);
        c.destroy().unwrap();
        c.destroy().unwrap();
        assert_eq!(c.status().unwrap(), ContainerState::Destroyed);
    }

    #[test]
    fn test_write_bundle_replaces_process() {
        let root = TempDir::new().unwrap();
        let c = container(&root);
        std::fs::create_dir_all(&c.bundle_dir).unwrap();

        let mut spec = ProcessSpec::new(["/bin/app", "--serve"]);
        spec.push_env("LISTEN_FDS", "1");
        spec.terminal = true;
        c.write_bundle(&spec).unwrap();

        let written = Spec::load(c.bundle_dir.join(CONFIG_FILE)).unwrap();
        let process = written.process().as_ref().unwrap();
        assert_eq!(
            process.args().as_ref().unwrap(),
            &vec!["/bin/app".to_string(), "--serve".into()]
        );
        assert_eq!(process.terminal(), Some(false));
        assert_eq!(written.root().as_ref().unwrap().path(), &PathBuf::from("/"));
    }

    #[test]
    fn test_create_rejects_empty_template() {
        let root = TempDir::new().unwrap();
        let mut c = container(&root);
        let empty = ProcessSpec::new(Vec::<String>::new());
        assert!(matches!(c.create(&empty), Err(BoxrunError::Factory(_))));
        assert!(c.create(&ProcessSpec::new(["sh"])).is_ok());
    }

    #[test]
    fn test_start_after_destroy_fails() {
        let root = TempDir::new().unwrap();
        let mut c = container(&root);
        c.destroy().unwrap();
        let mut process = Process::new(ProcessSpec::new(["true"]), false);
        assert!(matches!(c.start(&mut process), Err(BoxrunError::Start(_))));
    }
}
