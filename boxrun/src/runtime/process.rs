//! Process description and the running-process handle.

use std::os::fd::{OwnedFd, RawFd};
use std::path::PathBuf;

/// Identity the process runs as, inside the sandbox.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct User {
    pub uid: u32,
    pub gid: u32,
    pub additional_gids: Vec<u32>,
}

/// What to run.
///
/// Built once per launch from a template (the container's default process),
/// with the argument vector overridden for `run` and `batch`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessSpec {
    /// Program and arguments
    pub args: Vec<String>,

    /// Environment as `KEY=VALUE`, in order; duplicates allowed, last wins
    pub env: Vec<String>,

    /// Working directory inside the sandbox
    pub cwd: PathBuf,

    /// Allocate a pseudo-terminal for stdio
    pub terminal: bool,

    /// Identity inside the sandbox
    pub user: User,

    /// Descriptors inherited after stdin/stdout/stderr, in order
    pub extra_fds: Vec<RawFd>,
}

impl Default for ProcessSpec {
    fn default() -> Self {
        Self {
            args: Vec::new(),
            env: Vec::new(),
            cwd: PathBuf::from("/"),
            terminal: false,
            user: User::default(),
            extra_fds: Vec::new(),
        }
    }
}

impl ProcessSpec {
    /// Spec running `args` with everything else defaulted.
    pub fn new<I, S>(args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            args: args.into_iter().map(Into::into).collect(),
            ..Default::default()
        }
    }

    /// Derive a spec from this template with only the argument vector replaced.
    ///
    /// Terminal flag, user, environment and working directory are kept.
    /// Extra descriptors are not: they are attached per launch.
    pub fn with_args(&self, args: Vec<String>) -> Self {
        Self {
            args,
            env: self.env.clone(),
            cwd: self.cwd.clone(),
            terminal: self.terminal,
            user: self.user.clone(),
            extra_fds: Vec::new(),
        }
    }

    /// Append `KEY=VALUE` to the environment.
    pub fn push_env(&mut self, key: &str, value: impl AsRef<str>) {
        self.env.push(format!("{}={}", key, value.as_ref()));
    }

    /// Look up `key`; the last occurrence wins.
    pub fn env_lookup(&self, key: &str) -> Option<&str> {
        self.env.iter().rev().find_map(|entry| {
            let (k, v) = entry.split_once('=')?;
            (k == key).then_some(v)
        })
    }

    /// Environment collapsed into unique keys, last occurrence winning.
    pub fn env_pairs(&self) -> Vec<(String, String)> {
        let mut pairs: Vec<(String, String)> = Vec::new();
        for entry in &self.env {
            let Some((k, v)) = entry.split_once('=') else {
                continue;
            };
            match pairs.iter_mut().find(|(existing, _)| existing == k) {
                Some(slot) => slot.1 = v.to_string(),
                None => pairs.push((k.to_string(), v.to_string())),
            }
        }
        pairs
    }

    /// Program name, for logging.
    pub fn program(&self) -> &str {
        self.args.first().map(String::as_str).unwrap_or("")
    }
}

/// Process-side ends of the standard streams, as handed to the sandbox.
#[derive(Debug)]
pub struct ProcessStdio {
    pub stdin: OwnedFd,
    pub stdout: OwnedFd,
    pub stderr: OwnedFd,
}

/// A [`ProcessSpec`] on its way into, and then running inside, a sandbox.
///
/// Owns the process-side stdio until the container takes it at start. Any
/// descriptors still held are closed when the process value is dropped.
#[derive(Debug)]
pub struct Process {
    spec: ProcessSpec,
    stdio: Option<ProcessStdio>,
    detach: bool,
    pid: Option<i32>,
}

impl Process {
    pub fn new(spec: ProcessSpec, detach: bool) -> Self {
        Self {
            spec,
            stdio: None,
            detach,
            pid: None,
        }
    }

    pub fn spec(&self) -> &ProcessSpec {
        &self.spec
    }

    /// Whether the launcher will return without waiting for exit.
    pub fn detach(&self) -> bool {
        self.detach
    }

    /// Attach process-side stdio (called by the I/O strategy).
    pub fn set_stdio(&mut self, stdio: ProcessStdio) {
        self.stdio = Some(stdio);
    }

    /// Take process-side stdio (called by the container at start).
    pub fn take_stdio(&mut self) -> Option<ProcessStdio> {
        self.stdio.take()
    }

    pub fn has_stdio(&self) -> bool {
        self.stdio.is_some()
    }

    /// Record the OS pid once started.
    pub fn set_pid(&mut self, pid: i32) {
        self.pid = Some(pid);
    }

    /// OS pid, once started.
    pub fn pid(&self) -> Option<i32> {
        self.pid
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn template() -> ProcessSpec {
        ProcessSpec {
            args: vec!["sh".into()],
            env: vec!["PATH=/bin".into(), "TERM=xterm".into()],
            cwd: PathBuf::from("/srv"),
            terminal: true,
            user: User {
                uid: 1000,
                gid: 1000,
                additional_gids: vec![10],
            },
            extra_fds: vec![3, 4],
        }
    }

    #[test]
    fn test_with_args_keeps_template_fields() {
        let derived = template().with_args(vec!["echo".into(), "a".into()]);
        assert_eq!(derived.args, vec!["echo", "a"]);
        assert_eq!(derived.env, template().env);
        assert_eq!(derived.cwd, PathBuf::from("/srv"));
        assert!(derived.terminal);
        assert_eq!(derived.user.uid, 1000);
        assert!(derived.extra_fds.is_empty());
    }

    #[test]
    fn test_env_lookup_last_wins() {
        let mut spec = template();
        spec.push_env("TERM", "dumb");
        assert_eq!(spec.env_lookup("TERM"), Some("dumb"));
        assert_eq!(spec.env_lookup("PATH"), Some("/bin"));
        assert_eq!(spec.env_lookup("HOME"), None);
    }

    #[test]
    fn test_env_pairs_collapse_duplicates_in_order() {
        let mut spec = template();
        spec.push_env("PATH", "/usr/bin");
        spec.env.push("MALFORMED".into());
        assert_eq!(
            spec.env_pairs(),
            vec![
                ("PATH".to_string(), "/usr/bin".to_string()),
                ("TERM".to_string(), "xterm".to_string()),
            ]
        );
    }

    #[test]
    fn test_process_stdio_is_taken_once() {
        let (r, w) = nix::unistd::pipe().unwrap();
        let (r2, _w2) = nix::unistd::pipe().unwrap();
        let mut process = Process::new(ProcessSpec::new(["true"]), false);
        process.set_stdio(ProcessStdio {
            stdin: r,
            stdout: w,
            stderr: r2,
        });
        assert!(process.take_stdio().is_some());
        assert!(process.take_stdio().is_none());
        assert!(process.pid().is_none());
        process.set_pid(42);
        assert_eq!(process.pid(), Some(42));
    }
}
