//! Sequential execution of a command script inside one sandbox.
//!
//! Script format: one command per line, arguments split on whitespace (no
//! quoting). Blank lines and lines starting with `#` are skipped.
//!
//! ```text
//! # prepare
//! mkdir -p /data
//! /usr/bin/app --init
//! ```

use crate::launcher::{LaunchOptions, ProcessLauncher, StdinMode};
use crate::runtime::{Container, ProcessSpec};
use boxrun_shared::constants::batch::{COMMENT_PREFIX, LAUNCH_ERROR_CODE, STDIN_SOURCE};
use boxrun_shared::errors::{BoxrunError, BoxrunResult};
use std::os::fd::RawFd;
use std::path::PathBuf;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWriteExt, BufReader};

/// Where a batch script is read from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScriptSource {
    Stdin,
    File(PathBuf),
}

impl ScriptSource {
    /// `-` means stdin; anything else is a path.
    pub fn parse(arg: &str) -> Self {
        if arg == STDIN_SOURCE {
            Self::Stdin
        } else {
            Self::File(PathBuf::from(arg))
        }
    }

    pub fn is_stdin(&self) -> bool {
        matches!(self, Self::Stdin)
    }

    /// Open the script for line-by-line reading.
    pub async fn open(&self) -> BoxrunResult<Box<dyn AsyncBufRead + Send + Unpin>> {
        match self {
            Self::Stdin => Ok(Box::new(BufReader::new(tokio::io::stdin()))),
            Self::File(path) => {
                let file = tokio::fs::File::open(path).await.map_err(|e| {
                    BoxrunError::Config(format!("cannot open batch script {}: {}", path.display(), e))
                })?;
                Ok(Box::new(BufReader::new(file)))
            }
        }
    }
}

/// Argument vector of one script line, or `None` for blank and comment lines.
pub fn parse_line(line: &str) -> Option<Vec<String>> {
    let line = line.trim();
    if line.is_empty() || line.starts_with(COMMENT_PREFIX) {
        return None;
    }
    Some(line.split_whitespace().map(str::to_string).collect())
}

/// Drives a [`ProcessLauncher`] over a script.
#[derive(Debug, Clone, Default)]
pub struct BatchRunner {
    launcher: ProcessLauncher,
    pid_file: Option<PathBuf>,
    console: Option<PathBuf>,
}

impl BatchRunner {
    pub fn new(launcher: ProcessLauncher) -> Self {
        Self {
            launcher,
            pid_file: None,
            console: None,
        }
    }

    /// Write each command's pid to `path` as it starts.
    pub fn with_pid_file(mut self, path: PathBuf) -> Self {
        self.pid_file = Some(path);
        self
    }

    /// Attach terminal commands to the pty slave at `path`.
    pub fn with_console(mut self, path: PathBuf) -> Self {
        self.console = Some(path);
        self
    }

    /// Run `source` against `container`.
    pub async fn run(
        &self,
        container: &mut dyn Container,
        template: &ProcessSpec,
        source: &ScriptSource,
        extra_fds: &[RawFd],
    ) -> BoxrunResult<i32> {
        let reader = source.open().await?;
        self.run_batch(container, template, reader, source.is_stdin(), extra_fds)
            .await
    }

    /// Run commands read from `script` one after another.
    ///
    /// Returns 0 if every command exits 0, otherwise the first non-zero
    /// exit code. A command that cannot be launched stops the batch with
    /// [`LAUNCH_ERROR_CODE`]. When the script comes from stdin, commands get
    /// no terminal and an empty stdin.
    pub async fn run_batch<R>(
        &self,
        container: &mut dyn Container,
        template: &ProcessSpec,
        script: R,
        from_stdin: bool,
        extra_fds: &[RawFd],
    ) -> BoxrunResult<i32>
    where
        R: AsyncBufRead + Unpin,
    {
        let options = LaunchOptions {
            pid_file: self.pid_file.clone(),
            detach: false,
            stdin: if from_stdin {
                StdinMode::Null
            } else {
                StdinMode::Inherit
            },
            console: self.console.clone(),
        };

        let mut lines = script.lines();
        let mut stdout = tokio::io::stdout();
        while let Some(line) = lines.next_line().await? {
            let Some(args) = parse_line(&line) else {
                continue;
            };

            let mut spec = template.with_args(args);
            if from_stdin {
                spec.terminal = false;
            }

            stdout
                .write_all(format!("--> {:?}\n", spec.args).as_bytes())
                .await?;
            stdout.flush().await?;

            match self.launcher.run(container, &spec, extra_fds, &options).await {
                Ok(0) => {}
                Ok(code) => {
                    tracing::info!(container_id = %container.id(), code, args = ?spec.args, "Batch command failed");
                    return Ok(code);
                }
                Err(e) => {
                    tracing::error!(container_id = %container.id(), args = ?spec.args, "Failed to launch batch command: {}", e);
                    return Ok(LAUNCH_ERROR_CODE);
                }
            }
        }

        Ok(0)
    }
}
