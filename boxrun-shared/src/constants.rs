//! Shared constants between the runtime library and the CLI
//!
//! Protocol numbers and environment names here are fixed by the protocols
//! they belong to (sd_listen_fds, sd_notify) and must not drift.

/// Socket activation protocol (sd_listen_fds)
pub mod activation {
    /// First descriptor number handed over by the supervisor
    pub const SD_LISTEN_FDS_START: i32 = 3;

    /// Number of inherited listening descriptors
    pub const LISTEN_FDS: &str = "LISTEN_FDS";

    /// Pid the descriptors were meant for
    pub const LISTEN_PID: &str = "LISTEN_PID";

    /// The contained process is pid 1 inside its own pid namespace
    pub const CONTAINER_LISTEN_PID: &str = "1";
}

/// Readiness notification protocol (sd_notify)
pub mod notify {
    /// Path of the supervisor's notification socket
    pub const NOTIFY_SOCKET: &str = "NOTIFY_SOCKET";

    /// Bind mount options for the relayed socket
    pub const MOUNT_OPTIONS: &[&str] = &["bind"];
}

/// Runtime layout and environment
pub mod runtime {
    /// Default state root when neither `--root` nor `BOXRUN_ROOT` is given
    pub const DEFAULT_STATE_ROOT: &str = "/run/boxrun";

    /// Environment override for the state root
    pub const ROOT_ENV: &str = "BOXRUN_ROOT";

    /// OCI bundle configuration file name
    pub const CONFIG_FILE: &str = "config.json";

    /// Per-container runtime state (owned by libcontainer)
    pub const CONTAINERS_DIR: &str = "containers";

    /// Per-container generated bundles
    pub const BUNDLES_DIR: &str = "bundles";
}

/// Batch script format
pub mod batch {
    /// Script source that means "read from standard input"
    pub const STDIN_SOURCE: &str = "-";

    /// Lines starting with this are ignored
    pub const COMMENT_PREFIX: char = '#';

    /// Batch result when a command could not be launched at all
    pub const LAUNCH_ERROR_CODE: i32 = -1;
}

/// Exit status conventions
pub mod exit {
    /// A child killed by signal N reports `SIGNAL_OFFSET + N`
    pub const SIGNAL_OFFSET: i32 = 128;
}
