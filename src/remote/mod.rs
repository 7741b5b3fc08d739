// ============================================================================
// File: packages/gridplane/src/remote/mod.rs
// ----------------------------------------------------------------------------
// Remote execution over SSH.
//
// The `RemoteShell` trait is what backends and the job coordinator depend on;
// `SshExecutor` implements it with libssh2. Every method blocks, so async
// callers run them on `tokio::task::spawn_blocking`.
// ============================================================================

mod executor;
mod ssh;

use std::path::Path;

pub use executor::SshExecutor;
pub use ssh::{SshAuth, SshTarget};

use crate::error::GridError;

/// Failures of remote execution
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RemoteError {
    /// Host unreachable: TCP connect, handshake or timeout
    #[error("Connection to {host} failed: {details}")]
    Connection { host: String, details: String },

    /// Host rejected the credentials
    #[error("Authentication of {user}@{host} failed: {details}")]
    Auth {
        host: String,
        user: String,
        details: String,
    },

    /// SCP failure in either direction
    #[error("Transfer of {path} failed: {details}")]
    Transfer { path: String, details: String },

    /// Remote command ran but did not succeed
    #[error("Command '{command}' exited with {exit_code}: {stderr}")]
    CommandFailed {
        command: String,
        exit_code: i32,
        stderr: String,
    },

    /// Local staging file could not be read or written
    #[error("Local I/O failed on {path}: {details}")]
    LocalIo { path: String, details: String },
}

impl From<RemoteError> for GridError {
    fn from(err: RemoteError) -> Self {
        match err {
            RemoteError::Connection { host, details } => GridError::Connection { host, details },
            RemoteError::Auth { host, details, .. } => GridError::Auth { host, details },
            RemoteError::Transfer { .. } => GridError::Transfer(err.to_string()),
            RemoteError::CommandFailed { .. } => GridError::backend("RemoteShell", err.to_string()),
            RemoteError::LocalIo { .. } => GridError::system(err.to_string()),
        }
    }
}

/// Result type for remote operations
pub type RemoteResult<T> = Result<T, RemoteError>;

/// What a remote command produced
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandOutcome {
    /// Foreground command ran to completion
    Completed {
        exit_code: i32,
        stdout: String,
        stderr: String,
    },
    /// Background command was detached; observe it by polling `pid`
    Background { pid: u32 },
}

impl CommandOutcome {
    /// Stdout of a successful foreground command
    ///
    /// A non-zero exit becomes `CommandFailed`; a background outcome yields
    /// an empty string.
    pub fn into_stdout(self, command: &str) -> RemoteResult<String> {
        match self {
            CommandOutcome::Completed {
                exit_code: 0,
                stdout,
                ..
            } => Ok(stdout),
            CommandOutcome::Completed {
                exit_code, stderr, ..
            } => Err(RemoteError::CommandFailed {
                command: command.to_string(),
                exit_code,
                stderr: stderr.trim().to_string(),
            }),
            CommandOutcome::Background { .. } => Ok(String::new()),
        }
    }

    /// Process id of a background command
    pub fn pid(&self) -> Option<u32> {
        match self {
            CommandOutcome::Background { pid } => Some(*pid),
            CommandOutcome::Completed { .. } => None,
        }
    }
}

/// Command execution and file transfer on a remote host
pub trait RemoteShell: Send + Sync + std::fmt::Debug {
    /// Run `command`, optionally from `working_dir`
    ///
    /// In background mode the command is detached and its pid returned at
    /// once; otherwise the call blocks until the command exits.
    fn exec_command(
        &self,
        target: &SshTarget,
        command: &str,
        working_dir: Option<&str>,
        background: bool,
    ) -> RemoteResult<CommandOutcome>;

    /// Pull `remote_path` into `local_dest`
    fn copy_file(&self, target: &SshTarget, remote_path: &str, local_dest: &Path)
    -> RemoteResult<()>;

    /// Pull a job's output and error files
    fn copy_files(
        &self,
        target: &SshTarget,
        out_path: &str,
        err_path: &str,
        local_out: &Path,
        local_err: &Path,
    ) -> RemoteResult<()> {
        self.copy_file(target, out_path, local_out)?;
        self.copy_file(target, err_path, local_err)
    }

    /// Push `local` to `remote_path` with permission bits `mode`
    fn upload_file(
        &self,
        target: &SshTarget,
        local: &Path,
        remote_path: &str,
        mode: i32,
    ) -> RemoteResult<()>;

    /// Cheap liveness probe: can we log in and run a no-op?
    fn is_ready_connection(&self, target: &SshTarget) -> bool {
        matches!(
            self.exec_command(target, "true", None, false),
            Ok(CommandOutcome::Completed { exit_code: 0, .. })
        )
    }
}

/// Quote `value` for a POSIX shell
pub fn shell_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', "'\"'\"'"))
}

/// Full command line sent over the channel
pub(crate) fn compose_command(command: &str, working_dir: Option<&str>, background: bool) -> String {
    let cd = working_dir
        .filter(|dir| !dir.is_empty())
        .map(|dir| format!("cd {} && ", shell_quote(dir)))
        .unwrap_or_default();

    if background {
        format!(
            "{cd}nohup sh -c {} > /dev/null 2>&1 & echo $!",
            shell_quote(command)
        )
    } else {
        format!("{cd}{command}")
    }
}

/// Pid echoed by a background launch
pub(crate) fn parse_background_pid(command: &str, stdout: &str) -> RemoteResult<u32> {
    stdout
        .lines()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .and_then(|line| line.parse::<u32>().ok())
        .ok_or_else(|| RemoteError::CommandFailed {
            command: command.to_string(),
            exit_code: 0,
            stderr: format!("no process id in output '{}'", stdout.trim()),
        })
}
