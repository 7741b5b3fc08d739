// ============================================================================
// File: packages/gridplane/src/remote/executor.rs
// ----------------------------------------------------------------------------
// libssh2 implementation of `RemoteShell`: command execution and SCP in
// both directions.
// ============================================================================

use std::fs::File;
use std::io::Read;
use std::path::Path;
use std::time::Duration;

use log::debug;

use super::ssh::create_session;
use super::{
    CommandOutcome, RemoteError, RemoteResult, RemoteShell, SshAuth, SshTarget, compose_command,
    parse_background_pid,
};

/// Runs commands and copies files over SSH
#[derive(Debug, Clone)]
pub struct SshExecutor {
    auth: SshAuth,
    connect_timeout: Duration,
}

impl Default for SshExecutor {
    fn default() -> Self {
        Self {
            auth: SshAuth::Agent,
            connect_timeout: Duration::from_secs(30),
        }
    }
}

impl SshExecutor {
    pub fn new(auth: SshAuth) -> Self {
        Self {
            auth,
            ..Default::default()
        }
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    fn session(&self, target: &SshTarget) -> RemoteResult<ssh2::Session> {
        create_session(target, &self.auth, self.connect_timeout)
    }
}

impl RemoteShell for SshExecutor {
    fn exec_command(
        &self,
        target: &SshTarget,
        command: &str,
        working_dir: Option<&str>,
        background: bool,
    ) -> RemoteResult<CommandOutcome> {
        let line = compose_command(command, working_dir, background);
        let session = self.session(target)?;

        let channel_error = |details: String| RemoteError::Connection {
            host: target.host.clone(),
            details,
        };

        let mut channel = session
            .channel_session()
            .map_err(|e| channel_error(format!("Failed to create channel: {e}")))?;
        channel
            .exec(&line)
            .map_err(|e| channel_error(format!("Exec failed: {e}")))?;

        let mut stdout = String::new();
        channel
            .read_to_string(&mut stdout)
            .map_err(|e| channel_error(format!("Read stdout failed: {e}")))?;

        let mut stderr = String::new();
        channel
            .stderr()
            .read_to_string(&mut stderr)
            .map_err(|e| channel_error(format!("Read stderr failed: {e}")))?;

        channel
            .wait_close()
            .map_err(|e| channel_error(format!("Wait close failed: {e}")))?;
        let exit_code = channel
            .exit_status()
            .map_err(|e| channel_error(format!("Get exit status failed: {e}")))?;

        debug!(
            "{}@{}: '{}' exited with {}",
            target.user, target.host, command, exit_code
        );

        if background {
            if exit_code != 0 {
                return Err(RemoteError::CommandFailed {
                    command: command.to_string(),
                    exit_code,
                    stderr: stderr.trim().to_string(),
                });
            }
            let pid = parse_background_pid(command, &stdout)?;
            return Ok(CommandOutcome::Background { pid });
        }

        Ok(CommandOutcome::Completed {
            exit_code,
            stdout,
            stderr,
        })
    }

    fn copy_file(
        &self,
        target: &SshTarget,
        remote_path: &str,
        local_dest: &Path,
    ) -> RemoteResult<()> {
        let session = self.session(target)?;
        let transfer_error = |details: String| RemoteError::Transfer {
            path: remote_path.to_string(),
            details,
        };

        let (mut remote_file, stat) = session
            .scp_recv(Path::new(remote_path))
            .map_err(|e| transfer_error(format!("SCP failed: {e}")))?;

        let mut local_file = File::create(local_dest).map_err(|e| RemoteError::LocalIo {
            path: local_dest.display().to_string(),
            details: e.to_string(),
        })?;

        let copied = std::io::copy(&mut remote_file, &mut local_file)
            .map_err(|e| transfer_error(format!("File copy failed: {e}")))?;

        remote_file
            .send_eof()
            .map_err(|e| transfer_error(format!("EOF failed: {e}")))?;
        remote_file
            .wait_eof()
            .map_err(|e| transfer_error(format!("Wait EOF failed: {e}")))?;
        remote_file
            .close()
            .map_err(|e| transfer_error(format!("Close failed: {e}")))?;
        remote_file
            .wait_close()
            .map_err(|e| transfer_error(format!("Wait close failed: {e}")))?;

        if copied != stat.size() {
            return Err(transfer_error(format!(
                "Short read: {} of {} bytes",
                copied,
                stat.size()
            )));
        }
        Ok(())
    }

    fn upload_file(
        &self,
        target: &SshTarget,
        local: &Path,
        remote_path: &str,
        mode: i32,
    ) -> RemoteResult<()> {
        let local_error = |details: String| RemoteError::LocalIo {
            path: local.display().to_string(),
            details,
        };
        let metadata = std::fs::metadata(local)
            .map_err(|e| local_error(format!("Failed to read metadata: {e}")))?;
        let mut local_file =
            File::open(local).map_err(|e| local_error(format!("Failed to open: {e}")))?;

        let session = self.session(target)?;
        let transfer_error = |details: String| RemoteError::Transfer {
            path: remote_path.to_string(),
            details,
        };

        let mut remote_file = session
            .scp_send(Path::new(remote_path), mode, metadata.len(), None)
            .map_err(|e| transfer_error(format!("SCP failed: {e}")))?;

        std::io::copy(&mut local_file, &mut remote_file)
            .map_err(|e| transfer_error(format!("File copy failed: {e}")))?;

        remote_file
            .send_eof()
            .map_err(|e| transfer_error(format!("EOF failed: {e}")))?;
        remote_file
            .wait_eof()
            .map_err(|e| transfer_error(format!("Wait EOF failed: {e}")))?;
        remote_file
            .close()
            .map_err(|e| transfer_error(format!("Close failed: {e}")))?;
        remote_file
            .wait_close()
            .map_err(|e| transfer_error(format!("Wait close failed: {e}")))?;

        debug!(
            "Uploaded {} to {}@{}:{}",
            local.display(),
            target.user,
            target.host,
            remote_path
        );
        Ok(())
    }
}
