// ============================================================================
// File: packages/gridplane/src/backends/staging.rs
// ----------------------------------------------------------------------------
// Script staging and blocking remote calls shared by the batch and cloud
// backends. `RemoteShell` blocks, so each call runs on spawn_blocking.
// ============================================================================

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tempfile::NamedTempFile;

use crate::backends::macros::JobMacros;
use crate::backends::{BackendError, BackendResult};
use crate::remote::{CommandOutcome, RemoteShell, SshTarget};

/// Read `script_path`, rewrite its job macros and write the result to a
/// temporary file that lives as long as the returned handle
pub(crate) async fn stage_script(
    script_path: &Path,
    macros: JobMacros,
) -> BackendResult<NamedTempFile> {
    let script = tokio::fs::read_to_string(script_path)
        .await
        .map_err(|e| BackendError::FileSystemFailed {
            details: format!("Failed to read script {}: {e}", script_path.display()),
        })?;
    let rewritten = macros.apply(&script);

    tokio::task::spawn_blocking(move || -> BackendResult<NamedTempFile> {
        let mut staged = tempfile::Builder::new()
            .prefix("gridplane-job-")
            .suffix(".sh")
            .tempfile()
            .map_err(|e| BackendError::FileSystemFailed {
                details: format!("Failed to create staging file: {e}"),
            })?;
        staged
            .write_all(rewritten.as_bytes())
            .and_then(|_| staged.flush())
            .map_err(|e| BackendError::FileSystemFailed {
                details: format!("Failed to write staging file: {e}"),
            })?;
        Ok(staged)
    })
    .await?
}

/// Remote path the staged script is uploaded to
pub(crate) fn remote_script_path(working_dir: Option<&str>) -> String {
    let dir = working_dir
        .map(|d| d.trim_end_matches('/'))
        .filter(|d| !d.is_empty())
        .unwrap_or(".");
    format!("{dir}/gridplane-{}.sh", uuid::Uuid::new_v4().simple())
}

pub(crate) async fn remote_exec(
    shell: Arc<dyn RemoteShell>,
    target: SshTarget,
    command: String,
    working_dir: Option<String>,
    background: bool,
) -> BackendResult<CommandOutcome> {
    let outcome = tokio::task::spawn_blocking(move || {
        shell.exec_command(&target, &command, working_dir.as_deref(), background)
    })
    .await??;
    Ok(outcome)
}

pub(crate) async fn remote_upload(
    shell: Arc<dyn RemoteShell>,
    target: SshTarget,
    local: PathBuf,
    remote_path: String,
    mode: i32,
) -> BackendResult<()> {
    tokio::task::spawn_blocking(move || shell.upload_file(&target, &local, &remote_path, mode))
        .await??;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn script_lands_in_the_working_dir() {
        let path = remote_script_path(Some("/home/alice/run/"));
        assert!(path.starts_with("/home/alice/run/gridplane-"));
        assert!(path.ends_with(".sh"));
        assert!(remote_script_path(None).starts_with("./gridplane-"));
    }

    #[tokio::test]
    async fn staged_script_has_macros_rewritten() {
        let source = tempfile::NamedTempFile::new().expect("source");
        std::fs::write(source.path(), "echo $GRID_JOB_ID\n").expect("write");

        let macros = JobMacros {
            job_id: "$SLURM_JOB_ID",
            job_name: "$SLURM_JOB_NAME",
            num_nodes: "$SLURM_JOB_NUM_NODES",
        };
        let staged = stage_script(source.path(), macros).await.expect("stage");
        let content = std::fs::read_to_string(staged.path()).expect("read");
        assert_eq!(content, "echo $SLURM_JOB_ID\n");
    }

    #[tokio::test]
    async fn missing_script_is_a_file_system_error() {
        let macros = JobMacros {
            job_id: "",
            job_name: "",
            num_nodes: "",
        };
        let err = stage_script(Path::new("/nonexistent/job.sh"), macros)
            .await
            .expect_err("missing");
        assert!(matches!(err, BackendError::FileSystemFailed { .. }));
    }
}
