// ============================================================================
// File: packages/gridplane/src/jobs/tests.rs
// ----------------------------------------------------------------------------
// Test suite for the job coordinator
// ============================================================================

use std::sync::Arc;
use std::time::Duration;

use assert_fs::TempDir;
use assert_fs::fixture::ChildPath;
use assert_fs::prelude::*;
use chrono::Utc;
use predicates::prelude::*;
use serde_json::json;

use super::{Job, JobCoordinator, JobMonitor};
use crate::backends::{
    BackendKind, BatchConfig, BatchScheduler, CloudConfig, JobStatus, MachineConfig,
    MachineRegistry, SubmitOptions,
};
use crate::error::GridError;
use crate::store::{CommandStatus, Database, LocalAccount, ServiceCategory};
use crate::testing::{ADMIN, ALICE, BOB, Fixture, MockRpc, MockShell};

const RUNNING_VM: &str = "<VM><ID>93</ID><STATE>3</STATE><LCM_STATE>3</LCM_STATE>\
<STIME>1717495200</STIME><TEMPLATE><NIC><IP>10.0.0.5</IP></NIC></TEMPLATE></VM>";

struct Harness {
    fx: Fixture,
    shell: Arc<MockShell>,
    rpc: Arc<MockRpc>,
    coordinator: JobCoordinator,
    staging: TempDir,
}

fn machines() -> MachineRegistry {
    let cloud = CloudConfig::new("http://one.example.org:2633/RPC2", "oneadmin", "secret")
        .with_network("private")
        .with_image("42")
        .with_vm_user("ubuntu")
        .with_boot_probe(3, 1);
    MachineRegistry::from_machines([
        MachineConfig::new(
            "cluster",
            BackendKind::Batch(BatchConfig::new(
                "front.example.org",
                BatchScheduler::Slurm,
                "grid",
            )),
        ),
        MachineConfig::new("cloud", BackendKind::Cloud(cloud)),
    ])
}

fn harness() -> Harness {
    let fx = Fixture::new();
    fx.db
        .insert_local_account(LocalAccount {
            user_id: ALICE.0.to_string(),
            machine_id: "cluster".to_string(),
            login: "alice".to_string(),
            home: "/home/alice".to_string(),
        })
        .expect("seed account");

    let shell = Arc::new(MockShell::new());
    let rpc = Arc::new(MockRpc::new());
    let staging = TempDir::new().expect("staging dir");
    let db: Arc<dyn Database> = fx.db.clone();
    let coordinator = JobCoordinator::new(
        db,
        fx.sessions.clone(),
        Arc::clone(&fx.ids),
        Arc::new(machines()),
        shell.clone(),
        rpc.clone(),
    )
    .with_staging_dir(staging.path());

    Harness {
        fx,
        shell,
        rpc,
        coordinator,
        staging,
    }
}

fn script() -> tempfile::NamedTempFile {
    let file = tempfile::NamedTempFile::new().expect("script");
    std::fs::write(file.path(), "#!/bin/sh\necho $GRID_JOB_ID\n").expect("write script");
    file
}

/// A job record as it would look after a successful batch submission
fn stored_job(job_id: &str, owner: &str, status: JobStatus, out: Option<&str>) -> Job {
    Job {
        job_id: job_id.to_string(),
        machine_id: "cluster".to_string(),
        backend_handle: Some("4242".to_string()),
        vm_id: None,
        name: job_id.to_string(),
        status,
        output_path: out.map(|p| format!("{p}.out")),
        error_path: out.map(|p| format!("{p}.err")),
        backend_params: String::new(),
        owner_user_id: owner.to_string(),
        session_id: "seeded".to_string(),
        submitted_at: Utc::now(),
        started_at: None,
        finished_at: None,
        error_message: None,
    }
}

fn staged_files(h: &Harness) -> usize {
    std::fs::read_dir(h.staging.path())
        .expect("read staging dir")
        .count()
}

#[tokio::test]
async fn submit_persists_job_with_default_paths_under_home() {
    let h = harness();
    h.shell.respond("sbatch", 0, "4242;cluster\n", "");
    let key = h.fx.login(ALICE);
    let job_script = script();

    let job = h
        .coordinator
        .submit(&key, "cluster", job_script.path(), SubmitOptions::new())
        .await
        .expect("join")
        .expect("submit");

    assert!(job.job_id.starts_with("J_"));
    assert_eq!(job.status, JobStatus::Submitted);
    assert_eq!(job.backend_handle.as_deref(), Some("4242"));
    assert_eq!(job.owner_user_id, "alice");
    assert_eq!(
        job.output_path,
        Some(format!("/home/alice/{}.out", job.job_id))
    );
    assert_eq!(
        job.error_path,
        Some(format!("/home/alice/{}.err", job.job_id))
    );

    let stored = h.fx.db.find_job(&job.job_id).expect("lookup").expect("row");
    assert_eq!(stored, job);

    let uploads = h.shell.uploads();
    assert_eq!(uploads.len(), 1);
    assert_eq!(uploads[0].content, "#!/bin/sh\necho $SLURM_JOB_ID\n");
    assert_eq!(uploads[0].target.user, "alice");

    let history = h.fx.db.commands_for_session(&key).expect("history");
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].category, ServiceCategory::Tms);
    assert_eq!(history[0].status, CommandStatus::Success);
    assert_eq!(history[0].object_id.as_deref(), Some(job.job_id.as_str()));
}

#[tokio::test]
async fn backend_failure_is_persisted_as_failed_job() {
    let h = harness();
    h.shell
        .respond("sbatch", 1, "", "sbatch: error: invalid partition specified");
    let key = h.fx.login(ALICE);
    let job_script = script();

    let err = h
        .coordinator
        .submit(
            &key,
            "cluster",
            job_script.path(),
            SubmitOptions::new().with_queue("nowhere"),
        )
        .await
        .expect("join")
        .expect_err("rejected by scheduler");
    assert!(matches!(err, GridError::Backend { .. }));

    let jobs = h.coordinator.list_jobs(&key).expect("list");
    assert_eq!(jobs.len(), 1);
    assert_eq!(jobs[0].status, JobStatus::Failed);
    assert!(jobs[0].backend_handle.is_none());
    assert!(jobs[0].finished_at.is_some());
    assert!(
        jobs[0]
            .error_message
            .as_deref()
            .is_some_and(|m| m.contains("invalid partition"))
    );

    let history = h.fx.db.commands_for_session(&key).expect("history");
    assert_eq!(history[0].status, CommandStatus::Failed);
}

#[tokio::test]
async fn submit_requires_a_live_session_and_a_known_machine() {
    let h = harness();
    let job_script = script();

    let err = h
        .coordinator
        .submit("bogus", "cluster", job_script.path(), SubmitOptions::new())
        .await
        .expect("join")
        .expect_err("no session");
    assert_eq!(err, GridError::SessionNotFound);

    let key = h.fx.login(ALICE);
    let err = h
        .coordinator
        .submit(&key, "nowhere", job_script.path(), SubmitOptions::new())
        .await
        .expect("join")
        .expect_err("no machine");
    assert_eq!(err, GridError::UnknownMachine("nowhere".to_string()));
    assert!(h.shell.commands().is_empty());
}

#[tokio::test]
async fn cancel_is_reserved_to_owner_or_admin_and_idempotent() {
    let h = harness();
    h.fx
        .db
        .insert_job(stored_job("J_7", "alice", JobStatus::Running, None))
        .expect("seed job");

    let bob = h.fx.login(BOB);
    let err = h
        .coordinator
        .cancel(&bob, "J_7")
        .await
        .expect("join")
        .expect_err("not the owner");
    assert!(matches!(err, GridError::PermissionDenied(_)));

    let admin = h.fx.login(ADMIN);
    h.coordinator
        .cancel(&admin, "J_7")
        .await
        .expect("join")
        .expect("cancel");
    let stored = h.fx.db.find_job("J_7").expect("lookup").expect("row");
    assert_eq!(stored.status, JobStatus::Cancelled);
    assert!(stored.finished_at.is_some());

    let alice = h.fx.login(ALICE);
    h.coordinator
        .cancel(&alice, "J_7")
        .await
        .expect("join")
        .expect("terminal cancel is a no-op");
    let cancels = h
        .shell
        .commands()
        .into_iter()
        .filter(|c| c.starts_with("scancel"))
        .count();
    assert_eq!(cancels, 1);

    let err = h
        .coordinator
        .cancel(&alice, "J_404")
        .await
        .expect("join")
        .expect_err("unknown job");
    assert_eq!(err, GridError::UnknownJobId("J_404".to_string()));
}

#[tokio::test]
async fn cloud_job_completes_once_and_releases_its_vm_once() {
    let h = harness();
    h.rpc.respond("one.vm.allocate", json!([true, 93, 0]));
    h.rpc.respond("one.vm.info", json!([true, RUNNING_VM, 0]));
    h.shell.respond("ps -o pid= -p 4711", 0, "1\n", "");
    h.shell.respond("ps -o pid= -p 4711", 0, "0\n", "");
    let key = h.fx.login(ALICE);
    let job_script = script();

    let job = h
        .coordinator
        .submit(&key, "cloud", job_script.path(), SubmitOptions::new())
        .await
        .expect("join")
        .expect("submit");
    assert_eq!(job.backend_handle.as_deref(), Some("4711@ubuntu@10.0.0.5@93"));
    assert_eq!(job.vm_id.as_deref(), Some("93"));

    let first = h
        .coordinator
        .poll_status(&job.job_id)
        .await
        .expect("join")
        .expect("poll");
    assert!(!first.is_terminal());
    assert!(h.rpc.calls_to("one.vm.action").is_empty());

    let (a, b) = tokio::join!(
        h.coordinator.poll_status(&job.job_id),
        h.coordinator.poll_status(&job.job_id)
    );
    let statuses = [a.expect("join").expect("poll"), b.expect("join").expect("poll")];
    assert!(statuses.contains(&JobStatus::Completed));

    let commands_before = h.shell.commands().len();
    let again = h
        .coordinator
        .poll_status(&job.job_id)
        .await
        .expect("join")
        .expect("poll");
    assert_eq!(again, JobStatus::Completed);
    assert_eq!(h.shell.commands().len(), commands_before);

    let releases = h.rpc.calls_to("one.vm.action");
    assert_eq!(releases.len(), 1);
    assert_eq!(releases[0][1], json!("stop"));

    let stored = h.fx.db.find_job(&job.job_id).expect("lookup").expect("row");
    assert_eq!(stored.status, JobStatus::Completed);
    assert!(stored.started_at.is_some());
    assert!(stored.finished_at.is_some());
}

#[tokio::test]
async fn cloud_job_keeps_its_specific_params_for_polling() {
    let h = harness();
    h.rpc.respond("one.vm.allocate", json!([true, 93, 0]));
    h.rpc.respond("one.vm.info", json!([true, RUNNING_VM, 0]));
    h.shell.respond("ps -o pid= -p 4711", 0, "0\n", "");
    let key = h.fx.login(ALICE);
    let job_script = script();

    let options = SubmitOptions::new()
        .with_specific_params("vm-user=centos user=alice user-password=alice-pw");
    let job = h
        .coordinator
        .submit(&key, "cloud", job_script.path(), options)
        .await
        .expect("join")
        .expect("submit");
    assert_eq!(job.backend_handle.as_deref(), Some("4711@centos@10.0.0.5@93"));

    let stored = h.fx.db.find_job(&job.job_id).expect("lookup").expect("row");
    assert_eq!(
        stored.backend_params,
        "vm-user=centos user=alice user-password=alice-pw"
    );

    let status = h
        .coordinator
        .poll_status(&job.job_id)
        .await
        .expect("join")
        .expect("poll");
    assert_eq!(status, JobStatus::Completed);

    let poll = h.shell.targets().pop().expect("poll target");
    assert_eq!(poll.user, "centos");
    let releases = h.rpc.calls_to("one.vm.action");
    assert_eq!(releases.len(), 1);
    assert_eq!(releases[0][0], json!("alice:alice-pw"));
}

#[tokio::test]
async fn aborted_backend_task_is_persisted_as_failed_job() {
    let h = harness();
    let task = tokio::spawn(std::future::pending::<()>());
    task.abort();
    let join_error = task.await.expect_err("aborted");

    let mut job = stored_job("J_8", "alice", JobStatus::Submitted, Some("/home/alice/J_8"));
    job.backend_handle = None;
    let err = h
        .coordinator
        .record_submission(job, Err(GridError::from(join_error)))
        .expect_err("submission failed");

    let stored = h.fx.db.find_job("J_8").expect("lookup").expect("row");
    assert_eq!(stored.status, JobStatus::Failed);
    assert!(stored.finished_at.is_some());
    assert_eq!(stored.error_message, Some(err.to_string()));
}

#[tokio::test]
async fn output_of_a_job_without_paths_is_unknown() {
    let h = harness();
    h.fx
        .db
        .insert_job(stored_job("J_1", "alice", JobStatus::Completed, None))
        .expect("seed job");
    let key = h.fx.login(ALICE);

    let err = h
        .coordinator
        .get_job_output(&key, "J_1")
        .await
        .expect("join")
        .expect_err("no paths");
    assert_eq!(err, GridError::UnknownJobId("J_1".to_string()));
    assert_eq!(staged_files(&h), 0);
}

#[tokio::test]
async fn output_retrieval_strips_host_and_marks_downloaded() {
    let h = harness();
    h.fx
        .db
        .insert_job(stored_job(
            "J_9",
            "alice",
            JobStatus::Completed,
            Some("front.example.org:/home/alice/J_9"),
        ))
        .expect("seed job");
    h.shell.put_file("/home/alice/J_9.out", "42\n");
    h.shell.put_file("/home/alice/J_9.err", "");
    let key = h.fx.login(ALICE);

    let result = h
        .coordinator
        .get_job_output(&key, "J_9")
        .await
        .expect("join")
        .expect("output");

    assert_eq!(result.job_id, "J_9");
    assert!(result.output_path.starts_with(h.staging.path()));
    ChildPath::new(&result.output_path).assert("42\n");
    ChildPath::new(&result.error_path).assert(predicate::path::exists());
    assert!(
        result
            .output_path
            .file_name()
            .is_some_and(|n| n.to_string_lossy().starts_with("job_output-J_9-"))
    );

    let stored = h.fx.db.find_job("J_9").expect("lookup").expect("row");
    assert_eq!(stored.status, JobStatus::Downloaded);

    let bob = h.fx.login(BOB);
    let err = h
        .coordinator
        .get_job_output(&bob, "J_9")
        .await
        .expect("join")
        .expect_err("not the owner");
    assert!(matches!(err, GridError::PermissionDenied(_)));
}

#[tokio::test]
async fn failed_copy_leaves_no_staging_files() {
    let h = harness();
    h.fx
        .db
        .insert_job(stored_job(
            "J_3",
            "alice",
            JobStatus::Completed,
            Some("/home/alice/J_3"),
        ))
        .expect("seed job");
    let key = h.fx.login(ALICE);

    let err = h
        .coordinator
        .get_job_output(&key, "J_3")
        .await
        .expect("join")
        .expect_err("remote files missing");
    assert!(matches!(err, GridError::Transfer(_)));
    assert_eq!(staged_files(&h), 0);

    let stored = h.fx.db.find_job("J_3").expect("lookup").expect("row");
    assert_eq!(stored.status, JobStatus::Completed);
}

#[tokio::test]
async fn completed_jobs_output_takes_every_job_with_files_and_skips_broken_ones() {
    let h = harness();
    for (id, status) in [
        ("J_1", JobStatus::Completed),
        ("J_2", JobStatus::Completed),
        ("J_3", JobStatus::Completed),
        ("J_4", JobStatus::Running),
    ] {
        let path = format!("/home/alice/{id}");
        h.fx
            .db
            .insert_job(stored_job(id, "alice", status, Some(&path)))
            .expect("seed job");
    }
    h.fx
        .db
        .insert_job(stored_job("J_5", "bob", JobStatus::Completed, Some("/home/bob/J_5")))
        .expect("seed job");
    h.fx
        .db
        .insert_job(stored_job("J_6", "alice", JobStatus::Completed, None))
        .expect("seed job");
    for id in ["J_1", "J_3", "J_4", "J_5"] {
        let owner = if id == "J_5" { "bob" } else { "alice" };
        h.shell.put_file(&format!("/home/{owner}/{id}.out"), id);
        h.shell.put_file(&format!("/home/{owner}/{id}.err"), "");
    }
    let key = h.fx.login(ALICE);

    let mut results = h
        .coordinator
        .get_completed_jobs_output(&key)
        .await
        .expect("join")
        .expect("outputs");
    results.sort_by(|a, b| a.job_id.cmp(&b.job_id));

    let ids: Vec<&str> = results.iter().map(|r| r.job_id.as_str()).collect();
    assert_eq!(ids, ["J_1", "J_3", "J_4"]);
    ChildPath::new(&results[1].output_path).assert(predicate::str::contains("J_3"));

    let status_of = |id: &str| h.fx.db.find_job(id).expect("lookup").expect("row").status;
    assert_eq!(status_of("J_1"), JobStatus::Downloaded);
    assert_eq!(status_of("J_2"), JobStatus::Completed);
    assert_eq!(status_of("J_4"), JobStatus::Running);
    assert_eq!(status_of("J_5"), JobStatus::Completed);
    assert_eq!(status_of("J_6"), JobStatus::Completed);
}

#[tokio::test]
async fn monitor_pass_counts_jobs_reaching_a_terminal_status() {
    let h = harness();
    for id in ["J_1", "J_2"] {
        h.fx
            .db
            .insert_job(stored_job(id, "alice", JobStatus::Queued, None))
            .expect("seed job");
    }
    h.fx
        .db
        .insert_job(stored_job("J_3", "alice", JobStatus::Failed, None))
        .expect("seed job");
    h.shell.respond("squeue", 0, "COMPLETED\n", "");

    let monitor = JobMonitor::new(h.coordinator.clone(), Duration::from_secs(60));
    let finished = monitor.poll_once().await.expect("join").expect("pass");
    assert_eq!(finished, 2);

    let again = monitor.poll_once().await.expect("join").expect("pass");
    assert_eq!(again, 0);
    assert_eq!(
        h.shell
            .commands()
            .iter()
            .filter(|c| c.starts_with("squeue"))
            .count(),
        2
    );
}

#[tokio::test]
async fn queues_of_an_unknown_machine_are_rejected() {
    let h = harness();
    let key = h.fx.login(ALICE);

    let err = h
        .coordinator
        .list_queues(&key, "nowhere", None)
        .await
        .expect("join")
        .expect_err("unknown machine");
    assert_eq!(err, GridError::UnknownMachine("nowhere".to_string()));
}
