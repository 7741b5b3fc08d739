// ============================================================================
// File: packages/gridplane/src/testing.rs
// ----------------------------------------------------------------------------
// Shared test support: seeded storage, session fixtures and in-memory doubles
// for the remote shell and the cloud RPC transport.
// ============================================================================

use std::collections::{HashMap, HashSet, VecDeque};
use std::path::Path;
use std::sync::{Arc, Mutex, Once};

use serde_json::{Value, json};

use crate::async_task::{AsyncTask, AsyncTaskBuilder};
use crate::auth::{AuthSystem, CredentialVerifier, LocalOnlyVerifier};
use crate::backends::{BackendResult, RpcTransport};
use crate::error::GridResult;
use crate::ids::{IdFormats, IdentifierAllocator};
use crate::remote::{CommandOutcome, RemoteError, RemoteResult, RemoteShell, SshTarget};
use crate::session::{ConnectOptions, Credentials, SessionAuthority, SessionDefaults};
use crate::store::{Database, MemoryDatabase, Privilege, UserRecord};

pub const ADMIN: (&str, &str) = ("root", "root-pw");
pub const ALICE: (&str, &str) = ("alice", "alice-pw");
pub const BOB: (&str, &str) = ("bob", "bob-pw");
pub const CLIENT_HOST: &str = "client.example.org";

static LOGGER: Once = Once::new();

/// Route `log` output through env_logger once per test binary
pub fn init_logging() {
    LOGGER.call_once(|| {
        let _ = env_logger::builder().is_test(true).try_init();
    });
}

/// Seeded storage with a session authority and identifier allocator
pub struct Fixture {
    pub db: Arc<MemoryDatabase>,
    pub sessions: SessionAuthority,
    pub ids: Arc<IdentifierAllocator>,
}

impl Fixture {
    pub fn new() -> Self {
        Self::build(SessionDefaults::default(), Arc::new(LocalOnlyVerifier))
    }

    pub fn with_defaults(defaults: SessionDefaults) -> Self {
        Self::build(defaults, Arc::new(LocalOnlyVerifier))
    }

    pub fn with_verifier(verifier: Arc<dyn CredentialVerifier>) -> Self {
        Self::build(SessionDefaults::default(), verifier)
    }

    fn build(defaults: SessionDefaults, verifier: Arc<dyn CredentialVerifier>) -> Self {
        init_logging();
        let db = Arc::new(MemoryDatabase::new());
        for user in [
            UserRecord::new(ADMIN.0, ADMIN.1).with_privilege(Privilege::Admin),
            UserRecord::new(ALICE.0, ALICE.1),
            UserRecord::new(BOB.0, BOB.1),
        ] {
            db.insert_user(user).expect("seed user");
        }

        let shared: Arc<dyn Database> = db.clone();
        let sessions = SessionAuthority::new(Arc::clone(&shared), verifier, defaults);
        let ids = Arc::new(IdentifierAllocator::new(shared, IdFormats::new()));
        Self { db, sessions, ids }
    }

    /// Open a session from `CLIENT_HOST` and return its key
    pub fn login(&self, user: (&str, &str)) -> String {
        self.sessions
            .connect(
                &Credentials::new(user.0, user.1),
                CLIENT_HOST,
                &ConnectOptions::default(),
            )
            .expect("login")
            .session_key
    }
}

/// Verifier accepting exactly one login/password pair
#[derive(Debug, Clone)]
pub struct StaticVerifier {
    login: String,
    password: String,
}

impl StaticVerifier {
    pub fn accepting(login: &str, password: &str) -> Self {
        Self {
            login: login.to_string(),
            password: password.to_string(),
        }
    }
}

impl CredentialVerifier for StaticVerifier {
    fn verify(&self, _system: &AuthSystem, login: &str, password: &str) -> GridResult<bool> {
        Ok(login == self.login && password == self.password)
    }
}

/// A command seen by `MockShell`
#[derive(Debug, Clone)]
pub struct Exec {
    pub target: SshTarget,
    pub command: String,
    pub working_dir: Option<String>,
    pub background: bool,
}

/// A file pushed through `MockShell`
#[derive(Debug, Clone)]
pub struct Upload {
    pub target: SshTarget,
    pub remote_path: String,
    pub mode: i32,
    pub content: String,
}

type Reply = (i32, String, String);

/// Scripted remote shell
///
/// Foreground commands are answered by the first registered prefix they
/// start with. Replies for a prefix are consumed in order and the last one
/// repeats; unmatched commands succeed silently.
#[derive(Debug)]
pub struct MockShell {
    replies: Mutex<Vec<(String, VecDeque<Reply>)>>,
    files: Mutex<HashMap<String, String>>,
    unreachable: Mutex<HashSet<String>>,
    execs: Mutex<Vec<Exec>>,
    uploads: Mutex<Vec<Upload>>,
    pid: u32,
}

impl MockShell {
    pub fn new() -> Self {
        Self {
            replies: Mutex::new(Vec::new()),
            files: Mutex::new(HashMap::new()),
            unreachable: Mutex::new(HashSet::new()),
            execs: Mutex::new(Vec::new()),
            uploads: Mutex::new(Vec::new()),
            pid: 4711,
        }
    }

    /// Pid reported for background launches
    pub fn with_pid(mut self, pid: u32) -> Self {
        self.pid = pid;
        self
    }

    pub fn respond(&self, prefix: &str, exit_code: i32, stdout: &str, stderr: &str) {
        let reply = (exit_code, stdout.to_string(), stderr.to_string());
        let mut replies = self.replies.lock().expect("replies");
        match replies.iter_mut().find(|(p, _)| p == prefix) {
            Some((_, queue)) => queue.push_back(reply),
            None => replies.push((prefix.to_string(), VecDeque::from([reply]))),
        }
    }

    /// Make `remote_path` available to `copy_file`
    pub fn put_file(&self, remote_path: &str, content: &str) {
        self.files
            .lock()
            .expect("files")
            .insert(remote_path.to_string(), content.to_string());
    }

    /// Every call to `host` fails with a connection error
    pub fn fail_host(&self, host: &str) {
        self.unreachable
            .lock()
            .expect("unreachable")
            .insert(host.to_string());
    }

    pub fn commands(&self) -> Vec<String> {
        self.execs
            .lock()
            .expect("execs")
            .iter()
            .map(|e| e.command.clone())
            .collect()
    }

    pub fn background_commands(&self) -> Vec<String> {
        self.execs
            .lock()
            .expect("execs")
            .iter()
            .filter(|e| e.background)
            .map(|e| e.command.clone())
            .collect()
    }

    pub fn targets(&self) -> Vec<SshTarget> {
        self.execs
            .lock()
            .expect("execs")
            .iter()
            .map(|e| e.target.clone())
            .collect()
    }

    pub fn uploads(&self) -> Vec<Upload> {
        self.uploads.lock().expect("uploads").clone()
    }

    fn reachable(&self, target: &SshTarget) -> RemoteResult<()> {
        if self.unreachable.lock().expect("unreachable").contains(&target.host) {
            return Err(RemoteError::Connection {
                host: target.host.clone(),
                details: "connection refused".to_string(),
            });
        }
        Ok(())
    }
}

impl RemoteShell for MockShell {
    fn exec_command(
        &self,
        target: &SshTarget,
        command: &str,
        working_dir: Option<&str>,
        background: bool,
    ) -> RemoteResult<CommandOutcome> {
        self.execs.lock().expect("execs").push(Exec {
            target: target.clone(),
            command: command.to_string(),
            working_dir: working_dir.map(str::to_string),
            background,
        });
        self.reachable(target)?;

        if background {
            return Ok(CommandOutcome::Background { pid: self.pid });
        }

        let mut replies = self.replies.lock().expect("replies");
        let reply = replies
            .iter_mut()
            .find(|(prefix, _)| command.starts_with(prefix.as_str()))
            .and_then(|(_, queue)| {
                if queue.len() > 1 {
                    queue.pop_front()
                } else {
                    queue.front().cloned()
                }
            });
        let (exit_code, stdout, stderr) = reply.unwrap_or((0, String::new(), String::new()));
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
        self.reachable(target)?;
        let content = self
            .files
            .lock()
            .expect("files")
            .get(remote_path)
            .cloned()
            .ok_or_else(|| RemoteError::Transfer {
                path: remote_path.to_string(),
                details: "no such file".to_string(),
            })?;
        std::fs::write(local_dest, content).map_err(|e| RemoteError::LocalIo {
            path: local_dest.display().to_string(),
            details: e.to_string(),
        })
    }

    fn upload_file(
        &self,
        target: &SshTarget,
        local: &Path,
        remote_path: &str,
        mode: i32,
    ) -> RemoteResult<()> {
        self.reachable(target)?;
        let content = std::fs::read_to_string(local).map_err(|e| RemoteError::LocalIo {
            path: local.display().to_string(),
            details: e.to_string(),
        })?;
        self.uploads.lock().expect("uploads").push(Upload {
            target: target.clone(),
            remote_path: remote_path.to_string(),
            mode,
            content,
        });
        Ok(())
    }
}

/// Scripted cloud RPC transport
///
/// Results for a method are consumed in order and the last one repeats;
/// unscripted methods answer `[true, 0]`.
#[derive(Debug, Default)]
pub struct MockRpc {
    results: Mutex<HashMap<String, VecDeque<Value>>>,
    calls: Mutex<Vec<(String, Vec<Value>)>>,
}

impl MockRpc {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn respond(&self, method: &str, result: Value) {
        self.results
            .lock()
            .expect("results")
            .entry(method.to_string())
            .or_default()
            .push_back(result);
    }

    pub fn calls(&self) -> Vec<(String, Vec<Value>)> {
        self.calls.lock().expect("calls").clone()
    }

    /// Parameters of every call to `method`, in order
    pub fn calls_to(&self, method: &str) -> Vec<Vec<Value>> {
        self.calls()
            .into_iter()
            .filter(|(m, _)| m == method)
            .map(|(_, params)| params)
            .collect()
    }
}

impl RpcTransport for MockRpc {
    fn call(
        &self,
        _endpoint: &str,
        method: &str,
        params: Vec<Value>,
    ) -> AsyncTask<BackendResult<Value>> {
        self.calls
            .lock()
            .expect("calls")
            .push((method.to_string(), params));

        let result = self
            .results
            .lock()
            .expect("results")
            .get_mut(method)
            .and_then(|queue| {
                if queue.len() > 1 {
                    queue.pop_front()
                } else {
                    queue.front().cloned()
                }
            })
            .unwrap_or_else(|| json!([true, 0]));

        AsyncTaskBuilder::new(async move { Ok(result) }).spawn()
    }
}
