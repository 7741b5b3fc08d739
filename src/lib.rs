// ============================================================================
// File: packages/gridplane/src/lib.rs
// ----------------------------------------------------------------------------
// Grid and cloud middleware control plane.
//
// Authenticates callers into sessions, mints unique object identifiers and
// dispatches jobs to SSH-reachable batch clusters or to virtual machines of a
// cloud provider, tracking them until their output is collected.
// ============================================================================

pub mod async_task;
pub mod auth;
pub mod backends;
pub mod config;
pub mod error;
pub mod ids;
pub mod jobs;
pub mod plane;
pub mod remote;
pub mod session;
pub mod store;

#[cfg(test)]
mod testing;

pub use async_task::{AsyncTask, AsyncTaskBuilder};
pub use auth::{AuthSystem, AuthSystemRegistry, CredentialVerifier, LocalOnlyVerifier};
pub use backends::{
    BackendError, BackendKind, BatchConfig, BatchScheduler, CloudConfig, HttpRpcTransport,
    JobBackend, JobStatus, MachineConfig, MachineRegistry, RpcTransport, SubmitOptions,
};
pub use config::ServerConfig;
pub use error::{GridError, GridResult};
pub use ids::{IdFormats, IdentifierAllocator, ObjectType};
pub use jobs::{Job, JobCoordinator, JobMonitor, JobResult};
pub use plane::ControlPlane;
pub use remote::{RemoteShell, SshExecutor, SshTarget};
pub use session::{ClosePolicy, ConnectOptions, Credentials, Session, SessionAuthority};
pub use store::{Database, MemoryDatabase};
