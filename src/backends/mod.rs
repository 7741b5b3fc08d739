// ============================================================================
// File: packages/gridplane/src/backends/mod.rs
// ----------------------------------------------------------------------------
// Job backend trait definitions and module organization.
//
// Provides a unified interface over the places jobs can run:
// - JobBackend trait for common operations
// - Batch clusters (SLURM, PBS, SGE) reached over SSH
// - Cloud VMs allocated through the provider's RPC API
// - AsyncTask-based async patterns (never async fn)
// ============================================================================

mod config;
mod errors;
mod factory;
mod macros;
mod staging;
mod trait_def;
mod types;

pub mod batch;
pub mod cloud;

pub use batch::BatchBackend;
pub use cloud::{CloudBackend, CloudConfig, HttpRpcTransport, RpcTransport, VmJobHandle};
pub use config::{BackendKind, BatchConfig, BatchScheduler, MachineConfig, MachineRegistry};
pub use errors::{BackendError, BackendResult};
pub use factory::{BackendDeps, create_backend};
pub use macros::JobMacros;
pub use trait_def::JobBackend;
pub use types::{JobStatus, Queue, QueueState, SubmitOptions, SubmittedJob};
