//! stress-core: shared building blocks for policy-stress.
//!
//! This crate holds everything the scenario driver and the cluster adapters
//! agree on: the collaborator traits, the command-loop builder, the log
//! denylist, the error taxonomy, and configuration.
//!
//! # Architecture
//!
//! ```text
//! Suite ──► Watcher ──► RemoteExecutor / LogSource
//!   │
//!   └──► Scenario ──► DeploymentManager / ClusterLookup / RemoteExecutor
//! ```
//!
//! Concrete `kubectl`/`helm` implementations of the traits live in
//! `stress-remote`; tests substitute in-memory fakes.

pub mod cluster;
pub mod command_loop;
pub mod config;
pub mod denylist;
pub mod error;
pub mod types;

pub use cluster::{
    AgentOptions, BackgroundProcess, ClusterLookup, DeploymentManager, LogSource, RemoteExecutor,
};
pub use command_loop::{loop_command, shell_quote, trim_newlines, watch_command, LoopSpec};
pub use denylist::{DenyRule, Denylist, DenylistError, Violation};
pub use error::{ExecError, HarnessError};
pub use types::{Endpoint, ExecOutput, FailureKind, Manifest, Target};
