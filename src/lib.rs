//! policy-stress: identity churn stress for the Cilium agent.
//!
//! A [`Suite`] runs each [`TestCase`] inside a [`LogWatcher`] frame: a
//! background probe loops on a node while the case runs, and afterwards the
//! agent logs covering the case are scanned against a denylist of
//! known-bad messages.
//!
//! # Architecture
//!
//! ```text
//! main ──► Suite ──► LogWatcher ──► RemoteExecutor / LogSource
//!            │
//!            └────► IdentityChurn ──► DeploymentManager / ClusterLookup / RemoteExecutor
//! ```
//!
//! The collaborator traits and shared types live in `stress-core`; the
//! kubectl/ssh/helm implementations in `stress-remote`.

pub mod report;
pub mod scenario;
pub mod suite;
pub mod watcher;

pub use report::{CaseReport, Failure, SuiteReport};
pub use scenario::{IdentityChurn, SUITE_NAME};
pub use suite::{CaseContext, CleanupStack, Harness, Suite, TestCase};
pub use watcher::{LogWatcher, ValidationReport, WatcherState};

use std::sync::Arc;

/// The nightly suite: identity churn, optionally with a custom iteration count.
pub fn identity_churn_suite(harness: Arc<Harness>, count: Option<i64>) -> Suite {
    let case = match count {
        Some(n) => IdentityChurn::new().with_count(n),
        None => IdentityChurn::new(),
    };
    Suite::new(SUITE_NAME, harness).case(case)
}
