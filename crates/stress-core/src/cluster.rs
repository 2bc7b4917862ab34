//! Collaborator traits: the fixed interfaces the harness drives.
//!
//! Every trait is object safe so the driver can hold `Arc<dyn …>` handles and
//! tests can swap in fakes. Futures are boxed with [`BoxFuture`].

use crate::error::ExecError;
use crate::types::{Endpoint, ExecOutput, Manifest, Target};
use futures::future::BoxFuture;
use std::collections::BTreeMap;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Flat map of dotted chart keys (`etcd.endpoints[0]`) to values.
pub type AgentOptions = BTreeMap<String, String>;

/// Handle to a long-running remote command.
///
/// The task behind `handle` runs until `cancel` fires or the remote side
/// exits. Its result is the single-shot error slot: `Ok(())` after a
/// cancellation, an [`ExecError`] if the remote process died on its own.
#[derive(Debug)]
pub struct BackgroundProcess {
    cancel: CancellationToken,
    handle: JoinHandle<Result<(), ExecError>>,
}

impl BackgroundProcess {
    pub fn new(cancel: CancellationToken, handle: JoinHandle<Result<(), ExecError>>) -> Self {
        Self { cancel, handle }
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// True once the task has returned, whether cancelled or not.
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    pub fn into_parts(self) -> (CancellationToken, JoinHandle<Result<(), ExecError>>) {
        (self.cancel, self.handle)
    }
}

/// Runs commands on nodes and in pods.
pub trait RemoteExecutor: Send + Sync {
    /// Run `command` to completion. A non-zero exit is *not* an error here;
    /// see [`ExecOutput::ensure_success`].
    fn exec<'a>(
        &'a self,
        target: &'a Target,
        command: &'a str,
    ) -> BoxFuture<'a, Result<ExecOutput, ExecError>>;

    /// Start `command` in the background. Returns once the remote session is
    /// established; fails if it cannot be.
    fn exec_background<'a>(
        &'a self,
        target: &'a Target,
        command: &'a str,
    ) -> BoxFuture<'a, Result<BackgroundProcess, ExecError>>;
}

/// Applies and removes workloads.
pub trait DeploymentManager: Send + Sync {
    fn deploy<'a>(
        &'a self,
        namespace: &'a str,
        manifest: &'a Manifest,
    ) -> BoxFuture<'a, Result<(), ExecError>>;

    /// Block until every pod in every namespace touched so far is ready.
    fn wait_until_ready(&self) -> BoxFuture<'_, Result<(), ExecError>>;

    /// Install (or upgrade) the system under test with `options`, then apply
    /// `extra` manifests into its namespace.
    fn deploy_with_options<'a>(
        &'a self,
        options: &'a AgentOptions,
        extra: &'a [Manifest],
    ) -> BoxFuture<'a, Result<(), ExecError>>;

    /// Create a fresh namespace, deploy `manifest` into it, and return its name.
    fn deploy_random_namespace<'a>(
        &'a self,
        manifest: &'a Manifest,
    ) -> BoxFuture<'a, Result<String, ExecError>>;

    /// Remove everything deployed since the last call, newest first.
    fn delete_all(&self) -> BoxFuture<'_, Result<(), ExecError>>;

    fn delete_system_under_test(&self) -> BoxFuture<'_, Result<(), ExecError>>;
}

/// Read-only cluster queries.
pub trait ClusterLookup: Send + Sync {
    fn service_endpoint<'a>(
        &'a self,
        namespace: &'a str,
        service: &'a str,
    ) -> BoxFuture<'a, Result<Endpoint, ExecError>>;

    /// Name of the pod matching `selector` scheduled on `node`.
    fn pod_on_node<'a>(
        &'a self,
        namespace: &'a str,
        selector: &'a str,
        node: &'a str,
    ) -> BoxFuture<'a, Result<String, ExecError>>;

    /// Names of all pods matching `selector`.
    fn pods<'a>(
        &'a self,
        namespace: &'a str,
        selector: &'a str,
    ) -> BoxFuture<'a, Result<Vec<String>, ExecError>>;
}

/// Source of the system under test's log output.
pub trait LogSource: Send + Sync {
    /// Every line logged during the trailing `window`.
    fn fetch_logs(&self, window: Duration) -> BoxFuture<'_, Result<Vec<String>, ExecError>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn cancel_token_ends_the_task() {
        let token = CancellationToken::new();
        let child = token.clone();
        let handle = tokio::spawn(async move {
            child.cancelled().await;
            Ok(())
        });
        let process = BackgroundProcess::new(token, handle);
        assert!(!process.cancel_token().is_cancelled());

        process.cancel_token().cancel();
        let (_, handle) = process.into_parts();
        assert!(handle.await.unwrap().is_ok());
    }
}
