//! Deployment through `kubectl apply` and `helm upgrade --install`.
//!
//! [`HelmDeployer`] remembers everything it applied so [`delete_all`] can undo
//! a case's workloads newest-first without touching the system under test.
//!
//! [`delete_all`]: stress_core::DeploymentManager::delete_all

use crate::process;
use futures::future::{BoxFuture, FutureExt};
use std::collections::BTreeSet;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;
use stress_core::config::ClusterConfig;
use stress_core::{AgentOptions, DeploymentManager, ExecError, Manifest};
use tracing::{debug, info, warn};

#[derive(Debug, Default)]
struct Deployed {
    /// (namespace, manifest), in apply order.
    manifests: Vec<(String, Manifest)>,
    /// Namespaces created by `deploy_random_namespace`.
    namespaces: Vec<String>,
    /// Extra manifests installed alongside the system under test.
    agent_extras: Vec<Manifest>,
    agent_installed: bool,
    /// Namespaces `wait_until_ready` must check.
    touched: BTreeSet<String>,
}

#[derive(Debug)]
pub struct HelmDeployer {
    kubectl: String,
    helm: String,
    chart: String,
    release: String,
    agent_namespace: String,
    ready_timeout: Duration,
    state: Mutex<Deployed>,
}

impl HelmDeployer {
    pub fn new(cluster: &ClusterConfig) -> Self {
        Self {
            kubectl: cluster.kubectl.clone(),
            helm: cluster.helm.clone(),
            chart: cluster.chart.clone(),
            release: cluster.release.clone(),
            agent_namespace: cluster.agent_namespace.clone(),
            ready_timeout: cluster.ready_timeout(),
            state: Mutex::new(Deployed::default()),
        }
    }

    fn state(&self) -> std::sync::MutexGuard<'_, Deployed> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Arguments for `helm upgrade --install` with `options` as `--set` flags.
    pub fn install_args(&self, options: &AgentOptions) -> Vec<String> {
        let mut args = vec![
            "upgrade".to_string(),
            "--install".to_string(),
            self.release.clone(),
            self.chart.clone(),
            "--namespace".to_string(),
            self.agent_namespace.clone(),
        ];
        for (key, value) in options {
            args.push("--set".to_string());
            args.push(format!("{key}={}", escape_set_value(value)));
        }
        args
    }

    async fn apply(&self, namespace: &str, manifest: &Manifest) -> Result<(), ExecError> {
        let args = vec![
            "apply".to_string(),
            "-n".to_string(),
            namespace.to_string(),
            "-f".to_string(),
            manifest.path.display().to_string(),
        ];
        process::run_checked(&self.kubectl, &args).await?;
        info!(namespace, manifest = %manifest.name, "applied");
        Ok(())
    }

    async fn delete_manifest(&self, namespace: &str, manifest: &Manifest) -> Result<(), ExecError> {
        let args = vec![
            "delete".to_string(),
            "-n".to_string(),
            namespace.to_string(),
            "-f".to_string(),
            manifest.path.display().to_string(),
            "--ignore-not-found".to_string(),
        ];
        process::run_checked(&self.kubectl, &args).await?;
        debug!(namespace, manifest = %manifest.name, "deleted");
        Ok(())
    }

    async fn delete_namespace(&self, namespace: &str) -> Result<(), ExecError> {
        let args = vec![
            "delete".to_string(),
            "namespace".to_string(),
            namespace.to_string(),
            "--ignore-not-found".to_string(),
        ];
        process::run_checked(&self.kubectl, &args).await?;
        debug!(namespace, "namespace deleted");
        Ok(())
    }
}

/// Escape commas so helm does not split a value into a list.
fn escape_set_value(value: &str) -> String {
    value.replace(',', r"\,")
}

/// `<manifest-stem>-<8 hex digits>`, trimmed to a valid namespace name.
pub fn random_namespace_name(stem: &str) -> String {
    let sanitized: String = stem
        .chars()
        .map(|c| match c.to_ascii_lowercase() {
            c @ ('a'..='z' | '0'..='9') => c,
            _ => '-',
        })
        .take(40)
        .collect();
    let prefix = match sanitized.trim_matches('-') {
        "" => "stress",
        p => p,
    };
    let nanos = chrono::Utc::now().timestamp_subsec_nanos();
    let suffix = (u64::from(nanos) ^ u64::from(std::process::id()).rotate_left(16)) & 0xffff_ffff;
    format!("{prefix}-{suffix:08x}")
}

/// Remember the first error while continuing to clean up.
fn keep_first(first: &mut Option<ExecError>, result: Result<(), ExecError>, what: &str) {
    if let Err(e) = result {
        warn!("{what}: {e}");
        first.get_or_insert(e);
    }
}

impl DeploymentManager for HelmDeployer {
    fn deploy<'a>(
        &'a self,
        namespace: &'a str,
        manifest: &'a Manifest,
    ) -> BoxFuture<'a, Result<(), ExecError>> {
        async move {
            self.apply(namespace, manifest).await?;
            let mut state = self.state();
            state.manifests.push((namespace.to_string(), manifest.clone()));
            state.touched.insert(namespace.to_string());
            Ok(())
        }
        .boxed()
    }

    fn wait_until_ready(&self) -> BoxFuture<'_, Result<(), ExecError>> {
        async move {
            let namespaces: Vec<String> = self.state().touched.iter().cloned().collect();
            for namespace in namespaces {
                let args = vec![
                    "wait".to_string(),
                    "--for=condition=Ready".to_string(),
                    "pods".to_string(),
                    "--all".to_string(),
                    "-n".to_string(),
                    namespace.clone(),
                    format!("--timeout={}s", self.ready_timeout.as_secs()),
                ];
                process::run_checked(&self.kubectl, &args).await?;
                debug!(namespace = %namespace, "pods ready");
            }
            Ok(())
        }
        .boxed()
    }

    fn deploy_with_options<'a>(
        &'a self,
        options: &'a AgentOptions,
        extra: &'a [Manifest],
    ) -> BoxFuture<'a, Result<(), ExecError>> {
        async move {
            // Marked before helm runs: a failed install may leave a partial release.
            {
                let mut state = self.state();
                state.agent_installed = true;
                state.touched.insert(self.agent_namespace.clone());
            }
            process::run_checked(&self.helm, &self.install_args(options)).await?;
            info!(release = %self.release, options = ?options, "system under test installed");
            for manifest in extra {
                self.apply(&self.agent_namespace, manifest).await?;
                self.state().agent_extras.push(manifest.clone());
            }
            Ok(())
        }
        .boxed()
    }

    fn deploy_random_namespace<'a>(
        &'a self,
        manifest: &'a Manifest,
    ) -> BoxFuture<'a, Result<String, ExecError>> {
        async move {
            let namespace = random_namespace_name(&manifest.name);
            let args = vec![
                "create".to_string(),
                "namespace".to_string(),
                namespace.clone(),
            ];
            process::run_checked(&self.kubectl, &args).await?;
            self.state().namespaces.push(namespace.clone());
            self.deploy(&namespace, manifest).await?;
            Ok(namespace)
        }
        .boxed()
    }

    fn delete_all(&self) -> BoxFuture<'_, Result<(), ExecError>> {
        async move {
            let (manifests, namespaces) = {
                let mut state = self.state();
                let manifests = std::mem::take(&mut state.manifests);
                let namespaces = std::mem::take(&mut state.namespaces);
                state.touched.clear();
                if state.agent_installed {
                    state.touched.insert(self.agent_namespace.clone());
                }
                (manifests, namespaces)
            };

            let mut first = None;
            for (namespace, manifest) in manifests.iter().rev() {
                let result = self.delete_manifest(namespace, manifest).await;
                keep_first(&mut first, result, "delete manifest");
            }
            for namespace in namespaces.iter().rev() {
                let result = self.delete_namespace(namespace).await;
                keep_first(&mut first, result, "delete namespace");
            }
            first.map_or(Ok(()), Err)
        }
        .boxed()
    }

    fn delete_system_under_test(&self) -> BoxFuture<'_, Result<(), ExecError>> {
        async move {
            let (installed, extras) = {
                let mut state = self.state();
                let installed = std::mem::replace(&mut state.agent_installed, false);
                (installed, std::mem::take(&mut state.agent_extras))
            };
            if !installed {
                debug!(release = %self.release, "system under test not installed");
                return Ok(());
            }

            let mut first = None;
            for manifest in extras.iter().rev() {
                let result = self.delete_manifest(&self.agent_namespace, manifest).await;
                keep_first(&mut first, result, "delete agent extra");
            }
            let args = vec![
                "uninstall".to_string(),
                self.release.clone(),
                "--namespace".to_string(),
                self.agent_namespace.clone(),
            ];
            let result = process::run_checked(&self.helm, &args).await.map(|_| ());
            keep_first(&mut first, result, "helm uninstall");
            if first.is_none() {
                info!(release = %self.release, "system under test removed");
            }
            first.map_or(Ok(()), Err)
        }
        .boxed()
    }
}
