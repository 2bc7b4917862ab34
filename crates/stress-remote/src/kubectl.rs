//! `kubectl`/`ssh` backed remote execution, lookups, and log fetching.
//!
//! Node targets are reached with `ssh <node> <command>`; the remote login
//! shell parses the command line. Pod targets go through
//! `sh -c "kubectl exec … -- <command>"` so that the command line is parsed by
//! a shell in the same way, which is what the single-line loop commands
//! produced by `stress_core::loop_command` rely on.

use crate::process;
use futures::future::{BoxFuture, FutureExt};
use serde::Deserialize;
use std::process::Stdio;
use std::time::Duration;
use stress_core::config::{ClusterConfig, WatcherConfig};
use stress_core::{
    shell_quote, BackgroundProcess, ClusterLookup, Endpoint, ExecError, ExecOutput, LogSource,
    RemoteExecutor, Target,
};
use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader, Lines};
use tokio::process::{ChildStdout, Command};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Cluster access through the `kubectl` and `ssh` binaries.
#[derive(Debug, Clone)]
pub struct Kubectl {
    kubectl: String,
    ssh: String,
    agent_namespace: String,
    agent_selector: String,
    agent_container: String,
    startup_grace: Duration,
}

impl Kubectl {
    pub fn new(cluster: &ClusterConfig, watcher: &WatcherConfig) -> Self {
        Self {
            kubectl: cluster.kubectl.clone(),
            ssh: cluster.ssh.clone(),
            agent_namespace: cluster.agent_namespace.clone(),
            agent_selector: cluster.agent_selector.clone(),
            agent_container: cluster.agent_container.clone(),
            startup_grace: watcher.startup_grace(),
        }
    }

    /// How long a background session must stay up before it counts as
    /// established.
    pub fn with_startup_grace(mut self, grace: Duration) -> Self {
        self.startup_grace = grace;
        self
    }

    /// Use `program` in place of `ssh` for node targets.
    pub fn with_ssh(mut self, program: impl Into<String>) -> Self {
        self.ssh = program.into();
        self
    }

    /// The shell line that runs `command` inside a pod.
    pub fn pod_exec_line(
        &self,
        namespace: &str,
        pod: &str,
        container: Option<&str>,
        command: &str,
    ) -> String {
        let mut line = format!(
            "{} exec -n {} {}",
            shell_quote(&self.kubectl),
            shell_quote(namespace),
            shell_quote(pod)
        );
        if let Some(c) = container {
            line.push_str(" -c ");
            line.push_str(&shell_quote(c));
        }
        line.push_str(" -- ");
        line.push_str(command);
        line
    }

    fn command_for(&self, target: &Target, command: &str) -> (Command, String) {
        match target {
            Target::Node(node) => {
                let mut cmd = Command::new(&self.ssh);
                cmd.arg(node).arg(command);
                (cmd, self.ssh.clone())
            }
            Target::Pod {
                namespace,
                pod,
                container,
            } => {
                let line = self.pod_exec_line(namespace, pod, container.as_deref(), command);
                let mut cmd = Command::new("/bin/sh");
                cmd.arg("-c").arg(line);
                (cmd, self.kubectl.clone())
            }
        }
    }

    /// Arguments for `kubectl logs` covering the trailing `window`.
    pub fn logs_args(&self, window: Duration) -> Vec<String> {
        vec![
            "logs".into(),
            "-n".into(),
            self.agent_namespace.clone(),
            "-l".into(),
            self.agent_selector.clone(),
            "-c".into(),
            self.agent_container.clone(),
            format!("--since={}", since_arg(window)),
            "--tail=-1".into(),
            "--max-log-requests=50".into(),
        ]
    }

    async fn get_json(&self, args: Vec<String>, what: String) -> Result<String, ExecError> {
        let out = process::run(&self.kubectl, &args).await?;
        if !out.success() && out.stderr.contains("NotFound") {
            return Err(ExecError::NotFound { what });
        }
        Ok(out.ensure_success(&self.kubectl, &args.join(" "))?.stdout)
    }

    async fn spawn_background(
        &self,
        target: &Target,
        command: &str,
    ) -> Result<BackgroundProcess, ExecError> {
        let (mut cmd, program) = self.command_for(target, command);
        let mut child = cmd
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| ExecError::Spawn { program, source })?;

        let label = target.to_string();

        // A session that dies inside the grace period was never established.
        let early_exit = tokio::time::timeout(self.startup_grace, child.wait()).await;
        if let Ok(status) = early_exit {
            let status = status.map_err(|source| ExecError::Io {
                target: label.clone(),
                source,
            })?;
            let mut stderr = String::new();
            if let Some(mut pipe) = child.stderr.take() {
                let _ = pipe.read_to_string(&mut stderr).await;
            }
            let reason = match stderr.trim() {
                "" => format!("exited with {status}"),
                msg => msg.to_string(),
            };
            return Err(ExecError::SessionRefused {
                target: label,
                reason,
            });
        }

        info!(remote = %label, command, "background session established");
        let token = CancellationToken::new();
        let cancel = token.clone();
        let mut lines = child.stdout.take().map(|out| BufReader::new(out).lines());
        let handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        if let Err(e) = child.kill().await {
                            warn!(remote = %label, "failed to kill background session: {e}");
                        }
                        debug!(remote = %label, "background session cancelled");
                        return Ok(());
                    }
                    status = child.wait() => {
                        let status = status.map_err(|source| ExecError::Io {
                            target: label.clone(),
                            source,
                        })?;
                        return Err(ExecError::ProbeExited {
                            target: label,
                            status: status.to_string(),
                        });
                    }
                    line = next_line(&mut lines) => match line {
                        Some(line) => debug!(remote = %label, "{line}"),
                        None => lines = None,
                    },
                }
            }
        });
        Ok(BackgroundProcess::new(token, handle))
    }
}

/// Next stdout line, or pending forever once the stream is gone.
async fn next_line(lines: &mut Option<Lines<BufReader<ChildStdout>>>) -> Option<String> {
    match lines {
        Some(lines) => lines.next_line().await.ok().flatten(),
        None => std::future::pending().await,
    }
}

/// `--since` value covering `window`: whole seconds rounded up, plus one so
/// lines written in the same second as the cut-off are not lost.
pub fn since_arg(window: Duration) -> String {
    let mut secs = window.as_secs();
    if window.subsec_nanos() > 0 {
        secs += 1;
    }
    format!("{}s", secs + 1)
}

impl RemoteExecutor for Kubectl {
    fn exec<'a>(
        &'a self,
        target: &'a Target,
        command: &'a str,
    ) -> BoxFuture<'a, Result<ExecOutput, ExecError>> {
        async move {
            debug!(remote = %target, command, "exec");
            let (cmd, program) = self.command_for(target, command);
            process::output(cmd, &program).await
        }
        .boxed()
    }

    fn exec_background<'a>(
        &'a self,
        target: &'a Target,
        command: &'a str,
    ) -> BoxFuture<'a, Result<BackgroundProcess, ExecError>> {
        self.spawn_background(target, command).boxed()
    }
}

// ---------------------------------------------------------------------------
// kubectl JSON shapes
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct Service {
    spec: ServiceSpec,
}

#[derive(Debug, Deserialize)]
struct ServiceSpec {
    #[serde(rename = "clusterIP")]
    cluster_ip: Option<String>,
    #[serde(default)]
    ports: Vec<ServicePort>,
}

#[derive(Debug, Deserialize)]
struct ServicePort {
    port: u16,
}

#[derive(Debug, Deserialize)]
struct PodList {
    #[serde(default)]
    items: Vec<Pod>,
}

#[derive(Debug, Deserialize)]
struct Pod {
    metadata: PodMetadata,
}

#[derive(Debug, Deserialize)]
struct PodMetadata {
    name: String,
}

/// Extract the cluster IP and first port of a `kubectl get service -o json`
/// document.
pub fn parse_service_endpoint(json: &str, service: &str) -> Result<Endpoint, ExecError> {
    let parse_err = |reason: String| ExecError::Parse {
        command: format!("get service {service}"),
        reason,
    };
    let svc: Service = serde_json::from_str(json).map_err(|e| parse_err(e.to_string()))?;
    let host = match svc.spec.cluster_ip.as_deref() {
        None | Some("") | Some("None") => {
            return Err(parse_err("service has no cluster IP".into()));
        }
        Some(ip) => ip.to_string(),
    };
    let port = svc
        .spec
        .ports
        .first()
        .map(|p| p.port)
        .ok_or_else(|| parse_err("service exposes no ports".into()))?;
    Ok(Endpoint { host, port })
}

/// Pod names from a `kubectl get pods -o json` document, in listed order.
pub fn parse_pod_names(json: &str) -> Result<Vec<String>, ExecError> {
    let list: PodList = serde_json::from_str(json).map_err(|e| ExecError::Parse {
        command: "get pods".into(),
        reason: e.to_string(),
    })?;
    Ok(list.items.into_iter().map(|p| p.metadata.name).collect())
}

impl ClusterLookup for Kubectl {
    fn service_endpoint<'a>(
        &'a self,
        namespace: &'a str,
        service: &'a str,
    ) -> BoxFuture<'a, Result<Endpoint, ExecError>> {
        async move {
            let args = vec![
                "get".into(),
                "service".into(),
                "-n".into(),
                namespace.into(),
                service.into(),
                "-o".into(),
                "json".into(),
            ];
            let json = self
                .get_json(args, format!("service {namespace}/{service}"))
                .await?;
            parse_service_endpoint(&json, &format!("{namespace}/{service}"))
        }
        .boxed()
    }

    fn pod_on_node<'a>(
        &'a self,
        namespace: &'a str,
        selector: &'a str,
        node: &'a str,
    ) -> BoxFuture<'a, Result<String, ExecError>> {
        async move {
            let args = vec![
                "get".into(),
                "pods".into(),
                "-n".into(),
                namespace.into(),
                "-l".into(),
                selector.into(),
                "--field-selector".into(),
                format!("spec.nodeName={node}"),
                "-o".into(),
                "json".into(),
            ];
            let what = format!("pod matching {selector} on node {node} in {namespace}");
            let json = self.get_json(args, what.clone()).await?;
            parse_pod_names(&json)?
                .into_iter()
                .next()
                .ok_or(ExecError::NotFound { what })
        }
        .boxed()
    }

    fn pods<'a>(
        &'a self,
        namespace: &'a str,
        selector: &'a str,
    ) -> BoxFuture<'a, Result<Vec<String>, ExecError>> {
        async move {
            let args = vec![
                "get".into(),
                "pods".into(),
                "-n".into(),
                namespace.into(),
                "-l".into(),
                selector.into(),
                "-o".into(),
                "json".into(),
            ];
            let json = self
                .get_json(args, format!("pods matching {selector} in {namespace}"))
                .await?;
            parse_pod_names(&json)
        }
        .boxed()
    }
}

impl LogSource for Kubectl {
    fn fetch_logs(&self, window: Duration) -> BoxFuture<'_, Result<Vec<String>, ExecError>> {
        async move {
            let args = self.logs_args(window);
            let out = process::run_checked(&self.kubectl, &args).await?;
            Ok(out.stdout.lines().map(str::to_string).collect())
        }
        .boxed()
    }
}
