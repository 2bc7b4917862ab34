//! FakeCluster: an in-memory stand-in for every collaborator trait.
//!
//! Records each call in order so harnesses can assert on sequencing, and can
//! be scripted to refuse sessions, fail deployments, or return dirty logs.
//! Background probes are real tokio tasks that wait on their cancellation
//! token, so cancellation is observable through [`FakeCluster::cancels`].

use futures::future::{BoxFuture, FutureExt};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use stress_core::{
    AgentOptions, BackgroundProcess, ClusterLookup, DeploymentManager, Endpoint, ExecError,
    ExecOutput, LogSource, Manifest, RemoteExecutor, Target,
};
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Exec { target: Target, command: String },
    ExecBackground { target: Target, command: String },
    ProbeCancelled { target: Target },
    Deploy { namespace: String, manifest: String },
    WaitUntilReady,
    DeployWithOptions { options: AgentOptions, extra: Vec<String> },
    DeployRandomNamespace { manifest: String, namespace: String },
    DeleteAll,
    DeleteSystemUnderTest,
    ServiceEndpoint { namespace: String, service: String },
    PodOnNode { namespace: String, selector: String, node: String },
    Pods { namespace: String, selector: String },
    FetchLogs { window: Duration },
}

/// How the background probe behaves once started.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ProbeBehaviour {
    /// Runs until cancelled.
    #[default]
    UntilCancelled,
    /// Dies on its own right away.
    ExitsEarly,
    /// Ignores cancellation.
    Hangs,
}

#[derive(Debug)]
struct Script {
    refuse_background: bool,
    probe: ProbeBehaviour,
    logs: Result<Vec<String>, String>,
    etcd: Option<Endpoint>,
    /// (node, pod) pairs for the agent daemonset.
    agent_pods: Vec<(String, String)>,
    random_namespace: String,
    /// Exit status for `exec` calls whose command contains the key.
    exec_status: Vec<(String, i32)>,
    fail_deploy: bool,
    fail_delete_all: bool,
    fail_delete_system: bool,
}

impl Default for Script {
    fn default() -> Self {
        Self {
            refuse_background: false,
            probe: ProbeBehaviour::default(),
            logs: Ok(crate::common::CLEAN_AGENT_LOG.iter().map(|s| s.to_string()).collect()),
            etcd: Some(Endpoint {
                host: "10.96.0.9".into(),
                port: 2379,
            }),
            agent_pods: vec![
                ("k8s1".into(), "cilium-k8s1x".into()),
                ("k8s2".into(), "cilium-k8s2y".into()),
            ],
            random_namespace: "connectivity-check-0badf00d".into(),
            exec_status: Vec::new(),
            fail_deploy: false,
            fail_delete_all: false,
            fail_delete_system: false,
        }
    }
}

#[derive(Debug, Default)]
pub struct FakeCluster {
    calls: Arc<Mutex<Vec<Call>>>,
    cancels: Arc<AtomicUsize>,
    script: Mutex<Script>,
}

impl FakeCluster {
    pub fn new() -> Self {
        Self::default()
    }

    fn scripted(self, edit: impl FnOnce(&mut Script)) -> Self {
        edit(&mut self.script.lock().unwrap());
        self
    }

    pub fn refuse_background(self) -> Self {
        self.scripted(|s| s.refuse_background = true)
    }

    pub fn probe(self, behaviour: ProbeBehaviour) -> Self {
        self.scripted(|s| s.probe = behaviour)
    }

    pub fn with_logs(self, lines: &[&str]) -> Self {
        let lines = lines.iter().map(|s| s.to_string()).collect();
        self.scripted(|s| s.logs = Ok(lines))
    }

    pub fn logs_unavailable(self) -> Self {
        self.scripted(|s| s.logs = Err("connection reset".into()))
    }

    pub fn without_etcd_service(self) -> Self {
        self.scripted(|s| s.etcd = None)
    }

    pub fn without_agent_pods(self) -> Self {
        self.scripted(|s| s.agent_pods.clear())
    }

    pub fn exec_exits(self, command_contains: &str, status: i32) -> Self {
        let key = command_contains.to_string();
        self.scripted(|s| s.exec_status.push((key, status)))
    }

    pub fn fail_deploy(self) -> Self {
        self.scripted(|s| s.fail_deploy = true)
    }

    pub fn fail_delete_all(self) -> Self {
        self.scripted(|s| s.fail_delete_all = true)
    }

    pub fn fail_delete_system(self) -> Self {
        self.scripted(|s| s.fail_delete_system = true)
    }

    fn record(&self, call: Call) {
        self.calls.lock().unwrap().push(call);
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    /// Calls matching `pred`, in order.
    pub fn calls_where(&self, pred: impl Fn(&Call) -> bool) -> Vec<Call> {
        self.calls().into_iter().filter(|c| pred(c)).collect()
    }

    pub fn count(&self, pred: impl Fn(&Call) -> bool) -> usize {
        self.calls().iter().filter(|c| pred(c)).count()
    }

    /// Position of the first call matching `pred`.
    pub fn position(&self, pred: impl Fn(&Call) -> bool) -> Option<usize> {
        self.calls().iter().position(pred)
    }

    /// How many background probes observed their cancellation.
    pub fn cancels(&self) -> usize {
        self.cancels.load(Ordering::SeqCst)
    }

    /// Commands run to completion, in order.
    pub fn exec_commands(&self) -> Vec<(Target, String)> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::Exec { target, command } => Some((target, command)),
                _ => None,
            })
            .collect()
    }
}

fn failed(target: &str, command: &str, why: &str) -> ExecError {
    ExecError::Failed {
        target: target.into(),
        command: command.into(),
        status: "1".into(),
        stderr: why.into(),
    }
}

impl RemoteExecutor for FakeCluster {
    fn exec<'a>(
        &'a self,
        target: &'a Target,
        command: &'a str,
    ) -> BoxFuture<'a, Result<ExecOutput, ExecError>> {
        async move {
            self.record(Call::Exec {
                target: target.clone(),
                command: command.to_string(),
            });
            let status = self
                .script
                .lock()
                .unwrap()
                .exec_status
                .iter()
                .find(|(key, _)| command.contains(key.as_str()))
                .map_or(0, |(_, status)| *status);
            Ok(ExecOutput {
                status: Some(status),
                stdout: format!("ran on {target}\n"),
                stderr: if status == 0 {
                    String::new()
                } else {
                    "kvstore unreachable\n".into()
                },
            })
        }
        .boxed()
    }

    fn exec_background<'a>(
        &'a self,
        target: &'a Target,
        command: &'a str,
    ) -> BoxFuture<'a, Result<BackgroundProcess, ExecError>> {
        async move {
            self.record(Call::ExecBackground {
                target: target.clone(),
                command: command.to_string(),
            });
            let (refuse, behaviour) = {
                let script = self.script.lock().unwrap();
                (script.refuse_background, script.probe)
            };
            if refuse {
                return Err(ExecError::SessionRefused {
                    target: target.to_string(),
                    reason: "ssh: connect to host k8s1 port 22: Connection refused".into(),
                });
            }

            let token = CancellationToken::new();
            let child = token.clone();
            let calls = self.calls.clone();
            let cancels = self.cancels.clone();
            let target = target.clone();
            let handle = tokio::spawn(async move {
                match behaviour {
                    ProbeBehaviour::UntilCancelled => {
                        child.cancelled().await;
                        cancels.fetch_add(1, Ordering::SeqCst);
                        calls.lock().unwrap().push(Call::ProbeCancelled { target });
                        Ok(())
                    }
                    ProbeBehaviour::ExitsEarly => Err(ExecError::ProbeExited {
                        target: target.to_string(),
                        status: "255".into(),
                    }),
                    ProbeBehaviour::Hangs => {
                        futures::future::pending::<()>().await;
                        Ok(())
                    }
                }
            });
            Ok(BackgroundProcess::new(token, handle))
        }
        .boxed()
    }
}

impl DeploymentManager for FakeCluster {
    fn deploy<'a>(
        &'a self,
        namespace: &'a str,
        manifest: &'a Manifest,
    ) -> BoxFuture<'a, Result<(), ExecError>> {
        async move {
            self.record(Call::Deploy {
                namespace: namespace.to_string(),
                manifest: manifest.name.clone(),
            });
            if self.script.lock().unwrap().fail_deploy {
                return Err(failed("kubectl", "apply", "admission webhook denied"));
            }
            Ok(())
        }
        .boxed()
    }

    fn wait_until_ready(&self) -> BoxFuture<'_, Result<(), ExecError>> {
        async move {
            self.record(Call::WaitUntilReady);
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
            self.record(Call::DeployWithOptions {
                options: options.clone(),
                extra: extra.iter().map(|m| m.name.clone()).collect(),
            });
            Ok(())
        }
        .boxed()
    }

    fn deploy_random_namespace<'a>(
        &'a self,
        manifest: &'a Manifest,
    ) -> BoxFuture<'a, Result<String, ExecError>> {
        async move {
            let namespace = self.script.lock().unwrap().random_namespace.clone();
            self.record(Call::DeployRandomNamespace {
                manifest: manifest.name.clone(),
                namespace: namespace.clone(),
            });
            Ok(namespace)
        }
        .boxed()
    }

    fn delete_all(&self) -> BoxFuture<'_, Result<(), ExecError>> {
        async move {
            self.record(Call::DeleteAll);
            if self.script.lock().unwrap().fail_delete_all {
                return Err(failed("kubectl", "delete namespace", "timed out waiting for finalizers"));
            }
            Ok(())
        }
        .boxed()
    }

    fn delete_system_under_test(&self) -> BoxFuture<'_, Result<(), ExecError>> {
        async move {
            self.record(Call::DeleteSystemUnderTest);
            if self.script.lock().unwrap().fail_delete_system {
                return Err(failed("helm", "uninstall cilium", "release not found"));
            }
            Ok(())
        }
        .boxed()
    }
}

impl ClusterLookup for FakeCluster {
    fn service_endpoint<'a>(
        &'a self,
        namespace: &'a str,
        service: &'a str,
    ) -> BoxFuture<'a, Result<Endpoint, ExecError>> {
        async move {
            self.record(Call::ServiceEndpoint {
                namespace: namespace.to_string(),
                service: service.to_string(),
            });
            self.script
                .lock()
                .unwrap()
                .etcd
                .clone()
                .ok_or_else(|| ExecError::NotFound {
                    what: format!("service {namespace}/{service}"),
                })
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
            self.record(Call::PodOnNode {
                namespace: namespace.to_string(),
                selector: selector.to_string(),
                node: node.to_string(),
            });
            self.script
                .lock()
                .unwrap()
                .agent_pods
                .iter()
                .find(|(n, _)| n == node)
                .map(|(_, pod)| pod.clone())
                .ok_or_else(|| ExecError::NotFound {
                    what: format!("pod {selector} on node {node}"),
                })
        }
        .boxed()
    }

    fn pods<'a>(
        &'a self,
        namespace: &'a str,
        selector: &'a str,
    ) -> BoxFuture<'a, Result<Vec<String>, ExecError>> {
        async move {
            self.record(Call::Pods {
                namespace: namespace.to_string(),
                selector: selector.to_string(),
            });
            Ok(self
                .script
                .lock()
                .unwrap()
                .agent_pods
                .iter()
                .map(|(_, pod)| pod.clone())
                .collect())
        }
        .boxed()
    }
}

impl LogSource for FakeCluster {
    fn fetch_logs(&self, window: Duration) -> BoxFuture<'_, Result<Vec<String>, ExecError>> {
        async move {
            self.record(Call::FetchLogs { window });
            self.script
                .lock()
                .unwrap()
                .logs
                .clone()
                .map_err(|why| failed("kubectl", "logs", &why))
        }
        .boxed()
    }
}
