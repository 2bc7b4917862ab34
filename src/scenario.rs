//! The identity churn case.
//!
//! Installs the agent with kvstore identity allocation backed by a stateless
//! etcd, deploys the connectivity check into a fresh namespace, then floods
//! the kvstore with identities from inside the agent pod on the probe node:
//! half labelled for the default namespace, half carrying the
//! `manifest=policy-stress-test` label the check's wildcard policy selects.

use crate::suite::{CaseContext, TestCase};
use futures::future::{BoxFuture, FutureExt};
use stress_core::config::{Config, StressConfig};
use stress_core::{AgentOptions, Endpoint, HarnessError, LoopSpec, Target};
use tracing::info;

pub const SUITE_NAME: &str = "NightlyPolicyStress";

#[derive(Debug, Clone, Default)]
pub struct IdentityChurn {
    count: Option<i64>,
}

impl IdentityChurn {
    pub fn new() -> Self {
        Self::default()
    }

    /// Override the configured number of loop iterations.
    pub fn with_count(mut self, count: i64) -> Self {
        self.count = Some(count);
        self
    }
}

/// Loop body inserting two identities per iteration.
pub fn identity_template(stress: &StressConfig) -> String {
    let prefix = &stress.kvstore_prefix;
    let base = stress.identity_base;
    let wild = stress.wildcard_base;
    format!(
        r#"cilium kvstore set --key "{prefix}/$(({base}+$i))"
                   --value "k8s:test-id=$(({base}+$i));k8s:io.kubernetes.pod.namespace=default;";
cilium kvstore set --key "{prefix}/$(({wild}+$i))"
                   --value "k8s:manifest=policy-stress-test;k8s:test-id=$(({wild}+$i));k8s:io.kubernetes.pod.namespace=${{namespace}};""#
    )
}

/// Chart values switching the agent to kvstore identities on `etcd`.
pub fn agent_options(config: &Config, etcd: &Endpoint) -> AgentOptions {
    let mut options = AgentOptions::new();
    options.insert("global.etcd.enabled".into(), "true".into());
    options.insert("global.etcd.endpoints[0]".into(), etcd.http_url());
    options.insert("global.identityAllocationMode".into(), "kvstore".into());
    options.insert("global.prometheus.enabled".into(), "true".into());
    if config.cluster.node_without_agent {
        options.insert("config.synchronizeK8sNodes".into(), "false".into());
    }
    options
}

impl IdentityChurn {
    async fn churn(&self, ctx: &mut CaseContext) -> Result<(), HarnessError> {
        let harness = ctx.harness().clone();
        let cluster = &harness.config.cluster;
        let stress = &harness.config.stress;
        let agent_ns = cluster.agent_namespace.as_str();

        let etcd = cluster.manifest(&stress.etcd_manifest);
        harness
            .deployer
            .deploy(agent_ns, &etcd)
            .await
            .map_err(|e| HarnessError::remote(format!("deploy {} into {agent_ns}", etcd.name), e))?;
        harness
            .deployer
            .wait_until_ready()
            .await
            .map_err(|e| HarnessError::remote("wait for stateless etcd", e))?;

        let endpoint = harness
            .lookup
            .service_endpoint(agent_ns, &stress.etcd_service)
            .await
            .map_err(|e| {
                HarnessError::setup(
                    format!("resolve service {agent_ns}/{}", stress.etcd_service),
                    e,
                )
            })?;
        info!(etcd = %endpoint.http_url(), "stateless etcd ready");

        let options = agent_options(&harness.config, &endpoint);
        let dns = [cluster.manifest(&stress.dns_manifest)];
        harness
            .deployer
            .deploy_with_options(&options, &dns)
            .await
            .map_err(|e| HarnessError::remote("deploy agent with kvstore identities", e))?;

        let check = cluster.manifest(&stress.connectivity_manifest);
        let namespace = harness
            .deployer
            .deploy_random_namespace(&check)
            .await
            .map_err(|e| HarnessError::remote(format!("deploy {}", check.name), e))?;
        harness
            .deployer
            .wait_until_ready()
            .await
            .map_err(|e| HarnessError::remote(format!("wait for {namespace}"), e))?;

        let pod = harness
            .lookup
            .pod_on_node(agent_ns, &cluster.agent_selector, &cluster.node)
            .await
            .map_err(|e| {
                HarnessError::setup(format!("find agent pod on node {}", cluster.node), e)
            })?;
        let target = Target::pod(agent_ns, &pod).in_container(&cluster.agent_container);

        let spec = LoopSpec::new(
            identity_template(stress),
            &namespace,
            self.count.unwrap_or(stress.identity_count),
        );
        info!(remote = %target, namespace = %namespace, iterations = spec.iterations(), "inserting identities");
        let what = format!("insert {} identity pairs", spec.iterations());
        harness
            .executor
            .exec(&target, &spec.render())
            .await
            .and_then(|out| out.ensure_success(&target, &what))
            .map_err(|e| HarnessError::remote(what.clone(), e))?;
        Ok(())
    }
}

impl TestCase for IdentityChurn {
    fn name(&self) -> &str {
        "Identity Churn"
    }

    fn run<'a>(&'a self, ctx: &'a mut CaseContext) -> BoxFuture<'a, Result<(), HarnessError>> {
        self.churn(ctx).boxed()
    }
}
