//! Suite driver.
//!
//! Runs each case inside the same frame:
//!
//! 1. start a fresh [`LogWatcher`] on the probe node (failure: setup, body skipped)
//! 2. run the body, bounded by the case timeout, with panics caught
//! 3. validate the agent logs covering the case
//! 4. stop the watcher
//! 5. if anything failed, dump the failure report from every agent pod
//! 6. unwind the case's cleanups, newest first (workload deletion is always
//!    the oldest entry)
//!
//! After the last case the system under test is removed. Cleanup failures are
//! recorded but never replace the failure that came first.

use crate::report::{CaseReport, Failure, SuiteReport};
use crate::watcher::LogWatcher;
use futures::future::{BoxFuture, FutureExt};
use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use stress_core::config::Config;
use stress_core::{
    ClusterLookup, DenylistError, DeploymentManager, Denylist, FailureKind, HarnessError,
    LogSource, RemoteExecutor, Target,
};
use stress_remote::{HelmDeployer, Kubectl};
use tracing::{error, info, info_span, warn, Instrument};

/// Everything a case can reach: the cluster collaborators, the loaded
/// configuration, and the denylist compiled from it.
pub struct Harness {
    pub executor: Arc<dyn RemoteExecutor>,
    pub deployer: Arc<dyn DeploymentManager>,
    pub lookup: Arc<dyn ClusterLookup>,
    pub logs: Arc<dyn LogSource>,
    pub config: Config,
    denylist: Denylist,
}

impl Harness {
    pub fn new(
        executor: Arc<dyn RemoteExecutor>,
        deployer: Arc<dyn DeploymentManager>,
        lookup: Arc<dyn ClusterLookup>,
        logs: Arc<dyn LogSource>,
        config: Config,
    ) -> Result<Self, DenylistError> {
        let denylist = config.watcher.denylist()?;
        Ok(Self {
            executor,
            deployer,
            lookup,
            logs,
            config,
            denylist,
        })
    }

    /// A harness talking to a real cluster through kubectl, ssh and helm.
    pub fn connect(config: Config) -> Result<Self, DenylistError> {
        let kubectl = Arc::new(Kubectl::new(&config.cluster, &config.watcher));
        let deployer = Arc::new(HelmDeployer::new(&config.cluster));
        Self::new(kubectl.clone(), deployer, kubectl.clone(), kubectl, config)
    }

    pub fn denylist(&self) -> &Denylist {
        &self.denylist
    }

    /// The node the background probe runs on.
    pub fn probe_target(&self) -> Target {
        Target::node(&self.config.cluster.node)
    }
}

type CleanupFn = Box<dyn FnOnce() -> BoxFuture<'static, Result<(), HarnessError>> + Send>;

/// Deferred teardown steps, run newest first.
#[derive(Default)]
pub struct CleanupStack {
    entries: Vec<(String, CleanupFn)>,
}

impl CleanupStack {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push<F, Fut>(&mut self, label: impl Into<String>, step: F)
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<(), HarnessError>> + Send + 'static,
    {
        self.entries
            .push((label.into(), Box::new(move || step().boxed())));
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Run every step, newest first, and return the failures. A failing step
    /// does not stop the ones after it.
    pub async fn unwind(&mut self) -> Vec<HarnessError> {
        let mut failures = Vec::new();
        while let Some((label, step)) = self.entries.pop() {
            match step().await {
                Ok(()) => info!(step = %label, "cleanup done"),
                Err(e @ HarnessError::Cleanup { .. }) => {
                    warn!(step = %label, "{e}");
                    failures.push(e);
                }
                Err(e) => {
                    warn!(step = %label, "{e}");
                    failures.push(HarnessError::cleanup(label, e));
                }
            }
        }
        failures
    }
}

/// What a case body gets to work with.
pub struct CaseContext {
    harness: Arc<Harness>,
    cleanups: CleanupStack,
}

impl CaseContext {
    fn new(harness: Arc<Harness>) -> Self {
        Self {
            harness,
            cleanups: CleanupStack::new(),
        }
    }

    pub fn harness(&self) -> &Arc<Harness> {
        &self.harness
    }

    pub fn config(&self) -> &Config {
        &self.harness.config
    }

    /// Register a teardown step; it runs after the case even if the body
    /// fails, before anything registered earlier.
    pub fn defer<F, Fut>(&mut self, label: impl Into<String>, step: F)
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<(), HarnessError>> + Send + 'static,
    {
        self.cleanups.push(label, step);
    }
}

pub trait TestCase: Send + Sync {
    fn name(&self) -> &str;

    fn run<'a>(&'a self, ctx: &'a mut CaseContext) -> BoxFuture<'a, Result<(), HarnessError>>;
}

pub struct Suite {
    name: String,
    harness: Arc<Harness>,
    cases: Vec<Box<dyn TestCase>>,
}

impl Suite {
    pub fn new(name: impl Into<String>, harness: Arc<Harness>) -> Self {
        Self {
            name: name.into(),
            harness,
            cases: Vec::new(),
        }
    }

    pub fn case(mut self, case: impl TestCase + 'static) -> Self {
        self.cases.push(Box::new(case));
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub async fn run(&self) -> SuiteReport {
        let span = info_span!("suite", name = %self.name);
        async {
            let mut report = SuiteReport::new(&self.name);

            let mut teardown = CleanupStack::new();
            let deployer = self.harness.deployer.clone();
            teardown.push("remove system under test", move || async move {
                deployer
                    .delete_system_under_test()
                    .await
                    .map_err(|e| HarnessError::cleanup("remove system under test", e))
            });

            for case in &self.cases {
                let case_report = self
                    .run_case(case.as_ref())
                    .instrument(info_span!("case", name = %case.name()))
                    .await;
                report.cases.push(case_report);
            }

            report.teardown_failures = teardown
                .unwind()
                .await
                .iter()
                .map(|e| Failure {
                    kind: FailureKind::Cleanup,
                    message: e.to_string(),
                })
                .collect();

            if report.passed() {
                info!(cases = report.cases.len(), "suite passed");
            } else {
                error!(cases = report.cases.len(), "suite failed");
            }
            report
        }
        .instrument(span)
        .await
    }

    async fn run_case(&self, case: &dyn TestCase) -> CaseReport {
        let harness = &self.harness;
        let settings = &harness.config.watcher;
        let mut report = CaseReport::start(case.name());
        let mut ctx = CaseContext::new(harness.clone());

        let deployer = harness.deployer.clone();
        ctx.defer("delete case workloads", move || async move {
            deployer
                .delete_all()
                .await
                .map_err(|e| HarnessError::cleanup("delete case workloads", e))
        });

        let mut watcher = LogWatcher::new(
            harness.executor.clone(),
            harness.logs.clone(),
            harness.probe_target(),
            settings,
        );
        match watcher.start(&settings.probe_command).await {
            Err(e) => {
                error!("{e}");
                report.record(&e);
            }
            Ok(()) => {
                let limit = harness.config.stress.case_timeout();
                let body = AssertUnwindSafe(case.run(&mut ctx)).catch_unwind();
                match tokio::time::timeout(limit, body).await {
                    Ok(Ok(Ok(()))) => info!("body finished"),
                    Ok(Ok(Err(e))) => {
                        error!("{e}");
                        report.record(&e);
                    }
                    Ok(Err(panic)) => {
                        let message = format!("case panicked: {}", panic_message(panic.as_ref()));
                        error!("{message}");
                        report.fail(FailureKind::Assertion, message);
                    }
                    Err(_) => {
                        let message = format!("case timed out after {}s", limit.as_secs());
                        error!("{message}");
                        report.fail(FailureKind::Assertion, message);
                    }
                }

                match watcher.validate(report.elapsed(), harness.denylist()).await {
                    Ok(validation) => {
                        if let Some(e) = validation.into_failure() {
                            report.record(&e);
                        }
                    }
                    Err(e) => {
                        error!("{e}");
                        report.record(&e);
                    }
                }
            }
        }

        if let Err(e) = watcher.stop().await {
            report.record(&e);
        }

        if !report.passed() {
            self.report_agent_state().await;
        }

        for e in ctx.cleanups.unwind().await {
            report.record(&e);
        }
        report.finish();
        report
    }

    /// Log the failure report from every agent pod. Best effort.
    async fn report_agent_state(&self) {
        let cluster = &self.harness.config.cluster;
        let command = &self.harness.config.watcher.failure_report_command;
        let pods = match self
            .harness
            .lookup
            .pods(&cluster.agent_namespace, &cluster.agent_selector)
            .await
        {
            Ok(pods) => pods,
            Err(e) => {
                warn!("cannot list agent pods for the failure report: {e}");
                return;
            }
        };
        for pod in pods {
            let target = Target::pod(&cluster.agent_namespace, &pod)
                .in_container(&cluster.agent_container);
            match self.harness.executor.exec(&target, command).await {
                Ok(out) => info!(remote = %target, "`{command}`:\n{}{}", out.stdout, out.stderr),
                Err(e) => warn!(remote = %target, "failure report unavailable: {e}"),
            }
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&str>() {
        *s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.as_str()
    } else {
        "non-string panic payload"
    }
}
