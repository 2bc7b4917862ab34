//! Builders for harnesses, configs, and scripted cases.
//!
//! These panic on invalid input rather than returning `Result`.

use crate::common::FakeCluster;
use futures::future::{BoxFuture, FutureExt};
use policy_stress::{CaseContext, Harness, TestCase};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use stress_core::config::Config;
use stress_core::HarnessError;

/// Defaults with every delay shrunk for tests.
pub fn fast_config() -> Config {
    let mut config = Config::defaults();
    config.watcher.settle_ms = 0;
    config.watcher.startup_grace_ms = 0;
    config.watcher.stop_timeout_secs = 1;
    config.stress.case_timeout_secs = 60;
    config.stress.identity_count = 3;
    config
}

/// A harness whose every collaborator is `fake`.
pub fn harness_with(fake: &Arc<FakeCluster>, config: Config) -> Arc<Harness> {
    Arc::new(
        Harness::new(fake.clone(), fake.clone(), fake.clone(), fake.clone(), config)
            .expect("test config compiles"),
    )
}

pub fn fake_harness(fake: FakeCluster) -> (Arc<FakeCluster>, Arc<Harness>) {
    let fake = Arc::new(fake);
    let harness = harness_with(&fake, fast_config());
    (fake, harness)
}

/// What a [`ScriptedCase`] body does.
#[derive(Debug, Clone)]
pub enum Step {
    Pass,
    Fail(String),
    /// Fails with a setup error, as if a precondition could not be met.
    SetupFail,
    Panic(String),
    Sleep(Duration),
    /// Runs a command on the given node through the harness executor.
    Exec(String),
}

/// A case whose body is a list of [`Step`]s and which can register cleanups.
pub struct ScriptedCase {
    name: String,
    steps: Vec<Step>,
    /// Cleanup labels to register before the steps run.
    deferred: Vec<(String, bool)>,
    /// Labels of cleanups that ran, in order.
    pub cleanup_log: Arc<Mutex<Vec<String>>>,
    pub ran: Arc<Mutex<bool>>,
}

impl ScriptedCase {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.into(),
            steps: Vec::new(),
            deferred: Vec::new(),
            cleanup_log: Arc::new(Mutex::new(Vec::new())),
            ran: Arc::new(Mutex::new(false)),
        }
    }

    pub fn step(mut self, step: Step) -> Self {
        self.steps.push(step);
        self
    }

    pub fn defer(mut self, label: &str) -> Self {
        self.deferred.push((label.into(), true));
        self
    }

    pub fn defer_failing(mut self, label: &str) -> Self {
        self.deferred.push((label.into(), false));
        self
    }

    async fn body(&self, ctx: &mut CaseContext) -> Result<(), HarnessError> {
        *self.ran.lock().unwrap() = true;
        for (label, ok) in self.deferred.clone() {
            let log = self.cleanup_log.clone();
            ctx.defer(label.clone(), move || async move {
                log.lock().unwrap().push(label.clone());
                if ok {
                    Ok(())
                } else {
                    Err(HarnessError::cleanup(label, "still terminating"))
                }
            });
        }
        for step in &self.steps {
            match step {
                Step::Pass => {}
                Step::Fail(msg) => return Err(HarnessError::Assertion(msg.clone())),
                Step::SetupFail => {
                    return Err(HarnessError::setup(
                        "find agent pod",
                        stress_core::ExecError::NotFound {
                            what: "pod k8s-app=cilium on node k8s1".into(),
                        },
                    ))
                }
                Step::Panic(msg) => panic!("{msg}"),
                Step::Sleep(d) => tokio::time::sleep(*d).await,
                Step::Exec(command) => {
                    let harness = ctx.harness().clone();
                    let target = harness.probe_target();
                    harness
                        .executor
                        .exec(&target, command)
                        .await
                        .map_err(|e| HarnessError::remote("scripted exec", e))?;
                }
            }
        }
        Ok(())
    }
}

impl TestCase for ScriptedCase {
    fn name(&self) -> &str {
        &self.name
    }

    fn run<'a>(&'a self, ctx: &'a mut CaseContext) -> BoxFuture<'a, Result<(), HarnessError>> {
        self.body(ctx).boxed()
    }
}
