//! Background log watcher.
//!
//! One [`LogWatcher`] lives for exactly one case:
//!
//! ```text
//! Idle --start--> Running --validate--> Validated --stop--> Stopped
//!                    \______________________stop__________/
//! ```
//!
//! While running, a probe command loops on a node so the agent keeps doing
//! work and the remote session stays open. `validate` pulls the agent logs
//! covering the case and scans them against the denylist; `stop` cancels the
//! probe and waits for it to wind down.

use std::sync::Arc;
use std::time::Duration;
use stress_core::config::WatcherConfig;
use stress_core::{
    watch_command, BackgroundProcess, Denylist, HarnessError, LogSource, RemoteExecutor, Target,
    Violation,
};
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatcherState {
    Idle,
    Running,
    Validated,
    Stopped,
}

impl WatcherState {
    pub fn as_str(self) -> &'static str {
        match self {
            WatcherState::Idle => "idle",
            WatcherState::Running => "running",
            WatcherState::Validated => "validated",
            WatcherState::Stopped => "stopped",
        }
    }
}

/// Outcome of scanning one window of agent logs.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValidationReport {
    pub window: Duration,
    pub lines_scanned: usize,
    pub violations: Vec<Violation>,
}

impl ValidationReport {
    pub fn is_clean(&self) -> bool {
        self.violations.is_empty()
    }

    /// The assertion failure for a dirty report, naming every offending line.
    pub fn into_failure(self) -> Option<HarnessError> {
        if self.is_clean() {
            return None;
        }
        let mut message = format!(
            "found {} denylisted line(s) in {} agent log lines from the last {}s",
            self.violations.len(),
            self.lines_scanned,
            self.window.as_secs()
        );
        for violation in &self.violations {
            message.push_str("\n  ");
            message.push_str(&violation.to_string());
        }
        Some(HarnessError::Assertion(message))
    }
}

pub struct LogWatcher {
    executor: Arc<dyn RemoteExecutor>,
    logs: Arc<dyn LogSource>,
    target: Target,
    probe_interval: Duration,
    settle: Duration,
    stop_timeout: Duration,
    state: WatcherState,
    probe: Option<BackgroundProcess>,
}

impl LogWatcher {
    pub fn new(
        executor: Arc<dyn RemoteExecutor>,
        logs: Arc<dyn LogSource>,
        target: Target,
        settings: &WatcherConfig,
    ) -> Self {
        Self {
            executor,
            logs,
            target,
            probe_interval: settings.probe_interval(),
            settle: settings.settle(),
            stop_timeout: settings.stop_timeout(),
            state: WatcherState::Idle,
            probe: None,
        }
    }

    pub fn state(&self) -> WatcherState {
        self.state
    }

    pub fn target(&self) -> &Target {
        &self.target
    }

    fn refuse(&self, op: &'static str) -> HarnessError {
        HarnessError::InvalidTransition {
            op,
            state: self.state.as_str(),
        }
    }

    /// Start looping `probe` on the target node.
    ///
    /// A refused session is a setup failure and leaves the watcher idle, so a
    /// later `stop` has nothing to cancel.
    pub async fn start(&mut self, probe: &str) -> Result<(), HarnessError> {
        if self.state != WatcherState::Idle {
            return Err(self.refuse("start"));
        }
        let command = watch_command(probe, self.probe_interval);
        let process = self
            .executor
            .exec_background(&self.target, &command)
            .await
            .map_err(|e| {
                HarnessError::setup(format!("start `{probe}` on {}", self.target), e)
            })?;
        self.probe = Some(process);
        self.state = WatcherState::Running;
        info!(remote = %self.target, probe, "background probe started");
        Ok(())
    }

    /// Scan the agent logs of the last `window` against `denylist`.
    ///
    /// `window` is measured when validation is requested; the settle delay
    /// spent before fetching is added to it so the fetch still reaches back
    /// to the same starting point. The watcher counts as validated even if
    /// fetching the logs fails.
    pub async fn validate(
        &mut self,
        window: Duration,
        denylist: &Denylist,
    ) -> Result<ValidationReport, HarnessError> {
        if self.state != WatcherState::Running {
            return Err(self.refuse("validate"));
        }
        if !self.settle.is_zero() {
            tokio::time::sleep(self.settle).await;
        }
        let window = window + self.settle;
        let fetched = self.logs.fetch_logs(window).await;
        self.state = WatcherState::Validated;
        let lines = fetched.map_err(|e| {
            HarnessError::remote(
                format!("fetch agent logs for the last {}s", window.as_secs()),
                e,
            )
        })?;

        let violations = denylist.scan(lines.iter().map(String::as_str));
        if violations.is_empty() {
            info!(lines = lines.len(), "agent logs clean");
        } else {
            for violation in &violations {
                error!(line = violation.line_number, pattern = %violation.pattern, "{}", violation.line);
            }
        }
        Ok(ValidationReport {
            window,
            lines_scanned: lines.len(),
            violations,
        })
    }

    /// Cancel the probe and wait for it to finish.
    ///
    /// Safe to call more than once; a watcher that never started stays idle.
    /// A probe that died on its own before the cancel is only logged.
    pub async fn stop(&mut self) -> Result<(), HarnessError> {
        let Some(process) = self.probe.take() else {
            debug!(state = self.state.as_str(), "stop: no probe running");
            return Ok(());
        };
        self.state = WatcherState::Stopped;
        let (cancel, handle) = process.into_parts();
        cancel.cancel();

        let context = format!("stop background probe on {}", self.target);
        match tokio::time::timeout(self.stop_timeout, handle).await {
            Ok(Ok(Ok(()))) => {
                debug!(remote = %self.target, "background probe stopped");
                Ok(())
            }
            Ok(Ok(Err(e))) => {
                warn!(remote = %self.target, "background probe ended early: {e}");
                Ok(())
            }
            Ok(Err(join)) => Err(HarnessError::cleanup(context, join)),
            Err(_) => Err(HarnessError::cleanup(
                context,
                format!("still running after {}s", self.stop_timeout.as_secs()),
            )),
        }
    }
}

impl Drop for LogWatcher {
    fn drop(&mut self) {
        if let Some(process) = self.probe.take() {
            warn!(remote = %self.target, "watcher dropped while running; cancelling probe");
            process.cancel_token().cancel();
        }
    }
}
