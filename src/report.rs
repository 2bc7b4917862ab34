//! Case and suite reports.
//!
//! A case passes only when it recorded no failures. The first failure
//! recorded is the primary one; later failures (usually cleanup) are kept for
//! the record but never displace it.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::time::Duration;
use tokio::time::Instant;
use stress_core::{FailureKind, HarnessError};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Failure {
    pub kind: FailureKind,
    pub message: String,
}

impl std::fmt::Display for Failure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] {}", self.kind, self.message)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CaseReport {
    pub name: String,
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub failures: Vec<Failure>,
    #[serde(skip)]
    clock: Option<Instant>,
}

impl CaseReport {
    pub fn start(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            started_at: Utc::now(),
            duration_ms: 0,
            failures: Vec::new(),
            clock: Some(Instant::now()),
        }
    }

    pub fn fail(&mut self, kind: FailureKind, message: impl Into<String>) {
        self.failures.push(Failure {
            kind,
            message: message.into(),
        });
    }

    pub fn record(&mut self, err: &HarnessError) {
        self.fail(err.kind(), err.to_string());
    }

    /// Time since the case started.
    pub fn elapsed(&self) -> Duration {
        self.clock.map(|c| c.elapsed()).unwrap_or_default()
    }

    pub fn finish(&mut self) {
        self.duration_ms = u64::try_from(self.elapsed().as_millis()).unwrap_or(u64::MAX);
        self.clock = None;
    }

    pub fn passed(&self) -> bool {
        self.failures.is_empty()
    }

    pub fn primary_failure(&self) -> Option<&Failure> {
        self.failures.first()
    }

    pub fn failures_of(&self, kind: FailureKind) -> impl Iterator<Item = &Failure> {
        self.failures.iter().filter(move |f| f.kind == kind)
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct SuiteReport {
    pub suite: String,
    pub cases: Vec<CaseReport>,
    /// Failures from suite-level teardown (after every case).
    pub teardown_failures: Vec<Failure>,
}

impl SuiteReport {
    pub fn new(suite: impl Into<String>) -> Self {
        Self {
            suite: suite.into(),
            ..Self::default()
        }
    }

    pub fn passed(&self) -> bool {
        self.teardown_failures.is_empty() && self.cases.iter().all(CaseReport::passed)
    }

    pub fn case(&self, name: &str) -> Option<&CaseReport> {
        self.cases.iter().find(|c| c.name == name)
    }
}

impl std::fmt::Display for SuiteReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "{}", self.suite)?;
        for case in &self.cases {
            let verdict = if case.passed() { "PASS" } else { "FAIL" };
            writeln!(f, "  {verdict} {} ({} ms)", case.name, case.duration_ms)?;
            for failure in &case.failures {
                for (i, line) in failure.to_string().lines().enumerate() {
                    let indent = if i == 0 { "    " } else { "      " };
                    writeln!(f, "{indent}{line}")?;
                }
            }
        }
        for failure in &self.teardown_failures {
            writeln!(f, "  teardown: {failure}")?;
        }
        let passed = self.cases.iter().filter(|c| c.passed()).count();
        write!(f, "{passed}/{} cases passed", self.cases.len())
    }
}
