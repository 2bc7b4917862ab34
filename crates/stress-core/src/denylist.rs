//! Log denylist: patterns that must never appear in the agent's logs.
//!
//! A [`Denylist`] is an ordered list of [`DenyRule`]s. Each rule is a regular
//! expression plus optional exception expressions: a line matching the rule
//! but also one of its exceptions is tolerated. When scanning, a line is
//! attributed to the first rule (in list order) that flags it.

use regex::Regex;
use thiserror::Error;

/// Known-bad messages, each with the substrings that make it benign.
const KNOWN_BAD: &[(&str, &[&str])] = &[
    ("panic:", &[]),
    ("POTENTIAL DEADLOCK:", &[]),
    ("segmentation fault", &[]),
    ("NACK received for version", &[]),
    ("JoinEP: ", &["signal: terminated", "signal: killed"]),
    ("size mismatch for BPF map", &["globals/cilium_policy"]),
    ("empty argument passed to bpf/init.sh", &[]),
    (
        "Removing map to allow for property upgrade",
        &["globals/cilium_policy"],
    ),
    ("Log buffer too small to dump verifier log", &[]),
    (" errors generated.", &[]),
    ("1 error generated.", &[]),
    ("Skipping symbol substitution", &[]),
    ("Uninitialized regeneration level", &[]),
    ("BUG: stat() has unstable behavior", &[]),
    ("Unable to process chain CILIUM_TRANSIENT_FORWARD with ip", &[]),
    ("Missing iptables wait arg (-w):", &[]),
    ("Could not restore all CIDR identities", &[]),
];

/// Matches error-level records in logfmt (`level=error`) and JSON
/// (`"level":"error"`) output.
pub const ERROR_LEVEL_PATTERN: &str =
    r#"(?i)\blevel=(error|fatal|panic)\b|"level"\s*:\s*"(error|fatal|panic)""#;

#[derive(Debug, Error)]
pub enum DenylistError {
    #[error("invalid denylist pattern {pattern:?}: {source}")]
    Invalid {
        pattern: String,
        #[source]
        source: regex::Error,
    },
}

fn compile(pattern: &str) -> Result<Regex, DenylistError> {
    Regex::new(pattern).map_err(|source| DenylistError::Invalid {
        pattern: pattern.to_string(),
        source,
    })
}

/// One denylisted pattern and its exceptions.
#[derive(Debug, Clone)]
pub struct DenyRule {
    pattern: Regex,
    exceptions: Vec<Regex>,
}

impl DenyRule {
    pub fn new(pattern: &str) -> Result<Self, DenylistError> {
        Ok(Self {
            pattern: compile(pattern)?,
            exceptions: Vec::new(),
        })
    }

    /// A rule matching `text` verbatim.
    pub fn literal(text: &str) -> Self {
        Self {
            pattern: Regex::new(&regex::escape(text)).expect("escaped literal is a valid regex"),
            exceptions: Vec::new(),
        }
    }

    pub fn with_exception(mut self, pattern: &str) -> Result<Self, DenylistError> {
        self.exceptions.push(compile(pattern)?);
        Ok(self)
    }

    pub fn with_literal_exception(mut self, text: &str) -> Self {
        self.exceptions
            .push(Regex::new(&regex::escape(text)).expect("escaped literal is a valid regex"));
        self
    }

    pub fn pattern(&self) -> &str {
        self.pattern.as_str()
    }

    /// True when `line` matches the pattern and none of the exceptions.
    pub fn flags(&self, line: &str) -> bool {
        self.pattern.is_match(line) && !self.exceptions.iter().any(|e| e.is_match(line))
    }
}

/// A log line that tripped a rule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Violation {
    /// 1-based position of the line in the scanned output.
    pub line_number: usize,
    pub line: String,
    pub pattern: String,
}

impl std::fmt::Display for Violation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "line {}: {} (matched {:?})",
            self.line_number, self.line, self.pattern
        )
    }
}

#[derive(Debug, Clone, Default)]
pub struct Denylist {
    rules: Vec<DenyRule>,
}

impl Denylist {
    pub fn new() -> Self {
        Self::default()
    }

    /// The built-in known-bad messages, in order.
    pub fn known_bad() -> Self {
        let rules = KNOWN_BAD
            .iter()
            .map(|(text, exceptions)| {
                exceptions
                    .iter()
                    .fold(DenyRule::literal(text), |rule, e| rule.with_literal_exception(e))
            })
            .collect();
        Self { rules }
    }

    /// The rule flagging any error-level record.
    pub fn error_level_rule() -> DenyRule {
        DenyRule::new(ERROR_LEVEL_PATTERN).expect("error-level pattern is valid")
    }

    pub fn push(&mut self, rule: DenyRule) {
        self.rules.push(rule);
    }

    pub fn with_rule(mut self, rule: DenyRule) -> Self {
        self.push(rule);
        self
    }

    pub fn with_pattern(self, pattern: &str) -> Result<Self, DenylistError> {
        Ok(self.with_rule(DenyRule::new(pattern)?))
    }

    pub fn rules(&self) -> &[DenyRule] {
        &self.rules
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// First rule that flags `line`, in list order.
    pub fn first_match(&self, line: &str) -> Option<&DenyRule> {
        self.rules.iter().find(|r| r.flags(line))
    }

    /// Test every line against every rule; each offending line is reported
    /// once, against the first rule that flagged it.
    pub fn scan<'a, I>(&self, lines: I) -> Vec<Violation>
    where
        I: IntoIterator<Item = &'a str>,
    {
        lines
            .into_iter()
            .enumerate()
            .filter_map(|(idx, line)| {
                self.first_match(line).map(|rule| Violation {
                    line_number: idx + 1,
                    line: line.to_string(),
                    pattern: rule.pattern().to_string(),
                })
            })
            .collect()
    }
}
