//! Command-loop builder.
//!
//! Stress workloads are authored as readable multi-line shell templates but
//! have to travel to the remote target as one command line. [`loop_command`]
//! wraps a template in a `seq`-driven bash loop and flattens the result.
//!
//! Inside a template, `${namespace}` expands to the namespace bound by the
//! loop and `$i` to the iteration counter, starting from 1. Because every
//! newline becomes a plain space, statements inside a template must be
//! separated by explicit semicolons. Templates may use single quotes freely;
//! they are escaped when the loop is wrapped for `bash -c`.

use regex::Regex;
use std::borrow::Cow;
use std::sync::OnceLock;
use std::time::Duration;

fn newline_run() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[ \t\r]*\n[ \t\r\n]*").expect("newline pattern is valid"))
}

/// Collapse every newline, together with the whitespace around it, into a
/// single space. Text without newlines is returned unchanged.
pub fn trim_newlines(script: &str) -> String {
    newline_run().replace_all(script, " ").into_owned()
}

/// Wrap `script` in single quotes, escaping the quotes it already contains.
fn single_quoted(script: &str) -> String {
    format!("'{}'", script.replace('\'', r"'\''"))
}

/// Quote `word` for a POSIX shell unless it is made only of safe characters.
pub fn shell_quote(word: &str) -> Cow<'_, str> {
    let safe = |c: char| c.is_ascii_alphanumeric() || "_-./:=@%+,".contains(c);
    if !word.is_empty() && word.chars().all(safe) {
        Cow::Borrowed(word)
    } else {
        Cow::Owned(single_quoted(word))
    }
}

/// Render `template` as a one-line bash loop that runs it `count` times.
///
/// A `count` of zero or less renders `seq 1 0`, a complete loop whose body
/// never runs.
pub fn loop_command(template: &str, namespace: &str, count: i64) -> String {
    let count = count.max(0);
    let body = match template.trim().trim_end_matches(';').trim_end() {
        "" => ":",
        body => body,
    };
    let script = trim_newlines(&format!(
        "namespace={};
        for i in $(seq 1 {count}); do
          {body};
        done",
        shell_quote(namespace)
    ));
    format!("/bin/bash -c {}", single_quoted(&script))
}

/// Render a probe that repeats `probe` every `interval` until killed.
///
/// Intervals under one second are rounded up to one second.
pub fn watch_command(probe: &str, interval: Duration) -> String {
    let secs = interval.as_secs().max(1);
    let probe = probe.trim().trim_end_matches(';').trim_end();
    let script = trim_newlines(&format!(
        "while true; do
          {probe};
          sleep {secs};
        done"
    ));
    format!("/bin/sh -c {}", single_quoted(&script))
}

/// A loop workload: what to run, in which namespace, how many times.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoopSpec {
    template: String,
    namespace: String,
    count: i64,
}

impl LoopSpec {
    pub fn new(template: impl Into<String>, namespace: impl Into<String>, count: i64) -> Self {
        Self {
            template: template.into(),
            namespace: namespace.into(),
            count,
        }
    }

    pub fn template(&self) -> &str {
        &self.template
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Iterations the rendered loop will run; negative counts run zero times.
    pub fn iterations(&self) -> u64 {
        self.count.max(0) as u64
    }

    pub fn render(&self) -> String {
        loop_command(&self.template, &self.namespace, self.count)
    }
}
