//! Configuration types for policy-stress.
//!
//! [`Config::load`] layers, in order: the built-in defaults below, a config
//! file (the `--config` path, else `$XDG_CONFIG_HOME/policy-stress/config.toml`
//! when it exists), and `POLICY_STRESS__SECTION__KEY` environment variables.
//! [`Config::defaults`] returns the built-in values without touching the
//! filesystem (useful in tests).

use crate::denylist::{Denylist, DenylistError};
use crate::types::Manifest;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

// ---------------------------------------------------------------------------
// Embedded defaults
// ---------------------------------------------------------------------------

const DEFAULT_CONFIG: &str = r#"
[cluster]
kubectl            = "kubectl"
ssh                = "ssh"
helm               = "helm"
agent_namespace    = "kube-system"
agent_selector     = "k8s-app=cilium"
agent_container    = "cilium-agent"
node               = "k8s1"
node_without_agent = false
chart              = "./install/kubernetes/cilium"
release            = "cilium"
manifest_dir       = "manifests"
ready_timeout_secs = 240

[watcher]
probe_command          = "uptime"
probe_interval_secs    = 1
startup_grace_ms       = 500
settle_ms              = 2000
stop_timeout_secs      = 10
failure_report_command = "cilium endpoint list"
fail_on_error_level    = true
extra_patterns         = []

[stress]
identity_count        = 10000
identity_base         = 65535
wildcard_base         = 75535
kvstore_prefix        = "cilium/state/identities/v1/id"
etcd_service          = "stateless-etcd"
etcd_manifest         = "stateless-etcd.yaml"
connectivity_manifest = "connectivity-check.yaml"
dns_manifest          = "coredns.yaml"
case_timeout_secs     = 1800
"#;

const ENV_PREFIX: &str = "POLICY_STRESS";

// ---------------------------------------------------------------------------
// Public config types
// ---------------------------------------------------------------------------

/// Top-level configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub cluster: ClusterConfig,
    pub watcher: WatcherConfig,
    pub stress: StressConfig,
}

/// `[cluster]`: how to reach the cluster and where the agent lives.
#[derive(Debug, Clone, Deserialize)]
pub struct ClusterConfig {
    pub kubectl: String,
    pub ssh: String,
    pub helm: String,
    pub agent_namespace: String,
    pub agent_selector: String,
    pub agent_container: String,
    /// Node whose agent pod receives the identity workload.
    pub node: String,
    /// Set when some node runs without the agent; disables k8s node sync.
    pub node_without_agent: bool,
    pub chart: String,
    pub release: String,
    pub manifest_dir: PathBuf,
    pub ready_timeout_secs: u64,
}

/// `[watcher]`: background probe and log validation.
#[derive(Debug, Clone, Deserialize)]
pub struct WatcherConfig {
    pub probe_command: String,
    pub probe_interval_secs: u64,
    pub startup_grace_ms: u64,
    pub settle_ms: u64,
    pub stop_timeout_secs: u64,
    /// Run in every agent pod after a failed case.
    pub failure_report_command: String,
    pub fail_on_error_level: bool,
    /// Additional regular expressions appended to the denylist.
    pub extra_patterns: Vec<String>,
}

/// `[stress]`: identity churn workload.
#[derive(Debug, Clone, Deserialize)]
pub struct StressConfig {
    pub identity_count: i64,
    pub identity_base: u64,
    pub wildcard_base: u64,
    pub kvstore_prefix: String,
    pub etcd_service: String,
    pub etcd_manifest: String,
    pub connectivity_manifest: String,
    pub dns_manifest: String,
    pub case_timeout_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self::defaults()
    }
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Config::defaults().cluster
    }
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Config::defaults().watcher
    }
}

impl Default for StressConfig {
    fn default() -> Self {
        Config::defaults().stress
    }
}

impl Config {
    /// Load the layered configuration. An explicit `path` must exist; the
    /// per-user file is optional.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let file = match path {
            Some(p) => config::File::from(p).required(true),
            None => config::File::from(user_config_path().as_path()).required(false),
        };

        config::Config::builder()
            .add_source(config::File::from_str(DEFAULT_CONFIG, config::FileFormat::Toml))
            .add_source(file)
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .list_separator(",")
                    .with_list_parse_key("watcher.extra_patterns")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()
            .map_err(Into::into)
    }

    /// Return the built-in defaults without touching the filesystem.
    pub fn defaults() -> Self {
        config::Config::builder()
            .add_source(config::File::from_str(DEFAULT_CONFIG, config::FileFormat::Toml))
            .build()
            .expect("built-in default config must be valid TOML")
            .try_deserialize()
            .expect("built-in default config must deserialize correctly")
    }
}

impl ClusterConfig {
    pub fn manifest(&self, file: &str) -> Manifest {
        Manifest::in_dir(&self.manifest_dir, file)
    }

    pub fn ready_timeout(&self) -> Duration {
        Duration::from_secs(self.ready_timeout_secs)
    }
}

impl WatcherConfig {
    pub fn probe_interval(&self) -> Duration {
        Duration::from_secs(self.probe_interval_secs)
    }

    pub fn startup_grace(&self) -> Duration {
        Duration::from_millis(self.startup_grace_ms)
    }

    pub fn settle(&self) -> Duration {
        Duration::from_millis(self.settle_ms)
    }

    pub fn stop_timeout(&self) -> Duration {
        Duration::from_secs(self.stop_timeout_secs)
    }

    /// Known-bad messages, then the error-level rule if enabled, then the
    /// configured extras.
    pub fn denylist(&self) -> Result<Denylist, DenylistError> {
        let mut list = Denylist::known_bad();
        if self.fail_on_error_level {
            list.push(Denylist::error_level_rule());
        }
        self.extra_patterns
            .iter()
            .try_fold(list, |list, pattern| list.with_pattern(pattern))
    }
}

impl StressConfig {
    pub fn case_timeout(&self) -> Duration {
        Duration::from_secs(self.case_timeout_secs)
    }
}

// ---------------------------------------------------------------------------
// Path helpers
// ---------------------------------------------------------------------------

fn user_config_path() -> PathBuf {
    std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            PathBuf::from(std::env::var("HOME").unwrap_or_else(|_| ".".to_string()))
                .join(".config")
        })
        .join("policy-stress")
        .join("config.toml")
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
