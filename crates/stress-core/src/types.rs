//! Plain data shared between the driver and the cluster adapters.

use serde::Serialize;
use std::path::{Path, PathBuf};

/// Where a remote command runs.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Target {
    /// A cluster node, reached over ssh.
    Node(String),
    /// A container inside a pod, reached through `kubectl exec`.
    Pod {
        namespace: String,
        pod: String,
        /// `None` lets kubectl pick the pod's default container.
        container: Option<String>,
    },
}

impl Target {
    pub fn node(name: impl Into<String>) -> Self {
        Target::Node(name.into())
    }

    pub fn pod(namespace: impl Into<String>, pod: impl Into<String>) -> Self {
        Target::Pod {
            namespace: namespace.into(),
            pod: pod.into(),
            container: None,
        }
    }

    /// Pin a pod target to a specific container. No-op for node targets.
    pub fn in_container(self, name: impl Into<String>) -> Self {
        match self {
            Target::Pod { namespace, pod, .. } => Target::Pod {
                namespace,
                pod,
                container: Some(name.into()),
            },
            node => node,
        }
    }
}

impl std::fmt::Display for Target {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Target::Node(name) => write!(f, "node/{name}"),
            Target::Pod {
                namespace,
                pod,
                container: Some(c),
            } => write!(f, "{namespace}/{pod}[{c}]"),
            Target::Pod {
                namespace,
                pod,
                container: None,
            } => write!(f, "{namespace}/{pod}"),
        }
    }
}

/// A resolved service address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
}

impl Endpoint {
    /// `http://host:port`, the form the agent expects for etcd endpoints.
    pub fn http_url(&self) -> String {
        format!("http://{}:{}", self.host, self.port)
    }
}

/// Captured result of a finished remote command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecOutput {
    /// Exit code; `None` when the process was killed by a signal.
    pub status: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl ExecOutput {
    pub fn success(&self) -> bool {
        self.status == Some(0)
    }

    /// Turn a non-zero exit into [`crate::ExecError::Failed`].
    pub fn ensure_success(
        self,
        target: impl std::fmt::Display,
        command: &str,
    ) -> Result<Self, crate::ExecError> {
        if self.success() {
            return Ok(self);
        }
        Err(crate::ExecError::Failed {
            target: target.to_string(),
            command: command.to_string(),
            status: self
                .status
                .map_or_else(|| "signal".to_string(), |code| code.to_string()),
            stderr: self.stderr.trim().to_string(),
        })
    }
}

/// A manifest file to apply to the cluster.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Manifest {
    /// Short name (the file stem), used for logging and namespace prefixes.
    pub name: String,
    pub path: PathBuf,
}

impl Manifest {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let name = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "manifest".to_string());
        Self { name, path }
    }

    /// Resolve `file` against `dir` unless it is already absolute.
    pub fn in_dir(dir: &Path, file: &str) -> Self {
        let file = Path::new(file);
        if file.is_absolute() {
            Self::new(file)
        } else {
            Self::new(dir.join(file))
        }
    }
}

/// How a case failed, ordered by the phase that produces it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FailureKind {
    /// A precondition could not be established; the body did not run to
    /// completion.
    Setup,
    /// The body or the log validation found the system misbehaving.
    Assertion,
    /// Teardown could not release what setup acquired.
    Cleanup,
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FailureKind::Setup => write!(f, "setup"),
            FailureKind::Assertion => write!(f, "assertion"),
            FailureKind::Cleanup => write!(f, "cleanup"),
        }
    }
}
