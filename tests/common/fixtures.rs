//! Agent log corpora used across harnesses.

/// A quiet agent: info and warning records only.
pub const CLEAN_AGENT_LOG: &[&str] = &[
    r#"level=info msg="Cilium 1.8.90 started" subsys=daemon"#,
    r#"level=info msg="Initializing identity allocator" subsys=identity-cache"#,
    r#"level=info msg="Connected to key-value store" subsys=kvstore endpoints="http://10.96.0.9:2379""#,
    r#"level=warning msg="Unable to update ipcache map entry on pod add" subsys=k8s-watcher"#,
    r#"level=info msg="Rewrote endpoint BPF program" containerID=7f1c subsys=endpoint"#,
    r#"level=info msg="Policy imported via API, recalculating..." policyRevision=12 subsys=daemon"#,
];

/// Known-bad messages the agent tolerates in specific contexts.
pub const TOLERATED_AGENT_LOG: &[&str] = &[
    r#"level=warning msg="JoinEP: Failed to load program" error="signal: killed" subsys=datapath-loader"#,
    r#"level=info msg="Removing map to allow for property upgrade (expect map data loss)" file-path=/sys/fs/bpf/tc/globals/cilium_policy_00412"#,
];

/// Records that must fail validation, one per known-bad family.
pub const DIRTY_AGENT_LOG: &[&str] = &[
    r#"level=info msg="Regenerating endpoint" subsys=endpoint"#,
    "panic: runtime error: invalid memory address or nil pointer dereference",
    r#"level=info msg="Waiting for endpoint" subsys=endpoint"#,
    r#"level=warning msg="JoinEP: Failed to compile" error="exit status 1" subsys=datapath-loader"#,
    r#"level=error msg="Could not restore all CIDR identities" subsys=daemon"#,
];
