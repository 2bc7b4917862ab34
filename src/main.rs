use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use policy_stress::{identity_churn_suite, Harness};
use std::io::Read;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use stress_core::config::Config;
use stress_core::{loop_command, LogSource};
use stress_remote::Kubectl;
use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;

const DEBUG_LOG: &str = "/tmp/policy-stress-debug.log";

#[derive(Parser)]
#[command(name = "policy-stress", about = "Identity churn stress with agent log validation")]
struct Cli {
    /// Config file layered over the built-in defaults.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Debug logging, also written to /tmp/policy-stress-debug.log.
    #[arg(long, global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Cmd,
}

#[derive(Subcommand)]
enum Cmd {
    /// Run the identity churn suite against the configured cluster.
    Run {
        /// Loop iterations (two identities each).
        #[arg(long, allow_negative_numbers = true)]
        count: Option<i64>,
        /// Node hosting the probe and the agent pod that inserts identities.
        #[arg(long)]
        node: Option<String>,
        /// Print the report as JSON.
        #[arg(long)]
        json: bool,
    },
    /// Print the one-line loop command for a template (read from stdin if omitted).
    RenderLoop {
        #[arg(long, default_value = "default")]
        namespace: String,
        #[arg(long, allow_negative_numbers = true)]
        count: i64,
        template: Option<String>,
    },
    /// Scan recent agent logs against the denylist.
    CheckLogs {
        /// Window to fetch, in seconds.
        #[arg(long, default_value_t = 300)]
        since: u64,
    },
}

fn init_tracing(debug: bool) -> anyhow::Result<()> {
    let level = if debug { "debug" } else { "info" };
    let filter = EnvFilter::try_from_env("RUST_LOG").unwrap_or_else(|_| EnvFilter::new(level));
    let file = if debug {
        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(DEBUG_LOG)
            .with_context(|| format!("opening {DEBUG_LOG}"))?;
        Some(
            tracing_subscriber::fmt::layer()
                .with_writer(std::sync::Mutex::new(file))
                .with_ansi(false),
        )
    } else {
        None
    };
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(file)
        .init();
    if debug {
        tracing::info!("debug log started, tail -f {DEBUG_LOG}");
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.debug)?;

    match cli.command {
        Cmd::RenderLoop {
            namespace,
            count,
            template,
        } => {
            let template = match template {
                Some(t) => t,
                None => {
                    let mut buf = String::new();
                    std::io::stdin()
                        .read_to_string(&mut buf)
                        .context("reading template from stdin")?;
                    buf
                }
            };
            println!("{}", loop_command(&template, &namespace, count));
        }

        Cmd::CheckLogs { since } => {
            let config = Config::load(cli.config.as_deref())?;
            let denylist = config.watcher.denylist()?;
            let kubectl = Kubectl::new(&config.cluster, &config.watcher);
            let lines = kubectl.fetch_logs(Duration::from_secs(since)).await?;
            let violations = denylist.scan(lines.iter().map(String::as_str));
            for violation in &violations {
                println!("{violation}");
            }
            if !violations.is_empty() {
                bail!(
                    "{} denylisted line(s) in {} lines of agent logs",
                    violations.len(),
                    lines.len()
                );
            }
            println!("{} lines clean", lines.len());
        }

        Cmd::Run { count, node, json } => {
            let mut config = Config::load(cli.config.as_deref())?;
            if let Some(node) = node {
                config.cluster.node = node;
            }
            let harness = Arc::new(Harness::connect(config)?);
            let report = identity_churn_suite(harness, count).run().await;
            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                println!("{report}");
            }
            if !report.passed() {
                bail!("{} failed", report.suite);
            }
        }
    }
    Ok(())
}
