//! Local process plumbing shared by the kubectl and helm adapters.

use std::process::Stdio;
use stress_core::{ExecError, ExecOutput};
use tokio::process::Command;
use tracing::debug;

pub(crate) fn into_exec_output(out: std::process::Output) -> ExecOutput {
    ExecOutput {
        status: out.status.code(),
        stdout: String::from_utf8_lossy(&out.stdout).into_owned(),
        stderr: String::from_utf8_lossy(&out.stderr).into_owned(),
    }
}

/// Run `cmd` to completion and capture its output.
pub(crate) async fn output(mut cmd: Command, program: &str) -> Result<ExecOutput, ExecError> {
    let out = cmd
        .stdin(Stdio::null())
        .kill_on_drop(true)
        .output()
        .await
        .map_err(|source| ExecError::Spawn {
            program: program.to_string(),
            source,
        })?;
    Ok(into_exec_output(out))
}

/// Run `program args…` and capture its output, whatever the exit status.
pub(crate) async fn run(program: &str, args: &[String]) -> Result<ExecOutput, ExecError> {
    debug!(program, args = ?args, "running");
    let mut cmd = Command::new(program);
    cmd.args(args);
    output(cmd, program).await
}

/// Like [`run`], but a non-zero exit is an error.
pub(crate) async fn run_checked(program: &str, args: &[String]) -> Result<ExecOutput, ExecError> {
    run(program, args)
        .await?
        .ensure_success(program, &args.join(" "))
}
