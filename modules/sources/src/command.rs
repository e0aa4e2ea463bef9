//! Backend command invocation with a time limit.

use std::io::ErrorKind;
use std::process::Stdio;
use std::time::Duration;
use svcscan_core::ScanError;
use tokio::process::Command;
use tokio::time::timeout;
use tracing::debug;

/// Run `program args...` and return its stdout. A missing binary, a non-zero
/// exit status or exceeding `limit` are all reported as `ScanError::Command`.
pub async fn run_command(program: &str, args: &[&str], limit: Duration) -> Result<String, ScanError> {
    debug!("running {} {}", program, args.join(" "));
    let mut cmd = Command::new(program);
    cmd.args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    let fail = |reason: String| ScanError::Command { program: program.to_string(), reason };

    let output = match timeout(limit, cmd.output()).await {
        Err(_) => return Err(fail(format!("timed out after {} ms", limit.as_millis()))),
        Ok(Err(e)) if e.kind() == ErrorKind::NotFound => return Err(fail("not found".into())),
        Ok(Err(e)) => return Err(fail(e.to_string())),
        Ok(Ok(o)) => o,
    };
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        let first = stderr.lines().next().unwrap_or("").trim().to_string();
        return Err(fail(format!("{}: {}", output.status, first)));
    }
    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}
