// src/exec/process.rs

//! Individual stage process runner.

use std::collections::VecDeque;
use std::process::Stdio;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};
use tracing::{debug, error, info, warn};

use crate::exec::backend::ExecOutcome;
use crate::exec::invocation::StageInvocation;
use crate::exec::report::{StageReport, parse_report_line};

/// Number of trailing stderr lines kept as diagnostics.
const DIAGNOSTIC_LINES: usize = 20;

/// How long to wait for pipe readers once the process is gone.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

/// Run a single stage process to completion.
///
/// Errors that happen after a successful spawn (e.g. `wait` failing) are
/// reported as a spawn failure; the process is killed on drop.
pub async fn run_stage_process(
    invocation: StageInvocation,
    reports: mpsc::Sender<StageReport>,
    cancel: oneshot::Receiver<()>,
) -> ExecOutcome {
    let stage = invocation.stage.clone();
    let job_id = invocation.job_id.clone();
    match run_stage_inner(invocation, reports, cancel).await {
        Ok(outcome) => outcome,
        Err(err) => {
            error!(
                stage = %stage,
                job_id = %job_id,
                error = %err,
                "stage execution error"
            );
            ExecOutcome::SpawnFailed(format!("{err:#}"))
        }
    }
}

async fn run_stage_inner(
    inv: StageInvocation,
    reports: mpsc::Sender<StageReport>,
    mut cancel: oneshot::Receiver<()>,
) -> Result<ExecOutcome> {
    info!(
        stage = %inv.stage,
        job_id = %inv.job_id,
        cmd = %inv.command_line(),
        "starting stage process"
    );

    let mut cmd = Command::new(&inv.program);
    cmd.args(&inv.args)
        .current_dir(&inv.job_dir)
        .envs(inv.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    // Own process group, so the whole tree can be signalled at once.
    #[cfg(unix)]
    cmd.process_group(0);

    let mut child = match cmd.spawn() {
        Ok(child) => child,
        Err(e) => {
            warn!(stage = %inv.stage, program = %inv.program, error = %e, "failed to spawn stage");
            return Ok(ExecOutcome::SpawnFailed(format!(
                "spawning '{}': {e}",
                inv.program
            )));
        }
    };
    let pid = child.id();

    let stdout_task = child
        .stdout
        .take()
        .map(|stdout| spawn_stdout_reader(&inv.stage, stdout, reports));
    let stderr_task = child
        .stderr
        .take()
        .map(|stderr| spawn_stderr_reader(&inv.stage, stderr));

    let deadline = sleep(inv.timeout);
    tokio::pin!(deadline);

    // The process exits on its own, runs out of time, or is cancelled.
    // A dropped cancel sender disables that branch instead of cancelling.
    let outcome = tokio::select! {
        status = child.wait() => {
            let status = status.with_context(|| {
                format!("waiting for process of stage '{}'", inv.stage)
            })?;

            info!(
                stage = %inv.stage,
                job_id = %inv.job_id,
                exit_code = ?status.code(),
                success = status.success(),
                "stage process exited"
            );

            ExecOutcome::Exited {
                code: status.code(),
                diagnostics: String::new(),
            }
        }

        _ = &mut deadline => {
            warn!(
                stage = %inv.stage,
                job_id = %inv.job_id,
                timeout_secs = inv.timeout.as_secs_f64(),
                "stage exceeded its time budget; killing process tree"
            );
            kill_tree(&mut child, pid).await;
            ExecOutcome::TimedOut {
                after: inv.timeout,
                diagnostics: String::new(),
            }
        }

        Ok(()) = &mut cancel => {
            info!(
                stage = %inv.stage,
                job_id = %inv.job_id,
                "cancellation requested; terminating process tree"
            );
            terminate_tree(&mut child, pid, inv.kill_grace).await;
            ExecOutcome::Cancelled
        }
    };

    if let Some(task) = stdout_task {
        if timeout(DRAIN_TIMEOUT, task).await.is_err() {
            debug!(stage = %inv.stage, "stdout reader did not finish; abandoning");
        }
    }
    let diagnostics = match stderr_task {
        Some(task) => match timeout(DRAIN_TIMEOUT, task).await {
            Ok(Ok(tail)) => tail,
            _ => String::new(),
        },
        None => String::new(),
    };

    Ok(match outcome {
        ExecOutcome::Exited { code, .. } => ExecOutcome::Exited { code, diagnostics },
        ExecOutcome::TimedOut { after, .. } => ExecOutcome::TimedOut { after, diagnostics },
        other => other,
    })
}

/// Forward report lines to the orchestrator; log everything else.
fn spawn_stdout_reader(
    stage: &str,
    stdout: tokio::process::ChildStdout,
    reports: mpsc::Sender<StageReport>,
) -> JoinHandle<()> {
    let stage = stage.to_string();
    tokio::spawn(async move {
        let mut lines = BufReader::new(stdout).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            match parse_report_line(&line) {
                Some(Ok(report)) => {
                    debug!(stage = %stage, ?report, "stage report");
                    if reports.send(report).await.is_err() {
                        debug!(stage = %stage, "report receiver dropped");
                    }
                }
                Some(Err(e)) => warn!(stage = %stage, error = %e, line = %line, "malformed stage report ignored"),
                None => debug!(stage = %stage, "stdout: {}", line),
            }
        }
    })
}

/// Keep the last [`DIAGNOSTIC_LINES`] stderr lines; log all of them.
fn spawn_stderr_reader(stage: &str, stderr: tokio::process::ChildStderr) -> JoinHandle<String> {
    let stage = stage.to_string();
    tokio::spawn(async move {
        let mut tail: VecDeque<String> = VecDeque::with_capacity(DIAGNOSTIC_LINES);
        let mut lines = BufReader::new(stderr).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            debug!(stage = %stage, "stderr: {}", line);
            if tail.len() == DIAGNOSTIC_LINES {
                tail.pop_front();
            }
            tail.push_back(line);
        }
        Vec::from(tail).join("\n")
    })
}

/// Send `signal` to the process group led by `pid`.
#[cfg(unix)]
async fn signal_group(pid: Option<u32>, signal: &str) {
    let Some(pid) = pid else { return };
    let result = Command::new("kill")
        .arg(format!("-{signal}"))
        .arg("--")
        .arg(format!("-{pid}"))
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .await;
    match result {
        Ok(status) if status.success() => {
            debug!(pgid = pid, signal, "signalled process group");
        }
        Ok(_) => debug!(pgid = pid, signal, "process group already gone"),
        Err(e) => warn!(pgid = pid, signal, error = %e, "failed to run kill"),
    }
}

#[cfg(not(unix))]
async fn signal_group(_pid: Option<u32>, _signal: &str) {}

/// SIGKILL the whole tree and reap the leader.
async fn kill_tree(child: &mut Child, pid: Option<u32>) {
    signal_group(pid, "KILL").await;
    if let Err(e) = child.kill().await {
        debug!(error = %e, "kill after group signal failed");
    }
}

/// SIGTERM the tree, give it `grace` to exit, then SIGKILL what is left.
async fn terminate_tree(child: &mut Child, pid: Option<u32>, grace: Duration) {
    signal_group(pid, "TERM").await;
    match timeout(grace, child.wait()).await {
        Ok(_) => signal_group(pid, "KILL").await,
        Err(_) => {
            warn!(pgid = ?pid, "process tree ignored SIGTERM; sending SIGKILL");
            kill_tree(child, pid).await;
        }
    }
}
