// src/exec/backend.rs

//! Pluggable executor backend abstraction.
//!
//! The orchestrator talks to a `StageExecutor` instead of spawning processes
//! itself. Production code uses [`ProcessExecutor`]; tests can provide an
//! implementation that writes artifacts directly and records which stages
//! were launched.

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};

use crate::exec::invocation::StageInvocation;
use crate::exec::process::run_stage_process;
use crate::exec::report::StageReport;

/// How a launched stage ended, from the executor's point of view.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecOutcome {
    /// The process exited on its own. `code` is `None` when it was killed by
    /// a signal it did not receive from us.
    Exited {
        code: Option<i32>,
        diagnostics: String,
    },
    /// The wall-clock budget expired and the process tree was killed.
    TimedOut {
        after: Duration,
        diagnostics: String,
    },
    /// Cancellation was requested and the process tree was terminated.
    Cancelled,
    /// The process could not be started at all.
    SpawnFailed(String),
}

/// Trait abstracting how a stage invocation is executed.
pub trait StageExecutor: Send {
    /// Run one stage to completion.
    ///
    /// - Report lines from the stage are forwarded on `reports` as they
    ///   arrive, and all of them are sent before the future resolves.
    /// - When `cancel` fires, the implementation stops the stage and
    ///   resolves to [`ExecOutcome::Cancelled`].
    fn execute(
        &mut self,
        invocation: StageInvocation,
        reports: mpsc::Sender<StageReport>,
        cancel: oneshot::Receiver<()>,
    ) -> Pin<Box<dyn Future<Output = ExecOutcome> + Send + '_>>;
}

/// Real executor: one OS process (and process group) per stage.
#[derive(Debug, Clone, Default)]
pub struct ProcessExecutor;

impl ProcessExecutor {
    pub fn new() -> Self {
        Self
    }
}

impl StageExecutor for ProcessExecutor {
    fn execute(
        &mut self,
        invocation: StageInvocation,
        reports: mpsc::Sender<StageReport>,
        cancel: oneshot::Receiver<()>,
    ) -> Pin<Box<dyn Future<Output = ExecOutcome> + Send + '_>> {
        Box::pin(run_stage_process(invocation, reports, cancel))
    }
}
