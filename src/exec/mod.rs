// src/exec/mod.rs

//! Process execution layer.
//!
//! This module is responsible for turning a stage's argument template into a
//! concrete command and running it with `tokio::process::Command`.
//!
//! - [`invocation`] renders templates (placeholders, environment).
//! - [`report`] parses the optional JSON report lines a stage prints.
//! - [`process`] runs one stage process with timeout and cancellation.
//! - [`backend`] provides the `StageExecutor` trait and the concrete
//!   `ProcessExecutor` the orchestrator uses in production, and which tests
//!   can replace with a fake implementation.

pub mod backend;
pub mod invocation;
pub mod process;
pub mod report;

pub use backend::{ExecOutcome, ProcessExecutor, StageExecutor};
pub use invocation::{InvocationContext, StageInvocation, render};
pub use report::{StageReport, parse_report_line};
