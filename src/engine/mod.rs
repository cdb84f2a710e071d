// src/engine/mod.rs

//! Orchestration engine for subforge.
//!
//! This module ties together:
//! - the stage registry (what may run, and after what)
//! - the manifest store (what has already run)
//! - the executor backend (how a stage process is launched)
//! - shutdown signals
//!
//! Every stage execution is wrapped in a [`StageSession`], which owns the
//! stage's manifest record from RUNNING until a terminal status is committed.

pub mod orchestrator;
pub mod report;
pub mod session;
pub mod shutdown;

pub use orchestrator::{Orchestrator, RunOptions};
pub use report::{RunReport, StageResult, StageSummary};
pub use session::StageSession;
pub use shutdown::{Shutdown, ShutdownHandle, spawn_signal_listener};
