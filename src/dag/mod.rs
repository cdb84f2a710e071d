// src/dag/mod.rs

//! Stage registry and ordering.
//!
//! - [`graph`] holds the static stage table (dependencies, declared IO,
//!   invocation templates).
//! - [`order`] computes a stable, dependency-respecting execution order for
//!   a requested subset of stages.

pub mod graph;
pub mod order;

pub use graph::{StageRegistry, StageTemplate};
pub use order::execution_order;
