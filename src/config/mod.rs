// src/config/mod.rs

//! Stage registry configuration.
//!
//! - [`model`] mirrors the TOML layout.
//! - [`loader`] reads a file (or falls back to [`defaults`]).
//! - [`validate`] turns a `RawConfigFile` into a checked `ConfigFile`.

pub mod defaults;
pub mod loader;
pub mod model;
pub mod validate;

pub use loader::{default_config_path, load_and_validate, load_from_path, load_or_builtin};
pub use model::{CapabilitySection, ConfigFile, ConfigSection, RawConfigFile, StageConfig};
pub use validate::SOURCE_ROLE;
