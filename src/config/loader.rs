// src/config/loader.rs

use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::config::defaults::builtin_pipeline;
use crate::config::model::{ConfigFile, RawConfigFile};
use crate::errors::{Result, SubforgeError};

/// Load a configuration file from a given path and return the raw `RawConfigFile`.
///
/// This only performs TOML deserialization; it does **not** perform semantic
/// validation. Use [`load_and_validate`] for that.
pub fn load_from_path(path: impl AsRef<Path>) -> Result<RawConfigFile> {
    let path = path.as_ref();
    let contents = fs::read_to_string(path)?;

    let config: RawConfigFile = toml::from_str(&contents)?;

    Ok(config)
}

/// Load a configuration file from path and validate it.
///
/// - Reads TOML.
/// - Applies defaults (handled by `serde` + `Default` impls).
/// - Checks for unknown `after` references, cycles, unresolvable input roles
///   and malformed argument templates.
pub fn load_and_validate(path: impl AsRef<Path>) -> Result<ConfigFile> {
    let raw_config = load_from_path(&path)?;
    let config = ConfigFile::try_from(raw_config)?;
    Ok(config)
}

/// Resolve the configuration the CLI should use.
///
/// An explicitly requested file must exist. When the default path is used and
/// no such file is present, the built-in subtitling pipeline is returned.
pub fn load_or_builtin(path: impl AsRef<Path>, explicit: bool) -> Result<ConfigFile> {
    let path = path.as_ref();

    if path.exists() {
        info!(path = %path.display(), "loading stage registry from config file");
        return load_and_validate(path);
    }

    if explicit {
        return Err(SubforgeError::ConfigError(format!(
            "config file {} does not exist",
            path.display()
        )));
    }

    debug!(path = %path.display(), "no config file found; using built-in pipeline");
    ConfigFile::try_from(builtin_pipeline())
}

/// Default config path: `Subforge.toml` in the current working directory.
pub fn default_config_path() -> PathBuf {
    PathBuf::from("Subforge.toml")
}
