// src/config/model.rs

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::Deserialize;

/// Top-level configuration as read from a TOML file, before validation.
///
/// ```toml
/// [config]
/// root = "jobs"
/// owner = "studio"
/// timeout_secs = 3600
///
/// [capability]
/// device = "cuda:0"
///
/// [stage.demux]
/// program = "subforge-demux"
/// args = ["--input", "{input}", "--job-dir", "{job_dir}"]
/// inputs = ["source"]
/// outputs = ["audio"]
///
/// [stage.separate]
/// program = "subforge-separate"
/// args = ["--input", "{input:audio}", "--job-dir", "{job_dir}", "--device", "{device}"]
/// after = ["demux"]
/// inputs = ["audio"]
/// outputs = ["vocals"]
/// ```
///
/// All sections are optional and have reasonable defaults. Use
/// [`ConfigFile::try_from`] to obtain a validated configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct RawConfigFile {
    /// Global behaviour from `[config]`.
    #[serde(default)]
    pub config: ConfigSection,

    /// Device capability descriptor from `[capability]`.
    #[serde(default)]
    pub capability: CapabilitySection,

    /// All stages from `[stage.<name>]`.
    #[serde(default)]
    pub stage: BTreeMap<String, StageConfig>,
}

/// Validated configuration.
///
/// Build it through `TryFrom<RawConfigFile>`, which checks that the stage
/// table is acyclic and every reference resolves. The fields stay public for
/// reading; a struct literal skips those checks.
#[derive(Debug, Clone)]
pub struct ConfigFile {
    pub config: ConfigSection,
    pub capability: CapabilitySection,
    pub stage: BTreeMap<String, StageConfig>,
}

impl ConfigFile {
    pub(crate) fn new_unchecked(
        config: ConfigSection,
        capability: CapabilitySection,
        stage: BTreeMap<String, StageConfig>,
    ) -> Self {
        Self {
            config,
            capability,
            stage,
        }
    }
}

/// `[config]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct ConfigSection {
    /// Root directory under which job directories are allocated.
    #[serde(default = "default_root")]
    pub root: PathBuf,

    /// Owner segment of the job directory path.
    #[serde(default = "default_owner")]
    pub owner: String,

    /// Wall-clock budget for a single stage, in seconds.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Time between SIGTERM and SIGKILL when a run is interrupted.
    #[serde(default = "default_kill_grace_secs")]
    pub kill_grace_secs: u64,

    /// Keep running independent stages after a failure.
    #[serde(default)]
    pub keep_going: bool,
}

fn default_root() -> PathBuf {
    PathBuf::from("jobs")
}

fn default_owner() -> String {
    "default".to_string()
}

fn default_timeout_secs() -> u64 {
    6 * 60 * 60
}

fn default_kill_grace_secs() -> u64 {
    5
}

impl Default for ConfigSection {
    fn default() -> Self {
        Self {
            root: default_root(),
            owner: default_owner(),
            timeout_secs: default_timeout_secs(),
            kill_grace_secs: default_kill_grace_secs(),
            keep_going: false,
        }
    }
}

/// `[capability]` section.
///
/// `device` is opaque to the orchestrator; every other key is forwarded to
/// stages as `SUBFORGE_CAP_<KEY>`.
#[derive(Debug, Clone, Deserialize)]
pub struct CapabilitySection {
    #[serde(default = "default_device")]
    pub device: String,

    #[serde(flatten)]
    pub extra: BTreeMap<String, String>,
}

fn default_device() -> String {
    "cpu".to_string()
}

impl Default for CapabilitySection {
    fn default() -> Self {
        Self {
            device: default_device(),
            extra: BTreeMap::new(),
        }
    }
}

/// `[stage.<name>]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct StageConfig {
    /// Executable to launch.
    pub program: String,

    /// Argument template; see `exec::invocation` for placeholders.
    #[serde(default)]
    pub args: Vec<String>,

    /// Stages that must be COMPLETED before this one may run.
    #[serde(default)]
    pub after: Vec<String>,

    /// Input roles, resolved from ancestor outputs (or the job `source`).
    #[serde(default)]
    pub inputs: Vec<String>,

    /// Output roles; each gets its own subdirectory of the job directory.
    #[serde(default)]
    pub outputs: Vec<String>,

    #[serde(default)]
    pub description: Option<String>,

    /// Per-stage override of `[config].timeout_secs`.
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}
