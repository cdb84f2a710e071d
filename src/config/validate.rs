// src/config/validate.rs

use std::collections::HashMap;
use std::sync::LazyLock;

use petgraph::algo::{has_path_connecting, toposort};
use petgraph::graphmap::DiGraphMap;
use regex::Regex;

use crate::config::model::{ConfigFile, RawConfigFile, StageConfig};
use crate::errors::{Result, SubforgeError};
use crate::exec::invocation::{Placeholder, placeholders};

/// Input role that refers to the job's source media rather than a stage output.
pub const SOURCE_ROLE: &str = "source";

impl TryFrom<RawConfigFile> for ConfigFile {
    type Error = crate::errors::SubforgeError;

    fn try_from(raw: RawConfigFile) -> std::result::Result<Self, Self::Error> {
        validate_raw_config(&raw)?;
        Ok(ConfigFile::new_unchecked(raw.config, raw.capability, raw.stage))
    }
}

fn validate_raw_config(cfg: &RawConfigFile) -> Result<()> {
    ensure_has_stages(cfg)?;
    validate_global_config(cfg)?;
    validate_stage_dependencies(cfg)?;
    validate_dag(cfg)?;
    validate_roles(cfg)?;
    validate_templates(cfg)?;
    Ok(())
}

fn ensure_has_stages(cfg: &RawConfigFile) -> Result<()> {
    if cfg.stage.is_empty() {
        return Err(SubforgeError::ConfigError(
            "config must contain at least one [stage.<name>] section".to_string(),
        ));
    }
    Ok(())
}

fn validate_global_config(cfg: &RawConfigFile) -> Result<()> {
    if cfg.config.timeout_secs == 0 {
        return Err(SubforgeError::ConfigError(
            "[config].timeout_secs must be >= 1 (got 0)".to_string(),
        ));
    }

    if cfg.config.root.as_os_str().is_empty() {
        return Err(SubforgeError::ConfigError(
            "[config].root must not be empty".to_string(),
        ));
    }

    if !is_valid_segment(&cfg.config.owner) {
        return Err(SubforgeError::ConfigError(format!(
            "[config].owner '{}' is not a valid directory name",
            cfg.config.owner
        )));
    }

    if cfg.capability.device.trim().is_empty() {
        return Err(SubforgeError::ConfigError(
            "[capability].device must not be empty".to_string(),
        ));
    }

    Ok(())
}

fn validate_stage_dependencies(cfg: &RawConfigFile) -> Result<()> {
    for (name, stage) in cfg.stage.iter() {
        if !is_valid_segment(name) {
            return Err(SubforgeError::ConfigError(format!(
                "stage name '{}' is not a valid directory name",
                name
            )));
        }
        if stage.program.trim().is_empty() {
            return Err(SubforgeError::ConfigError(format!(
                "stage '{}' has an empty `program`",
                name
            )));
        }
        if stage.timeout_secs == Some(0) {
            return Err(SubforgeError::ConfigError(format!(
                "stage '{}' has timeout_secs = 0",
                name
            )));
        }
        for dep in stage.after.iter() {
            if !cfg.stage.contains_key(dep) {
                return Err(SubforgeError::ConfigError(format!(
                    "stage '{}' has unknown dependency '{}' in `after`",
                    name, dep
                )));
            }
            if dep == name {
                return Err(SubforgeError::ConfigError(format!(
                    "stage '{}' cannot depend on itself in `after`",
                    name
                )));
            }
        }
    }
    Ok(())
}

/// Edge direction: dep -> stage.
fn dependency_graph(cfg: &RawConfigFile) -> DiGraphMap<&str, ()> {
    let mut graph: DiGraphMap<&str, ()> = DiGraphMap::new();

    for name in cfg.stage.keys() {
        graph.add_node(name.as_str());
    }

    for (name, stage) in cfg.stage.iter() {
        for dep in stage.after.iter() {
            graph.add_edge(dep.as_str(), name.as_str(), ());
        }
    }

    graph
}

fn validate_dag(cfg: &RawConfigFile) -> Result<()> {
    let graph = dependency_graph(cfg);

    // A topological sort will fail if there is a cycle.
    match toposort(&graph, None) {
        Ok(_order) => Ok(()),
        Err(cycle) => {
            let node = cycle.node_id();
            Err(SubforgeError::DagCycle(format!(
                "cycle detected in stage registry involving stage '{}'",
                node
            )))
        }
    }
}

/// Every output role has exactly one producer and every input role is either
/// the job source or produced by an ancestor of the consuming stage.
fn validate_roles(cfg: &RawConfigFile) -> Result<()> {
    let mut producers: HashMap<&str, &str> = HashMap::new();

    for (name, stage) in cfg.stage.iter() {
        for role in stage.outputs.iter() {
            if role == SOURCE_ROLE {
                return Err(SubforgeError::ConfigError(format!(
                    "stage '{}' declares reserved output role '{}'",
                    name, SOURCE_ROLE
                )));
            }
            if !is_valid_segment(role) {
                return Err(SubforgeError::ConfigError(format!(
                    "stage '{}' output role '{}' is not a valid directory name",
                    name, role
                )));
            }
            if let Some(other) = producers.insert(role.as_str(), name.as_str()) {
                return Err(SubforgeError::ConfigError(format!(
                    "output role '{}' is declared by both '{}' and '{}'",
                    role, other, name
                )));
            }
        }
    }

    let graph = dependency_graph(cfg);

    for (name, stage) in cfg.stage.iter() {
        for role in stage.inputs.iter() {
            if role == SOURCE_ROLE {
                continue;
            }
            let producer = producers.get(role.as_str()).ok_or_else(|| {
                SubforgeError::ConfigError(format!(
                    "stage '{}' consumes role '{}' which no stage produces",
                    name, role
                ))
            })?;
            if !has_path_connecting(&graph, *producer, name.as_str(), None)
                || *producer == name.as_str()
            {
                return Err(SubforgeError::ConfigError(format!(
                    "stage '{}' consumes role '{}' but its producer '{}' is not a predecessor",
                    name, role, producer
                )));
            }
        }
    }

    Ok(())
}

fn validate_templates(cfg: &RawConfigFile) -> Result<()> {
    for (name, stage) in cfg.stage.iter() {
        for arg in std::iter::once(&stage.program).chain(stage.args.iter()) {
            for placeholder in placeholders(arg) {
                check_placeholder(name, stage, arg, placeholder?)?;
            }
        }
    }
    Ok(())
}

fn check_placeholder(name: &str, stage: &StageConfig, arg: &str, ph: Placeholder) -> Result<()> {
    let problem = match &ph {
        Placeholder::Input(None) if stage.inputs.is_empty() => {
            Some("`{input}` used but the stage declares no inputs".to_string())
        }
        Placeholder::Input(Some(role)) if !stage.inputs.contains(role) => {
            Some(format!("`{{input:{role}}}` refers to an undeclared input role"))
        }
        Placeholder::OutputDir(role) if !stage.outputs.contains(role) => {
            Some(format!(
                "`{{output_dir:{role}}}` refers to an undeclared output role"
            ))
        }
        _ => None,
    };

    match problem {
        Some(msg) => Err(SubforgeError::ConfigError(format!(
            "stage '{}' argument '{}': {}",
            name, arg, msg
        ))),
        None => Ok(()),
    }
}

static SEGMENT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9][A-Za-z0-9_.-]*$").unwrap());

/// Names used as single path segments (stages, roles, owners).
pub fn is_valid_segment(s: &str) -> bool {
    SEGMENT_RE.is_match(s)
}
