// src/dag/graph.rs

use std::collections::{BTreeSet, HashMap};
use std::time::Duration;

use crate::config::model::ConfigFile;
use crate::dag::order::execution_order;
use crate::errors::{Result, SubforgeError};

/// Executable plus argument template for one stage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageTemplate {
    pub program: String,
    pub args: Vec<String>,
}

/// Internal node structure: immediate deps and dependents plus declared IO.
#[derive(Debug, Clone)]
struct StageNode {
    /// Direct dependencies: stages that must be COMPLETED before this one.
    deps: Vec<String>,
    /// Direct dependents: stages that list this one in their `after`.
    dependents: Vec<String>,
    inputs: Vec<String>,
    outputs: Vec<String>,
    template: StageTemplate,
    description: Option<String>,
    timeout: Option<Duration>,
}

/// Static table of every stage the orchestrator knows how to run.
///
/// Built from a validated [`ConfigFile`], so acyclicity and reference
/// checks have already happened; this type only answers questions.
#[derive(Debug, Clone)]
pub struct StageRegistry {
    nodes: HashMap<String, StageNode>,
    /// All stages in dependency order, ties broken by name.
    order: Vec<String>,
}

impl StageRegistry {
    pub fn from_config(cfg: &ConfigFile) -> Self {
        let mut nodes: HashMap<String, StageNode> = HashMap::new();

        // First pass: create nodes with their dependency lists.
        for (name, stage) in cfg.stage.iter() {
            nodes.insert(
                name.clone(),
                StageNode {
                    deps: stage.after.clone(),
                    dependents: Vec::new(),
                    inputs: stage.inputs.clone(),
                    outputs: stage.outputs.clone(),
                    template: StageTemplate {
                        program: stage.program.clone(),
                        args: stage.args.clone(),
                    },
                    description: stage.description.clone(),
                    timeout: stage.timeout_secs.map(Duration::from_secs),
                },
            );
        }

        // Second pass: populate dependents based on deps. `cfg.stage` is a
        // BTreeMap, so dependents come out sorted.
        for (name, stage) in cfg.stage.iter() {
            for dep in stage.after.iter() {
                if let Some(dep_node) = nodes.get_mut(dep) {
                    dep_node.dependents.push(name.clone());
                }
            }
        }

        let mut registry = Self {
            nodes,
            order: Vec::new(),
        };

        let names: Vec<String> = cfg.stage.keys().cloned().collect();
        registry.order = execution_order(&registry, &names).unwrap_or(names);
        registry
    }

    /// All stage names in dependency order.
    pub fn stages(&self) -> impl Iterator<Item = &str> {
        self.order.iter().map(|s| s.as_str())
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.nodes.contains_key(name)
    }

    /// Fail with a configuration error when `name` is not a registered stage.
    pub fn require(&self, name: &str) -> Result<()> {
        if self.contains(name) {
            Ok(())
        } else {
            Err(SubforgeError::ConfigError(format!(
                "unknown stage '{}' (known: {})",
                name,
                self.order.join(", ")
            )))
        }
    }

    /// Immediate predecessors (the stage's `after` list).
    pub fn predecessors(&self, name: &str) -> &[String] {
        self.nodes
            .get(name)
            .map(|n| n.deps.as_slice())
            .unwrap_or(&[])
    }

    /// `(input roles, output roles)` declared for a stage.
    pub fn declared_io(&self, name: &str) -> Option<(&[String], &[String])> {
        self.nodes
            .get(name)
            .map(|n| (n.inputs.as_slice(), n.outputs.as_slice()))
    }

    pub fn template(&self, name: &str) -> Option<&StageTemplate> {
        self.nodes.get(name).map(|n| &n.template)
    }

    pub fn description(&self, name: &str) -> Option<&str> {
        self.nodes.get(name).and_then(|n| n.description.as_deref())
    }

    /// Per-stage timeout override, if configured.
    pub fn timeout(&self, name: &str) -> Option<Duration> {
        self.nodes.get(name).and_then(|n| n.timeout)
    }

    /// The stage that declares `role` as an output.
    pub fn producer_of(&self, role: &str) -> Option<&str> {
        self.order.iter().map(|s| s.as_str()).find(|name| {
            self.nodes
                .get(*name)
                .is_some_and(|n| n.outputs.iter().any(|r| r == role))
        })
    }

    /// Every stage reachable by following `after` edges from `name`.
    pub fn ancestors(&self, name: &str) -> BTreeSet<String> {
        self.walk(name, |node| &node.deps)
    }

    /// Every stage that (transitively) depends on `name`.
    pub fn descendants(&self, name: &str) -> BTreeSet<String> {
        self.walk(name, |node| &node.dependents)
    }

    fn walk<'a>(&'a self, start: &str, next: impl Fn(&'a StageNode) -> &'a Vec<String>) -> BTreeSet<String> {
        let mut seen = BTreeSet::new();
        let mut stack: Vec<&str> = match self.nodes.get(start) {
            Some(node) => next(node).iter().map(|s| s.as_str()).collect(),
            None => return seen,
        };

        while let Some(name) = stack.pop() {
            if !seen.insert(name.to_string()) {
                continue;
            }
            if let Some(node) = self.nodes.get(name) {
                stack.extend(next(node).iter().map(|s| s.as_str()));
            }
        }

        seen
    }
}
