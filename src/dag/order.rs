// src/dag/order.rs

//! Dependency-respecting execution order for a requested set of stages.

use std::collections::{BTreeSet, HashSet};

use crate::dag::graph::StageRegistry;
use crate::errors::Result;

/// Order `requested` so that every stage comes after all of its requested
/// ancestors (direct or through stages that were not requested).
///
/// Ties are broken by request order: among the stages that are ready, the
/// one requested first runs first. Duplicates are dropped; unknown names are
/// a configuration error.
pub fn execution_order(registry: &StageRegistry, requested: &[String]) -> Result<Vec<String>> {
    let mut unique: Vec<&str> = Vec::new();
    let mut seen: HashSet<&str> = HashSet::new();
    for name in requested {
        registry.require(name)?;
        if seen.insert(name.as_str()) {
            unique.push(name.as_str());
        }
    }

    // For each requested stage, the requested stages it must wait for.
    let mut blockers: Vec<BTreeSet<String>> = unique
        .iter()
        .map(|name| {
            registry
                .ancestors(name)
                .into_iter()
                .filter(|a| seen.contains(a.as_str()))
                .collect()
        })
        .collect();

    let mut order = Vec::with_capacity(unique.len());
    let mut placed = vec![false; unique.len()];

    while order.len() < unique.len() {
        let next = (0..unique.len()).find(|&i| !placed[i] && blockers[i].is_empty());

        // The registry is acyclic, so some stage is always ready.
        let Some(i) = next else { break };

        placed[i] = true;
        let name = unique[i];
        for b in blockers.iter_mut() {
            b.remove(name);
        }
        order.push(name.to_string());
    }

    Ok(order)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::defaults::builtin_pipeline;
    use crate::config::ConfigFile;

    fn names(v: &[&str]) -> Vec<String> {
        v.iter().map(|s| s.to_string()).collect()
    }

    fn builtin() -> StageRegistry {
        StageRegistry::from_config(&ConfigFile::try_from(builtin_pipeline()).unwrap())
    }

    #[test]
    fn reverses_out_of_order_request() {
        let reg = builtin();
        let order = execution_order(&reg, &names(&["mux", "align", "demux"])).unwrap();
        assert_eq!(order, names(&["demux", "align", "mux"]));
    }

    #[test]
    fn drops_duplicates() {
        let reg = builtin();
        let order = execution_order(&reg, &names(&["demux", "demux"])).unwrap();
        assert_eq!(order, names(&["demux"]));
    }

    #[test]
    fn unknown_name_fails() {
        let reg = builtin();
        assert!(execution_order(&reg, &names(&["demux", "bogus"])).is_err());
    }
}
