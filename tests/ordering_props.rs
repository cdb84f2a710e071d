// tests/ordering_props.rs

use std::collections::{HashMap, HashSet};

use proptest::prelude::*;
use subforge::config::ConfigFile;
use subforge::dag::{StageRegistry, execution_order};
use subforge_test_utils::builders::{ConfigFileBuilder, StageConfigBuilder};

// Strategy to generate a valid stage registry.
// Acyclicity: stage N may only run after stages 0..N-1.
fn registry_strategy(max_stages: usize) -> impl Strategy<Value = ConfigFile> {
    (1..=max_stages).prop_flat_map(|num_stages| {
        proptest::collection::vec(
            proptest::collection::vec(any::<usize>(), 0..num_stages),
            num_stages,
        )
        .prop_map(move |raw_deps| {
            let mut builder = ConfigFileBuilder::new();
            for (i, potential) in raw_deps.into_iter().enumerate() {
                let name = format!("stage_{i}");
                let mut stage = StageConfigBuilder::new(&name);
                let deps: HashSet<usize> = potential
                    .into_iter()
                    .filter(|_| i > 0)
                    .map(|d| d % i)
                    .collect();
                for dep in deps {
                    stage = stage.after(&format!("stage_{dep}"));
                }
                builder = builder.with_stage(&name, stage.build());
            }
            builder.build()
        })
    })
}

proptest! {
    #[test]
    fn order_respects_ancestry_and_request_ties(
        cfg in registry_strategy(10),
        picks in proptest::collection::vec(0..10usize, 1..12),
    ) {
        let registry = StageRegistry::from_config(&cfg);
        let names: Vec<String> = registry.stages().map(str::to_string).collect();
        let requested: Vec<String> = picks
            .iter()
            .map(|&i| names[i % names.len()].clone())
            .collect();

        let order = execution_order(&registry, &requested).unwrap();

        // Each requested stage exactly once.
        let unique: HashSet<&String> = requested.iter().collect();
        prop_assert_eq!(order.len(), unique.len());

        // Ancestors come first.
        let position: HashMap<&str, usize> =
            order.iter().enumerate().map(|(i, s)| (s.as_str(), i)).collect();
        for stage in &order {
            for ancestor in registry.ancestors(stage) {
                if let Some(&p) = position.get(ancestor.as_str()) {
                    prop_assert!(p < position[stage.as_str()]);
                }
            }
        }

        // Deterministic: same request, same order.
        prop_assert_eq!(execution_order(&registry, &requested).unwrap(), order);
    }

    #[test]
    fn independent_stages_keep_request_order(picks in proptest::collection::vec(0..6usize, 1..8)) {
        let mut builder = ConfigFileBuilder::new();
        for i in 0..6 {
            let name = format!("solo_{i}");
            builder = builder.with_stage(&name, StageConfigBuilder::new(&name).build());
        }
        let registry = StageRegistry::from_config(&builder.build());

        let requested: Vec<String> = picks.iter().map(|i| format!("solo_{i}")).collect();
        let mut expected: Vec<String> = Vec::new();
        for name in &requested {
            if !expected.contains(name) {
                expected.push(name.clone());
            }
        }
        prop_assert_eq!(execution_order(&registry, &requested).unwrap(), expected);
    }
}
