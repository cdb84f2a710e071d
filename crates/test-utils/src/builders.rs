#![allow(dead_code)]

use std::collections::BTreeMap;
use std::path::Path;

use subforge::config::{CapabilitySection, ConfigFile, ConfigSection, RawConfigFile, StageConfig};

/// Builder for `ConfigFile` to simplify test setup.
pub struct ConfigFileBuilder {
    config: RawConfigFile,
}

impl ConfigFileBuilder {
    pub fn new() -> Self {
        Self {
            config: RawConfigFile {
                config: ConfigSection::default(),
                capability: CapabilitySection::default(),
                stage: BTreeMap::new(),
            },
        }
    }

    pub fn with_stage(mut self, name: &str, stage: StageConfig) -> Self {
        self.config.stage.insert(name.to_string(), stage);
        self
    }

    pub fn with_root(mut self, root: &Path) -> Self {
        self.config.config.root = root.to_path_buf();
        self
    }

    pub fn with_timeout_secs(mut self, secs: u64) -> Self {
        self.config.config.timeout_secs = secs;
        self
    }

    pub fn with_device(mut self, device: &str) -> Self {
        self.config.capability.device = device.to_string();
        self
    }

    pub fn raw(self) -> RawConfigFile {
        self.config
    }

    pub fn build(self) -> ConfigFile {
        ConfigFile::try_from(self.config).expect("Failed to build valid config from builder")
    }
}

impl Default for ConfigFileBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Builder for `StageConfig`.
pub struct StageConfigBuilder {
    stage: StageConfig,
}

impl StageConfigBuilder {
    pub fn new(program: &str) -> Self {
        Self {
            stage: StageConfig {
                program: program.to_string(),
                args: vec![],
                after: vec![],
                inputs: vec![],
                outputs: vec![],
                description: None,
                timeout_secs: None,
            },
        }
    }

    pub fn arg(mut self, arg: &str) -> Self {
        self.stage.args.push(arg.to_string());
        self
    }

    pub fn after(mut self, dep: &str) -> Self {
        self.stage.after.push(dep.to_string());
        self
    }

    pub fn input(mut self, role: &str) -> Self {
        self.stage.inputs.push(role.to_string());
        self
    }

    pub fn output(mut self, role: &str) -> Self {
        self.stage.outputs.push(role.to_string());
        self
    }

    pub fn timeout_secs(mut self, secs: u64) -> Self {
        self.stage.timeout_secs = Some(secs);
        self
    }

    pub fn build(self) -> StageConfig {
        self.stage
    }
}

/// `A -> B -> C`, each producing one role (`a`, `b`, `c`) consumed by the next.
pub fn chain_config() -> ConfigFile {
    ConfigFileBuilder::new()
        .with_stage("A", StageConfigBuilder::new("stage-a").output("a").build())
        .with_stage(
            "B",
            StageConfigBuilder::new("stage-b")
                .arg("{input}")
                .after("A")
                .input("a")
                .output("b")
                .build(),
        )
        .with_stage(
            "C",
            StageConfigBuilder::new("stage-c")
                .arg("{input:b}")
                .after("B")
                .input("b")
                .output("c")
                .build(),
        )
        .build()
}
