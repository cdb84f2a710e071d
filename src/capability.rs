// src/capability.rs

//! Device capability descriptor handed to every stage invocation.

use std::collections::BTreeMap;

use crate::config::CapabilitySection;

/// Opaque description of what the host can offer stages (e.g. `cuda:0`).
///
/// Built once per process from `[capability]` and the `--device` flag, then
/// passed explicitly into each invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Capabilities {
    pub device: String,
    pub extra: BTreeMap<String, String>,
}

impl Capabilities {
    pub fn from_config(section: &CapabilitySection, device_override: Option<&str>) -> Self {
        Self {
            device: device_override
                .map(str::to_string)
                .unwrap_or_else(|| section.device.clone()),
            extra: section.extra.clone(),
        }
    }

    /// Environment variables exported to stage processes.
    pub fn env(&self) -> Vec<(String, String)> {
        let mut vars = vec![("SUBFORGE_DEVICE".to_string(), self.device.clone())];
        for (key, value) in &self.extra {
            let key = key
                .chars()
                .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_uppercase() } else { '_' })
                .collect::<String>();
            vars.push((format!("SUBFORGE_CAP_{key}"), value.clone()));
        }
        vars
    }
}

impl Default for Capabilities {
    fn default() -> Self {
        Self::from_config(&CapabilitySection::default(), None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn override_wins_and_extra_keys_are_exported() {
        let mut section = CapabilitySection::default();
        section.extra.insert("vram-gb".to_string(), "24".to_string());

        let caps = Capabilities::from_config(&section, Some("cuda:1"));
        let env = caps.env();

        assert!(env.contains(&("SUBFORGE_DEVICE".to_string(), "cuda:1".to_string())));
        assert!(env.contains(&("SUBFORGE_CAP_VRAM_GB".to_string(), "24".to_string())));
    }
}
