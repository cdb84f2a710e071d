// src/config/defaults.rs

//! Built-in subtitling pipeline used when no `Subforge.toml` is present.

use std::collections::BTreeMap;

use crate::config::model::{CapabilitySection, ConfigSection, RawConfigFile, StageConfig};

/// `(name, after, inputs, outputs, description)` for every built-in stage.
const PIPELINE: &[(&str, &[&str], &[&str], &[&str], &str)] = &[
    ("demux", &[], &["source"], &["audio"], "extract the audio track"),
    ("metadata", &["demux"], &["source"], &["metadata"], "enrich title metadata"),
    ("separate", &["metadata"], &["audio"], &["vocals"], "isolate dialogue from music and effects"),
    ("diarize", &["separate"], &["vocals"], &["segments"], "voice activity and speaker turns"),
    ("transcribe", &["diarize"], &["vocals", "segments"], &["transcript"], "speech recognition"),
    ("align", &["transcribe"], &["vocals", "transcript"], &["aligned"], "word-level alignment"),
    ("entities", &["align"], &["aligned", "metadata"], &["entities"], "named entity extraction"),
    ("translate", &["entities"], &["aligned", "entities"], &["translation"], "translate aligned transcript"),
    ("subtitle", &["translate"], &["translation"], &["subtitles"], "render subtitle files"),
    ("mux", &["subtitle"], &["source", "subtitles"], &["final"], "mux subtitles into the source video"),
];

pub fn builtin_pipeline() -> RawConfigFile {
    let mut stage = BTreeMap::new();

    for (name, after, inputs, outputs, description) in PIPELINE {
        stage.insert(
            name.to_string(),
            StageConfig {
                program: format!("subforge-{name}"),
                args: vec![
                    "--input".to_string(),
                    "{input}".to_string(),
                    "--job-dir".to_string(),
                    "{job_dir}".to_string(),
                    "--device".to_string(),
                    "{device}".to_string(),
                ],
                after: to_strings(after),
                inputs: to_strings(inputs),
                outputs: to_strings(outputs),
                description: Some(description.to_string()),
                timeout_secs: None,
            },
        );
    }

    RawConfigFile {
        config: ConfigSection::default(),
        capability: CapabilitySection::default(),
        stage,
    }
}

fn to_strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}
