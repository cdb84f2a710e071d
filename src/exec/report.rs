// src/exec/report.rs

//! Machine-readable lines a stage may print on stdout.
//!
//! ```text
//! {"event":"output","role":"audio","path":"audio/track.wav","description":"48kHz stereo"}
//! {"event":"metadata","key":"duration_secs","value":5423.2}
//! ```
//!
//! Anything else on stdout is treated as free-form log output. A line that
//! names one of the events above but does not parse is reported as an error.

use std::path::PathBuf;
use std::sync::LazyLock;

use regex::Regex;
use serde::Deserialize;

use crate::types::MetaValue;

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum StageReport {
    Output {
        role: String,
        path: PathBuf,
        #[serde(default)]
        description: String,
    },
    Metadata {
        key: String,
        value: MetaValue,
    },
}

static REPORT_EVENT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#""event"\s*:\s*"(output|metadata)""#).unwrap());

/// `None` for free-form output, `Some(Err)` for a broken report line.
pub fn parse_report_line(line: &str) -> Option<Result<StageReport, serde_json::Error>> {
    let trimmed = line.trim();
    if !trimmed.starts_with('{') {
        return None;
    }
    match serde_json::from_str(trimmed) {
        Ok(report) => Some(Ok(report)),
        Err(e) if REPORT_EVENT_RE.is_match(trimmed) => Some(Err(e)),
        Err(_) => None,
    }
}
