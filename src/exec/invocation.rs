// src/exec/invocation.rs

//! Argument templates and the concrete invocation built from them.
//!
//! Placeholders:
//! - `{job_id}`, `{job_dir}`, `{stage}`, `{device}`
//! - `{input}`: first path of the stage's first declared input role
//! - `{input:<role>}`: first path recorded for that input role
//! - `{output_dir:<role>}`: `<job_dir>/<role>`

use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use std::time::Duration;

use regex::Regex;

use crate::capability::Capabilities;
use crate::dag::StageTemplate;
use crate::errors::{Result, SubforgeError};
use crate::manifest::ArtifactRef;

static PLACEHOLDER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{([a-z_]+)(?::([A-Za-z0-9_.-]+))?\}").unwrap());

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Placeholder {
    JobId,
    JobDir,
    Stage,
    Device,
    Input(Option<String>),
    OutputDir(String),
}

/// All placeholders appearing in `arg`, in order.
pub fn placeholders(arg: &str) -> impl Iterator<Item = Result<Placeholder>> + '_ {
    PLACEHOLDER_RE
        .captures_iter(arg)
        .map(|caps| parse_placeholder(&caps[1], caps.get(2).map(|m| m.as_str())))
}

fn parse_placeholder(name: &str, role: Option<&str>) -> Result<Placeholder> {
    match (name, role) {
        ("job_id", None) => Ok(Placeholder::JobId),
        ("job_dir", None) => Ok(Placeholder::JobDir),
        ("stage", None) => Ok(Placeholder::Stage),
        ("device", None) => Ok(Placeholder::Device),
        ("input", role) => Ok(Placeholder::Input(role.map(str::to_string))),
        ("output_dir", Some(role)) => Ok(Placeholder::OutputDir(role.to_string())),
        (name, Some(role)) => Err(SubforgeError::ConfigError(format!(
            "unknown placeholder `{{{name}:{role}}}`"
        ))),
        (name, None) => Err(SubforgeError::ConfigError(format!(
            "unknown placeholder `{{{name}}}`"
        ))),
    }
}

/// Everything needed to launch one stage process.
#[derive(Debug, Clone)]
pub struct StageInvocation {
    pub job_id: String,
    pub stage: String,
    pub program: String,
    pub args: Vec<String>,
    /// Working directory of the process.
    pub job_dir: PathBuf,
    pub env: Vec<(String, String)>,
    pub timeout: Duration,
    /// Time between SIGTERM and SIGKILL on interruption.
    pub kill_grace: Duration,
}

impl StageInvocation {
    /// Human-readable command line for logs.
    pub fn command_line(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(|s| s.as_str()))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Values available to template rendering.
#[derive(Debug, Clone, Copy)]
pub struct InvocationContext<'a> {
    pub job_id: &'a str,
    pub job_dir: &'a Path,
    pub stage: &'a str,
    pub capabilities: &'a Capabilities,
    /// Resolved inputs, in declared role order.
    pub inputs: &'a [ArtifactRef],
}

/// Render a stage template against a job.
pub fn render(
    template: &StageTemplate,
    ctx: &InvocationContext<'_>,
    timeout: Duration,
    kill_grace: Duration,
) -> Result<StageInvocation> {
    let program = render_arg(&template.program, ctx)?;
    let args = template
        .args
        .iter()
        .map(|arg| render_arg(arg, ctx))
        .collect::<Result<Vec<_>>>()?;

    let mut env = vec![
        ("SUBFORGE_JOB_ID".to_string(), ctx.job_id.to_string()),
        (
            "SUBFORGE_JOB_DIR".to_string(),
            ctx.job_dir.display().to_string(),
        ),
        ("SUBFORGE_STAGE".to_string(), ctx.stage.to_string()),
    ];
    env.extend(ctx.capabilities.env());

    Ok(StageInvocation {
        job_id: ctx.job_id.to_string(),
        stage: ctx.stage.to_string(),
        program,
        args,
        job_dir: ctx.job_dir.to_path_buf(),
        env,
        timeout,
        kill_grace,
    })
}

fn render_arg(arg: &str, ctx: &InvocationContext<'_>) -> Result<String> {
    let mut out = String::with_capacity(arg.len());
    let mut last = 0;

    for caps in PLACEHOLDER_RE.captures_iter(arg) {
        let Some(whole) = caps.get(0) else { continue };
        out.push_str(&arg[last..whole.start()]);
        let placeholder = parse_placeholder(&caps[1], caps.get(2).map(|m| m.as_str()))?;
        out.push_str(&substitute(&placeholder, ctx)?);
        last = whole.end();
    }
    out.push_str(&arg[last..]);

    Ok(out)
}

fn substitute(placeholder: &Placeholder, ctx: &InvocationContext<'_>) -> Result<String> {
    let value = match placeholder {
        Placeholder::JobId => ctx.job_id.to_string(),
        Placeholder::JobDir => ctx.job_dir.display().to_string(),
        Placeholder::Stage => ctx.stage.to_string(),
        Placeholder::Device => ctx.capabilities.device.clone(),
        Placeholder::Input(role) => {
            let artifact = match role {
                None => ctx.inputs.first(),
                Some(role) => ctx.inputs.iter().find(|a| &a.role == role),
            };
            let artifact = artifact.ok_or_else(|| {
                SubforgeError::DependencyError(format!(
                    "stage '{}' has no resolved input for {}",
                    ctx.stage,
                    role.as_deref().map_or("`{input}`".to_string(), |r| format!("role '{r}'"))
                ))
            })?;
            ctx.job_dir.join(&artifact.path).display().to_string()
        }
        Placeholder::OutputDir(role) => ctx.job_dir.join(role).display().to_string(),
    };
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn template(args: &[&str]) -> StageTemplate {
        StageTemplate {
            program: "subforge-{stage}".to_string(),
            args: args.iter().map(|s| s.to_string()).collect(),
        }
    }

    #[test]
    fn renders_all_placeholders() {
        let caps = Capabilities::default();
        let inputs = vec![
            ArtifactRef::new("vocals", "vocals/v.wav", ""),
            ArtifactRef::new("segments", "segments/s.json", ""),
        ];
        let ctx = InvocationContext {
            job_id: "20261019-0001",
            job_dir: Path::new("/jobs/j"),
            stage: "transcribe",
            capabilities: &caps,
            inputs: &inputs,
        };

        let inv = render(
            &template(&[
                "--in={input}",
                "{input:segments}",
                "{output_dir:transcript}",
                "{job_id}@{device}",
            ]),
            &ctx,
            Duration::from_secs(1),
            Duration::from_secs(1),
        )
        .unwrap();

        assert_eq!(inv.program, "subforge-transcribe");
        assert_eq!(
            inv.args,
            vec![
                "--in=/jobs/j/vocals/v.wav",
                "/jobs/j/segments/s.json",
                "/jobs/j/transcript",
                "20261019-0001@cpu",
            ]
        );
        assert!(inv.env.contains(&("SUBFORGE_STAGE".to_string(), "transcribe".to_string())));
    }

    #[test]
    fn unknown_placeholder_is_config_error() {
        let parsed: Vec<_> = placeholders("{gpu}").collect();
        assert!(matches!(parsed[0], Err(SubforgeError::ConfigError(_))));
    }

    #[test]
    fn missing_input_is_dependency_error() {
        let caps = Capabilities::default();
        let ctx = InvocationContext {
            job_id: "20261019-0001",
            job_dir: Path::new("/jobs/j"),
            stage: "demux",
            capabilities: &caps,
            inputs: &[],
        };
        let err = render(
            &template(&["{input}"]),
            &ctx,
            Duration::from_secs(1),
            Duration::from_secs(1),
        )
        .unwrap_err();
        assert!(matches!(err, SubforgeError::DependencyError(_)));
    }
}
