use std::collections::HashMap;
use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::{Arc, Mutex};

use tokio::sync::{mpsc, oneshot};
use subforge::config::ConfigFile;
use subforge::exec::{ExecOutcome, StageExecutor, StageInvocation, StageReport};

/// What the fake does when asked to run a stage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FakeBehaviour {
    /// Write one file per declared output role, report it, exit 0.
    Succeed,
    /// Exit 0 without producing anything.
    SucceedWithoutOutputs,
    /// Exit with the given non-zero status.
    Fail(i32),
    /// Block until cancelled.
    Hang,
}

/// A fake executor that:
/// - records which stages were "run", in order
/// - behaves per stage as configured (default: `Succeed`)
pub struct FakeExecutor {
    outputs: HashMap<String, Vec<String>>,
    behaviours: HashMap<String, FakeBehaviour>,
    executed: Arc<Mutex<Vec<String>>>,
}

impl FakeExecutor {
    pub fn from_config(cfg: &ConfigFile, executed: Arc<Mutex<Vec<String>>>) -> Self {
        let outputs = cfg
            .stage
            .iter()
            .map(|(name, stage)| (name.clone(), stage.outputs.clone()))
            .collect();
        Self {
            outputs,
            behaviours: HashMap::new(),
            executed,
        }
    }

    pub fn with_behaviour(mut self, stage: &str, behaviour: FakeBehaviour) -> Self {
        self.behaviours.insert(stage.to_string(), behaviour);
        self
    }
}

impl StageExecutor for FakeExecutor {
    fn execute(
        &mut self,
        invocation: StageInvocation,
        reports: mpsc::Sender<StageReport>,
        cancel: oneshot::Receiver<()>,
    ) -> Pin<Box<dyn Future<Output = ExecOutcome> + Send + '_>> {
        let executed = Arc::clone(&self.executed);
        let roles = self
            .outputs
            .get(&invocation.stage)
            .cloned()
            .unwrap_or_default();
        let behaviour = self
            .behaviours
            .get(&invocation.stage)
            .cloned()
            .unwrap_or(FakeBehaviour::Succeed);

        Box::pin(async move {
            executed.lock().unwrap().push(invocation.stage.clone());

            match behaviour {
                FakeBehaviour::Succeed => {
                    for role in roles {
                        let rel = PathBuf::from(&role).join(format!("{}.out", invocation.stage));
                        let abs = invocation.job_dir.join(&rel);
                        std::fs::create_dir_all(abs.parent().unwrap()).unwrap();
                        std::fs::write(&abs, invocation.command_line()).unwrap();

                        let _ = reports
                            .send(StageReport::Output {
                                role,
                                path: rel,
                                description: "fake artifact".to_string(),
                            })
                            .await;
                    }
                    let _ = reports
                        .send(StageReport::Metadata {
                            key: "fake".to_string(),
                            value: true.into(),
                        })
                        .await;
                    ExecOutcome::Exited {
                        code: Some(0),
                        diagnostics: String::new(),
                    }
                }
                FakeBehaviour::SucceedWithoutOutputs => ExecOutcome::Exited {
                    code: Some(0),
                    diagnostics: String::new(),
                },
                FakeBehaviour::Fail(code) => ExecOutcome::Exited {
                    code: Some(code),
                    diagnostics: format!("{} failed on purpose", invocation.stage),
                },
                FakeBehaviour::Hang => {
                    let _ = cancel.await;
                    ExecOutcome::Cancelled
                }
            }
        })
    }
}
