// src/engine/shutdown.rs

//! Operator shutdown requests (Ctrl-C, SIGTERM) delivered to the orchestrator.

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{error, info};

/// Sending half; cheap to clone and hand to signal listeners or tests.
#[derive(Debug, Clone)]
pub struct ShutdownHandle {
    tx: mpsc::Sender<()>,
}

impl ShutdownHandle {
    /// Request shutdown. Repeated requests are coalesced.
    pub fn trigger(&self) {
        let _ = self.tx.try_send(());
    }
}

/// Receiving half, owned by the orchestrator for the duration of a run.
#[derive(Debug)]
pub struct Shutdown {
    rx: mpsc::Receiver<()>,
    requested: bool,
}

impl Shutdown {
    pub fn new() -> (ShutdownHandle, Shutdown) {
        let (tx, rx) = mpsc::channel(1);
        (
            ShutdownHandle { tx },
            Shutdown {
                rx,
                requested: false,
            },
        )
    }

    /// Non-blocking check.
    pub fn is_requested(&mut self) -> bool {
        if !self.requested && self.rx.try_recv().is_ok() {
            self.requested = true;
        }
        self.requested
    }

    /// Resolve once shutdown has been requested. Never resolves when every
    /// handle has been dropped without triggering.
    pub async fn requested(&mut self) {
        if self.requested {
            return;
        }
        match self.rx.recv().await {
            Some(()) => self.requested = true,
            None => std::future::pending::<()>().await,
        }
    }
}

/// Forward Ctrl-C and (on unix) SIGTERM to `handle`.
pub fn spawn_signal_listener(handle: ShutdownHandle) -> JoinHandle<()> {
    tokio::spawn(async move {
        #[cfg(unix)]
        {
            use tokio::signal::unix::{SignalKind, signal};

            let mut term = match signal(SignalKind::terminate()) {
                Ok(s) => s,
                Err(e) => {
                    error!(error = %e, "failed to listen for SIGTERM");
                    wait_ctrl_c().await;
                    handle.trigger();
                    return;
                }
            };

            tokio::select! {
                _ = wait_ctrl_c() => info!("Ctrl-C received; shutting down"),
                _ = term.recv() => info!("SIGTERM received; shutting down"),
            }
        }

        #[cfg(not(unix))]
        {
            wait_ctrl_c().await;
            info!("Ctrl-C received; shutting down");
        }

        handle.trigger();
    })
}

async fn wait_ctrl_c() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "failed to listen for Ctrl-C");
        std::future::pending::<()>().await;
    }
}
