//! Parent-side courier sync management
//!
//! Launches the sync subprocess, turns its stage events into a UI-facing
//! status stream, and maps exit codes back to typed errors: exit 1 means
//! the gateway is unregistered, any other non-zero exit (including
//! signal termination) means the courier connection failed.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::net::TcpStream;
use tokio::process::Command;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{sleep, timeout, Instant};
use tracing::{debug, warn};

use crate::constants::{COURIER_CHECK_RETRY_MS, COURIER_CHECK_TIMEOUT_MS};

use super::notifier::parse_stage_event;

/// UI-facing sync statuses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CourierSyncStatus {
    /// Collecting cargo from the courier
    CollectingCargo,
    /// Waiting between the phases
    Waiting,
    /// Delivering cargo to the courier
    DeliveringCargo,
    /// The sync finished successfully
    Complete,
}

/// Courier sync failures surfaced to the UI.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CourierSyncError {
    /// The auth token was missing or empty
    InvalidToken,
    /// The subprocess reported a stage outside the known set
    UnknownStage(String),
    /// The gateway is not registered with a public gateway (exit 1)
    UnregisteredGateway,
    /// Discovery or the courier connection failed (any other failure exit)
    DisconnectedFromCourier,
    /// The subprocess could not be launched
    Launch(String),
}

impl std::fmt::Display for CourierSyncError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CourierSyncError::InvalidToken => write!(f, "invalid auth token"),
            CourierSyncError::UnknownStage(stage) => write!(f, "unknown sync stage: {}", stage),
            CourierSyncError::UnregisteredGateway => {
                write!(f, "gateway is not registered with a public gateway")
            }
            CourierSyncError::DisconnectedFromCourier => {
                write!(f, "disconnected from the courier")
            }
            CourierSyncError::Launch(e) => write!(f, "failed to launch sync process: {}", e),
        }
    }
}

impl std::error::Error for CourierSyncError {}

/// A running sync process as the parent sees it: its stage events and its
/// eventual exit code.
pub struct SyncProcessHandle {
    /// Stage strings, in emission order
    pub stages: mpsc::Receiver<String>,
    /// Resolves to the exit code once the process ends
    pub exit: oneshot::Receiver<i32>,
}

/// Launches sync processes.
#[async_trait]
pub trait SyncProcessLauncher: Send + Sync {
    /// Start a sync run.
    async fn launch(&self) -> Result<SyncProcessHandle, CourierSyncError>;
}

/// Launches the sync as a child of this process (`courier-sync`
/// subcommand of our own binary), reading stage events from its stdout.
pub struct SubprocessLauncher {
    program: PathBuf,
}

impl SubprocessLauncher {
    /// Launch `program` with the `courier-sync` argument.
    pub fn new(program: PathBuf) -> SubprocessLauncher {
        SubprocessLauncher { program }
    }

    /// Launch the currently running executable.
    pub fn current_exe() -> std::io::Result<SubprocessLauncher> {
        Ok(SubprocessLauncher::new(std::env::current_exe()?))
    }
}

#[async_trait]
impl SyncProcessLauncher for SubprocessLauncher {
    async fn launch(&self) -> Result<SyncProcessHandle, CourierSyncError> {
        let mut child = Command::new(&self.program)
            .arg("courier-sync")
            .stdout(std::process::Stdio::piped())
            .spawn()
            .map_err(|e| CourierSyncError::Launch(e.to_string()))?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| CourierSyncError::Launch("no stdout pipe".to_string()))?;

        let (stage_tx, stages) = mpsc::channel(16);
        let (exit_tx, exit) = oneshot::channel();

        tokio::spawn(async move {
            let mut lines = BufReader::new(stdout).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                if let Some(stage) = parse_stage_event(&line) {
                    if stage_tx.send(stage).await.is_err() {
                        break;
                    }
                }
            }
            drop(stage_tx);

            // Signal termination has no code; anything but a clean exit
            // counts as a courier failure downstream.
            let code = match child.wait().await {
                Ok(status) => status.code().unwrap_or(-1),
                Err(e) => {
                    warn!(error = %e, "failed to reap sync process");
                    -1
                }
            };
            let _ = exit_tx.send(code);
        });

        Ok(SyncProcessHandle { stages, exit })
    }
}

/// Parent-side manager for courier syncs.
pub struct CourierSyncManager {
    launcher: std::sync::Arc<dyn SyncProcessLauncher>,
}

impl CourierSyncManager {
    /// Create a manager over a launcher.
    pub fn new(launcher: std::sync::Arc<dyn SyncProcessLauncher>) -> CourierSyncManager {
        CourierSyncManager { launcher }
    }

    /// Start a sync and stream its statuses.
    ///
    /// An empty `auth_token` fails immediately, before anything is
    /// launched. Otherwise the returned stream yields one status per
    /// stage, then `Complete` on a clean exit; any failure ends the
    /// stream with a single error item. Dropping the receiver abandons
    /// the stream without killing the sync.
    pub async fn synchronize_with_courier(
        &self,
        auth_token: &str,
    ) -> Result<mpsc::Receiver<Result<CourierSyncStatus, CourierSyncError>>, CourierSyncError>
    {
        if auth_token.is_empty() {
            return Err(CourierSyncError::InvalidToken);
        }

        let handle = self.launcher.launch().await?;
        let (tx, rx) = mpsc::channel(16);

        tokio::spawn(async move {
            let mut stages = handle.stages;
            while let Some(stage) = stages.recv().await {
                let status = match stage.as_str() {
                    "COLLECTION" => CourierSyncStatus::CollectingCargo,
                    "WAIT" => CourierSyncStatus::Waiting,
                    "DELIVERY" => CourierSyncStatus::DeliveringCargo,
                    other => {
                        warn!(stage = %other, "sync process reported an unknown stage");
                        let _ = tx
                            .send(Err(CourierSyncError::UnknownStage(other.to_string())))
                            .await;
                        return;
                    }
                };
                if tx.send(Ok(status)).await.is_err() {
                    debug!("status consumer went away");
                    return;
                }
            }

            let result = match handle.exit.await {
                Ok(0) => Ok(CourierSyncStatus::Complete),
                Ok(1) => Err(CourierSyncError::UnregisteredGateway),
                Ok(code) => {
                    warn!(code, "sync process failed");
                    Err(CourierSyncError::DisconnectedFromCourier)
                }
                Err(_) => Err(CourierSyncError::DisconnectedFromCourier),
            };
            let _ = tx.send(result).await;
        });

        Ok(rx)
    }
}

/// Probe whether a courier answers on `courier_addr`.
///
/// Retries every 500 ms within a 3 s budget.
pub async fn is_courier_reachable(courier_addr: SocketAddr) -> bool {
    let deadline = Instant::now() + Duration::from_millis(COURIER_CHECK_TIMEOUT_MS);
    loop {
        let remaining = match deadline.checked_duration_since(Instant::now()) {
            Some(remaining) if !remaining.is_zero() => remaining,
            _ => return false,
        };
        if let Ok(Ok(_)) = timeout(remaining, TcpStream::connect(courier_addr)).await {
            return true;
        }
        if Instant::now() + Duration::from_millis(COURIER_CHECK_RETRY_MS) >= deadline {
            return false;
        }
        sleep(Duration::from_millis(COURIER_CHECK_RETRY_MS)).await;
    }
}
