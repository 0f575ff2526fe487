//! Bounded-retry discovery loop with exponential backoff.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, watch};
use tracing::{info, warn};

use crate::cancel::CancelToken;
use crate::catalog::{CatalogSnapshot, CatalogStore, Selection, SelectionPolicy};
use crate::control::ControlPlaneClient;
use crate::error::Result;
use crate::models::EngineInfo;

pub const DEFAULT_BACKOFF: [Duration; 4] = [
    Duration::from_secs(1),
    Duration::from_secs(2),
    Duration::from_secs(5),
    Duration::from_secs(10),
];

/// Delay sequence that holds at its last step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Backoff {
    steps: Vec<Duration>,
}

impl Backoff {
    /// An empty sequence falls back to [`DEFAULT_BACKOFF`].
    pub fn new(steps: Vec<Duration>) -> Self {
        if steps.is_empty() {
            return Self::default();
        }
        Self { steps }
    }

    pub fn delay(&self, attempt: usize) -> Duration {
        let idx = attempt.min(self.steps.len() - 1);
        self.steps[idx]
    }

    pub fn cap(&self) -> Duration {
        self.steps[self.steps.len() - 1]
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self {
            steps: DEFAULT_BACKOFF.to_vec(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionStatus {
    Connecting,
    Connected(EngineInfo),
    /// Last attempt failed; the next one starts after `retry_in`
    Disconnected { attempt: usize, retry_in: Duration },
}

impl ConnectionStatus {
    pub fn label(&self) -> &'static str {
        match self {
            ConnectionStatus::Connecting => "Connecting…",
            ConnectionStatus::Connected(_) => "Connected",
            ConnectionStatus::Disconnected { .. } => "Offline",
        }
    }

    pub fn is_offline(&self) -> bool {
        matches!(self, ConnectionStatus::Disconnected { .. })
    }
}

/// Source of catalog snapshots
#[async_trait]
pub trait Discover: Send + Sync {
    async fn discover(&self, cancel: &CancelToken) -> Result<CatalogSnapshot>;
}

#[async_trait]
impl Discover for ControlPlaneClient {
    async fn discover(&self, cancel: &CancelToken) -> Result<CatalogSnapshot> {
        ControlPlaneClient::discover(self, cancel).await
    }
}

#[derive(Debug, Clone, Copy)]
enum Command {
    Retry,
    Dispose,
}

/// Lets other tasks interrupt a running [`ReconnectController`].
#[derive(Debug, Clone)]
pub struct ReconnectHandle {
    tx: mpsc::UnboundedSender<Command>,
}

impl ReconnectHandle {
    /// Abandons any pending wait and starts again from attempt 0.
    pub fn retry(&self) {
        let _ = self.tx.send(Command::Retry);
    }

    /// Stops the controller without further attempts.
    pub fn dispose(&self) {
        let _ = self.tx.send(Command::Dispose);
    }
}

/// The only retrying layer: wraps discovery and publishes status and catalog.
pub struct ReconnectController<D: Discover = ControlPlaneClient> {
    discovery: D,
    backoff: Backoff,
    policy: SelectionPolicy,
    catalog: CatalogStore,
    selection: Arc<Mutex<Selection>>,
    status: watch::Sender<ConnectionStatus>,
    tx: mpsc::UnboundedSender<Command>,
    commands: mpsc::UnboundedReceiver<Command>,
    disposed: bool,
}

impl<D: Discover> ReconnectController<D> {
    pub fn new(discovery: D, catalog: CatalogStore, selection: Arc<Mutex<Selection>>) -> Self {
        let (tx, commands) = mpsc::unbounded_channel();
        let (status, _) = watch::channel(ConnectionStatus::Connecting);
        Self {
            discovery,
            backoff: Backoff::default(),
            policy: SelectionPolicy::default(),
            catalog,
            selection,
            status,
            tx,
            commands,
            disposed: false,
        }
    }

    pub fn with_backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn with_policy(mut self, policy: SelectionPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn handle(&self) -> ReconnectHandle {
        ReconnectHandle {
            tx: self.tx.clone(),
        }
    }

    pub fn status(&self) -> watch::Receiver<ConnectionStatus> {
        self.status.subscribe()
    }

    /// Retries discovery until it succeeds or the controller is disposed.
    ///
    /// Returns the published snapshot, or `None` once disposed.
    pub async fn run(&mut self) -> Option<Arc<CatalogSnapshot>> {
        while let Ok(command) = self.commands.try_recv() {
            if let Command::Dispose = command {
                self.disposed = true;
            }
        }
        if self.disposed {
            return None;
        }

        let mut attempt = 0usize;
        loop {
            self.status.send_replace(ConnectionStatus::Connecting);
            info!(attempt, "discovering engine");

            // fired when a command abandons the attempt, so work it spawned stops too
            let cancel = CancelToken::new();
            let result = tokio::select! {
                result = self.discovery.discover(&cancel) => result,
                command = self.commands.recv() => {
                    cancel.cancel();
                    match command {
                        Some(Command::Retry) => {
                            info!("manual retry during discovery");
                            attempt = 0;
                            continue;
                        }
                        Some(Command::Dispose) | None => return self.dispose(),
                    }
                }
            };

            match result {
                Ok(snapshot) => return Some(self.publish(snapshot)),
                Err(err) => {
                    let delay = self.backoff.delay(attempt);
                    warn!(attempt, error = %err, retry_in = ?delay, "engine unreachable");
                    self.status.send_replace(ConnectionStatus::Disconnected {
                        attempt,
                        retry_in: delay,
                    });

                    tokio::select! {
                        _ = tokio::time::sleep(delay) => attempt = attempt.saturating_add(1),
                        command = self.commands.recv() => match command {
                            Some(Command::Retry) => {
                                info!("manual retry");
                                attempt = 0;
                            }
                            Some(Command::Dispose) | None => return self.dispose(),
                        },
                    }
                }
            }
        }
    }

    fn publish(&mut self, snapshot: CatalogSnapshot) -> Arc<CatalogSnapshot> {
        let snapshot = self.catalog.publish(snapshot);
        {
            let mut selection = self.selection.lock().unwrap_or_else(|e| e.into_inner());
            *selection = self.policy.apply(&snapshot, &selection);
        }
        info!(
            engine_version = %snapshot.engine.engine_version,
            presets = snapshot.presets.len(),
            voices = snapshot.voices.len(),
            "engine connected"
        );
        self.status
            .send_replace(ConnectionStatus::Connected(snapshot.engine.clone()));
        snapshot
    }

    fn dispose(&mut self) -> Option<Arc<CatalogSnapshot>> {
        info!("reconnect controller disposed");
        self.disposed = true;
        None
    }
}
