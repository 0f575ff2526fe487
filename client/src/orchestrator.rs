//! Serializes speak calls and relays their results to one listener.

use std::sync::{Arc, Mutex};

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::cancel::CancelToken;
use crate::catalog::{CatalogSnapshot, CatalogStore, Selection};
use crate::control::ControlPlaneClient;
use crate::error::{ClientError, Result};
use crate::models::{AudioChunk, SpeakRequest};
use crate::options::ClientOptions;
use crate::reconnect::ReconnectController;
use crate::session::{SessionObserver, SessionOutcome, StreamingSession};
use crate::transport::{Connector, WsConnector};

/// Used when discovery has not produced a preset
pub const FALLBACK_PRESET: &str = "narrator";
/// Used when discovery has not produced a voice
pub const FALLBACK_VOICE: &str = "default";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SpeakStatus {
    Streaming,
    Done,
    /// Cancelled by the caller; not an error
    Stopped,
    /// `message` is the engine's own text when the engine reported the failure
    Failed { message: String },
}

impl SpeakStatus {
    pub fn label(&self) -> &'static str {
        match self {
            SpeakStatus::Streaming => "Streaming live…",
            SpeakStatus::Done => "Done",
            SpeakStatus::Stopped => "Stopped",
            SpeakStatus::Failed { .. } => "Something didn't work",
        }
    }

    pub fn from_outcome(outcome: &SessionOutcome) -> Self {
        match outcome {
            SessionOutcome::Finished { .. } => SpeakStatus::Done,
            SessionOutcome::Cancelled => SpeakStatus::Stopped,
            SessionOutcome::Failed(ClientError::EngineError { message, .. }) => {
                SpeakStatus::Failed {
                    message: message.clone(),
                }
            }
            SessionOutcome::Failed(err) => SpeakStatus::Failed {
                message: err.to_string(),
            },
        }
    }
}

/// Outward-facing sink, typically an audio player plus a status display.
pub trait SpeakListener: Send + Sync {
    fn on_chunk(&self, chunk: AudioChunk);
    fn on_status(&self, status: SpeakStatus);
}

struct Forward {
    listener: Arc<dyn SpeakListener>,
}

impl SessionObserver for Forward {
    fn on_chunk(&mut self, chunk: AudioChunk) {
        self.listener.on_chunk(chunk);
    }
}

/// Stays in the orchestrator's slot until replaced or stopped, so waiters never
/// hide a running session from `speak` and `stop`.
struct ActiveSpeak {
    request_id: String,
    cancel: CancelToken,
    task: JoinHandle<()>,
    /// `Some` once the session has reached its outcome
    done: watch::Receiver<Option<SessionOutcome>>,
}

pub struct SessionOrchestrator<C = WsConnector>
where
    C: Connector + Clone + 'static,
{
    options: ClientOptions,
    connector: C,
    control: ControlPlaneClient,
    catalog: CatalogStore,
    selection: Arc<Mutex<Selection>>,
    text: Mutex<String>,
    listener: Arc<dyn SpeakListener>,
    active: tokio::sync::Mutex<Option<ActiveSpeak>>,
}

impl SessionOrchestrator<WsConnector> {
    pub fn new(options: ClientOptions, listener: Arc<dyn SpeakListener>) -> Result<Self> {
        let connector = WsConnector::new().with_max_message_size(options.max_message_size);
        Self::with_connector(connector, options, listener)
    }
}

impl<C> SessionOrchestrator<C>
where
    C: Connector + Clone + 'static,
{
    pub fn with_connector(
        connector: C,
        options: ClientOptions,
        listener: Arc<dyn SpeakListener>,
    ) -> Result<Self> {
        // Fail on a bad base url now rather than on the first speak.
        options.stream_url()?;
        Ok(Self {
            control: ControlPlaneClient::new(options.clone())?,
            options,
            connector,
            catalog: CatalogStore::new(),
            selection: Arc::new(Mutex::new(Selection::default())),
            text: Mutex::new(String::new()),
            listener,
            active: tokio::sync::Mutex::new(None),
        })
    }

    /// A controller that feeds this orchestrator's catalog and selection.
    pub fn reconnect_controller(&self) -> ReconnectController<ControlPlaneClient> {
        ReconnectController::new(
            self.control.clone(),
            self.catalog.clone(),
            Arc::clone(&self.selection),
        )
    }

    pub fn control(&self) -> &ControlPlaneClient {
        &self.control
    }

    pub fn catalog(&self) -> Option<Arc<CatalogSnapshot>> {
        self.catalog.current()
    }

    pub fn catalog_store(&self) -> &CatalogStore {
        &self.catalog
    }

    pub fn selection(&self) -> Selection {
        self.selection_guard().clone()
    }

    pub fn select_preset(&self, preset: impl Into<String>) {
        self.selection_guard().preset = Some(preset.into());
    }

    pub fn select_voice(&self, voice: impl Into<String>) {
        self.selection_guard().voice = Some(voice.into());
    }

    /// Text of the most recent speak request
    pub fn text(&self) -> String {
        self.text.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Starts speaking `text` with the current selection and returns the request id.
    ///
    /// The request is validated first; only then is any session still running
    /// cancelled and fully torn down.
    pub async fn speak(&self, text: impl Into<String>) -> Result<String> {
        let text = text.into();
        let selection = self.selection();
        let request = SpeakRequest::new(
            text.clone(),
            selection.preset.unwrap_or_else(|| FALLBACK_PRESET.to_string()),
            selection.voice.unwrap_or_else(|| FALLBACK_VOICE.to_string()),
        );
        let session = StreamingSession::with_connector(self.connector.clone(), &self.options, request)?;

        let mut active = self.active.lock().await;
        if let Some(previous) = active.take() {
            teardown(previous).await;
        }
        *self.text.lock().unwrap_or_else(|e| e.into_inner()) = text;

        let request_id = session.request_id().to_string();
        let cancel = session.cancel_token();
        let listener = Arc::clone(&self.listener);
        let (done_tx, done) = watch::channel(None);
        listener.on_status(SpeakStatus::Streaming);

        let task = tokio::spawn(async move {
            let mut forward = Forward {
                listener: Arc::clone(&listener),
            };
            let outcome = session.run(&mut forward).await;
            listener.on_status(SpeakStatus::from_outcome(&outcome));
            done_tx.send_replace(Some(outcome));
        });

        *active = Some(ActiveSpeak {
            request_id: request_id.clone(),
            cancel,
            task,
            done,
        });
        Ok(request_id)
    }

    /// Cancels the local session, then asks the engine to stop.
    pub async fn stop(&self) {
        if let Some(previous) = self.active.lock().await.take() {
            teardown(previous).await;
        }
        if let Err(err) = self.control.stop(&CancelToken::new()).await {
            warn!(error = %err, "engine stop failed");
        }
    }

    /// Waits for the current session, if any, to reach its outcome.
    ///
    /// The session stays registered while waiting, so a concurrent `speak` or
    /// `stop` still cancels it; the waiter then sees `Cancelled`.
    pub async fn wait(&self) -> Option<SessionOutcome> {
        let (request_id, mut done) = {
            let active = self.active.lock().await;
            let current = active.as_ref()?;
            (current.request_id.clone(), current.done.clone())
        };
        let outcome = match done.wait_for(Option::is_some).await {
            Ok(outcome) => (*outcome).clone(),
            Err(_) => {
                warn!(request_id = %request_id, "speak task ended without an outcome");
                None
            }
        };
        outcome
    }

    pub async fn is_speaking(&self) -> bool {
        self.active
            .lock()
            .await
            .as_ref()
            .is_some_and(|a| !a.task.is_finished())
    }

    fn selection_guard(&self) -> std::sync::MutexGuard<'_, Selection> {
        self.selection.lock().unwrap_or_else(|e| e.into_inner())
    }
}

async fn teardown(previous: ActiveSpeak) {
    debug!(request_id = %previous.request_id, "cancelling active speak");
    previous.cancel.cancel();
    if let Err(err) = previous.task.await {
        warn!(request_id = %previous.request_id, error = %err, "speak task failed");
    }
}
