//! Scriptable stand-in for a Soundboard engine.
//!
//! Serves the HTTP control plane and the `/stream` WebSocket on one port. What
//! a `speak` request gets back is decided by the configured [`SpeakScript`].

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::json;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use soundboard_protocol::{
    AudioChunkPayload, ClientFrame, ErrorPayload, HealthResponse, PresetsResponse, ServerFrame,
    SpeakPayload, StatePayload, VoiceEntry, VoicesResponse, API_VERSION, HEALTH_PATH,
    PRESETS_PATH, SAMPLE_RATE, STATE_FINISHED, STATE_STARTED, STOP_PATH, STREAM_PATH, VOICES_PATH,
};

pub const ENGINE_VERSION: &str = "0.1.0-fake";

/// What the engine streams back for each `speak`
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SpeakScript {
    /// `started`, `count` chunks of `size` bytes, `finished`
    Chunks {
        count: usize,
        size: usize,
        sample_rate: u32,
    },
    /// `started`, then one `error` frame
    EngineError { code: String, message: String },
    /// `started`, then nothing until the client goes away
    Silent,
    /// `started`, `chunks` chunks, then a close frame with no `finished`
    CloseWithoutFinish { chunks: usize },
    /// `started`, then an `audio_chunk` whose data is not base64
    MalformedChunk,
    /// Frames of unknown types around one chunk, then `finished`
    UnknownTypes,
}

impl Default for SpeakScript {
    fn default() -> Self {
        SpeakScript::Chunks {
            count: 5,
            size: 1024,
            sample_rate: SAMPLE_RATE,
        }
    }
}

#[derive(Debug, Clone)]
pub struct FakeEngine {
    presets: Vec<String>,
    voices: Vec<String>,
    api_version: String,
    script: SpeakScript,
    chunk_interval: Duration,
    malformed_catalog: bool,
}

impl Default for FakeEngine {
    fn default() -> Self {
        Self {
            presets: vec!["assistant".into(), "narrator".into()],
            voices: vec!["af_bella".into(), "am_adam".into()],
            api_version: API_VERSION.to_string(),
            script: SpeakScript::default(),
            chunk_interval: Duration::ZERO,
            malformed_catalog: false,
        }
    }
}

impl FakeEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_presets<I, S>(mut self, presets: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.presets = presets.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_voices<I, S>(mut self, voices: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.voices = voices.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_api_version(mut self, api_version: impl Into<String>) -> Self {
        self.api_version = api_version.into();
        self
    }

    pub fn with_script(mut self, script: SpeakScript) -> Self {
        self.script = script;
        self
    }

    /// Pause between audio chunks
    pub fn with_chunk_interval(mut self, interval: Duration) -> Self {
        self.chunk_interval = interval;
        self
    }

    /// Control-plane GETs answer 200 with a body that is not JSON.
    pub fn with_malformed_catalog(mut self) -> Self {
        self.malformed_catalog = true;
        self
    }

    /// Binds an ephemeral localhost port and serves in the background.
    pub async fn start(self) -> std::io::Result<RunningEngine> {
        self.start_on(SocketAddr::from(([127, 0, 0, 1], 0))).await
    }

    pub async fn start_on(self, addr: SocketAddr) -> std::io::Result<RunningEngine> {
        let listener = TcpListener::bind(addr).await?;
        let addr = listener.local_addr()?;
        let shared = Arc::new(Shared::new(self));
        let app = router(Arc::clone(&shared));

        let task = tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, app).await {
                warn!(error = %e, "fake engine stopped");
            }
        });
        info!(url = %format!("http://{}", addr), "fake engine ready");

        Ok(RunningEngine { addr, shared, task })
    }

    /// Serves on `listener` until the process ends.
    pub async fn serve(self, listener: TcpListener) -> std::io::Result<()> {
        let app = router(Arc::new(Shared::new(self)));
        axum::serve(listener, app).await
    }
}

/// Handle to a background engine. Dropping it stops accepting connections.
pub struct RunningEngine {
    addr: SocketAddr,
    shared: Arc<Shared>,
    task: JoinHandle<()>,
}

impl RunningEngine {
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn base_url(&self) -> String {
        format!("http://{}", self.addr)
    }

    /// Number of `POST /api/stop` calls received
    pub fn stop_calls(&self) -> usize {
        self.shared.stops.load(Ordering::SeqCst)
    }

    /// Every `speak` payload received, in arrival order, with its request id
    pub fn speak_requests(&self) -> Vec<(String, SpeakPayload)> {
        self.shared
            .speaks
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

impl Drop for RunningEngine {
    fn drop(&mut self) {
        self.task.abort();
    }
}

struct Shared {
    config: FakeEngine,
    stops: AtomicUsize,
    speaks: Mutex<Vec<(String, SpeakPayload)>>,
}

impl Shared {
    fn new(config: FakeEngine) -> Self {
        Self {
            config,
            stops: AtomicUsize::new(0),
            speaks: Mutex::new(Vec::new()),
        }
    }
}

type AppState = Arc<Shared>;

fn router(shared: AppState) -> Router {
    Router::new()
        .route(HEALTH_PATH, get(health_handler))
        .route(PRESETS_PATH, get(presets_handler))
        .route(VOICES_PATH, get(voices_handler))
        .route(STOP_PATH, post(stop_handler))
        .route(STREAM_PATH, get(stream_handler))
        .with_state(shared)
}

const MALFORMED_BODY: &str = "<html>not json</html>";

async fn health_handler(State(state): State<AppState>) -> Response {
    if state.config.malformed_catalog {
        return (StatusCode::OK, MALFORMED_BODY).into_response();
    }
    Json(HealthResponse {
        status: "ok".into(),
        engine_version: ENGINE_VERSION.into(),
        api_version: state.config.api_version.clone(),
    })
    .into_response()
}

async fn presets_handler(State(state): State<AppState>) -> Response {
    if state.config.malformed_catalog {
        return (StatusCode::OK, MALFORMED_BODY).into_response();
    }
    Json(PresetsResponse {
        presets: state.config.presets.clone(),
    })
    .into_response()
}

async fn voices_handler(State(state): State<AppState>) -> Response {
    if state.config.malformed_catalog {
        return (StatusCode::OK, MALFORMED_BODY).into_response();
    }
    let voices = state
        .config
        .voices
        .iter()
        .map(|id| VoiceEntry {
            id: id.clone(),
            name: None,
        })
        .collect();
    Json(VoicesResponse { voices }).into_response()
}

async fn stop_handler(State(state): State<AppState>) -> impl IntoResponse {
    let total = state.stops.fetch_add(1, Ordering::SeqCst) + 1;
    debug!(total, "stop requested");
    Json(json!({ "ok": true }))
}

async fn stream_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| async move {
        if let Err(e) = handle_socket(socket, state).await {
            debug!(error = %e, "stream ended with error");
        }
    })
}

async fn handle_socket(mut socket: WebSocket, state: AppState) -> Result<(), axum::Error> {
    info!("stream client connected");

    while let Some(msg) = socket.recv().await {
        let text = match msg? {
            Message::Text(text) => text,
            Message::Close(_) => break,
            Message::Binary(_) => {
                warn!("unexpected binary message");
                continue;
            }
            Message::Ping(_) | Message::Pong(_) => continue,
        };

        let (request_id, payload) = match serde_json::from_str::<ClientFrame>(&text) {
            Ok(ClientFrame::Speak {
                request_id,
                payload,
            }) => (request_id, payload),
            Err(e) => {
                let frame = ServerFrame::Error {
                    request_id: None,
                    payload: ErrorPayload {
                        code: Some("bad_request".into()),
                        message: Some(format!("Invalid request: {}", e)),
                    },
                };
                send_frame(&mut socket, &frame).await?;
                continue;
            }
        };

        info!(request_id = %request_id, chars = payload.text.len(), "speak");
        state
            .speaks
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push((request_id.clone(), payload));

        if !play_script(&mut socket, &state.config, &request_id).await? {
            break;
        }
    }

    info!("stream client disconnected");
    Ok(())
}

/// Returns `false` once the socket should not be read from again.
async fn play_script(
    socket: &mut WebSocket,
    config: &FakeEngine,
    request_id: &str,
) -> Result<bool, axum::Error> {
    send_frame(socket, &state_frame(request_id, STATE_STARTED)).await?;

    match &config.script {
        SpeakScript::Chunks {
            count,
            size,
            sample_rate,
        } => {
            send_chunks(socket, config, request_id, *count, *size, *sample_rate).await?;
            send_frame(socket, &state_frame(request_id, STATE_FINISHED)).await?;
        }
        SpeakScript::EngineError { code, message } => {
            let frame = ServerFrame::Error {
                request_id: Some(request_id.to_string()),
                payload: ErrorPayload {
                    code: Some(code.clone()),
                    message: Some(message.clone()),
                },
            };
            send_frame(socket, &frame).await?;
        }
        SpeakScript::Silent => {}
        SpeakScript::CloseWithoutFinish { chunks } => {
            send_chunks(socket, config, request_id, *chunks, 1024, SAMPLE_RATE).await?;
            socket.send(Message::Close(None)).await?;
            return Ok(false);
        }
        SpeakScript::MalformedChunk => {
            let raw = json!({
                "type": "audio_chunk",
                "request_id": request_id,
                "payload": { "data": "@@not base64@@", "sample_rate": SAMPLE_RATE },
            });
            socket.send(Message::Text(raw.to_string())).await?;
        }
        SpeakScript::UnknownTypes => {
            let viseme = json!({ "type": "viseme", "request_id": request_id, "payload": { "shape": "O" } });
            socket.send(Message::Text(viseme.to_string())).await?;
            send_chunks(socket, config, request_id, 1, 512, SAMPLE_RATE).await?;
            let progress = json!({ "type": "progress", "payload": { "percent": 100 } });
            socket.send(Message::Text(progress.to_string())).await?;
            send_frame(socket, &state_frame(request_id, STATE_FINISHED)).await?;
        }
    }
    Ok(true)
}

async fn send_chunks(
    socket: &mut WebSocket,
    config: &FakeEngine,
    request_id: &str,
    count: usize,
    size: usize,
    sample_rate: u32,
) -> Result<(), axum::Error> {
    let pcm: Vec<u8> = (0..size).map(|i| (i % 251) as u8).collect();
    for i in 0..count {
        if i > 0 && !config.chunk_interval.is_zero() {
            tokio::time::sleep(config.chunk_interval).await;
        }
        let frame = ServerFrame::AudioChunk {
            request_id: Some(request_id.to_string()),
            payload: AudioChunkPayload::encode(&pcm, sample_rate),
        };
        send_frame(socket, &frame).await?;
    }
    Ok(())
}

fn state_frame(request_id: &str, state: &str) -> ServerFrame {
    ServerFrame::State {
        request_id: Some(request_id.to_string()),
        payload: StatePayload {
            state: state.to_string(),
        },
    }
}

async fn send_frame(socket: &mut WebSocket, frame: &ServerFrame) -> Result<(), axum::Error> {
    let text = serde_json::to_string(frame).map_err(axum::Error::new)?;
    socket.send(Message::Text(text)).await
}
