use soundboard_protocol::{ClientFrame, HealthResponse, SpeakPayload, API_VERSION};
use uuid::Uuid;

use crate::error::{ClientError, Result};

/// Engine health and version information returned by `GET /api/health`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineInfo {
    /// Readiness, e.g. "ready" or "loading"
    pub status: String,
    pub engine_version: String,
    pub api_version: String,
}

impl EngineInfo {
    /// Whether the engine speaks the same API contract version as this client.
    pub fn is_compatible(&self) -> bool {
        self.api_version == API_VERSION
    }
}

impl From<HealthResponse> for EngineInfo {
    fn from(body: HealthResponse) -> Self {
        Self {
            status: body.status,
            engine_version: body.engine_version,
            api_version: body.api_version,
        }
    }
}

/// A request to synthesize speech.
///
/// The request id is fixed when the request is built, either generated or
/// supplied through [`SpeakRequest::with_request_id`], and never changes after.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpeakRequest {
    pub text: String,
    pub preset: String,
    pub voice: String,
    request_id: String,
}

impl SpeakRequest {
    pub fn new(text: impl Into<String>, preset: impl Into<String>, voice: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            preset: preset.into(),
            voice: voice.into(),
            request_id: Uuid::new_v4().to_string(),
        }
    }

    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = request_id.into();
        self
    }

    pub fn request_id(&self) -> &str {
        &self.request_id
    }

    pub(crate) fn validate(&self) -> Result<()> {
        if self.text.trim().is_empty() {
            return Err(ClientError::InvalidRequest("text must not be empty".into()));
        }
        Ok(())
    }

    pub(crate) fn to_frame(&self) -> ClientFrame {
        ClientFrame::speak(
            self.request_id.clone(),
            SpeakPayload {
                text: self.text.clone(),
                preset: self.preset.clone(),
                voice: self.voice.clone(),
            },
        )
    }
}

/// A chunk of PCM16LE mono audio received while streaming.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioChunk {
    pub pcm_data: Vec<u8>,
    pub sample_rate: u32,
}

impl AudioChunk {
    pub fn sample_count(&self) -> usize {
        self.pcm_data.len() / 2
    }
}

/// A state transition reported by the engine ("started", "finished", ...).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineEvent {
    pub state: String,
}
