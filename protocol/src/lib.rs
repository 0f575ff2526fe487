//! Shared protocol definitions for Soundboard engine communication.
//!
//! The engine exposes two channels:
//! - Control plane: short HTTP calls returning JSON (`/api/health`, `/api/presets`,
//!   `/api/voices`, `/api/stop`)
//! - Data plane: a WebSocket at `/stream` carrying one JSON object per text message
//!
//! On the data plane the client sends a single `speak` frame and the engine answers
//! with `state`, `audio_chunk` and `error` frames. Audio is base64-encoded PCM16LE mono.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// API contract version this crate implements.
pub const API_VERSION: &str = "1";

/// Audio format constants
pub const SAMPLE_RATE: u32 = 24000;
pub const CHANNELS: u16 = 1;
pub const BITS_PER_SAMPLE: u16 = 16;

pub const HEALTH_PATH: &str = "/api/health";
pub const PRESETS_PATH: &str = "/api/presets";
pub const VOICES_PATH: &str = "/api/voices";
pub const STOP_PATH: &str = "/api/stop";
pub const STREAM_PATH: &str = "/stream";

pub const STATE_STARTED: &str = "started";
pub const STATE_FINISHED: &str = "finished";

const DEFAULT_ENGINE_ERROR: &str = "Engine error";

/// Frame sent from client to engine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientFrame {
    /// Synthesize text and stream the audio back
    Speak {
        request_id: String,
        payload: SpeakPayload,
    },
}

impl ClientFrame {
    pub fn speak(request_id: impl Into<String>, payload: SpeakPayload) -> Self {
        ClientFrame::Speak {
            request_id: request_id.into(),
            payload,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpeakPayload {
    pub text: String,
    pub preset: String,
    pub voice: String,
}

/// Frame sent from engine to client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerFrame {
    /// Engine state transition ("started", "finished", ...)
    State {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        request_id: Option<String>,
        payload: StatePayload,
    },
    /// One piece of synthesized audio
    AudioChunk {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        request_id: Option<String>,
        payload: AudioChunkPayload,
    },
    /// Engine failed the request
    Error {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        request_id: Option<String>,
        payload: ErrorPayload,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatePayload {
    pub state: String,
}

impl StatePayload {
    pub fn is_finished(&self) -> bool {
        self.state == STATE_FINISHED
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AudioChunkPayload {
    /// Base64 PCM16LE mono
    pub data: String,
    pub sample_rate: u32,
}

impl AudioChunkPayload {
    pub fn encode(pcm: &[u8], sample_rate: u32) -> Self {
        Self {
            data: encode_audio(pcm),
            sample_rate,
        }
    }

    pub fn decode_pcm(&self) -> Result<Vec<u8>, FrameError> {
        decode_audio(&self.data)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorPayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl ErrorPayload {
    /// The engine's message, or a generic one when the engine sent none.
    pub fn message_or_default(&self) -> &str {
        self.message.as_deref().unwrap_or(DEFAULT_ENGINE_ERROR)
    }
}

#[derive(Debug, Error)]
pub enum FrameError {
    #[error("unparsable frame: {0}")]
    Json(#[source] serde_json::Error),
    #[error("malformed {kind} payload: {source}")]
    Payload {
        kind: &'static str,
        #[source]
        source: serde_json::Error,
    },
    #[error("invalid base64 audio: {0}")]
    Audio(#[from] base64::DecodeError),
}

#[derive(Deserialize)]
struct Envelope {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    request_id: Option<String>,
    #[serde(default)]
    payload: Option<Value>,
}

/// Decode one complete data-plane message.
///
/// Returns `Ok(None)` for message types this crate does not know, so newer
/// engines can add frames without breaking older clients.
pub fn decode_server_frame(bytes: &[u8]) -> Result<Option<ServerFrame>, FrameError> {
    let envelope: Envelope = serde_json::from_slice(bytes).map_err(FrameError::Json)?;
    let request_id = envelope.request_id;
    let payload = envelope
        .payload
        .unwrap_or_else(|| Value::Object(Default::default()));

    let frame = match envelope.kind.as_str() {
        "state" => ServerFrame::State {
            request_id,
            payload: payload_of(payload, "state")?,
        },
        "audio_chunk" => ServerFrame::AudioChunk {
            request_id,
            payload: payload_of(payload, "audio_chunk")?,
        },
        "error" => ServerFrame::Error {
            request_id,
            payload: payload_of(payload, "error")?,
        },
        _ => return Ok(None),
    };
    Ok(Some(frame))
}

fn payload_of<T: DeserializeOwned>(value: Value, kind: &'static str) -> Result<T, FrameError> {
    serde_json::from_value(value).map_err(|source| FrameError::Payload { kind, source })
}

pub fn encode_audio(pcm: &[u8]) -> String {
    BASE64.encode(pcm)
}

pub fn decode_audio(data: &str) -> Result<Vec<u8>, FrameError> {
    Ok(BASE64.decode(data)?)
}

/// Body of `GET /api/health`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    #[serde(alias = "engineVersion")]
    pub engine_version: String,
    #[serde(alias = "apiVersion")]
    pub api_version: String,
}

/// Body of `GET /api/presets`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PresetsResponse {
    pub presets: Vec<String>,
}

/// Body of `GET /api/voices`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoicesResponse {
    pub voices: Vec<VoiceEntry>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoiceEntry {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn audio_codec_round_trips_arbitrary_bytes() {
        let samples: Vec<Vec<u8>> = vec![
            Vec::new(),
            vec![0x00],
            vec![0xff, 0xfe],
            (0..=255u8).collect(),
            (0..1024u32).map(|i| (i.wrapping_mul(31) % 251) as u8).collect(),
        ];
        for pcm in samples {
            let payload = AudioChunkPayload::encode(&pcm, SAMPLE_RATE);
            assert_eq!(payload.decode_pcm().unwrap(), pcm);
        }
    }

    #[test]
    fn speak_frame_matches_wire_shape() {
        let frame = ClientFrame::speak(
            "req-1",
            SpeakPayload {
                text: "Hello".into(),
                preset: "narrator".into(),
                voice: "af_bella".into(),
            },
        );
        let value = serde_json::to_value(&frame).unwrap();
        assert_eq!(
            value,
            serde_json::json!({
                "type": "speak",
                "request_id": "req-1",
                "payload": {"text": "Hello", "preset": "narrator", "voice": "af_bella"}
            })
        );
    }

    #[test]
    fn decodes_audio_chunk() {
        let json = r#"{"type":"audio_chunk","request_id":"abc-123","payload":{"data":"AQIDBA==","sample_rate":24000}}"#;
        let frame = decode_server_frame(json.as_bytes()).unwrap().unwrap();
        match frame {
            ServerFrame::AudioChunk {
                request_id,
                payload,
            } => {
                assert_eq!(request_id.as_deref(), Some("abc-123"));
                assert_eq!(payload.sample_rate, 24000);
                assert_eq!(payload.decode_pcm().unwrap(), vec![1, 2, 3, 4]);
            }
            other => panic!("unexpected frame {other:?}"),
        }
    }

    #[test]
    fn decodes_finished_state() {
        let json = r#"{"type":"state","request_id":"abc-123","payload":{"state":"finished"}}"#;
        match decode_server_frame(json.as_bytes()).unwrap() {
            Some(ServerFrame::State { payload, .. }) => assert!(payload.is_finished()),
            other => panic!("unexpected frame {other:?}"),
        }
    }

    #[test]
    fn error_payload_without_message_uses_generic_text() {
        let json = r#"{"type":"error","payload":{"code":"boom"}}"#;
        match decode_server_frame(json.as_bytes()).unwrap() {
            Some(ServerFrame::Error { payload, .. }) => {
                assert_eq!(payload.code.as_deref(), Some("boom"));
                assert_eq!(payload.message_or_default(), "Engine error");
            }
            other => panic!("unexpected frame {other:?}"),
        }

        let bare = r#"{"type":"error"}"#;
        assert!(matches!(
            decode_server_frame(bare.as_bytes()).unwrap(),
            Some(ServerFrame::Error { .. })
        ));
    }

    #[test]
    fn unknown_type_is_skipped() {
        let json = r#"{"type":"viseme","payload":{"shape":"O"}}"#;
        assert!(decode_server_frame(json.as_bytes()).unwrap().is_none());
    }

    #[test]
    fn missing_fields_are_payload_errors() {
        let json = r#"{"type":"audio_chunk","payload":{"data":"AQID"}}"#;
        assert!(matches!(
            decode_server_frame(json.as_bytes()),
            Err(FrameError::Payload {
                kind: "audio_chunk",
                ..
            })
        ));

        let no_type = r#"{"payload":{}}"#;
        assert!(matches!(
            decode_server_frame(no_type.as_bytes()),
            Err(FrameError::Json(_))
        ));
    }

    #[test]
    fn invalid_base64_is_rejected() {
        let payload = AudioChunkPayload {
            data: "not base64!!".into(),
            sample_rate: SAMPLE_RATE,
        };
        assert!(matches!(payload.decode_pcm(), Err(FrameError::Audio(_))));
    }

    #[test]
    fn health_accepts_both_casings() {
        let snake: HealthResponse = serde_json::from_str(
            r#"{"status":"ready","engine_version":"0.9.0","api_version":"1"}"#,
        )
        .unwrap();
        let camel: HealthResponse =
            serde_json::from_str(r#"{"status":"ready","engineVersion":"0.9.0","apiVersion":"1"}"#)
                .unwrap();
        assert_eq!(snake, camel);
    }

    #[test]
    fn voices_keep_only_known_fields() {
        let body: VoicesResponse = serde_json::from_str(
            r#"{"voices":[{"id":"af_bella","name":"Bella","gender":"f"},{"id":"am_adam"}]}"#,
        )
        .unwrap();
        let ids: Vec<_> = body.voices.iter().map(|v| v.id.as_str()).collect();
        assert_eq!(ids, ["af_bella", "am_adam"]);
    }
}
