//! Client for a local Soundboard text-to-speech engine.
//!
//! [`ControlPlaneClient`] covers the HTTP calls (health, presets, voices, stop).
//! [`StreamingSession`] runs one speak request over the `/stream` WebSocket and
//! hands audio chunks to a [`SessionObserver`] as they arrive.
//! [`SessionOrchestrator`] keeps at most one session alive at a time and
//! [`ReconnectController`] keeps the catalog fresh while the engine comes and goes.

pub mod cancel;
pub mod catalog;
pub mod control;
pub mod error;
pub mod models;
pub mod options;
pub mod orchestrator;
pub mod reconnect;
pub mod session;
pub mod transport;

pub use cancel::CancelToken;
pub use catalog::{CatalogSnapshot, CatalogStore, Selection, SelectionPolicy};
pub use control::ControlPlaneClient;
pub use error::{ClientError, Result};
pub use models::{AudioChunk, EngineEvent, EngineInfo, SpeakRequest};
pub use options::ClientOptions;
pub use orchestrator::{SessionOrchestrator, SpeakListener, SpeakStatus};
pub use reconnect::{Backoff, ConnectionStatus, ReconnectController, ReconnectHandle};
pub use session::{SessionObserver, SessionOutcome, SessionState, StreamingSession};
pub use transport::{Connector, DataPlane, WsConnector};

/// API contract version this client was built against.
pub const SDK_API_VERSION: &str = soundboard_protocol::API_VERSION;
