//! Request/response calls against the engine's HTTP API.

use reqwest::Client;
use serde::de::DeserializeOwned;
use soundboard_protocol::{
    HealthResponse, PresetsResponse, VoicesResponse, API_VERSION, HEALTH_PATH, PRESETS_PATH,
    STOP_PATH, VOICES_PATH,
};
use tracing::{debug, info, warn};

use crate::cancel::CancelToken;
use crate::catalog::CatalogSnapshot;
use crate::error::{ClientError, Result};
use crate::models::EngineInfo;
use crate::options::ClientOptions;

/// Health, catalog and stop calls. Holds no state beyond the HTTP pool and options;
/// retries are left to the caller.
#[derive(Debug, Clone)]
pub struct ControlPlaneClient {
    http: Client,
    options: ClientOptions,
}

impl ControlPlaneClient {
    pub fn new(options: ClientOptions) -> Result<Self> {
        let http = Client::builder()
            .timeout(options.http_timeout)
            .build()
            .map_err(|e| ClientError::InvalidConfig(format!("failed to build HTTP client: {e}")))?;
        Ok(Self::with_http_client(http, options))
    }

    /// Reuses an existing connection pool. `options.http_timeout` still bounds each call.
    pub fn with_http_client(http: Client, options: ClientOptions) -> Self {
        debug!(
            base_url = %options.base_url,
            http_timeout = ?options.http_timeout,
            "control plane client created"
        );
        Self { http, options }
    }

    pub fn options(&self) -> &ClientOptions {
        &self.options
    }

    pub async fn get_health(&self, cancel: &CancelToken) -> Result<EngineInfo> {
        let body: HealthResponse = self.get_json(HEALTH_PATH, cancel).await?;
        let info = EngineInfo::from(body);
        if !info.is_compatible() {
            warn!(
                engine_api = %info.api_version,
                client_api = API_VERSION,
                "engine API version differs; continuing"
            );
        }
        Ok(info)
    }

    pub async fn get_presets(&self, cancel: &CancelToken) -> Result<Vec<String>> {
        let body: PresetsResponse = self.get_json(PRESETS_PATH, cancel).await?;
        debug!(count = body.presets.len(), "received presets");
        Ok(body.presets)
    }

    pub async fn get_voices(&self, cancel: &CancelToken) -> Result<Vec<String>> {
        let body: VoicesResponse = self.get_json(VOICES_PATH, cancel).await?;
        let voices: Vec<String> = body.voices.into_iter().map(|v| v.id).collect();
        debug!(count = voices.len(), "received voices");
        Ok(voices)
    }

    /// Asks the engine to halt synthesis. Best effort: only a transport failure
    /// is an error, the engine's answer is not inspected beyond logging.
    pub async fn stop(&self, cancel: &CancelToken) -> Result<()> {
        info!("POST {}", STOP_PATH);
        let url = self.options.endpoint(STOP_PATH);
        let response = cancel
            .or_cancel(async {
                self.http
                    .post(&url)
                    .timeout(self.options.http_timeout)
                    .send()
                    .await
                    .map_err(transport_error)
            })
            .await?;
        if !response.status().is_success() {
            warn!(status = %response.status(), "engine rejected stop");
        }
        Ok(())
    }

    /// Health, presets and voices in one go.
    pub async fn discover(&self, cancel: &CancelToken) -> Result<CatalogSnapshot> {
        let engine = self.get_health(cancel).await?;
        let presets = self.get_presets(cancel).await?;
        let voices = self.get_voices(cancel).await?;
        Ok(CatalogSnapshot::new(engine, presets, voices))
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str, cancel: &CancelToken) -> Result<T> {
        debug!("GET {}", path);
        let url = self.options.endpoint(path);
        let body = cancel
            .or_cancel(async {
                let response = self
                    .http
                    .get(&url)
                    .timeout(self.options.http_timeout)
                    .send()
                    .await
                    .map_err(transport_error)?;
                let status = response.status();
                if !status.is_success() {
                    return Err(ClientError::InvalidResponse(format!(
                        "{path} returned {status}"
                    )));
                }
                response.bytes().await.map_err(transport_error)
            })
            .await?;

        if body.is_empty() {
            return Err(ClientError::InvalidResponse(format!("{path} returned an empty body")));
        }
        serde_json::from_slice(&body)
            .map_err(|e| ClientError::InvalidResponse(format!("{path}: {e}")))
    }
}

fn transport_error(err: reqwest::Error) -> ClientError {
    ClientError::Unreachable(err.to_string())
}
