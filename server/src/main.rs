//! Soundboard fake engine
//!
//! Serves the engine's HTTP API and `/stream` WebSocket with canned audio so the
//! client can be exercised without a real synthesizer.
//!
//! Usage:
//!   cargo run -p soundboard-fake-engine
//!
//! The engine listens on http://127.0.0.1:8765 by default.

use std::time::Duration;

use anyhow::Result;
use tokio::net::TcpListener;
use tracing::info;

use soundboard_fake_engine::FakeEngine;

const DEFAULT_ADDR: &str = "127.0.0.1:8765";

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("soundboard_fake_engine=info".parse()?),
        )
        .init();

    let addr = std::env::var("SOUNDBOARD_FAKE_ADDR").unwrap_or_else(|_| DEFAULT_ADDR.to_string());
    let interval_ms = std::env::var("SOUNDBOARD_FAKE_CHUNK_INTERVAL_MS")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(100);

    let listener = TcpListener::bind(&addr).await?;
    info!("Soundboard fake engine listening on http://{}", addr);

    FakeEngine::new()
        .with_chunk_interval(Duration::from_millis(interval_ms))
        .serve(listener)
        .await?;

    Ok(())
}
