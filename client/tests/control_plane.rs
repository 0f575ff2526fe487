use std::time::Duration;

use soundboard_client::{CancelToken, ClientError, ClientOptions, ControlPlaneClient, SDK_API_VERSION};
use soundboard_fake_engine::{FakeEngine, ENGINE_VERSION};

fn client_for(base_url: impl Into<String>) -> ControlPlaneClient {
    let options = ClientOptions::new(base_url).with_http_timeout(Duration::from_secs(2));
    ControlPlaneClient::new(options).unwrap()
}

/// A localhost address with nothing listening on it.
fn closed_port_url() -> String {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    format!("http://{addr}")
}

#[tokio::test]
async fn health_reports_engine_versions() {
    let engine = FakeEngine::new().start().await.unwrap();
    let client = client_for(engine.base_url());

    let info = client.get_health(&CancelToken::new()).await.unwrap();
    assert_eq!(info.status, "ok");
    assert_eq!(info.engine_version, ENGINE_VERSION);
    assert_eq!(info.api_version, SDK_API_VERSION);
    assert!(info.is_compatible());
}

#[tokio::test]
async fn newer_api_version_is_tolerated() {
    let engine = FakeEngine::new().with_api_version("2").start().await.unwrap();
    let client = client_for(engine.base_url());

    let info = client.get_health(&CancelToken::new()).await.unwrap();
    assert_eq!(info.api_version, "2");
    assert!(!info.is_compatible());
}

#[tokio::test]
async fn lists_presets_and_voice_ids() {
    let engine = FakeEngine::new()
        .with_presets(["narrator", "assistant"])
        .with_voices(["af_bella", "am_adam", "bf_emma"])
        .start()
        .await
        .unwrap();
    let client = client_for(engine.base_url());
    let cancel = CancelToken::new();

    assert_eq!(
        client.get_presets(&cancel).await.unwrap(),
        ["narrator", "assistant"]
    );
    assert_eq!(
        client.get_voices(&cancel).await.unwrap(),
        ["af_bella", "am_adam", "bf_emma"]
    );
}

#[tokio::test]
async fn discover_bundles_the_catalog() {
    let engine = FakeEngine::new()
        .with_presets(["narrator", "narrator", "assistant"])
        .start()
        .await
        .unwrap();
    // trailing slash on the base url is tolerated
    let client = client_for(format!("{}/", engine.base_url()));

    let snapshot = client.discover(&CancelToken::new()).await.unwrap();
    assert_eq!(snapshot.engine.engine_version, ENGINE_VERSION);
    assert_eq!(snapshot.presets, ["narrator", "assistant"]);
    assert_eq!(snapshot.voices, ["af_bella", "am_adam"]);
}

#[tokio::test]
async fn malformed_body_is_invalid_response() {
    let engine = FakeEngine::new().with_malformed_catalog().start().await.unwrap();
    let client = client_for(engine.base_url());
    let cancel = CancelToken::new();

    for result in [
        client.get_health(&cancel).await.map(|_| ()),
        client.get_presets(&cancel).await.map(|_| ()),
        client.get_voices(&cancel).await.map(|_| ()),
    ] {
        assert!(matches!(result, Err(ClientError::InvalidResponse(_))));
    }
}

#[tokio::test]
async fn missing_route_is_invalid_response() {
    let engine = FakeEngine::new().start().await.unwrap();
    let client = client_for(format!("{}/elsewhere", engine.base_url()));

    let err = client.get_presets(&CancelToken::new()).await.unwrap_err();
    assert!(matches!(err, ClientError::InvalidResponse(_)), "{err:?}");
}

#[tokio::test]
async fn closed_port_is_unreachable() {
    let client = client_for(closed_port_url());
    let cancel = CancelToken::new();

    let err = client.get_health(&cancel).await.unwrap_err();
    assert!(matches!(err, ClientError::Unreachable(_)), "{err:?}");
    let err = client.stop(&cancel).await.unwrap_err();
    assert!(matches!(err, ClientError::Unreachable(_)), "{err:?}");
}

#[tokio::test]
async fn stop_reaches_the_engine() {
    let engine = FakeEngine::new().start().await.unwrap();
    let client = client_for(engine.base_url());

    client.stop(&CancelToken::new()).await.unwrap();
    client.stop(&CancelToken::new()).await.unwrap();
    assert_eq!(engine.stop_calls(), 2);
}

#[tokio::test]
async fn stop_ignores_engine_rejection() {
    let engine = FakeEngine::new().start().await.unwrap();
    let client = client_for(format!("{}/elsewhere", engine.base_url()));

    client.stop(&CancelToken::new()).await.unwrap();
    assert_eq!(engine.stop_calls(), 0);
}

#[tokio::test]
async fn cancelled_token_short_circuits() {
    let engine = FakeEngine::new().start().await.unwrap();
    let client = client_for(engine.base_url());
    let cancel = CancelToken::new();
    cancel.cancel();

    let err = client.discover(&cancel).await.unwrap_err();
    assert!(err.is_cancelled());
}
