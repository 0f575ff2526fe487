use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use soundboard_client::reconnect::Backoff;
use soundboard_client::{
    AudioChunk, ClientOptions, ConnectionStatus, SessionOrchestrator, SessionOutcome,
    SpeakListener, SpeakStatus,
};
use soundboard_fake_engine::{FakeEngine, SpeakScript};

#[derive(Default)]
struct Display {
    statuses: Mutex<Vec<SpeakStatus>>,
    bytes: Mutex<usize>,
}

impl SpeakListener for Display {
    fn on_chunk(&self, chunk: AudioChunk) {
        *self.bytes.lock().unwrap() += chunk.pcm_data.len();
    }

    fn on_status(&self, status: SpeakStatus) {
        self.statuses.lock().unwrap().push(status);
    }
}

fn orchestrator(base_url: String) -> (SessionOrchestrator, Arc<Display>) {
    let display = Arc::new(Display::default());
    let options = ClientOptions::new(base_url)
        .with_http_timeout(Duration::from_secs(2))
        .with_receive_timeout(Duration::from_secs(2));
    let orchestrator =
        SessionOrchestrator::new(options, Arc::clone(&display) as Arc<dyn SpeakListener>).unwrap();
    (orchestrator, display)
}

#[tokio::test]
async fn discovery_then_speak_uses_preferred_defaults() {
    let engine = FakeEngine::new()
        .with_presets(["storyteller", "narrator", "assistant"])
        .with_voices(["am_adam", "af_bella"])
        .start()
        .await
        .unwrap();
    let (orchestrator, display) = orchestrator(engine.base_url());

    let mut controller = orchestrator.reconnect_controller();
    let status = controller.status();
    let snapshot = controller.run().await.unwrap();
    assert_eq!(snapshot.presets.len(), 3);
    assert!(matches!(*status.borrow(), ConnectionStatus::Connected(_)));
    assert_eq!(status.borrow().label(), "Connected");

    let selection = orchestrator.selection();
    assert_eq!(selection.preset.as_deref(), Some("assistant"));
    assert_eq!(selection.voice.as_deref(), Some("af_bella"));

    orchestrator.speak("Hello there").await.unwrap();
    let outcome = orchestrator.wait().await.unwrap();
    assert!(matches!(outcome, SessionOutcome::Finished { chunks: 5 }));
    assert_eq!(*display.bytes.lock().unwrap(), 5 * 1024);
    assert_eq!(
        *display.statuses.lock().unwrap(),
        [SpeakStatus::Streaming, SpeakStatus::Done]
    );

    let (_, payload) = &engine.speak_requests()[0];
    assert_eq!(payload.preset, "assistant");
    assert_eq!(payload.voice, "af_bella");
}

#[tokio::test]
async fn stop_cancels_locally_and_notifies_engine() {
    let engine = FakeEngine::new()
        .with_script(SpeakScript::Chunks {
            count: 100,
            size: 256,
            sample_rate: 24000,
        })
        .with_chunk_interval(Duration::from_millis(20))
        .start()
        .await
        .unwrap();
    let (orchestrator, display) = orchestrator(engine.base_url());

    orchestrator.speak("A long paragraph").await.unwrap();
    assert!(orchestrator.is_speaking().await);
    tokio::time::sleep(Duration::from_millis(100)).await;

    orchestrator.stop().await;
    assert!(!orchestrator.is_speaking().await);
    assert_eq!(engine.stop_calls(), 1);
    assert_eq!(
        *display.statuses.lock().unwrap(),
        [SpeakStatus::Streaming, SpeakStatus::Stopped]
    );
}

#[tokio::test]
async fn engine_error_is_shown_verbatim() {
    let engine = FakeEngine::new()
        .with_script(SpeakScript::EngineError {
            code: "voice_missing".into(),
            message: "Voice af_nobody is not installed".into(),
        })
        .start()
        .await
        .unwrap();
    let (orchestrator, display) = orchestrator(engine.base_url());

    orchestrator.speak("Hello").await.unwrap();
    orchestrator.wait().await.unwrap();

    let statuses = display.statuses.lock().unwrap().clone();
    assert_eq!(
        statuses.last(),
        Some(&SpeakStatus::Failed {
            message: "Voice af_nobody is not installed".into()
        })
    );
}

#[tokio::test]
async fn controller_connects_once_engine_appears() {
    let addr: SocketAddr = {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap()
    };
    let (orchestrator, _display) = orchestrator(format!("http://{addr}"));

    let mut controller = orchestrator
        .reconnect_controller()
        .with_backoff(Backoff::new(vec![Duration::from_millis(50)]));
    let mut status = controller.status();
    let handle = controller.handle();
    let task = tokio::spawn(async move { controller.run().await });

    status.wait_for(|s| s.is_offline()).await.unwrap();
    assert_eq!(status.borrow().label(), "Offline");
    assert!(orchestrator.catalog().is_none());

    let _engine = FakeEngine::new().start_on(addr).await.unwrap();
    let snapshot = tokio::time::timeout(Duration::from_secs(5), task)
        .await
        .unwrap()
        .unwrap()
        .unwrap();

    assert_eq!(orchestrator.catalog().as_deref(), Some(&*snapshot));
    assert_eq!(orchestrator.selection().preset.as_deref(), Some("assistant"));
    // the controller has already returned; a late command is harmless
    handle.retry();
}
