//! Soundboard CLI
//!
//! Talks to a running Soundboard engine over its HTTP and WebSocket APIs.
//!
//! Usage:
//!   # Check the engine is up
//!   cargo run -p soundboard-client -- health
//!
//!   # List what the engine offers
//!   cargo run -p soundboard-client -- presets
//!   cargo run -p soundboard-client -- voices
//!
//!   # Speak and save the audio
//!   cargo run -p soundboard-client -- speak "Hello world" --output hello.wav
//!
//! The engine address comes from `--base-url`, else `SOUNDBOARD_BASE_URL`,
//! else http://localhost:8765.

mod wav;

use std::path::PathBuf;

use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use tracing::{info, warn};

use soundboard_client::orchestrator::{FALLBACK_PRESET, FALLBACK_VOICE};
use soundboard_client::{
    AudioChunk, CancelToken, ClientOptions, ControlPlaneClient, EngineEvent, Selection,
    SelectionPolicy, SessionObserver, SessionOutcome, SpeakRequest, StreamingSession,
    SDK_API_VERSION,
};

#[derive(Parser, Debug)]
#[command(author, version, about = "Soundboard engine client")]
struct Args {
    /// Engine base URL
    #[arg(short, long, global = true)]
    base_url: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Show engine status and versions
    Health,
    /// List available presets
    Presets,
    /// List available voices
    Voices,
    /// Synthesize text
    Speak {
        text: String,

        /// Preset to use (defaults to the engine's best match)
        #[arg(short, long)]
        preset: Option<String>,

        /// Voice to use (defaults to the engine's best match)
        #[arg(short, long)]
        voice: Option<String>,

        /// Write the audio to this WAV file
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("soundboard_client=info".parse()?)
                .add_directive("tokio_tungstenite=warn".parse()?),
        )
        .init();

    let args = Args::parse();

    let mut options = ClientOptions::from_env();
    if let Some(base_url) = args.base_url {
        options = options.with_base_url(base_url);
    }
    let control = ControlPlaneClient::new(options.clone())?;
    let cancel = CancelToken::new();

    match args.command {
        Command::Health => {
            let info = control.get_health(&cancel).await?;
            println!("status:         {}", info.status);
            println!("engine version: {}", info.engine_version);
            println!("api version:    {} (client {})", info.api_version, SDK_API_VERSION);
        }
        Command::Presets => {
            for preset in control.get_presets(&cancel).await? {
                println!("{preset}");
            }
        }
        Command::Voices => {
            for voice in control.get_voices(&cancel).await? {
                println!("{voice}");
            }
        }
        Command::Speak {
            text,
            preset,
            voice,
            output,
        } => {
            let wanted = Selection { preset, voice };
            let selection = resolve_selection(&control, &cancel, wanted).await;
            let request = SpeakRequest::new(
                text,
                selection.preset.unwrap_or_else(|| FALLBACK_PRESET.to_string()),
                selection.voice.unwrap_or_else(|| FALLBACK_VOICE.to_string()),
            );
            speak(&options, request, output).await?;
        }
    }

    Ok(())
}

/// Fills missing choices from the engine's catalog. Explicit choices are kept
/// even when the catalog cannot be fetched.
async fn resolve_selection(
    control: &ControlPlaneClient,
    cancel: &CancelToken,
    wanted: Selection,
) -> Selection {
    if wanted.preset.is_some() && wanted.voice.is_some() {
        return wanted;
    }
    match control.discover(cancel).await {
        Ok(catalog) => {
            let mut picked = SelectionPolicy::default().apply(&catalog, &wanted);
            // explicit flags win even if the engine doesn't list them
            if wanted.preset.is_some() {
                picked.preset = wanted.preset;
            }
            if wanted.voice.is_some() {
                picked.voice = wanted.voice;
            }
            picked
        }
        Err(e) => {
            warn!("Could not fetch catalog, using fallbacks: {}", e);
            wanted
        }
    }
}

#[derive(Default)]
struct Collector {
    pcm: Vec<u8>,
    sample_rate: Option<u32>,
}

impl SessionObserver for Collector {
    fn on_chunk(&mut self, chunk: AudioChunk) {
        self.sample_rate.get_or_insert(chunk.sample_rate);
        self.pcm.extend_from_slice(&chunk.pcm_data);
    }

    fn on_event(&mut self, event: &EngineEvent) {
        info!("Engine state: {}", event.state);
    }
}

async fn speak(options: &ClientOptions, request: SpeakRequest, output: Option<PathBuf>) -> Result<()> {
    info!(
        "Speaking {} chars (preset: {}, voice: {})",
        request.text.len(),
        request.preset,
        request.voice
    );

    let session = StreamingSession::new(options, request)?;
    let cancel = session.cancel_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            cancel.cancel();
        }
    });

    let start = std::time::Instant::now();
    let mut collector = Collector::default();
    match session.run(&mut collector).await {
        SessionOutcome::Finished { chunks } => {
            let sample_rate = collector
                .sample_rate
                .unwrap_or(soundboard_protocol::SAMPLE_RATE);
            let duration_secs = collector.pcm.len() as f32 / (sample_rate as f32 * 2.0);
            info!(
                "Received {:.2}s audio in {} chunks ({:?})",
                duration_secs,
                chunks,
                start.elapsed()
            );
            if let Some(path) = output {
                wav::write_pcm16(&path, &collector.pcm, sample_rate)?;
                println!("Audio saved to: {}", path.display());
            } else {
                println!("Received {} bytes of audio", collector.pcm.len());
            }
            Ok(())
        }
        SessionOutcome::Cancelled => {
            println!("Stopped");
            Ok(())
        }
        SessionOutcome::Failed(e) => bail!("Something didn't work: {}", e),
    }
}
