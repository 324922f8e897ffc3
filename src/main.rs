use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use tokio::sync::mpsc;
use tracing::{debug, info};
use voicebridge::audio::{CaptureSource, CpalQueueSink};
use voicebridge::http::{create_router, AppState};
use voicebridge::session::{FreeTierUsage, SessionController, SessionSignal};
use voicebridge::Config;

#[derive(Parser)]
#[command(name = "voicebridge", about = "Live speech-to-speech translation service")]
struct Cli {
    /// Config file stem (TOML, without extension)
    #[arg(long, default_value = "config/voicebridge")]
    config: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();
    let cfg = Arc::new(Config::load(&cli.config)?);

    info!("Voicebridge v0.1.0");
    info!("Loaded config: {}", cfg.service.name);

    let usage = Arc::new(FreeTierUsage::new(cfg.limits.free_tier_seconds));
    let sink = Arc::new(CpalQueueSink::new(cfg.audio.output_sample_rate)?);

    let (signal_tx, mut signal_rx) = mpsc::unbounded_channel::<SessionSignal>();
    tokio::spawn(async move {
        while let Some(signal) = signal_rx.recv().await {
            match signal {
                SessionSignal::StateChanged(state) => info!(?state, "session state"),
                SessionSignal::RecordFinalized(record) => {
                    info!(original = %record.original_text, translated = %record.translated_text, "turn")
                }
                SessionSignal::PaywallRequired { reason } => {
                    info!(?reason, "free tier limit reached")
                }
                other => debug!(?other, "session signal"),
            }
        }
    });

    let controller = SessionController::new(
        cfg.clone(),
        usage,
        sink,
        CaptureSource::Microphone,
        signal_tx,
    );

    let app = create_router(AppState::new(controller));
    let addr = format!("{}:{}", cfg.service.http.bind, cfg.service.http.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("HTTP API listening on {}", addr);

    axum::serve(listener, app).await?;
    Ok(())
}
