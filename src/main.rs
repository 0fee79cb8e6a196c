use anyhow::Result;
use clap::Parser;
use note_scribe::{
    create_router, engine, AppState, Config, JsonNoteStore, RecordingSession, SessionConfig,
    TranscriptRelay,
};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::info;

#[derive(Debug, Parser)]
#[command(name = "note-scribe", about = "Real-time note transcription service")]
struct Args {
    /// Configuration file (without extension)
    #[arg(long, default_value = "config/note-scribe")]
    config: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let args = Args::parse();
    let cfg = Config::load(&args.config)?;

    info!("{} v0.1.0", cfg.service.name);
    info!("Engine mode: {:?} (model: {})", cfg.engine.mode, cfg.engine.model_path);
    info!("Segment store: {}", cfg.store.path);

    let store = Arc::new(JsonNoteStore::open(&cfg.store.path).await?);
    let relay = Arc::new(TranscriptRelay::new(store));

    // Raw engine text flows to the session's stabilizer through this channel,
    // whichever engine mode produced it.
    let (text_tx, text_rx) = mpsc::channel(100);
    let engine = engine::from_config(&cfg.engine, text_tx)?;

    let session = Arc::new(RecordingSession::new(
        SessionConfig::from_config(&cfg),
        engine,
        text_rx,
        Arc::clone(&relay),
    ));

    let addr = format!("{}:{}", cfg.service.http.bind, cfg.service.http.port);
    let state = AppState::new(Arc::new(cfg), session, relay);
    let app = create_router(state);

    info!("HTTP server listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
