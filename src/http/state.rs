use std::sync::Arc;
use tokio::sync::watch;

use crate::config::Config;
use crate::session::{LiveUpdate, RecordingSession};
use crate::transcript::TranscriptRelay;

/// Shared application state for HTTP handlers
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,

    /// The service's single recording session
    pub session: Arc<RecordingSession>,

    /// Segment persistence and ordered reads
    pub relay: Arc<TranscriptRelay>,

    /// Live (unfinalized) candidate feed
    pub live: watch::Receiver<LiveUpdate>,
}

impl AppState {
    pub fn new(
        config: Arc<Config>,
        session: Arc<RecordingSession>,
        relay: Arc<TranscriptRelay>,
    ) -> Self {
        let live = session.live_updates();
        Self {
            config,
            session,
            relay,
            live,
        }
    }
}
