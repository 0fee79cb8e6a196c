//! Segment stabilization: deciding when noisy raw engine output becomes a
//! finalized transcript segment.

use once_cell::sync::Lazy;
use regex::Regex;
use tracing::debug;

/// Marker the engine emits when recognition has just started listening.
const START_MARKER: &str = "[Start speaking]";

/// Marker the engine emits for a step window containing no speech.
const BLANK_MARKER: &str = "[BLANK_AUDIO]";

static ANSI_ESCAPES: Lazy<Regex> = Lazy::new(|| Regex::new(r"\x1b\[[0-9;]*[a-zA-Z]").unwrap());
static PARENTHETICALS: Lazy<Regex> = Lazy::new(|| Regex::new(r"\([^)]*\)").unwrap());
static WHITESPACE_RUNS: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").unwrap());

/// Normalize one raw engine transcript: strip ANSI escape sequences and
/// control characters, drop parenthetical annotations ("(wind blowing)"),
/// collapse whitespace, trim.
pub fn normalize(raw: &str) -> String {
    let text = ANSI_ESCAPES.replace_all(raw, "");
    let text: String = text.chars().filter(|c| !c.is_control()).collect();
    let text = PARENTHETICALS.replace_all(&text, "");
    let text = WHITESPACE_RUNS.replace_all(&text, " ");
    text.trim().to_string()
}

/// What the stabilizer decided about one raw observation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StabilizerEvent {
    /// Recognition-start marker or duplicate noise; nothing changed.
    Ignored,
    /// The candidate changed; show it as the live (unfinalized) transcript.
    LiveUpdate(String),
    /// The candidate is complete; persist it as a segment and reset the
    /// audio buffer.
    Finalize(String),
}

/// State machine turning raw engine observations into finalize decisions.
///
/// Two triggers finalize a candidate:
/// - a blank/no-speech observation while a distinct non-empty candidate is
///   held (streaming engines mark end-of-utterance this way), and
/// - an observation exactly equal to the current candidate (a growing buffer
///   resubmitted whole transcribing identically twice means no new speech
///   arrived).
///
/// An empty candidate is never finalized, and equality with the previously
/// *finalized* text alone never finalizes again.
pub struct Stabilizer {
    candidate: String,
    last_finalized: Option<String>,
}

impl Stabilizer {
    pub fn new() -> Self {
        Self {
            candidate: String::new(),
            last_finalized: None,
        }
    }

    /// Current unfinalized candidate text (empty when idle).
    pub fn candidate(&self) -> &str {
        &self.candidate
    }

    /// Feed one raw engine transcript through the state machine.
    pub fn observe(&mut self, raw: &str) -> StabilizerEvent {
        let text = normalize(raw);

        if text.contains(START_MARKER) {
            return StabilizerEvent::Ignored;
        }

        let is_blank = text.is_empty() || text.contains(BLANK_MARKER);

        if is_blank {
            if !self.candidate.is_empty()
                && self.last_finalized.as_deref() != Some(self.candidate.as_str())
            {
                return StabilizerEvent::Finalize(self.take_candidate());
            }
            return StabilizerEvent::Ignored;
        }

        if text == self.candidate
            && self.last_finalized.as_deref() != Some(self.candidate.as_str())
        {
            // The engine reproduced identical output against an unchanged
            // growing buffer: no new speech, the segment is complete.
            return StabilizerEvent::Finalize(self.take_candidate());
        }

        if text == self.candidate {
            return StabilizerEvent::Ignored;
        }

        debug!("Candidate updated: {:?}", text);
        self.candidate = text.clone();
        StabilizerEvent::LiveUpdate(text)
    }

    /// Flush the candidate at session stop. Returns the text to persist, or
    /// None when there is nothing pending (or it was already finalized).
    pub fn flush(&mut self) -> Option<String> {
        if self.candidate.is_empty()
            || self.last_finalized.as_deref() == Some(self.candidate.as_str())
        {
            self.candidate.clear();
            return None;
        }
        Some(self.take_candidate())
    }

    /// Roll back a finalize whose persist failed, so the text is not lost:
    /// the candidate is restored and may finalize again later.
    pub fn restore_candidate(&mut self, text: String) {
        if self.last_finalized.as_deref() == Some(text.as_str()) {
            self.last_finalized = None;
        }
        self.candidate = text;
    }

    fn take_candidate(&mut self) -> String {
        let text = std::mem::take(&mut self.candidate);
        self.last_finalized = Some(text.clone());
        text
    }
}

impl Default for Stabilizer {
    fn default() -> Self {
        Self::new()
    }
}
