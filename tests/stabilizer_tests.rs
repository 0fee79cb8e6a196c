// Unit tests for segment stabilization
//
// These tests verify the state machine that turns noisy raw engine output
// into finalized segments: normalization, marker handling, and the two
// finalize triggers (blank observation and exact repetition).

use note_scribe::stabilizer::{normalize, Stabilizer, StabilizerEvent};

#[test]
fn test_normalize_strips_ansi_and_control_sequences() {
    let raw = "\u{1b}[2K\u{1b}[1mHello\u{1b}[0m world\r";
    assert_eq!(normalize(raw), "Hello world");
}

#[test]
fn test_normalize_removes_parenthetical_annotations() {
    assert_eq!(normalize("Hello (wind blowing) world"), "Hello world");
    assert_eq!(normalize("(music)"), "");
}

#[test]
fn test_normalize_collapses_whitespace() {
    assert_eq!(normalize("  Hello \t  world \n"), "Hello world");
}

#[test]
fn test_start_marker_is_ignored() {
    let mut stabilizer = Stabilizer::new();
    assert_eq!(
        stabilizer.observe("[Start speaking]"),
        StabilizerEvent::Ignored
    );
    assert_eq!(stabilizer.candidate(), "");
}

#[test]
fn test_new_text_becomes_live_candidate() {
    let mut stabilizer = Stabilizer::new();
    assert_eq!(
        stabilizer.observe("Hello"),
        StabilizerEvent::LiveUpdate("Hello".to_string())
    );
    assert_eq!(stabilizer.candidate(), "Hello");
}

#[test]
fn test_growing_buffer_scenario_finalizes_on_exact_repeat() {
    // Scenario A: the buffer grows and is resubmitted whole; identical
    // output twice in a row proves no new speech arrived.
    let mut stabilizer = Stabilizer::new();

    assert_eq!(
        stabilizer.observe("Hello wor"),
        StabilizerEvent::LiveUpdate("Hello wor".to_string())
    );
    assert_eq!(
        stabilizer.observe("Hello world"),
        StabilizerEvent::LiveUpdate("Hello world".to_string())
    );
    assert_eq!(
        stabilizer.observe("Hello world"),
        StabilizerEvent::Finalize("Hello world".to_string())
    );
    assert_eq!(stabilizer.candidate(), "", "Candidate cleared on finalize");
}

#[test]
fn test_streaming_scenario_finalizes_on_blank_marker() {
    // Scenario B: a streaming engine marks end-of-utterance explicitly.
    let mut stabilizer = Stabilizer::new();

    stabilizer.observe("foo");
    stabilizer.observe("foo bar");
    assert_eq!(
        stabilizer.observe("[BLANK_AUDIO]"),
        StabilizerEvent::Finalize("foo bar".to_string())
    );
}

#[test]
fn test_empty_observation_finalizes_candidate() {
    let mut stabilizer = Stabilizer::new();
    stabilizer.observe("foo bar");
    assert_eq!(
        stabilizer.observe(""),
        StabilizerEvent::Finalize("foo bar".to_string())
    );
}

#[test]
fn test_blank_with_no_candidate_is_ignored() {
    let mut stabilizer = Stabilizer::new();
    assert_eq!(stabilizer.observe("[BLANK_AUDIO]"), StabilizerEvent::Ignored);
    assert_eq!(stabilizer.observe(""), StabilizerEvent::Ignored);
}

#[test]
fn test_never_finalizes_empty_candidate() {
    let mut stabilizer = Stabilizer::new();
    // A parenthetical-only observation normalizes to empty; with no
    // candidate there is nothing to finalize.
    assert_eq!(stabilizer.observe("(typing)"), StabilizerEvent::Ignored);
}

#[test]
fn test_no_duplicate_finalize_on_previously_finalized_text() {
    let mut stabilizer = Stabilizer::new();

    stabilizer.observe("Hello world");
    assert_eq!(
        stabilizer.observe("Hello world"),
        StabilizerEvent::Finalize("Hello world".to_string())
    );

    // The engine echoes the already-finalized text again: it may become a
    // live candidate, but repetition must not finalize a duplicate.
    assert_eq!(
        stabilizer.observe("Hello world"),
        StabilizerEvent::LiveUpdate("Hello world".to_string())
    );
    assert_eq!(stabilizer.observe("Hello world"), StabilizerEvent::Ignored);
    assert_eq!(stabilizer.observe("[BLANK_AUDIO]"), StabilizerEvent::Ignored);
}

#[test]
fn test_distinct_text_after_finalize_starts_new_segment() {
    let mut stabilizer = Stabilizer::new();

    stabilizer.observe("first segment");
    stabilizer.observe("first segment");

    stabilizer.observe("second");
    assert_eq!(
        stabilizer.observe("second"),
        StabilizerEvent::Finalize("second".to_string())
    );
}

#[test]
fn test_flush_returns_pending_candidate_once() {
    let mut stabilizer = Stabilizer::new();
    stabilizer.observe("partial text");

    assert_eq!(stabilizer.flush(), Some("partial text".to_string()));
    assert_eq!(stabilizer.flush(), None, "Second flush has nothing pending");
}

#[test]
fn test_flush_with_no_candidate_returns_none() {
    let mut stabilizer = Stabilizer::new();
    assert_eq!(stabilizer.flush(), None);
}

#[test]
fn test_restore_candidate_allows_refinalize_after_failed_persist() {
    let mut stabilizer = Stabilizer::new();

    stabilizer.observe("important words");
    let finalized = match stabilizer.observe("important words") {
        StabilizerEvent::Finalize(text) => text,
        other => panic!("Expected finalize, got {:?}", other),
    };

    // Persist failed: the candidate goes back and may finalize again.
    stabilizer.restore_candidate(finalized);
    assert_eq!(stabilizer.candidate(), "important words");
    assert_eq!(
        stabilizer.observe("important words"),
        StabilizerEvent::Finalize("important words".to_string())
    );
}
