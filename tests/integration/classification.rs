//! Classification across several polls: velocity, patterns and hysteresis
//! working together.

use drover::activity::AgentState;
use drover::clock::Clock;
use drover::Error;

use crate::fixtures::{clock, monitor, output, secs, ScriptedCapture};

/// Test: Generating agent settles at its prompt
/// Given a pane producing 50 chars/s
/// When the output stops and a prompt appears
/// Then the state stays GENERATING until the hold expires, then WAITING
#[test]
fn test_generating_then_waiting_with_hold() {
    let capture = ScriptedCapture::new();
    let clock = clock();
    let monitor = monitor(capture.clone(), clock.clone());

    capture.show("%1", "start\n");
    let first = monitor.classify("%1").unwrap();
    assert_eq!(first.state, AgentState::Unknown);

    for _ in 0..2 {
        clock.advance(secs(1));
        capture.append("%1", &output(50));
        let activity = monitor.classify("%1").unwrap();
        assert_eq!(activity.state, AgentState::Generating);
        assert_eq!(activity.velocity, 50.0);
    }

    // Prompt lands while output is still flowing.
    clock.advance(secs(1));
    capture.append("%1", "\nclaude> ");
    assert_eq!(monitor.classify("%1").unwrap().state, AgentState::Generating);

    // Output stops: WAITING is proposed but has to hold for 2s.
    clock.advance(secs(1));
    let held = monitor.classify("%1").unwrap();
    assert_eq!(held.state, AgentState::Generating);
    assert!(held.detected_patterns.iter().any(|p| p == "claude_prompt"));

    clock.advance(secs(1));
    assert_eq!(monitor.classify("%1").unwrap().state, AgentState::Generating);

    clock.advance(secs(1));
    let settled = monitor.classify("%1").unwrap();
    assert_eq!(settled.state, AgentState::Waiting);
    assert_eq!(settled.state_since, clock.now());

    let history = monitor.get("%1").unwrap().state_history();
    let path: Vec<(AgentState, AgentState)> = history.iter().map(|t| (t.from, t.to)).collect();
    assert_eq!(
        path,
        vec![
            (AgentState::Unknown, AgentState::Generating),
            (AgentState::Generating, AgentState::Waiting),
        ]
    );
    assert_eq!(history[1].trigger, "idle_prompt");
}

/// Test: Errors skip the hold
/// Given a generating pane
/// When a rate-limit message appears
/// Then the very next poll reports ERROR and the activity is rate limited
#[test]
fn test_error_bypasses_hysteresis() {
    let capture = ScriptedCapture::new();
    let clock = clock();
    let monitor = monitor(capture.clone(), clock.clone());

    capture.show("%2", "");
    monitor.classify("%2").unwrap();
    clock.advance(secs(1));
    capture.append("%2", &output(40));
    assert_eq!(monitor.classify("%2").unwrap().state, AgentState::Generating);

    clock.advance(secs(1));
    capture.append("%2", "\nrate limit reached, retry in 60s");
    let activity = monitor.classify("%2").unwrap();

    assert_eq!(activity.state, AgentState::Error);
    assert_eq!(activity.confidence, 0.95);
    assert!(activity.is_rate_limited());
    let last = activity.state_history.last().unwrap();
    assert_eq!(last.trigger, "error_pattern:rate_limit_text");
}

/// Test: Silent generator becomes STALLED
/// Given a pane that was GENERATING
/// When it produces nothing for longer than the stall threshold
/// Then it is STALLED once the hold has passed
#[test]
fn test_stall_after_generating() {
    let capture = ScriptedCapture::new();
    let clock = clock();
    let monitor = monitor(capture.clone(), clock.clone());

    capture.show("%3", "");
    monitor.classify("%3").unwrap();
    clock.advance(secs(1));
    capture.append("%3", &output(200));
    assert_eq!(monitor.classify("%3").unwrap().state, AgentState::Generating);

    clock.advance(secs(40));
    let proposed = monitor.classify("%3").unwrap();
    assert_eq!(proposed.state, AgentState::Generating);
    assert_eq!(
        monitor.get("%3").unwrap().pending_state(),
        Some(AgentState::Stalled)
    );

    clock.advance(secs(3));
    let stalled = monitor.classify("%3").unwrap();
    assert_eq!(stalled.state, AgentState::Stalled);
    assert_eq!(stalled.confidence, 0.75);
}

/// Test: A flicker shorter than the hold is ignored
#[test]
fn test_short_thinking_flicker_ignored() {
    let capture = ScriptedCapture::new();
    let clock = clock();
    let monitor = monitor(capture.clone(), clock.clone());

    capture.show("%4", "claude> ");
    assert_eq!(monitor.classify("%4").unwrap().state, AgentState::Waiting);

    clock.advance(secs(1));
    capture.show("%4", "Thinking...");
    assert_eq!(monitor.classify("%4").unwrap().state, AgentState::Waiting);

    clock.advance(secs(1));
    capture.show("%4", "claude> ");
    assert_eq!(monitor.classify("%4").unwrap().state, AgentState::Waiting);

    clock.advance(secs(5));
    assert_eq!(monitor.classify("%4").unwrap().state, AgentState::Waiting);
    assert_eq!(monitor.get("%4").unwrap().state_history().len(), 1);
}

/// Test: Batch classification keeps going past a dead pane
#[test]
fn test_classify_all_reports_failed_panes() {
    let capture = ScriptedCapture::new();
    let monitor = monitor(capture.clone(), clock());

    capture.show("%1", "claude> ");
    capture.show("%2", "Error: connection refused");
    capture.fail("%3");
    for pane in ["%1", "%2", "%3"] {
        monitor.get_or_create(pane);
    }

    let (activities, errors) = monitor.classify_all();

    assert_eq!(activities["%1"].state, AgentState::Waiting);
    assert_eq!(activities["%2"].state, AgentState::Error);
    assert!(!activities["%2"].is_rate_limited());
    assert!(matches!(errors.get("%3"), Some(Error::Capture { .. })));

    // A failed capture leaves the classifier untouched.
    assert_eq!(monitor.all_states()["%3"], AgentState::Unknown);
}

/// Test: Per-agent patterns only apply to their agent type
#[test]
fn test_agent_type_filters_patterns() {
    let capture = ScriptedCapture::new();
    let monitor = monitor(capture.clone(), clock());

    // gemini_triple_arrow is gemini-only; generic_angle still matches `>`.
    capture.show("%5", ">>>");
    capture.show("%6", ">>>");
    let gemini = monitor.get_or_create_for("%5", "gemini").classify().unwrap();
    let codex = monitor.get_or_create_for("%6", "codex").classify().unwrap();

    assert!(gemini.detected_patterns.iter().any(|p| p == "gemini_triple_arrow"));
    assert!(!codex.detected_patterns.iter().any(|p| p == "gemini_triple_arrow"));
    assert!(codex.detected_patterns.iter().any(|p| p == "generic_angle"));
    assert_eq!(gemini.state, AgentState::Waiting);
    assert_eq!(codex.state, AgentState::Waiting);
}

#[tokio::test]
async fn test_classify_with_timeout_against_scripted_pane() {
    let capture = ScriptedCapture::new();
    let monitor = monitor(capture.clone(), clock());
    capture.show("%1", "Analyzing...");

    let activity = monitor
        .classify_with_timeout("%1", secs(5))
        .await
        .unwrap();

    assert_eq!(activity.state, AgentState::Thinking);
}
