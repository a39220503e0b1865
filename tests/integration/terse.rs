//! Fleet summaries built from live classification.

use drover::activity::AgentState;
use drover::terse::{parse_terse, TerseState};
use drover::Error;

use crate::fixtures::{clock, monitor, output, secs, ScriptedCapture};

/// Test: Summary of a mixed fleet
/// Given panes that are waiting, generating, thinking and erroring
/// When the fleet is summarised
/// Then each state lands in its bucket and the line parses back
#[test]
fn test_summary_from_monitor() {
    let capture = ScriptedCapture::new();
    let clock = clock();
    let monitor = monitor(capture.clone(), clock.clone());

    capture.show("%1", "claude> ");
    capture.show("%2", "");
    capture.show("%3", "Processing...");
    capture.show("%4", "HTTP 429 Too Many Requests");
    for pane in ["%1", "%2", "%3", "%4"] {
        monitor.get_or_create(pane);
    }
    monitor.classify_all();
    clock.advance(secs(1));
    capture.append("%2", &output(300));
    let (activities, errors) = monitor.classify_all();
    assert!(errors.is_empty());
    assert_eq!(activities["%2"].state, AgentState::Generating);

    let state = TerseState::from_activities("proj", activities.values());

    assert_eq!(state.to_string(), "S:proj|A:2/4|W:2|I:1|E:1|C:0%|B:R0/I0/B0|M:0|!:0");
    assert_eq!(parse_terse(&state.to_string()).unwrap(), state);
}

#[test]
fn test_round_trip_preserves_every_field() {
    let states = [
        TerseState::default(),
        TerseState {
            session: "alpha".to_string(),
            active_agents: 12,
            total_agents: 40,
            working_agents: 11,
            idle_agents: 27,
            error_agents: 2,
            context_pct: 100,
            ready_beads: 0,
            blocked_beads: 9,
            in_progress_beads: 4,
            unread_mail: 321,
            critical_alerts: 3,
            warning_alerts: 0,
        },
        TerseState {
            session: "my-proj_2".to_string(),
            critical_alerts: 0,
            warning_alerts: 5,
            ..Default::default()
        },
    ];

    for state in states {
        let line = state.to_string();
        let parsed: TerseState = line.parse().unwrap();
        assert_eq!(parsed, state, "round trip of {}", line);
    }
}

#[test]
fn test_reordered_and_partial_lines() {
    let state = parse_terse("M:4|S:proj|!:2w,1c|B:B1/R3").unwrap();

    assert_eq!(state.session, "proj");
    assert_eq!(state.unread_mail, 4);
    assert_eq!(state.critical_alerts, 1);
    assert_eq!(state.warning_alerts, 2);
    assert_eq!(state.ready_beads, 3);
    assert_eq!(state.blocked_beads, 1);
    assert_eq!(state.in_progress_beads, 0);
}

#[test]
fn test_garbage_counts_rejected() {
    assert!(matches!(
        "S:proj|B:Rx/I2/B1".parse::<TerseState>(),
        Err(Error::InvalidTerse(_))
    ));
    assert!(matches!(parse_terse("!:manyc"), Err(Error::InvalidTerse(_))));
}
