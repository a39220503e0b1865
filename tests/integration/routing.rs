//! Scoring classified panes and routing between them.

use std::sync::Arc;

use drover::activity::AgentState;
use drover::routing::{
    AgentPane, AgentScorer, Router, RoutingConfig, RoutingContext, RoutingStrategy, ScoredAgent,
    REASON_CONTEXT, REASON_ERROR, REASON_GENERATING, REASON_THINKING,
};

use crate::fixtures::{clock, monitor, output, scored, secs, ScriptedCapture};

fn panes() -> Vec<AgentPane> {
    vec![
        AgentPane::new("%1", 0, "cc"),
        AgentPane::new("%2", 1, "cod"),
        AgentPane::new("%3", 2, "gmi"),
    ]
}

fn find<'a>(agents: &'a [ScoredAgent], pane_id: &str) -> &'a ScoredAgent {
    agents.iter().find(|a| a.pane_id == pane_id).unwrap()
}

/// Test: Idle agent wins over busy and broken ones
/// Given one waiting, one generating and one erroring pane
/// When they are scored and routed least-loaded
/// Then only the waiting pane is eligible and it is selected
#[test]
fn test_score_and_route_fleet() {
    let capture = ScriptedCapture::new();
    let clock = clock();
    let monitor = monitor(capture.clone(), clock.clone());
    let scorer = AgentScorer::new(RoutingConfig::default(), Arc::clone(&monitor));

    capture.show("%1", "claude> ");
    capture.show("%2", "");
    capture.show("%3", "Error: connection refused");
    let usage = |pane: &str| if pane == "%1" { 20.0 } else { 50.0 };

    scorer.score_agents(&panes(), usage, "");
    clock.advance(secs(1));
    capture.append("%2", &output(100));
    let agents = scorer.score_agents(&panes(), usage, "");

    let idle = find(&agents, "%1");
    assert_eq!(idle.state, AgentState::Waiting);
    assert!(!idle.excluded);
    // 80 free context * 0.4 + state 100 * 0.4 + recent output 20 * 0.2
    assert_eq!(idle.score, 76.0);

    let busy = find(&agents, "%2");
    assert_eq!(busy.state, AgentState::Generating);
    assert_eq!(busy.exclude_reason.as_deref(), Some(REASON_GENERATING));
    assert_eq!(busy.score, 0.0);

    let broken = find(&agents, "%3");
    assert_eq!(broken.exclude_reason.as_deref(), Some(REASON_ERROR));

    let mut router = Router::new();
    let result = router.route(&agents, "least-loaded", &RoutingContext::default());
    assert_eq!(result.selected.unwrap().pane_id, "%1");
    assert!(!result.fallback_used);
    assert_eq!(result.candidates.len(), 1);
    assert_eq!(result.excluded.len(), 2);
}

/// Test: Thinking agents come back only under relaxation
/// Given exclude_if_thinking and a fleet that is thinking or generating
/// When routing strictly, nothing is selected
/// Then relaxed routing picks the thinking agent, never the generating one
#[test]
fn test_relaxation_end_to_end() {
    let capture = ScriptedCapture::new();
    let clock = clock();
    let monitor = monitor(capture.clone(), clock.clone());
    let config = RoutingConfig {
        exclude_if_thinking: true,
        ..Default::default()
    };
    let scorer = AgentScorer::new(config, Arc::clone(&monitor));
    let all = panes();
    let fleet = &all[..2];

    capture.show("%1", "Thinking...");
    capture.show("%2", "");
    scorer.score_agents(fleet, |_| 0.0, "");
    clock.advance(secs(1));
    capture.append("%2", &output(100));
    let agents = scorer.score_agents(fleet, |_| 0.0, "");

    assert_eq!(find(&agents, "%1").exclude_reason.as_deref(), Some(REASON_THINKING));
    assert_eq!(find(&agents, "%2").exclude_reason.as_deref(), Some(REASON_GENERATING));

    let mut router = Router::new();
    let strict = router.route(&agents, "least-loaded", &RoutingContext::default());
    assert!(strict.selected.is_none());

    let relaxed = router.route_with_relaxation(&agents, "least-loaded", &RoutingContext::default());
    let selected = relaxed.selected.unwrap();
    assert_eq!(selected.pane_id, "%1");
    // 100 free context * 0.4 + state 75 * 0.4 + recent output 20 * 0.2
    assert_eq!(selected.score, 74.0);
    assert_eq!(relaxed.reason, "relaxed constraints (included THINKING)");
}

#[test]
fn test_context_threshold_excludes() {
    let capture = ScriptedCapture::new();
    let monitor = monitor(capture.clone(), clock());
    let scorer = AgentScorer::new(RoutingConfig::default(), Arc::clone(&monitor));

    capture.show("%1", "claude> ");
    capture.show("%2", "codex> ");
    let agents = scorer.score_agents(
        &panes()[..2],
        |pane| if pane == "%1" { 90.0 } else { 10.0 },
        "",
    );

    assert_eq!(find(&agents, "%1").exclude_reason.as_deref(), Some(REASON_CONTEXT));
    let result = Router::new().route(&agents, "first-available", &RoutingContext::default());
    assert_eq!(result.selected.unwrap().pane_id, "%2");
}

#[test]
fn test_affinity_breaks_tie() {
    let capture = ScriptedCapture::new();
    let monitor = monitor(capture.clone(), clock());
    let config = RoutingConfig {
        affinity_enabled: true,
        ..Default::default()
    };
    let scorer = AgentScorer::new(config, Arc::clone(&monitor));

    capture.show("%1", "claude> ");
    capture.show("%2", "codex> ");
    let prompt = "ask codex to fix the build";
    let agents = scorer.score_agents(&panes()[..2], |_| 0.0, prompt);

    assert_eq!(find(&agents, "%2").score_detail.affinity_bonus, 20.0);
    assert_eq!(find(&agents, "%1").score_detail.affinity_bonus, 0.0);

    let result = Router::new().route(
        &agents,
        "least-loaded",
        &RoutingContext {
            prompt: prompt.to_string(),
            ..Default::default()
        },
    );
    assert_eq!(result.selected.unwrap().pane_id, "%2");
}

/// Test: Whole fleet busy
/// Given every agent GENERATING and excluded
/// When first-available is requested
/// Then the least-loaded fallback also finds nothing
#[test]
fn test_all_generating_yields_nothing() {
    let agents = vec![
        scored(0, AgentState::Generating, 0.0, true),
        scored(1, AgentState::Generating, 0.0, true),
        scored(2, AgentState::Generating, 0.0, true),
    ];

    let result = Router::new().route(&agents, "first-available", &RoutingContext::default());

    assert!(result.selected.is_none());
    assert!(!result.fallback_used);
    assert_eq!(result.reason, "no suitable agent found");
    assert!(result.candidates.is_empty());
    assert_eq!(result.excluded.len(), 3);
}

#[test]
fn test_sticky_follows_last_agent() {
    let agents = vec![
        scored(0, AgentState::Waiting, 90.0, false),
        scored(1, AgentState::Waiting, 60.0, false),
    ];
    let mut router = Router::new();

    let first = router.route(&agents, "sticky", &RoutingContext::default());
    let chosen = first.selected.unwrap().pane_id;
    assert_eq!(chosen, "%0");

    let ctx = RoutingContext {
        last_agent: Some("%1".to_string()),
        ..Default::default()
    };
    let again = router.route(&agents, "sticky", &ctx);
    assert_eq!(again.selected.unwrap().pane_id, "%1");
}

#[test]
fn test_round_robin_available_rotates_over_eligible() {
    let agents = vec![
        scored(0, AgentState::Waiting, 10.0, false),
        scored(1, AgentState::Generating, 0.0, true),
        scored(2, AgentState::Waiting, 10.0, false),
        scored(3, AgentState::Waiting, 10.0, false),
    ];
    let mut router = Router::new();
    let ctx = RoutingContext::default();

    let picks: Vec<usize> = (0..5)
        .map(|_| {
            router
                .route(&agents, "round-robin-available", &ctx)
                .selected
                .unwrap()
                .pane_index
        })
        .collect();

    assert_eq!(picks, vec![2, 3, 0, 2, 3]);
}

/// Test: Round-robin order across a fleet
/// Given three agents and a fresh router
/// When round-robin is routed three times
/// Then the rotation starts after the first agent and wraps to it last
#[test]
fn test_round_robin_starts_after_first_agent() {
    let agents: Vec<ScoredAgent> = (1..=3)
        .map(|i| {
            let mut agent = scored(i, AgentState::Waiting, 50.0, false);
            agent.pane_id = format!("cc_{}", i);
            agent
        })
        .collect();
    let mut router = Router::new();
    let ctx = RoutingContext::default();

    let picks: Vec<String> = (0..3)
        .map(|_| router.route(&agents, "round-robin", &ctx).selected.unwrap().pane_id)
        .collect();

    assert_eq!(picks, vec!["cc_2", "cc_3", "cc_1"]);
}

#[test]
fn test_explicit_selects_excluded_pane() {
    let agents = vec![
        scored(0, AgentState::Waiting, 90.0, false),
        scored(5, AgentState::Generating, 0.0, true),
    ];
    let ctx = RoutingContext {
        explicit_pane: Some(5),
        ..Default::default()
    };

    let result = Router::new().route(&agents, "explicit", &ctx);

    let selected = result.selected.unwrap();
    assert_eq!(selected.pane_index, 5);
    assert!(selected.excluded);
    assert!(!result.fallback_used);
}

/// Prefers the lowest context usage, ignoring scores.
struct EmptiestContext;

impl RoutingStrategy for EmptiestContext {
    fn name(&self) -> &str {
        "emptiest-context"
    }

    fn select(&mut self, agents: &[ScoredAgent], _ctx: &RoutingContext) -> Option<usize> {
        agents
            .iter()
            .enumerate()
            .filter(|(_, a)| !a.excluded)
            .min_by(|(_, a), (_, b)| a.context_usage.total_cmp(&b.context_usage))
            .map(|(i, _)| i)
    }
}

#[test]
fn test_custom_strategy_with_context_exclusions() {
    let mut a = scored(0, AgentState::Waiting, 90.0, false);
    a.context_usage = 70.0;
    let mut b = scored(1, AgentState::Waiting, 40.0, false);
    b.context_usage = 5.0;
    let mut c = scored(2, AgentState::Waiting, 40.0, false);
    c.context_usage = 30.0;
    let agents = vec![a, b, c];

    let mut router = Router::new();
    router.register_strategy(Box::new(EmptiestContext));

    let result = router.route(&agents, "emptiest-context", &RoutingContext::default());
    assert_eq!(result.selected.unwrap().pane_index, 1);

    // Excluded panes are dropped before the strategy sees the list.
    let ctx = RoutingContext {
        exclude_panes: vec![1],
        ..Default::default()
    };
    let result = router.route(&agents, "emptiest-context", &ctx);
    assert_eq!(result.selected.unwrap().pane_index, 2);
    assert_eq!(result.strategy, "emptiest-context");
}

#[test]
fn test_routing_result_serializes() {
    let agents = vec![scored(0, AgentState::Waiting, 55.5, false)];
    let result = Router::new().route(&agents, "least-loaded", &RoutingContext::default());

    let json = serde_json::to_value(&result).unwrap();
    assert_eq!(json["strategy"], "least-loaded");
    assert_eq!(json["selected"]["state"], "WAITING");
    assert_eq!(json["fallback_used"], false);
}
