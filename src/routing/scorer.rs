//! Weighted agent scoring and exclusion.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;

use super::{
    HealthState, RoutingConfig, ScoreBreakdown, ScoredAgent, REASON_CONTEXT, REASON_ERROR,
    REASON_GENERATING, REASON_RATE_LIMITED, REASON_THINKING, REASON_UNHEALTHY,
};
use crate::activity::{ActivityMonitor, AgentActivity, AgentState};
use crate::clock::{elapsed_between, Clock};
use crate::tmux::canonical_agent_type;
use crate::{zlog_debug, zlog_warn};

/// A pane to be scored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentPane {
    pub pane_id: String,
    pub pane_index: usize,
    /// Agent type as written in the pane title (`cc`, `cod`, ...).
    pub agent_type: String,
}

impl AgentPane {
    pub fn new(pane_id: impl Into<String>, pane_index: usize, agent_type: impl Into<String>) -> Self {
        Self {
            pane_id: pane_id.into(),
            pane_index,
            agent_type: agent_type.into(),
        }
    }
}

/// Raw desirability of a state, from -100 (error) to 100 (waiting).
pub fn raw_state_score(state: AgentState) -> f64 {
    match state {
        AgentState::Waiting => 100.0,
        AgentState::Thinking => 50.0,
        AgentState::Unknown => 25.0,
        AgentState::Generating => 0.0,
        AgentState::Stalled => -50.0,
        AgentState::Error => -100.0,
    }
}

/// Score for how long ago an agent last produced output.
///
/// Very recent output means the agent is busy; a long silence means it is
/// ready, with a small penalty past 30 minutes for possible staleness.
pub fn recency_score(last_activity: Option<DateTime<Utc>>, now: DateTime<Utc>) -> f64 {
    let Some(at) = last_activity else {
        return 50.0;
    };
    let age = elapsed_between(at, now);
    if age < Duration::from_secs(60) {
        20.0
    } else if age < Duration::from_secs(5 * 60) {
        50.0
    } else if age < Duration::from_secs(30 * 60) {
        80.0
    } else {
        70.0
    }
}

pub fn derive_health_state(state: AgentState) -> HealthState {
    match state {
        AgentState::Stalled => HealthState::Degraded,
        AgentState::Error => HealthState::Unhealthy,
        AgentState::Waiting
        | AgentState::Thinking
        | AgentState::Generating
        | AgentState::Unknown => HealthState::Healthy,
    }
}

/// Sum of weighted contributions plus affinity, clamped to [0, 100] and
/// rounded to two decimals.
pub fn calculate_final_score(detail: &ScoreBreakdown) -> f64 {
    let score = detail.context_contrib
        + detail.state_contrib
        + detail.recency_contrib
        + detail.affinity_bonus;
    (score.clamp(0.0, 100.0) * 100.0).round() / 100.0
}

/// First exclusion rule `agent` trips, if any.
pub fn check_exclusion(agent: &ScoredAgent, config: &RoutingConfig) -> Option<&'static str> {
    if agent.state == AgentState::Error {
        return Some(REASON_ERROR);
    }
    if config.exclude_if_rate_limited && agent.rate_limited {
        return Some(REASON_RATE_LIMITED);
    }
    if agent.health_state == HealthState::Unhealthy {
        return Some(REASON_UNHEALTHY);
    }
    if agent.context_usage > config.exclude_context_above {
        return Some(REASON_CONTEXT);
    }
    if config.exclude_if_generating && agent.state == AgentState::Generating {
        return Some(REASON_GENERATING);
    }
    if config.exclude_if_thinking && agent.state == AgentState::Thinking {
        return Some(REASON_THINKING);
    }
    None
}

/// Scores agents from their classified activity.
pub struct AgentScorer {
    config: RoutingConfig,
    monitor: Arc<ActivityMonitor>,
    clock: Arc<dyn Clock>,
}

impl AgentScorer {
    pub fn new(config: RoutingConfig, monitor: Arc<ActivityMonitor>) -> Self {
        let clock = Arc::clone(monitor.clock());
        Self {
            config,
            monitor,
            clock,
        }
    }

    pub fn config(&self) -> &RoutingConfig {
        &self.config
    }

    pub fn monitor(&self) -> &Arc<ActivityMonitor> {
        &self.monitor
    }

    /// Classify and score each pane.
    ///
    /// `context_usage` maps a pane id to its context window usage (0-100).
    /// Panes that fail to classify are logged and left out.
    pub fn score_agents<F>(&self, panes: &[AgentPane], context_usage: F, prompt: &str) -> Vec<ScoredAgent>
    where
        F: Fn(&str) -> f64,
    {
        let mut scored = Vec::with_capacity(panes.len());
        for pane in panes {
            let classifier = self.monitor.get_or_create(&pane.pane_id);
            classifier.set_agent_type(canonical_agent_type(&pane.agent_type));

            let activity = match classifier.classify() {
                Ok(activity) => activity,
                Err(e) => {
                    zlog_warn!("score_agents: skipping pane {}: {}", pane.pane_id, e);
                    continue;
                }
            };
            scored.push(self.score_activity(pane, &activity, context_usage(&pane.pane_id), prompt));
        }
        scored
    }

    /// Score one already-classified pane.
    pub fn score_activity(
        &self,
        pane: &AgentPane,
        activity: &AgentActivity,
        context_usage: f64,
        prompt: &str,
    ) -> ScoredAgent {
        let mut agent = ScoredAgent {
            pane_id: pane.pane_id.clone(),
            agent_type: pane.agent_type.clone(),
            pane_index: pane.pane_index,
            state: activity.state,
            confidence: activity.confidence,
            velocity: activity.velocity,
            context_usage,
            last_activity: activity.last_output,
            health_state: derive_health_state(activity.state),
            rate_limited: activity.is_rate_limited(),
            score: 0.0,
            excluded: false,
            exclude_reason: None,
            score_detail: ScoreBreakdown::default(),
        };
        agent.score_detail = self.breakdown(&agent, prompt);

        match check_exclusion(&agent, &self.config) {
            Some(reason) => {
                zlog_debug!("pane {} excluded: {}", agent.pane_id, reason);
                agent.excluded = true;
                agent.exclude_reason = Some(reason.to_string());
            }
            None => agent.score = calculate_final_score(&agent.score_detail),
        }
        agent
    }

    fn breakdown(&self, agent: &ScoredAgent, prompt: &str) -> ScoreBreakdown {
        let context_score = (100.0 - agent.context_usage).clamp(0.0, 100.0);
        let state_score = (raw_state_score(agent.state) + 100.0) / 2.0;
        let recency = recency_score(agent.last_activity, self.clock.now());
        let affinity_bonus = if self.config.affinity_enabled && !prompt.is_empty() {
            self.affinity(&agent.agent_type, prompt)
        } else {
            0.0
        };

        ScoreBreakdown {
            context_score,
            state_score,
            recency_score: recency,
            affinity_bonus,
            context_contrib: context_score * self.config.context_weight,
            state_contrib: state_score * self.config.state_weight,
            recency_contrib: recency * self.config.recency_weight,
        }
    }

    /// Full bonus when the prompt names the agent, by full name or alias.
    fn affinity(&self, agent_type: &str, prompt: &str) -> f64 {
        let wanted = canonical_agent_type(agent_type);
        let mentioned = prompt
            .split(|c: char| !c.is_alphanumeric())
            .filter(|word| !word.is_empty())
            .any(|word| canonical_agent_type(word) == wanted);
        if mentioned {
            self.config.affinity_bonus.clamp(0.0, super::MAX_AFFINITY_BONUS)
        } else {
            0.0
        }
    }
}
