//! Agent scoring and selection.
//!
//! [`AgentScorer`] turns classified activity plus context-usage telemetry
//! into [`ScoredAgent`]s: a weighted 0-100 score and an exclusion decision.
//! [`Router`] picks one of them with a named strategy, falling back to a
//! fixed chain when the strategy finds nothing.

mod router;
mod scorer;
mod strategy;

pub use router::{Router, RoutingResult, FALLBACK_CHAIN};
pub use scorer::{
    calculate_final_score, check_exclusion, derive_health_state, raw_state_score,
    recency_score, AgentPane, AgentScorer,
};
pub use strategy::{RandomSource, RoutingContext, RoutingStrategy, StrategyName};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use crate::activity::AgentState;
use crate::{Error, Result};

pub const REASON_ERROR: &str = "agent in ERROR state";
pub const REASON_RATE_LIMITED: &str = "agent is rate limited";
pub const REASON_UNHEALTHY: &str = "agent is unhealthy";
pub const REASON_CONTEXT: &str = "context usage above threshold";
pub const REASON_GENERATING: &str = "agent is currently generating";
pub const REASON_THINKING: &str = "agent is currently thinking";

/// Upper bound for the affinity bonus.
pub const MAX_AFFINITY_BONUS: f64 = 20.0;

/// Scoring weights and exclusion rules.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RoutingConfig {
    pub context_weight: f64,
    pub state_weight: f64,
    pub recency_weight: f64,

    pub affinity_enabled: bool,
    pub affinity_bonus: f64,

    /// Context usage percentage above which an agent is excluded.
    pub exclude_context_above: f64,
    pub exclude_if_generating: bool,
    pub exclude_if_rate_limited: bool,
    /// Off by default. Only this exclusion is lifted by relaxed routing.
    pub exclude_if_thinking: bool,
}

impl Default for RoutingConfig {
    fn default() -> Self {
        Self {
            context_weight: 0.4,
            state_weight: 0.4,
            recency_weight: 0.2,
            affinity_enabled: false,
            affinity_bonus: MAX_AFFINITY_BONUS,
            exclude_context_above: 85.0,
            exclude_if_generating: true,
            exclude_if_rate_limited: true,
            exclude_if_thinking: false,
        }
    }
}

impl RoutingConfig {
    pub fn validate(&self) -> Result<()> {
        let weights = [
            ("context_weight", self.context_weight),
            ("state_weight", self.state_weight),
            ("recency_weight", self.recency_weight),
        ];
        if let Some((name, w)) = weights.iter().find(|(_, w)| !w.is_finite() || *w < 0.0) {
            return Err(Error::Validation(format!(
                "{} must be a non-negative number, got {}",
                name, w
            )));
        }

        let sum: f64 = weights.iter().map(|(_, w)| w).sum();
        if (sum - 1.0).abs() > 1e-6 {
            return Err(Error::Validation(format!(
                "routing weights must sum to 1.0, got {}",
                sum
            )));
        }

        if !(0.0..=MAX_AFFINITY_BONUS).contains(&self.affinity_bonus) {
            return Err(Error::Validation(format!(
                "affinity_bonus must be within 0-{}, got {}",
                MAX_AFFINITY_BONUS, self.affinity_bonus
            )));
        }

        if !(0.0..=100.0).contains(&self.exclude_context_above) {
            return Err(Error::Validation(format!(
                "exclude_context_above must be a percentage, got {}",
                self.exclude_context_above
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum HealthState {
    #[default]
    Healthy,
    Degraded,
    Unhealthy,
}

impl std::fmt::Display for HealthState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HealthState::Healthy => write!(f, "healthy"),
            HealthState::Degraded => write!(f, "degraded"),
            HealthState::Unhealthy => write!(f, "unhealthy"),
        }
    }
}

/// How a score was put together. Kept for excluded agents too.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct ScoreBreakdown {
    /// 0-100, higher means more free context.
    pub context_score: f64,
    /// Raw state desirability mapped onto 0-100.
    pub state_score: f64,
    pub recency_score: f64,
    pub affinity_bonus: f64,

    pub context_contrib: f64,
    pub state_contrib: f64,
    pub recency_contrib: f64,
}

/// An agent with its routing score for one scoring pass.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredAgent {
    pub pane_id: String,
    pub agent_type: String,
    pub pane_index: usize,

    pub state: AgentState,
    pub confidence: f64,
    pub velocity: f64,

    /// Context window usage, 0-100.
    pub context_usage: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_activity: Option<DateTime<Utc>>,

    pub health_state: HealthState,
    pub rate_limited: bool,

    /// Final score in [0, 100]; 0 when excluded.
    pub score: f64,
    pub excluded: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exclude_reason: Option<String>,
    pub score_detail: ScoreBreakdown,
}

impl ScoredAgent {
    /// An unscored, non-excluded agent in `state`.
    pub fn new(
        pane_id: impl Into<String>,
        pane_index: usize,
        agent_type: impl Into<String>,
        state: AgentState,
    ) -> Self {
        Self {
            pane_id: pane_id.into(),
            agent_type: agent_type.into(),
            pane_index,
            state,
            confidence: 0.0,
            velocity: 0.0,
            context_usage: 0.0,
            last_activity: None,
            health_state: derive_health_state(state),
            rate_limited: false,
            score: 0.0,
            excluded: false,
            exclude_reason: None,
            score_detail: ScoreBreakdown::default(),
        }
    }
}

/// Highest-scoring non-excluded agent; the first one wins ties.
pub fn best_agent(agents: &[ScoredAgent]) -> Option<&ScoredAgent> {
    agents
        .iter()
        .filter(|a| !a.excluded)
        .fold(None, |best: Option<&ScoredAgent>, a| match best {
            Some(b) if b.score >= a.score => Some(b),
            _ => Some(a),
        })
}

/// Non-excluded agents, highest score first. Equal scores keep list order.
pub fn available_agents(agents: &[ScoredAgent]) -> Vec<ScoredAgent> {
    let mut available: Vec<ScoredAgent> = agents.iter().filter(|a| !a.excluded).cloned().collect();
    available.sort_by(|a, b| b.score.total_cmp(&a.score));
    available
}

/// Agents of one type, case-insensitively. An empty type keeps everything.
pub fn filter_by_type(agents: &[ScoredAgent], agent_type: &str) -> Vec<ScoredAgent> {
    if agent_type.is_empty() {
        return agents.to_vec();
    }
    agents
        .iter()
        .filter(|a| a.agent_type.eq_ignore_ascii_case(agent_type))
        .cloned()
        .collect()
}

/// Agents at the given pane indices. No indices keeps everything.
pub fn filter_by_panes(agents: &[ScoredAgent], pane_indices: &[usize]) -> Vec<ScoredAgent> {
    if pane_indices.is_empty() {
        return agents.to_vec();
    }
    let wanted: HashSet<usize> = pane_indices.iter().copied().collect();
    agents
        .iter()
        .filter(|a| wanted.contains(&a.pane_index))
        .cloned()
        .collect()
}

/// Agents not at the given pane indices.
pub fn exclude_panes(agents: &[ScoredAgent], pane_indices: &[usize]) -> Vec<ScoredAgent> {
    if pane_indices.is_empty() {
        return agents.to_vec();
    }
    let dropped: HashSet<usize> = pane_indices.iter().copied().collect();
    agents
        .iter()
        .filter(|a| !dropped.contains(&a.pane_index))
        .cloned()
        .collect()
}
