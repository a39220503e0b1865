//! Built-in selection strategies.
//!
//! Each strategy looks at a list of scored agents and returns the index of
//! its pick. Built-ins are dispatched by [`StrategyName`]; callers can add
//! their own through [`RoutingStrategy`].

use serde::{Deserialize, Serialize};

use super::ScoredAgent;
use crate::activity::AgentState;
use crate::Error;

/// Picks an index in `0..n`. Only called with `n > 0`.
pub type RandomSource = Box<dyn FnMut(usize) -> usize + Send>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum StrategyName {
    /// Highest score among non-excluded agents.
    #[default]
    LeastLoaded,
    /// First non-excluded WAITING agent in list order.
    FirstAvailable,
    /// Next agent in rotation, excluded or not.
    RoundRobin,
    /// Next non-excluded agent in rotation.
    RoundRobinAvailable,
    Random,
    /// The last-used agent if still eligible, else least-loaded.
    Sticky,
    /// The agent at the requested pane index, excluded or not.
    Explicit,
}

impl StrategyName {
    pub const ALL: [StrategyName; 7] = [
        StrategyName::LeastLoaded,
        StrategyName::FirstAvailable,
        StrategyName::RoundRobin,
        StrategyName::RoundRobinAvailable,
        StrategyName::Random,
        StrategyName::Sticky,
        StrategyName::Explicit,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            StrategyName::LeastLoaded => "least-loaded",
            StrategyName::FirstAvailable => "first-available",
            StrategyName::RoundRobin => "round-robin",
            StrategyName::RoundRobinAvailable => "round-robin-available",
            StrategyName::Random => "random",
            StrategyName::Sticky => "sticky",
            StrategyName::Explicit => "explicit",
        }
    }
}

impl std::fmt::Display for StrategyName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for StrategyName {
    type Err = Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let wanted = s.trim();
        StrategyName::ALL
            .into_iter()
            .find(|name| name.as_str().eq_ignore_ascii_case(wanted))
            .ok_or_else(|| Error::InvalidStrategy(s.to_string()))
    }
}

/// Request-scoped routing hints.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoutingContext {
    /// Prompt text, used for affinity.
    #[serde(default)]
    pub prompt: String,
    /// Pane id of the previously used agent, for sticky routing.
    #[serde(default)]
    pub last_agent: Option<String>,
    /// Pane indices removed before any strategy runs.
    #[serde(default)]
    pub exclude_panes: Vec<usize>,
    /// Target pane index for explicit routing.
    #[serde(default)]
    pub explicit_pane: Option<usize>,
}

/// A caller-supplied strategy.
pub trait RoutingStrategy: Send {
    fn name(&self) -> &str;

    /// Index into `agents` of the chosen agent, or `None`.
    fn select(&mut self, agents: &[ScoredAgent], ctx: &RoutingContext) -> Option<usize>;
}

pub(super) fn least_loaded(agents: &[ScoredAgent]) -> Option<usize> {
    let mut best: Option<usize> = None;
    for (i, agent) in agents.iter().enumerate() {
        if agent.excluded {
            continue;
        }
        match best {
            Some(b) if agents[b].score >= agent.score => {}
            _ => best = Some(i),
        }
    }
    best
}

pub(super) fn first_available(agents: &[ScoredAgent]) -> Option<usize> {
    agents
        .iter()
        .position(|a| !a.excluded && a.state == AgentState::Waiting)
}

/// Advance `cursor` to the next agent regardless of exclusion. The cursor
/// starts at 0, so the first pick is index 1.
pub(super) fn round_robin(cursor: &mut usize, agents: &[ScoredAgent]) -> Option<usize> {
    if agents.is_empty() {
        return None;
    }
    let next = (*cursor + 1) % agents.len();
    *cursor = next;
    Some(next)
}

/// Advance `cursor` to the next non-excluded agent, wrapping around once.
pub(super) fn round_robin_available(cursor: &mut usize, agents: &[ScoredAgent]) -> Option<usize> {
    let len = agents.len();
    let pick = (0..len)
        .map(|i| (*cursor + 1 + i) % len)
        .find(|&idx| !agents[idx].excluded)?;
    *cursor = pick;
    Some(pick)
}

pub(super) fn random(agents: &[ScoredAgent], source: &mut RandomSource) -> Option<usize> {
    let available: Vec<usize> = agents
        .iter()
        .enumerate()
        .filter(|(_, a)| !a.excluded)
        .map(|(i, _)| i)
        .collect();
    if available.is_empty() {
        return None;
    }
    let pick = source(available.len()).min(available.len() - 1);
    Some(available[pick])
}

pub(super) fn sticky(agents: &[ScoredAgent], ctx: &RoutingContext) -> Option<usize> {
    if let Some(last) = ctx.last_agent.as_deref().filter(|l| !l.is_empty()) {
        if let Some(i) = agents
            .iter()
            .position(|a| a.pane_id == last && !a.excluded)
        {
            return Some(i);
        }
    }
    least_loaded(agents)
}

pub(super) fn explicit(agents: &[ScoredAgent], ctx: &RoutingContext) -> Option<usize> {
    let target = ctx.explicit_pane?;
    agents.iter().position(|a| a.pane_index == target)
}
