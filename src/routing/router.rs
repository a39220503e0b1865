//! Strategy dispatch with fallback.

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use super::scorer::calculate_final_score;
use super::strategy::{self, RandomSource, RoutingContext, RoutingStrategy, StrategyName};
use super::{exclude_panes, ScoredAgent, REASON_THINKING};
use crate::activity::AgentState;
use crate::zlog_debug;

/// Strategies tried, in order, when the requested one selects nothing.
pub const FALLBACK_CHAIN: [StrategyName; 2] =
    [StrategyName::LeastLoaded, StrategyName::FirstAvailable];

const REASON_PRIMARY: &str = "primary strategy succeeded";
const REASON_NONE: &str = "no suitable agent found";
const REASON_RELAXED: &str = "relaxed constraints (included THINKING)";

/// Outcome of one routing request. Finding no agent is a normal outcome,
/// reported through `selected` and `reason`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoutingResult {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selected: Option<ScoredAgent>,
    /// Strategy that was run as primary.
    pub strategy: String,
    /// Non-excluded agents, as passed in.
    pub candidates: Vec<ScoredAgent>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub excluded: Vec<ScoredAgent>,
    pub fallback_used: bool,
    pub reason: String,
}

/// Selects agents.
///
/// Holds the round-robin cursors, so one router should serve a stream of
/// related requests.
pub struct Router {
    custom: HashMap<String, Box<dyn RoutingStrategy>>,
    round_robin: usize,
    round_robin_available: usize,
    random: RandomSource,
}

impl Default for Router {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Router {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut custom: Vec<&String> = self.custom.keys().collect();
        custom.sort();
        f.debug_struct("Router")
            .field("custom", &custom)
            .field("round_robin", &self.round_robin)
            .field("round_robin_available", &self.round_robin_available)
            .finish_non_exhaustive()
    }
}

enum Resolved {
    Builtin(StrategyName),
    Custom(String),
}

impl Router {
    pub fn new() -> Self {
        Self {
            custom: HashMap::new(),
            round_robin: 0,
            round_robin_available: 0,
            random: Box::new(|n| rand::rng().random_range(0..n)),
        }
    }

    /// Replace the random index source, e.g. with a fixed sequence in tests.
    pub fn with_random_source(mut self, source: impl FnMut(usize) -> usize + Send + 'static) -> Self {
        self.random = Box::new(source);
        self
    }

    /// Register a custom strategy. A custom strategy with a built-in's name
    /// takes its place, both as a primary and in the fallback chain.
    pub fn register_strategy(&mut self, strategy: Box<dyn RoutingStrategy>) {
        let name = strategy.name().to_string();
        zlog_debug!("Router: registered strategy '{}'", name);
        self.custom.insert(name, strategy);
    }

    /// Every strategy name this router accepts.
    pub fn strategy_names(&self) -> Vec<String> {
        let mut names: Vec<String> = StrategyName::ALL.iter().map(|s| s.to_string()).collect();
        let mut custom: Vec<String> = self
            .custom
            .keys()
            .filter(|k| !names.contains(k))
            .cloned()
            .collect();
        custom.sort();
        names.extend(custom);
        names
    }

    pub fn is_valid_strategy(&self, name: &str) -> bool {
        self.custom.contains_key(name) || name.parse::<StrategyName>().is_ok()
    }

    fn resolve(&self, name: &str) -> Resolved {
        if self.custom.contains_key(name) {
            return Resolved::Custom(name.to_string());
        }
        match name.parse::<StrategyName>() {
            Ok(builtin) => Resolved::Builtin(builtin),
            Err(_) => {
                zlog_debug!("Router: unknown strategy '{}', using least-loaded", name);
                Resolved::Builtin(StrategyName::LeastLoaded)
            }
        }
    }

    fn select_builtin(
        &mut self,
        name: StrategyName,
        agents: &[ScoredAgent],
        ctx: &RoutingContext,
    ) -> Option<usize> {
        match name {
            StrategyName::LeastLoaded => strategy::least_loaded(agents),
            StrategyName::FirstAvailable => strategy::first_available(agents),
            StrategyName::RoundRobin => strategy::round_robin(&mut self.round_robin, agents),
            StrategyName::RoundRobinAvailable => {
                strategy::round_robin_available(&mut self.round_robin_available, agents)
            }
            StrategyName::Random => strategy::random(agents, &mut self.random),
            StrategyName::Sticky => strategy::sticky(agents, ctx),
            StrategyName::Explicit => strategy::explicit(agents, ctx),
        }
    }

    fn select(
        &mut self,
        resolved: &Resolved,
        agents: &[ScoredAgent],
        ctx: &RoutingContext,
    ) -> Option<usize> {
        match resolved {
            Resolved::Builtin(name) => self.select_builtin(*name, agents, ctx),
            Resolved::Custom(name) => self
                .custom
                .get_mut(name)
                .and_then(|s| s.select(agents, ctx))
                .filter(|&i| i < agents.len()),
        }
    }

    /// Pick an agent with `strategy`, falling back through
    /// [`FALLBACK_CHAIN`] if it finds none.
    ///
    /// `ctx.exclude_panes` are removed before any strategy runs. Unknown
    /// strategy names run as least-loaded.
    pub fn route(
        &mut self,
        agents: &[ScoredAgent],
        strategy: &str,
        ctx: &RoutingContext,
    ) -> RoutingResult {
        let resolved = self.resolve(strategy);
        let primary = match &resolved {
            Resolved::Builtin(name) => name.to_string(),
            Resolved::Custom(name) => name.clone(),
        };

        let mut result = RoutingResult {
            selected: None,
            strategy: primary.clone(),
            candidates: agents.iter().filter(|a| !a.excluded).cloned().collect(),
            excluded: agents.iter().filter(|a| a.excluded).cloned().collect(),
            fallback_used: false,
            reason: String::new(),
        };

        let pool = exclude_panes(agents, &ctx.exclude_panes);

        if let Some(i) = self.select(&resolved, &pool, ctx) {
            result.selected = Some(pool[i].clone());
            result.reason = REASON_PRIMARY.to_string();
            zlog_debug!("route: {} selected {}", primary, pool[i].pane_id);
            return result;
        }

        for fallback in FALLBACK_CHAIN {
            if fallback.as_str() == primary {
                continue;
            }
            // Overrides registered under a fallback's name apply here too.
            let resolved = self.resolve(fallback.as_str());
            if let Some(i) = self.select(&resolved, &pool, ctx) {
                result.selected = Some(pool[i].clone());
                result.fallback_used = true;
                result.reason = format!("fallback to {}", fallback);
                zlog_debug!(
                    "route: {} found nothing, {} selected {}",
                    primary,
                    fallback,
                    pool[i].pane_id
                );
                return result;
            }
        }

        zlog_debug!("route: {} and fallbacks found nothing", primary);
        result.reason = REASON_NONE.to_string();
        result
    }

    /// [`route`](Self::route), then once more with THINKING agents that were
    /// only excluded for thinking let back in. Other exclusions, GENERATING
    /// included, stay.
    pub fn route_with_relaxation(
        &mut self,
        agents: &[ScoredAgent],
        strategy: &str,
        ctx: &RoutingContext,
    ) -> RoutingResult {
        let result = self.route(agents, strategy, ctx);
        if result.selected.is_some() {
            return result;
        }

        let mut relaxed = agents.to_vec();
        let mut lifted = 0;
        for agent in relaxed.iter_mut() {
            if agent.state == AgentState::Thinking
                && agent.exclude_reason.as_deref() == Some(REASON_THINKING)
            {
                agent.excluded = false;
                agent.exclude_reason = None;
                agent.score = calculate_final_score(&agent.score_detail);
                lifted += 1;
            }
        }
        if lifted == 0 {
            return result;
        }

        zlog_debug!("route: relaxing, {} THINKING agents readmitted", lifted);
        let mut relaxed_result = self.route(&relaxed, strategy, ctx);
        if relaxed_result.selected.is_some() {
            relaxed_result.reason = REASON_RELAXED.to_string();
        }
        relaxed_result
    }
}
