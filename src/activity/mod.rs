//! Activity classification for agent panes.
//!
//! Raw pane text flows through three stages:
//! - [`VelocityTracker`] turns successive captures into output-rate samples
//! - [`PatternLibrary`] extracts categorized signals (prompts, errors, spinners)
//! - [`StateClassifier`] fuses both into a proposed state and runs it through
//!   hysteresis so the reported state doesn't flap between polls
//!
//! [`ActivityMonitor`] keeps one classifier per pane.

mod classifier;
mod monitor;
mod patterns;
mod velocity;

pub use classifier::{classify_state, ClassifierConfig, Proposal, StateClassifier};
pub use monitor::ActivityMonitor;
pub use patterns::{
    default_pattern_specs, Pattern, PatternLibrary, PatternMatch, PatternSpec,
    RATE_LIMIT_PATTERNS,
};
pub use velocity::{VelocitySample, VelocityTracker, DEFAULT_MAX_SAMPLES};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::Error;

/// Velocity above this (chars/sec) is active generation.
pub const VELOCITY_HIGH_THRESHOLD: f64 = 10.0;
/// Velocity above this (chars/sec) is some generation.
pub const VELOCITY_MEDIUM_THRESHOLD: f64 = 2.0;
/// Velocity below this (chars/sec) counts as idle when a prompt is visible.
pub const VELOCITY_IDLE_THRESHOLD: f64 = 1.0;
/// Transitions kept per classifier.
pub const MAX_STATE_HISTORY: usize = 20;

/// Discrete state of an agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AgentState {
    /// Actively producing output.
    Generating,
    /// Idle and ready for input.
    Waiting,
    /// Processing, showing a thinking indicator.
    Thinking,
    Error,
    /// No output where output was expected.
    Stalled,
    #[default]
    Unknown,
}

impl AgentState {
    pub const ALL: [AgentState; 6] = [
        AgentState::Generating,
        AgentState::Waiting,
        AgentState::Thinking,
        AgentState::Error,
        AgentState::Stalled,
        AgentState::Unknown,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            AgentState::Generating => "GENERATING",
            AgentState::Waiting => "WAITING",
            AgentState::Thinking => "THINKING",
            AgentState::Error => "ERROR",
            AgentState::Stalled => "STALLED",
            AgentState::Unknown => "UNKNOWN",
        }
    }
}

impl std::fmt::Display for AgentState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for AgentState {
    type Err = Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let upper = s.trim().to_ascii_uppercase();
        AgentState::ALL
            .into_iter()
            .find(|state| state.as_str() == upper)
            .ok_or_else(|| Error::InvalidState(s.to_string()))
    }
}

/// What kind of signal a pattern detects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PatternCategory {
    Idle,
    Error,
    Thinking,
    Completion,
}

impl PatternCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            PatternCategory::Idle => "idle",
            PatternCategory::Error => "error",
            PatternCategory::Thinking => "thinking",
            PatternCategory::Completion => "completion",
        }
    }
}

impl std::fmt::Display for PatternCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for PatternCategory {
    type Err = Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "idle" => Ok(PatternCategory::Idle),
            "error" => Ok(PatternCategory::Error),
            "thinking" => Ok(PatternCategory::Thinking),
            "completion" => Ok(PatternCategory::Completion),
            _ => Err(Error::InvalidCategory(s.to_string())),
        }
    }
}

/// A committed state change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateTransition {
    pub from: AgentState,
    pub to: AgentState,
    pub at: DateTime<Utc>,
    pub confidence: f64,
    /// What caused the transition, e.g. `error_pattern:http_429`.
    pub trigger: String,
}

/// Point-in-time classification result for one pane.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AgentActivity {
    pub pane_id: String,
    pub agent_type: String,
    pub state: AgentState,
    /// Confidence of this poll's proposal, in [0, 1].
    pub confidence: f64,
    /// Chars/sec measured by this poll.
    pub velocity: f64,
    pub state_since: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub detected_patterns: Vec<String>,
    /// Time of the most recent sample that added output.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_output: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub state_history: Vec<StateTransition>,
}

impl AgentActivity {
    /// Whether any detected pattern is a rate-limit signal.
    pub fn is_rate_limited(&self) -> bool {
        self.detected_patterns
            .iter()
            .any(|p| RATE_LIMIT_PATTERNS.contains(&p.as_str()))
    }
}
