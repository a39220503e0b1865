//! Per-pane state classification with hysteresis.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use super::patterns::{PatternLibrary, PatternMatch};
use super::velocity::{VelocityTracker, DEFAULT_MAX_SAMPLES};
use super::{
    AgentActivity, AgentState, PatternCategory, StateTransition, MAX_STATE_HISTORY,
    VELOCITY_HIGH_THRESHOLD, VELOCITY_IDLE_THRESHOLD, VELOCITY_MEDIUM_THRESHOLD,
};
use crate::clock::{elapsed_between, Clock};
use crate::ring::RingBuffer;
use crate::tmux::PaneCapture;
use crate::{zlog_debug, zlog_warn, Result};

/// Default time without output before an agent is considered idle or stalled.
pub const DEFAULT_STALL_THRESHOLD_SECS: u64 = 30;

/// Default time a proposed state must hold before it is committed.
pub const DEFAULT_HYSTERESIS_MS: u64 = 2000;

/// Classifier tuning. Zero values fall back to the defaults.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassifierConfig {
    /// Agent type used to filter patterns; empty means all patterns.
    pub agent_type: String,
    pub stall_threshold_secs: u64,
    pub hysteresis_ms: u64,
    pub max_samples: usize,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            agent_type: String::new(),
            stall_threshold_secs: DEFAULT_STALL_THRESHOLD_SECS,
            hysteresis_ms: DEFAULT_HYSTERESIS_MS,
            max_samples: DEFAULT_MAX_SAMPLES,
        }
    }
}

impl ClassifierConfig {
    pub fn stall_threshold(&self) -> Duration {
        match self.stall_threshold_secs {
            0 => Duration::from_secs(DEFAULT_STALL_THRESHOLD_SECS),
            secs => Duration::from_secs(secs),
        }
    }

    pub fn hysteresis(&self) -> Duration {
        match self.hysteresis_ms {
            0 => Duration::from_millis(DEFAULT_HYSTERESIS_MS),
            ms => Duration::from_millis(ms),
        }
    }

    pub fn max_samples(&self) -> usize {
        match self.max_samples {
            0 => DEFAULT_MAX_SAMPLES,
            n => n,
        }
    }

    pub fn with_agent_type(mut self, agent_type: impl Into<String>) -> Self {
        self.agent_type = agent_type.into();
        self
    }
}

/// The state a single poll's signals point to, before hysteresis.
#[derive(Debug, Clone, PartialEq)]
pub struct Proposal {
    pub state: AgentState,
    pub confidence: f64,
    pub trigger: String,
}

impl Proposal {
    fn new(state: AgentState, confidence: f64, trigger: impl Into<String>) -> Self {
        Self {
            state,
            confidence,
            trigger: trigger.into(),
        }
    }
}

/// Map one poll's signals to a proposed state. First matching rule wins:
///
/// | rule                                       | state      | confidence |
/// |--------------------------------------------|------------|-----------:|
/// | any error match                            | ERROR      | 0.95       |
/// | idle match and velocity < 1.0              | WAITING    | 0.90       |
/// | any thinking match                         | THINKING   | 0.80       |
/// | velocity > 10.0                            | GENERATING | 0.85       |
/// | velocity > 2.0                             | GENERATING | 0.70       |
/// | no velocity, output older than stall limit | STALLED if currently GENERATING (0.75), else WAITING (0.60) |
/// | otherwise                                  | UNKNOWN    | 0.50       |
pub fn classify_state(
    velocity: f64,
    matches: &[PatternMatch],
    last_output_age: Duration,
    current: AgentState,
    stall_threshold: Duration,
) -> Proposal {
    if let Some(m) = matches
        .iter()
        .find(|m| m.category == PatternCategory::Error)
    {
        return Proposal::new(
            AgentState::Error,
            0.95,
            format!("error_pattern:{}", m.pattern),
        );
    }

    let has_idle_prompt = matches.iter().any(|m| m.category == PatternCategory::Idle);
    if has_idle_prompt && velocity < VELOCITY_IDLE_THRESHOLD {
        return Proposal::new(AgentState::Waiting, 0.90, "idle_prompt");
    }

    if let Some(m) = matches
        .iter()
        .find(|m| m.category == PatternCategory::Thinking)
    {
        return Proposal::new(
            AgentState::Thinking,
            0.80,
            format!("thinking_pattern:{}", m.pattern),
        );
    }

    if velocity > VELOCITY_HIGH_THRESHOLD {
        return Proposal::new(AgentState::Generating, 0.85, "high_velocity");
    }
    if velocity > VELOCITY_MEDIUM_THRESHOLD {
        return Proposal::new(AgentState::Generating, 0.70, "medium_velocity");
    }

    if velocity == 0.0 && last_output_age > stall_threshold {
        if current == AgentState::Generating {
            return Proposal::new(AgentState::Stalled, 0.75, "stalled_after_generating");
        }
        return Proposal::new(AgentState::Waiting, 0.60, "idle_no_output");
    }

    Proposal::new(AgentState::Unknown, 0.50, "insufficient_signals")
}

/// Mutable classifier state, only reachable through the classifier's lock.
#[derive(Debug)]
struct Inner {
    tracker: VelocityTracker,
    agent_type: String,
    current: AgentState,
    state_since: DateTime<Utc>,
    pending: Option<(AgentState, DateTime<Utc>)>,
    history: RingBuffer<StateTransition>,
}

impl Inner {
    fn commit(&mut self, to: AgentState, proposal: &Proposal, now: DateTime<Utc>) {
        let transition = StateTransition {
            from: self.current,
            to,
            at: now,
            confidence: proposal.confidence,
            trigger: proposal.trigger.clone(),
        };
        zlog_debug!(
            "pane {}: {} -> {} ({}, {:.2})",
            self.tracker.pane_id(),
            transition.from,
            transition.to,
            transition.trigger,
            transition.confidence
        );
        self.history.push(transition);
        self.current = to;
        self.state_since = now;
    }

    /// Run a proposal through hysteresis and return the resulting state.
    fn apply_hysteresis(
        &mut self,
        proposal: &Proposal,
        now: DateTime<Utc>,
        hold: Duration,
    ) -> AgentState {
        let proposed = proposal.state;

        // Errors bypass the hold entirely.
        if proposed == AgentState::Error {
            if self.current != AgentState::Error {
                self.commit(AgentState::Error, proposal, now);
            }
            self.pending = None;
            return AgentState::Error;
        }

        // Baseline: the first real signal is taken at face value.
        if self.history.is_empty()
            && self.current == AgentState::Unknown
            && proposed != AgentState::Unknown
        {
            self.commit(proposed, proposal, now);
            self.pending = None;
            return proposed;
        }

        if proposed == self.current {
            self.pending = None;
            return self.current;
        }

        match self.pending {
            Some((pending, since)) if pending == proposed => {
                if elapsed_between(since, now) >= hold {
                    self.commit(proposed, proposal, now);
                    self.pending = None;
                }
            }
            _ => self.pending = Some((proposed, now)),
        }
        self.current
    }
}

/// Classifies one pane.
///
/// All mutable state sits behind one mutex, so concurrent `classify` calls
/// on the same pane are serialized.
pub struct StateClassifier {
    pane_id: String,
    capture: Arc<dyn PaneCapture>,
    library: Arc<PatternLibrary>,
    clock: Arc<dyn Clock>,
    stall_threshold: Duration,
    hysteresis: Duration,
    inner: Mutex<Inner>,
}

impl std::fmt::Debug for StateClassifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StateClassifier")
            .field("pane_id", &self.pane_id)
            .field("stall_threshold", &self.stall_threshold)
            .field("hysteresis", &self.hysteresis)
            .finish_non_exhaustive()
    }
}

impl StateClassifier {
    pub fn new(
        pane_id: impl Into<String>,
        config: &ClassifierConfig,
        capture: Arc<dyn PaneCapture>,
        library: Arc<PatternLibrary>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let pane_id = pane_id.into();
        let now = clock.now();
        Self {
            inner: Mutex::new(Inner {
                tracker: VelocityTracker::with_capacity(pane_id.clone(), config.max_samples()),
                agent_type: config.agent_type.clone(),
                current: AgentState::Unknown,
                state_since: now,
                pending: None,
                history: RingBuffer::with_capacity(MAX_STATE_HISTORY),
            }),
            pane_id,
            capture,
            library,
            clock,
            stall_threshold: config.stall_threshold(),
            hysteresis: config.hysteresis(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn pane_id(&self) -> &str {
        &self.pane_id
    }

    /// Capture the pane once and classify it.
    ///
    /// A failed capture is returned unchanged and does not touch the
    /// classifier's state.
    pub fn classify(&self) -> Result<AgentActivity> {
        let mut inner = self.lock();
        let now = self.clock.now();

        let capture = &self.capture;
        let sample = inner
            .tracker
            .update(now, |pane| capture.capture_text(pane))
            .inspect_err(|e| zlog_warn!("classify {}: {}", self.pane_id, e))?;

        let matches = self
            .library
            .match_text(inner.tracker.last_capture(), &inner.agent_type);
        let detected_patterns: Vec<String> = matches.iter().map(|m| m.pattern.clone()).collect();

        let proposal = classify_state(
            sample.velocity,
            &matches,
            inner.tracker.last_output_age(now),
            inner.current,
            self.stall_threshold,
        );
        let state = inner.apply_hysteresis(&proposal, now, self.hysteresis);

        Ok(AgentActivity {
            pane_id: self.pane_id.clone(),
            agent_type: inner.agent_type.clone(),
            state,
            confidence: proposal.confidence,
            velocity: sample.velocity,
            state_since: inner.state_since,
            detected_patterns,
            last_output: inner.tracker.last_output_time(),
            state_history: inner.history.to_vec(),
        })
    }

    pub fn current_state(&self) -> AgentState {
        self.lock().current
    }

    /// The state waiting out the hysteresis hold, if any.
    pub fn pending_state(&self) -> Option<AgentState> {
        self.lock().pending.map(|(state, _)| state)
    }

    /// Committed transitions, oldest first.
    pub fn state_history(&self) -> Vec<StateTransition> {
        self.lock().history.to_vec()
    }

    /// How long the current state has been held.
    pub fn state_duration(&self) -> Duration {
        let since = self.lock().state_since;
        elapsed_between(since, self.clock.now())
    }

    pub fn agent_type(&self) -> String {
        self.lock().agent_type.clone()
    }

    pub fn set_agent_type(&self, agent_type: impl Into<String>) {
        self.lock().agent_type = agent_type.into();
    }

    /// Current velocity window averages, for display.
    pub fn average_velocity(&self) -> f64 {
        self.lock().tracker.average_velocity()
    }

    pub fn reset(&self) {
        let now = self.clock.now();
        let mut inner = self.lock();
        inner.tracker.reset();
        inner.current = AgentState::Unknown;
        inner.state_since = now;
        inner.pending = None;
        inner.history.clear();
    }
}
