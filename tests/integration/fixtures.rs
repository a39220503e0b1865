//! Test fixtures for integration tests.
//!
//! Provides helpers for:
//! - Scripted pane contents (`ScriptedCapture`)
//! - A manual clock and monitors wired to it
//! - Scored agent builders for router tests

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use drover::activity::{ActivityMonitor, AgentState, ClassifierConfig, PatternLibrary};
use drover::clock::ManualClock;
use drover::routing::ScoredAgent;
use drover::tmux::PaneCapture;
use drover::{Error, Result};

/// Pane contents keyed by pane id. Unknown panes fail to capture.
#[derive(Default)]
pub struct ScriptedCapture {
    screens: Mutex<HashMap<String, Result<String>>>,
}

impl ScriptedCapture {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Replace the whole screen of `pane`.
    pub fn show(&self, pane: &str, text: &str) {
        self.screens
            .lock()
            .unwrap()
            .insert(pane.to_string(), Ok(text.to_string()));
    }

    /// Add output to the end of `pane`'s screen.
    pub fn append(&self, pane: &str, text: &str) {
        let mut screens = self.screens.lock().unwrap();
        let screen = screens
            .entry(pane.to_string())
            .or_insert_with(|| Ok(String::new()));
        match screen {
            Ok(existing) => existing.push_str(text),
            Err(_) => *screen = Ok(text.to_string()),
        }
    }

    /// Make the next captures of `pane` fail.
    pub fn fail(&self, pane: &str) {
        self.screens.lock().unwrap().insert(
            pane.to_string(),
            Err(Error::Capture {
                pane_id: pane.to_string(),
                message: "pane closed".to_string(),
            }),
        );
    }
}

impl PaneCapture for ScriptedCapture {
    fn capture_text(&self, pane_id: &str) -> Result<String> {
        match self.screens.lock().unwrap().get(pane_id) {
            Some(Ok(text)) => Ok(text.clone()),
            Some(Err(e)) => Err(Error::Capture {
                pane_id: pane_id.to_string(),
                message: e.to_string(),
            }),
            None => Err(Error::Capture {
                pane_id: pane_id.to_string(),
                message: "no such pane".to_string(),
            }),
        }
    }
}

pub fn clock() -> Arc<ManualClock> {
    Arc::new(ManualClock::default())
}

pub fn secs(n: u64) -> Duration {
    Duration::from_secs(n)
}

/// A monitor over `capture` with default tuning and the built-in patterns.
pub fn monitor(capture: Arc<ScriptedCapture>, clock: Arc<ManualClock>) -> Arc<ActivityMonitor> {
    Arc::new(ActivityMonitor::new(
        ClassifierConfig::default(),
        capture,
        PatternLibrary::shared_default(),
        clock,
    ))
}

/// `n` characters of generated output.
pub fn output(n: usize) -> String {
    "x".repeat(n)
}

/// An agent with a fixed score, for router-only tests.
pub fn scored(index: usize, state: AgentState, score: f64, excluded: bool) -> ScoredAgent {
    let mut agent = ScoredAgent::new(format!("%{}", index), index, "cc", state);
    agent.score = score;
    agent.excluded = excluded;
    agent
}
