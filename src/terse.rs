//! One-line fleet summary.
//!
//! `S:proj|A:5/8|W:3|I:2|E:0|C:78%|B:R3/I2/B1|M:4|!:1c,2w`

use serde::{Deserialize, Serialize};

use crate::activity::{AgentActivity, AgentState};
use crate::{Error, Result};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TerseState {
    pub session: String,
    pub active_agents: u32,
    pub total_agents: u32,
    /// Generating or thinking.
    pub working_agents: u32,
    /// Waiting at a prompt.
    pub idle_agents: u32,
    pub error_agents: u32,
    /// Average context usage, percent.
    pub context_pct: u32,
    pub ready_beads: u32,
    pub blocked_beads: u32,
    pub in_progress_beads: u32,
    pub unread_mail: u32,
    pub critical_alerts: u32,
    pub warning_alerts: u32,
}

impl TerseState {
    /// Count agents of `session` by state.
    pub fn from_activities<'a>(
        session: impl Into<String>,
        activities: impl IntoIterator<Item = &'a AgentActivity>,
    ) -> Self {
        let mut state = TerseState {
            session: session.into(),
            ..Default::default()
        };
        for activity in activities {
            state.total_agents += 1;
            match activity.state {
                AgentState::Generating | AgentState::Thinking => {
                    state.working_agents += 1;
                    state.active_agents += 1;
                }
                AgentState::Waiting => state.idle_agents += 1,
                AgentState::Error => state.error_agents += 1,
                AgentState::Stalled | AgentState::Unknown => {}
            }
        }
        state
    }

    fn alerts(&self) -> String {
        let mut parts = Vec::with_capacity(2);
        if self.critical_alerts > 0 {
            parts.push(format!("{}c", self.critical_alerts));
        }
        if self.warning_alerts > 0 {
            parts.push(format!("{}w", self.warning_alerts));
        }
        if parts.is_empty() {
            "0".to_string()
        } else {
            parts.join(",")
        }
    }
}

impl std::fmt::Display for TerseState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "S:{}|A:{}/{}|W:{}|I:{}|E:{}|C:{}%|B:R{}/I{}/B{}|M:{}|!:{}",
            self.session,
            self.active_agents,
            self.total_agents,
            self.working_agents,
            self.idle_agents,
            self.error_agents,
            self.context_pct,
            self.ready_beads,
            self.in_progress_beads,
            self.blocked_beads,
            self.unread_mail,
            self.alerts()
        )
    }
}

impl std::str::FromStr for TerseState {
    type Err = Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        parse_terse(s)
    }
}

fn number(field: &str, value: &str) -> Result<u32> {
    value
        .trim()
        .parse()
        .map_err(|_| Error::InvalidTerse(format!("{}: bad count '{}'", field, value)))
}

/// Parse a terse line. Unknown keys and segments without a `:` are skipped.
pub fn parse_terse(s: &str) -> Result<TerseState> {
    let mut state = TerseState::default();

    for part in s.trim().split('|') {
        let Some((key, value)) = part.split_once(':') else {
            continue;
        };
        match key {
            "S" => state.session = value.to_string(),
            "A" => {
                let (active, total) = value
                    .split_once('/')
                    .ok_or_else(|| Error::InvalidTerse(format!("A: expected a/t, got '{}'", value)))?;
                state.active_agents = number("A", active)?;
                state.total_agents = number("A", total)?;
            }
            "W" => state.working_agents = number("W", value)?,
            "I" => state.idle_agents = number("I", value)?,
            "E" => state.error_agents = number("E", value)?,
            "C" => state.context_pct = number("C", value.trim_end_matches('%'))?,
            "B" => {
                for bead in value.split('/') {
                    let Some(prefix) = bead.chars().next() else {
                        continue;
                    };
                    let count = number("B", &bead[prefix.len_utf8()..])?;
                    match prefix {
                        'R' => state.ready_beads = count,
                        'I' => state.in_progress_beads = count,
                        'B' => state.blocked_beads = count,
                        _ => {}
                    }
                }
            }
            "M" => state.unread_mail = number("M", value)?,
            "!" => {
                if value == "0" {
                    continue;
                }
                for alert in value.split(',') {
                    if let Some(n) = alert.strip_suffix('c') {
                        state.critical_alerts = number("!", n)?;
                    } else if let Some(n) = alert.strip_suffix('w') {
                        state.warning_alerts = number("!", n)?;
                    }
                }
            }
            _ => {}
        }
    }

    Ok(state)
}
