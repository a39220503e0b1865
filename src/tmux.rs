//! Terminal-multiplexer adapter.
//!
//! The activity engine only needs one capability from the outside world:
//! reading the current text of a pane. That is the [`PaneCapture`] trait.
//! [`TmuxCapture`] implements it on top of `tmux capture-pane`; tests supply
//! scripted implementations instead.

use std::process::Command;
use std::sync::LazyLock;

use regex::Regex;

use crate::{zlog_debug, zlog_trace, zlog_warn, Error, Result};

/// Reads the visible and scrollback text of a pane, control sequences included.
pub trait PaneCapture: Send + Sync {
    fn capture_text(&self, pane_id: &str) -> Result<String>;
}

impl<F> PaneCapture for F
where
    F: Fn(&str) -> Result<String> + Send + Sync,
{
    fn capture_text(&self, pane_id: &str) -> Result<String> {
        self(pane_id)
    }
}

/// [`PaneCapture`] backed by the tmux server the process can reach.
#[derive(Debug, Clone, Copy, Default)]
pub struct TmuxCapture;

impl PaneCapture for TmuxCapture {
    fn capture_text(&self, pane_id: &str) -> Result<String> {
        Tmux::capture_pane(pane_id)
    }
}

/// A pane as reported by `tmux list-panes`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaneInfo {
    /// Server-unique pane id, e.g. `%12`.
    pub id: String,
    /// Index within its window.
    pub index: usize,
    pub title: String,
}

impl PaneInfo {
    /// Agent type encoded in the title, if this is an agent pane.
    pub fn agent_type(&self) -> Option<String> {
        agent_type_from_title(&self.title)
    }
}

pub struct Tmux;

impl Tmux {
    /// Capture a pane with escape sequences preserved (`-e`).
    pub fn capture_pane(target: &str) -> Result<String> {
        zlog_trace!("Tmux::capture_pane target={}", target);
        let output = Command::new("tmux")
            .args(["capture-pane", "-t", target, "-p", "-e"])
            .output()?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            zlog_warn!("capture-pane failed for '{}': {}", target, stderr.trim());
            return Err(Error::Capture {
                pane_id: target.to_string(),
                message: stderr.trim().to_string(),
            });
        }
        let content = String::from_utf8_lossy(&output.stdout).to_string();
        zlog_trace!("capture_pane: {} bytes", content.len());
        Ok(content)
    }

    /// List the panes of a session in index order.
    pub fn list_panes(session: &str) -> Result<Vec<PaneInfo>> {
        zlog_debug!("Tmux::list_panes session={}", session);
        let output = Command::new("tmux")
            .args([
                "list-panes",
                "-s",
                "-t",
                session,
                "-F",
                "#{pane_id}\t#{pane_index}\t#{pane_title}",
            ])
            .output()?;
        if !output.status.success() {
            return Err(Error::Tmux(format!(
                "Failed to list panes for '{}': {}",
                session,
                String::from_utf8_lossy(&output.stderr)
            )));
        }
        let panes = parse_pane_list(&String::from_utf8_lossy(&output.stdout));
        zlog_trace!("list_panes: found {} panes", panes.len());
        Ok(panes)
    }

    pub fn session_exists(name: &str) -> bool {
        Command::new("tmux")
            .args(["has-session", "-t", name])
            .output()
            .map(|o| o.status.success())
            .unwrap_or(false)
    }

    pub fn list_sessions() -> Result<Vec<String>> {
        zlog_trace!("Tmux::list_sessions");
        let output = Command::new("tmux")
            .args(["list-sessions", "-F", "#{session_name}"])
            .output()?;
        if !output.status.success() {
            zlog_debug!("No tmux sessions found");
            return Ok(Vec::new());
        }
        Ok(String::from_utf8_lossy(&output.stdout)
            .lines()
            .map(String::from)
            .collect())
    }

    /// Whether a `tmux` binary is on PATH.
    pub fn is_available() -> bool {
        which::which("tmux").is_ok()
    }
}

/// Parse `list-panes` output in `id<TAB>index<TAB>title` form.
/// Lines that don't fit the format are skipped.
fn parse_pane_list(stdout: &str) -> Vec<PaneInfo> {
    stdout
        .lines()
        .filter_map(|line| {
            let mut fields = line.splitn(3, '\t');
            let id = fields.next()?.trim();
            let index = fields.next()?.trim().parse().ok()?;
            let title = fields.next().unwrap_or("").to_string();
            if id.is_empty() {
                return None;
            }
            Some(PaneInfo {
                id: id.to_string(),
                index,
                title,
            })
        })
        .collect()
}

/// Extract the agent type from a pane title of the form
/// `<session>__<type>_<n>`. User panes (no `__` marker) yield `None`.
pub fn agent_type_from_title(title: &str) -> Option<String> {
    let (_, rest) = title.split_once("__")?;
    let agent = rest.split('_').next().unwrap_or(rest).trim();
    if agent.is_empty() {
        None
    } else {
        Some(agent.to_string())
    }
}

/// CSI sequences (including private `?` modes) and OSC sequences terminated
/// by BEL or ST.
static ANSI_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\x1b\[[0-9;?]*[a-zA-Z]|\x1b\][^\x07\x1b]*(?:\x07|\x1b\\)")
        .expect("ANSI regex is valid")
});

/// Remove terminal control sequences from captured text.
pub fn strip_ansi(text: &str) -> String {
    ANSI_RE.replace_all(text, "").into_owned()
}

/// Map short pane-title aliases onto the names the pattern library uses.
pub fn canonical_agent_type(agent_type: &str) -> String {
    match agent_type.to_ascii_lowercase().as_str() {
        "cc" | "claude" => "claude".to_string(),
        "cod" | "codex" => "codex".to_string(),
        "gmi" | "gemini" => "gemini".to_string(),
        other => other.to_string(),
    }
}
