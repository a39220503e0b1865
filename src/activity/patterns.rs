//! Categorized signal patterns matched against pane text.
//!
//! Patterns are kept sorted by descending priority. Ties keep insertion
//! order, so a library built from the same specs always matches in the same
//! order.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, LazyLock, RwLock, RwLockReadGuard, RwLockWriteGuard};

use super::{AgentState, PatternCategory};
use crate::{zlog_debug, Error, Result};

/// Agent value meaning "applies to every agent".
pub const ANY_AGENT: &str = "*";

const LIBRARY_VERSION: &str = "1.0";

/// Names of the default patterns that signal rate limiting.
pub const RATE_LIMIT_PATTERNS: &[&str] = &[
    "rate_limit_text",
    "http_429",
    "too_many_requests",
    "quota_exceeded",
];

/// Uncompiled pattern, as written in config files.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PatternSpec {
    pub name: String,
    pub regex: String,
    #[serde(default = "any_agent")]
    pub agent: String,
    pub state: AgentState,
    pub category: PatternCategory,
    #[serde(default)]
    pub priority: i32,
    #[serde(default)]
    pub description: String,
}

fn any_agent() -> String {
    ANY_AGENT.to_string()
}

/// A compiled pattern. Immutable once built.
#[derive(Debug, Clone)]
pub struct Pattern {
    pub name: String,
    pub agent: String,
    pub state: AgentState,
    pub category: PatternCategory,
    pub priority: i32,
    pub description: String,
    regex: Regex,
}

impl Pattern {
    pub fn compile(spec: PatternSpec) -> Result<Self> {
        let regex = Regex::new(&spec.regex).map_err(|source| Error::PatternCompile {
            name: spec.name.clone(),
            source,
        })?;
        Ok(Self {
            name: spec.name,
            agent: spec.agent,
            state: spec.state,
            category: spec.category,
            priority: spec.priority,
            description: spec.description,
            regex,
        })
    }

    pub fn regex(&self) -> &Regex {
        &self.regex
    }

    /// Whether this pattern should be tried for `agent_type`.
    /// An empty `agent_type` means every pattern applies.
    pub fn applies_to(&self, agent_type: &str) -> bool {
        self.agent == ANY_AGENT
            || self.agent.is_empty()
            || agent_type.is_empty()
            || self.agent == agent_type
    }

    pub fn is_match(&self, text: &str) -> bool {
        self.regex.is_match(text)
    }

    pub fn to_spec(&self) -> PatternSpec {
        PatternSpec {
            name: self.name.clone(),
            regex: self.regex.as_str().to_string(),
            agent: self.agent.clone(),
            state: self.state,
            category: self.category,
            priority: self.priority,
            description: self.description.clone(),
        }
    }

    fn to_match(&self) -> PatternMatch {
        PatternMatch {
            pattern: self.name.clone(),
            state: self.state,
            category: self.category,
            priority: self.priority,
        }
    }
}

/// A successful match.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PatternMatch {
    pub pattern: String,
    pub state: AgentState,
    pub category: PatternCategory,
    pub priority: i32,
}

/// Priority-ordered, shareable set of patterns.
///
/// Matching takes a read lock; adding patterns takes the write lock and
/// re-sorts. Libraries are passed to classifiers explicitly, usually as an
/// `Arc<PatternLibrary>`. Mutating a shared library affects every
/// classifier holding it; build a private one for isolation.
#[derive(Debug)]
pub struct PatternLibrary {
    version: String,
    patterns: RwLock<Vec<Pattern>>,
}

static DEFAULT_LIBRARY: LazyLock<Arc<PatternLibrary>> =
    LazyLock::new(|| Arc::new(PatternLibrary::with_defaults()));

impl PatternLibrary {
    /// Compile `specs` into a library. The first invalid regex fails the
    /// whole build.
    pub fn new(specs: impl IntoIterator<Item = PatternSpec>) -> Result<Self> {
        let mut patterns = specs
            .into_iter()
            .map(Pattern::compile)
            .collect::<Result<Vec<_>>>()?;
        sort_by_priority(&mut patterns);
        Ok(Self {
            version: LIBRARY_VERSION.to_string(),
            patterns: RwLock::new(patterns),
        })
    }

    /// An empty library.
    pub fn empty() -> Self {
        Self {
            version: LIBRARY_VERSION.to_string(),
            patterns: RwLock::new(Vec::new()),
        }
    }

    /// A fresh, private library holding the built-in patterns.
    pub fn with_defaults() -> Self {
        Self::new(default_pattern_specs()).expect("built-in patterns compile")
    }

    /// The process-wide default library. Every call returns the same
    /// instance.
    pub fn shared_default() -> Arc<PatternLibrary> {
        Arc::clone(&DEFAULT_LIBRARY)
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    fn read(&self) -> RwLockReadGuard<'_, Vec<Pattern>> {
        self.patterns.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, Vec<Pattern>> {
        self.patterns.write().unwrap_or_else(|e| e.into_inner())
    }

    /// All patterns applicable to `agent_type` that match `text`, highest
    /// priority first.
    pub fn match_text(&self, text: &str, agent_type: &str) -> Vec<PatternMatch> {
        self.read()
            .iter()
            .filter(|p| p.applies_to(agent_type) && p.is_match(text))
            .map(Pattern::to_match)
            .collect()
    }

    /// Like [`match_text`](Self::match_text), restricted to one category.
    pub fn match_by_category(
        &self,
        text: &str,
        agent_type: &str,
        category: PatternCategory,
    ) -> Vec<PatternMatch> {
        self.read()
            .iter()
            .filter(|p| p.category == category)
            .filter(|p| p.applies_to(agent_type) && p.is_match(text))
            .map(Pattern::to_match)
            .collect()
    }

    /// Highest-priority match, if any.
    pub fn match_first(&self, text: &str, agent_type: &str) -> Option<PatternMatch> {
        self.read()
            .iter()
            .find(|p| p.applies_to(agent_type) && p.is_match(text))
            .map(Pattern::to_match)
    }

    fn has_category(&self, text: &str, agent_type: &str, category: PatternCategory) -> bool {
        self.read()
            .iter()
            .any(|p| p.category == category && p.applies_to(agent_type) && p.is_match(text))
    }

    pub fn has_error(&self, text: &str, agent_type: &str) -> bool {
        self.has_category(text, agent_type, PatternCategory::Error)
    }

    pub fn has_idle_prompt(&self, text: &str, agent_type: &str) -> bool {
        self.has_category(text, agent_type, PatternCategory::Idle)
    }

    pub fn has_thinking_indicator(&self, text: &str, agent_type: &str) -> bool {
        self.has_category(text, agent_type, PatternCategory::Thinking)
    }

    pub fn has_completion_signal(&self, text: &str, agent_type: &str) -> bool {
        self.has_category(text, agent_type, PatternCategory::Completion)
    }

    /// Compile and insert one pattern, keeping priority order.
    pub fn add_pattern(&self, spec: PatternSpec) -> Result<()> {
        self.add_patterns(std::iter::once(spec))
    }

    /// Compile and insert several patterns. Nothing is added if any of them
    /// fails to compile.
    pub fn add_patterns(&self, specs: impl IntoIterator<Item = PatternSpec>) -> Result<()> {
        let compiled = specs
            .into_iter()
            .map(Pattern::compile)
            .collect::<Result<Vec<_>>>()?;
        if compiled.is_empty() {
            return Ok(());
        }

        let names: Vec<&str> = compiled.iter().map(|p| p.name.as_str()).collect();
        zlog_debug!("PatternLibrary: adding {:?}", names);

        let mut patterns = self.write();
        patterns.extend(compiled);
        sort_by_priority(&mut patterns);
        Ok(())
    }

    /// Snapshot of every pattern in match order.
    pub fn patterns(&self) -> Vec<Pattern> {
        self.read().clone()
    }

    pub fn patterns_by_category(&self, category: PatternCategory) -> Vec<Pattern> {
        self.read()
            .iter()
            .filter(|p| p.category == category)
            .cloned()
            .collect()
    }

    /// Patterns that apply to `agent_type`, including the all-agent ones.
    pub fn patterns_by_agent(&self, agent_type: &str) -> Vec<Pattern> {
        self.read()
            .iter()
            .filter(|p| p.agent == ANY_AGENT || p.agent.is_empty() || p.agent == agent_type)
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }
}

impl Default for PatternLibrary {
    fn default() -> Self {
        Self::with_defaults()
    }
}

/// Stable, so equal priorities keep insertion order.
fn sort_by_priority(patterns: &mut [Pattern]) {
    patterns.sort_by(|a, b| b.priority.cmp(&a.priority));
}

type DefaultRow = (
    &'static str,
    &'static str,
    &'static str,
    AgentState,
    PatternCategory,
    i32,
    &'static str,
);

use AgentState::{Error as ErrorState, Thinking, Waiting};
use PatternCategory::{Completion, Error as ErrorCat, Idle, Thinking as ThinkingCat};

#[rustfmt::skip]
const DEFAULT_PATTERNS: &[DefaultRow] = &[
    // Idle prompts
    ("claude_prompt", r"(?i)claude\s*>?\s*$", "claude", Waiting, Idle, 100, "Claude prompt"),
    ("claude_code_prompt", r"(?i)claude\s+code\s*>?\s*$", "claude", Waiting, Idle, 101, "Claude Code prompt"),
    ("claude_arrow_prompt", r"╰─>\s*$", "claude", Waiting, Idle, 99, "Claude arrow prompt"),
    ("codex_prompt", r"(?i)codex\s*>?\s*$", "codex", Waiting, Idle, 100, "Codex prompt"),
    ("codex_dollar", r"\$\s*$", "codex", Waiting, Idle, 50, "Codex dollar prompt"),
    ("gemini_prompt", r"(?i)gemini\s*>?\s*$", "gemini", Waiting, Idle, 100, "Gemini prompt"),
    ("gemini_triple_arrow", r">>>\s*$", "gemini", Waiting, Idle, 90, "Gemini triple arrow prompt"),
    ("shell_dollar", r"\$\s*$", "*", Waiting, Idle, 20, "Shell dollar prompt"),
    ("shell_percent", r"%\s*$", "*", Waiting, Idle, 20, "Shell percent prompt"),
    ("shell_hash", r"#\s*$", "*", Waiting, Idle, 20, "Shell hash prompt"),
    ("generic_angle", r">\s*$", "*", Waiting, Idle, 10, "Generic angle prompt"),

    // Rate limits
    ("rate_limit_text", r"(?i)rate\s+limit", "*", ErrorState, ErrorCat, 200, "Rate limit text"),
    ("http_429", r"\b429\b", "*", ErrorState, ErrorCat, 200, "HTTP 429 status"),
    ("too_many_requests", r"(?i)too\s+many\s+requests", "*", ErrorState, ErrorCat, 200, "Too many requests"),
    ("quota_exceeded", r"(?i)quota\s+exceeded", "*", ErrorState, ErrorCat, 200, "Quota exceeded"),

    // API errors
    ("api_error", r"(?i)(?:api\s+)?error:\s*\S", "*", ErrorState, ErrorCat, 180, "API error"),
    ("exception", r"(?i)exception:\s*\S", "*", ErrorState, ErrorCat, 180, "Exception"),
    ("failed_text", r"(?i)\bfailed\b.*(?:to|with|:|$)", "*", ErrorState, ErrorCat, 150, "Failed operation"),

    // Crashes
    ("panic", r"(?i)^panic:", "*", ErrorState, ErrorCat, 250, "Go panic"),
    ("sigsegv", r"SIGSEGV", "*", ErrorState, ErrorCat, 250, "Segmentation fault"),
    ("sigkill", r"(?i)(?:killed|SIGKILL)", "*", ErrorState, ErrorCat, 250, "Process killed"),
    ("process_exited", r"(?i)(?:process|agent)\s+(?:exited|terminated|crashed)", "*", ErrorState, ErrorCat, 240, "Process exited"),

    // Auth
    ("unauthorized", r"(?i)unauthorized", "*", ErrorState, ErrorCat, 190, "Unauthorized"),
    ("invalid_key", r"(?i)invalid.*(?:api\s*)?key", "*", ErrorState, ErrorCat, 190, "Invalid API key"),
    ("auth_failed", r"(?i)authentication\s+(?:failed|error)", "*", ErrorState, ErrorCat, 190, "Authentication failed"),

    // Network
    ("connection_refused", r"(?i)connection\s+refused", "*", ErrorState, ErrorCat, 170, "Connection refused"),
    ("timeout_error", r"(?i)(?:connection|request)\s+timed?\s*out", "*", ErrorState, ErrorCat, 170, "Timeout error"),
    ("network_error", r"(?i)network\s+error", "*", ErrorState, ErrorCat, 170, "Network error"),

    // Thinking indicators
    ("braille_spinner", r"[⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏]", "*", Thinking, ThinkingCat, 80, "Braille spinner"),
    ("dots_spinner", r"\.{3,}$", "*", Thinking, ThinkingCat, 70, "Dots spinner"),
    ("thinking_text", r"(?i)thinking\.{0,3}$", "*", Thinking, ThinkingCat, 85, "Thinking text"),
    ("processing_text", r"(?i)processing\.{0,3}$", "*", Thinking, ThinkingCat, 85, "Processing text"),
    ("analyzing_text", r"(?i)analyzing\.{0,3}$", "*", Thinking, ThinkingCat, 85, "Analyzing text"),
    ("extended_thinking", r"(?i)(?:thinking\s+deeply|extended\s+thinking)", "*", Thinking, ThinkingCat, 90, "Extended thinking"),
    ("loading_text", r"(?i)loading\.{0,3}$", "*", Thinking, ThinkingCat, 75, "Loading text"),
    ("waiting_text", r"(?i)(?:please\s+)?wait(?:ing)?\.{0,3}$", "*", Thinking, ThinkingCat, 75, "Waiting text"),

    // Completion signals
    ("done_text", r"(?i)(?:^|\s)done[.!]?\s*$", "*", Waiting, Completion, 60, "Done text"),
    ("complete_text", r"(?i)(?:^|\s)(?:completed?|finished)[.!]?\s*$", "*", Waiting, Completion, 60, "Complete/Finished text"),
    ("checkmark", r"[✓✔]\s*$", "*", Waiting, Completion, 65, "Checkmark symbol"),
    ("summary_header", r"(?i)^(?:summary|changes\s+made):", "*", Waiting, Completion, 55, "Summary header"),
];

/// The built-in pattern set, in declaration order.
///
/// Priority bands: crashes 240-250, rate-limit/auth/network 170-200, generic
/// failure 150, per-agent prompts 90-101, thinking 70-90, completion 55-65,
/// generic shell prompts 10-20.
pub fn default_pattern_specs() -> Vec<PatternSpec> {
    DEFAULT_PATTERNS
        .iter()
        .map(
            |&(name, regex, agent, state, category, priority, description)| PatternSpec {
                name: name.to_string(),
                regex: regex.to_string(),
                agent: agent.to_string(),
                state,
                category,
                priority,
                description: description.to_string(),
            },
        )
        .collect()
}
