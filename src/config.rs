use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use crate::activity::{ClassifierConfig, PatternLibrary, PatternSpec};
use crate::routing::{RoutingConfig, StrategyName};
use crate::{zlog_debug, Error, Result};

const DEFAULT_CAPTURE_TIMEOUT_MS: u64 = 5000;

fn default_capture_timeout_ms() -> u64 {
    DEFAULT_CAPTURE_TIMEOUT_MS
}

fn default_strategy() -> String {
    StrategyName::default().to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Budget for one blocking pane capture.
    #[serde(default = "default_capture_timeout_ms")]
    pub capture_timeout_ms: u64,
    #[serde(default = "default_strategy")]
    pub default_strategy: String,
    #[serde(default)]
    pub classifier: ClassifierConfig,
    #[serde(default)]
    pub routing: RoutingConfig,
    /// Extra patterns, appended to the built-in library.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub patterns: Vec<PatternSpec>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            capture_timeout_ms: DEFAULT_CAPTURE_TIMEOUT_MS,
            default_strategy: default_strategy(),
            classifier: ClassifierConfig::default(),
            routing: RoutingConfig::default(),
            patterns: Vec::new(),
        }
    }
}

impl Config {
    pub fn drover_dir() -> Result<PathBuf> {
        Ok(dirs::home_dir().ok_or(Error::NoHomeDir)?.join(".drover"))
    }

    pub fn config_path() -> Result<PathBuf> {
        Ok(Self::drover_dir()?.join("drover.toml"))
    }

    pub fn load() -> Result<Self> {
        Self::load_from(Self::config_path()?)
    }

    /// Load from `path`; a missing file yields the defaults.
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self> {
        let path = expand_tilde(path.as_ref());
        zlog_debug!("Config::load path={}", path.display());
        if !path.exists() {
            zlog_debug!("Config file not found, using defaults");
            return Ok(Self::default());
        }
        let config: Self = toml::from_str(&fs::read_to_string(&path)?)?;
        zlog_debug!(
            "Config loaded: strategy={}, extra patterns={}, capture_timeout_ms={}",
            config.default_strategy,
            config.patterns.len(),
            config.capture_timeout_ms
        );
        Ok(config)
    }

    pub fn save(&self) -> Result<()> {
        self.save_to(Self::config_path()?)
    }

    pub fn save_to(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        if let Some(dir) = path.parent().filter(|d| !d.exists()) {
            zlog_debug!("Creating config directory: {}", dir.display());
            fs::create_dir_all(dir)?;
        }
        fs::write(path, toml::to_string_pretty(self)?)?;
        zlog_debug!("Config saved to {}", path.display());
        Ok(())
    }

    /// Reject settings the scorer or router cannot work with.
    pub fn validate(&self) -> Result<()> {
        self.routing.validate()?;
        if self.capture_timeout_ms == 0 {
            return Err(Error::Validation(
                "capture_timeout_ms must be positive".to_string(),
            ));
        }
        self.default_strategy.parse::<StrategyName>()?;
        Ok(())
    }

    pub fn capture_timeout(&self) -> Duration {
        Duration::from_millis(self.capture_timeout_ms)
    }

    /// Built-in patterns plus the configured extras. Any bad regex fails the
    /// whole library.
    pub fn build_library(&self) -> Result<Arc<PatternLibrary>> {
        if self.patterns.is_empty() {
            return Ok(PatternLibrary::shared_default());
        }
        let library = PatternLibrary::with_defaults();
        library.add_patterns(self.patterns.iter().cloned())?;
        Ok(Arc::new(library))
    }
}

fn expand_tilde(path: &Path) -> PathBuf {
    if let Ok(rest) = path.strip_prefix("~") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    path.to_path_buf()
}
