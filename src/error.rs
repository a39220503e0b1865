use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("TOML serialize error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    #[error("Tmux error: {0}")]
    Tmux(String),

    #[error("Capture failed for pane {pane_id}: {message}")]
    Capture { pane_id: String, message: String },

    #[error("Invalid pattern '{name}': {source}")]
    PatternCompile {
        name: String,
        #[source]
        source: regex::Error,
    },

    #[error("Invalid agent state: {0}")]
    InvalidState(String),

    #[error("Invalid pattern category: {0}")]
    InvalidCategory(String),

    #[error("Invalid routing strategy: {0}")]
    InvalidStrategy(String),

    #[error("Invalid terse state: {0}")]
    InvalidTerse(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("No home directory")]
    NoHomeDir,

    #[error("Operation timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("Task join error: {0}")]
    TaskJoin(String),
}

pub type Result<T> = std::result::Result<T, Error>;
