pub mod activity;
pub mod clock;
pub mod config;
pub mod error;
pub mod log;
pub mod ring;
pub mod routing;
pub mod terse;
pub mod tmux;
pub mod util;

pub use activity::{
    ActivityMonitor, AgentActivity, AgentState, ClassifierConfig, PatternCategory,
    PatternLibrary, StateClassifier, StateTransition, VelocityTracker,
};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::Config;
pub use error::{Error, Result};
pub use routing::{
    AgentPane, AgentScorer, Router, RoutingConfig, RoutingContext, RoutingResult,
    RoutingStrategy, ScoredAgent, StrategyName,
};
pub use terse::TerseState;
pub use tmux::{PaneCapture, TmuxCapture};
