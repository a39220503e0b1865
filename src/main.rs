use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};

use drover::activity::{ActivityMonitor, AgentActivity, PatternCategory};
use drover::clock::SystemClock;
use drover::config::Config;
use drover::routing::{AgentPane, AgentScorer, Router, RoutingContext};
use drover::terse::TerseState;
use drover::tmux::{canonical_agent_type, Tmux, TmuxCapture};
use drover::{zlog, zlog_error, zlog_warn, Error, Result};

/// Drover - activity detection and routing for AI agents in tmux panes
#[derive(Parser, Debug)]
#[command(name = "drover")]
#[command(version, about, long_about = None)]
#[command(after_help = "ENVIRONMENT:\n    DROVER_DEBUG=1     Enable debug logging (alternative to --debug)\n    DROVER_LOG=LEVEL   Force a log level (trace|debug|info|warn|error)")]
pub struct Cli {
    /// Enable debug logging (writes to ~/.drover/drover.log)
    #[arg(short = 'd', long, global = true)]
    pub debug: bool,

    /// Config file (default: ~/.drover/drover.toml)
    #[arg(short = 'c', long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum Command {
    /// Classify every agent pane of a session
    Activity {
        session: String,

        /// Pause between the two samples
        #[arg(long, default_value_t = 500)]
        interval_ms: u64,

        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },

    /// Score the agent panes of a session and pick one
    Route {
        session: String,

        /// Routing strategy (default: config `default_strategy`)
        #[arg(long, short = 's')]
        strategy: Option<String>,

        /// Pane indices to leave out, comma separated
        #[arg(long, value_delimiter = ',')]
        exclude: Vec<usize>,

        /// Prompt text, used for affinity
        #[arg(long, short = 'p', default_value = "")]
        prompt: String,

        /// Pane id of the previously used agent (sticky strategy)
        #[arg(long)]
        last_agent: Option<String>,

        /// Target pane index (explicit strategy)
        #[arg(long)]
        pane: Option<usize>,

        /// Only consider agents of this type
        #[arg(long)]
        agent_type: Option<String>,

        /// Retry with THINKING agents readmitted if nothing is selected
        #[arg(long)]
        relax: bool,

        /// Context usage of a pane as PANE_ID=PERCENT; repeatable
        #[arg(long = "context-usage", value_name = "ID=PCT")]
        context_usage: Vec<String>,

        /// Pause between the two samples
        #[arg(long, default_value_t = 500)]
        interval_ms: u64,
    },

    /// List the compiled pattern library
    Patterns {
        /// Only patterns that apply to this agent type
        #[arg(long)]
        agent: Option<String>,

        /// Only patterns of this category (idle, error, thinking, completion)
        #[arg(long)]
        category: Option<String>,
    },

    /// Print a one-line summary of a session
    Terse {
        session: String,

        /// Pause between the two samples
        #[arg(long, default_value_t = 500)]
        interval_ms: u64,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    drover::log::init_with_debug(cli.debug);
    if cli.debug {
        zlog!("drover starting (debug mode enabled)");
    }

    let config = match &cli.config {
        Some(path) => Config::load_from(path)?,
        None => Config::load()?,
    };
    config.validate()?;

    let result = match cli.command {
        Command::Activity {
            session,
            interval_ms,
            json,
        } => run_activity(&config, &session, Duration::from_millis(interval_ms), json),
        Command::Route {
            session,
            strategy,
            exclude,
            prompt,
            last_agent,
            pane,
            agent_type,
            relax,
            context_usage,
            interval_ms,
        } => {
            let ctx = RoutingContext {
                prompt,
                last_agent,
                exclude_panes: exclude,
                explicit_pane: pane,
            };
            let strategy = strategy.unwrap_or_else(|| config.default_strategy.clone());
            run_route(
                &config,
                &session,
                &strategy,
                &ctx,
                agent_type.as_deref(),
                relax,
                &context_usage,
                Duration::from_millis(interval_ms),
            )
        }
        Command::Patterns { agent, category } => {
            run_patterns(&config, agent.as_deref(), category.as_deref())
        }
        Command::Terse {
            session,
            interval_ms,
        } => run_terse(&config, &session, Duration::from_millis(interval_ms)),
    };

    if let Err(e) = &result {
        zlog_error!("command failed: {}", e);
    }
    result
}

fn build_monitor(config: &Config) -> Result<Arc<ActivityMonitor>> {
    Ok(Arc::new(ActivityMonitor::new(
        config.classifier.clone(),
        Arc::new(TmuxCapture),
        config.build_library()?,
        Arc::new(SystemClock),
    )))
}

/// Agent panes of `session`; user panes are skipped.
fn agent_panes(session: &str) -> Result<Vec<AgentPane>> {
    if !Tmux::is_available() {
        return Err(Error::Tmux("tmux not found on PATH".to_string()));
    }
    if !Tmux::session_exists(session) {
        return Err(Error::Tmux(format!("session not found: {}", session)));
    }
    let panes: Vec<AgentPane> = Tmux::list_panes(session)?
        .into_iter()
        .filter_map(|p| {
            let agent_type = p.agent_type()?;
            Some(AgentPane::new(p.id, p.index, agent_type))
        })
        .collect();
    zlog!("{}: {} agent panes", session, panes.len());
    Ok(panes)
}

/// Classify each pane once, under the configured capture timeout. Panes
/// that fail are reported and left out.
async fn sample(
    monitor: &ActivityMonitor,
    panes: &[AgentPane],
    timeout: Duration,
) -> Vec<(AgentPane, AgentActivity)> {
    let mut out = Vec::with_capacity(panes.len());
    for pane in panes {
        monitor.get_or_create_for(&pane.pane_id, &canonical_agent_type(&pane.agent_type));
        match monitor.classify_with_timeout(&pane.pane_id, timeout).await {
            Ok(activity) => out.push((pane.clone(), activity)),
            Err(e) => {
                zlog_warn!("pane {} skipped: {}", pane.pane_id, e);
                eprintln!("warning: pane {} skipped: {}", pane.pane_id, e);
            }
        }
    }
    out
}

/// Sample twice, `interval` apart. Velocity needs an earlier capture to
/// compare against, so the first pass only sets the baseline and the second
/// pass is the one reported.
async fn sample_settled(
    monitor: &ActivityMonitor,
    panes: &[AgentPane],
    timeout: Duration,
    interval: Duration,
) -> Vec<(AgentPane, AgentActivity)> {
    sample(monitor, panes, timeout).await;
    tokio::time::sleep(interval).await;
    sample(monitor, panes, timeout).await
}

fn run_activity(config: &Config, session: &str, interval: Duration, json: bool) -> Result<()> {
    zlog!("Activity command: session={}, interval={:?}", session, interval);
    let panes = agent_panes(session)?;
    let monitor = build_monitor(config)?;

    let rt = tokio::runtime::Runtime::new()?;
    let results = rt.block_on(sample_settled(
        &monitor,
        &panes,
        config.capture_timeout(),
        interval,
    ));

    if json {
        let activities: Vec<&AgentActivity> = results.iter().map(|(_, a)| a).collect();
        println!("{}", serde_json::to_string_pretty(&activities)?);
        return Ok(());
    }

    println!(
        "{:<6} {:<8} {:<11} {:>5} {:>9}  PATTERNS",
        "PANE", "TYPE", "STATE", "CONF", "CHARS/S"
    );
    for (pane, activity) in &results {
        println!(
            "{:<6} {:<8} {:<11} {:>5.2} {:>9.1}  {}",
            pane.pane_id,
            pane.agent_type,
            activity.state.as_str(),
            activity.confidence,
            activity.velocity,
            activity.detected_patterns.join(",")
        );
    }
    Ok(())
}

/// Parse repeated `PANE_ID=PERCENT` flags.
fn parse_context_usage(entries: &[String]) -> Result<HashMap<String, f64>> {
    entries
        .iter()
        .map(|entry| {
            let (id, pct) = entry.split_once('=').ok_or_else(|| {
                Error::Validation(format!("--context-usage expects ID=PCT, got '{}'", entry))
            })?;
            let pct: f64 = pct.trim().parse().map_err(|_| {
                Error::Validation(format!("--context-usage: bad percentage '{}'", pct))
            })?;
            Ok((id.trim().to_string(), pct))
        })
        .collect()
}

fn run_route(
    config: &Config,
    session: &str,
    strategy: &str,
    ctx: &RoutingContext,
    agent_type: Option<&str>,
    relax: bool,
    context_usage: &[String],
    interval: Duration,
) -> Result<()> {
    zlog!(
        "Route command: session={}, strategy={}, relax={}",
        session,
        strategy,
        relax
    );
    let usage = parse_context_usage(context_usage)?;
    let mut panes = agent_panes(session)?;
    if let Some(wanted) = agent_type {
        let wanted = canonical_agent_type(wanted);
        panes.retain(|p| canonical_agent_type(&p.agent_type) == wanted);
    }

    let monitor = build_monitor(config)?;
    let scorer = AgentScorer::new(config.routing.clone(), Arc::clone(&monitor));

    let rt = tokio::runtime::Runtime::new()?;
    let sampled = rt.block_on(sample_settled(
        &monitor,
        &panes,
        config.capture_timeout(),
        interval,
    ));
    let agents: Vec<_> = sampled
        .iter()
        .map(|(pane, activity)| {
            let pct = usage.get(&pane.pane_id).copied().unwrap_or(0.0);
            scorer.score_activity(pane, activity, pct, &ctx.prompt)
        })
        .collect();

    let mut router = Router::new();
    let result = if relax {
        router.route_with_relaxation(&agents, strategy, ctx)
    } else {
        router.route(&agents, strategy, ctx)
    };
    zlog!("Route result: {}", result.reason);

    println!("{}", serde_json::to_string_pretty(&result)?);
    Ok(())
}

fn run_patterns(config: &Config, agent: Option<&str>, category: Option<&str>) -> Result<()> {
    let library = config.build_library()?;
    let category = category.map(str::parse::<PatternCategory>).transpose()?;

    let mut patterns = match agent {
        Some(agent) => library.patterns_by_agent(&canonical_agent_type(agent)),
        None => library.patterns(),
    };
    if let Some(category) = category {
        patterns.retain(|p| p.category == category);
    }

    println!("library version {}, {} patterns", library.version(), patterns.len());
    for p in &patterns {
        println!(
            "{:>4}  {:<10} {:<8} {:<26} {}",
            p.priority,
            p.category.as_str(),
            p.agent,
            p.name,
            p.regex().as_str()
        );
    }
    Ok(())
}

fn run_terse(config: &Config, session: &str, interval: Duration) -> Result<()> {
    let panes = agent_panes(session)?;
    let monitor = build_monitor(config)?;

    let rt = tokio::runtime::Runtime::new()?;
    let sampled = rt.block_on(sample_settled(
        &monitor,
        &panes,
        config.capture_timeout(),
        interval,
    ));

    let mut state = TerseState::from_activities(session, sampled.iter().map(|(_, a)| a));
    // Panes whose capture failed still count toward the total.
    state.total_agents = panes.len() as u32;
    println!("{}", state);
    Ok(())
}
