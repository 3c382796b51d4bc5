//! Duet CLI - discussion/implementation mode gate for AI pair programming
//!
//! Usage:
//!   duet init                          Write a default .duet/config.toml
//!   duet hook <event>                  Run a hook handler (payload on stdin)
//!   duet mode show|set <mode>|reset    Inspect or change the workflow mode
//!   duet events query|validate         Inspect the event sinks
//!   duet handoff prepare|await         Transcript handoff to sub-agents

mod hooks;
mod project;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use duet_core::{time, DuetConfig, HookEvent, ModeTrigger, WorkflowMode};
use duet_events::validator::validate_sinks;
use duet_events::{EventFilter, EventLog, EventRecorder, EventStore};
use duet_gate::{ModeStore, ModeTransition};
use duet_handoff::{
    await_handoff, load_handoff, GitCli, HandoffContext, HandoffProducer, HandoffRequest,
    PollConfig,
};
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::project::Project;

/// Environment variable holding the log filter
const LOG_ENV: &str = "DUET_LOG";

#[derive(Parser)]
#[command(name = "duet")]
#[command(author, version, about = "Discussion/implementation mode gate for AI pair programming")]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Project root (defaults to $DUET_PROJECT_DIR, $CLAUDE_PROJECT_DIR, then the current directory)
    #[arg(long, global = true, value_name = "DIR")]
    project_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a default configuration file
    Init {
        /// Overwrite an existing configuration
        #[arg(long)]
        force: bool,
    },

    /// Run a hook handler; reads the host payload from stdin
    Hook {
        #[arg(value_enum)]
        event: HookArg,
    },

    /// Workflow mode management
    Mode {
        #[command(subcommand)]
        action: ModeCommands,
    },

    /// Event record inspection
    Events {
        #[command(subcommand)]
        action: EventCommands,
    },

    /// Transcript handoff to sub-agents
    Handoff {
        #[command(subcommand)]
        action: HandoffCommands,
    },
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum HookArg {
    SessionStart,
    SessionEnd,
    PreToolUse,
    PostToolUse,
    UserPromptSubmit,
    SubagentStop,
}

impl From<HookArg> for HookEvent {
    fn from(arg: HookArg) -> Self {
        match arg {
            HookArg::SessionStart => HookEvent::SessionStart,
            HookArg::SessionEnd => HookEvent::SessionEnd,
            HookArg::PreToolUse => HookEvent::PreToolUse,
            HookArg::PostToolUse => HookEvent::PostToolUse,
            HookArg::UserPromptSubmit => HookEvent::UserPromptSubmit,
            HookArg::SubagentStop => HookEvent::SubagentStop,
        }
    }
}

#[derive(Subcommand)]
enum ModeCommands {
    /// Show the active mode
    Show {
        /// Print the stored state as JSON
        #[arg(long)]
        json: bool,
    },

    /// Switch mode
    Set {
        /// discussion or implementation
        mode: String,

        /// Record the change as triggered by this phrase instead of manually
        #[arg(long)]
        trigger: Option<String>,
    },

    /// Start over in discussion mode with an empty history
    Reset,
}

#[derive(Subcommand)]
enum EventCommands {
    /// Print matching records, one JSON object per line
    Query {
        #[arg(long)]
        session: Option<String>,

        #[arg(long)]
        correlation: Option<String>,

        /// Handler name (pre_tool_use, post_tool_use, ...)
        #[arg(long)]
        hook: Option<String>,

        #[arg(long)]
        tool: Option<String>,

        /// Earliest timestamp (RFC 3339 or epoch)
        #[arg(long)]
        since: Option<String>,

        /// Latest timestamp (RFC 3339 or epoch)
        #[arg(long)]
        until: Option<String>,

        /// Maximum number of records (0 = all)
        #[arg(long, default_value = "0")]
        limit: usize,
    },

    /// Check that both sinks agree; exits 1 on violations
    Validate {
        #[arg(long)]
        session: Option<String>,

        /// Print the report as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Subcommand)]
enum HandoffCommands {
    /// Chunk a transcript for a sub-agent
    Prepare {
        /// JSONL transcript
        #[arg(long)]
        transcript: PathBuf,

        #[arg(long)]
        subagent: String,

        /// Tokens per chunk (defaults to the configured budget)
        #[arg(long)]
        budget: Option<usize>,

        #[arg(long)]
        session: Option<String>,

        #[arg(long)]
        description: Option<String>,
    },

    /// Wait for a handoff; exits 3 when missing, 4 on timeout
    Await {
        #[arg(long)]
        subagent: String,

        /// Deadline (defaults to the configured timeout)
        #[arg(long)]
        timeout_ms: Option<u64>,

        /// Print the chunk contents instead of their paths
        #[arg(long)]
        load: bool,
    },
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    // Diagnostics go to stderr; stdout belongs to the host protocol
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr).with_target(false))
        .with(filter)
        .init();

    let project = Project::discover(cli.project_dir);

    match cli.command {
        Commands::Init { force } => cmd_init(&project, force),
        Commands::Hook { event } => cmd_hook(&project, event.into()).await,
        Commands::Mode { action } => cmd_mode(&project, action),
        Commands::Events { action } => cmd_events(&project, action).await,
        Commands::Handoff { action } => cmd_handoff(&project, action).await,
    }
}

fn cmd_init(project: &Project, force: bool) -> Result<ExitCode> {
    let path = DuetConfig::config_path(project.root());
    if path.exists() && !force {
        bail!("{} already exists (use --force to overwrite)", path.display());
    }
    let path = DuetConfig::write_default(project.root()).context("Failed to write config")?;
    println!("Created {}", path.display());
    Ok(ExitCode::SUCCESS)
}

/// Hooks always exit 0; failures are expressed in the output object
async fn cmd_hook(project: &Project, event: HookEvent) -> Result<ExitCode> {
    let mut raw = String::new();
    let output = match tokio::io::stdin().read_to_string(&mut raw).await {
        Ok(_) => hooks::handle(event, &raw, project).await,
        Err(e) => {
            warn!("Failed to read {} payload: {}", event, e);
            hooks::fallback_output(event)
        }
    };

    if let Some(output) = output {
        println!("{}", serde_json::to_string(&output)?);
    }
    Ok(ExitCode::SUCCESS)
}

fn cmd_mode(project: &Project, action: ModeCommands) -> Result<ExitCode> {
    let store = ModeStore::from_layout(&project.layout);

    match action {
        ModeCommands::Show { json } => {
            let state = store.load_or_default();
            if json {
                println!("{}", serde_json::to_string_pretty(&state)?);
                return Ok(ExitCode::SUCCESS);
            }
            println!("Mode: {}", state.mode);
            println!("Since: {}", time::format(&state.last_changed));
            println!("Trigger: {}", state.trigger);
            if let Some(previous) = state.previous_mode {
                println!("Previous: {}", previous);
            }
            if !state.history.is_empty() {
                println!("Transitions recorded: {}", state.history.len());
            }
        }
        ModeCommands::Set { mode, trigger } => {
            let mode: WorkflowMode = mode.parse()?;
            let trigger = match trigger {
                Some(phrase) => ModeTrigger::Phrase { phrase },
                None => ModeTrigger::Manual,
            };
            report_transition(store.set_mode(mode, trigger))?;
        }
        ModeCommands::Reset => report_transition(store.reset())?,
    }

    Ok(ExitCode::SUCCESS)
}

fn report_transition(transition: ModeTransition) -> Result<()> {
    if !transition.success {
        bail!(
            "Mode change failed, still in {} mode: {}",
            transition.old_mode,
            transition.error.unwrap_or_default()
        );
    }
    println!("Mode: {} -> {}", transition.old_mode, transition.new_mode);
    Ok(())
}

async fn cmd_events(project: &Project, action: EventCommands) -> Result<ExitCode> {
    match action {
        EventCommands::Query {
            session,
            correlation,
            hook,
            tool,
            since,
            until,
            limit,
        } => {
            let filter = EventFilter {
                session_id: session,
                correlation_id: correlation,
                hook_name: hook,
                tool_name: tool,
                since: since.as_deref().map(parse_time).transpose()?,
                until: until.as_deref().map(parse_time).transpose()?,
                limit,
            };
            let recorder = EventRecorder::open(&project.layout).await;
            for record in recorder.query(&filter).await {
                println!("{}", serde_json::to_string(&record)?);
            }
            Ok(ExitCode::SUCCESS)
        }
        EventCommands::Validate { session, json } => {
            let store = EventStore::open(project.layout.events_db())
                .await
                .context("Failed to open event store")?;
            let log = EventLog::new(project.layout.log_dir());
            let report = validate_sinks(&store, &log, session.as_deref())
                .await
                .context("Failed to read event sinks")?;

            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                println!(
                    "Checked {} stored and {} logged records",
                    report.store_records, report.log_records
                );
                for violation in &report.violations {
                    println!("  {}", violation);
                }
                if report.is_clean() {
                    println!("No violations");
                }
            }

            Ok(if report.is_clean() {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            })
        }
    }
}

fn parse_time(s: &str) -> Result<chrono::DateTime<chrono::Utc>> {
    time::coerce_value(&serde_json::Value::String(s.to_string()))
        .with_context(|| format!("Invalid timestamp: {}", s))
}

async fn cmd_handoff(project: &Project, action: HandoffCommands) -> Result<ExitCode> {
    match action {
        HandoffCommands::Prepare {
            transcript,
            subagent,
            budget,
            session,
            description,
        } => {
            let mut context = HandoffContext::new(project.root())
                .with_vcs(&GitCli::new(project.root()))
                .await;
            context.cwd = std::env::current_dir().ok();
            context.session_id = session;
            context.description = description;

            let request = HandoffRequest {
                subagent_type: subagent,
                token_budget: budget.unwrap_or(project.config.handoff.token_budget),
                context,
            };
            let producer = HandoffProducer::new(project.layout.handoff_root());
            let prepared = match producer.prepare(&transcript, request).await {
                Ok(prepared) => prepared,
                Err(e) => {
                    eprintln!("duet: {}", e);
                    return Ok(ExitCode::from(e.exit_code() as u8));
                }
            };

            info!("Prepared {} chunks in {:?}", prepared.chunk_count(), prepared.dir);
            for path in &prepared.chunk_files {
                println!("{}", path.display());
            }
            Ok(ExitCode::SUCCESS)
        }
        HandoffCommands::Await {
            subagent,
            timeout_ms,
            load,
        } => {
            let mut config = PollConfig::from_config(&project.config.handoff);
            if let Some(ms) = timeout_ms {
                config = config.with_timeout(Duration::from_millis(ms));
            }

            let handoff = async {
                let paths = await_handoff(&project.layout.handoff_root(), &subagent, &config).await?;
                let loaded = if load {
                    Some(load_handoff(&paths).await?)
                } else {
                    None
                };
                Ok::<_, duet_handoff::HandoffError>((paths, loaded))
            };

            match handoff.await {
                Ok((_, Some(loaded))) => {
                    println!("{}", serde_json::to_string(&loaded.chunks)?);
                }
                Ok((paths, None)) => {
                    for path in paths {
                        println!("{}", path.display());
                    }
                }
                Err(e) => {
                    eprintln!("duet: {}", e);
                    return Ok(ExitCode::from(e.exit_code() as u8));
                }
            }
            Ok(ExitCode::SUCCESS)
        }
    }
}
