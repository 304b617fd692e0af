//! op-dispatch service
//!
//! Command line entry point over the widget catalog:
//! - `validate`: build gate running the compatibility validator over every tool
//! - `dispatch`: run one inbound envelope and print the outbound envelope
//! - `audit`: print the audit trail of a session or a correlation id
//! - `sessions`: list the sessions an actor owns

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use op_core::config::load_environment;
use op_core::{InboundEnvelope, Settings};
use op_dispatch::Orchestrator;
use op_execution_tracker::{DispatchMetrics, DispatchTelemetry};
use op_state_store::StateStore;
use op_tools::{CompatibilityValidator, ValidationSummary};
use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{debug, error, info};

mod catalog;

use catalog::Widgets;

#[derive(Parser, Debug)]
#[command(name = "op-dispatch")]
#[command(about = "Tool registry, compatibility gate and request dispatcher")]
struct Args {
    #[command(subcommand)]
    command: Commands,

    /// Settings file (TOML), layered over defaults and under OP_DISPATCH__* variables
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Emit logs as JSON
    #[arg(long, global = true)]
    log_json: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Validate every tool against the method it wraps
    Validate {
        /// Print the full report as JSON
        #[arg(long)]
        json: bool,

        /// Treat warnings as failures
        #[arg(long)]
        strict: bool,
    },

    /// Dispatch one inbound envelope
    Dispatch {
        /// Envelope file, `-` reads stdin
        #[arg(default_value = "-")]
        envelope: PathBuf,
    },

    /// Show audit events
    Audit {
        /// Events of one session, in ledger order
        #[arg(long, conflicts_with = "correlation")]
        session: Option<String>,

        /// The event recorded for one correlation id
        #[arg(long)]
        correlation: Option<String>,

        /// Number of recent events when no filter is given
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },

    /// List sessions owned by an actor
    Sessions {
        #[arg(long)]
        actor: String,
    },
}

fn init_tracing(json: bool) -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::from_default_env()
        .add_directive("op_dispatch_service=info".parse()?)
        .add_directive("op_dispatch=info".parse()?)
        .add_directive("op_state_store=info".parse()?)
        .add_directive("op_tools=warn".parse()?);

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    // Load environment from /etc/op-dispatch/environment (if exists)
    load_environment();

    let args = Args::parse();
    init_tracing(args.log_json)?;

    let settings = Settings::load(args.config.as_deref()).context("loading settings")?;
    debug!(store = %settings.store.url, "Settings ready");

    let widgets = Widgets::new();
    let registries = catalog::bootstrap(&widgets).context("registering widget catalog")?;

    match args.command {
        Commands::Validate { json, strict } => {
            let strict = strict || settings.validation.fail_on_warnings;
            let summary =
                CompatibilityValidator::from_settings(&settings.dispatch).validate_all(&registries);

            if json {
                println!("{}", serde_json::to_string_pretty(&summary)?);
            } else {
                print_summary(&summary);
            }

            if summary.passes(strict) {
                info!(warnings = summary.warning_count, "Compatibility gate passed");
                Ok(ExitCode::SUCCESS)
            } else {
                error!(
                    errors = summary.error_count,
                    warnings = summary.warning_count,
                    strict,
                    "Compatibility gate failed"
                );
                Ok(ExitCode::FAILURE)
            }
        }

        Commands::Dispatch { envelope } => {
            let envelope = read_envelope(&envelope)?;
            let store = op_state_store::open(&settings.store.url)
                .await
                .with_context(|| format!("opening store {}", settings.store.url))?;

            let orchestrator = Orchestrator::builder(registries, store)
                .settings(settings)
                .resource_guard(widgets.states())
                .hook(Arc::new(DispatchTelemetry::new("op-dispatch")))
                .hook(Arc::new(DispatchMetrics::new()?))
                .build();

            let response = orchestrator.dispatch(envelope).await;
            println!("{}", serde_json::to_string_pretty(&response)?);

            Ok(if response.is_completed() {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            })
        }

        Commands::Audit {
            session,
            correlation,
            limit,
        } => {
            let store = open_store(&settings).await?;
            let events = match (session, correlation) {
                (Some(session_id), _) => store.events_for_session(&session_id).await?,
                (None, Some(correlation_id)) => store
                    .event_by_correlation(&correlation_id)
                    .await?
                    .into_iter()
                    .collect(),
                (None, None) => store.recent_events(limit).await?,
            };
            println!("{}", serde_json::to_string_pretty(&events)?);
            Ok(ExitCode::SUCCESS)
        }

        Commands::Sessions { actor } => {
            let store = open_store(&settings).await?;
            let sessions = store.sessions_for_actor(&actor).await?;
            println!("{}", serde_json::to_string_pretty(&sessions)?);
            Ok(ExitCode::SUCCESS)
        }
    }
}

async fn open_store(settings: &Settings) -> Result<Arc<dyn StateStore>> {
    op_state_store::open(&settings.store.url)
        .await
        .with_context(|| format!("opening store {}", settings.store.url))
}

fn read_envelope(path: &Path) -> Result<InboundEnvelope> {
    let text = if path == Path::new("-") {
        let mut buf = String::new();
        std::io::stdin()
            .read_to_string(&mut buf)
            .context("reading envelope from stdin")?;
        buf
    } else {
        std::fs::read_to_string(path)
            .with_context(|| format!("reading envelope {}", path.display()))?
    };
    serde_json::from_str(&text).context("parsing inbound envelope")
}

fn print_summary(summary: &ValidationSummary) {
    for report in &summary.reports {
        let status = if !report.is_compatible() {
            "FAIL"
        } else if report.has_warnings() {
            "WARN"
        } else {
            "ok"
        };
        println!("{:<4} {} -> {}", status, report.tool_name, report.method_name);
        for issue in &report.errors {
            println!("       error   {}", issue);
        }
        for issue in &report.warnings {
            println!("       warning {}", issue);
        }
    }
    println!(
        "{} tool(s), {} error(s), {} warning(s)",
        summary.reports.len(),
        summary.error_count,
        summary.warning_count
    );
}
