use anyhow::Context;
use clap::{Parser, Subcommand};
use serde_json::Value;
use std::path::{Path, PathBuf};
use tracing::info;

use costguard::advisor::normalize_records;
use costguard::app::{self, handle_fatal_error, init_logging};
use costguard::config::load_config;
use costguard::plan;
use costguard::policy::{PolicyEngine, PolicyTable, ResourceDescriptor};
use costguard::server;

/// Policy-checked cloud cost remediation
#[derive(Parser)]
#[command(name = "costguard")]
#[command(about = "Dispatch and track automated cloud cost remediation", long_about = None)]
struct Cli {
    /// Enable verbose output (-v for debug, -vv for trace, -vvv for all)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the HTTP service
    Serve {
        /// Path to configuration file
        #[arg(short = 'c', long)]
        config: Option<PathBuf>,
    },
    /// Print the execution plan for a JSON array of recommendation records
    Plan {
        #[arg(short, long)]
        input: PathBuf,

        /// Policy rule table (built-in table when omitted)
        #[arg(long)]
        policy: Option<PathBuf>,
    },
    /// Print the compliance verdict for a JSON array of resources
    Check {
        #[arg(short, long)]
        input: PathBuf,

        /// Policy rule table (built-in table when omitted)
        #[arg(long)]
        policy: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let verbose = cli.verbose;

    let result = match cli.command {
        Commands::Serve { config } => run_serve(config.as_deref(), verbose).await,
        Commands::Plan { input, policy } => {
            init_logging(verbose, None);
            run_plan(&input, policy.as_deref())
        }
        Commands::Check { input, policy } => {
            init_logging(verbose, None);
            run_check(&input, policy.as_deref())
        }
    };

    if let Err(e) = result {
        handle_fatal_error(e, verbose);
    }
}

async fn run_serve(config_path: Option<&Path>, verbose: u8) -> anyhow::Result<()> {
    let config = load_config(config_path).await?;
    init_logging(verbose, config.log_level.as_deref());

    let services = app::build_services(&config).await?;
    let state = services.state.clone();

    server::serve(&config.server.bind, state, async {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Shutdown requested");
        }
    })
    .await?;

    services.shutdown();
    Ok(())
}

fn policy_engine(path: Option<&Path>) -> anyhow::Result<PolicyEngine> {
    let table = match path {
        Some(path) => PolicyTable::load(path)?,
        None => PolicyTable::builtin(),
    };
    Ok(PolicyEngine::new(table))
}

fn read_json(path: &Path) -> anyhow::Result<Value> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    serde_json::from_str(&content).with_context(|| format!("Invalid JSON in {}", path.display()))
}

fn run_plan(input: &Path, policy: Option<&Path>) -> anyhow::Result<()> {
    let raw = match read_json(input)? {
        Value::Array(items) => items,
        _ => anyhow::bail!("{} must contain a JSON array of recommendations", input.display()),
    };
    let records = normalize_records(&raw)?;
    let records = policy_engine(policy)?.annotate(records);
    let plan = plan::compile(&records);

    println!("{}", plan.text);
    if plan.savings_partial {
        eprintln!(
            "Warning: savings excluded for {} record(s): {}",
            plan.unparsed_savings.len(),
            plan.unparsed_savings.join(", ")
        );
    }
    Ok(())
}

fn run_check(input: &Path, policy: Option<&Path>) -> anyhow::Result<()> {
    let resources: Vec<ResourceDescriptor> = serde_json::from_value(read_json(input)?)
        .with_context(|| format!("{} must contain a JSON array of resources", input.display()))?;
    let engine = policy_engine(policy)?;

    for resource in &resources {
        let verdict = engine.evaluate(resource);
        if verdict.compliant {
            println!("✅ {} ({}): compliant", resource.resource_id, resource.kind);
            continue;
        }

        let rule = verdict
            .violated_rule
            .as_ref()
            .map(|r| r.id.as_str())
            .unwrap_or("unknown");
        println!(
            "❌ {} ({}): violates {}{}",
            resource.resource_id,
            resource.kind,
            rule,
            verdict
                .reason
                .as_deref()
                .map(|r| format!(" - {r}"))
                .unwrap_or_default()
        );
        if let Some(suggested) = &verdict.suggested_configuration {
            for (key, value) in suggested {
                println!("   suggested {key} = {value}");
            }
        }
    }
    Ok(())
}
