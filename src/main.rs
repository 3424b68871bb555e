use anyhow::Result;
use chrono::Utc;
use clap::{Parser, Subcommand};
use comfy_table::{Cell, Table};
use console::style;
use reapctl::aws::AwsClients;
use reapctl::config::{init_config, Config, Policy};
use reapctl::provider::NoopHook;
use reapctl::reaper::{self, Collaborators};
use reapctl::selector::{EvalReason, SelectionReport};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "reapctl")]
#[command(
    about = "Terminate idle and stale EC2 instances in a tagged environment",
    long_about = "reapctl evaluates running EC2 instances carrying a configured Environment tag.\n\nAn instance is terminated when it is older than the age threshold AND its\nmean CPU utilization over the lookback window is below the CPU threshold.\nInstances without CloudWatch data are always kept.\n\nIntended to run under an external scheduler (cron, EventBridge); each run\nis a single independent pass with no persisted state."
)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file path
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Output format (text, json)
    #[arg(long, global = true, default_value = "text")]
    output: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Evaluate the fleet and terminate idle instances
    Run,
    /// Evaluate only; show what would be terminated, touch nothing
    #[command(alias = "dry-run")]
    Plan,
    /// Initialize configuration
    Init {
        /// Output path for config file
        #[arg(short, long, default_value = ".reapctl.toml")]
        output: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("warn")
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    if let Commands::Init { output } = &cli.command {
        init_config(output)?;
        return Ok(());
    }

    let config = Config::load(cli.config.as_deref())?;
    let policy = Policy::from_config(&config.policy)?;
    let region = config.aws.as_ref().and_then(|a| a.region.clone());

    let clients = AwsClients::new(region).await;
    let inventory = clients.inventory();
    let metrics = clients.metrics();
    let sink = clients.termination_sink();
    let hook = NoopHook;
    let collaborators = Collaborators {
        inventory: &inventory,
        metrics: &metrics,
        sink: &sink,
        hook: &hook,
    };

    match cli.command {
        Commands::Run => {
            // Racing against ctrl-c drops the run future; termination only
            // starts after the candidate list is final, so an interrupted
            // run terminates nothing.
            let summary = tokio::select! {
                result = reaper::run(&policy, &collaborators) => result?,
                _ = tokio::signal::ctrl_c() => {
                    anyhow::bail!("Interrupted before termination was issued; no instances were terminated");
                }
            };

            if cli.output == "json" {
                println!("{}", serde_json::to_string_pretty(&summary)?);
            } else {
                println!(
                    "Checked {} instance(s), terminated {}",
                    summary.checked_count,
                    summary.terminated_ids.len()
                );
                for id in &summary.terminated_ids {
                    println!("  terminated {}", id);
                }
                for (id, reason) in &summary.failed {
                    println!("  {} {}: {}", style("FAILED").red().bold(), id, reason);
                }
            }
        }
        Commands::Plan => {
            let now = Utc::now();
            let report = reaper::plan(&policy, &collaborators, now).await?;

            if cli.output == "json" {
                println!("{}", serde_json::to_string_pretty(&report.evaluations)?);
            } else {
                print_plan(&report, &policy, now);
            }
        }
        Commands::Init { .. } => unreachable!("handled above"),
    }

    Ok(())
}

fn print_plan(report: &SelectionReport, policy: &Policy, now: chrono::DateTime<Utc>) {
    println!(
        "\n{} (Environment={}, idle < {:.1}% CPU, older than {} day(s))",
        style("TERMINATION PLAN").bold().yellow(),
        policy.environment_tag,
        policy.cpu_threshold_percent,
        policy.age_threshold.num_days()
    );

    let mut table = Table::new();
    table.set_header(vec!["Instance", "Age (days)", "Mean CPU", "Decision"]);

    for eval in &report.evaluations {
        let age_days = (now - eval.launch_time).num_days();
        let (cpu, decision) = match &eval.reason {
            EvalReason::TooYoung => ("-".to_string(), "keep (too young)".to_string()),
            EvalReason::NoData => ("-".to_string(), "keep (no data)".to_string()),
            EvalReason::Active { mean_cpu } => {
                (format!("{:.2}%", mean_cpu), "keep (active)".to_string())
            }
            EvalReason::Idle { mean_cpu } => {
                (format!("{:.2}%", mean_cpu), "TERMINATE (idle)".to_string())
            }
        };
        table.add_row(vec![
            Cell::new(&eval.instance_id),
            Cell::new(age_days),
            Cell::new(cpu),
            Cell::new(decision),
        ]);
    }

    println!("{table}");
    println!(
        "{} of {} instance(s) would be terminated",
        report.candidates.len(),
        report.evaluations.len()
    );
}
