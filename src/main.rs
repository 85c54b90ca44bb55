use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use logtriage::config::AppConfig;
use logtriage::ingest::IngestFormat;

#[derive(Parser)]
#[command(
    name = "logtriage",
    about = "Appliance-grade anomaly triage for cloud log streams",
    version,
    long_about = None
)]
struct Cli {
    /// Path to a TOML config file (defaults are used when omitted)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the monitor daemon (ingest store + periodic analysis loop)
    Monitor,

    /// Ingest a log file (JSON array, single object, or NDJSON)
    Ingest {
        /// File to ingest
        file: PathBuf,

        /// Source tag recorded with the batch
        #[arg(long, default_value = "file")]
        source: String,

        /// Input format
        #[arg(long, value_enum, default_value_t = IngestFormat::Auto)]
        format: IngestFormat,
    },

    /// Run one analysis cycle immediately
    Analyze,

    /// Show stored logs in an index range
    Logs {
        #[arg(long)]
        start: i64,

        #[arg(long)]
        end: i64,
    },

    /// Show anomalous log indices
    Anomalies {
        /// Most recently flagged indices, newest first
        #[arg(long, conflicts_with_all = ["start", "end"])]
        recent: Option<usize>,

        #[arg(long, requires = "end")]
        start: Option<i64>,

        #[arg(long, requires = "start")]
        end: Option<i64>,
    },

    /// Show recorded alerts
    Alerts {
        #[arg(long, default_value = "20")]
        limit: usize,
    },

    /// Show buffer and monitoring statistics
    Stats,

    /// Manage detection rules
    Rules {
        #[command(subcommand)]
        action: RuleAction,
    },

    /// Generate a synthetic log batch with embedded anomalies (NDJSON)
    Simulate {
        /// Output file path (stdout when omitted)
        #[arg(long)]
        output: Option<PathBuf>,

        /// Healthy baseline records
        #[arg(long, default_value = "600")]
        baseline: usize,

        /// Latency-ramp records
        #[arg(long, default_value = "100")]
        ramp: usize,
    },
}

#[derive(Subcommand)]
enum RuleAction {
    /// List loaded rules
    List,

    /// Reload rules from disk and report the count
    Reload,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = AppConfig::load_or_default(cli.config.as_deref())?;

    match cli.command {
        Commands::Monitor => {
            tracing::info!("Starting LogTriage monitor");
            logtriage::run_monitor(config).await?;
        }
        Commands::Ingest { file, source, format } => {
            let body = std::fs::read_to_string(&file)?;
            let service = logtriage::build_service(&config)?;
            let result = service.ingest(&body, &source, format).await?;

            println!("\nIngestion result for {}", file.display());
            println!("  processed : {}", result.processed_count);
            println!("  failed    : {}", result.failed_count);
            println!("  duration  : {:.1}ms", result.processing_time_ms);
            for err in result.validation_errors.iter().take(10) {
                println!("  - [{}] {}: {}", err.error_type, err.field, err.message);
            }
            if result.validation_errors.len() > 10 {
                println!("  ... and {} more", result.validation_errors.len() - 10);
            }
        }
        Commands::Analyze => {
            let service = logtriage::build_service(&config)?;
            let summary = service.run_analysis_once().await?;
            if summary.skipped {
                println!(
                    "Cycle skipped: only {} logs in window (minimum {}).",
                    summary.logs_analyzed, config.monitor.min_logs_for_analysis
                );
            } else {
                println!("\nAnalysis cycle complete ({:.1}ms)", summary.duration_ms);
                println!("  logs analyzed : {}", summary.logs_analyzed);
                println!("  anomalies     : {}", summary.anomalies_detected);
                println!("  alerts        : {}", summary.alerts_recorded);
                println!("  suppressed    : {}", summary.suppressed_by_cooldown);
            }
        }
        Commands::Logs { start, end } => {
            let service = logtriage::build_service(&config)?;
            let logs = service.get_logs_range(start, end).await?;
            if logs.is_empty() {
                println!("No logs in range {start}..={end}.");
            } else {
                println!("{:<8} | {:<20} | {:<9} | Message", "Index", "Timestamp", "Severity");
                println!("{:-<8}-|-{:-<20}-|-{:-<9}-|-{:-<40}", "", "", "", "");
                for log in logs {
                    let flat = log.message.replace('\n', " ");
                    let mut message: String = flat.chars().take(77).collect();
                    if message.len() < flat.len() {
                        message.push_str("...");
                    }
                    println!(
                        "{:<8} | {:<20} | {:<9} | {}{}",
                        log.index.unwrap_or_default(),
                        log.timestamp.format("%Y-%m-%d %H:%M:%S"),
                        log.severity.as_str(),
                        if log.is_anomaly { "[ANOMALY] " } else { "" },
                        message
                    );
                }
            }
        }
        Commands::Anomalies { recent, start, end } => {
            let service = logtriage::build_service(&config)?;
            let indices = match (start, end) {
                (Some(start), Some(end)) => service.get_anomalies_range(start, end).await?,
                _ => service.get_recent_anomalies(recent.unwrap_or(10)).await?,
            };
            if indices.is_empty() {
                println!("No anomalies found.");
            } else {
                for idx in indices {
                    println!("{idx}");
                }
            }
        }
        Commands::Alerts { limit } => {
            let service = logtriage::build_service(&config)?;
            let alerts = service.recent_alerts(limit)?;
            if alerts.is_empty() {
                println!("No alerts recorded.");
            } else {
                println!("{:<20} | {:<9} | Summary", "Kind", "Severity");
                println!("{:-<20}-|-{:-<9}-|-{:-<50}", "", "", "");
                for alert in alerts {
                    println!("{:<20} | {:<9} | {}", alert.kind, alert.severity, alert.summary);
                }
            }
        }
        Commands::Stats => {
            let service = logtriage::build_service(&config)?;
            let max_index = service.store().current_max_index().await?;
            let live = service.store().len().await?;
            let stats = service.stats();

            println!("\nBuffer");
            println!("  max index : {max_index}");
            println!("  live logs : {live} / {}", service.store().capacity());
            println!("  rules     : {}", service.rule_metas().len());
            println!("Session");
            println!("  logs analyzed   : {}", stats.total_logs_processed);
            println!("  anomalies found : {}", stats.total_anomalies_detected);
            println!("  alerts recorded : {}", stats.total_alerts_recorded);
        }
        Commands::Rules { action } => {
            let service = logtriage::build_service(&config)?;
            match action {
                RuleAction::List => {
                    let metas = service.rule_metas();
                    if metas.is_empty() {
                        println!("No rules loaded from '{}'.", config.rules_dir);
                    } else {
                        println!("{:<25} | {:<9} | Description", "Id", "Severity");
                        println!("{:-<25}-|-{:-<9}-|-{:-<40}", "", "", "");
                        for meta in metas {
                            println!(
                                "{:<25} | {:<9} | {}",
                                meta.get("id").map(String::as_str).unwrap_or("-"),
                                meta.get("severity").map(String::as_str).unwrap_or("-"),
                                meta.get("description").map(String::as_str).unwrap_or("-")
                            );
                        }
                    }
                }
                RuleAction::Reload => {
                    let count = service.reload_rules()?;
                    println!("Reloaded {count} rules from '{}'.", config.rules_dir);
                }
            }
        }
        Commands::Simulate { output, baseline, ramp } => {
            let plan = logtriage::simulate::SimulationPlan {
                baseline,
                latency_ramp: ramp,
                ..Default::default()
            };
            let logs = logtriage::simulate::generate(&plan);
            let body: String = logs.iter().map(|l| format!("{l}\n")).collect();
            match output {
                Some(path) => {
                    std::fs::write(&path, body)?;
                    println!("Wrote {} records to {}.", logs.len(), path.display());
                }
                None => print!("{body}"),
            }
        }
    }

    Ok(())
}
