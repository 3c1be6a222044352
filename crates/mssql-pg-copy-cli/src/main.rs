//! mssql-pg-copy CLI - SQL Server to PostgreSQL schema translation and copy.

use clap::{Parser, Subcommand};
use mssql_pg_copy::{Config, DryRunReport, MigrateError, MigrationResult, Orchestrator};
use std::path::PathBuf;
use std::process::ExitCode;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn, Level};
use tracing_subscriber::fmt::format::FmtSpan;

#[cfg(unix)]
use tokio::signal::unix::{signal, SignalKind};

#[derive(Parser)]
#[command(name = "mssql-pg-copy")]
#[command(about = "Copy a SQL Server schema and its rows into PostgreSQL")]
#[command(version)]
struct Cli {
    /// Path to YAML configuration file
    #[arg(short, long, default_value = "config.yaml")]
    config: PathBuf,

    /// Output JSON result to stdout
    #[arg(long)]
    output_json: bool,

    /// Log format: text or json
    #[arg(long, default_value = "text")]
    log_format: String,

    /// Log verbosity: debug, info, warn, error
    #[arg(long, default_value = "info")]
    verbosity: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Translate the schema and copy rows; reruns resume interrupted copies
    Run {
        /// Override source schema
        #[arg(long)]
        source_schema: Option<String>,

        /// Override target schema
        #[arg(long)]
        target_schema: Option<String>,

        /// Override rows per source page
        #[arg(long)]
        batch_size: Option<usize>,

        /// Dry run: print DDL and copy plan without writing anything
        #[arg(long)]
        dry_run: bool,
    },

    /// Test database connections
    HealthCheck,
}

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{}", e.format_detailed());
            ExitCode::from(e.exit_code())
        }
    }
}

async fn run() -> Result<(), MigrateError> {
    let cli = Cli::parse();

    setup_logging(&cli.verbosity, &cli.log_format);

    let mut config = Config::load(&cli.config)?;
    info!("Loaded configuration from {:?}", cli.config);

    match cli.command {
        Commands::Run {
            source_schema,
            target_schema,
            batch_size,
            dry_run,
        } => {
            if let Some(schema) = source_schema {
                config.source.schema = schema;
            }
            if let Some(schema) = target_schema {
                config.target.schema = schema;
            }
            if let Some(size) = batch_size {
                config.migration.batch_size = Some(size);
            }
            config.validate()?;

            if dry_run {
                let orchestrator = Orchestrator::connect(config).await?;
                let report = orchestrator.plan().await?;
                if cli.output_json {
                    println!("{}", serde_json::to_string_pretty(&report)?);
                } else {
                    print_plan(&report);
                }
                return Ok(());
            }

            let cancel_token = setup_signal_handler();
            let orchestrator = Orchestrator::new(config).await?;
            let result = orchestrator.run(cancel_token).await?;

            if cli.output_json {
                println!("{}", result.to_json()?);
            } else {
                print_result(&result);
            }

            if let Some(err) = result.error() {
                return Err(err);
            }
        }

        Commands::HealthCheck => {
            let orchestrator = Orchestrator::connect(config).await?;
            let result = orchestrator.health_check().await?;

            if cli.output_json {
                println!("{}", serde_json::to_string_pretty(&result)?);
            } else {
                println!("Health Check Results:");
                println!(
                    "  Source (MSSQL): {} ({}ms)",
                    if result.source_connected { "OK" } else { "FAILED" },
                    result.source_latency_ms
                );
                if let Some(ref err) = result.source_error {
                    println!("    Error: {}", err);
                }
                println!(
                    "  Target (PostgreSQL): {} ({}ms)",
                    if result.target_connected { "OK" } else { "FAILED" },
                    result.target_latency_ms
                );
                if let Some(ref err) = result.target_error {
                    println!("    Error: {}", err);
                }
                println!(
                    "\n  Overall: {}",
                    if result.healthy { "HEALTHY" } else { "UNHEALTHY" }
                );
            }

            if !result.healthy {
                return Err(MigrateError::Config("Health check failed".to_string()));
            }
        }
    }

    Ok(())
}

fn print_result(result: &MigrationResult) {
    let status_msg = match result.status.as_str() {
        "completed" => "Copy completed!",
        "cancelled" => "Copy cancelled.",
        _ => "Copy completed with errors.",
    };
    println!("\n{}", status_msg);
    println!("  Run ID: {}", result.run_id);
    println!("  Duration: {:.2}s", result.duration_seconds);
    println!("  Tables: {}", result.tables_total);
    println!("  Rows: {}", result.rows_transferred);
    for stage in &result.stages {
        println!(
            "  {:<22} {:?} ({} objects, {} failures)",
            stage.stage.name(),
            stage.outcome,
            stage.objects,
            stage.failures.len()
        );
        for failure in &stage.failures {
            println!("    {}: {}", failure.object, failure.error);
        }
    }
    if !result.failed_tables.is_empty() {
        println!("  Failed tables: {:?}", result.failed_tables);
    }
}

fn print_plan(report: &DryRunReport) {
    println!("Dry run: {} tables", report.tables.len());

    for planned in &report.statements {
        println!("\n-- {} ({})", planned.object, planned.stage.name());
        println!("{}", planned.sql);
    }

    if !report.copies.is_empty() {
        println!("\nCopy plan:");
    }
    for copy in &report.copies {
        match &copy.resume {
            Some(cursor) => println!(
                "  {}: {} existing rows, resume at offset {} (limit {}, page {}), order by {}",
                copy.table,
                copy.existing_rows,
                cursor.offset,
                cursor.limit,
                cursor.next_page_index,
                copy.order_by
            ),
            None => println!("  {}: copy from the first row, order by {}", copy.table, copy.order_by),
        }
    }

    for failure in &report.failures {
        warn!("{}: {}", failure.object, failure.error);
    }
}

fn setup_logging(verbosity: &str, format: &str) {
    let level = match verbosity.to_lowercase().as_str() {
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = tracing_subscriber::fmt()
        .with_max_level(level)
        .with_span_events(FmtSpan::CLOSE)
        .with_writer(std::io::stderr)
        .with_target(false);

    if format == "json" {
        subscriber.json().init();
    } else {
        subscriber.init();
    }
}

/// Cancel the returned token on SIGINT or SIGTERM. The run stops at the
/// next table boundary.
#[cfg(unix)]
fn setup_signal_handler() -> CancellationToken {
    let cancel_token = CancellationToken::new();

    for (kind, label) in [
        (SignalKind::interrupt(), "SIGINT"),
        (SignalKind::terminate(), "SIGTERM"),
    ] {
        let token = cancel_token.clone();
        match signal(kind) {
            Ok(mut stream) => {
                tokio::spawn(async move {
                    stream.recv().await;
                    eprintln!("\nReceived {}. Stopping after the current table...", label);
                    token.cancel();
                });
            }
            Err(e) => warn!("Could not install {} handler: {}", label, e),
        }
    }

    cancel_token
}

/// Ctrl-C only outside unix.
#[cfg(not(unix))]
fn setup_signal_handler() -> CancellationToken {
    let cancel_token = CancellationToken::new();
    let token = cancel_token.clone();

    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("\nReceived Ctrl-C. Stopping after the current table...");
            token.cancel();
        }
    });

    cancel_token
}
