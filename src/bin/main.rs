//! pg-cratedb-sync CLI

use clap::{Parser, Subcommand};
use console::style;
use indicatif::{ProgressBar, ProgressStyle};
use pg_cratedb_sync::config::LogFormat;
use pg_cratedb_sync::{
    ColumnStatus, SyncClient, SyncConfig, SyncPhase, SyncReport, WatermarkStore,
};
use std::process::ExitCode;
use std::time::Duration;
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, fmt};

#[derive(Parser)]
#[command(name = "pg-cratedb-sync")]
#[command(author, version, about = "Incrementally sync PostgreSQL tables into CrateDB")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Config file path
    #[arg(short, long, global = true)]
    config: Option<String>,

    /// Log level
    #[arg(long, global = true, env = "LOG_LEVEL")]
    log_level: Option<String>,

    /// JSON output
    #[arg(long, global = true)]
    json: bool,

    /// Quiet mode
    #[arg(short, long, global = true)]
    quiet: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Run sync (default)
    Sync,
    /// Add tracking columns to destination tables
    Bootstrap,
    /// Show how many rows the next run would read
    Status,
    /// Test connectivity
    Test,
    /// Show the stored watermark
    Watermark,
    /// Generate sample config
    Init {
        #[arg(short, long, default_value = "pg-cratedb-sync.toml")]
        output: String,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    match run(cli).await {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            error!("Error: {}", e);
            eprintln!("{} {}", style("✗").red(), e);
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<bool, Box<dyn std::error::Error>> {
    // Handle init command first - it doesn't need config
    if let Some(Commands::Init { ref output }) = cli.command {
        run_init(output)?;
        return Ok(true);
    }

    let (config, origin) = load_config(cli.config.as_deref())?;
    let level = cli
        .log_level
        .clone()
        .unwrap_or_else(|| config.logging.level.clone());
    init_logging(&level, config.logging.format, cli.quiet, cli.json);
    info!("Loaded config from {}", origin);

    match cli.command {
        None | Some(Commands::Sync) => run_sync(config, cli.json, cli.quiet).await,
        Some(Commands::Bootstrap) => run_bootstrap(config, cli.json).await,
        Some(Commands::Status) => run_status(config, cli.json).await,
        Some(Commands::Test) => run_test(config, cli.json).await,
        Some(Commands::Watermark) => run_watermark(&config, cli.json),
        Some(Commands::Init { .. }) => unreachable!(), // Handled above
    }
}

fn load_config(path: Option<&str>) -> Result<(SyncConfig, String), Box<dyn std::error::Error>> {
    if let Some(p) = path {
        return Ok((SyncConfig::from_file(p)?, p.to_string()));
    }

    for default in &["pg-cratedb-sync.toml", ".pg-cratedb-sync.toml"] {
        if std::path::Path::new(default).exists() {
            return Ok((SyncConfig::from_file(default)?, default.to_string()));
        }
    }

    Ok((SyncConfig::from_env()?, "environment".to_string()))
}

async fn run_sync(
    config: SyncConfig,
    json: bool,
    quiet: bool,
) -> Result<bool, Box<dyn std::error::Error>> {
    if !quiet && !json {
        println!("pg-cratedb-sync v{}", pg_cratedb_sync::VERSION);
        println!(
            "Selection: {}  Destination: {}\n",
            config.sync.selection, config.destination.kind
        );
    }

    let mut client = SyncClient::new(config).await?;

    let spinner = (!quiet && !json).then(new_spinner);
    if let Some(ref pb) = spinner {
        let pb = pb.clone();
        client = client.with_progress(move |p| match (p.phase, p.total_rows) {
            (SyncPhase::Applying, Some(total)) => {
                pb.set_message(format!("{}: {}/{} rows", p.table, p.rows_processed, total))
            }
            (phase, _) => pb.set_message(format!("{}: {}", p.table, phase)),
        });
    }

    let report = client.sync().await;
    if let Some(pb) = spinner {
        pb.finish_and_clear();
    }
    let report = report?;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else if !quiet {
        print_report(&report);
    }

    Ok(report.success)
}

fn print_report(report: &SyncReport) {
    if report.success {
        println!("{} Sync completed successfully", style("✓").green());
    } else {
        println!("{} Sync completed with errors", style("✗").red());
    }
    println!(
        "\nDuration: {}",
        humantime::format_duration(Duration::from_millis(report.duration_ms))
    );
    println!("Previous watermark: {}", report.previous_watermark.to_rfc3339());
    if let Some(ref watermark) = report.watermark {
        println!("New watermark: {}\n", watermark.to_rfc3339());
    }

    for (table, stats) in report.tables.iter() {
        let icon = if stats.succeeded() {
            style("✓").green()
        } else {
            style("✗").red()
        };
        println!(
            "  {} {}: {} inserted/updated, {} deleted, {} failed",
            icon, table, stats.inserted_or_updated, stats.deleted, stats.failed
        );
        if let Some(ref e) = stats.error {
            println!("      Error: {}", style(e).dim());
        }
    }
}

async fn run_bootstrap(config: SyncConfig, json: bool) -> Result<bool, Box<dyn std::error::Error>> {
    let client = SyncClient::new(config).await?;
    let results = client.bootstrap().await;
    let ok = results
        .iter()
        .all(|r| !matches!(r.status, ColumnStatus::Failed(_)));

    if json {
        println!("{}", serde_json::to_string_pretty(&results)?);
    } else {
        println!("Tracking columns\n");
        for r in &results {
            match r.status {
                ColumnStatus::Added => {
                    println!("  {} {}.{} added", style("✓").green(), r.table, r.column)
                }
                ColumnStatus::AlreadyPresent => println!(
                    "  {} {}.{} already present",
                    style("✓").green(),
                    r.table,
                    r.column
                ),
                ColumnStatus::Failed(ref e) => {
                    println!("  {} {}.{}: {}", style("✗").red(), r.table, r.column, e)
                }
            }
        }
    }
    Ok(ok)
}

async fn run_status(config: SyncConfig, json: bool) -> Result<bool, Box<dyn std::error::Error>> {
    let selection = config.sync.selection;
    let client = SyncClient::new(config).await?;
    let counts = client.pending_counts().await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&counts)?);
    } else {
        println!("Pending rows ({})\n", selection);
        for (table, count) in &counts {
            println!("  {}: {} rows", table, count);
        }
        let total: usize = counts.values().sum();
        println!("\nTotal: {} rows", total);
    }
    Ok(true)
}

async fn run_test(config: SyncConfig, json: bool) -> Result<bool, Box<dyn std::error::Error>> {
    if !json {
        println!("Testing connectivity...\n");
    }

    let kind = config.destination.kind;
    let client = SyncClient::new(config).await?;
    client.test_connectivity().await?;

    if json {
        let mut status = serde_json::Map::new();
        status.insert("postgres".into(), "ok".into());
        status.insert(kind.to_string(), "ok".into());
        println!("{}", serde_json::Value::Object(status));
    } else {
        println!("{} All connectivity tests passed!", style("✓").green());
    }
    Ok(true)
}

fn run_watermark(config: &SyncConfig, json: bool) -> Result<bool, Box<dyn std::error::Error>> {
    let store = WatermarkStore::new(config.sync.watermark_file.clone());
    let watermark = store.load()?;

    if json {
        println!(
            "{}",
            serde_json::json!({
                "path": store.path().display().to_string(),
                "watermark": watermark.to_rfc3339(),
            })
        );
    } else {
        println!("{}: {}", store.path().display(), watermark.to_rfc3339());
    }
    Ok(true)
}

fn run_init(output: &str) -> Result<(), Box<dyn std::error::Error>> {
    let config = r#"# pg-cratedb-sync configuration

[source]
url = "postgres://postgres@localhost:5433/test"
# password is read from DB_PASSWORD when not set here
ssl_mode = "disable"

[destination]
kind = "cratedb"
url = "http://localhost:4200"
username = "crate"
# kind = "duckdb"
# path = "local.duckdb"

[sync]
tables = ["products"]
id_column = "id"
updated_at_column = "updated_at"
deleted_column = "is_deleted"
watermark_file = "last_sync_time.txt"
# "latest_batch" reads only rows sharing the newest updated_at,
# "since_watermark" reads every row changed after the last run
selection = "latest_batch"
bootstrap_tracking_columns = true

[logging]
level = "info"
format = "text"
"#;

    std::fs::write(output, config)?;
    println!("{} Created: {}", style("✓").green(), output);
    println!("\nEdit the file or use environment variables:");
    println!("  DATABASE_URL, DB_PASSWORD, CRATEDB_URL, CRATEDB_USER, SYNC_TABLES");
    Ok(())
}

fn new_spinner() -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    pb.set_style(
        ProgressStyle::with_template("{spinner:.cyan} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner()),
    );
    pb.enable_steady_tick(Duration::from_millis(100));
    pb
}

fn init_logging(level: &str, format: LogFormat, quiet: bool, json_output: bool) {
    if quiet {
        return;
    }
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let builder = fmt().with_env_filter(filter).with_target(false);

    // When JSON output is enabled, send logs to stderr to avoid mixing with JSON on stdout
    match (format, json_output) {
        (LogFormat::Json, true) => builder.json().with_writer(std::io::stderr).init(),
        (LogFormat::Json, false) => builder.json().init(),
        (LogFormat::Text, true) => builder.with_writer(std::io::stderr).init(),
        (LogFormat::Text, false) => builder.init(),
    }
}
