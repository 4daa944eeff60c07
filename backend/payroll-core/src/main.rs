// src/main.rs
use anyhow::{bail, Context, Result};
use axum_server::tls_rustls::RustlsConfig;
use chrono::Utc;
use clap::{Parser, Subcommand};
use std::{
    fs::{self, File},
    io,
    net::SocketAddr,
    path::PathBuf,
    sync::Arc,
    time::Duration,
};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use payroll_core::config::Config;
use payroll_core::ingest::{upsert_records, IngestRequest, ViewRefresher};
use payroll_core::payroll::{build_daily_records, EmployeeEnvDir};
use payroll_core::server::{router, AppState};
use payroll_core::store::{export_csv, WorkbookFile};
use payroll_core::views::PayrollViews;

#[derive(Parser)]
#[command(name = "payroll-core")]
#[command(about = "Ingest NFC payroll records and rebuild the monthly report tables", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the ingestion server (default)
    Serve,
    /// Rebuild every report table once and exit
    Refresh,
    /// Upsert records from a JSON file, then refresh
    Ingest {
        file: PathBuf,
        /// The file holds raw clock events to pair into daily records
        #[arg(long)]
        events: bool,
    },
    /// Write one table as CSV
    Export {
        #[arg(long)]
        table: String,
        #[arg(long)]
        out: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // --- Setup ---
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let config = Config::from_env().context("loading configuration")?;
    let views = PayrollViews::new(config.view_config()?);
    info!(
        "Configuration loaded. Workbook: {}, {} employee labels",
        config.workbook_path.display(),
        views.config().labels.len()
    );

    match cli.command.unwrap_or(Commands::Serve) {
        Commands::Serve => serve(config, views).await,
        Commands::Refresh => {
            let mut workbook = WorkbookFile::open(&config.workbook_path)?;
            let report = views.refresh(workbook.workbook_mut(), Utc::now())?;
            workbook.save()?;
            println!("{}", serde_json::to_string_pretty(&report)?);
            Ok(())
        }
        Commands::Ingest { file, events } => {
            let json = fs::read_to_string(&file)
                .with_context(|| format!("reading {}", file.display()))?;
            let payload: serde_json::Value = serde_json::from_str(&json)
                .with_context(|| format!("parsing {}", file.display()))?;
            let records = if events {
                let Some(events) = event_list(&payload) else {
                    bail!("{} is not an array of events or an {{\"events\": [...]}} object", file.display());
                };
                let rates = EmployeeEnvDir::new(config.employee_env_dir.clone());
                let (records, summary) = build_daily_records(events, &rates);
                println!("{}", serde_json::to_string_pretty(&summary)?);
                records
            } else {
                let IngestRequest::Upsert(records) = IngestRequest::from_json(&payload) else {
                    bail!("{} asks for a clear; only record uploads are accepted here", file.display());
                };
                records
            };

            let raw_table = views.config().raw_table.clone();
            let mut workbook = WorkbookFile::open(&config.workbook_path)?;
            let outcome = upsert_records(workbook.workbook_mut(), &raw_table, &records, Utc::now())?;
            workbook.save()?;
            let report = views.refresh(workbook.workbook_mut(), Utc::now())?;
            workbook.save()?;
            println!("{}", serde_json::to_string_pretty(&outcome)?);
            println!("{}", serde_json::to_string_pretty(&report)?);
            Ok(())
        }
        Commands::Export { table, out } => {
            let workbook = WorkbookFile::open(&config.workbook_path)?;
            let rows = match out {
                Some(path) => {
                    let file = File::create(&path)
                        .with_context(|| format!("creating {}", path.display()))?;
                    export_csv(workbook.workbook(), &table, file)?
                }
                None => export_csv(workbook.workbook(), &table, io::stdout().lock())?,
            };
            info!("Exported {} rows from '{}'", rows, table);
            Ok(())
        }
    }
}

fn event_list(payload: &serde_json::Value) -> Option<&[serde_json::Value]> {
    match payload {
        serde_json::Value::Array(items) => Some(items.as_slice()),
        serde_json::Value::Object(map) => map.get("events")?.as_array().map(Vec::as_slice),
        _ => None,
    }
}

async fn serve(config: Config, views: PayrollViews) -> Result<()> {
    let raw_table = views.config().raw_table.clone();
    let workbook = WorkbookFile::open(&config.workbook_path)?;
    let refresher: Arc<dyn ViewRefresher> = Arc::new(views);
    let state = AppState::new(
        workbook,
        Some(refresher),
        raw_table,
        Duration::from_secs(config.lock_timeout_secs),
    );
    let app = router(state);

    let addr: SocketAddr = format!("{}:{}", config.server_host, config.server_port)
        .parse()
        .with_context(|| format!("invalid listen address {}:{}", config.server_host, config.server_port))?;

    match (&config.cert_path, &config.key_path) {
        (Some(cert_path), Some(key_path)) => {
            let tls_config = match RustlsConfig::from_pem_file(cert_path, key_path).await {
                Ok(tls_config) => tls_config,
                Err(e) => {
                    error!("Failed to load TLS cert/key: {}", e);
                    return Err(e).context("loading TLS configuration");
                }
            };
            info!("Starting server on https://{}", addr);
            axum_server::bind_rustls(addr, tls_config)
                .serve(app.into_make_service())
                .await?;
        }
        _ => {
            info!("Starting server on http://{}", addr);
            let listener = tokio::net::TcpListener::bind(addr).await?;
            axum::serve(listener, app).await?;
        }
    }
    Ok(())
}
