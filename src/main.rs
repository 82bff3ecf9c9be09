//! Rutero Worker - Backend service for school transport schedule planning
//!
//! Owns the interactive scheduling core: assignment state, local
//! validation, drive-time feasibility against OSRM, positioning refresh
//! and the critical reassignment pass, exposed through a CLI.

mod cli;
mod config;
mod defaults;
mod services;
mod types;

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{info, warn};
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use cli::{Cli, Command, ExportFormat};
use config::Config;
use services::export;
use services::feasibility::{create_feasibility_service_with_fallback, FeasibilityService};
use services::normalizer::{self, RawScheduleDoc};
use services::snapshot::SnapshotStore;
use services::workspace::Workspace;
use types::{Bus, Route, ScheduleData};

#[tokio::main]
async fn main() -> Result<()> {
    // Logs directory - use LOGS_DIR env var or default to ./logs
    let logs_dir = std::env::var("LOGS_DIR").unwrap_or_else(|_| "./logs".to_string());
    std::fs::create_dir_all(&logs_dir).ok();

    // File appender for persistent logs (daily rotation)
    let file_appender = RollingFileAppender::new(Rotation::DAILY, &logs_dir, "worker.log");
    let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);

    // Initialize logging - both stderr and file (stdout carries command output)
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info,rutero_worker=debug".into()),
        ))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(tracing_subscriber::fmt::layer().with_writer(non_blocking).with_ansi(false))
        .init();

    let config = Config::from_env()?;
    let cli = Cli::parse();

    match cli.command {
        Command::Validate { schedule, day, persist, reassign } => {
            run_validate(&config, &schedule, day, persist, reassign).await
        }
        Command::Reassign { schedule, day, output } => {
            run_reassign(&config, &schedule, day, output.as_deref()).await
        }
        Command::ExportIncidents { schedule, day, format, output } => {
            run_export(&config, &schedule, day, format, output.as_deref()).await
        }
        Command::Normalize { input, day, output } => run_normalize(&input, day, output.as_deref()),
        Command::Snapshots => run_snapshots(&config).await,
    }
}

struct LoadedSchedule {
    day: String,
    buses: Vec<Bus>,
    available_routes: Vec<Route>,
}

/// Load a schedule file: a persisted snapshot (`ScheduleData`) or a raw
/// optimizer/import document.
fn load_schedule(path: &Path, day_override: Option<String>) -> Result<LoadedSchedule> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let value: serde_json::Value =
        serde_json::from_str(&raw).with_context(|| format!("Invalid JSON in {}", path.display()))?;

    if value.get("stats").is_some() && value.get("mode").is_some() {
        let data: ScheduleData =
            serde_json::from_value(value).context("Malformed schedule snapshot")?;
        let buses = normalizer::from_schedule_data(&data)?;
        Ok(LoadedSchedule {
            day: day_override.unwrap_or(data.day),
            buses,
            available_routes: Vec::new(),
        })
    } else {
        let doc: RawScheduleDoc =
            serde_json::from_value(value).context("Malformed schedule document")?;
        let normalized = normalizer::normalize_schedule(doc);
        if normalized.skipped > 0 {
            warn!("{} routes skipped during normalization", normalized.skipped);
        }
        Ok(LoadedSchedule {
            day: day_override.unwrap_or_else(|| "monday".to_string()),
            buses: normalized.buses,
            available_routes: normalized.available_routes,
        })
    }
}

async fn build_workspace(
    config: &Config,
    loaded: LoadedSchedule,
    auto_reassign: bool,
) -> Workspace {
    let service: Arc<dyn FeasibilityService> =
        Arc::from(create_feasibility_service_with_fallback(config.osrm_url.clone()).await);
    info!("Feasibility service initialized: {}", service.name());

    Workspace::new(
        loaded.day,
        loaded.buses,
        loaded.available_routes,
        service,
        Duration::from_millis(config.positioning_debounce_ms),
        auto_reassign,
    )
}

fn write_or_print(output: Option<&Path>, contents: &str) -> Result<()> {
    match output {
        Some(path) => {
            std::fs::write(path, contents)
                .with_context(|| format!("Failed to write {}", path.display()))?;
            info!("Wrote {}", path.display());
        }
        None => println!("{contents}"),
    }
    Ok(())
}

async fn run_validate(
    config: &Config,
    schedule: &Path,
    day: Option<String>,
    persist: bool,
    reassign: bool,
) -> Result<()> {
    let loaded = load_schedule(schedule, day)?;
    let workspace = build_workspace(config, loaded, reassign || config.auto_reassign).await;

    let local = workspace.local_validation();
    let local_errors: usize = local.values().map(|v| v.errors.len()).sum();
    let local_warnings: usize = local.values().map(|v| v.warnings.len()).sum();

    let outcome = workspace.validate_schedule(persist).await?;

    let summary = serde_json::json!({
        "day": workspace.day(),
        "connection": workspace.connection_state().as_str(),
        "local": {
            "errors": local_errors,
            "warnings": local_warnings,
            "buses_with_errors": local.values().filter(|v| v.has_errors()).count(),
        },
        "report": outcome.report.summary,
        "reassignment": outcome.reassignment,
    });
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}

async fn run_reassign(
    config: &Config,
    schedule: &Path,
    day: Option<String>,
    output: Option<&Path>,
) -> Result<()> {
    let loaded = load_schedule(schedule, day)?;
    let workspace = build_workspace(config, loaded, false).await;

    // Populate the report cache, then run the manual pass.
    workspace.validate_schedule(false).await?;
    let summary = workspace
        .reassign_critical(true)
        .await
        .context("Reassignment pass failed")?;

    println!("{}", serde_json::to_string_pretty(&summary)?);

    if output.is_some() {
        let data = workspace.schedule_data();
        write_or_print(output, &serde_json::to_string_pretty(&data)?)?;
    }
    Ok(())
}

async fn run_export(
    config: &Config,
    schedule: &Path,
    day: Option<String>,
    format: ExportFormat,
    output: Option<&Path>,
) -> Result<()> {
    let loaded = load_schedule(schedule, day)?;
    let workspace = build_workspace(config, loaded, false).await;

    let outcome = workspace.validate_schedule(false).await?;
    let rendered = match format {
        ExportFormat::Csv => export::incidents_to_csv(&outcome.report)?,
        ExportFormat::Json => export::incidents_to_json(&outcome.report)?,
    };
    write_or_print(output, &rendered)
}

fn run_normalize(input: &Path, day: Option<String>, output: Option<&Path>) -> Result<()> {
    let loaded = load_schedule(input, day)?;
    let data = ScheduleData::from_buses(loaded.day, "draft", &loaded.buses);
    write_or_print(output, &serde_json::to_string_pretty(&data)?)
}

async fn run_snapshots(config: &Config) -> Result<()> {
    let store = SnapshotStore::new(&config.snapshot_dir)?;
    for key in store.list().await? {
        println!("{key}");
    }
    Ok(())
}
