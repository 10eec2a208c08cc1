use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use lunchcal::config::load_config;
use lunchcal::ics::read_calendar;
use lunchcal::pipeline::{collect_menu, refresh};
use lunchcal::serve::serve;
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "lunchcal", about = "School lunch menu to iCalendar feed")]
struct Cli {
    #[arg(long, global = true, default_value = "lunchcal.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Fetch the menu page once and rewrite the calendar file.
    Refresh,
    /// Fetch and extract only; print the menu as JSON.
    Extract,
    /// List the events in an existing calendar file.
    Check {
        #[arg(long)]
        path: Option<PathBuf>,
    },
    /// Serve the calendar and refresh it daily.
    Serve,
}

fn main() -> Result<()> {
    init_tracing()?;
    let cli = Cli::parse();
    let loaded = load_config(&cli.config)?;

    match cli.command {
        Commands::Refresh => {
            let report = refresh(&loaded)?;
            info!(
                url = %report.source_url,
                days = report.days,
                events = report.events,
                success = report.success,
                fetch_failed = report.fetch_failed,
                file = %report.ics_path.display(),
                "refresh summary"
            );
            if !report.success {
                bail!(
                    "no menu data available; see {}",
                    loaded.diagnostics_path()?.display()
                );
            }
        }
        Commands::Extract => {
            let collection = collect_menu(&loaded)?;
            println!("{}", serde_json::to_string_pretty(&collection.menu)?);
        }
        Commands::Check { path } => {
            let path = match path {
                Some(path) => path,
                None => loaded.ics_path()?,
            };
            let text = std::fs::read_to_string(&path)
                .with_context(|| format!("failed to read calendar {}", path.display()))?;
            let events = read_calendar(&text);
            for event in &events {
                let start = event
                    .start
                    .map(|d| d.to_string())
                    .unwrap_or_else(|| "????-??-??".to_string());
                let items = event.description.lines().count().saturating_sub(1);
                println!("{start}  {}  ({items} items)", event.summary);
            }
            println!("{} event(s) in {}", events.len(), path.display());
        }
        Commands::Serve => {
            let runtime = tokio::runtime::Runtime::new().context("failed to start runtime")?;
            runtime.block_on(serve(loaded))?;
        }
    }

    Ok(())
}

fn init_tracing() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .try_init()
        .map_err(|err| anyhow::anyhow!(err.to_string()))?;
    Ok(())
}
