#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Command-line entry point for the French crime dashboard.
//!
//! Runs the API server, refreshes or trims the crime file, and prints or
//! exports prepared tables. Without a subcommand, an interactive menu
//! asks what to do.
//!
//! Uses `indicatif-log-bridge` (via [`crime_fr_cli_utils::init_logger`])
//! so log lines and progress bars share the terminal.

mod interactive;
mod summary;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use crime_fr_cli_utils::{IndicatifProgress, MultiProgress};
use crime_fr_pipeline::export::export_rankings;
use crime_fr_pipeline::views::IndicatorFilter;
use crime_fr_pipeline::{Pipeline, PrepareQuery};
use crime_fr_refresh::trim::{YearRange, trim_file};
use crime_fr_source::config::{DashboardConfig, ENV_CONFIG};

use crate::summary::TableSummary;

#[derive(Parser)]
#[command(name = "crime_fr", about = "French crime statistics dashboard tools")]
struct Cli {
    /// Configuration file layered over the embedded defaults (falls back
    /// to `CRIME_FR_CONFIG`)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

/// Filters shared by `query` and `export`.
#[derive(clap::Args, Debug, Clone, Default)]
struct FilterArgs {
    /// Year to keep
    #[arg(long)]
    year: Option<i32>,
    /// Keep every year (overrides `--year`)
    #[arg(long)]
    all_years: bool,
    /// Comma-separated commune names, matched exactly
    #[arg(long)]
    communes: Option<String>,
    /// Department code (e.g. `75`, `2A`, `971`)
    #[arg(long)]
    department: Option<String>,
}

impl FilterArgs {
    fn to_query(&self) -> PrepareQuery {
        let mut query = PrepareQuery {
            year: self.year,
            include_all_years: self.all_years,
            ..PrepareQuery::default()
        };
        if let Some(names) = &self.communes {
            query = query.with_communes(names.split(','));
        }
        if let Some(department) = &self.department {
            query = query.with_department(department.as_str());
        }
        query
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Start the dashboard API server (`BIND_ADDR`, `PORT`)
    Serve,
    /// Download the latest national export and replace the crime file
    Refresh,
    /// Convert a raw national export into the dashboard's crime file
    Trim {
        /// Raw export (`;`-separated, optionally gzip)
        input: PathBuf,
        /// Output file (default: `<data_dir>/crime_<from>_<to>.csv.gz`)
        #[arg(long)]
        output: Option<PathBuf>,
        /// First year kept
        #[arg(long, default_value = "2016")]
        from: i32,
        /// Last year kept
        #[arg(long, default_value = "2024")]
        to: i32,
    },
    /// Prepare a table and print a summary of it
    Query {
        #[command(flatten)]
        filters: FilterArgs,
        /// Indicator label, or `all`
        #[arg(long)]
        indicator: Option<String>,
        /// Number of indicators and communes listed
        #[arg(long, default_value = "10")]
        top: usize,
    },
    /// Prepare a table and write its commune rankings as CSV files
    Export {
        #[command(flatten)]
        filters: FilterArgs,
        /// Output directory
        #[arg(long, default_value = "exports")]
        dir: PathBuf,
        /// Communes per ranking
        #[arg(long, default_value = "20")]
        limit: usize,
    },
}

/// Runs the API server on a dedicated actix system.
///
/// The server uses actix-web's runtime, so it runs in a blocking task to
/// avoid nesting runtimes.
async fn serve(
    config: DashboardConfig,
    bind_addr: String,
    port: u16,
) -> Result<(), Box<dyn std::error::Error>> {
    tokio::task::spawn_blocking(move || {
        actix_web::rt::System::new().block_on(crime_fr_server::run_server_on(
            config, bind_addr, port,
        ))
    })
    .await??;
    Ok(())
}

async fn refresh(
    config: &DashboardConfig,
    multi: &MultiProgress,
) -> Result<(), Box<dyn std::error::Error>> {
    let progress = IndicatifProgress::download_bar(multi, "Downloading crime export");
    let summary = crime_fr_refresh::refresh(config, None, &progress).await?;

    println!("Saved {}", summary.path.display());
    println!("Rows: {} ({} dropped)", summary.rows, summary.dropped);
    if let Some((first, last)) = summary.years {
        println!("Years: {first}-{last}");
    }
    Ok(())
}

fn trim(
    config: &DashboardConfig,
    input: &std::path::Path,
    output: Option<PathBuf>,
    range: YearRange,
) -> Result<(), Box<dyn std::error::Error>> {
    let output = output.unwrap_or_else(|| {
        config
            .data_dir
            .join(format!("crime_{}_{}.csv.gz", range.from, range.to))
    });
    let summary = trim_file(input, &output, range)?;
    println!(
        "Saved {} ({} of {} rows kept)",
        output.display(),
        summary.rows_kept,
        summary.rows_read
    );
    Ok(())
}

fn query(
    config: DashboardConfig,
    multi: &MultiProgress,
    query: &PrepareQuery,
    indicator: &IndicatorFilter,
    top: usize,
) -> Result<(), Box<dyn std::error::Error>> {
    let progress = IndicatifProgress::task_spinner(multi, "Preparing table");
    let pipeline = Pipeline::new(config);
    let rows = pipeline.prepare(query)?;
    progress.finish_and_clear();

    let report = pipeline.sources()?.crime.report;
    if report.invalid_total() > 0 {
        log::warn!(
            "Crime file: {} unparseable years, {} unparseable counts",
            report.invalid_years,
            report.invalid_counts
        );
    }

    print!("{}", TableSummary::build(&rows, indicator, top));
    Ok(())
}

fn export(
    config: DashboardConfig,
    multi: &MultiProgress,
    query: &PrepareQuery,
    dir: &std::path::Path,
    limit: usize,
) -> Result<(), Box<dyn std::error::Error>> {
    let progress = IndicatifProgress::task_spinner(multi, "Exporting rankings");
    let pipeline = Pipeline::new(config);
    let rows = pipeline.prepare(query)?;
    let files = export_rankings(&rows, dir, limit)?;
    progress.finish(format!("Wrote {} files", files.len()));

    for file in files {
        println!("{}", file.display());
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let multi = crime_fr_cli_utils::init_logger();
    let cli = Cli::parse();

    let config_path = cli
        .config
        .or_else(|| std::env::var_os(ENV_CONFIG).map(PathBuf::from));
    let config = DashboardConfig::load(config_path.as_deref())?;

    let Some(command) = cli.command else {
        return interactive::run(config, &multi).await;
    };

    match command {
        Commands::Serve => {
            let (bind_addr, port) = crime_fr_server::bind_address_from_env();
            serve(config, bind_addr, port).await?;
        }
        Commands::Refresh => refresh(&config, &multi).await?,
        Commands::Trim {
            input,
            output,
            from,
            to,
        } => trim(&config, &input, output, YearRange { from, to })?,
        Commands::Query {
            filters,
            indicator,
            top,
        } => {
            let indicator = IndicatorFilter::from_param(indicator.as_deref());
            query(config, &multi, &filters.to_query(), &indicator, top)?;
        }
        Commands::Export {
            filters,
            dir,
            limit,
        } => export(config, &multi, &filters.to_query(), &dir, limit)?,
    }

    Ok(())
}
