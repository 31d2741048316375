//! Interactive menu shown when `crime_fr` runs without a subcommand.

use dialoguer::{Confirm, Input, Select};

use crime_fr_cli_utils::MultiProgress;
use crime_fr_pipeline::PrepareQuery;
use crime_fr_pipeline::views::IndicatorFilter;
use crime_fr_source::config::DashboardConfig;

enum Action {
    Serve,
    Refresh,
    Query,
    Export,
}

impl Action {
    const ALL: &[Self] = &[Self::Serve, Self::Refresh, Self::Query, Self::Export];

    #[must_use]
    const fn label(&self) -> &'static str {
        match self {
            Self::Serve => "Start server",
            Self::Refresh => "Refresh crime data",
            Self::Query => "Summarize a table",
            Self::Export => "Export commune rankings",
        }
    }
}

fn prompt_query() -> Result<PrepareQuery, dialoguer::Error> {
    let year: String = Input::new()
        .with_prompt("Year (blank for every year)")
        .allow_empty(true)
        .interact_text()?;

    let communes: String = Input::new()
        .with_prompt("Communes, comma-separated (blank for all)")
        .allow_empty(true)
        .interact_text()?;

    let department: String = Input::new()
        .with_prompt("Department (blank for all)")
        .allow_empty(true)
        .interact_text()?;

    let mut query = match year.trim().parse::<i32>() {
        Ok(year) => PrepareQuery::for_year(year),
        Err(_) => PrepareQuery::all_years(),
    };
    if !communes.trim().is_empty() {
        query = query.with_communes(communes.split(','));
    }
    if !department.trim().is_empty() {
        query = query.with_department(department);
    }
    Ok(query)
}

async fn serve(config: DashboardConfig) -> Result<(), Box<dyn std::error::Error>> {
    let (default_addr, default_port) = crime_fr_server::bind_address_from_env();

    let bind_addr: String = Input::new()
        .with_prompt("Bind address")
        .default(default_addr.clone())
        .interact_text()
        .unwrap_or(default_addr);

    let port: u16 = Input::new()
        .with_prompt("Port")
        .default(default_port)
        .interact_text()
        .unwrap_or(default_port);

    if !Confirm::new()
        .with_prompt(format!("Start server on {bind_addr}:{port}?"))
        .default(true)
        .interact()
        .unwrap_or(true)
    {
        println!("Cancelled.");
        return Ok(());
    }

    crate::serve(config, bind_addr, port).await
}

/// Asks what to do, then runs it.
///
/// # Errors
///
/// Returns any prompt error or the error of the chosen action.
pub async fn run(
    config: DashboardConfig,
    multi: &MultiProgress,
) -> Result<(), Box<dyn std::error::Error>> {
    println!("French Crime Dashboard");
    println!();

    let labels: Vec<&str> = Action::ALL.iter().map(Action::label).collect();

    let idx = Select::new()
        .with_prompt("What would you like to do?")
        .items(&labels)
        .default(0)
        .interact()?;

    match Action::ALL[idx] {
        Action::Serve => serve(config).await?,
        Action::Refresh => {
            if Confirm::new()
                .with_prompt(format!("Download {}?", config.refresh.url))
                .default(true)
                .interact()?
            {
                crate::refresh(&config, multi).await?;
            }
        }
        Action::Query => {
            let query = prompt_query()?;
            let indicator: String = Input::new()
                .with_prompt("Indicator")
                .default(IndicatorFilter::ALL.to_string())
                .interact_text()?;
            let indicator = IndicatorFilter::from_param(Some(&indicator));
            crate::query(config, multi, &query, &indicator, 10)?;
        }
        Action::Export => {
            let query = prompt_query()?;
            let dir: String = Input::new()
                .with_prompt("Output directory")
                .default("exports".to_string())
                .interact_text()?;
            crate::export(config, multi, &query, std::path::Path::new(&dir), 20)?;
        }
    }

    Ok(())
}
