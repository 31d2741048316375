#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Standalone binary for the crime dashboard API server.
//!
//! Reads the configuration file named by `CRIME_FR_CONFIG`, if set, on
//! top of the embedded defaults.

use crime_fr_source::config::{DashboardConfig, ENV_CONFIG};

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    pretty_env_logger::init_custom_env("RUST_LOG");

    let path = std::env::var_os(ENV_CONFIG).map(std::path::PathBuf::from);
    let config = DashboardConfig::load(path.as_deref())
        .map_err(|e| std::io::Error::other(e.to_string()))?;

    crime_fr_server::run_server(config).await
}
