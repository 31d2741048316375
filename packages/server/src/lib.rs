#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Actix-Web API server for the crime dashboard.
//!
//! Every data endpoint prepares a table through the shared [`Pipeline`]
//! (on the blocking thread pool, since loading reads and decompresses
//! files) and re-aggregates it for one dashboard tab.

mod handlers;

use std::sync::Arc;

use actix_cors::Cors;
use actix_web::{App, HttpServer, middleware, web};
use crime_fr_pipeline::Pipeline;
use crime_fr_source::config::DashboardConfig;

/// Shared application state.
pub struct AppState {
    /// Data pipeline with its source cache and memo.
    pub pipeline: Arc<Pipeline>,
}

impl AppState {
    /// Wraps a pipeline built from `config`.
    #[must_use]
    pub fn new(config: DashboardConfig) -> Self {
        Self {
            pipeline: Arc::new(Pipeline::new(config)),
        }
    }
}

/// Registers the `/api` routes.
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/api")
            .route("/health", web::get().to(handlers::health))
            .route("/filters", web::get().to(handlers::filters))
            .route("/communes", web::get().to(handlers::communes))
            .route("/records", web::get().to(handlers::records))
            .route("/breakdown", web::get().to(handlers::breakdown))
            .route("/departments", web::get().to(handlers::departments))
            .route("/rankings", web::get().to(handlers::rankings))
            .route("/series", web::get().to(handlers::series))
            .route("/heatmap", web::get().to(handlers::heatmap))
            .route("/compare", web::get().to(handlers::compare))
            .route("/cache/clear", web::post().to(handlers::clear_cache)),
    );
}

/// Reads the listen address from `BIND_ADDR` (default `127.0.0.1`) and
/// `PORT` (default `8080`).
#[must_use]
pub fn bind_address_from_env() -> (String, u16) {
    let bind_addr = std::env::var("BIND_ADDR").unwrap_or_else(|_| "127.0.0.1".to_string());
    let port: u16 = std::env::var("PORT")
        .ok()
        .and_then(|p| p.parse().ok())
        .unwrap_or(8080);
    (bind_addr, port)
}

/// Starts the dashboard API server on the address given by
/// [`bind_address_from_env`].
///
/// # Errors
///
/// Returns an `std::io::Result` error if the HTTP server fails to bind or
/// encounters a runtime error.
#[allow(clippy::future_not_send)]
pub async fn run_server(config: DashboardConfig) -> std::io::Result<()> {
    let (bind_addr, port) = bind_address_from_env();
    run_server_on(config, bind_addr, port).await
}

/// Starts the dashboard API server on `bind_addr:port`.
///
/// Source files are loaded lazily on the first request that needs them.
/// This is a regular async function; the caller provides the runtime
/// (e.g. via `#[actix_web::main]`).
///
/// # Errors
///
/// Returns an `std::io::Result` error if the HTTP server fails to bind or
/// encounters a runtime error.
#[allow(clippy::future_not_send)]
pub async fn run_server_on(
    config: DashboardConfig,
    bind_addr: String,
    port: u16,
) -> std::io::Result<()> {
    log::info!("Serving data from {}", config.data_dir.display());
    let state = web::Data::new(AppState::new(config));

    log::info!("Starting server on {bind_addr}:{port}");

    HttpServer::new(move || {
        let cors = Cors::permissive();

        App::new()
            .wrap(cors)
            .wrap(middleware::Logger::default())
            .app_data(state.clone())
            .configure(configure)
    })
    .bind((bind_addr, port))?
    .run()
    .await
}
