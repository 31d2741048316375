//! HTTP handler functions for the crime dashboard API.

use std::sync::Arc;

use actix_web::error::BlockingError;
use actix_web::{HttpResponse, web};
use chrono::Utc;
use crime_fr_models::EnrichedRecord;
use crime_fr_pipeline::views::{
    self, COMPARISON_TOP_INDICATORS, HEATMAP_MAX_INDICATORS, IndicatorFilter, RankBy,
    RankingRequest, SERIES_TOP_INDICATORS,
};
use crime_fr_pipeline::{Pipeline, PipelineError, PrepareQuery, ensure_renderable};
use crime_fr_server_models::{
    ApiError, ApiHealth, CacheClearedResponse, CommuneSearchParams, DashboardQueryParams,
    RecordsResponse,
};
use serde::Serialize;
use thiserror::Error;

use crate::AppState;

#[derive(Debug, Error)]
enum HandlerError {
    #[error(transparent)]
    Pipeline(#[from] PipelineError),

    #[error("Worker pool unavailable: {0}")]
    Blocking(#[from] BlockingError),

    #[error("Invalid value for `{param}`: {value}")]
    InvalidParam { param: &'static str, value: String },
}

fn error_response(context: &str, e: &HandlerError) -> HttpResponse {
    match e {
        HandlerError::Pipeline(PipelineError::TooManyRows { .. })
        | HandlerError::InvalidParam { .. } => {
            log::warn!("{context}: {e}");
            HttpResponse::BadRequest().json(ApiError::new(e.to_string()))
        }
        HandlerError::Pipeline(_) | HandlerError::Blocking(_) => {
            log::error!("{context}: {e}");
            HttpResponse::InternalServerError().json(ApiError::new(format!("{context}: {e}")))
        }
    }
}

fn respond<T: Serialize>(context: &str, result: Result<T, HandlerError>) -> HttpResponse {
    match result {
        Ok(body) => HttpResponse::Ok().json(body),
        Err(e) => error_response(context, &e),
    }
}

fn prepare_query(params: &DashboardQueryParams) -> PrepareQuery {
    let names = params.commune_names();
    PrepareQuery {
        year: params.year,
        communes: (!names.is_empty()).then(|| names.into_iter().collect()),
        department: params.department.clone(),
        include_all_years: params.all_years,
    }
}

fn indicator(params: &DashboardQueryParams) -> IndicatorFilter {
    IndicatorFilter::from_param(params.indicator.as_deref())
}

/// Runs `task` against the pipeline on the blocking thread pool.
async fn run<T, F>(state: &AppState, task: F) -> Result<T, HandlerError>
where
    T: Send + 'static,
    F: FnOnce(&Pipeline) -> Result<T, PipelineError> + Send + 'static,
{
    let pipeline = Arc::clone(&state.pipeline);
    Ok(web::block(move || task(&pipeline)).await??)
}

/// Prepares the table for `params` and folds it with `fold`.
async fn view<T, F>(
    state: &AppState,
    params: &DashboardQueryParams,
    fold: F,
) -> Result<T, HandlerError>
where
    T: Send + 'static,
    F: FnOnce(&[EnrichedRecord]) -> T + Send + 'static,
{
    let query = prepare_query(params);
    run(state, move |pipeline| Ok(fold(&pipeline.prepare(&query)?))).await
}

/// `GET /api/health`
pub async fn health() -> HttpResponse {
    HttpResponse::Ok().json(ApiHealth {
        healthy: true,
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

/// `GET /api/filters`
///
/// Years, indicators, departments, and commune names for the filter
/// controls.
pub async fn filters(state: web::Data<AppState>) -> HttpResponse {
    let result = run(&state, Pipeline::filter_options).await;
    respond("Failed to load filter options", result)
}

/// `GET /api/communes?search=`
pub async fn communes(
    state: web::Data<AppState>,
    params: web::Query<CommuneSearchParams>,
) -> HttpResponse {
    let term = params.into_inner().search.unwrap_or_default();
    let result = run(&state, move |pipeline| pipeline.search_communes(&term)).await;
    respond("Failed to search communes", result)
}

/// `GET /api/records`
///
/// The prepared rows themselves, refused above the row ceiling.
pub async fn records(
    state: web::Data<AppState>,
    params: web::Query<DashboardQueryParams>,
) -> HttpResponse {
    let query = prepare_query(&params);
    match run(&state, move |pipeline| pipeline.prepare_renderable(&query)).await {
        Ok(rows) => HttpResponse::Ok().json(RecordsResponse {
            total_count: rows.len(),
            rows: &rows,
        }),
        Err(e) => error_response("Failed to prepare records", &e),
    }
}

/// `GET /api/breakdown`
pub async fn breakdown(
    state: web::Data<AppState>,
    params: web::Query<DashboardQueryParams>,
) -> HttpResponse {
    let filter = indicator(&params);
    let result = view(&state, &params, move |rows| {
        views::indicator_breakdown(rows, &filter)
    })
    .await;
    respond("Failed to compute indicator breakdown", result)
}

/// `GET /api/departments`
pub async fn departments(
    state: web::Data<AppState>,
    params: web::Query<DashboardQueryParams>,
) -> HttpResponse {
    let filter = indicator(&params);
    let result = view(&state, &params, move |rows| {
        views::department_totals(rows, &filter)
    })
    .await;
    respond("Failed to compute department totals", result)
}

/// `GET /api/rankings`
///
/// Top communes by count or by rate (`by=count|rate`).
pub async fn rankings(
    state: web::Data<AppState>,
    params: web::Query<DashboardQueryParams>,
) -> HttpResponse {
    let by = match params.by.as_deref().map(str::trim).filter(|b| !b.is_empty()) {
        None => RankBy::default(),
        Some(raw) => match raw.parse::<RankBy>() {
            Ok(by) => by,
            Err(_) => {
                let e = HandlerError::InvalidParam {
                    param: "by",
                    value: raw.to_owned(),
                };
                return error_response("Failed to rank communes", &e);
            }
        },
    };

    let defaults = RankingRequest::default();
    let request = RankingRequest {
        indicator: indicator(&params),
        by,
        limit: params.limit.unwrap_or(defaults.limit),
        measured_only: params.measured_only,
    };

    let result = view(&state, &params, move |rows| views::top_communes(rows, &request)).await;
    respond("Failed to rank communes", result)
}

/// `GET /api/series`
///
/// Yearly totals per indicator; without an indicator, the `top` (default
/// 10) largest.
pub async fn series(
    state: web::Data<AppState>,
    params: web::Query<DashboardQueryParams>,
) -> HttpResponse {
    let filter = indicator(&params);
    let top = params.top.unwrap_or(SERIES_TOP_INDICATORS);
    let result = view(&state, &params, move |rows| {
        views::time_series(rows, &filter, Some(top))
    })
    .await;
    respond("Failed to compute time series", result)
}

/// `GET /api/heatmap`
pub async fn heatmap(
    state: web::Data<AppState>,
    params: web::Query<DashboardQueryParams>,
) -> HttpResponse {
    let result = view(&state, &params, |rows| {
        views::heatmap(rows, HEATMAP_MAX_INDICATORS)
    })
    .await;
    respond("Failed to compute heatmap", result)
}

/// `GET /api/compare`
///
/// Per-commune values on the `top` (default 8) largest indicators. One
/// series per commune, so the row ceiling applies to the series count.
pub async fn compare(
    state: web::Data<AppState>,
    params: web::Query<DashboardQueryParams>,
) -> HttpResponse {
    let top = params.top.unwrap_or(COMPARISON_TOP_INDICATORS);
    let query = prepare_query(&params);
    let result = run(&state, move |pipeline| {
        let comparison = views::comparison(&pipeline.prepare(&query)?, top);
        ensure_renderable(comparison.communes.len(), pipeline.config().pipeline.max_rows)?;
        Ok(comparison)
    })
    .await;
    respond("Failed to compare communes", result)
}

/// `POST /api/cache/clear`
///
/// Drops cached source tables and prepared results so the next request
/// rereads the files.
pub async fn clear_cache(state: web::Data<AppState>) -> HttpResponse {
    state.pipeline.clear_cache();
    log::info!("Caches cleared");
    HttpResponse::Ok().json(CacheClearedResponse {
        cleared_at: Utc::now(),
    })
}
