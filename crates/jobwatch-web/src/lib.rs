//! Axum + Askama dashboard over the job-count store.

mod charts;

use std::path::PathBuf;
use std::sync::Arc;

use askama::Template;
use axum::{
    extract::{Path as AxumPath, State},
    http::{header, StatusCode},
    response::{Html, IntoResponse, Response},
    routing::get,
    Json, Router,
};
use jobwatch_core::{format_date, CitySummary};
use jobwatch_storage::{city_history, full_series, overview, RecordStore};
use tokio::net::TcpListener;
use tracing::{error, info};

pub use charts::{city_trend_figure, latest_bar_figure, time_series_figure};

pub const CRATE_NAME: &str = "jobwatch-web";

#[derive(Clone)]
pub struct AppState {
    pub store: RecordStore,
    pub workspace_root: PathBuf,
}

impl AppState {
    pub fn new(store: RecordStore, workspace_root: impl Into<PathBuf>) -> Self {
        Self {
            store,
            workspace_root: workspace_root.into(),
        }
    }
}

#[derive(Debug, Clone)]
struct CityRow {
    location: String,
    job_count: i64,
    href: String,
}

#[derive(Debug, Clone)]
struct LocationLink {
    name: String,
    href: String,
}

#[derive(Debug, Clone)]
struct HistoryRow {
    date: String,
    job_count: i64,
}

#[derive(Debug, Clone)]
struct StatsView {
    current: i64,
    average: String,
    max: i64,
    min: i64,
    latest_date: String,
    observations: usize,
}

impl From<&CitySummary> for StatsView {
    fn from(summary: &CitySummary) -> Self {
        Self {
            current: summary.current,
            average: format!("{:.1}", summary.average),
            max: summary.max,
            min: summary.min,
            latest_date: format_date(summary.latest_date),
            observations: summary.observations,
        }
    }
}

#[derive(Template)]
#[template(path = "index.html")]
struct IndexTemplate {
    latest_date: String,
    total_jobs: i64,
    cities: Vec<CityRow>,
    locations: Vec<LocationLink>,
}

#[derive(Template)]
#[template(path = "city_detail.html")]
struct CityDetailTemplate {
    location: String,
    chart_url: String,
    stats: Option<StatsView>,
    history: Vec<HistoryRow>,
}

pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/", get(index_handler))
        .route("/city/{location}", get(city_detail_handler))
        .route("/api/charts/series", get(series_chart_handler))
        .route("/api/charts/latest", get(latest_chart_handler))
        .route("/api/charts/city/{location}", get(city_chart_handler))
        .route("/assets/static/app.css", get(app_css_handler))
        .with_state(Arc::new(state))
}

pub async fn serve(state: AppState, port: u16) -> anyhow::Result<()> {
    let listener = TcpListener::bind(("0.0.0.0", port)).await?;
    info!(port, "dashboard listening");
    axum::serve(listener, app(state)).await?;
    Ok(())
}

fn city_href(location: &str) -> String {
    format!("/city/{}", urlencoding::encode(location))
}

async fn index_handler(State(state): State<Arc<AppState>>) -> Response {
    let view = match overview(&state.store).await {
        Ok(view) => view,
        Err(err) => return server_error(err.into()),
    };
    let locations = match state.store.locations().await {
        Ok(names) => names,
        Err(err) => return server_error(err.into()),
    };
    render_html(IndexTemplate {
        latest_date: view.latest_date.map(format_date).unwrap_or_else(|| "n/a".into()),
        total_jobs: view.total_jobs,
        cities: view
            .per_location_latest
            .iter()
            .map(|r| CityRow {
                location: r.location.clone(),
                job_count: r.job_count,
                href: city_href(&r.location),
            })
            .collect(),
        locations: locations
            .into_iter()
            .map(|name| LocationLink {
                href: city_href(&name),
                name,
            })
            .collect(),
    })
}

async fn city_detail_handler(
    State(state): State<Arc<AppState>>,
    AxumPath(location): AxumPath<String>,
) -> Response {
    let history = match city_history(&state.store, &location).await {
        Ok(history) => history,
        Err(err) => return server_error(err.into()),
    };
    render_html(CityDetailTemplate {
        chart_url: format!("/api/charts/city/{}", urlencoding::encode(&location)),
        location,
        stats: history.summary.as_ref().map(StatsView::from),
        history: history
            .records
            .iter()
            .map(|r| HistoryRow {
                date: format_date(r.date),
                job_count: r.job_count,
            })
            .collect(),
    })
}

async fn series_chart_handler(State(state): State<Arc<AppState>>) -> Response {
    match full_series(&state.store).await {
        Ok(records) => Json(time_series_figure(&records)).into_response(),
        Err(err) => server_error(err.into()),
    }
}

async fn latest_chart_handler(State(state): State<Arc<AppState>>) -> Response {
    match overview(&state.store).await {
        Ok(view) => Json(latest_bar_figure(view.latest_date, &view.per_location_latest)).into_response(),
        Err(err) => server_error(err.into()),
    }
}

async fn city_chart_handler(
    State(state): State<Arc<AppState>>,
    AxumPath(location): AxumPath<String>,
) -> Response {
    match city_history(&state.store, &location).await {
        Ok(history) if history.summary.is_none() => {
            (StatusCode::NOT_FOUND, Json(serde_json::json!({"error": "unknown location"}))).into_response()
        }
        Ok(history) => Json(city_trend_figure(&location, &history.records)).into_response(),
        Err(err) => server_error(err.into()),
    }
}

async fn app_css_handler(State(state): State<Arc<AppState>>) -> Response {
    let css_path = state.workspace_root.join("assets/static/app.css");
    match tokio::fs::read_to_string(&css_path).await {
        Ok(css) => ([(header::CONTENT_TYPE, "text/css; charset=utf-8")], css).into_response(),
        Err(_) => (StatusCode::NOT_FOUND, Html("/* missing app.css */".to_string())).into_response(),
    }
}

fn render_html<T: Template>(tpl: T) -> Response {
    match tpl.render() {
        Ok(html) => Html(html).into_response(),
        Err(err) => server_error(anyhow::anyhow!(err.to_string())),
    }
}

fn server_error(err: anyhow::Error) -> Response {
    error!(error = %err, "request failed");
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Html(format!("Server error: {}", err)),
    )
        .into_response()
}
