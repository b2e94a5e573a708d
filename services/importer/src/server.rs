//! HTTP status API.
//!
//! - `GET /health`: liveness
//! - `GET /status`: job counts, tile pool load and schedule
//! - `GET /jobs?limit=N`: most recently updated jobs
//! - `GET /metrics`: Prometheus exposition

use std::sync::Arc;

use axum::{
    extract::{Extension, Query},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::get,
    Router,
};
use metrics_exporter_prometheus::PrometheusHandle;
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};
use tracing::info;

use crate::config::ImporterConfig;
use crate::state::{JobRecord, JobStats, JobStore};
use crate::tiles::TilePool;

#[derive(Debug, Clone, Serialize)]
pub struct StatusResponse {
    pub service: &'static str,
    pub status: &'static str,
    pub jobs: JobStats,
    pub tile_pool: TilePoolStatus,
    pub schedule: Vec<TriggerStatus>,
    pub janitor_at: String,
    pub models: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct TilePoolStatus {
    pub workers: usize,
    pub in_flight: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct TriggerStatus {
    pub at: String,
    pub cycle: String,
    pub latency_minutes: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct JobsResponse {
    pub jobs: Vec<JobRecord>,
}

#[derive(Debug, Deserialize)]
pub struct JobsQuery {
    pub limit: Option<u32>,
}

pub struct ServerState {
    pub config: Arc<ImporterConfig>,
    pub store: Arc<JobStore>,
    pub pool: Arc<TilePool>,
    pub metrics: Option<PrometheusHandle>,
}

pub fn create_router(state: Arc<ServerState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health_handler))
        .route("/status", get(status_handler))
        .route("/jobs", get(jobs_handler))
        .route("/metrics", get(metrics_handler))
        .layer(cors)
        .layer(Extension(state))
}

async fn health_handler() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "service": "importer"
    }))
}

async fn status_handler(Extension(state): Extension<Arc<ServerState>>) -> Response {
    let jobs = match state.store.stats().await {
        Ok(stats) => stats,
        Err(e) => return internal_error(e),
    };

    let schedule = &state.config.schedule;
    Json(StatusResponse {
        service: "importer",
        status: "running",
        jobs,
        tile_pool: TilePoolStatus {
            workers: state.pool.workers(),
            in_flight: state.pool.in_flight(),
        },
        schedule: schedule
            .triggers
            .iter()
            .map(|t| TriggerStatus {
                at: t.at.format("%H:%M").to_string(),
                cycle: t.cycle.to_string(),
                latency_minutes: t.latency_minutes,
            })
            .collect(),
        janitor_at: schedule.janitor_at.format("%H:%M").to_string(),
        models: state
            .config
            .enabled_models()
            .iter()
            .map(|m| m.to_string())
            .collect(),
    })
    .into_response()
}

async fn jobs_handler(
    Extension(state): Extension<Arc<ServerState>>,
    Query(query): Query<JobsQuery>,
) -> Response {
    let limit = query.limit.unwrap_or(50).min(500);
    match state.store.list(limit).await {
        Ok(jobs) => Json(JobsResponse { jobs }).into_response(),
        Err(e) => internal_error(e),
    }
}

async fn metrics_handler(Extension(state): Extension<Arc<ServerState>>) -> Response {
    match &state.metrics {
        Some(handle) => handle.render().into_response(),
        None => (StatusCode::NOT_FOUND, "metrics recorder not installed").into_response(),
    }
}

fn internal_error(e: impl std::fmt::Display) -> Response {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(serde_json::json!({ "error": e.to_string() })),
    )
        .into_response()
}

/// Start the HTTP server.
pub async fn run_server(state: Arc<ServerState>, port: u16) -> anyhow::Result<()> {
    let app = create_router(state);
    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], port));

    info!(port = port, "Starting importer status server");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use chrono::Utc;
    use forecast_common::{IssuanceTime, Model};
    use tower::ServiceExt;

    use crate::error::ImportResult;
    use crate::orchestrator::JobKey;
    use crate::pipeline::StagedUnit;
    use crate::tiles::TileGenerator;

    struct NoopGenerator;

    #[async_trait]
    impl TileGenerator for NoopGenerator {
        async fn generate(&self, _unit: &StagedUnit) -> ImportResult<()> {
            Ok(())
        }
    }

    async fn state() -> Arc<ServerState> {
        Arc::new(ServerState {
            config: Arc::new(ImporterConfig::default()),
            store: Arc::new(JobStore::open_memory().await.unwrap()),
            pool: Arc::new(TilePool::new(Arc::new(NoopGenerator), 3)),
            metrics: None,
        })
    }

    async fn get_json(app: Router, uri: &str) -> (StatusCode, serde_json::Value) {
        let response = app
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&body).unwrap_or(serde_json::Value::Null))
    }

    #[tokio::test]
    async fn test_health() {
        let (status, body) = get_json(create_router(state().await), "/health").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["service"], "importer");
    }

    #[tokio::test]
    async fn test_status_reports_jobs_and_pool() {
        let state = state().await;
        let key = JobKey::new(Model::Gfs, IssuanceTime::parse("20240301", "00").unwrap());
        state.store.claim(&key, Utc::now()).await.unwrap();

        let (status, body) = get_json(create_router(state), "/status").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["jobs"]["running"], 1);
        assert_eq!(body["tile_pool"]["workers"], 3);
        assert_eq!(body["schedule"][0]["at"], "04:25");
        assert_eq!(body["janitor_at"], "03:05");
    }

    #[tokio::test]
    async fn test_jobs_lists_records() {
        let state = state().await;
        let key = JobKey::new(Model::Ecmwf, IssuanceTime::parse("20240301", "12").unwrap());
        state.store.claim(&key, Utc::now()).await.unwrap();

        let (status, body) = get_json(create_router(state), "/jobs?limit=5").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["jobs"][0]["model"], "ecmwf");
        assert_eq!(body["jobs"][0]["state"], "running");
    }

    #[tokio::test]
    async fn test_metrics_without_recorder_is_not_found() {
        let app = create_router(state().await);
        let response = app
            .oneshot(Request::builder().uri("/metrics").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
