//! HTTP API for health checks, pending bridges, and metrics

use crate::config::ApiConfig;
use crate::error::{BridgeError, BridgeResult};
use crate::metrics;
use crate::reconcile::{BridgeStatus, BridgeSummary, ScanResult};

use async_trait::async_trait;
use axum::{
    extract::State,
    http::{header, StatusCode},
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::RwLock;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::info;

/// Dependency checks behind `/ready`
#[async_trait]
pub trait ReadinessProbe: Send + Sync {
    /// One entry per dependency: name and whether it answered
    async fn check(&self) -> Vec<(&'static str, bool)>;
}

/// Latest reconciliation result, without secrets
#[derive(Debug, Clone, Default, Serialize)]
pub struct BridgeSnapshot {
    pub bridges: Vec<BridgeSummary>,
    pub from_block: u64,
    pub to_block: u64,
    pub scanned_at: Option<DateTime<Utc>>,
}

impl BridgeSnapshot {
    pub fn from_scan(result: &ScanResult) -> Self {
        Self {
            bridges: result.bridges.iter().map(|b| b.summary()).collect(),
            from_block: result.from_block,
            to_block: result.to_block,
            scanned_at: Some(Utc::now()),
        }
    }

    fn count(&self, status: BridgeStatus) -> usize {
        self.bridges.iter().filter(|b| b.status == status).count()
    }
}

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub probe: Arc<dyn ReadinessProbe>,
    pub snapshot: Arc<RwLock<BridgeSnapshot>>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/ready", get(readiness_check))
        .route("/bridges", get(get_bridges))
        .route("/metrics", get(metrics_handler))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Run the HTTP API server until `shutdown` resolves
pub async fn run_server<F>(config: ApiConfig, state: AppState, shutdown: F) -> BridgeResult<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let addr = format!("{}:{}", config.host, config.port);
    info!("Starting API server on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|e| BridgeError::Config(format!("cannot bind {}: {}", addr, e)))?;
    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown)
        .await
        .map_err(|e| BridgeError::Network(format!("API server: {}", e)))
}

/// Health check endpoint - basic liveness
async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

/// Readiness check - verify all dependencies
async fn readiness_check(State(state): State<AppState>) -> (StatusCode, Json<ReadinessResponse>) {
    let details: Vec<ComponentHealth> = state
        .probe
        .check()
        .await
        .into_iter()
        .map(|(component, healthy)| ComponentHealth { component, healthy })
        .collect();
    let ready = details.iter().all(|c| c.healthy);

    let status = if ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(ReadinessResponse { ready, details }))
}

/// Bridges found by the last scan
async fn get_bridges(State(state): State<AppState>) -> Json<BridgesResponse> {
    let snapshot = state.snapshot.read().await.clone();
    Json(BridgesResponse {
        pending: snapshot.count(BridgeStatus::Pending),
        ready: snapshot.count(BridgeStatus::Ready),
        unknown: snapshot.count(BridgeStatus::Unknown),
        snapshot,
    })
}

async fn metrics_handler() -> impl IntoResponse {
    match metrics::encode() {
        Ok(body) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            body,
        ),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            [(header::CONTENT_TYPE, "text/plain")],
            e.to_string(),
        ),
    }
}

// Response types

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

#[derive(Serialize)]
struct ReadinessResponse {
    ready: bool,
    details: Vec<ComponentHealth>,
}

#[derive(Serialize)]
struct ComponentHealth {
    component: &'static str,
    healthy: bool,
}

#[derive(Serialize)]
struct BridgesResponse {
    pending: usize,
    ready: usize,
    unknown: usize,
    #[serde(flatten)]
    snapshot: BridgeSnapshot,
}
