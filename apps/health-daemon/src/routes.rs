use crate::error::ApiError;
use crate::triggers::{TriggerOutcome, Triggers};
use crate::watchdog::{Health, Verdict};
use axum::extract::{Path, State};
use axum::http::{header, StatusCode};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use battery_link::{BatteryCommand, BatteryInfo, BatterySnapshot, MonitorHandle, MonitorStatus};
use health_cache::{MetricsHub, ResourceRegistry};
use serde_json::{json, Value};
use std::sync::Arc;
use tower_http::cors::CorsLayer;

#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<ResourceRegistry>,
    pub battery: Option<MonitorHandle>,
    pub health: Health,
    pub metrics: MetricsHub,
    pub triggers: Arc<Triggers>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(all_resources))
        .route("/healthz", get(healthz))
        .route("/metrics", get(metrics))
        .route("/battery/history", get(battery_history))
        .route("/battery/info", get(battery_info))
        .route("/battery/query", post(battery_query))
        .route("/battery/status", get(battery_status))
        .route("/trigger/:name", post(trigger))
        .route("/:resource", get(resource))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

fn battery(state: &AppState) -> Result<&MonitorHandle, ApiError> {
    state
        .battery
        .as_ref()
        .ok_or_else(|| ApiError::NotFound("battery monitor is disabled".to_string()))
}

async fn all_resources(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    let registry = state.registry.clone();
    let value = tokio::task::spawn_blocking(move || registry.resolve_all()).await??;
    Ok(Json(value))
}

async fn resource(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<Value>, ApiError> {
    if !state.registry.contains(&name) {
        return Err(ApiError::NotFound(format!("unknown resource '{name}'")));
    }
    let registry = state.registry.clone();
    let value = tokio::task::spawn_blocking(move || registry.resolve(&name)).await??;
    Ok(Json(value))
}

async fn battery_history(
    State(state): State<AppState>,
) -> Result<Json<Vec<BatterySnapshot>>, ApiError> {
    Ok(Json(battery(&state)?.history()))
}

async fn battery_info(State(state): State<AppState>) -> Result<Json<BatteryInfo>, ApiError> {
    Ok(Json(battery(&state)?.info_or_placeholder()))
}

/// Re-requests device info; the answer lands in `/battery/info`.
async fn battery_query(State(state): State<AppState>) -> Result<(StatusCode, Json<Value>), ApiError> {
    battery(&state)?.query_info();
    let queued = BatteryCommand::QueryInfo.to_string();
    Ok((StatusCode::ACCEPTED, Json(json!({ "queued": queued }))))
}

async fn battery_status(State(state): State<AppState>) -> Result<Json<MonitorStatus>, ApiError> {
    Ok(Json(battery(&state)?.status()))
}

async fn healthz(State(state): State<AppState>) -> (StatusCode, Json<Verdict>) {
    let verdict = state.health.verdict();
    let code = if verdict.healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (code, Json(verdict))
}

async fn metrics(State(state): State<AppState>) -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        state.metrics.encode_text(),
    )
}

async fn trigger(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<TriggerOutcome>, ApiError> {
    Ok(Json(state.triggers.fire(&name)?))
}
