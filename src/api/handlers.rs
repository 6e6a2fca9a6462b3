use axum::{extract::State, Json};
use serde::Serialize;
use std::sync::Arc;

use super::state::AppState;
use crate::error::Result;
use crate::executor::FallbackReport;
use crate::scripts::ScriptSummary;

#[derive(Serialize)]
pub struct HealthResponse {
    status: &'static str,
    service: &'static str,
    version: &'static str,
}

pub async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        service: "webpilot",
        version: env!("CARGO_PKG_VERSION"),
    })
}

pub async fn list_scripts(State(state): State<Arc<AppState>>) -> Result<Json<Vec<ScriptSummary>>> {
    let summaries = state.scripts.list()?;
    Ok(Json(summaries))
}

pub async fn fallback_analytics(State(state): State<Arc<AppState>>) -> Json<FallbackReport> {
    Json(state.analytics.report(10))
}
