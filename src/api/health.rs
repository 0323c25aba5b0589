use crate::api::AppState;
use axum::{extract::State, Json};
use serde::Serialize;
use std::sync::Arc;

#[derive(Serialize)]
pub struct HealthResponse {
    status: String,
    postgres_connected: bool,
    database: String,
    schema: String,
    pool_size: usize,
    uptime_seconds: u64,
}

pub async fn health_check(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    let pool_manager = &state.pool_manager;
    let postgres_connected = pool_manager.pool().get().await.is_ok();

    Json(HealthResponse {
        status: if postgres_connected {
            "healthy".to_string()
        } else {
            "degraded".to_string()
        },
        postgres_connected,
        database: pool_manager.database().to_string(),
        schema: pool_manager.schema().to_string(),
        pool_size: pool_manager.pool_size(),
        uptime_seconds: state.start_time.elapsed().as_secs(),
    })
}
