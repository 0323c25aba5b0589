use crate::api::AppState;
use crate::error::Result;
use crate::schema::MigrationStatus;
use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;
use tracing::info;

#[derive(Serialize)]
pub struct MigrateResponse {
    status: String,
    database: String,
    migrations_applied: usize,
    execution_time_ms: u64,
}

#[derive(Serialize)]
pub struct MigrationStatusResponse {
    database: String,
    schema: String,
    pending: usize,
    migrations: Vec<MigrationStatus>,
}

pub async fn migrate_schema(State(state): State<Arc<AppState>>) -> Result<impl IntoResponse> {
    let start_time = Instant::now();
    let pool_manager = &state.pool_manager;

    let runner = state.migration_runner()?;
    let applied = runner.run_migrations(pool_manager).await?;

    let execution_time_ms = start_time.elapsed().as_millis() as u64;

    info!(
        "Migration run on {}: {} applied in {}ms",
        pool_manager.database(),
        applied,
        execution_time_ms
    );

    Ok((
        StatusCode::OK,
        Json(MigrateResponse {
            status: "completed".to_string(),
            database: pool_manager.database().to_string(),
            migrations_applied: applied,
            execution_time_ms,
        }),
    ))
}

pub async fn migration_status(
    State(state): State<Arc<AppState>>,
) -> Result<Json<MigrationStatusResponse>> {
    let pool_manager = &state.pool_manager;
    let migrations = state.migration_runner()?.status(pool_manager).await?;
    let pending = migrations.iter().filter(|m| !m.applied).count();

    Ok(Json(MigrationStatusResponse {
        database: pool_manager.database().to_string(),
        schema: pool_manager.schema().to_string(),
        pending,
        migrations,
    }))
}
