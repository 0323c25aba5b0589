use crate::api::AppState;
use crate::error::{Result, StoreError};
use crate::schema::{SeedResult, SeedValidation};
use axum::{body::Bytes, extract::State, Json};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SeedRequest {
    #[serde(default)]
    pub force: bool,
}

impl SeedRequest {
    /// An empty body means `{"force": false}`; anything else must be valid JSON
    /// whatever the Content-Type says.
    pub fn from_body(body: &[u8]) -> Result<Self> {
        if body.iter().all(u8::is_ascii_whitespace) {
            return Ok(Self::default());
        }

        serde_json::from_slice(body).map_err(|e| StoreError::InvalidRequest {
            message: format!("Invalid seed request body: {}", e),
        })
    }
}

#[derive(Serialize)]
pub struct SeedValidationResponse {
    complete: bool,
    #[serde(flatten)]
    validation: SeedValidation,
}

/// Seed the Config table. An empty body behaves like `{"force": false}`.
pub async fn run_seed(
    State(state): State<Arc<AppState>>,
    body: Bytes,
) -> Result<Json<SeedResult>> {
    let request = SeedRequest::from_body(&body)?;
    let runner = state.seed_runner()?;

    let result = if request.force {
        runner.run_seed(&state.pool_manager).await?
    } else {
        runner.run_seed_if_empty(&state.pool_manager).await?
    };

    info!(
        "Seed request (force={}): {} statements, {} rows, skipped={}",
        request.force, result.statements_executed, result.rows_inserted, result.skipped
    );

    Ok(Json(result))
}

pub async fn validate_seed(
    State(state): State<Arc<AppState>>,
) -> Result<Json<SeedValidationResponse>> {
    let validation = state
        .seed_runner()?
        .validate_seed(&state.pool_manager)
        .await?;

    Ok(Json(SeedValidationResponse {
        complete: validation.is_complete(),
        validation,
    }))
}
