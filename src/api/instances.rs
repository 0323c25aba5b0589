use crate::api::AppState;
use crate::error::Result;
use crate::store::{Instance, InstanceStore};
use axum::{
    extract::{Path, State},
    Json,
};
use serde::Serialize;
use std::sync::Arc;
use tracing::info;

#[derive(Serialize)]
pub struct InstanceListResponse {
    count: usize,
    instances: Vec<String>,
}

#[derive(Serialize)]
pub struct InstanceResponse {
    guid: String,
    #[serde(flatten)]
    instance: Instance,
}

pub async fn list_instances(
    State(state): State<Arc<AppState>>,
) -> Result<Json<InstanceListResponse>> {
    let instances = InstanceStore::new(&state.pool_manager)
        .list_instance_guids()
        .await?;

    Ok(Json(InstanceListResponse {
        count: instances.len(),
        instances,
    }))
}

/// Instance with its dials, plans and catalog service.
pub async fn get_instance(
    State(state): State<Arc<AppState>>,
    Path(guid): Path<String>,
) -> Result<Json<InstanceResponse>> {
    let instance = InstanceStore::new(&state.pool_manager)
        .load_instance(&guid)
        .await?;

    Ok(Json(InstanceResponse { guid, instance }))
}

pub async fn delete_instance(
    State(state): State<Arc<AppState>>,
    Path(guid): Path<String>,
) -> Result<Json<serde_json::Value>> {
    InstanceStore::new(&state.pool_manager)
        .delete_instance(&guid)
        .await?;

    info!("Instance {} deleted via admin API", guid);

    Ok(Json(serde_json::json!({
        "status": "deleted",
        "guid": guid,
    })))
}
