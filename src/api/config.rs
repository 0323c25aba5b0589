use crate::api::AppState;
use crate::error::{Result, StoreError};
use crate::store::{BrokerConfiguration, Component, ConfigEntry, ConfigStore};
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    pub component: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct SetValueRequest {
    pub value: String,
}

#[derive(Serialize)]
pub struct ConfigListResponse {
    count: usize,
    entries: Vec<ConfigEntry>,
}

#[derive(Serialize)]
pub struct DeleteResponse {
    status: String,
    removed: u64,
}

pub async fn list_config(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ListQuery>,
) -> Result<Json<ConfigListResponse>> {
    let component = query
        .component
        .as_deref()
        .map(str::parse::<Component>)
        .transpose()?;

    let entries = ConfigStore::new(&state.pool_manager)
        .list_entries(component.as_ref().map(Component::as_str))
        .await?;

    Ok(Json(ConfigListResponse {
        count: entries.len(),
        entries,
    }))
}

pub async fn get_config(
    State(state): State<Arc<AppState>>,
    Path((component, key)): Path<(String, String)>,
) -> Result<Json<ConfigEntry>> {
    let component: Component = component.parse()?;

    let entry = ConfigStore::new(&state.pool_manager)
        .get_entry(&key, component.as_str())
        .await?
        .ok_or_else(|| StoreError::not_found("Config", format!("{}/{}", component, key)))?;

    Ok(Json(entry))
}

pub async fn put_config(
    State(state): State<Arc<AppState>>,
    Path((component, key)): Path<(String, String)>,
    Json(request): Json<SetValueRequest>,
) -> Result<(StatusCode, Json<ConfigEntry>)> {
    let component: Component = component.parse()?;

    if key.trim().is_empty() || key.len() > 255 {
        return Err(StoreError::InvalidRequest {
            message: "Config key must be 1-255 characters".to_string(),
        });
    }

    ConfigStore::new(&state.pool_manager)
        .set_value(&key, component.as_str(), &request.value)
        .await?;

    info!("Config {}/{} updated via admin API", component, key);

    Ok((
        StatusCode::OK,
        Json(ConfigEntry::new(&key, request.value, component)),
    ))
}

pub async fn delete_config(
    State(state): State<Arc<AppState>>,
    Path((component, key)): Path<(String, String)>,
) -> Result<Json<DeleteResponse>> {
    let component: Component = component.parse()?;

    let removed = ConfigStore::new(&state.pool_manager)
        .delete_value(&key, component.as_str())
        .await?;

    info!("Config {}/{} deleted via admin API", component, key);

    Ok(Json(DeleteResponse {
        status: "deleted".to_string(),
        removed,
    }))
}

pub async fn get_configuration(
    State(state): State<Arc<AppState>>,
) -> Result<Json<BrokerConfiguration>> {
    let configuration = ConfigStore::new(&state.pool_manager)
        .load_configuration()
        .await?;
    Ok(Json(configuration))
}
