use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Connection failed to {database}: {cause}")]
    ConnectionFailed { database: String, cause: String },

    #[error("Migration {migration} failed: {cause}")]
    MigrationFailed { migration: String, cause: String },

    #[error("Seed statement {statement} failed: {cause}")]
    SeedFailed { statement: usize, cause: String },

    #[error("Query failed during {operation}: {cause}")]
    QueryFailed { operation: String, cause: String },

    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    #[error("Invalid request: {message}")]
    InvalidRequest { message: String },

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl StoreError {
    pub fn not_found(entity: &'static str, id: impl Into<String>) -> Self {
        StoreError::NotFound {
            entity,
            id: id.into(),
        }
    }

    pub fn query(operation: impl Into<String>, err: impl std::fmt::Display) -> Self {
        StoreError::QueryFailed {
            operation: operation.into(),
            cause: err.to_string(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cause: Option<String>,
}

impl IntoResponse for StoreError {
    fn into_response(self) -> Response {
        let (status, error_response) = match &self {
            StoreError::ConnectionFailed { database, cause } => (
                StatusCode::SERVICE_UNAVAILABLE,
                ErrorResponse {
                    error: "connection_failed".to_string(),
                    message: format!("Failed to connect to database '{}'", database),
                    cause: Some(cause.clone()),
                },
            ),
            StoreError::MigrationFailed { migration, cause } => (
                StatusCode::INTERNAL_SERVER_ERROR,
                ErrorResponse {
                    error: "migration_failed".to_string(),
                    message: format!("Migration {} failed", migration),
                    cause: Some(cause.clone()),
                },
            ),
            StoreError::SeedFailed { statement, cause } => (
                StatusCode::INTERNAL_SERVER_ERROR,
                ErrorResponse {
                    error: "seed_failed".to_string(),
                    message: format!("Seed statement #{} failed, nothing was inserted", statement),
                    cause: Some(cause.clone()),
                },
            ),
            StoreError::QueryFailed { operation, cause } => (
                StatusCode::INTERNAL_SERVER_ERROR,
                ErrorResponse {
                    error: "query_failed".to_string(),
                    message: format!("Query failed during {}", operation),
                    cause: Some(cause.clone()),
                },
            ),
            StoreError::NotFound { entity, id } => (
                StatusCode::NOT_FOUND,
                ErrorResponse {
                    error: "not_found".to_string(),
                    message: format!("{} '{}' not found", entity, id),
                    cause: None,
                },
            ),
            StoreError::InvalidRequest { message } => (
                StatusCode::BAD_REQUEST,
                ErrorResponse {
                    error: "invalid_request".to_string(),
                    message: message.clone(),
                    cause: None,
                },
            ),
            StoreError::Serialization(msg) => (
                StatusCode::UNPROCESSABLE_ENTITY,
                ErrorResponse {
                    error: "serialization_error".to_string(),
                    message: "Stored value could not be decoded".to_string(),
                    cause: Some(msg.clone()),
                },
            ),
            StoreError::Internal(msg) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                ErrorResponse {
                    error: "internal_error".to_string(),
                    message: msg.clone(),
                    cause: None,
                },
            ),
        };

        (status, Json(error_response)).into_response()
    }
}

impl From<tokio_postgres::Error> for StoreError {
    fn from(err: tokio_postgres::Error) -> Self {
        StoreError::Internal(err.to_string())
    }
}

impl From<deadpool_postgres::PoolError> for StoreError {
    fn from(err: deadpool_postgres::PoolError) -> Self {
        StoreError::Internal(format!("Pool error: {}", err))
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        StoreError::Serialization(err.to_string())
    }
}

impl From<std::io::Error> for StoreError {
    fn from(err: std::io::Error) -> Self {
        StoreError::Internal(format!("IO error: {}", err))
    }
}

impl From<anyhow::Error> for StoreError {
    fn from(err: anyhow::Error) -> Self {
        StoreError::Internal(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, StoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes() {
        let resp = StoreError::not_found("Instance", "abc").into_response();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);

        let resp = StoreError::SeedFailed {
            statement: 2,
            cause: "duplicate".to_string(),
        }
        .into_response();
        assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);

        let resp = StoreError::InvalidRequest {
            message: "bad".to_string(),
        }
        .into_response();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn test_display() {
        let err = StoreError::MigrationFailed {
            migration: "20161115034854_create_usb_database".to_string(),
            cause: "syntax error".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Migration 20161115034854_create_usb_database failed: syntax error"
        );
        assert_eq!(
            StoreError::not_found("Dial", "d1").to_string(),
            "Dial not found: d1"
        );
    }
}
