// HTTP API Error Types
use axum::{http::StatusCode, response::IntoResponse, Json};
use serde_json::{json, Value};

use crate::tenancy::TenancyError;

/// HTTP API error with appropriate status codes and client-friendly messages
#[derive(Debug)]
pub enum ApiError {
    // 400 Bad Request
    BadRequest(String),

    // 404 Not Found
    NotFound(String),

    // 409 Conflict
    Conflict(String),

    // 500 Internal Server Error
    InternalServerError(String),

    // 503 Service Unavailable
    ServiceUnavailable(String),
}

impl ApiError {
    /// Get HTTP status code
    pub fn status_code(&self) -> u16 {
        match self {
            ApiError::BadRequest(_) => 400,
            ApiError::NotFound(_) => 404,
            ApiError::Conflict(_) => 409,
            ApiError::InternalServerError(_) => 500,
            ApiError::ServiceUnavailable(_) => 503,
        }
    }

    /// Get client-safe error message
    pub fn message(&self) -> &str {
        match self {
            ApiError::BadRequest(msg)
            | ApiError::NotFound(msg)
            | ApiError::Conflict(msg)
            | ApiError::InternalServerError(msg)
            | ApiError::ServiceUnavailable(msg) => msg,
        }
    }

    /// Get error code for client handling
    pub fn error_code(&self) -> &'static str {
        match self {
            ApiError::BadRequest(_) => "BAD_REQUEST",
            ApiError::NotFound(_) => "NOT_FOUND",
            ApiError::Conflict(_) => "CONFLICT",
            ApiError::InternalServerError(_) => "INTERNAL_SERVER_ERROR",
            ApiError::ServiceUnavailable(_) => "SERVICE_UNAVAILABLE",
        }
    }

    /// Convert to JSON response body
    pub fn to_json(&self) -> Value {
        json!({
            "error": true,
            "message": self.message(),
            "code": self.error_code()
        })
    }
}

// Static constructor methods
impl ApiError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        ApiError::BadRequest(message.into())
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        ApiError::NotFound(message.into())
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        ApiError::Conflict(message.into())
    }

    pub fn internal_server_error(message: impl Into<String>) -> Self {
        ApiError::InternalServerError(message.into())
    }

    pub fn service_unavailable(message: impl Into<String>) -> Self {
        ApiError::ServiceUnavailable(message.into())
    }
}

impl From<TenancyError> for ApiError {
    fn from(err: TenancyError) -> Self {
        match err {
            TenancyError::InvalidTenantId(id) => {
                ApiError::bad_request(format!("Invalid tenant id: {}", id))
            }
            TenancyError::TenantNotFound(id) => {
                ApiError::not_found(format!("Tenant not found: {}", id))
            }
            TenancyError::IllegalStatusTransition { .. } => {
                ApiError::conflict("Tenant storage is in a conflicting state")
            }
            TenancyError::ProvisioningTimeout(msg) => {
                tracing::error!("Provisioning timeout: {}", msg);
                ApiError::service_unavailable("Tenant provisioning timed out, please retry")
            }
            TenancyError::NamespaceCreationFailed(msg) => {
                tracing::error!("Namespace creation failed: {}", msg);
                ApiError::service_unavailable("Tenant storage is temporarily unavailable")
            }
            TenancyError::TenantContextFailure(msg) => {
                tracing::error!("Tenant context failure: {}", msg);
                ApiError::internal_server_error("Failed to establish tenant context")
            }
            TenancyError::JobSubmission(msg) => {
                tracing::error!("Job submission failed: {}", msg);
                ApiError::service_unavailable("Background provisioning is unavailable")
            }
            TenancyError::Database(db_err) => {
                tracing::error!("Database error: {}", db_err);
                ApiError::service_unavailable("Database temporarily unavailable")
            }
            TenancyError::Query(sqlx_err) => {
                // Log the real error but return generic message
                tracing::error!("SQLx error: {}", sqlx_err);
                ApiError::internal_server_error("An error occurred while processing your request")
            }
        }
    }
}

// Standard error trait implementations
impl std::fmt::Display for ApiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message())
    }
}

impl std::error::Error for ApiError {}

// Automatic HTTP response conversion for Axum
impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        let status =
            StatusCode::from_u16(self.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        (status, Json(self.to_json())).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn tenancy_errors_map_to_sensible_statuses() {
        let cases: Vec<(TenancyError, u16)> = vec![
            (TenancyError::InvalidTenantId("x".into()), 400),
            (TenancyError::TenantNotFound(Uuid::new_v4()), 404),
            (TenancyError::ProvisioningTimeout("t".into()), 503),
            (TenancyError::TenantContextFailure("c".into()), 500),
        ];
        for (err, status) in cases {
            assert_eq!(ApiError::from(err).status_code(), status);
        }
    }

    #[test]
    fn raw_driver_errors_are_not_exposed() {
        let api: ApiError = TenancyError::Query(sqlx::Error::PoolClosed).into();
        assert!(!api.message().to_lowercase().contains("pool"));
    }
}
