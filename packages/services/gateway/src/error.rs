//! Gateway 에러 타입

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

/// Gateway 에러
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("bad request: {message}")]
    BadRequest { message: String },

    #[error("unauthorized: {message}")]
    Unauthorized { message: String },

    #[error("too many requests: {message}")]
    TooManyRequests { message: String },

    #[error("internal error: {message}")]
    Internal { message: String },

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("core error: {0}")]
    Core(#[from] kg_core::Error),
}

impl GatewayError {
    /// 외부 호출자용 변환
    ///
    /// 존재하지 않는 키, 잘못된 시크릿, 비활성, 만료를 구분하지 않습니다.
    pub fn external(self) -> Self {
        match self {
            GatewayError::Core(e) if e.is_credential_rejection() => GatewayError::Unauthorized {
                message: "Invalid API key".to_string(),
            },
            other => other,
        }
    }
}

/// 에러 응답 JSON
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: ErrorBody,
}

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub code: String,
    pub message: String,
    #[serde(rename = "requestId", skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let (status, code, message) = match &self {
            GatewayError::BadRequest { message } => {
                (StatusCode::BAD_REQUEST, "BAD_REQUEST", message.clone())
            }
            GatewayError::Unauthorized { message } => {
                (StatusCode::UNAUTHORIZED, "UNAUTHORIZED", message.clone())
            }
            GatewayError::TooManyRequests { message } => {
                (StatusCode::TOO_MANY_REQUESTS, "TOO_MANY_REQUESTS", message.clone())
            }
            GatewayError::Internal { message } => {
                tracing::error!("Internal error: {}", message);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "INTERNAL_ERROR",
                    "Internal server error".to_string(),
                )
            }
            GatewayError::Database(e) => {
                tracing::error!("Database error: {:?}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "DATABASE_ERROR",
                    "Database operation failed".to_string(),
                )
            }
            GatewayError::Core(e) => {
                let status = StatusCode::from_u16(e.status_code())
                    .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
                if status.is_server_error() {
                    tracing::error!("Core error: {}", e);
                }
                (status, e.code(), e.to_string())
            }
        };

        let body = ErrorResponse {
            error: ErrorBody {
                code: code.to_string(),
                message,
                request_id: crate::middleware::current_request_id(),
            },
        };

        (status, Json(body)).into_response()
    }
}

pub type Result<T> = std::result::Result<T, GatewayError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_external_hides_rejection_reason() {
        for e in [
            kg_core::Error::UnknownCredential,
            kg_core::Error::InactiveCredential,
            kg_core::Error::CredentialExpired,
        ] {
            assert!(matches!(
                GatewayError::from(e).external(),
                GatewayError::Unauthorized { .. }
            ));
        }
    }

    #[test]
    fn test_external_keeps_other_errors() {
        let err = GatewayError::from(kg_core::Error::InsufficientPermission {
            required: kg_core::auth::Permission::Write,
        })
        .external();
        assert!(matches!(
            err,
            GatewayError::Core(kg_core::Error::InsufficientPermission { .. })
        ));
    }

    #[test]
    fn test_status_mapping() {
        let resp = GatewayError::from(kg_core::Error::OriginForbidden).into_response();
        assert_eq!(resp.status(), StatusCode::FORBIDDEN);

        let resp = GatewayError::TooManyRequests {
            message: "slow down".to_string(),
        }
        .into_response();
        assert_eq!(resp.status(), StatusCode::TOO_MANY_REQUESTS);
    }
}
