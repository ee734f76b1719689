//! 공통 에러 타입
//!
//! keygate 전체에서 사용되는 에러 타입을 정의합니다.

use thiserror::Error;

use crate::auth::Permission;

pub type Result<T> = std::result::Result<T, Error>;

/// keygate 공통 에러
#[derive(Debug, Error)]
pub enum Error {
    // ─────────────────────────────────────────────────────────────────────────────
    // Verification Errors
    // ─────────────────────────────────────────────────────────────────────────────
    #[error("unknown credential")]
    UnknownCredential,

    #[error("credential is inactive")]
    InactiveCredential,

    #[error("credential expired")]
    CredentialExpired,

    #[error("credential is not valid for service '{requested}'")]
    ServiceMismatch { requested: String },

    #[error("insufficient permission: '{required}' required")]
    InsufficientPermission { required: Permission },

    // ─────────────────────────────────────────────────────────────────────────────
    // Lifecycle Errors
    // ─────────────────────────────────────────────────────────────────────────────
    #[error("credential identity already exists: {identity}")]
    DuplicateIdentity { identity: String },

    #[error("credential not found: {identity}")]
    NotFound { identity: String },

    #[error("credential already inactive: {identity}")]
    AlreadyInactive { identity: String },

    #[error("invalid permission: {value}")]
    InvalidPermission { value: String },

    #[error("invalid secret: {reason}")]
    InvalidSecret { reason: String },

    // ─────────────────────────────────────────────────────────────────────────────
    // Token Errors
    // ─────────────────────────────────────────────────────────────────────────────
    #[error("token expired")]
    TokenExpired,

    #[error("malformed token: {reason}")]
    TokenMalformed { reason: String },

    #[error("token signature mismatch")]
    TokenBadSignature,

    #[error("invalid token configuration: {reason}")]
    TokenConfig { reason: String },

    // ─────────────────────────────────────────────────────────────────────────────
    // Origin Errors
    // ─────────────────────────────────────────────────────────────────────────────
    #[error("administrative operations are restricted to internal networks")]
    OriginForbidden,

    #[error("invalid network range: {value}")]
    InvalidNetwork { value: String },

    // ─────────────────────────────────────────────────────────────────────────────
    // Crypto/Serialization Errors
    // ─────────────────────────────────────────────────────────────────────────────
    #[error("hashing error: {message}")]
    Hashing { message: String },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// HTTP 상태 코드로 변환
    pub fn status_code(&self) -> u16 {
        match self {
            // 400 Bad Request
            Error::InvalidPermission { .. }
            | Error::InvalidSecret { .. }
            | Error::InvalidNetwork { .. }
            | Error::Json(_) => 400,

            // 401 Unauthorized
            Error::UnknownCredential
            | Error::InactiveCredential
            | Error::CredentialExpired
            | Error::TokenExpired
            | Error::TokenMalformed { .. }
            | Error::TokenBadSignature => 401,

            // 403 Forbidden
            Error::ServiceMismatch { .. }
            | Error::InsufficientPermission { .. }
            | Error::OriginForbidden => 403,

            Error::NotFound { .. } => 404,

            // 409 Conflict
            Error::DuplicateIdentity { .. } | Error::AlreadyInactive { .. } => 409,

            // 500 Internal Server Error
            Error::TokenConfig { .. } | Error::Hashing { .. } => 500,
        }
    }

    /// 에러 코드 (클라이언트용)
    pub fn code(&self) -> &'static str {
        match self {
            Error::UnknownCredential => "UNKNOWN_CREDENTIAL",
            Error::InactiveCredential => "INACTIVE_CREDENTIAL",
            Error::CredentialExpired => "CREDENTIAL_EXPIRED",
            Error::ServiceMismatch { .. } => "SERVICE_MISMATCH",
            Error::InsufficientPermission { .. } => "INSUFFICIENT_PERMISSION",
            Error::DuplicateIdentity { .. } => "DUPLICATE_IDENTITY",
            Error::NotFound { .. } => "NOT_FOUND",
            Error::AlreadyInactive { .. } => "ALREADY_INACTIVE",
            Error::InvalidPermission { .. } => "INVALID_PERMISSION",
            Error::InvalidSecret { .. } => "INVALID_SECRET",
            Error::TokenExpired => "TOKEN_EXPIRED",
            Error::TokenMalformed { .. } => "TOKEN_MALFORMED",
            Error::TokenBadSignature => "TOKEN_BAD_SIGNATURE",
            Error::TokenConfig { .. } => "TOKEN_CONFIG_ERROR",
            Error::OriginForbidden => "ORIGIN_FORBIDDEN",
            Error::InvalidNetwork { .. } => "INVALID_NETWORK",
            Error::Hashing { .. } => "HASHING_ERROR",
            Error::Json(_) => "JSON_ERROR",
        }
    }

    /// 자격 증명 거부 여부
    ///
    /// 외부 호출자에게는 구체적인 사유 대신 일반화된 응답을 돌려줘야 하는 에러입니다.
    pub fn is_credential_rejection(&self) -> bool {
        matches!(
            self,
            Error::UnknownCredential | Error::InactiveCredential | Error::CredentialExpired
        )
    }
}
