//! 외부 인증 핸들러
//!
//! API Key 검증, 토큰 교환, Bearer 토큰 검증을 제공합니다. 출처와 무관하게 열려 있습니다.

use std::str::FromStr;
use std::sync::Arc;

use axum::extract::{Query, State};
use axum::http::HeaderMap;
use axum::{Extension, Json};
use chrono::Utc;
use serde::{Deserialize, Serialize};

use kg_core::auth::{Permission, PermissionSet, TokenKind};
use kg_core::origin::ClientOrigin;

use crate::error::{GatewayError, Result};
use crate::state::AppState;
use crate::verify::{Authorized, VerifiedIdentity, VerifyRequest};

const API_KEY_HEADER: &str = "x-api-key";
const SERVICE_HEADER: &str = "x-service-name";

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub api_key: String,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub scopes: Option<Vec<String>>,
}

#[derive(Debug, Serialize)]
pub struct TokenResponse {
    pub access_token: String,
    pub token_type: &'static str,
    pub expires_in: i64,
}

#[derive(Debug, Default, Deserialize)]
pub struct VerifyQuery {
    #[serde(default)]
    pub permission: Option<String>,
}

impl VerifyQuery {
    fn required(&self) -> Result<Option<Permission>> {
        self.permission
            .as_deref()
            .map(Permission::from_str)
            .transpose()
            .map_err(GatewayError::from)
    }
}

/// 인증 상태 응답
#[derive(Debug, Serialize)]
pub struct AuthStatus {
    pub authenticated: bool,
    pub auth_type: &'static str,
    pub message: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub identity: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub service: Option<String>,
    pub scopes: Vec<String>,
    /// Bearer 토큰의 남은 수명 (초)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_in: Option<i64>,
}

fn header<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

/// API Key 검사 + rate limit (사용 기록 전)
async fn authorize_api_key(
    state: &AppState,
    secret: &str,
    required: Option<Permission>,
    service: Option<&str>,
) -> Result<Authorized> {
    let authorized = state
        .engine
        .authorize(
            VerifyRequest::new(secret)
                .require(required)
                .for_service(service),
        )
        .await
        .map_err(GatewayError::external)?;

    if !state.check_rate_limit(authorized.identity().as_str()) {
        tracing::warn!(identity = %authorized.identity().masked(), "Rate limit exceeded");
        return Err(GatewayError::TooManyRequests {
            message: "Rate limit exceeded".to_string(),
        });
    }

    Ok(authorized)
}

/// 사용 기록
async fn commit_api_key(
    state: &AppState,
    client: &ClientOrigin,
    authorized: Authorized,
) -> Result<VerifiedIdentity> {
    let client_ip = client.client_ip.map(|ip| ip.to_string());
    state
        .engine
        .commit(authorized, client_ip.as_deref())
        .await
        .map_err(GatewayError::external)
}

/// API Key 검증 (검사, rate limit, 사용 기록)
async fn authenticate_api_key(
    state: &AppState,
    client: &ClientOrigin,
    secret: &str,
    required: Option<Permission>,
    service: Option<&str>,
) -> Result<VerifiedIdentity> {
    let authorized = authorize_api_key(state, secret, required, service).await?;
    commit_api_key(state, client, authorized).await
}

fn api_key_status(verified: VerifiedIdentity) -> AuthStatus {
    AuthStatus {
        authenticated: true,
        auth_type: "api_key",
        message: "Valid API Key",
        identity: Some(verified.identity.to_string()),
        user: Some(verified.display_name),
        service: Some(verified.service_scope),
        scopes: verified.permissions.to_strings(),
        expires_in: None,
    }
}

fn bearer_status(state: &AppState, token: &str, required: Option<Permission>) -> Result<AuthStatus> {
    let claims = state.issuer.validate(token)?;
    if let Some(required) = required {
        if !claims.allows(required) {
            return Err(kg_core::Error::InsufficientPermission { required }.into());
        }
    }
    Ok(AuthStatus {
        authenticated: true,
        auth_type: "jwt",
        message: "Valid JWT token",
        identity: Some(claims.kid.to_string()),
        user: Some(claims.sub.clone()),
        service: None,
        scopes: claims.scopes.to_strings(),
        expires_in: Some(claims.remaining_ttl(Utc::now())),
    })
}

/// POST /auth/login
///
/// 검증된 API Key를 Access Token으로 교환합니다. 요청한 scope는 키의 권한 안에 있어야 하며,
/// 거부된 교환은 사용으로 기록되지 않습니다.
pub async fn login(
    State(state): State<Arc<AppState>>,
    Extension(client): Extension<ClientOrigin>,
    Json(req): Json<LoginRequest>,
) -> Result<Json<TokenResponse>> {
    let requested = match &req.scopes {
        Some(scopes) if !scopes.is_empty() => {
            Some(PermissionSet::from_strings(scopes.as_slice())?)
        }
        _ => None,
    };

    let authorized = authorize_api_key(&state, &req.api_key, None, None).await?;

    if let Some(requested) = &requested {
        let granted = authorized.permissions();
        if !granted.covers(requested) {
            let required = requested
                .iter()
                .find(|p| !granted.allows(*p))
                .unwrap_or(Permission::Admin);
            return Err(kg_core::Error::InsufficientPermission { required }.into());
        }
    }

    let verified = commit_api_key(&state, &client, authorized).await?;
    let scopes = requested.unwrap_or_else(|| verified.permissions.clone());

    let subject = req
        .username
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .unwrap_or("api_user");

    let (token, claims) = state.issuer.issue(&verified.identity, subject, scopes)?;
    tracing::info!(identity = %verified.identity.masked(), jti = %claims.jti, "Issued access token");

    Ok(Json(TokenResponse {
        access_token: token,
        token_type: "bearer",
        expires_in: state.issuer.ttl().num_seconds(),
    }))
}

/// GET /auth/verify (API Key 또는 Bearer)
pub async fn verify(
    State(state): State<Arc<AppState>>,
    Extension(client): Extension<ClientOrigin>,
    Query(query): Query<VerifyQuery>,
    headers: HeaderMap,
) -> Result<Json<AuthStatus>> {
    let required = query.required()?;
    let kind = TokenKind::from_headers(
        header(&headers, API_KEY_HEADER),
        header(&headers, "authorization"),
    )
    .ok_or_else(|| GatewayError::Unauthorized {
        message: "No valid credentials provided".to_string(),
    })?;

    match kind {
        TokenKind::ApiKey(secret) => {
            let service = header(&headers, SERVICE_HEADER);
            let verified = authenticate_api_key(&state, &client, &secret, required, service).await?;
            Ok(Json(api_key_status(verified)))
        }
        TokenKind::Bearer(token) => Ok(Json(bearer_status(&state, &token, required)?)),
    }
}

/// GET /auth/verify-api-key
pub async fn verify_api_key(
    State(state): State<Arc<AppState>>,
    Extension(client): Extension<ClientOrigin>,
    Query(query): Query<VerifyQuery>,
    headers: HeaderMap,
) -> Result<Json<AuthStatus>> {
    let required = query.required()?;
    // 헤더가 없으면 빈 시크릿으로 취급되어 Unknown
    let secret = header(&headers, API_KEY_HEADER).unwrap_or_default();
    let service = header(&headers, SERVICE_HEADER);
    let verified = authenticate_api_key(&state, &client, secret, required, service).await?;
    Ok(Json(api_key_status(verified)))
}

/// GET /auth/verify-jwt
pub async fn verify_jwt(
    State(state): State<Arc<AppState>>,
    Query(query): Query<VerifyQuery>,
    headers: HeaderMap,
) -> Result<Json<AuthStatus>> {
    let required = query.required()?;
    match TokenKind::from_headers(None, header(&headers, "authorization")) {
        Some(TokenKind::Bearer(token)) => Ok(Json(bearer_status(&state, &token, required)?)),
        _ => Err(GatewayError::Unauthorized {
            message: "Missing bearer token".to_string(),
        }),
    }
}
