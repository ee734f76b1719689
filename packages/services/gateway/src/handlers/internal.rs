//! 내부 관리 핸들러
//!
//! `/internal` 아래의 라우트는 `internal_only` 미들웨어를 통과한 요청만 도달합니다.

use std::sync::Arc;

use axum::extract::{Query, State};
use axum::{Extension, Json};
use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};

use kg_core::auth::{derive_identity, Credential, CredentialIdentity, NewCredential, PermissionSet};
use kg_core::origin::ClientOrigin;

use crate::error::{GatewayError, Result};
use crate::state::AppState;
use crate::store::{AuditEvent, ListFilter, StoreStatus};

const DEFAULT_AUDIT_LIMIT: u32 = 100;
const MAX_AUDIT_LIMIT: u32 = 1000;

/// 만료 기한 상한 (약 100년, RFC 3339 연도 범위 유지)
const MAX_EXPIRY_DAYS: i64 = 36_500;

// ─────────────────────────────────────────────────────────────────────────────
// Status / Config
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    #[serde(flatten)]
    pub store: StoreStatus,
    pub client_ip: Option<String>,
    pub uptime_secs: i64,
    pub hash_algorithm: &'static str,
}

/// GET /internal/status
pub async fn status(
    State(state): State<Arc<AppState>>,
    Extension(client): Extension<ClientOrigin>,
) -> Result<Json<StatusResponse>> {
    let mut store = state.store.status().await?;
    store.healthy = state.store.health_check().await;

    Ok(Json(StatusResponse {
        store,
        client_ip: client.client_ip.map(|ip| ip.to_string()),
        uptime_secs: (Utc::now() - state.started_at).num_seconds(),
        hash_algorithm: "argon2id",
    }))
}

#[derive(Debug, Serialize)]
pub struct ConfigResponse {
    pub token_algorithm: &'static str,
    pub token_ttl_minutes: i64,
    pub token_secret_configured: bool,
    pub legacy_api_keys: usize,
    pub trusted_networks: Vec<String>,
    pub trust_forwarded_for: bool,
    pub rate_limit_max: u32,
    pub rate_limit_window_secs: u64,
    pub debug: bool,
}

/// GET /internal/config (시크릿 제외)
pub async fn config(State(state): State<Arc<AppState>>) -> Json<ConfigResponse> {
    let config = &state.config;
    Json(ConfigResponse {
        token_algorithm: "HS256",
        token_ttl_minutes: config.token_ttl_minutes,
        token_secret_configured: config.token_secret.is_some(),
        legacy_api_keys: config.legacy_api_keys.len(),
        trusted_networks: state.guard.networks().iter().map(|n| n.to_string()).collect(),
        trust_forwarded_for: state.guard.trusts_forwarded_for(),
        rate_limit_max: config.rate_limit_max,
        rate_limit_window_secs: config.rate_limit_window_secs,
        debug: config.debug,
    })
}

// ─────────────────────────────────────────────────────────────────────────────
// Credential lifecycle
// ─────────────────────────────────────────────────────────────────────────────

/// 권한 입력 (`["read","write"]` 또는 `"read,write"`)
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum PermissionsInput {
    List(Vec<String>),
    Csv(String),
}

impl PermissionsInput {
    fn parse(&self) -> Result<PermissionSet> {
        let set = match self {
            PermissionsInput::List(values) => PermissionSet::from_strings(values.as_slice())?,
            PermissionsInput::Csv(value) => PermissionSet::parse_list(value)?,
        };
        Ok(set)
    }
}

#[derive(Debug, Deserialize)]
pub struct GenerateKeyRequest {
    pub name: String,
    pub service: String,
    #[serde(default)]
    pub permissions: Option<PermissionsInput>,
    #[serde(default)]
    pub custom_key: Option<String>,
    #[serde(default)]
    pub expires_in_days: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct GenerateKeyResponse {
    pub identity: CredentialIdentity,
    pub api_key: String,
    pub name: String,
    pub service: String,
    pub permissions: PermissionSet,
    pub created_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
    pub message: &'static str,
}

fn required_field(value: &str, field: &str) -> Result<String> {
    let value = value.trim();
    if value.is_empty() {
        return Err(GatewayError::BadRequest {
            message: format!("{field} is required"),
        });
    }
    Ok(value.to_string())
}

fn expiry_after_days(now: DateTime<Utc>, days: i64) -> Result<DateTime<Utc>> {
    if days <= 0 {
        return Err(GatewayError::BadRequest {
            message: "expires_in_days must be positive".to_string(),
        });
    }
    if days > MAX_EXPIRY_DAYS {
        return Err(GatewayError::BadRequest {
            message: format!("expires_in_days must be at most {MAX_EXPIRY_DAYS}"),
        });
    }
    TimeDelta::try_days(days)
        .and_then(|delta| now.checked_add_signed(delta))
        .ok_or_else(|| GatewayError::BadRequest {
            message: "expires_in_days is out of range".to_string(),
        })
}

/// POST /internal/generate-api-key
///
/// 평문 키는 이 응답에서만 반환됩니다.
pub async fn generate_api_key(
    State(state): State<Arc<AppState>>,
    Json(req): Json<GenerateKeyRequest>,
) -> Result<Json<GenerateKeyResponse>> {
    let name = required_field(&req.name, "name")?;
    let service = required_field(&req.service, "service")?;

    let permissions = match &req.permissions {
        Some(input) => input.parse()?,
        None => PermissionSet::read_only(),
    };
    if permissions.is_empty() {
        return Err(GatewayError::BadRequest {
            message: "at least one permission is required".to_string(),
        });
    }

    let mut new = NewCredential::new(name, service, permissions);
    if let Some(custom) = req.custom_key {
        new = new.with_custom_secret(custom);
    }
    if let Some(days) = req.expires_in_days {
        new = new.with_expiry(expiry_after_days(Utc::now(), days)?);
    }

    let issued = state.store.create(new).await?;
    let credential = issued.credential;

    Ok(Json(GenerateKeyResponse {
        identity: credential.identity,
        api_key: issued.secret,
        name: credential.display_name,
        service: credential.service_scope,
        permissions: credential.permissions,
        created_at: credential.created_at,
        expires_at: credential.expires_at,
        message: "Store this API key securely. It cannot be retrieved again.",
    }))
}

#[derive(Debug, Default, Deserialize)]
pub struct ListQuery {
    #[serde(default)]
    pub active_only: bool,
    #[serde(default)]
    pub service: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ListResponse {
    pub total_keys: usize,
    pub keys: Vec<Credential>,
}

/// GET /internal/list-api-keys
pub async fn list_api_keys(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ListQuery>,
) -> Result<Json<ListResponse>> {
    let filter = ListFilter {
        active_only: query.active_only,
        service: query.service.filter(|s| !s.trim().is_empty()),
    };
    let keys = state.store.list(&filter).await?;
    Ok(Json(ListResponse {
        total_keys: keys.len(),
        keys,
    }))
}

#[derive(Debug, Deserialize)]
pub struct DeactivateRequest {
    #[serde(default)]
    pub identity: Option<String>,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub reason: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct DeactivateResponse {
    pub identity: CredentialIdentity,
    pub status: &'static str,
    pub deactivated_at: Option<DateTime<Utc>>,
    pub message: &'static str,
}

/// POST /internal/deactivate-api-key
///
/// identity 또는 평문 키로 대상을 지정합니다. 평문 키는 identity로만 변환되고 저장되지 않습니다.
pub async fn deactivate_api_key(
    State(state): State<Arc<AppState>>,
    Json(req): Json<DeactivateRequest>,
) -> Result<Json<DeactivateResponse>> {
    let identity = match (req.identity.as_deref(), req.api_key.as_deref()) {
        (Some(identity), _) if !identity.trim().is_empty() => {
            CredentialIdentity::new(identity.trim())
        }
        (_, Some(secret)) if !secret.trim().is_empty() => derive_identity(secret.trim()),
        _ => {
            return Err(GatewayError::BadRequest {
                message: "identity or api_key is required".to_string(),
            })
        }
    };

    let reason = req.reason.as_deref().map(str::trim).filter(|r| !r.is_empty());
    let credential = state.store.deactivate(&identity, reason).await?;

    Ok(Json(DeactivateResponse {
        identity: credential.identity,
        status: "deactivated",
        deactivated_at: credential.deactivated_at,
        message: "API key deactivated. Issued access tokens remain valid until they expire.",
    }))
}

#[derive(Debug, Default, Deserialize)]
pub struct AuditQuery {
    #[serde(default)]
    pub limit: Option<u32>,
}

/// GET /internal/audit
pub async fn audit(
    State(state): State<Arc<AppState>>,
    Query(query): Query<AuditQuery>,
) -> Result<Json<Vec<AuditEvent>>> {
    let limit = query.limit.unwrap_or(DEFAULT_AUDIT_LIMIT).min(MAX_AUDIT_LIMIT);
    Ok(Json(state.store.audit_log(limit).await?))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use axum::http::{Method, StatusCode};
    use serde_json::json;
    use tower::ServiceExt;

    use super::*;
    use crate::handlers::test_support::{body_json, request, EXTERNAL_PEER, INTERNAL_PEER};
    use crate::state::tests::{default_config, test_state};

    async fn setup() -> (Arc<AppState>, axum::Router) {
        let state = Arc::new(test_state(default_config()).await);
        let router = crate::create_router(state.clone());
        (state, router)
    }

    #[tokio::test]
    async fn test_create_then_list() {
        let (_, router) = setup().await;

        let resp = router
            .clone()
            .oneshot(request(
                Method::POST,
                "/internal/generate-api-key",
                INTERNAL_PEER,
                &[],
                Some(json!({
                    "name": "Billing worker",
                    "service": "billing",
                    "permissions": ["read", "write"],
                    "expires_in_days": 30
                })),
            ))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let created = body_json(resp).await;
        let api_key = created["api_key"].as_str().unwrap().to_string();
        assert!(!api_key.is_empty());
        assert_eq!(created["permissions"], json!(["read", "write"]));
        assert!(created["expires_at"].is_string());

        let resp = router
            .oneshot(request(
                Method::GET,
                "/internal/list-api-keys?service=billing",
                INTERNAL_PEER,
                &[],
                None,
            ))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let listed = body_json(resp).await;
        assert_eq!(listed["total_keys"], 1);
        assert_eq!(listed["keys"][0]["identity"], created["identity"]);
        assert!(!listed.to_string().contains(&api_key));
    }

    #[tokio::test]
    async fn test_external_deactivate_is_forbidden() {
        let (state, router) = setup().await;
        let issued = state
            .store
            .create(NewCredential::new("svc", "billing", PermissionSet::read_only()))
            .await
            .unwrap();

        let resp = router
            .clone()
            .oneshot(request(
                Method::POST,
                "/internal/deactivate-api-key",
                EXTERNAL_PEER,
                &[],
                Some(json!({ "identity": issued.credential.identity.as_str() })),
            ))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::FORBIDDEN);
        let body = body_json(resp).await;
        assert_eq!(body["error"]["code"], "ORIGIN_FORBIDDEN");

        let resp = router
            .oneshot(request(
                Method::GET,
                "/internal/list-api-keys?active_only=true",
                INTERNAL_PEER,
                &[],
                None,
            ))
            .await
            .unwrap();
        let listed = body_json(resp).await;
        assert_eq!(listed["total_keys"], 1);
        assert_eq!(listed["keys"][0]["is_active"], true);
    }

    #[tokio::test]
    async fn test_external_list_is_forbidden() {
        let (_, router) = setup().await;
        let resp = router
            .oneshot(request(
                Method::GET,
                "/internal/list-api-keys",
                EXTERNAL_PEER,
                &[],
                None,
            ))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn test_duplicate_custom_key_conflicts() {
        let (_, router) = setup().await;
        let body = json!({ "name": "a", "service": "billing", "custom_key": "shared-secret" });

        let first = router
            .clone()
            .oneshot(request(
                Method::POST,
                "/internal/generate-api-key",
                INTERNAL_PEER,
                &[],
                Some(body.clone()),
            ))
            .await
            .unwrap();
        assert_eq!(first.status(), StatusCode::OK);

        let second = router
            .oneshot(request(
                Method::POST,
                "/internal/generate-api-key",
                INTERNAL_PEER,
                &[],
                Some(body),
            ))
            .await
            .unwrap();
        assert_eq!(second.status(), StatusCode::CONFLICT);
        let body = body_json(second).await;
        assert_eq!(body["error"]["code"], "DUPLICATE_IDENTITY");
    }

    #[tokio::test]
    async fn test_generate_requires_name_and_service() {
        let (_, router) = setup().await;
        let resp = router
            .oneshot(request(
                Method::POST,
                "/internal/generate-api-key",
                INTERNAL_PEER,
                &[],
                Some(json!({ "name": "  ", "service": "billing" })),
            ))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_generate_rejects_out_of_range_expiry() {
        let (state, router) = setup().await;

        for days in [json!(100_000_000), json!(i64::MAX), json!(0), json!(-5)] {
            let resp = router
                .clone()
                .oneshot(request(
                    Method::POST,
                    "/internal/generate-api-key",
                    INTERNAL_PEER,
                    &[],
                    Some(json!({ "name": "svc", "service": "billing", "expires_in_days": days })),
                ))
                .await
                .unwrap();
            assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
            let body = body_json(resp).await;
            assert_eq!(body["error"]["code"], "BAD_REQUEST");
        }

        let resp = router
            .oneshot(request(
                Method::POST,
                "/internal/generate-api-key",
                INTERNAL_PEER,
                &[],
                Some(json!({ "name": "svc", "service": "billing", "expires_in_days": MAX_EXPIRY_DAYS })),
            ))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert!(state.store.list(&ListFilter::default()).await.unwrap()[0].expires_at.is_some());
    }

    #[test]
    fn test_expiry_after_days() {
        let now = Utc::now();
        assert_eq!(expiry_after_days(now, 1).unwrap(), now + TimeDelta::days(1));
        assert!(expiry_after_days(now, i64::MAX).is_err());
        assert!(expiry_after_days(now, 0).is_err());
    }

    #[tokio::test]
    async fn test_deactivate_by_api_key_then_again() {
        let (state, router) = setup().await;
        let issued = state
            .store
            .create(NewCredential::new("svc", "billing", PermissionSet::read_only()))
            .await
            .unwrap();

        let resp = router
            .clone()
            .oneshot(request(
                Method::POST,
                "/internal/deactivate-api-key",
                INTERNAL_PEER,
                &[],
                Some(json!({ "api_key": issued.secret, "reason": "rotated" })),
            ))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let body = body_json(resp).await;
        assert_eq!(body["status"], "deactivated");
        assert_eq!(body["identity"], issued.credential.identity.as_str());

        let resp = router
            .oneshot(request(
                Method::POST,
                "/internal/deactivate-api-key",
                INTERNAL_PEER,
                &[],
                Some(json!({ "identity": issued.credential.identity.as_str() })),
            ))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::CONFLICT);
        let body = body_json(resp).await;
        assert_eq!(body["error"]["code"], "ALREADY_INACTIVE");

        let stored = state
            .store
            .find_by_identity(&issued.credential.identity)
            .await
            .unwrap();
        assert_eq!(stored.deactivation_reason.as_deref(), Some("rotated"));
    }

    #[tokio::test]
    async fn test_status_config_and_audit() {
        let (state, router) = setup().await;
        state
            .store
            .create(NewCredential::new("svc", "billing", PermissionSet::read_only()))
            .await
            .unwrap();

        let resp = router
            .clone()
            .oneshot(request(Method::GET, "/internal/status", INTERNAL_PEER, &[], None))
            .await
            .unwrap();
        let body = body_json(resp).await;
        assert_eq!(body["backend"], "sqlite");
        assert_eq!(body["total"], 1);
        assert_eq!(body["client_ip"], "127.0.0.1");

        let resp = router
            .clone()
            .oneshot(request(Method::GET, "/internal/config", INTERNAL_PEER, &[], None))
            .await
            .unwrap();
        let body = body_json(resp).await;
        assert_eq!(body["token_algorithm"], "HS256");
        assert!(!body.to_string().contains(crate::state::tests::TEST_SIGNING_KEY));

        let resp = router
            .oneshot(request(Method::GET, "/internal/audit?limit=5", INTERNAL_PEER, &[], None))
            .await
            .unwrap();
        let body = body_json(resp).await;
        assert_eq!(body.as_array().unwrap().len(), 1);
        assert_eq!(body[0]["action"], "created");
    }
}
