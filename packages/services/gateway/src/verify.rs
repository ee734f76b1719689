//! 자격 증명 검증 엔진
//!
//! 제시된 시크릿을 레코드로 해석하고 활성/만료/서비스/권한을 확인합니다(`authorize`).
//! 사용 기록은 호출자의 추가 검사(rate limit 등)가 끝난 뒤 `commit`에서 남깁니다.

use chrono::{DateTime, Utc};
use serde::Serialize;

use kg_core::auth::{
    derive_identity, Credential, CredentialIdentity, CredentialOrigin, Permission, PermissionSet,
};

use crate::error::{GatewayError, Result};
use crate::store::CredentialStore;

/// 검증 요청
#[derive(Debug, Clone, Default)]
pub struct VerifyRequest<'a> {
    pub secret: &'a str,

    /// 필요한 권한
    pub required: Option<Permission>,

    /// 호출 대상 서비스 (지정 시 service_scope 일치 필요, 레거시 키 예외)
    pub service: Option<&'a str>,

    /// 사용 기록용 클라이언트 주소
    pub client_ip: Option<&'a str>,
}

impl<'a> VerifyRequest<'a> {
    pub fn new(secret: &'a str) -> Self {
        Self {
            secret,
            ..Default::default()
        }
    }

    pub fn require(mut self, permission: Option<Permission>) -> Self {
        self.required = permission;
        self
    }

    pub fn for_service(mut self, service: Option<&'a str>) -> Self {
        self.service = service;
        self
    }

    pub fn from_ip(mut self, client_ip: Option<&'a str>) -> Self {
        self.client_ip = client_ip;
        self
    }
}

/// 검증 성공 결과 (비밀이 아닌 필드만)
#[derive(Debug, Clone, Serialize)]
pub struct VerifiedIdentity {
    pub identity: CredentialIdentity,
    pub display_name: String,
    pub service_scope: String,
    pub permissions: PermissionSet,
    pub origin: CredentialOrigin,
    pub usage_count: u64,
    pub last_used_at: Option<DateTime<Utc>>,
}

/// 모든 검사를 통과했지만 사용은 아직 기록되지 않은 자격 증명
#[derive(Debug)]
pub struct Authorized {
    credential: Credential,
}

impl Authorized {
    pub fn identity(&self) -> &CredentialIdentity {
        &self.credential.identity
    }

    pub fn permissions(&self) -> &PermissionSet {
        &self.credential.permissions
    }
}

#[derive(Clone)]
pub struct VerificationEngine {
    store: CredentialStore,
}

impl VerificationEngine {
    pub fn new(store: CredentialStore) -> Self {
        Self { store }
    }

    pub async fn verify(
        &self,
        secret: &str,
        required: Option<Permission>,
    ) -> Result<VerifiedIdentity> {
        self.verify_request(VerifyRequest::new(secret).require(required))
            .await
    }

    pub async fn verify_request(&self, req: VerifyRequest<'_>) -> Result<VerifiedIdentity> {
        let client_ip = req.client_ip;
        let authorized = self.authorize(req).await?;
        self.commit(authorized, client_ip).await
    }

    /// 사용 기록 없이 검사만 수행
    pub async fn authorize(&self, req: VerifyRequest<'_>) -> Result<Authorized> {
        let secret = req.secret.trim();
        if secret.is_empty() {
            return Err(kg_core::Error::UnknownCredential.into());
        }

        let identity = derive_identity(secret);
        let stored = self.store.fetch_with_digest(&identity).await?;

        let Some((credential, digest)) = stored else {
            // 없는 identity도 동일 비용의 다이제스트 검증을 거칩니다.
            self.check_digest(secret, None).await?;
            return Err(kg_core::Error::UnknownCredential.into());
        };

        if !self.check_digest(secret, Some(digest)).await? {
            return Err(kg_core::Error::UnknownCredential.into());
        }

        if !credential.is_active {
            return Err(kg_core::Error::InactiveCredential.into());
        }

        if credential.is_expired_at(Utc::now()) {
            return Err(kg_core::Error::CredentialExpired.into());
        }

        if let Some(service) = req.service {
            if !credential.matches_service(service) {
                return Err(kg_core::Error::ServiceMismatch {
                    requested: service.to_string(),
                }
                .into());
            }
        }

        if let Some(required) = req.required {
            if !credential.allows(required) {
                return Err(kg_core::Error::InsufficientPermission { required }.into());
            }
        }

        Ok(Authorized { credential })
    }

    /// 사용 기록 후 검증 결과 반환
    pub async fn commit(
        &self,
        authorized: Authorized,
        client_ip: Option<&str>,
    ) -> Result<VerifiedIdentity> {
        let credential = authorized.credential;
        let identity = credential.identity;

        let mut usage_count = credential.usage_count;
        let mut last_used_at = credential.last_used_at;
        match self.store.record_usage(&identity, client_ip).await {
            Ok(true) => {
                usage_count += 1;
                last_used_at = Some(Utc::now());
            }
            // 커밋된 비활성화와 경합한 경우
            Ok(false) => return Err(kg_core::Error::InactiveCredential.into()),
            Err(e) => {
                tracing::warn!(identity = %identity.masked(), "Failed to record usage: {}", e);
            }
        }

        tracing::debug!(identity = %identity.masked(), "Credential verified");

        Ok(VerifiedIdentity {
            identity,
            display_name: credential.display_name,
            service_scope: credential.service_scope,
            permissions: credential.permissions,
            origin: credential.origin,
            usage_count,
            last_used_at,
        })
    }

    /// blocking 스레드에서 Argon2 검증. `digest`가 없으면 더미 다이제스트로 검증합니다.
    async fn check_digest(&self, secret: &str, digest: Option<String>) -> Result<bool> {
        let hasher = self.store.hasher().clone();
        let secret = secret.to_string();
        tokio::task::spawn_blocking(move || match digest {
            Some(digest) => hasher.verify(&secret, &digest),
            None => {
                hasher.verify_dummy(&secret);
                false
            }
        })
        .await
        .map_err(|e| GatewayError::Internal {
            message: format!("verification task failed: {e}"),
        })
    }
}
