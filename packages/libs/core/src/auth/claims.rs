//! 토큰 Claims
//!
//! Access Token(HS256 JWT)의 페이로드 구조입니다.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::credential::CredentialIdentity;
use super::permission::{Permission, PermissionSet};

/// Access Token Claims
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TokenClaims {
    /// 토큰을 교환한 자격 증명의 identity
    pub kid: CredentialIdentity,

    /// Subject (호출자 라벨)
    pub sub: String,

    /// 부여된 권한
    pub scopes: PermissionSet,

    /// 발급 시각
    #[serde(with = "chrono::serde::ts_seconds")]
    pub iat: DateTime<Utc>,

    /// 만료 시각
    #[serde(with = "chrono::serde::ts_seconds")]
    pub exp: DateTime<Utc>,

    /// JWT ID (audit용)
    pub jti: String,
}

impl TokenClaims {
    pub fn new(
        kid: CredentialIdentity,
        sub: String,
        scopes: PermissionSet,
        issued_at: DateTime<Utc>,
        ttl: chrono::Duration,
    ) -> Self {
        // JWT 타임스탬프는 초 단위
        let issued_at = DateTime::from_timestamp(issued_at.timestamp(), 0).unwrap_or(issued_at);
        Self {
            kid,
            sub,
            scopes,
            iat: issued_at,
            exp: issued_at + ttl,
            jti: ulid::Ulid::new().to_string(),
        }
    }

    /// 만료 여부 확인 (`now >= exp`)
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now.timestamp() >= self.exp.timestamp()
    }

    pub fn allows(&self, permission: Permission) -> bool {
        self.scopes.allows(permission)
    }

    /// 남은 TTL (초)
    pub fn remaining_ttl(&self, now: DateTime<Utc>) -> i64 {
        (self.exp - now).num_seconds().max(0)
    }
}
