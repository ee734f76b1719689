//! API 자격 증명
//!
//! 서비스 호출용 API Key의 메타데이터 타입입니다. 다이제스트는 이 타입에 담기지 않습니다.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::permission::{Permission, PermissionSet};

/// Credential Identity
///
/// 시크릿에서 파생된 비밀이 아닌 식별자로, 로깅/조회에 사용됩니다.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CredentialIdentity(pub String);

impl CredentialIdentity {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// 로그 출력용 마스킹 (`abcd****wxyz`)
    pub fn masked(&self) -> String {
        let s = self.0.as_str();
        if s.len() <= 8 {
            return "****".to_string();
        }
        format!("{}****{}", &s[..4], &s[s.len() - 4..])
    }
}

impl std::fmt::Display for CredentialIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// 자격 증명 출처
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CredentialOrigin {
    /// 시작 시 평문 목록에서 가져온 키 (암묵적 admin)
    Legacy,

    /// 관리 API로 생성된 키
    Managed,
}

impl CredentialOrigin {
    pub fn as_str(&self) -> &'static str {
        match self {
            CredentialOrigin::Legacy => "legacy",
            CredentialOrigin::Managed => "managed",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "legacy" => Some(CredentialOrigin::Legacy),
            "managed" => Some(CredentialOrigin::Managed),
            _ => None,
        }
    }
}

/// 자격 증명 메타데이터
///
/// 저장소에서 읽어 온 읽기 전용 뷰입니다. 요청 사이에 캐시하지 않습니다.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Credential {
    pub identity: CredentialIdentity,

    /// 사람이 읽기 쉬운 이름 (중복 허용)
    pub display_name: String,

    /// 소비 서비스 태그
    pub service_scope: String,

    pub permissions: PermissionSet,

    pub is_active: bool,

    pub origin: CredentialOrigin,

    pub created_at: DateTime<Utc>,

    pub last_used_at: Option<DateTime<Utc>>,

    pub usage_count: u64,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deactivated_at: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deactivation_reason: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_used_ip: Option<String>,
}

impl Credential {
    pub fn is_legacy(&self) -> bool {
        matches!(self.origin, CredentialOrigin::Legacy)
    }

    /// 주어진 시각 기준 만료 여부
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|exp| now >= exp)
    }

    /// 대상 서비스에 바인딩되어 있는지 확인 (레거시 키는 모든 서비스 허용)
    pub fn matches_service(&self, service: &str) -> bool {
        self.is_legacy() || self.service_scope == service
    }

    pub fn allows(&self, permission: Permission) -> bool {
        self.permissions.allows(permission)
    }
}

/// 생성 요청
#[derive(Debug, Clone)]
pub struct NewCredential {
    pub display_name: String,
    pub service_scope: String,
    pub permissions: PermissionSet,

    /// 운영자가 지정한 시크릿 (없으면 무작위 생성)
    pub custom_secret: Option<String>,

    pub expires_at: Option<DateTime<Utc>>,
}

impl NewCredential {
    pub fn new(
        display_name: impl Into<String>,
        service_scope: impl Into<String>,
        permissions: PermissionSet,
    ) -> Self {
        Self {
            display_name: display_name.into(),
            service_scope: service_scope.into(),
            permissions,
            custom_secret: None,
            expires_at: None,
        }
    }

    pub fn with_custom_secret(mut self, secret: impl Into<String>) -> Self {
        self.custom_secret = Some(secret.into());
        self
    }

    pub fn with_expiry(mut self, expires_at: DateTime<Utc>) -> Self {
        self.expires_at = Some(expires_at);
        self
    }
}

/// 생성 결과 (Credential + Secret)
///
/// 생성 시에만 반환되며, 이후 시크릿은 조회 불가합니다.
#[derive(Debug, Clone)]
pub struct IssuedCredential {
    pub credential: Credential,

    /// Secret (평문, 생성 시 1회만 노출)
    pub secret: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(origin: CredentialOrigin) -> Credential {
        Credential {
            identity: CredentialIdentity::new("0123456789abcdef"),
            display_name: "Billing worker".to_string(),
            service_scope: "billing".to_string(),
            permissions: PermissionSet::read_only(),
            is_active: true,
            origin,
            created_at: Utc::now(),
            last_used_at: None,
            usage_count: 0,
            expires_at: None,
            deactivated_at: None,
            deactivation_reason: None,
            last_used_ip: None,
        }
    }

    #[test]
    fn test_service_binding() {
        let managed = sample(CredentialOrigin::Managed);
        assert!(managed.matches_service("billing"));
        assert!(!managed.matches_service("reports"));

        let legacy = sample(CredentialOrigin::Legacy);
        assert!(legacy.matches_service("reports"));
    }

    #[test]
    fn test_expiry() {
        let mut cred = sample(CredentialOrigin::Managed);
        let now = Utc::now();
        assert!(!cred.is_expired_at(now));

        cred.expires_at = Some(now);
        assert!(cred.is_expired_at(now));
        assert!(!cred.is_expired_at(now - chrono::Duration::seconds(1)));
    }

    #[test]
    fn test_masked_identity() {
        let id = CredentialIdentity::new("0123456789abcdef");
        assert_eq!(id.masked(), "0123****cdef");
        assert_eq!(CredentialIdentity::new("short").masked(), "****");
    }

    #[test]
    fn test_origin_roundtrip() {
        for origin in [CredentialOrigin::Legacy, CredentialOrigin::Managed] {
            assert_eq!(CredentialOrigin::parse(origin.as_str()), Some(origin));
        }
        assert_eq!(CredentialOrigin::parse("imported"), None);
    }
}
