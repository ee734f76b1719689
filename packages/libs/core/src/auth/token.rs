//! 토큰 발급 및 검증
//!
//! 검증된 자격 증명을 짧은 수명의 HS256 Bearer 토큰으로 교환합니다.
//! 검증은 저장소를 조회하지 않으므로, 폐기된 자격 증명의 토큰은 자연 만료까지 유효합니다.

use base64::{engine::general_purpose, Engine as _};
use chrono::{DateTime, Utc};
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};

use super::claims::TokenClaims;
use super::credential::CredentialIdentity;
use super::permission::PermissionSet;
use crate::error::{Error, Result};

/// 서명 키 최소 길이 (bytes)
pub const MIN_SIGNING_KEY_BYTES: usize = 32;

/// 토큰 종류
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TokenKind {
    /// API Key (`X-API-Key`)
    ApiKey(String),

    /// Access Token (`Authorization: Bearer ...`)
    Bearer(String),
}

impl TokenKind {
    /// HTTP 헤더에서 토큰 추출
    ///
    /// # 추출 우선순위
    /// 1. `X-API-Key` 헤더 → ApiKey
    /// 2. `Authorization: Bearer ...` → Bearer
    pub fn from_headers(api_key_header: Option<&str>, auth_header: Option<&str>) -> Option<Self> {
        if let Some(value) = api_key_header.map(str::trim).filter(|v| !v.is_empty()) {
            return Some(TokenKind::ApiKey(value.to_string()));
        }

        if let Some(value) = auth_header {
            if let Some(token) = value.strip_prefix("Bearer ") {
                let token = token.trim();
                if !token.is_empty() {
                    return Some(TokenKind::Bearer(token.to_string()));
                }
            }
        }

        None
    }
}

/// 서명 키 문자열 해석
///
/// hex, base64url, base64 순으로 시도하고 실패하면 원문 바이트를 사용합니다.
pub fn parse_key_material(raw: &str) -> Option<Vec<u8>> {
    let trimmed = raw.trim();

    if trimmed.len() >= MIN_SIGNING_KEY_BYTES * 2
        && trimmed.len() % 2 == 0
        && trimmed.chars().all(|c| c.is_ascii_hexdigit())
    {
        if let Ok(bytes) = hex::decode(trimmed) {
            return Some(bytes);
        }
    }

    if let Ok(bytes) = general_purpose::URL_SAFE_NO_PAD.decode(trimmed) {
        if bytes.len() >= MIN_SIGNING_KEY_BYTES {
            return Some(bytes);
        }
    }

    if let Ok(bytes) = general_purpose::STANDARD.decode(trimmed) {
        if bytes.len() >= MIN_SIGNING_KEY_BYTES {
            return Some(bytes);
        }
    }

    let raw_bytes = trimmed.as_bytes();
    if raw_bytes.len() >= MIN_SIGNING_KEY_BYTES {
        return Some(raw_bytes.to_vec());
    }

    None
}

/// 토큰 발급기
///
/// 시작 시 한 번 생성되어 상태로 전달됩니다.
#[derive(Clone)]
pub struct TokenIssuer {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    ttl: chrono::Duration,
}

impl std::fmt::Debug for TokenIssuer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenIssuer")
            .field("algorithm", &"HS256")
            .field("ttl_seconds", &self.ttl.num_seconds())
            .finish_non_exhaustive()
    }
}

impl TokenIssuer {
    pub fn new(key: &[u8], ttl: chrono::Duration) -> Result<Self> {
        if key.len() < MIN_SIGNING_KEY_BYTES {
            return Err(Error::TokenConfig {
                reason: format!("signing key must be at least {MIN_SIGNING_KEY_BYTES} bytes"),
            });
        }
        if ttl <= chrono::Duration::zero() {
            return Err(Error::TokenConfig {
                reason: "token ttl must be positive".to_string(),
            });
        }
        Ok(Self {
            encoding_key: EncodingKey::from_secret(key),
            decoding_key: DecodingKey::from_secret(key),
            ttl,
        })
    }

    /// 설정 문자열에서 생성
    pub fn from_key_material(raw: &str, ttl: chrono::Duration) -> Result<Self> {
        let key = parse_key_material(raw).ok_or_else(|| Error::TokenConfig {
            reason: format!("signing key must be at least {MIN_SIGNING_KEY_BYTES} bytes"),
        })?;
        Self::new(&key, ttl)
    }

    pub fn ttl(&self) -> chrono::Duration {
        self.ttl
    }

    /// 토큰 발급
    ///
    /// 호출 전에 자격 증명 검증이 끝나 있어야 합니다.
    pub fn issue(
        &self,
        identity: &CredentialIdentity,
        subject: &str,
        scopes: PermissionSet,
    ) -> Result<(String, TokenClaims)> {
        self.issue_at(identity, subject, scopes, Utc::now())
    }

    pub fn issue_at(
        &self,
        identity: &CredentialIdentity,
        subject: &str,
        scopes: PermissionSet,
        now: DateTime<Utc>,
    ) -> Result<(String, TokenClaims)> {
        let claims = TokenClaims::new(identity.clone(), subject.to_string(), scopes, now, self.ttl);
        let token = encode(&Header::new(Algorithm::HS256), &claims, &self.encoding_key).map_err(
            |e| Error::TokenConfig {
                reason: e.to_string(),
            },
        )?;
        Ok((token, claims))
    }

    /// 토큰 검증
    pub fn validate(&self, token: &str) -> Result<TokenClaims> {
        self.validate_at(token, Utc::now())
    }

    /// 서명 → 만료 → claims 추출 순으로 검증
    pub fn validate_at(&self, token: &str, now: DateTime<Utc>) -> Result<TokenClaims> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = false;
        validation.validate_aud = false;
        validation.required_spec_claims.clear();
        validation.leeway = 0;

        let data = decode::<serde_json::Value>(token.trim(), &self.decoding_key, &validation)
            .map_err(|e| match e.kind() {
                ErrorKind::InvalidSignature => Error::TokenBadSignature,
                _ => Error::TokenMalformed {
                    reason: e.to_string(),
                },
            })?;

        let exp = data
            .claims
            .get("exp")
            .and_then(serde_json::Value::as_i64)
            .ok_or_else(|| Error::TokenMalformed {
                reason: "missing exp claim".to_string(),
            })?;
        if now.timestamp() >= exp {
            return Err(Error::TokenExpired);
        }

        serde_json::from_value(data.claims).map_err(|e| Error::TokenMalformed {
            reason: e.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::Permission;

    const KEY: &[u8] = b"0123456789abcdef0123456789abcdef";

    fn issuer() -> TokenIssuer {
        TokenIssuer::new(KEY, chrono::Duration::minutes(30)).unwrap()
    }

    fn identity() -> CredentialIdentity {
        CredentialIdentity::new("0123456789abcdef")
    }

    #[test]
    fn test_token_kind_priority() {
        assert_eq!(
            TokenKind::from_headers(Some("abc"), Some("Bearer xyz")),
            Some(TokenKind::ApiKey("abc".to_string()))
        );
        assert_eq!(
            TokenKind::from_headers(None, Some("Bearer xyz")),
            Some(TokenKind::Bearer("xyz".to_string()))
        );
        assert_eq!(TokenKind::from_headers(Some("  "), Some("Basic abc")), None);
        assert_eq!(TokenKind::from_headers(None, None), None);
    }

    #[test]
    fn test_issue_validate_roundtrip() {
        let issuer = issuer();
        let (token, issued) = issuer
            .issue(&identity(), "api_user", PermissionSet::read_only())
            .unwrap();

        let claims = issuer.validate(&token).unwrap();
        assert_eq!(claims, issued);
        assert_eq!(claims.kid, identity());
        assert_eq!(claims.sub, "api_user");
        assert!(claims.allows(Permission::Read));
        assert!(!claims.allows(Permission::Write));
    }

    #[test]
    fn test_expired_after_ttl() {
        let issuer = issuer();
        let now = Utc::now();
        let (token, _) = issuer
            .issue_at(&identity(), "api_user", PermissionSet::admin(), now)
            .unwrap();

        assert!(issuer
            .validate_at(&token, now + chrono::Duration::minutes(29))
            .is_ok());
        assert!(matches!(
            issuer.validate_at(&token, now + chrono::Duration::minutes(30)),
            Err(Error::TokenExpired)
        ));
    }

    #[test]
    fn test_bad_signature() {
        let (token, _) = issuer()
            .issue(&identity(), "api_user", PermissionSet::admin())
            .unwrap();
        let other = TokenIssuer::new(b"ffffffffffffffffffffffffffffffff", chrono::Duration::minutes(30))
            .unwrap();
        assert!(matches!(other.validate(&token), Err(Error::TokenBadSignature)));
    }

    #[test]
    fn test_signature_checked_before_expiry() {
        let now = Utc::now();
        let (token, _) = issuer()
            .issue_at(&identity(), "api_user", PermissionSet::admin(), now)
            .unwrap();
        let other = TokenIssuer::new(b"ffffffffffffffffffffffffffffffff", chrono::Duration::minutes(30))
            .unwrap();
        assert!(matches!(
            other.validate_at(&token, now + chrono::Duration::hours(2)),
            Err(Error::TokenBadSignature)
        ));
    }

    #[test]
    fn test_malformed() {
        let issuer = issuer();
        assert!(matches!(
            issuer.validate("not-a-token"),
            Err(Error::TokenMalformed { .. })
        ));
        assert!(matches!(
            issuer.validate("a.b.c"),
            Err(Error::TokenMalformed { .. })
        ));
    }

    #[test]
    fn test_short_key_rejected() {
        assert!(matches!(
            TokenIssuer::new(b"short", chrono::Duration::minutes(30)),
            Err(Error::TokenConfig { .. })
        ));
        assert!(TokenIssuer::from_key_material("too-short", chrono::Duration::minutes(30)).is_err());
    }

    #[test]
    fn test_parse_key_material() {
        let hex_key = "ab".repeat(32);
        assert_eq!(parse_key_material(&hex_key).unwrap().len(), 32);

        let b64 = general_purpose::URL_SAFE_NO_PAD.encode([7u8; 48]);
        assert_eq!(parse_key_material(&b64).unwrap().len(), 48);

        let raw = "this-is-a-plain-passphrase-of-40-chars!!";
        assert_eq!(parse_key_material(raw).unwrap(), raw.as_bytes());

        assert!(parse_key_material("short").is_none());
    }
}
