//! 시크릿 생성, 식별자 파생, 다이제스트
//!
//! - 무작위 시크릿: 32바이트(256bit)를 base64url(no padding)로 인코딩
//! - Identity: SHA-256(secret)의 앞 16 hex 문자
//! - Digest: Argon2id PHC 문자열 (솔트 포함)

use argon2::password_hash::SaltString;
use argon2::{Algorithm, Argon2, Params, PasswordHash, PasswordHasher, PasswordVerifier, Version};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use rand::rngs::OsRng;
use rand::RngCore;
use sha2::{Digest, Sha256};

use super::credential::CredentialIdentity;
use crate::error::{Error, Result};

pub const SECRET_BYTES: usize = 32;
pub const IDENTITY_HEX_LEN: usize = 16;
const DIGEST_LEN: usize = 32;

/// 무작위 시크릿 생성
pub fn generate_secret() -> String {
    let mut bytes = [0u8; SECRET_BYTES];
    OsRng.fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// 시크릿에서 identity 파생
pub fn derive_identity(secret: &str) -> CredentialIdentity {
    let digest = Sha256::digest(secret.as_bytes());
    let hex = hex::encode(digest);
    CredentialIdentity::new(&hex[..IDENTITY_HEX_LEN])
}

/// 운영자 지정 시크릿 검증
pub fn validate_custom_secret(secret: &str) -> Result<()> {
    if secret.is_empty() {
        return Err(Error::InvalidSecret {
            reason: "secret must not be empty".to_string(),
        });
    }
    if secret.chars().any(|c| c.is_whitespace() || c.is_control()) {
        return Err(Error::InvalidSecret {
            reason: "secret must not contain whitespace or control characters".to_string(),
        });
    }
    Ok(())
}

/// Argon2id 파라미터
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HashParams {
    pub memory_kib: u32,
    pub iterations: u32,
    pub parallelism: u32,
}

impl Default for HashParams {
    /// OWASP 권장값 (m=19MiB, t=2, p=1)
    fn default() -> Self {
        Self {
            memory_kib: 19_456,
            iterations: 2,
            parallelism: 1,
        }
    }
}

/// 시크릿 해셔
///
/// 검증은 저장된 PHC 문자열의 파라미터를 따르므로, 파라미터를 바꿔도 기존 다이제스트는 유효합니다.
#[derive(Clone)]
pub struct SecretHasher {
    argon2: Argon2<'static>,
    params: HashParams,
    dummy_digest: String,
}

impl std::fmt::Debug for SecretHasher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecretHasher")
            .field("params", &self.params)
            .finish_non_exhaustive()
    }
}

impl SecretHasher {
    pub fn new(params: HashParams) -> Result<Self> {
        let argon_params = Params::new(
            params.memory_kib,
            params.iterations,
            params.parallelism,
            Some(DIGEST_LEN),
        )
        .map_err(|e| Error::Hashing {
            message: format!("argon2 params: {e}"),
        })?;
        let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, argon_params);

        let mut hasher = Self {
            argon2,
            params,
            dummy_digest: String::new(),
        };
        hasher.dummy_digest = hasher.hash(&generate_secret())?;
        Ok(hasher)
    }

    pub fn params(&self) -> HashParams {
        self.params
    }

    /// 솔트 포함 다이제스트 생성
    pub fn hash(&self, secret: &str) -> Result<String> {
        let salt = SaltString::generate(&mut OsRng);
        self.argon2
            .hash_password(secret.as_bytes(), &salt)
            .map(|h| h.to_string())
            .map_err(|e| Error::Hashing {
                message: e.to_string(),
            })
    }

    /// 다이제스트 대조 (상수 시간 비교)
    pub fn verify(&self, secret: &str, digest: &str) -> bool {
        let parsed = match PasswordHash::new(digest) {
            Ok(h) => h,
            Err(_) => return false,
        };
        self.argon2
            .verify_password(secret.as_bytes(), &parsed)
            .is_ok()
    }

    /// 존재하지 않는 identity에 대해 동일 비용의 검증을 수행
    pub fn verify_dummy(&self, secret: &str) {
        let _ = self.verify(secret, &self.dummy_digest);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn light() -> SecretHasher {
        SecretHasher::new(HashParams {
            memory_kib: 1024,
            iterations: 1,
            parallelism: 1,
        })
        .unwrap()
    }

    #[test]
    fn test_generated_secret_shape() {
        let a = generate_secret();
        let b = generate_secret();
        assert_ne!(a, b);
        assert_eq!(URL_SAFE_NO_PAD.decode(&a).unwrap().len(), SECRET_BYTES);
    }

    #[test]
    fn test_identity_is_stable_prefix() {
        let id = derive_identity("billing_secret");
        assert_eq!(id.as_str().len(), IDENTITY_HEX_LEN);
        assert_eq!(id, derive_identity("billing_secret"));
        assert_ne!(id, derive_identity("billing_secret2"));

        let full = hex::encode(Sha256::digest(b"billing_secret"));
        assert!(full.starts_with(id.as_str()));
    }

    #[test]
    fn test_hash_and_verify() {
        let hasher = light();
        let digest = hasher.hash("s3cret").unwrap();
        assert!(digest.starts_with("$argon2id$"));
        assert!(!digest.contains("s3cret"));
        assert!(hasher.verify("s3cret", &digest));
        assert!(!hasher.verify("s3cret!", &digest));
        assert!(!hasher.verify("s3cret", "not-a-phc-string"));
    }

    #[test]
    fn test_salted_digests_differ() {
        let hasher = light();
        assert_ne!(hasher.hash("same").unwrap(), hasher.hash("same").unwrap());
    }

    #[test]
    fn test_digest_survives_param_change() {
        let digest = light().hash("rotate-me").unwrap();
        let other = SecretHasher::new(HashParams {
            memory_kib: 2048,
            iterations: 2,
            parallelism: 1,
        })
        .unwrap();
        assert!(other.verify("rotate-me", &digest));
    }

    #[test]
    fn test_custom_secret_validation() {
        assert!(validate_custom_secret("legacy-key-1").is_ok());
        assert!(validate_custom_secret("").is_err());
        assert!(validate_custom_secret("has space").is_err());
    }

    #[test]
    fn test_invalid_params_rejected() {
        let err = SecretHasher::new(HashParams {
            memory_kib: 1,
            iterations: 0,
            parallelism: 1,
        })
        .unwrap_err();
        assert!(matches!(err, Error::Hashing { .. }));
    }
}
