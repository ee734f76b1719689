//! 인증 관련 타입 및 로직
//!
//! # 개요
//!
//! keygate의 인증은 두 단계로 이루어집니다:
//!
//! - **API Key**: 서비스에 바인딩된 장기 자격 증명. 저장소는 Argon2id 다이제스트만 보관합니다.
//! - **Access Token**: 검증된 API Key로 교환하는 짧은 수명의 HS256 JWT
//!
//! # 권한
//!
//! `read` / `write` / `admin` 고정 집합이며 `admin`은 나머지를 포함합니다.

mod claims;
mod credential;
mod permission;
mod secret;
mod token;

pub use claims::TokenClaims;
pub use credential::{
    Credential, CredentialIdentity, CredentialOrigin, IssuedCredential, NewCredential,
};
pub use permission::{Permission, PermissionSet};
pub use secret::{
    derive_identity, generate_secret, validate_custom_secret, HashParams, SecretHasher,
    IDENTITY_HEX_LEN, SECRET_BYTES,
};
pub use token::{parse_key_material, TokenIssuer, TokenKind, MIN_SIGNING_KEY_BYTES};
