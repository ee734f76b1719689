//! kg-core: keygate 공통 핵심 라이브러리
//!
//! 이 크레이트는 Gateway와 CLI가 공유하는 핵심 타입과 로직을 제공합니다.
//!
//! # 모듈 구조
//!
//! - `auth`: 자격 증명 모델, 권한 집합, 시크릿 해싱, 토큰 발급/검증
//! - `origin`: 요청 출처(내부/외부) 분류
//! - `error`: 공통 에러 타입

pub mod auth;
pub mod error;
pub mod origin;

pub use error::{Error, Result};
