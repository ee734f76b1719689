//! Gateway 앱 상태

use std::collections::HashMap;
use std::sync::RwLock;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use rand::RngCore;

use kg_core::auth::{SecretHasher, TokenIssuer};
use kg_core::origin::OriginGuard;

use crate::config::Config;
use crate::store::CredentialStore;
use crate::verify::VerificationEngine;

/// 앱 상태
///
/// 모든 핸들러에서 공유하는 상태입니다. 저장소와 토큰 발급기는 시작 시 한 번 생성됩니다.
pub struct AppState {
    /// 설정
    pub config: Config,

    pub store: CredentialStore,

    pub engine: VerificationEngine,

    pub issuer: TokenIssuer,

    pub guard: OriginGuard,

    /// Rate limit 상태 (identity → window)
    pub rate_limits: RwLock<HashMap<String, RateLimitState>>,

    pub started_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct RateLimitState {
    pub window_start: Instant,
    pub count: u32,
}

impl AppState {
    /// 새 상태 생성
    ///
    /// 저장소 연결, 레거시 키 가져오기, 토큰 발급기 구성을 수행합니다.
    pub async fn new(config: &Config) -> anyhow::Result<Self> {
        let hasher = SecretHasher::new(config.hash_params())?;
        let store = CredentialStore::connect(&config.db_url, hasher).await?;

        if !config.legacy_api_keys.is_empty() {
            store.import_legacy(&config.legacy_api_keys).await?;
        }

        let issuer = match &config.token_secret {
            Some(secret) => TokenIssuer::from_key_material(secret, config.token_ttl())?,
            None => {
                tracing::warn!(
                    "KG_TOKEN_SECRET not set; using an ephemeral signing key. Tokens will not survive a restart."
                );
                let mut key = [0u8; 32];
                rand::thread_rng().fill_bytes(&mut key);
                TokenIssuer::new(&key, config.token_ttl())?
            }
        };

        let guard = OriginGuard::from_cidrs(&config.trusted_networks, config.trust_forwarded_for)?;

        Ok(Self::from_parts(config.clone(), store, issuer, guard))
    }

    pub fn from_parts(
        config: Config,
        store: CredentialStore,
        issuer: TokenIssuer,
        guard: OriginGuard,
    ) -> Self {
        Self {
            config,
            engine: VerificationEngine::new(store.clone()),
            store,
            issuer,
            guard,
            rate_limits: RwLock::new(HashMap::new()),
            started_at: Utc::now(),
        }
    }

    /// 고정 윈도우 rate limit
    ///
    /// 허용되면 `true`. `rate_limit_max == 0`이면 항상 허용합니다.
    pub fn check_rate_limit(&self, key: &str) -> bool {
        if self.config.rate_limit_max == 0 {
            return true;
        }

        let now = Instant::now();
        let window = Duration::from_secs(self.config.rate_limit_window_secs);

        let mut limits = self
            .rate_limits
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let entry = limits.entry(key.to_string()).or_insert(RateLimitState {
            window_start: now,
            count: 0,
        });

        if now.duration_since(entry.window_start) > window {
            entry.window_start = now;
            entry.count = 0;
        }

        if entry.count >= self.config.rate_limit_max {
            return false;
        }

        entry.count += 1;
        true
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::store::tests::memory_store;

    pub(crate) const TEST_SIGNING_KEY: &str = "test-signing-key-material-0123456789abcdef";

    pub(crate) async fn test_state(config: Config) -> AppState {
        let store = memory_store().await;
        let issuer = TokenIssuer::from_key_material(TEST_SIGNING_KEY, config.token_ttl()).unwrap();
        let guard =
            OriginGuard::from_cidrs(&config.trusted_networks, config.trust_forwarded_for).unwrap();
        AppState::from_parts(config, store, issuer, guard)
    }

    pub(crate) fn default_config() -> Config {
        Config::from_lookup(|_| None).unwrap()
    }

    #[tokio::test]
    async fn test_rate_limit_window() {
        let mut config = default_config();
        config.rate_limit_max = 2;
        config.rate_limit_window_secs = 60;
        let state = test_state(config).await;

        assert!(state.check_rate_limit("a"));
        assert!(state.check_rate_limit("a"));
        assert!(!state.check_rate_limit("a"));
        // 다른 키는 독립
        assert!(state.check_rate_limit("b"));
    }

    #[tokio::test]
    async fn test_rate_limit_disabled() {
        let mut config = default_config();
        config.rate_limit_max = 0;
        let state = test_state(config).await;
        for _ in 0..100 {
            assert!(state.check_rate_limit("a"));
        }
    }

    #[tokio::test]
    async fn test_new_imports_legacy_keys() {
        let mut config = default_config();
        config.db_url = "sqlite::memory:".to_string();
        config.legacy_api_keys = vec!["legacy-a".to_string(), "legacy-b".to_string()];
        config.argon2_memory_kib = 1024;
        config.argon2_iterations = 1;
        let state = AppState::new(&config).await.unwrap();

        let status = state.store.status().await.unwrap();
        assert_eq!(status.legacy, 2);
        assert!(state.engine.verify("legacy-a", None).await.is_ok());
    }
}
