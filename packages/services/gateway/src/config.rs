//! Gateway 설정

use std::env;
use std::fmt;

use kg_core::auth::HashParams;
use kg_core::origin::DEFAULT_TRUSTED_NETWORKS;

/// Gateway 설정
#[derive(Clone)]
pub struct Config {
    /// 바인드 주소
    pub host: String,

    /// 서버 포트
    pub port: u16,

    /// SQLite URL
    pub db_url: String,

    /// 토큰 서명 키 (없으면 임시 키 생성)
    pub token_secret: Option<String>,

    /// Access Token 수명 (분)
    pub token_ttl_minutes: i64,

    /// 레거시 평문 API Key 목록 (시작 시 가져오기)
    pub legacy_api_keys: Vec<String>,

    /// 내부로 취급할 CIDR 목록
    pub trusted_networks: Vec<String>,

    /// 신뢰 프록시의 X-Forwarded-For 사용 여부
    pub trust_forwarded_for: bool,

    /// CORS 허용 origin (비어 있으면 permissive)
    pub allowed_origins: Vec<String>,

    /// Rate limit max requests per window (0이면 비활성)
    pub rate_limit_max: u32,

    /// Rate limit window seconds
    pub rate_limit_window_secs: u64,

    pub argon2_memory_kib: u32,
    pub argon2_iterations: u32,
    pub argon2_parallelism: u32,

    /// 기본 로그 레벨을 debug로 (`RUST_LOG`가 있으면 그쪽이 우선)
    pub debug: bool,
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("db_url", &self.db_url)
            .field("token_secret", &self.token_secret.as_ref().map(|_| "<redacted>"))
            .field("token_ttl_minutes", &self.token_ttl_minutes)
            .field("legacy_api_keys", &self.legacy_api_keys.len())
            .field("trusted_networks", &self.trusted_networks)
            .field("trust_forwarded_for", &self.trust_forwarded_for)
            .field("allowed_origins", &self.allowed_origins)
            .field("rate_limit_max", &self.rate_limit_max)
            .field("rate_limit_window_secs", &self.rate_limit_window_secs)
            .field("argon2_memory_kib", &self.argon2_memory_kib)
            .field("argon2_iterations", &self.argon2_iterations)
            .field("argon2_parallelism", &self.argon2_parallelism)
            .field("debug", &self.debug)
            .finish()
    }
}

fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

impl Config {
    /// 환경변수에서 설정 로드
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// 임의의 key → value 조회 함수로 설정 로드
    pub fn from_lookup<F>(lookup: F) -> anyhow::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str, default: &str| lookup(key).unwrap_or_else(|| default.to_string());

        Ok(Self {
            host: var("KG_HOST", "0.0.0.0"),

            port: var("KG_PORT", "8000").parse()?,

            db_url: var("KG_DB_URL", "sqlite://data/keygate.db"),

            token_secret: lookup("KG_TOKEN_SECRET").filter(|s| !s.trim().is_empty()),

            token_ttl_minutes: var("KG_TOKEN_TTL_MINUTES", "30").parse()?,

            legacy_api_keys: lookup("KG_LEGACY_API_KEYS")
                .map(|v| split_list(&v))
                .unwrap_or_default(),

            trusted_networks: lookup("KG_TRUSTED_NETWORKS")
                .map(|v| split_list(&v))
                .filter(|v| !v.is_empty())
                .unwrap_or_else(|| {
                    DEFAULT_TRUSTED_NETWORKS
                        .iter()
                        .map(|s| s.to_string())
                        .collect()
                }),

            trust_forwarded_for: var("KG_TRUST_FORWARDED_FOR", "false")
                .parse()
                .unwrap_or(false),

            allowed_origins: lookup("KG_ALLOWED_ORIGINS")
                .map(|v| split_list(&v))
                .unwrap_or_default(),

            rate_limit_max: var("KG_RATE_LIMIT_MAX", "60").parse().unwrap_or(60),

            rate_limit_window_secs: var("KG_RATE_LIMIT_WINDOW_SECS", "60")
                .parse()
                .unwrap_or(60),

            argon2_memory_kib: var("KG_ARGON2_MEMORY_KIB", "19456").parse()?,

            argon2_iterations: var("KG_ARGON2_ITERATIONS", "2").parse()?,

            argon2_parallelism: var("KG_ARGON2_PARALLELISM", "1").parse()?,

            debug: var("KG_DEBUG", "false").parse().unwrap_or(false),
        })
    }

    pub fn hash_params(&self) -> HashParams {
        HashParams {
            memory_kib: self.argon2_memory_kib,
            iterations: self.argon2_iterations,
            parallelism: self.argon2_parallelism,
        }
    }

    /// `RUST_LOG`가 없을 때 쓰는 기본 필터
    pub fn default_log_filter(&self) -> &'static str {
        if self.debug {
            "kg_gateway=debug,tower_http=debug"
        } else {
            "kg_gateway=info,tower_http=info"
        }
    }

    pub fn token_ttl(&self) -> chrono::Duration {
        chrono::Duration::minutes(self.token_ttl_minutes)
    }
}
