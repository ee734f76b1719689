//! Keygate Gateway
//!
//! API Key 검증과 Access Token 교환을 제공하고, `/internal` 아래에서 자격 증명 수명 주기를 관리합니다.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::http::HeaderValue;
use axum::middleware::{from_fn, from_fn_with_state};
use axum::routing::{get, post};
use axum::Router;
use tokio::net::TcpListener;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod config;
mod error;
mod handlers;
mod middleware;
mod state;
mod store;
mod verify;

use config::Config;
use state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 환경변수 로드
    dotenvy::dotenv().ok();

    // 설정 로드 (KG_DEBUG가 기본 로그 레벨을 정함)
    let config = Config::from_env()?;

    // 로깅 초기화
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.default_log_filter().into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting Gateway with config: {:?}", config);

    // 앱 상태 초기화
    let state = AppState::new(&config).await?;
    let state = Arc::new(state);

    let app = create_router(state);

    let listener = TcpListener::bind((config.host.as_str(), config.port)).await?;
    tracing::info!("Gateway listening on {}", listener.local_addr()?);

    // 출처 분류에 피어 주소가 필요
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    Ok(())
}

fn cors_layer(config: &Config) -> CorsLayer {
    if config.allowed_origins.is_empty() {
        return CorsLayer::permissive();
    }
    let origins: Vec<HeaderValue> = config
        .allowed_origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::warn!("Ignoring invalid CORS origin: {}", origin);
                None
            }
        })
        .collect();
    CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods(tower_http::cors::Any)
        .allow_headers(tower_http::cors::Any)
}

/// 라우터 생성
fn create_router(state: Arc<AppState>) -> Router {
    let internal = Router::new()
        .route("/status", get(handlers::internal::status))
        .route("/config", get(handlers::internal::config))
        .route("/generate-api-key", post(handlers::internal::generate_api_key))
        .route("/list-api-keys", get(handlers::internal::list_api_keys))
        .route("/deactivate-api-key", post(handlers::internal::deactivate_api_key))
        .route("/audit", get(handlers::internal::audit))
        .route_layer(from_fn_with_state(state.clone(), middleware::internal_only));

    Router::new()
        .route("/", get(handlers::health::root))
        .route("/health", get(handlers::health::health_check))
        // Authentication
        .route("/auth/login", post(handlers::auth::login))
        .route("/auth/verify", get(handlers::auth::verify))
        .route("/auth/verify-api-key", get(handlers::auth::verify_api_key))
        .route("/auth/verify-jwt", get(handlers::auth::verify_jwt))
        // Management (internal only)
        .nest("/internal", internal)
        // Middleware
        .layer(from_fn_with_state(state.clone(), middleware::classify_origin))
        .layer(TraceLayer::new_for_http())
        .layer(cors_layer(&state.config))
        .layer(from_fn(middleware::request_id))
        // State
        .with_state(state)
}
