//! Keygate CLI (`kg`)
//!
//! Gateway의 내부 관리 API를 호출하는 Operator 도구입니다. 신뢰 네트워크 안에서 실행해야 합니다.

use clap::{Parser, Subcommand};

mod commands;
mod config;

use commands::{OutputFormat, Target};
use config::CliConfig;

#[derive(Parser)]
#[command(name = "kg")]
#[command(author, version, about = "Keygate CLI - API credential management", long_about = None)]
struct Cli {
    /// Gateway URL (overrides context)
    #[arg(long, global = true)]
    gateway: Option<String>,

    /// Output format
    #[arg(long, global = true, default_value = "text")]
    format: OutputFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    // ─────────────────────────────────────────────────────────────────────────
    // Gateway
    // ─────────────────────────────────────────────────────────────────────────
    /// Show gateway and storage status
    Status,

    /// Show gateway configuration (no secrets)
    Config,

    // ─────────────────────────────────────────────────────────────────────────
    // Credentials
    // ─────────────────────────────────────────────────────────────────────────
    /// Create a new API key
    Create {
        #[arg(long)]
        name: String,
        #[arg(long)]
        service: String,
        /// Comma-separated: read,write,admin
        #[arg(long, default_value = "read")]
        permissions: String,
        /// Use an operator-chosen secret instead of a generated one
        #[arg(long)]
        custom_key: Option<String>,
        #[arg(long)]
        expires_in_days: Option<i64>,
    },

    /// List API keys
    List {
        /// Include inactive keys
        #[arg(long)]
        all: bool,
        #[arg(long)]
        service: Option<String>,
    },

    /// Deactivate an API key (irreversible)
    Deactivate {
        #[arg(long, conflicts_with = "api_key")]
        identity: Option<String>,
        #[arg(long)]
        api_key: Option<String>,
        #[arg(long)]
        reason: Option<String>,
    },

    /// Show credential audit log
    Audit {
        #[arg(long, default_value = "100")]
        limit: u32,
    },

    /// Usage statistics per service
    Stats,

    // ─────────────────────────────────────────────────────────────────────────
    // Auth
    // ─────────────────────────────────────────────────────────────────────────
    /// Exchange an API key for an access token
    Login {
        #[arg(long, env = "KG_API_KEY", hide_env_values = true)]
        api_key: String,
        #[arg(long)]
        username: Option<String>,
        /// Comma-separated subset of the key's permissions
        #[arg(long)]
        scopes: Option<String>,
    },

    // ─────────────────────────────────────────────────────────────────────────
    // Context
    // ─────────────────────────────────────────────────────────────────────────
    /// Manage stored gateway context
    Context {
        #[command(subcommand)]
        action: ContextAction,
    },
}

#[derive(Subcommand)]
enum ContextAction {
    /// Store the default gateway URL
    Set {
        #[arg(long)]
        gateway: String,
    },
    /// Show current context
    Show,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let cli = Cli::parse();

    // 설정 로드
    let config = CliConfig::load()?;

    // Gateway 결정 (CLI 옵션 > 설정 파일 > 환경변수)
    let target = Target {
        gateway_url: config.gateway_url(cli.gateway.as_deref()),
        format: cli.format,
    };

    // 명령 실행
    match cli.command {
        Commands::Status => commands::status::status(&target).await,
        Commands::Config => commands::status::config(&target).await,

        Commands::Create {
            name,
            service,
            permissions,
            custom_key,
            expires_in_days,
        } => {
            commands::credentials::create(
                &target,
                commands::credentials::CreateArgs {
                    name,
                    service,
                    permissions,
                    custom_key,
                    expires_in_days,
                },
            )
            .await
        }
        Commands::List { all, service } => {
            commands::credentials::list(&target, all, service.as_deref()).await
        }
        Commands::Deactivate {
            identity,
            api_key,
            reason,
        } => commands::credentials::deactivate(&target, identity, api_key, reason).await,
        Commands::Audit { limit } => commands::credentials::audit(&target, limit).await,
        Commands::Stats => commands::credentials::stats(&target).await,

        Commands::Login {
            api_key,
            username,
            scopes,
        } => {
            commands::auth::login(&target, &api_key, username.as_deref(), scopes.as_deref()).await
        }

        Commands::Context { action } => match action {
            ContextAction::Set { gateway } => commands::context::set(gateway),
            ContextAction::Show => commands::context::show(),
        },
    }
}
