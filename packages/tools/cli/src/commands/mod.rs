//! CLI 명령어 구현

pub mod auth;
pub mod context;
pub mod credentials;
pub mod http;
pub mod status;

use serde::Serialize;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

/// 명령 공통 인자
pub struct Target {
    pub gateway_url: String,
    pub format: OutputFormat,
}

impl Target {
    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.gateway_url, path)
    }
}

pub fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
