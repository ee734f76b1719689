//! 토큰 교환 명령어

use serde::{Deserialize, Serialize};
use serde_json::json;

use kg_core::auth::PermissionSet;

use crate::commands::{http, print_json, OutputFormat, Target};

#[derive(Debug, Deserialize, Serialize)]
struct TokenResponse {
    access_token: String,
    token_type: String,
    expires_in: i64,
}

/// API Key를 Access Token으로 교환
pub async fn login(
    target: &Target,
    api_key: &str,
    username: Option<&str>,
    scopes: Option<&str>,
) -> anyhow::Result<()> {
    let scopes = scopes.map(PermissionSet::parse_list).transpose()?;

    let body = json!({ "api_key": api_key, "username": username, "scopes": scopes });
    let token: TokenResponse = http::send_json(
        http::client()
            .post(target.url("/auth/login"))
            .json(&body),
    )
    .await?;

    if target.format == OutputFormat::Json {
        return print_json(&token);
    }
    println!("{}", token.access_token);
    eprintln!("({} token, expires in {}s)", token.token_type, token.expires_in);
    Ok(())
}
