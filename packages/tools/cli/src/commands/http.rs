use anyhow::Context as _;
use reqwest::{Client, RequestBuilder};
use serde::de::DeserializeOwned;
use serde::Deserialize;

pub fn client() -> Client {
    Client::new()
}

#[derive(Deserialize)]
struct ErrorResponse {
    error: ErrorBody,
}

#[derive(Deserialize)]
struct ErrorBody {
    code: String,
    message: String,
    #[serde(rename = "requestId")]
    request_id: Option<String>,
}

/// Gateway 에러 본문을 한 줄 메시지로 변환
fn describe_error(text: &str) -> String {
    match serde_json::from_str::<ErrorResponse>(text) {
        Ok(ErrorResponse { error }) => match error.request_id {
            Some(id) => format!("{}: {} (request {})", error.code, error.message, id),
            None => format!("{}: {}", error.code, error.message),
        },
        Err(_) => text.to_string(),
    }
}

pub async fn send_json<T: DeserializeOwned>(req: RequestBuilder) -> anyhow::Result<T> {
    let resp = req.send().await.context("request failed")?;
    let status = resp.status();
    if !status.is_success() {
        let text = resp.text().await.unwrap_or_default();
        return Err(anyhow::anyhow!(
            "request failed ({}): {}",
            status,
            describe_error(&text)
        ));
    }
    let body = resp.json::<T>().await.context("invalid json response")?;
    Ok(body)
}
