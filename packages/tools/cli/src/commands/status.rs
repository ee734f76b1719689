//! 상태/설정 조회

use serde_json::Value;

use crate::commands::{http, print_json, OutputFormat, Target};

fn field(value: &Value, key: &str) -> String {
    match value.get(key) {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Null) | None => "-".to_string(),
        Some(other) => other.to_string(),
    }
}

pub async fn status(target: &Target) -> anyhow::Result<()> {
    let body: Value = http::send_json(http::client().get(target.url("/internal/status"))).await?;
    if target.format == OutputFormat::Json {
        return print_json(&body);
    }

    println!("Gateway: {}", target.gateway_url);
    println!("  storage:   {} (healthy: {})", field(&body, "backend"), field(&body, "healthy"));
    println!(
        "  keys:      {} total, {} active, {} inactive",
        field(&body, "total"),
        field(&body, "active"),
        field(&body, "inactive")
    );
    println!(
        "  origin:    {} legacy, {} managed",
        field(&body, "legacy"),
        field(&body, "managed")
    );
    println!("  hashing:   {}", field(&body, "hash_algorithm"));
    println!("  uptime:    {}s", field(&body, "uptime_secs"));
    println!("  client ip: {}", field(&body, "client_ip"));
    Ok(())
}

pub async fn config(target: &Target) -> anyhow::Result<()> {
    let body: Value = http::send_json(http::client().get(target.url("/internal/config"))).await?;
    if target.format == OutputFormat::Json {
        return print_json(&body);
    }

    println!("Gateway configuration ({}):", target.gateway_url);
    if let Value::Object(map) = &body {
        for (key, value) in map {
            let rendered = match value {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            println!("  {:<24} {}", key, rendered);
        }
    }
    Ok(())
}
