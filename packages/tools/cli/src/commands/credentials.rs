//! 자격 증명 관리 명령어

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use kg_core::auth::{Credential, CredentialIdentity, PermissionSet};

use crate::commands::{http, print_json, OutputFormat, Target};

#[derive(Debug, Deserialize, Serialize)]
struct GeneratedKey {
    identity: CredentialIdentity,
    api_key: String,
    name: String,
    service: String,
    permissions: PermissionSet,
    created_at: DateTime<Utc>,
    expires_at: Option<DateTime<Utc>>,
    message: String,
}

#[derive(Debug, Deserialize, Serialize)]
struct KeyList {
    total_keys: usize,
    keys: Vec<Credential>,
}

#[derive(Debug, Deserialize, Serialize)]
struct Deactivated {
    identity: CredentialIdentity,
    status: String,
    message: String,
}

#[derive(Debug, Deserialize, Serialize)]
struct AuditEntry {
    id: String,
    identity: CredentialIdentity,
    action: String,
    detail: Value,
    at: DateTime<Utc>,
}

pub struct CreateArgs {
    pub name: String,
    pub service: String,
    pub permissions: String,
    pub custom_key: Option<String>,
    pub expires_in_days: Option<i64>,
}

pub async fn create(target: &Target, args: CreateArgs) -> anyhow::Result<()> {
    // 전송 전에 로컬에서 권한 문자열 검증
    let permissions = PermissionSet::parse_list(&args.permissions)?;

    let body = json!({
        "name": args.name,
        "service": args.service,
        "permissions": permissions,
        "custom_key": args.custom_key,
        "expires_in_days": args.expires_in_days,
    });
    let created: GeneratedKey = http::send_json(
        http::client()
            .post(target.url("/internal/generate-api-key"))
            .json(&body),
    )
    .await?;

    if target.format == OutputFormat::Json {
        return print_json(&created);
    }

    println!("Created API key '{}' for service '{}'", created.name, created.service);
    println!("  identity:    {}", created.identity);
    println!("  permissions: {}", created.permissions);
    println!("  created at:  {}", created.created_at.to_rfc3339());
    if let Some(expires_at) = created.expires_at {
        println!("  expires at:  {}", expires_at.to_rfc3339());
    }
    println!();
    println!("  api key:     {}", created.api_key);
    println!();
    println!("{}", created.message);
    Ok(())
}

async fn fetch_keys(target: &Target, all: bool, service: Option<&str>) -> anyhow::Result<KeyList> {
    let mut url = reqwest::Url::parse(&target.url("/internal/list-api-keys"))?;
    {
        let mut pairs = url.query_pairs_mut();
        pairs.append_pair("active_only", if all { "false" } else { "true" });
        if let Some(service) = service {
            pairs.append_pair("service", service);
        }
    }
    http::send_json(http::client().get(url)).await
}

fn format_time(value: Option<DateTime<Utc>>) -> String {
    value
        .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| "never".to_string())
}

pub async fn list(target: &Target, all: bool, service: Option<&str>) -> anyhow::Result<()> {
    let list = fetch_keys(target, all, service).await?;
    if target.format == OutputFormat::Json {
        return print_json(&list);
    }

    if list.keys.is_empty() {
        println!("No API keys.");
        return Ok(());
    }

    println!(
        "{:<18} {:<20} {:<12} {:<18} {:<8} {:>7}  {}",
        "IDENTITY", "NAME", "SERVICE", "PERMISSIONS", "STATUS", "USAGE", "LAST USED"
    );
    for key in &list.keys {
        let status = if !key.is_active {
            "inactive"
        } else if key.is_expired_at(Utc::now()) {
            "expired"
        } else {
            "active"
        };
        println!(
            "{:<18} {:<20} {:<12} {:<18} {:<8} {:>7}  {}",
            key.identity.as_str(),
            key.display_name,
            key.service_scope,
            key.permissions.to_string(),
            status,
            key.usage_count,
            format_time(key.last_used_at)
        );
    }
    println!("\n{} key(s)", list.total_keys);
    Ok(())
}

pub async fn deactivate(
    target: &Target,
    identity: Option<String>,
    api_key: Option<String>,
    reason: Option<String>,
) -> anyhow::Result<()> {
    if identity.is_none() && api_key.is_none() {
        anyhow::bail!("Specify --identity or --api-key");
    }

    let body = json!({ "identity": identity, "api_key": api_key, "reason": reason });
    let resp: Deactivated = http::send_json(
        http::client()
            .post(target.url("/internal/deactivate-api-key"))
            .json(&body),
    )
    .await?;

    if target.format == OutputFormat::Json {
        return print_json(&resp);
    }
    println!("{} {}", resp.identity, resp.status);
    println!("{}", resp.message);
    Ok(())
}

pub async fn audit(target: &Target, limit: u32) -> anyhow::Result<()> {
    let mut url = reqwest::Url::parse(&target.url("/internal/audit"))?;
    url.query_pairs_mut().append_pair("limit", &limit.to_string());
    let events: Vec<AuditEntry> = http::send_json(http::client().get(url)).await?;

    if target.format == OutputFormat::Json {
        return print_json(&events);
    }
    if events.is_empty() {
        println!("No audit events.");
        return Ok(());
    }
    for event in events {
        println!(
            "- {} {:<12} {}",
            event.at.to_rfc3339(),
            event.action,
            event.identity
        );
        if !event.detail.is_null() {
            println!("  {}", event.detail);
        }
    }
    Ok(())
}

// ─────────────────────────────────────────────────────────────────────────────
// Stats
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Default, PartialEq, Eq, Serialize)]
pub struct ServiceStats {
    pub total: usize,
    pub active: usize,
    pub usage: u64,
}

#[derive(Debug, PartialEq, Eq, Serialize)]
pub struct TopKey {
    pub identity: String,
    pub display_name: String,
    pub usage_count: u64,
}

#[derive(Debug, Default, Serialize)]
pub struct Stats {
    pub services: BTreeMap<String, ServiceStats>,
    pub top_used: Vec<TopKey>,
}

const TOP_USED: usize = 5;

/// 서비스별 집계와 사용량 상위 키
pub fn summarize(keys: &[Credential]) -> Stats {
    let mut stats = Stats::default();
    for key in keys {
        let entry = stats.services.entry(key.service_scope.clone()).or_default();
        entry.total += 1;
        if key.is_active {
            entry.active += 1;
        }
        entry.usage += key.usage_count;
    }

    let mut used: Vec<&Credential> = keys.iter().filter(|k| k.usage_count > 0).collect();
    // 사용량 내림차순, 동률은 목록 순서 유지
    used.sort_by(|a, b| b.usage_count.cmp(&a.usage_count));
    stats.top_used = used
        .into_iter()
        .take(TOP_USED)
        .map(|k| TopKey {
            identity: k.identity.to_string(),
            display_name: k.display_name.clone(),
            usage_count: k.usage_count,
        })
        .collect();
    stats
}

pub async fn stats(target: &Target) -> anyhow::Result<()> {
    let list = fetch_keys(target, true, None).await?;
    let stats = summarize(&list.keys);

    if target.format == OutputFormat::Json {
        return print_json(&stats);
    }

    println!("{:<16} {:>6} {:>7} {:>9}", "SERVICE", "TOTAL", "ACTIVE", "USAGE");
    for (service, s) in &stats.services {
        println!("{:<16} {:>6} {:>7} {:>9}", service, s.total, s.active, s.usage);
    }
    if !stats.top_used.is_empty() {
        println!("\nMost used:");
        for key in &stats.top_used {
            println!("  {:<18} {:<20} {}", key.identity, key.display_name, key.usage_count);
        }
    }
    Ok(())
}
