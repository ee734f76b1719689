//! 컨텍스트 명령어

use crate::config::CliConfig;

pub fn set(gateway: String) -> anyhow::Result<()> {
    let mut config = CliConfig::load().unwrap_or_default();
    config.gateway_url = Some(gateway.trim_end_matches('/').to_string());
    config.save()?;
    println!("Context updated.");
    show()
}

pub fn show() -> anyhow::Result<()> {
    let config = CliConfig::load().unwrap_or_default();

    println!("Current context (~/.kg/config.json):");
    println!(
        "  gateway: {}",
        config.gateway_url.as_deref().unwrap_or("(not set)")
    );
    if let Ok(env) = std::env::var("KG_GATEWAY_URL") {
        println!("  KG_GATEWAY_URL: {}", env);
    }
    Ok(())
}
