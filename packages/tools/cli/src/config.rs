//! CLI 설정

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

const DEFAULT_GATEWAY_URL: &str = "http://127.0.0.1:8000";

/// CLI 설정 (`~/.kg/config.json`)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CliConfig {
    /// 기본 Gateway URL
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gateway_url: Option<String>,
}

impl CliConfig {
    /// 설정 파일 경로
    fn config_path() -> anyhow::Result<PathBuf> {
        let home = dirs::home_dir().ok_or_else(|| anyhow::anyhow!("Cannot find home directory"))?;
        Ok(home.join(".kg").join("config.json"))
    }

    /// 설정 로드
    pub fn load() -> anyhow::Result<Self> {
        let path = Self::config_path()?;
        if path.exists() {
            let content = std::fs::read_to_string(&path)?;
            let config: CliConfig = serde_json::from_str(&content)?;
            Ok(config)
        } else {
            Ok(Self::default())
        }
    }

    /// 설정 저장
    pub fn save(&self) -> anyhow::Result<()> {
        let path = Self::config_path()?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(&path, content)?;
        Ok(())
    }

    /// Gateway URL 결정 (CLI 옵션 > 설정 파일 > KG_GATEWAY_URL > 기본값)
    pub fn gateway_url(&self, flag: Option<&str>) -> String {
        self.resolve_with(flag, std::env::var("KG_GATEWAY_URL").ok())
    }

    fn resolve_with(&self, flag: Option<&str>, env: Option<String>) -> String {
        let url = flag
            .map(str::to_string)
            .or_else(|| self.gateway_url.clone())
            .or(env)
            .unwrap_or_else(|| DEFAULT_GATEWAY_URL.to_string());
        url.trim_end_matches('/').to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gateway_url_precedence() {
        let config = CliConfig {
            gateway_url: Some("http://stored:8000/".to_string()),
        };
        assert_eq!(
            config.resolve_with(Some("http://flag:9000"), Some("http://env".to_string())),
            "http://flag:9000"
        );
        assert_eq!(
            config.resolve_with(None, Some("http://env".to_string())),
            "http://stored:8000"
        );

        let empty = CliConfig::default();
        assert_eq!(
            empty.resolve_with(None, Some("http://env:1".to_string())),
            "http://env:1"
        );
        assert_eq!(empty.resolve_with(None, None), DEFAULT_GATEWAY_URL);
    }
}
