use std::env;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

pub const DEFAULT_API_URL: &str = "https://prts.wiki/api.php";
pub const DEFAULT_USER_AGENT: &str = "prts/0.1";
pub const DEFAULT_TIMEOUT_MS: u64 = 30_000;
pub const DEFAULT_MAP_PREVIEW_URL: &str = "https://torappu.prts.wiki/assets/map_preview";
pub const DEFAULT_INDEX_TTL_SECONDS: u64 = 300;
pub const DEFAULT_AGGREGATE_PAGE: &str = "敌人一览/数据";

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct PrtsConfig {
    #[serde(default)]
    pub wiki: WikiSection,
    #[serde(default)]
    pub index: IndexSection,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct WikiSection {
    pub api_url: Option<String>,
    pub user_agent: Option<String>,
    pub timeout_ms: Option<u64>,
    pub map_preview_url: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct IndexSection {
    pub ttl_seconds: Option<u64>,
    pub aggregate_page: Option<String>,
}

/// Fully resolved settings: env > config file > built-in default.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub api_url: String,
    pub user_agent: String,
    pub timeout_ms: u64,
    pub map_preview_url: String,
    pub index_ttl_seconds: u64,
    pub aggregate_page: String,
}

impl Default for Settings {
    fn default() -> Self {
        PrtsConfig::default().settings_with_lookup(|_| None)
    }
}

impl PrtsConfig {
    pub fn settings(&self) -> Settings {
        self.settings_with_lookup(|key| env::var(key).ok())
    }

    pub fn settings_with_lookup<F>(&self, lookup_env: F) -> Settings
    where
        F: Fn(&str) -> Option<String>,
    {
        let env_text = |key: &str| {
            lookup_env(key)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };
        let env_u64 = |key: &str| env_text(key).and_then(|value| value.parse::<u64>().ok());

        Settings {
            api_url: env_text("PRTS_API_URL")
                .or_else(|| self.wiki.api_url.clone())
                .unwrap_or_else(|| DEFAULT_API_URL.to_string()),
            user_agent: env_text("PRTS_USER_AGENT")
                .or_else(|| self.wiki.user_agent.clone())
                .unwrap_or_else(|| DEFAULT_USER_AGENT.to_string()),
            timeout_ms: env_u64("PRTS_HTTP_TIMEOUT_MS")
                .or(self.wiki.timeout_ms)
                .unwrap_or(DEFAULT_TIMEOUT_MS),
            map_preview_url: self
                .wiki
                .map_preview_url
                .clone()
                .unwrap_or_else(|| DEFAULT_MAP_PREVIEW_URL.to_string())
                .trim_end_matches('/')
                .to_string(),
            index_ttl_seconds: env_u64("PRTS_INDEX_TTL_SECONDS")
                .or(self.index.ttl_seconds)
                .unwrap_or(DEFAULT_INDEX_TTL_SECONDS),
            aggregate_page: self
                .index
                .aggregate_page
                .clone()
                .unwrap_or_else(|| DEFAULT_AGGREGATE_PAGE.to_string()),
        }
    }
}

/// Load and parse a PrtsConfig from a TOML file. Returns default if file doesn't exist.
pub fn load_config(config_path: &Path) -> Result<PrtsConfig> {
    if !config_path.exists() {
        return Ok(PrtsConfig::default());
    }
    let content = fs::read_to_string(config_path)
        .with_context(|| format!("failed to read {}", config_path.display()))?;
    let parsed: PrtsConfig = toml::from_str(&content)
        .with_context(|| format!("failed to parse {}", config_path.display()))?;
    Ok(parsed)
}

pub fn render_default_config() -> String {
    format!(
        "# prts configuration (materialized by `prts init`)\n# Environment overrides: PRTS_API_URL, PRTS_USER_AGENT, PRTS_HTTP_TIMEOUT_MS, PRTS_INDEX_TTL_SECONDS\n\n[wiki]\napi_url = \"{DEFAULT_API_URL}\"\n# user_agent = \"{DEFAULT_USER_AGENT}\"\ntimeout_ms = {DEFAULT_TIMEOUT_MS}\nmap_preview_url = \"{DEFAULT_MAP_PREVIEW_URL}\"\n\n[index]\nttl_seconds = {DEFAULT_INDEX_TTL_SECONDS}\naggregate_page = \"{DEFAULT_AGGREGATE_PAGE}\"\n"
    )
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;
    use tempfile::tempdir;

    #[test]
    fn default_settings_point_at_prts() {
        let settings = Settings::default();
        assert_eq!(settings.api_url, DEFAULT_API_URL);
        assert_eq!(settings.user_agent, DEFAULT_USER_AGENT);
        assert_eq!(settings.index_ttl_seconds, 300);
        assert_eq!(settings.aggregate_page, "敌人一览/数据");
    }

    #[test]
    fn load_config_returns_default_for_missing_file() {
        let config = load_config(Path::new("/nonexistent/config.toml")).expect("load config");
        assert_eq!(config, PrtsConfig::default());
    }

    #[test]
    fn load_config_parses_sections() {
        let temp = tempdir().expect("tempdir");
        let config_path = temp.path().join("config.toml");
        fs::write(
            &config_path,
            r#"
[wiki]
api_url = "https://mirror.example/api.php"
timeout_ms = 5000
map_preview_url = "https://assets.example/map/"

[index]
ttl_seconds = 60
"#,
        )
        .expect("write config");

        let settings = load_config(&config_path)
            .expect("load config")
            .settings_with_lookup(|_| None);
        assert_eq!(settings.api_url, "https://mirror.example/api.php");
        assert_eq!(settings.timeout_ms, 5000);
        assert_eq!(settings.map_preview_url, "https://assets.example/map");
        assert_eq!(settings.index_ttl_seconds, 60);
        assert_eq!(settings.user_agent, DEFAULT_USER_AGENT);
    }

    #[test]
    fn env_overrides_config_and_ignores_blank_values() {
        let config = PrtsConfig {
            wiki: WikiSection {
                api_url: Some("https://from-config/api.php".to_string()),
                user_agent: Some("config-agent".to_string()),
                ..WikiSection::default()
            },
            index: IndexSection::default(),
        };
        let env = HashMap::from([
            ("PRTS_API_URL".to_string(), " https://from-env/api.php ".to_string()),
            ("PRTS_USER_AGENT".to_string(), "   ".to_string()),
            ("PRTS_INDEX_TTL_SECONDS".to_string(), "not-a-number".to_string()),
        ]);
        let settings = config.settings_with_lookup(|key| env.get(key).cloned());
        assert_eq!(settings.api_url, "https://from-env/api.php");
        assert_eq!(settings.user_agent, "config-agent");
        assert_eq!(settings.index_ttl_seconds, DEFAULT_INDEX_TTL_SECONDS);
    }

    #[test]
    fn load_config_returns_error_for_invalid_toml() {
        let temp = tempdir().expect("tempdir");
        let config_path = temp.path().join("config.toml");
        fs::write(&config_path, "[wiki\napi_url = \"oops\"").expect("write config");
        let error = load_config(&config_path).expect_err("must fail");
        assert!(error.to_string().contains("failed to parse"));
    }

    #[test]
    fn rendered_default_config_round_trips() {
        let parsed: PrtsConfig = toml::from_str(&render_default_config()).expect("parse");
        let settings = parsed.settings_with_lookup(|_| None);
        assert_eq!(settings, Settings::default());
    }
}
