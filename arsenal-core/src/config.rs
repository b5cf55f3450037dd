//! Configuration types for arsenal

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Tool installation and batch settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolsConfig {
    /// Directory that owns cloned repositories and downloaded binaries
    #[serde(default = "default_tools_dir")]
    pub dir: PathBuf,
    /// Maximum number of tools processed in parallel by install-all/update-all
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    /// Timeout in seconds for install/update commands (clones, downloads)
    #[serde(default = "default_install_timeout")]
    pub install_timeout_secs: u64,
}

fn default_tools_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".arsenal")
        .join("tools")
}

fn default_concurrency() -> usize {
    4
}

fn default_install_timeout() -> u64 {
    600
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            dir: default_tools_dir(),
            concurrency: default_concurrency(),
            install_timeout_secs: default_install_timeout(),
        }
    }
}

/// Reasoning provider configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    #[serde(default = "default_model")]
    pub model: String,
    /// API key, or `${VAR}` to read from the environment
    #[serde(default)]
    pub api_key: Option<String>,
}

fn default_model() -> String {
    "claude-sonnet-4-20250514".to_string()
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            model: default_model(),
            api_key: None,
        }
    }
}

/// Scan loop settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanConfig {
    /// Maximum number of tool invocations per session
    #[serde(default = "default_step_budget")]
    pub step_budget: usize,
    /// Bound in bytes on captured stdout/stderr per observation
    #[serde(default = "default_capture_limit")]
    pub capture_limit: usize,
    /// Default per-invocation timeout in seconds (tools may override)
    #[serde(default = "default_invoke_timeout")]
    pub invoke_timeout_secs: u64,
}

fn default_step_budget() -> usize {
    10
}

fn default_capture_limit() -> usize {
    24 * 1024
}

fn default_invoke_timeout() -> u64 {
    600
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            step_budget: default_step_budget(),
            capture_limit: default_capture_limit(),
            invoke_timeout_secs: default_invoke_timeout(),
        }
    }
}

/// Complete arsenal configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ArsenalConfig {
    #[serde(default)]
    pub tools: ToolsConfig,
    #[serde(default)]
    pub provider: ProviderConfig,
    #[serde(default)]
    pub scan: ScanConfig,
}

impl ArsenalConfig {
    /// Load configuration from a TOML file
    pub fn from_file(path: impl AsRef<std::path::Path>) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::parse(&content)
    }

    /// Parse configuration from TOML string
    pub fn parse(content: &str) -> crate::Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Load configuration from default locations with cascade:
    /// 1. ./arsenal.toml (local override)
    /// 2. ~/.arsenal/config.toml (global defaults)
    /// 3. Built-in defaults
    pub fn load_default() -> Self {
        if let Ok(config) = Self::from_file("arsenal.toml") {
            return config;
        }

        if let Some(home) = dirs::home_dir() {
            let global_path = home.join(".arsenal").join("config.toml");
            if let Ok(config) = Self::from_file(&global_path) {
                return config;
            }
        }

        Self::default()
    }

    /// Expand `${VAR}` references in the API key field
    pub fn expand_env_vars(&mut self) {
        if let Some(ref key) = self.provider.api_key {
            if key.starts_with("${") && key.ends_with('}') {
                let var_name = &key[2..key.len() - 1];
                if let Ok(value) = std::env::var(var_name) {
                    self.provider.api_key = Some(value);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ArsenalConfig::default();
        assert_eq!(config.tools.concurrency, 4);
        assert_eq!(config.scan.step_budget, 10);
        assert_eq!(config.scan.capture_limit, 24 * 1024);
    }

    #[test]
    fn test_parse_partial_config() {
        let toml = r#"
[tools]
concurrency = 2

[scan]
step_budget = 5
"#;
        let config = ArsenalConfig::parse(toml).unwrap();
        assert_eq!(config.tools.concurrency, 2);
        assert_eq!(config.scan.step_budget, 5);
        // Untouched sections keep defaults
        assert_eq!(config.provider.model, "claude-sonnet-4-20250514");
    }

    #[test]
    fn test_parse_full_config() {
        let toml = r#"
[tools]
dir = "/opt/arsenal"
install_timeout_secs = 300

[provider]
model = "claude-sonnet-4-20250514"
api_key = "sk-ant-test123"

[scan]
capture_limit = 4096
invoke_timeout_secs = 120
"#;
        let config = ArsenalConfig::parse(toml).unwrap();
        assert_eq!(config.tools.dir, PathBuf::from("/opt/arsenal"));
        assert_eq!(config.provider.api_key, Some("sk-ant-test123".to_string()));
        assert_eq!(config.scan.capture_limit, 4096);
    }

    #[test]
    fn test_env_var_expansion() {
        std::env::set_var("ARSENAL_TEST_KEY", "expanded_value");
        let toml = r#"
[provider]
api_key = "${ARSENAL_TEST_KEY}"
"#;
        let mut config = ArsenalConfig::parse(toml).unwrap();
        config.expand_env_vars();
        assert_eq!(config.provider.api_key, Some("expanded_value".to_string()));
        std::env::remove_var("ARSENAL_TEST_KEY");
    }
}
