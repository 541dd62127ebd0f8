use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{AppError, AppResult};
use crate::proxy::config::{ProxyConfig, UpstreamConfig};
use crate::proxy::gateway::Credentials;

const CONFIG_PATH_ENV: &str = "ANTIGRAVITY_GATEWAY_CONFIG";
const CONFIG_DIR: &str = "antigravity-gateway";
const CONFIG_FILE: &str = "config.toml";

const ENV_ACCESS_TOKEN: &str = "ANTIGRAVITY_ACCESS_TOKEN";
const ENV_PROJECT_ID: &str = "ANTIGRAVITY_PROJECT_ID";
const ENV_PORT: &str = "ANTIGRAVITY_GATEWAY_PORT";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8045
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CredentialsConfig {
    #[serde(default)]
    pub access_token: String,
    #[serde(default)]
    pub project_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Used when `RUST_LOG` is not set.
    #[serde(default = "default_level")]
    pub level: String,
    /// Daily-rolling log files go here when set.
    #[serde(default)]
    pub dir: Option<PathBuf>,
}

fn default_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_level(),
            dir: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub upstream: UpstreamConfig,
    #[serde(default)]
    pub credentials: CredentialsConfig,
    #[serde(default)]
    pub proxy: ProxyConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl AppConfig {
    /// 环境变量覆盖配置文件中的值
    pub fn apply_env_overrides<F>(&mut self, get: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |key: &str| get(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        if let Some(token) = non_empty(ENV_ACCESS_TOKEN) {
            self.credentials.access_token = token;
        }
        if let Some(project) = non_empty(ENV_PROJECT_ID) {
            self.credentials.project_id = project;
        }
        if let Some(port) = non_empty(ENV_PORT) {
            match port.parse::<u16>() {
                Ok(port) => self.server.port = port,
                Err(e) => tracing::warn!("Ignoring {}={}: {}", ENV_PORT, port, e),
            }
        }
    }

    pub fn credentials(&self) -> Credentials {
        Credentials {
            access_token: self.credentials.access_token.clone(),
            project_id: self.credentials.project_id.clone(),
        }
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}

/// Config file location: `$ANTIGRAVITY_GATEWAY_CONFIG`, else the platform config dir.
pub fn get_config_path() -> AppResult<PathBuf> {
    if let Ok(env_path) = std::env::var(CONFIG_PATH_ENV) {
        if !env_path.trim().is_empty() {
            return Ok(PathBuf::from(env_path));
        }
    }

    let base = dirs::config_dir()
        .ok_or_else(|| AppError::Config("failed_to_get_config_dir".to_string()))?;
    Ok(base.join(CONFIG_DIR).join(CONFIG_FILE))
}

/// Read a config file. A missing file yields defaults.
pub fn load_config_from(path: &Path) -> AppResult<AppConfig> {
    if !path.exists() {
        tracing::info!("Config file {} not found, using defaults", path.display());
        return Ok(AppConfig::default());
    }

    let content = fs::read_to_string(path)?;
    let config: AppConfig = toml::from_str(&content)?;
    tracing::info!("Loaded config from {}", path.display());
    Ok(config)
}

/// Load the config file and apply environment overrides.
pub fn load_app_config() -> AppResult<AppConfig> {
    let path = get_config_path()?;
    let mut config = load_config_from(&path)?;
    config.apply_env_overrides(|key| std::env::var(key).ok());
    Ok(config)
}
