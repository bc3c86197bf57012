//! Configuration management for Parley Server

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tokio::fs;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub storage: StorageConfig,
    pub messaging: MessagingConfig,
    pub gate: GateConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Header carrying the caller's user id, set by the upstream gateway
    pub user_header: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Path of the SQLite database, or `:memory:`
    pub database_path: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessagingConfig {
    pub default_page_size: u32,
    pub max_page_size: u32,
    pub max_content_length: usize,
    pub max_images_per_message: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GateConfig {
    /// Base URL of the permission service; unset means every pair may message
    pub permission_url: Option<String>,
    /// Base URL of the push dispatcher; unset means pushes are only logged
    pub push_url: Option<String>,
    /// Base URL of the user directory; unset means everyone shows online status
    pub directory_url: Option<String>,
    pub permission_timeout_ms: u64,
    pub push_timeout_ms: u64,
    pub directory_timeout_ms: u64,
    pub on_permission_failure: FailMode,
}

/// What the create path does when the permission check times out or errors
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FailMode {
    Deny,
    Allow,
}

impl GateConfig {
    pub fn permission_timeout(&self) -> Duration {
        Duration::from_millis(self.permission_timeout_ms)
    }

    pub fn push_timeout(&self) -> Duration {
        Duration::from_millis(self.push_timeout_ms)
    }

    pub fn directory_timeout(&self) -> Duration {
        Duration::from_millis(self.directory_timeout_ms)
    }
}

impl Config {
    pub async fn load(path: &str) -> anyhow::Result<Self> {
        if Path::new(path).exists() {
            let content = fs::read_to_string(path).await?;
            let config: Config = toml::from_str(&content)?;
            Ok(config)
        } else {
            let config = Config::default();
            let content = toml::to_string_pretty(&config)?;
            fs::write(path, content).await?;
            tracing::info!("Created default config at {}", path);
            Ok(config)
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: "0.0.0.0".to_string(),
                port: 8080,
                user_header: "x-user-id".to_string(),
            },
            storage: StorageConfig {
                database_path: "./data/parley.db".to_string(),
            },
            messaging: MessagingConfig {
                default_page_size: 50,
                max_page_size: 200,
                max_content_length: 4000,
                max_images_per_message: 10,
            },
            gate: GateConfig {
                permission_url: None,
                push_url: None,
                directory_url: None,
                permission_timeout_ms: 3000,
                push_timeout_ms: 5000,
                directory_timeout_ms: 2000,
                on_permission_failure: FailMode::Deny,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_round_trips_through_toml() {
        let config = Config::default();
        let text = toml::to_string_pretty(&config).unwrap();
        let parsed: Config = toml::from_str(&text).unwrap();

        assert_eq!(parsed.server.user_header, "x-user-id");
        assert_eq!(parsed.gate.on_permission_failure, FailMode::Deny);
        assert!(parsed.gate.permission_url.is_none());
    }

    #[test]
    fn fail_mode_parses_snake_case() {
        let gate: GateConfig = toml::from_str(
            r#"
            permission_url = "http://perm.internal"
            permission_timeout_ms = 100
            push_timeout_ms = 100
            directory_timeout_ms = 100
            on_permission_failure = "allow"
            "#,
        )
        .unwrap();

        assert_eq!(gate.on_permission_failure, FailMode::Allow);
        assert_eq!(gate.permission_timeout(), Duration::from_millis(100));
    }
}
