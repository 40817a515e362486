//! Server configuration module
//!
//! Handles loading and parsing of server configuration from files and environment variables.

use std::env;
use std::path::PathBuf;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Path to the configuration file
    #[serde(skip)]
    pub config_path: PathBuf,

    /// Server name displayed to players
    #[serde(default = "default_server_name")]
    pub server_name: String,

    /// World ID (1-255)
    #[serde(default = "default_world_id")]
    pub world_id: u8,

    /// Game port (TCP)
    #[serde(default = "default_game_port")]
    pub game_port: u16,

    /// Path to data files (saved games, NPC spawns, etc.)
    #[serde(default = "default_data_path")]
    pub data_path: PathBuf,

    /// Maximum number of players
    #[serde(default = "default_max_players")]
    pub max_players: u32,

    /// Maximum number of NPCs
    #[serde(default = "default_max_npcs")]
    pub max_npcs: u32,

    /// Game tick rate in milliseconds
    #[serde(default = "default_tick_rate")]
    pub tick_rate_ms: u64,

    /// Seconds a connection may sit idle before it is dropped
    #[serde(default = "default_idle_timeout")]
    pub idle_timeout_secs: u64,

    /// Autosave interval in seconds (0 to disable)
    #[serde(default = "default_autosave_interval")]
    pub autosave_interval_secs: u64,

    /// Development mode flag (accepts any credentials)
    #[serde(default)]
    pub dev_mode: bool,

    /// Enable debug logging
    #[serde(default)]
    pub debug: bool,
}

// Default value functions
fn default_server_name() -> String {
    "Runevale".to_string()
}

fn default_world_id() -> u8 {
    1
}

fn default_game_port() -> u16 {
    43594
}

fn default_data_path() -> PathBuf {
    PathBuf::from("./data")
}

fn default_max_players() -> u32 {
    2000
}

fn default_max_npcs() -> u32 {
    8192
}

fn default_tick_rate() -> u64 {
    600 // standard tick rate
}

fn default_idle_timeout() -> u64 {
    30
}

fn default_autosave_interval() -> u64 {
    300 // 5 minutes
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            config_path: PathBuf::from("config/server.toml"),
            server_name: default_server_name(),
            world_id: default_world_id(),
            game_port: default_game_port(),
            data_path: default_data_path(),
            max_players: default_max_players(),
            max_npcs: default_max_npcs(),
            tick_rate_ms: default_tick_rate(),
            idle_timeout_secs: default_idle_timeout(),
            autosave_interval_secs: default_autosave_interval(),
            dev_mode: false,
            debug: false,
        }
    }
}

impl ServerConfig {
    /// Load configuration from file and environment variables
    pub async fn load() -> Result<Self> {
        // Determine config path from environment or use default
        let config_path = env::var("RUNEVALE_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("config/server.toml"));

        // Try to load from file
        let mut config = if config_path.exists() {
            let content = tokio::fs::read_to_string(&config_path)
                .await
                .with_context(|| {
                    format!("Failed to read config file: {}", config_path.display())
                })?;

            toml::from_str(&content).with_context(|| {
                format!("Failed to parse config file: {}", config_path.display())
            })?
        } else {
            tracing::warn!(
                "Config file not found at {}, using defaults",
                config_path.display()
            );
            Self::default()
        };

        config.config_path = config_path;

        // Override with environment variables
        config.apply_env_overrides();

        // Validate configuration
        config.validate()?;

        Ok(config)
    }

    /// Apply environment variable overrides
    fn apply_env_overrides(&mut self) {
        if let Ok(val) = env::var("RUNEVALE_SERVER_NAME") {
            self.server_name = val;
        }
        if let Ok(val) = env::var("RUNEVALE_WORLD_ID") {
            if let Ok(id) = val.parse() {
                self.world_id = id;
            }
        }
        if let Ok(val) = env::var("RUNEVALE_GAME_PORT") {
            if let Ok(port) = val.parse() {
                self.game_port = port;
            }
        }
        if let Ok(val) = env::var("RUNEVALE_DATA_PATH") {
            self.data_path = PathBuf::from(val);
        }
        if let Ok(val) = env::var("RUNEVALE_MAX_PLAYERS") {
            if let Ok(max) = val.parse() {
                self.max_players = max;
            }
        }
        if let Ok(val) = env::var("RUNEVALE_DEV_MODE") {
            self.dev_mode = val.to_lowercase() == "true" || val == "1";
        }
        if let Ok(val) = env::var("RUNEVALE_DEBUG") {
            self.debug = val.to_lowercase() == "true" || val == "1";
        }
    }

    /// Validate the configuration
    fn validate(&self) -> Result<()> {
        // World ID must be 1-255
        if self.world_id == 0 {
            anyhow::bail!("World ID must be between 1 and 255");
        }

        // Max players must fit the 11-bit handle space of the wire protocol
        if self.max_players == 0 || self.max_players > 2047 {
            anyhow::bail!("Max players must be between 1 and 2047");
        }

        // Max NPCs must fit the 14-bit handle space of the wire protocol
        if self.max_npcs == 0 || self.max_npcs > 16383 {
            anyhow::bail!("Max NPCs must be between 1 and 16383");
        }

        // Tick rate must be reasonable
        if self.tick_rate_ms < 100 || self.tick_rate_ms > 5000 {
            anyhow::bail!("Tick rate must be between 100ms and 5000ms");
        }

        Ok(())
    }

    /// Directory player profiles are saved to
    pub fn save_path(&self) -> PathBuf {
        self.data_path.join("savedgames")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ServerConfig::default();
        assert_eq!(config.server_name, "Runevale");
        assert_eq!(config.world_id, 1);
        assert_eq!(config.game_port, 43594);
        assert_eq!(config.tick_rate_ms, 600);
        assert_eq!(config.autosave_interval_secs, 300);
    }

    #[test]
    fn test_validation() {
        let mut config = ServerConfig::default();

        // Valid config should pass
        assert!(config.validate().is_ok());

        // Invalid world ID
        config.world_id = 0;
        assert!(config.validate().is_err());
        config.world_id = 1;

        // Player cap beyond the wire handle space
        config.max_players = 4000;
        assert!(config.validate().is_err());
        config.max_players = 2000;

        // Unreasonable tick rate
        config.tick_rate_ms = 10;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_save_path() {
        let config = ServerConfig::default();
        assert!(config.save_path().ends_with("savedgames"));
    }
}
