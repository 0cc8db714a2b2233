//! Configuration management for snapdf.
//!
//! Loads configuration from ${SNAPDF_HOME}/config.toml with sensible defaults,
//! then applies environment overrides on top.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};

/// Environment variable holding the bot token.
pub const BOT_TOKEN_ENV: &str = "TELEGRAM_BOT_TOKEN";
/// Environment variable holding the mirror chat id.
pub const MIRROR_CHAT_ENV: &str = "SNAPDF_MIRROR_CHAT_ID";
/// Environment variable holding the liveness port (set by most PaaS hosts).
pub const PORT_ENV: &str = "PORT";

/// Telegram bot configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TelegramConfig {
    /// Bot token for the Telegram Bot API.
    pub bot_token: Option<String>,
    /// Chat that receives a copy of every accepted image.
    pub mirror_chat_id: Option<i64>,
    /// Allowlist of numeric Telegram user IDs. Empty allows everyone.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub allowlist_user_ids: Vec<i64>,
    /// Long-polling timeout for `getUpdates`.
    pub poll_timeout_secs: u64,
}

impl Default for TelegramConfig {
    fn default() -> Self {
        Self {
            bot_token: None,
            mirror_chat_id: None,
            allowlist_user_ids: Vec::new(),
            poll_timeout_secs: 30,
        }
    }
}

/// Liveness endpoint configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 5000,
        }
    }
}

impl ServerConfig {
    /// Returns the `host:port` string the liveness endpoint binds to.
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// On-disk storage for received images and generated documents.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub images_dir: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            images_dir: PathBuf::from("images"),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub telegram: TelegramConfig,
    pub server: ServerConfig,
    pub storage: StorageConfig,
}

fn default_config_template() -> &'static str {
    include_str!("../default_config.toml")
}

impl Config {
    /// Loads configuration from the default config path and applies
    /// environment overrides.
    ///
    /// # Errors
    /// Returns an error if the file exists but cannot be read or parsed, or if
    /// an environment override holds an invalid value.
    pub fn load() -> Result<Self> {
        let mut config = Self::load_from(&paths::config_path())?;
        config.apply_overrides(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    /// Loads configuration from a specific path.
    /// Returns defaults if file doesn't exist.
    ///
    /// # Errors
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn load_from(path: &Path) -> Result<Self> {
        if path.exists() {
            let contents = fs::read_to_string(path)
                .with_context(|| format!("Failed to read config from {}", path.display()))?;
            toml::from_str(&contents)
                .with_context(|| format!("Failed to parse config from {}", path.display()))
        } else {
            Ok(Config::default())
        }
    }

    /// Applies environment overrides using `lookup` to read variables.
    ///
    /// Blank values are ignored so an exported-but-empty variable does not
    /// wipe a value from the config file.
    ///
    /// # Errors
    /// Returns an error if `PORT` or the mirror chat id is not a number.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        let read = |key: &str| {
            lookup(key)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };

        if let Some(token) = read(BOT_TOKEN_ENV) {
            self.telegram.bot_token = Some(token);
        }
        if let Some(chat_id) = read(MIRROR_CHAT_ENV) {
            let chat_id = chat_id
                .parse::<i64>()
                .with_context(|| format!("{MIRROR_CHAT_ENV} must be a numeric chat id"))?;
            self.telegram.mirror_chat_id = Some(chat_id);
        }
        if let Some(port) = read(PORT_ENV) {
            self.server.port = port
                .parse::<u16>()
                .with_context(|| format!("{PORT_ENV} must be a valid TCP port, got '{port}'"))?;
        }
        Ok(())
    }

    /// Returns the configured bot token, if present and non-blank.
    pub fn bot_token(&self) -> Option<&str> {
        self.telegram
            .bot_token
            .as_deref()
            .map(str::trim)
            .filter(|token| !token.is_empty())
    }

    pub fn poll_timeout(&self) -> Duration {
        Duration::from_secs(self.telegram.poll_timeout_secs)
    }

    /// Writes the commented default template to `path`.
    ///
    /// # Errors
    /// Returns an error if the file already exists or cannot be written.
    pub fn init(path: &Path) -> Result<()> {
        if path.exists() {
            bail!("Config file already exists at {}", path.display());
        }

        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        fs::write(path, default_config_template())
            .with_context(|| format!("Failed to write config to {}", path.display()))
    }
}

pub mod paths {
    //! Path resolution for snapdf configuration.
    //!
    //! SNAPDF_HOME resolution order:
    //! 1. SNAPDF_HOME environment variable (if set)
    //! 2. ~/.config/snapdf (default)

    use std::path::PathBuf;

    /// Returns the snapdf home directory.
    pub fn snapdf_home() -> PathBuf {
        if let Ok(home) = std::env::var("SNAPDF_HOME") {
            return PathBuf::from(home);
        }

        dirs::home_dir().map_or_else(
            || PathBuf::from(".snapdf"),
            |home| home.join(".config").join("snapdf"),
        )
    }

    /// Returns the path to the config.toml file.
    pub fn config_path() -> PathBuf {
        snapdf_home().join("config.toml")
    }
}
