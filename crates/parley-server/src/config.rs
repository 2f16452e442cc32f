use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::fs;

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub gateway: GatewayConfig,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    /// Optional shared secret clients must present as `?token=` on upgrade.
    /// Unset means the endpoint is open (trusted reverse proxy in front).
    pub shared_secret: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            shared_secret: None,
        }
    }
}

#[derive(Debug, Deserialize, Serialize)]
pub struct GatewayConfig {
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
    #[serde(default = "default_messages_per_minute")]
    pub messages_per_minute: u32,
    #[serde(default = "default_typing_per_minute")]
    pub typing_per_minute: u32,
    /// How long an unanswered call rings before it is ended with a timeout.
    #[serde(default = "default_ring_timeout_secs")]
    pub ring_timeout_secs: u64,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            max_connections: default_max_connections(),
            messages_per_minute: default_messages_per_minute(),
            typing_per_minute: default_typing_per_minute(),
            ring_timeout_secs: default_ring_timeout_secs(),
        }
    }
}

fn default_bind_address() -> String {
    "0.0.0.0:5000".into()
}
fn default_max_connections() -> usize {
    2_000
}
fn default_messages_per_minute() -> u32 {
    240
}
fn default_typing_per_minute() -> u32 {
    120
}
fn default_ring_timeout_secs() -> u64 {
    45
}

/// Generate a commented config file template with the given values filled in.
fn generate_config_template(config: &Config) -> String {
    format!(
        r#"# Parley Relay Configuration
# Generated automatically on first run. Edit as needed.

[server]
bind_address = "{bind_address}"
# Require this token on websocket upgrades (?token=...):
# shared_secret = "change-me"

[gateway]
max_connections = {max_connections}
messages_per_minute = {messages_per_minute}
typing_per_minute = {typing_per_minute}
# Unanswered calls ring for this long before timing out.
ring_timeout_secs = {ring_timeout_secs}
"#,
        bind_address = config.server.bind_address,
        max_connections = config.gateway.max_connections,
        messages_per_minute = config.gateway.messages_per_minute,
        typing_per_minute = config.gateway.typing_per_minute,
        ring_timeout_secs = config.gateway.ring_timeout_secs,
    )
}

impl Config {
    pub fn load(path: &str) -> Result<Self> {
        let mut config = if std::path::Path::new(path).exists() {
            let content = fs::read_to_string(path)?;
            toml::from_str(&content)?
        } else {
            tracing::info!("Config file not found at '{}', generating defaults...", path);
            let config = Config::default();

            if let Some(parent) = std::path::Path::new(path).parent() {
                fs::create_dir_all(parent)?;
            }
            fs::write(path, generate_config_template(&config))?;
            tracing::info!("Generated default config at '{}'", path);
            config
        };

        // Environment variable overrides
        if let Ok(value) = std::env::var("PARLEY_BIND_ADDRESS") {
            config.server.bind_address = value;
        }
        if let Ok(value) = std::env::var("PARLEY_SHARED_SECRET") {
            config.server.shared_secret = if value.trim().is_empty() {
                None
            } else {
                Some(value)
            };
        }
        if let Ok(value) = std::env::var("PARLEY_MAX_CONNECTIONS") {
            if let Ok(parsed) = value.parse::<usize>() {
                config.gateway.max_connections = parsed.max(1);
            }
        }
        if let Ok(value) = std::env::var("PARLEY_MESSAGES_PER_MINUTE") {
            if let Ok(parsed) = value.parse::<u32>() {
                config.gateway.messages_per_minute = parsed.max(1);
            }
        }
        if let Ok(value) = std::env::var("PARLEY_TYPING_PER_MINUTE") {
            if let Ok(parsed) = value.parse::<u32>() {
                config.gateway.typing_per_minute = parsed.max(1);
            }
        }
        if let Ok(value) = std::env::var("PARLEY_RING_TIMEOUT_SECS") {
            if let Ok(parsed) = value.parse::<u64>() {
                config.gateway.ring_timeout_secs = parsed.max(1);
            }
        }

        Ok(config)
    }
}
