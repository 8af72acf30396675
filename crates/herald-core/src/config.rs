use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

pub const DEFAULT_PORT: u16 = 18790;
pub const DEFAULT_BIND: &str = "127.0.0.1";

/// Top-level config (herald.toml + HERALD_* env overrides).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeraldConfig {
    pub gateway: GatewayConfig,
    pub telegram: TelegramConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub redis: RedisConfig,
    #[serde(default)]
    pub broadcast: BroadcastConfig,
}

impl Default for HeraldConfig {
    fn default() -> Self {
        Self {
            gateway: GatewayConfig {
                port: DEFAULT_PORT,
                bind: DEFAULT_BIND.to_string(),
                admin_token: Some("change-me".to_string()),
            },
            telegram: TelegramConfig {
                bot_token: String::new(),
                api_base_url: default_api_base_url(),
            },
            database: DatabaseConfig::default(),
            redis: RedisConfig::default(),
            broadcast: BroadcastConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_bind")]
    pub bind: String,
    /// Bearer token required by every admin endpoint. None disables the
    /// surface entirely (all requests get 401).
    pub admin_token: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelegramConfig {
    /// Opaque Bot API secret.
    pub bot_token: String,
    #[serde(default = "default_api_base_url")]
    pub api_base_url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedisConfig {
    #[serde(default = "default_redis_url")]
    pub url: String,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: default_redis_url(),
        }
    }
}

/// Broadcast worker knobs. Every field has a production-safe default, so a
/// bare `[broadcast]` section (or none at all) yields a working engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BroadcastConfig {
    #[serde(default = "bool_true")]
    pub enabled: bool,
    #[serde(default = "default_tick_seconds")]
    pub tick_seconds: u64,
    #[serde(default = "default_batch_size")]
    pub batch_size: u32,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Global ceiling on outgoing sends, all campaigns combined.
    #[serde(default = "default_max_messages_per_second")]
    pub max_messages_per_second: u32,
    #[serde(default = "default_request_timeout_sec")]
    pub request_timeout_sec: u64,
    #[serde(default = "default_lock_ttl_sec")]
    pub lock_ttl_sec: u64,
}

impl Default for BroadcastConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            tick_seconds: default_tick_seconds(),
            batch_size: default_batch_size(),
            max_attempts: default_max_attempts(),
            max_messages_per_second: default_max_messages_per_second(),
            request_timeout_sec: default_request_timeout_sec(),
            lock_ttl_sec: default_lock_ttl_sec(),
        }
    }
}

fn bool_true() -> bool {
    true
}
fn default_port() -> u16 {
    DEFAULT_PORT
}
fn default_bind() -> String {
    DEFAULT_BIND.to_string()
}
fn default_api_base_url() -> String {
    "https://api.telegram.org".to_string()
}
fn default_redis_url() -> String {
    "redis://127.0.0.1:6379".to_string()
}
fn default_db_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.herald/herald.db", home)
}
fn default_tick_seconds() -> u64 {
    1
}
fn default_batch_size() -> u32 {
    100
}
fn default_max_attempts() -> u32 {
    8
}
fn default_max_messages_per_second() -> u32 {
    25
}
fn default_request_timeout_sec() -> u64 {
    10
}
fn default_lock_ttl_sec() -> u64 {
    60
}

impl HeraldConfig {
    /// Load config from a TOML file with HERALD_* env var overrides.
    ///
    /// Checks in order:
    ///   1. Explicit path argument
    ///   2. ~/.herald/herald.toml
    pub fn load(config_path: Option<&str>) -> crate::error::Result<Self> {
        let path = config_path
            .map(String::from)
            .unwrap_or_else(default_config_path);

        let config: HeraldConfig = Figment::new()
            .merge(Toml::file(&path))
            .merge(Env::prefixed("HERALD_").split("_"))
            .extract()
            .map_err(|e| crate::error::HeraldError::Config(e.to_string()))?;

        Ok(config)
    }
}

fn default_config_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.herald/herald.toml", home)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn broadcast_defaults_match_contract() {
        let cfg = BroadcastConfig::default();
        assert!(cfg.enabled);
        assert_eq!(cfg.tick_seconds, 1);
        assert_eq!(cfg.batch_size, 100);
        assert_eq!(cfg.max_attempts, 8);
        assert_eq!(cfg.max_messages_per_second, 25);
        assert_eq!(cfg.request_timeout_sec, 10);
        assert_eq!(cfg.lock_ttl_sec, 60);
    }

    #[test]
    fn empty_broadcast_section_deserializes_with_defaults() {
        let cfg: BroadcastConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(cfg.batch_size, 100);
        assert!(cfg.enabled);
    }
}
