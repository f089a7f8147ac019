// Конфигурация приложения
// В продакшене логирование выключено, RUST_LOG включает его принудительно

use crate::error::{Error, Result};
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[cfg(debug_assertions)]
pub const DEFAULT_LOG_FILTER: &str = "echomeet=debug,echomeet_lib=debug,webrtc=warn";

#[cfg(not(debug_assertions))]
pub const DEFAULT_LOG_FILTER: &str = "echomeet=warn,echomeet_lib=warn,webrtc=error";

#[cfg(debug_assertions)]
pub mod dev {
    // Для полного отключения логирования в режиме разработки
    // измените эту константу на false
    pub const ENABLE_LOGGING: bool = true;
}

#[cfg(not(debug_assertions))]
pub mod dev {
    pub const ENABLE_LOGGING: bool = false;
}

pub const DEFAULT_SIGNALING_URL: &str = "ws://localhost:5000";

/// Сколько ждём завершения обмена offer/answer, прежде чем бросить сессию
pub const NEGOTIATION_TIMEOUT: Duration = Duration::from_secs(30);

/// Время на восстановление соединения после disconnected/failed
pub const GRACE_PERIOD: Duration = Duration::from_secs(10);

/// ICE сервер в том виде, в каком он приходит из окружения
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    pub id: String,
    pub r#type: String, // 'stun' или 'turn'
    pub url: String,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub credential: Option<String>,
}

static DEFAULT_ICE_SERVERS: Lazy<Vec<ServerConfig>> = Lazy::new(|| {
    vec![
        ServerConfig {
            id: "default-stun".into(),
            r#type: "stun".into(),
            url: "stun:stun.l.google.com:19302".into(),
            username: None,
            credential: None,
        },
        ServerConfig {
            id: "default-stun-1".into(),
            r#type: "stun".into(),
            url: "stun:stun1.l.google.com:19302".into(),
            username: None,
            credential: None,
        },
    ]
});

pub fn default_ice_servers() -> Vec<ServerConfig> {
    DEFAULT_ICE_SERVERS.clone()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timeouts {
    pub negotiation: Duration,
    pub grace_period: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            negotiation: NEGOTIATION_TIMEOUT,
            grace_period: GRACE_PERIOD,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub signaling_url: String,
    pub ice_servers: Vec<ServerConfig>,
    pub timeouts: Timeouts,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            signaling_url: DEFAULT_SIGNALING_URL.to_string(),
            ice_servers: default_ice_servers(),
            timeouts: Timeouts::default(),
        }
    }
}

impl Config {
    /// Читает переменные `ECHOMEET_*` из окружения процесса
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(url) = lookup("ECHOMEET_SIGNALING_URL") {
            config.signaling_url = url;
        }
        if let Some(raw) = lookup("ECHOMEET_ICE_SERVERS") {
            config.ice_servers = serde_json::from_str(&raw)
                .map_err(|e| Error::config(format!("ECHOMEET_ICE_SERVERS: {e}")))?;
        }
        if let Some(secs) = lookup("ECHOMEET_NEGOTIATION_TIMEOUT_SECS") {
            config.timeouts.negotiation = parse_secs("ECHOMEET_NEGOTIATION_TIMEOUT_SECS", &secs)?;
        }
        if let Some(secs) = lookup("ECHOMEET_GRACE_PERIOD_SECS") {
            config.timeouts.grace_period = parse_secs("ECHOMEET_GRACE_PERIOD_SECS", &secs)?;
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.signaling_url.trim().is_empty() {
            return Err(Error::config("signaling URL cannot be empty"));
        }
        validate_ice_servers(&self.ice_servers)
    }
}

/// Каждому серверу нужен URL, TURN серверам ещё и учётные данные
pub fn validate_ice_servers(servers: &[ServerConfig]) -> Result<()> {
    for server in servers {
        if server.url.is_empty() {
            return Err(Error::config(format!(
                "ICE server '{}' has an empty URL",
                server.id
            )));
        }

        if server.r#type == "turn" && (server.username.is_none() || server.credential.is_none()) {
            return Err(Error::config(format!(
                "TURN server '{}' requires username and credential",
                server.id
            )));
        }
    }
    Ok(())
}

fn parse_secs(key: &str, raw: &str) -> Result<Duration> {
    let secs: u64 = raw
        .trim()
        .parse()
        .map_err(|_| Error::config(format!("{key}: expected whole seconds, got '{raw}'")))?;
    if secs == 0 {
        return Err(Error::config(format!("{key} must be greater than zero")));
    }
    Ok(Duration::from_secs(secs))
}
