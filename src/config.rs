use std::{env, fmt, net::SocketAddr, str::FromStr, time::Duration};

use thiserror::Error;

pub const DEFAULT_BIND_PORT: u16 = 3001;
pub const DEFAULT_MAX_SESSIONS: usize = 1_000;
pub const DEFAULT_SESSION_IDLE_SECS: u64 = 30 * 60;

/// How the router binds protocol handlers to requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionMode {
    /// Every request gets its own throwaway handler.
    #[default]
    Stateless,
    /// Handlers are bound to a server-issued session id and reused.
    Stateful,
}

impl SessionMode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Stateless => "stateless",
            Self::Stateful => "stateful",
        }
    }
}

impl fmt::Display for SessionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SessionMode {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "stateless" => Ok(Self::Stateless),
            "stateful" => Ok(Self::Stateful),
            _ => Err(ConfigError::InvalidSessionMode),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub bind_addr: String,
    pub bind_port: u16,
    pub session_mode: SessionMode,
    pub max_sessions: usize,
    /// `None` disables idle expiry.
    pub session_idle_timeout: Option<Duration>,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("BIND_PORT must be a valid u16")]
    InvalidPort,
    #[error("MCP_SESSION_MODE must be one of: stateless, stateful")]
    InvalidSessionMode,
    #[error("MCP_MAX_SESSIONS must be a positive integer")]
    InvalidMaxSessions,
    #[error("MCP_SESSION_IDLE_SECS must be a non-negative integer")]
    InvalidIdleTimeout,
    #[error("invalid bind address or port")]
    InvalidSocket,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1".to_string(),
            bind_port: DEFAULT_BIND_PORT,
            session_mode: SessionMode::default(),
            max_sessions: DEFAULT_MAX_SESSIONS,
            session_idle_timeout: Some(Duration::from_secs(DEFAULT_SESSION_IDLE_SECS)),
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let read = |key: &str| {
            lookup(key)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };

        let bind_addr = read("BIND_ADDR").unwrap_or_else(|| "127.0.0.1".to_string());
        let bind_port = read("BIND_PORT")
            .map(|value| value.parse::<u16>().map_err(|_| ConfigError::InvalidPort))
            .transpose()?
            .unwrap_or(DEFAULT_BIND_PORT);
        let session_mode = read("MCP_SESSION_MODE")
            .map(|value| value.parse::<SessionMode>())
            .transpose()?
            .unwrap_or_default();
        let max_sessions = read("MCP_MAX_SESSIONS")
            .map(|value| {
                value
                    .parse::<usize>()
                    .ok()
                    .filter(|max| *max > 0)
                    .ok_or(ConfigError::InvalidMaxSessions)
            })
            .transpose()?
            .unwrap_or(DEFAULT_MAX_SESSIONS);
        let idle_secs = read("MCP_SESSION_IDLE_SECS")
            .map(|value| {
                value
                    .parse::<u64>()
                    .map_err(|_| ConfigError::InvalidIdleTimeout)
            })
            .transpose()?
            .unwrap_or(DEFAULT_SESSION_IDLE_SECS);

        let config = Self {
            bind_addr,
            bind_port,
            session_mode,
            max_sessions,
            session_idle_timeout: (idle_secs > 0).then(|| Duration::from_secs(idle_secs)),
        };

        let _ = config.bind_socket()?;
        Ok(config)
    }

    pub fn bind_socket(&self) -> Result<SocketAddr, ConfigError> {
        format!("{}:{}", self.bind_addr, self.bind_port)
            .parse::<SocketAddr>()
            .map_err(|_| ConfigError::InvalidSocket)
    }
}
