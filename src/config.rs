use std::env;
use std::str::FromStr;
use std::time::Duration;

/// Which persistence backend the server runs on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageBackend {
    Postgres,
    /// Process-local storage; everything is lost on restart
    Memory,
}

impl FromStr for StorageBackend {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "postgres" | "postgresql" => Ok(StorageBackend::Postgres),
            "memory" => Ok(StorageBackend::Memory),
            other => Err(ConfigError::InvalidValue(format!(
                "STORAGE_BACKEND must be 'postgres' or 'memory', got '{}'",
                other
            ))),
        }
    }
}

/// Server configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Port to listen on
    pub port: u16,
    /// Bind address (0.0.0.0 for LAN, 127.0.0.1 for localhost)
    pub bind_addr: String,
    pub storage_backend: StorageBackend,
    /// PostgreSQL database URL, required for the postgres backend
    pub database_url: Option<String>,
    /// Session timeout in seconds
    pub session_timeout_seconds: u64,
    /// Seconds a connection may stay unauthenticated; 0 disables the deadline
    pub auth_timeout_seconds: u64,
    /// Seconds between server keepalive pings
    pub ping_interval_seconds: u64,
    /// Maximum number of messages returned by history routes
    pub history_limit: i64,
    /// CORS allowed origins (comma-separated in env var)
    pub cors_origins: Vec<String>,
}

impl ServerConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        let storage_backend: StorageBackend = env::var("STORAGE_BACKEND")
            .unwrap_or_else(|_| "postgres".to_string())
            .parse()?;

        let database_url = env::var("DATABASE_URL").ok();
        if storage_backend == StorageBackend::Postgres && database_url.is_none() {
            return Err(ConfigError::MissingEnvVar("DATABASE_URL".to_string()));
        }

        let ping_interval_seconds = parse_var("PING_INTERVAL_SECONDS", 30)?;
        if ping_interval_seconds == 0 {
            return Err(ConfigError::InvalidValue(
                "PING_INTERVAL_SECONDS must be greater than 0".to_string(),
            ));
        }

        let history_limit = parse_var("HISTORY_LIMIT", 100)?;
        if history_limit <= 0 {
            return Err(ConfigError::InvalidValue(
                "HISTORY_LIMIT must be greater than 0".to_string(),
            ));
        }

        Ok(Self {
            port: env::var("CHAT_RELAY_PORT")
                .unwrap_or_else(|_| "5000".to_string())
                .parse()
                .map_err(|_| ConfigError::InvalidPort)?,
            bind_addr: env::var("CHAT_RELAY_BIND_ADDR")
                .unwrap_or_else(|_| "0.0.0.0".to_string()),
            storage_backend,
            database_url,
            session_timeout_seconds: parse_var("SESSION_TIMEOUT_SECONDS", 604_800)?,
            auth_timeout_seconds: parse_var("AUTH_TIMEOUT_SECONDS", 30)?,
            ping_interval_seconds,
            history_limit,
            cors_origins: env::var("CORS_ORIGINS")
                .map(|s| parse_origins(&s))
                .unwrap_or_else(|_| vec!["http://localhost:5173".to_string()]),
        })
    }

    /// Get the full bind address (addr:port)
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.bind_addr, self.port)
    }

    /// Deadline for a connection to authenticate, if enabled
    pub fn auth_timeout(&self) -> Option<Duration> {
        (self.auth_timeout_seconds > 0).then(|| Duration::from_secs(self.auth_timeout_seconds))
    }

    pub fn ping_interval(&self) -> Duration {
        Duration::from_secs(self.ping_interval_seconds)
    }
}

fn parse_var<T: FromStr>(name: &str, default: T) -> Result<T, ConfigError> {
    match env::var(name) {
        Ok(value) => value
            .trim()
            .parse()
            .map_err(|_| ConfigError::InvalidValue(format!("{} has invalid value '{}'", name, value))),
        Err(_) => Ok(default),
    }
}

fn parse_origins(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid port number")]
    InvalidPort,
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),
    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_storage_backend_parsing() {
        assert_eq!("postgres".parse::<StorageBackend>().unwrap(), StorageBackend::Postgres);
        assert_eq!(" Memory ".parse::<StorageBackend>().unwrap(), StorageBackend::Memory);
        assert!("sqlite".parse::<StorageBackend>().is_err());
    }

    #[test]
    fn test_parse_origins_skips_blanks() {
        assert_eq!(
            parse_origins("http://a.test, http://b.test,,"),
            vec!["http://a.test", "http://b.test"]
        );
    }

    #[test]
    fn test_auth_timeout_zero_disables() {
        let mut config = ServerConfig {
            port: 5000,
            bind_addr: "127.0.0.1".to_string(),
            storage_backend: StorageBackend::Memory,
            database_url: None,
            session_timeout_seconds: 60,
            auth_timeout_seconds: 0,
            ping_interval_seconds: 30,
            history_limit: 100,
            cors_origins: vec![],
        };
        assert_eq!(config.auth_timeout(), None);

        config.auth_timeout_seconds = 5;
        assert_eq!(config.auth_timeout(), Some(Duration::from_secs(5)));
        assert_eq!(config.bind_address(), "127.0.0.1:5000");
    }
}
