use thiserror::Error;

use crate::logger::{ColorChoice, LogFormat, LogLevel, LoggerConfig};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

#[derive(Debug, Clone)]
pub struct Config {
    pub logger: LoggerConfig,
    pub server: ServerConfig,
    pub sessions: SessionConfig,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind_address: String,
    pub data_dir: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8080".to_string(),
            data_dir: "./data".to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// How often the background sweep removes expired sessions (seconds)
    pub cleanup_interval_seconds: u64,
    pub cookie_name: String,
    /// Secure attribute on the session cookie; disable only for local dev
    pub cookie_secure: bool,
    /// Absolute session lifespan (days)
    pub lifespan_days: u64,
    /// Remaining time below which validation triggers a refresh (days)
    pub refresh_threshold_days: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            cleanup_interval_seconds: 60,
            cookie_name: "journal_session_token".to_string(),
            cookie_secure: true,
            lifespan_days: 30,
            refresh_threshold_days: 7,
        }
    }
}

impl Config {
    /// Load configuration from environment variables.
    pub fn load() -> Result<Self, ConfigError> {
        let bind_address =
            std::env::var("BIND_ADDRESS").unwrap_or_else(|_| "0.0.0.0:8080".to_string());
        let data_dir = std::env::var("DATA_DIR").unwrap_or_else(|_| "./data".to_string());

        let mut sessions = SessionConfig::default();
        if let Some(days) = env_parse("SESSION_LIFESPAN_DAYS") {
            sessions.lifespan_days = days;
        }
        if let Some(days) = env_parse("SESSION_REFRESH_THRESHOLD_DAYS") {
            sessions.refresh_threshold_days = days;
        }
        if let Some(seconds) = env_parse("SESSION_CLEANUP_INTERVAL_SECONDS") {
            sessions.cleanup_interval_seconds = seconds;
        }
        if let Ok(name) = std::env::var("SESSION_COOKIE_NAME") {
            sessions.cookie_name = name;
        }
        if let Ok(value) = std::env::var("COOKIE_SECURE") {
            sessions.cookie_secure = !matches!(value.to_lowercase().as_str(), "false" | "0");
        }

        let mut logger = LoggerConfig::default();
        if let Some(level) = std::env::var("LOG_LEVEL").ok().and_then(|v| LogLevel::parse(&v)) {
            logger.level = level;
        }
        if let Ok(format) = std::env::var("LOG_FORMAT") {
            match format.to_lowercase().as_str() {
                "json" => logger.format = LogFormat::Json,
                "pretty" => logger.format = LogFormat::Pretty,
                _ => {}
            }
        }
        if let Ok(colors) = std::env::var("LOG_COLORS") {
            match colors.to_lowercase().as_str() {
                "true" | "1" => logger.colors = ColorChoice::Always,
                "false" | "0" => logger.colors = ColorChoice::Never,
                "auto" => logger.colors = ColorChoice::Auto,
                _ => {}
            }
        }
        if let Some(depth) = env_parse("LOG_MAX_CAUSE_DEPTH") {
            logger.max_cause_depth = depth as usize;
        }

        let config = Config {
            logger,
            server: ServerConfig {
                bind_address,
                data_dir,
            },
            sessions,
        };

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.sessions.lifespan_days == 0 {
            return Err(ConfigError::ValidationError(
                "SESSION_LIFESPAN_DAYS must be greater than 0".to_string(),
            ));
        }
        if self.sessions.refresh_threshold_days >= self.sessions.lifespan_days {
            return Err(ConfigError::ValidationError(
                "SESSION_REFRESH_THRESHOLD_DAYS must be less than SESSION_LIFESPAN_DAYS"
                    .to_string(),
            ));
        }
        if self.sessions.cleanup_interval_seconds == 0 {
            return Err(ConfigError::ValidationError(
                "SESSION_CLEANUP_INTERVAL_SECONDS must be greater than 0".to_string(),
            ));
        }
        if self.sessions.cookie_name.is_empty() {
            return Err(ConfigError::ValidationError(
                "SESSION_COOKIE_NAME cannot be empty".to_string(),
            ));
        }
        Ok(())
    }
}

fn env_parse(name: &str) -> Option<u64> {
    std::env::var(name).ok().and_then(|v| v.parse().ok())
}
