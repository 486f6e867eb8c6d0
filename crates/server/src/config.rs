use std::env;

use thiserror::Error;

const DAY_MS: i64 = 24 * 60 * 60 * 1000;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub database_url: String,
    /// Root directory holding one git repository per snippet
    pub git_root: String,
    /// Static files served for every non-API path
    pub web_root: String,
    /// Lifetime of a session token, measured from issuance
    pub session_ttl_ms: i64,
    pub snippets_limit_default: i64,
    pub snippets_limit_max: i64,
    /// JSON credentials consumed by the password authenticator
    pub credentials_file: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 8080,
            database_url: "sqlite:./data/summa.db?mode=rwc".to_string(),
            git_root: "./data/git".to_string(),
            web_root: "./web".to_string(),
            session_ttl_ms: 7 * DAY_MS,
            snippets_limit_default: 20,
            snippets_limit_max: 100,
            credentials_file: None,
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let config = Self {
            port: env::var("PORT")
                .ok()
                .and_then(|p| p.parse().ok())
                .unwrap_or(defaults.port),
            database_url: env::var("DATABASE_URL").unwrap_or(defaults.database_url),
            git_root: env::var("GIT_ROOT").unwrap_or(defaults.git_root),
            web_root: env::var("WEB_ROOT").unwrap_or(defaults.web_root),
            session_ttl_ms: env::var("SESSION_EXPIRE_MS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.session_ttl_ms),
            snippets_limit_default: defaults.snippets_limit_default,
            snippets_limit_max: defaults.snippets_limit_max,
            credentials_file: env::var("CREDENTIALS_FILE")
                .ok()
                .filter(|s| !s.trim().is_empty()),
        };

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.git_root.trim().is_empty() {
            return Err(ConfigError::Invalid("GIT_ROOT cannot be empty".to_string()));
        }
        if self.session_ttl_ms <= 0 {
            return Err(ConfigError::Invalid(
                "SESSION_EXPIRE_MS must be positive".to_string(),
            ));
        }
        if self.snippets_limit_default < 1
            || self.snippets_limit_default > self.snippets_limit_max
        {
            return Err(ConfigError::Invalid(
                "default snippet limit must lie within 1..=max".to_string(),
            ));
        }
        Ok(())
    }
}
