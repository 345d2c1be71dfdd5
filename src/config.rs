//! Application configuration loaded from environment variables.

use std::env;
use std::path::PathBuf;
use std::time::Duration;

use secrecy::SecretString;

/// Development default values - NEVER use in production.
pub mod defaults {
    pub const DEV_DATABASE_URL: &str = "sqlite://data/receipts.db?mode=rwc";
    pub const DEV_HOST: &str = "127.0.0.1";
    pub const DEV_PORT: u16 = 3000;
    pub const DEV_UPLOAD_DIR: &str = "uploads";
    pub const DEV_MAX_UPLOAD_SIZE: usize = 10_485_760; // 10MB per receipt

    pub const GEMINI_MODEL: &str = "gemini-2.5-flash";
    pub const GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";
    pub const EXTRACTION_TIMEOUT_SECS: u64 = 60;

    pub const QUEUE_INTERVAL_SECS: u64 = 30;
    pub const QUEUE_BATCH_SIZE: u64 = 5;
    pub const MAX_RETRIES: i32 = 5;
    pub const RETRY_BASE_DELAY_SECS: u64 = 10;
    pub const RETRY_MAX_DELAY_SECS: u64 = 600;
    pub const STALE_PROCESSING_SECS: u64 = 600;
}

/// Runtime environment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Environment {
    Development,
    Production,
}

impl Environment {
    /// Parse environment from string.
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "development" | "dev" => Some(Self::Development),
            "production" | "prod" => Some(Self::Production),
            _ => None,
        }
    }

    /// Check if this is a development environment.
    pub fn is_development(&self) -> bool {
        matches!(self, Self::Development)
    }

    /// Check if this is a production environment.
    pub fn is_production(&self) -> bool {
        matches!(self, Self::Production)
    }
}

impl std::fmt::Display for Environment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Development => write!(f, "development"),
            Self::Production => write!(f, "production"),
        }
    }
}

/// Settings for the external extraction service.
#[derive(Debug, Clone)]
pub struct ExtractionSettings {
    /// API credential. Extraction attempts fail with a configuration error when absent.
    pub api_key: Option<SecretString>,
    /// Model name used for `generateContent`.
    pub model: String,
    /// API base URL (overridable for proxies and tests).
    pub base_url: String,
    /// Upper bound for a single extraction call.
    pub timeout: Duration,
}

/// Settings for the retry queue worker.
#[derive(Debug, Clone)]
pub struct QueueSettings {
    /// Time between worker ticks.
    pub interval: Duration,
    /// Records picked up per tick.
    pub batch_size: u64,
    /// Rate-limit failures tolerated before a record is failed for good.
    pub max_retries: i32,
    /// Base delay of the per-record exponential backoff. Zero keeps the fixed tick cadence.
    pub retry_base_delay: Duration,
    /// Upper bound for the backoff delay.
    pub retry_max_delay: Duration,
    /// Age after which a `processing` record is considered abandoned.
    pub stale_processing_after: Duration,
}

impl Default for QueueSettings {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(defaults::QUEUE_INTERVAL_SECS),
            batch_size: defaults::QUEUE_BATCH_SIZE,
            max_retries: defaults::MAX_RETRIES,
            retry_base_delay: Duration::from_secs(defaults::RETRY_BASE_DELAY_SECS),
            retry_max_delay: Duration::from_secs(defaults::RETRY_MAX_DELAY_SECS),
            stale_processing_after: Duration::from_secs(defaults::STALE_PROCESSING_SECS),
        }
    }
}

/// Application configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Runtime environment
    pub environment: Environment,
    /// Server host address
    pub host: String,
    /// Server port
    pub port: u16,
    /// Database URL (PostgreSQL or SQLite connection string)
    pub database_url: String,
    /// Directory uploaded receipts are written to (and archived under)
    pub upload_dir: PathBuf,
    /// Directory for static frontend assets
    pub static_dir: Option<PathBuf>,
    /// Maximum upload size in bytes (default: 10MB)
    pub max_upload_size: usize,
    /// External extraction service
    pub extraction: ExtractionSettings,
    /// Retry queue worker
    pub queue: QueueSettings,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// In development mode (RUST_ENV=development):
    /// - All variables have sensible defaults
    /// - Only RUST_ENV is required
    ///
    /// In production mode (RUST_ENV=production):
    /// - DATABASE_URL must not be the development default
    /// - GEMINI_API_KEY is required
    ///
    /// Environment variables:
    /// - `RUST_ENV`: Environment (development/production) - REQUIRED
    /// - `RP_HOST`: Server host (default: 127.0.0.1)
    /// - `RP_PORT`: Server port (default: 3000)
    /// - `DATABASE_URL`: Database connection string
    /// - `RP_UPLOAD_DIR`: Upload directory (default: uploads)
    /// - `RP_STATIC_DIR`: Static assets directory
    /// - `RP_MAX_UPLOAD_SIZE`: Max upload size in bytes (default: 10MB)
    /// - `GEMINI_API_KEY`: Extraction service credential
    /// - `GEMINI_MODEL`: Extraction model (default: gemini-2.5-flash)
    /// - `GEMINI_BASE_URL`: Extraction API base URL
    /// - `RP_EXTRACTION_TIMEOUT_SECS`: Extraction call timeout (default: 60)
    /// - `RP_QUEUE_INTERVAL_SECS`: Worker tick interval (default: 30)
    /// - `RP_QUEUE_BATCH_SIZE`: Records per tick (default: 5)
    /// - `RP_MAX_RETRIES`: Rate-limit retry ceiling (default: 5)
    /// - `RP_RETRY_BASE_DELAY_SECS`: Backoff base delay (default: 10)
    /// - `RP_RETRY_MAX_DELAY_SECS`: Backoff cap (default: 600)
    /// - `RP_STALE_PROCESSING_SECS`: Abandoned processing threshold (default: 600)
    pub fn from_env() -> Result<Self, ConfigError> {
        // Parse environment - required
        let env_str = env::var("RUST_ENV").map_err(|_| ConfigError::MissingEnvVar("RUST_ENV"))?;

        let environment = Environment::parse(&env_str).ok_or(ConfigError::InvalidValue(
            "RUST_ENV must be 'development' or 'production'",
        ))?;

        let host = env::var("RP_HOST").unwrap_or_else(|_| defaults::DEV_HOST.to_string());

        let port = parse_var("RP_PORT", defaults::DEV_PORT, "RP_PORT must be a valid port number")?;

        let database_url =
            env::var("DATABASE_URL").unwrap_or_else(|_| defaults::DEV_DATABASE_URL.to_string());

        let upload_dir = PathBuf::from(
            env::var("RP_UPLOAD_DIR").unwrap_or_else(|_| defaults::DEV_UPLOAD_DIR.to_string()),
        );

        let static_dir = env::var("RP_STATIC_DIR").ok().map(PathBuf::from);

        let max_upload_size = parse_var(
            "RP_MAX_UPLOAD_SIZE",
            defaults::DEV_MAX_UPLOAD_SIZE,
            "RP_MAX_UPLOAD_SIZE must be a valid number",
        )?;

        let extraction = ExtractionSettings {
            api_key: env::var("GEMINI_API_KEY")
                .ok()
                .filter(|k| !k.trim().is_empty())
                .map(SecretString::from),
            model: env::var("GEMINI_MODEL").unwrap_or_else(|_| defaults::GEMINI_MODEL.to_string()),
            base_url: env::var("GEMINI_BASE_URL")
                .unwrap_or_else(|_| defaults::GEMINI_BASE_URL.to_string()),
            timeout: Duration::from_secs(parse_var(
                "RP_EXTRACTION_TIMEOUT_SECS",
                defaults::EXTRACTION_TIMEOUT_SECS,
                "RP_EXTRACTION_TIMEOUT_SECS must be a valid number",
            )?),
        };

        let queue = QueueSettings {
            interval: Duration::from_secs(parse_var(
                "RP_QUEUE_INTERVAL_SECS",
                defaults::QUEUE_INTERVAL_SECS,
                "RP_QUEUE_INTERVAL_SECS must be a valid number",
            )?),
            batch_size: parse_var(
                "RP_QUEUE_BATCH_SIZE",
                defaults::QUEUE_BATCH_SIZE,
                "RP_QUEUE_BATCH_SIZE must be a valid number",
            )?,
            max_retries: parse_var(
                "RP_MAX_RETRIES",
                defaults::MAX_RETRIES,
                "RP_MAX_RETRIES must be a valid number",
            )?,
            retry_base_delay: Duration::from_secs(parse_var(
                "RP_RETRY_BASE_DELAY_SECS",
                defaults::RETRY_BASE_DELAY_SECS,
                "RP_RETRY_BASE_DELAY_SECS must be a valid number",
            )?),
            retry_max_delay: Duration::from_secs(parse_var(
                "RP_RETRY_MAX_DELAY_SECS",
                defaults::RETRY_MAX_DELAY_SECS,
                "RP_RETRY_MAX_DELAY_SECS must be a valid number",
            )?),
            stale_processing_after: Duration::from_secs(parse_var(
                "RP_STALE_PROCESSING_SECS",
                defaults::STALE_PROCESSING_SECS,
                "RP_STALE_PROCESSING_SECS must be a valid number",
            )?),
        };

        let config = Config {
            environment,
            host,
            port,
            database_url,
            upload_dir,
            static_dir,
            max_upload_size,
            extraction,
            queue,
        };

        config.validate()?;

        // Validate production configuration
        if environment.is_production() {
            config.validate_production()?;
        }

        Ok(config)
    }

    /// Reject values that would make the pipeline misbehave in any environment.
    fn validate(&self) -> Result<(), ConfigError> {
        if self.queue.interval.is_zero() {
            return Err(ConfigError::InvalidValue(
                "RP_QUEUE_INTERVAL_SECS must be greater than zero",
            ));
        }
        if self.queue.batch_size == 0 {
            return Err(ConfigError::InvalidValue(
                "RP_QUEUE_BATCH_SIZE must be greater than zero",
            ));
        }
        if self.queue.max_retries < 1 {
            return Err(ConfigError::InvalidValue("RP_MAX_RETRIES must be at least 1"));
        }
        if self.extraction.timeout.is_zero() {
            return Err(ConfigError::InvalidValue(
                "RP_EXTRACTION_TIMEOUT_SECS must be greater than zero",
            ));
        }
        Ok(())
    }

    /// Validate that production configuration does not use development defaults.
    fn validate_production(&self) -> Result<(), ConfigError> {
        let mut errors = Vec::new();

        if self.database_url == defaults::DEV_DATABASE_URL {
            errors.push(format!(
                "DATABASE_URL is using development default '{}'. Set a production database URL.",
                defaults::DEV_DATABASE_URL
            ));
        }

        if self.extraction.api_key.is_none() {
            errors.push(
                "GEMINI_API_KEY is not set. Receipt extraction cannot run without it.".to_string(),
            );
        }

        if !errors.is_empty() {
            return Err(ConfigError::ProductionValidation(errors));
        }

        Ok(())
    }

    /// Get the server bind address.
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Check if running in development mode.
    pub fn is_development(&self) -> bool {
        self.environment.is_development()
    }
}

fn parse_var<T: std::str::FromStr>(
    name: &str,
    default: T,
    message: &'static str,
) -> Result<T, ConfigError> {
    match env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .map_err(|_| ConfigError::InvalidValue(message)),
        Err(_) => Ok(default),
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(&'static str),

    #[error("Invalid configuration value: {0}")]
    InvalidValue(&'static str),

    #[error("Production configuration validation failed:\n{}", .0.iter().map(|e| format!("  - {}", e)).collect::<Vec<_>>().join("\n"))]
    ProductionValidation(Vec<String>),
}
