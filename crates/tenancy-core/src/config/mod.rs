use std::env;
use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::str::FromStr;

/// Distinguishes runtime behavior for different stages of the service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppEnvironment {
    Development,
    Test,
    Production,
}

impl AppEnvironment {
    fn from_str(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "prod" | "production" => Self::Production,
            "test" | "ci" => Self::Test,
            _ => Self::Development,
        }
    }
}

/// Top-level configuration for the application.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub environment: AppEnvironment,
    pub server: ServerConfig,
    pub telemetry: TelemetryConfig,
    pub tenancy: TenancyConfig,
}

impl AppConfig {
    pub fn load() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        let environment = AppEnvironment::from_str(
            &env::var("APP_ENV").unwrap_or_else(|_| "development".to_string()),
        );

        let host = env::var("APP_HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
        let port = env::var("APP_PORT")
            .unwrap_or_else(|_| "3000".to_string())
            .parse::<u16>()
            .map_err(|_| ConfigError::InvalidPort)?;

        let log_level = env::var("APP_LOG_LEVEL").unwrap_or_else(|_| "info".to_string());

        Ok(Self {
            environment,
            server: ServerConfig { host, port },
            telemetry: TelemetryConfig { log_level },
            tenancy: TenancyConfig::from_env()?,
        })
    }
}

/// Settings controlling the HTTP server binding.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl ServerConfig {
    pub fn socket_addr(&self) -> Result<SocketAddr, ConfigError> {
        if self.host.eq_ignore_ascii_case("localhost") {
            return Ok(SocketAddr::new(IpAddr::from([127, 0, 0, 1]), self.port));
        }

        let ip: IpAddr = self
            .host
            .parse()
            .map_err(|source| ConfigError::InvalidHost { source })?;

        Ok(SocketAddr::new(ip, self.port))
    }
}

/// Tracing controls.
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    pub log_level: String,
}

const MAX_LEASE_DAYS: i64 = 36_500;

/// Retry budgets and lease defaults for the lifecycle workflows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TenancyConfig {
    pub retry_attempts: u32,
    pub retry_base_delay_ms: u64,
    pub release_retry_attempts: u32,
    pub lease_days: i64,
    pub deposit_months: u32,
}

impl Default for TenancyConfig {
    fn default() -> Self {
        Self {
            retry_attempts: 3,
            retry_base_delay_ms: 50,
            release_retry_attempts: 5,
            lease_days: 365,
            deposit_months: 1,
        }
    }
}

impl TenancyConfig {
    fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();
        let config = Self {
            retry_attempts: env_number("TENANCY_RETRY_ATTEMPTS", defaults.retry_attempts)?,
            retry_base_delay_ms: env_number(
                "TENANCY_RETRY_BASE_DELAY_MS",
                defaults.retry_base_delay_ms,
            )?,
            release_retry_attempts: env_number(
                "TENANCY_RELEASE_RETRY_ATTEMPTS",
                defaults.release_retry_attempts,
            )?,
            lease_days: env_number("TENANCY_LEASE_DAYS", defaults.lease_days)?,
            deposit_months: env_number("TENANCY_DEPOSIT_MONTHS", defaults.deposit_months)?,
        };

        if config.retry_attempts == 0 {
            return Err(ConfigError::OutOfRange {
                variable: "TENANCY_RETRY_ATTEMPTS",
                reason: "at least one attempt is required",
            });
        }
        if config.release_retry_attempts == 0 {
            return Err(ConfigError::OutOfRange {
                variable: "TENANCY_RELEASE_RETRY_ATTEMPTS",
                reason: "at least one attempt is required",
            });
        }
        if config.lease_days <= 0 {
            return Err(ConfigError::OutOfRange {
                variable: "TENANCY_LEASE_DAYS",
                reason: "lease length must be positive",
            });
        }
        if config.lease_days > MAX_LEASE_DAYS {
            return Err(ConfigError::OutOfRange {
                variable: "TENANCY_LEASE_DAYS",
                reason: "lease length may not exceed 36500 days",
            });
        }

        Ok(config)
    }
}

fn env_number<T: FromStr>(variable: &'static str, default: T) -> Result<T, ConfigError> {
    match env::var(variable) {
        Ok(raw) => raw.trim().parse::<T>().map_err(|_| ConfigError::InvalidNumber {
            variable,
            value: raw,
        }),
        Err(_) => Ok(default),
    }
}

#[derive(Debug)]
pub enum ConfigError {
    InvalidPort,
    InvalidHost { source: std::net::AddrParseError },
    InvalidNumber { variable: &'static str, value: String },
    OutOfRange { variable: &'static str, reason: &'static str },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::InvalidPort => write!(f, "APP_PORT must be a valid u16"),
            ConfigError::InvalidHost { .. } => {
                write!(f, "APP_HOST must parse to an IPv4 or IPv6 address")
            }
            ConfigError::InvalidNumber { variable, value } => {
                write!(f, "{variable} must be a number (found '{value}')")
            }
            ConfigError::OutOfRange { variable, reason } => write!(f, "{variable}: {reason}"),
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::InvalidHost { source } => Some(source),
            ConfigError::InvalidPort
            | ConfigError::InvalidNumber { .. }
            | ConfigError::OutOfRange { .. } => None,
        }
    }
}
