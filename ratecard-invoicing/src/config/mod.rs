use serde::Deserialize;
use service_core::config::{self as core_config, get_env, parse_env};
use service_core::error::AppError;
use std::env;

#[derive(Debug, Clone, Deserialize)]
pub struct InvoicingConfig {
    #[serde(flatten)]
    pub common: core_config::Config,
    pub service_name: String,
    pub log_level: String,
    pub otlp_endpoint: Option<String>,
    pub database: DatabaseConfig,
    pub extraction: ExtractionConfig,
    pub smtp: SmtpConfig,
    pub recurrence: RecurrenceConfig,
    pub bootstrap: BootstrapConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// Empty means run against the in-memory store.
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExtractionConfig {
    pub endpoint: String,
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SmtpConfig {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub from_email: String,
    pub from_name: String,
    pub enabled: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RecurrenceConfig {
    /// Seconds between ticks; 0 disables the in-process ticker.
    pub tick_interval_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BootstrapConfig {
    pub tenant_email: String,
    pub business_name: String,
}

impl InvoicingConfig {
    pub fn load() -> Result<Self, AppError> {
        let common_config = core_config::Config::load()?;
        let is_prod = env::var("ENVIRONMENT").unwrap_or_else(|_| "dev".to_string()) == "prod";

        Ok(InvoicingConfig {
            common: common_config,
            service_name: get_env("SERVICE_NAME", Some("ratecard-invoicing"), is_prod)?,
            log_level: get_env("LOG_LEVEL", Some("info"), is_prod)?,
            otlp_endpoint: env::var("OTLP_ENDPOINT").ok().filter(|s| !s.is_empty()),
            database: DatabaseConfig {
                url: get_env("DATABASE_URL", Some(""), is_prod)?,
                max_connections: parse_env("DATABASE_MAX_CONNECTIONS", "10", is_prod)?,
                min_connections: parse_env("DATABASE_MIN_CONNECTIONS", "1", is_prod)?,
            },
            extraction: ExtractionConfig {
                endpoint: get_env(
                    "EXTRACTION_ENDPOINT",
                    Some("http://localhost:8085/extract"),
                    is_prod,
                )?,
                timeout_secs: parse_env("EXTRACTION_TIMEOUT_SECS", "30", is_prod)?,
            },
            smtp: SmtpConfig {
                host: get_env("SMTP_HOST", Some("smtp.gmail.com"), is_prod)?,
                port: parse_env("SMTP_PORT", "587", is_prod)?,
                user: get_env("SMTP_USER", Some(""), is_prod)?,
                password: get_env("SMTP_PASSWORD", Some(""), is_prod)?,
                from_email: get_env("SMTP_FROM_EMAIL", Some("noreply@example.com"), is_prod)?,
                from_name: get_env("SMTP_FROM_NAME", Some("Invoicing"), is_prod)?,
                enabled: env::var("SMTP_ENABLED")
                    .unwrap_or_else(|_| "false".to_string())
                    .parse()
                    .unwrap_or(false),
            },
            recurrence: RecurrenceConfig {
                tick_interval_secs: parse_env("RECURRENCE_TICK_SECS", "3600", is_prod)?,
            },
            bootstrap: BootstrapConfig {
                tenant_email: get_env("TENANT_EMAIL", Some("owner@example.com"), is_prod)?,
                business_name: get_env("BUSINESS_NAME", Some("My Business"), is_prod)?,
            },
        })
    }

    pub fn uses_database(&self) -> bool {
        !self.database.url.trim().is_empty()
    }
}
