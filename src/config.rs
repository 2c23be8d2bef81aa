use std::time::Duration;

use crate::error::ConfigError;

const DEFAULT_STORE_URL: &str = "sqlite://erp-companion.db";
const DEFAULT_ATTENDANCE_TTL_MINUTES: i64 = 30;
const DEFAULT_CAPTCHA_TIMEOUT_SECS: u64 = 10;
const DEFAULT_TARGET: f64 = 75.0;

#[derive(Debug, Clone)]
pub struct Config {
    pub api_url: Option<String>,
    pub store_url: String,
    pub attendance_ttl: chrono::Duration,
    pub captcha_timeout: Duration,
    pub default_target: f64,
}

impl Config {
    /// Loads `.env` if present, then reads the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let api_url = lookup("ERP_API_URL")
            .map(|url| url.trim().trim_end_matches('/').to_string())
            .filter(|url| !url.is_empty());

        let store_url = lookup("ERP_STORE_URL").unwrap_or_else(|| DEFAULT_STORE_URL.to_string());

        let ttl_minutes: i64 = parse_or(
            &lookup,
            "ERP_ATTENDANCE_TTL_MINUTES",
            DEFAULT_ATTENDANCE_TTL_MINUTES,
        )?;
        if ttl_minutes < 0 {
            return Err(ConfigError::Invalid {
                name: "ERP_ATTENDANCE_TTL_MINUTES",
                value: ttl_minutes.to_string(),
            });
        }

        let captcha_secs: u64 =
            parse_or(&lookup, "ERP_CAPTCHA_TIMEOUT_SECS", DEFAULT_CAPTCHA_TIMEOUT_SECS)?;

        let default_target: f64 = parse_or(&lookup, "ERP_DEFAULT_TARGET", DEFAULT_TARGET)?;
        if crate::attendance::validate_target(default_target).is_err() {
            return Err(ConfigError::Invalid {
                name: "ERP_DEFAULT_TARGET",
                value: default_target.to_string(),
            });
        }

        Ok(Config {
            api_url,
            store_url,
            attendance_ttl: chrono::Duration::minutes(ttl_minutes),
            captcha_timeout: Duration::from_secs(captcha_secs),
            default_target,
        })
    }

    pub fn require_api_url(&self) -> Result<&str, ConfigError> {
        self.api_url
            .as_deref()
            .ok_or(ConfigError::Missing("ERP_API_URL"))
    }
}

fn parse_or<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    name: &'static str,
    default: T,
) -> Result<T, ConfigError> {
    match lookup(name) {
        Some(raw) => raw.trim().parse().map_err(|_| ConfigError::Invalid { name, value: raw }),
        None => Ok(default),
    }
}
