use std::{env, fmt::Display, path::PathBuf, str::FromStr, time::Duration};

use log::info;
use uuid::Uuid;

use crate::{auth::MAX_SESSION_TTL, error::ConfigError};

/// Namespace used to derive user ids from OAuth emails when
/// `IDENTITY_NAMESPACE` is not set.
pub const DEFAULT_IDENTITY_NAMESPACE: Uuid = Uuid::from_u128(0x6ba7b811_9dad_11d1_80b4_00c04fd430c8);

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub host: String,
    pub port: u16,
    pub data_dir: PathBuf,
    pub pool_size: u32,
    pub identity_namespace: Uuid,
    pub admin_emails: Vec<String>,
    /// When set, allow-listed emails only count alongside a matching
    /// `X-Proxy-Secret` header.
    pub admin_proxy_secret: Option<String>,
    pub admin_session_ttl: Duration,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let database_url = lookup("DATABASE_URL")
            .filter(|url| !url.trim().is_empty())
            .ok_or(ConfigError::Missing("DATABASE_URL"))?;

        let admin_emails: Vec<String> = lookup("ADMIN_EMAILS")
            .map(|raw| {
                raw.split(',')
                    .map(|email| email.trim().to_lowercase())
                    .filter(|email| !email.is_empty())
                    .collect()
            })
            .unwrap_or_default();

        let pool_size: u32 = parse_or(&lookup, "DB_POOL_SIZE", 10)?;
        if pool_size == 0 {
            return Err(ConfigError::Invalid {
                key: "DB_POOL_SIZE",
                reason: "must be greater than 0".to_string(),
            });
        }

        let admin_session_ttl = Duration::from_secs(parse_or(&lookup, "ADMIN_SESSION_TTL_SECS", 3600)?);
        if admin_session_ttl > MAX_SESSION_TTL {
            return Err(ConfigError::Invalid {
                key: "ADMIN_SESSION_TTL_SECS",
                reason: format!("must be at most {} seconds", MAX_SESSION_TTL.as_secs()),
            });
        }

        Ok(Self {
            database_url,
            host: lookup("HOST").unwrap_or_else(|| "127.0.0.1".to_string()),
            port: parse_or(&lookup, "PORT", 8080)?,
            data_dir: lookup("DATA_DIR").map(PathBuf::from).unwrap_or_else(|| PathBuf::from("data")),
            pool_size,
            identity_namespace: parse_or(&lookup, "IDENTITY_NAMESPACE", DEFAULT_IDENTITY_NAMESPACE)?,
            admin_emails,
            admin_proxy_secret: lookup("ADMIN_PROXY_SECRET").filter(|secret| !secret.trim().is_empty()),
            admin_session_ttl,
        })
    }

    /// True when the request carried the configured proxy secret, or none is configured.
    pub fn proxy_secret_matches(&self, presented: Option<&str>) -> bool {
        match &self.admin_proxy_secret {
            Some(secret) => presented == Some(secret.as_str()),
            None => true,
        }
    }

    pub fn is_admin_email(&self, email: &str) -> bool {
        let email = email.trim().to_lowercase();
        self.admin_emails.iter().any(|admin| *admin == email)
    }
}

fn parse_or<F, T>(lookup: &F, key: &'static str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr + Display,
    T::Err: Display,
{
    match lookup(key) {
        Some(raw) => raw.trim().parse().map_err(|e: T::Err| ConfigError::Invalid {
            key,
            reason: e.to_string(),
        }),
        None => {
            info!("{key} not set, using default: {default}");
            Ok(default)
        }
    }
}
