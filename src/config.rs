use std::str::FromStr;

use rand::Rng;

use crate::error::ConfigError;

pub const DEFAULT_DATABASE_URL: &str = "sqlite://murmur.db?mode=rwc";
pub const DEFAULT_BIND_ADDRESS: &str = "0.0.0.0:8080";

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub bind_address: String,
    pub jwt_secret: Vec<u8>,
    /// No `JWT_SECRET` was configured and a random one was generated.
    pub ephemeral_secret: bool,
    pub json_logs: bool,
    pub db_max_connections: u32,
    /// Queue depth at which the dispatcher backlog starts logging warnings.
    pub dispatch_backlog_warn: usize,
}

impl Config {
    /// Read `.env` (if any) and then the process environment.
    pub fn from_env() -> Result<Config, ConfigError> {
        dotenv::dotenv().ok();
        Self::from_lookup(|key| dotenv::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Config, ConfigError> {
        let (jwt_secret, ephemeral_secret) = match lookup("JWT_SECRET") {
            Some(secret) if !secret.is_empty() => (secret.into_bytes(), false),
            _ => {
                let key: [u8; 32] = rand::rng().random();
                (key.to_vec(), true)
            }
        };

        Ok(Config {
            database_url: lookup("DATABASE_URL").unwrap_or_else(|| DEFAULT_DATABASE_URL.to_owned()),
            bind_address: lookup("MURMUR_BIND_ADDRESS").unwrap_or_else(|| DEFAULT_BIND_ADDRESS.to_owned()),
            jwt_secret,
            ephemeral_secret,
            json_logs: flag(&lookup, "MURMUR_JSON_LOGS")?,
            db_max_connections: number(&lookup, "MURMUR_DB_MAX_CONNECTIONS", 16)?,
            dispatch_backlog_warn: number(&lookup, "MURMUR_DISPATCH_BACKLOG_WARN", 1024)?,
        })
    }
}

fn number<T: FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &'static str,
    default: T,
) -> Result<T, ConfigError> {
    match lookup(key) {
        None => Ok(default),
        Some(value) => value
            .trim()
            .parse()
            .map_err(|_| ConfigError::InvalidNumber { key, value }),
    }
}

fn flag(lookup: &impl Fn(&str) -> Option<String>, key: &'static str) -> Result<bool, ConfigError> {
    match lookup(key).as_deref().map(str::trim) {
        None | Some("") | Some("0") | Some("false") => Ok(false),
        Some("1") | Some("true") => Ok(true),
        Some(other) => Err(ConfigError::InvalidFlag { key, value: other.to_owned() }),
    }
}
