use std::{fmt::Display, net::SocketAddr, str::FromStr};

use anyhow::Context;

pub const DEFAULT_DATABASE_URL: &str = "sqlite://fireside.db?mode=rwc";
pub const DEFAULT_BIND_ADDR: &str = "0.0.0.0:8080";

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub bind_addr: SocketAddr,
    pub db_max_connections: u32,
    /// Wipe the ephemeral registry before serving. Off unless asked for.
    pub flush_ephemeral_on_start: bool,
    pub session_idle: time::Duration,
}

impl Config {
    /// Reads the process environment, with `.env` loaded first.
    pub fn from_env() -> anyhow::Result<Config> {
        Self::from_lookup(|key| dotenv::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Config> {
        let session_idle_minutes: i64 = parse(&lookup, "SESSION_IDLE_MINUTES", 60)?;
        Ok(Config {
            database_url: lookup("DATABASE_URL").unwrap_or_else(|| DEFAULT_DATABASE_URL.to_owned()),
            bind_addr: parse(&lookup, "BIND_ADDR", SocketAddr::from(([0, 0, 0, 0], 8080)))?,
            db_max_connections: parse(&lookup, "DB_MAX_CONNECTIONS", 16)?,
            flush_ephemeral_on_start: parse(&lookup, "FLUSH_EPHEMERAL_ON_START", false)?,
            session_idle: time::Duration::minutes(session_idle_minutes),
        })
    }
}

fn parse<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> anyhow::Result<T>
where
    T: FromStr,
    T::Err: Display,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|e| anyhow::anyhow!("{e}"))
            .with_context(|| format!("invalid {key}={raw:?}")),
        None => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn config(vars: &[(&str, &str)]) -> anyhow::Result<Config> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn defaults() {
        let config = config(&[]).unwrap();
        assert_eq!(config.database_url, DEFAULT_DATABASE_URL);
        assert_eq!(config.bind_addr.to_string(), DEFAULT_BIND_ADDR);
        assert_eq!(config.db_max_connections, 16);
        assert!(!config.flush_ephemeral_on_start);
        assert_eq!(config.session_idle, time::Duration::minutes(60));
    }

    #[test]
    fn overrides() {
        let config = config(&[
            ("DATABASE_URL", "sqlite::memory:"),
            ("BIND_ADDR", "127.0.0.1:9000"),
            ("DB_MAX_CONNECTIONS", "4"),
            ("FLUSH_EPHEMERAL_ON_START", "true"),
            ("SESSION_IDLE_MINUTES", "5"),
        ])
        .unwrap();
        assert_eq!(config.database_url, "sqlite::memory:");
        assert_eq!(config.bind_addr.port(), 9000);
        assert_eq!(config.db_max_connections, 4);
        assert!(config.flush_ephemeral_on_start);
        assert_eq!(config.session_idle, time::Duration::minutes(5));
    }

    #[test]
    fn bad_values_are_rejected() {
        let err = config(&[("DB_MAX_CONNECTIONS", "lots")]).unwrap_err();
        assert!(err.to_string().contains("DB_MAX_CONNECTIONS"));
        assert!(config(&[("FLUSH_EPHEMERAL_ON_START", "maybe")]).is_err());
    }
}
