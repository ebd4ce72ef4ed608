//! Server configuration loaded from the environment.

use anyhow::Context;

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub database_url: String,
    /// Connect to Postgres over rustls (default true)
    pub database_tls: bool,
    pub db_pool_size: usize,
    pub port: u16,
}

impl AppConfig {
    /// Required: `DATABASE_URL`. Optional: `DATABASE_TLS` (default `true`),
    /// `DB_POOL_SIZE` (default 10), `PORT` (default 3000).
    pub fn from_env() -> anyhow::Result<Self> {
        let database_url =
            std::env::var("DATABASE_URL").context("DATABASE_URL environment variable must be set")?;

        let database_tls = std::env::var("DATABASE_TLS")
            .map(|v| parse_flag(&v))
            .unwrap_or(true);

        let db_pool_size = match std::env::var("DB_POOL_SIZE") {
            Ok(v) => v.parse().context("DB_POOL_SIZE must be a positive integer")?,
            Err(_) => 10,
        };

        let port = match std::env::var("PORT") {
            Ok(v) => v.parse().context("PORT must be a valid port number")?,
            Err(_) => 3000,
        };

        Ok(Self {
            database_url,
            database_tls,
            db_pool_size,
            port,
        })
    }
}

fn parse_flag(value: &str) -> bool {
    !matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "0" | "false" | "no" | "off" | "disable"
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_flag() {
        assert!(parse_flag("true"));
        assert!(parse_flag("1"));
        assert!(parse_flag("require"));
        assert!(!parse_flag("false"));
        assert!(!parse_flag(" OFF "));
        assert!(!parse_flag("disable"));
    }
}
