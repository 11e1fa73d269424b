//! Environment-driven configuration for the server binary.
//!
//! Values are read from the process environment, with a `.env` file loaded
//! first when present. Every setting has a default so a bare `trellis`
//! starts against a local SQLite file.

use std::net::SocketAddr;

/// Resolved runtime settings.
#[derive(Clone, Debug)]
pub struct Settings {
    /// Graph store URL, e.g. `sqlite://trellis.db`.
    pub store_url: String,
    /// Store connection pool size.
    pub pool_size: u32,
    /// HTTP bind host.
    pub host: String,
    /// HTTP bind port.
    pub port: u16,
    /// Tracing filter: `off`, `info`, `debug`, or any EnvFilter expression.
    pub log_filter: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            store_url: "sqlite://trellis.db".to_string(),
            pool_size: 5,
            host: "127.0.0.1".to_string(),
            port: 4000,
            log_filter: "info".to_string(),
        }
    }
}

impl Settings {
    /// Loads settings from the environment (after `dotenvy::dotenv`).
    ///
    /// | variable | default |
    /// |---|---|
    /// | `TRELLIS_STORE_URL` | `sqlite://trellis.db` |
    /// | `TRELLIS_POOL_SIZE` | `5` |
    /// | `TRELLIS_HOST` | `127.0.0.1` |
    /// | `TRELLIS_PORT` (falls back to `PORT`) | `4000` |
    /// | `TRELLIS_LOG` | `info` |
    #[must_use]
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();
        let defaults = Self::default();
        Self {
            store_url: var("TRELLIS_STORE_URL").unwrap_or(defaults.store_url),
            pool_size: var("TRELLIS_POOL_SIZE")
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.pool_size),
            host: var("TRELLIS_HOST").unwrap_or(defaults.host),
            port: var("TRELLIS_PORT")
                .or_else(|| var("PORT"))
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.port),
            log_filter: var("TRELLIS_LOG").unwrap_or(defaults.log_filter),
        }
    }

    /// The socket address to bind, or an error string when the host does
    /// not parse.
    pub fn bind_addr(&self) -> Result<SocketAddr, std::net::AddrParseError> {
        format!("{}:{}", self.host, self.port).parse()
    }
}

fn var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let settings = Settings::default();
        assert_eq!(settings.store_url, "sqlite://trellis.db");
        assert_eq!(settings.port, 4000);
        assert!(settings.bind_addr().is_ok());
    }

    #[test]
    fn bad_host_fails_to_parse() {
        let settings = Settings {
            host: "not a host".to_string(),
            ..Settings::default()
        };
        assert!(settings.bind_addr().is_err());
    }
}
