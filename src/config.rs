use std::{env, net::SocketAddr, time::Duration};

use thiserror::Error;

pub const DEFAULT_STREAM_PING_SECS: u64 = 30;
pub const DEFAULT_SSE_PING_SECS: u64 = 15;
pub const DEFAULT_SESSION_IDLE_SECS: u64 = 600;
pub const DEFAULT_SESSION_SWEEP_SECS: u64 = 60;

#[derive(Debug, Clone)]
pub struct Config {
    pub bind_addr: String,
    pub bind_port: u16,
    pub session_fallback: bool,
    pub stream_ping_interval: Duration,
    pub sse_ping_delay: Duration,
    /// Sessions without a connected push channel are dropped after this much inactivity.
    pub session_idle_timeout: Duration,
    pub session_sweep_interval: Duration,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("BIND_PORT must be a valid u16")]
    InvalidPort,
    #[error("MCP_SESSION_FALLBACK must be one of: true, false, 1, 0, yes, no")]
    InvalidFallbackFlag,
    #[error("{0} must be a positive number of seconds")]
    InvalidInterval(&'static str),
    #[error("invalid bind address or port")]
    InvalidSocket,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        let bind_addr = env::var("BIND_ADDR").unwrap_or_else(|_| "127.0.0.1".to_string());
        let bind_port = env::var("BIND_PORT")
            .ok()
            .map(|value| value.parse::<u16>().map_err(|_| ConfigError::InvalidPort))
            .transpose()?
            .unwrap_or(8080);
        let session_fallback = env::var("MCP_SESSION_FALLBACK")
            .ok()
            .map(|value| value.trim().to_ascii_lowercase())
            .filter(|value| !value.is_empty())
            .map(|value| match value.as_str() {
                "true" | "1" | "yes" => Ok(true),
                "false" | "0" | "no" => Ok(false),
                _ => Err(ConfigError::InvalidFallbackFlag),
            })
            .transpose()?
            .unwrap_or(false);
        let stream_ping_interval =
            seconds_from_env("MCP_STREAM_PING_SECS", DEFAULT_STREAM_PING_SECS)?;
        let sse_ping_delay = seconds_from_env("MCP_SSE_PING_SECS", DEFAULT_SSE_PING_SECS)?;
        let session_idle_timeout =
            seconds_from_env("MCP_SESSION_IDLE_SECS", DEFAULT_SESSION_IDLE_SECS)?;
        let session_sweep_interval =
            seconds_from_env("MCP_SESSION_SWEEP_SECS", DEFAULT_SESSION_SWEEP_SECS)?;

        let config = Self {
            bind_addr,
            bind_port,
            session_fallback,
            stream_ping_interval,
            sse_ping_delay,
            session_idle_timeout,
            session_sweep_interval,
        };

        let _ = config.bind_socket()?;
        Ok(config)
    }

    pub fn bind_socket(&self) -> Result<SocketAddr, ConfigError> {
        format!("{}:{}", self.bind_addr, self.bind_port)
            .parse::<SocketAddr>()
            .map_err(|_| ConfigError::InvalidSocket)
    }
}

fn seconds_from_env(key: &'static str, default: u64) -> Result<Duration, ConfigError> {
    let seconds = env::var(key)
        .ok()
        .map(|value| {
            value
                .trim()
                .parse::<u64>()
                .ok()
                .filter(|seconds| *seconds > 0)
                .ok_or(ConfigError::InvalidInterval(key))
        })
        .transpose()?
        .unwrap_or(default);
    Ok(Duration::from_secs(seconds))
}

#[cfg(test)]
mod tests {
    use super::*;

    // Environment variables are process-wide, so every case runs inside one test.
    #[test]
    fn parses_environment() {
        env::remove_var("BIND_ADDR");
        env::remove_var("BIND_PORT");
        env::remove_var("MCP_SESSION_FALLBACK");
        env::remove_var("MCP_STREAM_PING_SECS");
        env::remove_var("MCP_SSE_PING_SECS");
        env::remove_var("MCP_SESSION_IDLE_SECS");
        env::remove_var("MCP_SESSION_SWEEP_SECS");

        let config = Config::from_env().expect("config should parse");
        assert_eq!(config.bind_addr, "127.0.0.1");
        assert_eq!(config.bind_port, 8080);
        assert!(!config.session_fallback);
        assert_eq!(config.stream_ping_interval, Duration::from_secs(30));
        assert_eq!(config.sse_ping_delay, Duration::from_secs(15));
        assert_eq!(config.session_idle_timeout, Duration::from_secs(600));
        assert_eq!(config.session_sweep_interval, Duration::from_secs(60));

        env::set_var("MCP_SESSION_FALLBACK", "Yes");
        env::set_var("MCP_STREAM_PING_SECS", "5");
        let config = Config::from_env().expect("config should parse");
        assert!(config.session_fallback);
        assert_eq!(config.stream_ping_interval, Duration::from_secs(5));

        env::set_var("MCP_SESSION_IDLE_SECS", "120");
        let config = Config::from_env().expect("config should parse");
        assert_eq!(config.session_idle_timeout, Duration::from_secs(120));
        env::remove_var("MCP_SESSION_IDLE_SECS");

        env::set_var("MCP_SESSION_FALLBACK", "sometimes");
        let err = Config::from_env().expect_err("expected invalid flag error");
        assert!(matches!(err, ConfigError::InvalidFallbackFlag));
        env::remove_var("MCP_SESSION_FALLBACK");

        env::set_var("MCP_STREAM_PING_SECS", "0");
        let err = Config::from_env().expect_err("expected invalid interval error");
        assert!(matches!(
            err,
            ConfigError::InvalidInterval("MCP_STREAM_PING_SECS")
        ));
        env::remove_var("MCP_STREAM_PING_SECS");

        env::set_var("BIND_PORT", "70000");
        let err = Config::from_env().expect_err("expected invalid port error");
        assert!(matches!(err, ConfigError::InvalidPort));
        env::remove_var("BIND_PORT");

        env::set_var("BIND_ADDR", "not an address");
        let err = Config::from_env().expect_err("expected invalid socket error");
        assert!(matches!(err, ConfigError::InvalidSocket));
        env::remove_var("BIND_ADDR");
    }
}
