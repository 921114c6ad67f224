// Gateway server configuration.
//
// Centralizes environment variable parsing with defaults for local
// development. The origin policy and CORS layer read their values from
// here rather than from process-wide state.

use std::net::SocketAddr;
use std::time::Duration;

/// Core gateway configuration.
///
/// Constructed via [`GatewayConfig::from_env`] which reads environment
/// variables and falls back to sensible development defaults.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Listen address (host:port).
    pub listen_addr: SocketAddr,
    /// Comma-separated Origin allow-list for WebSocket upgrades.
    pub allowed_origins: Option<String>,
    /// Development-only fallback: accept any non-empty Origin when no
    /// allow-list is configured. Never enable in production.
    pub dev_permissive_origin: bool,
    /// Inbound frames allowed per session per 60-second window.
    pub rate_limit_per_minute: u32,
    /// Capacity of each session's outbound frame buffer.
    pub session_buffer: usize,
    /// Seconds without any inbound frame (pongs included) before a
    /// session is reclaimed as half-open.
    pub read_deadline_secs: u64,
    /// Log filter directive (e.g. `info`, `palaver_gateway=debug`).
    pub log_filter: String,
}

impl GatewayConfig {
    /// Parse configuration from environment variables.
    ///
    /// | Variable | Default |
    /// |---|---|
    /// | `PALAVER_GATEWAY_HOST` | `0.0.0.0` |
    /// | `PALAVER_GATEWAY_PORT` | `8080` |
    /// | `PALAVER_GATEWAY_ALLOWED_ORIGINS` | *(none)* |
    /// | `PALAVER_GATEWAY_DEV_PERMISSIVE_ORIGIN` | `false` |
    /// | `PALAVER_GATEWAY_RATE_LIMIT_PER_MINUTE` | `60` |
    /// | `PALAVER_GATEWAY_SESSION_BUFFER` | `64` |
    /// | `PALAVER_GATEWAY_READ_DEADLINE_SECS` | `60` |
    /// | `PALAVER_GATEWAY_LOG_FILTER` | `info` |
    pub fn from_env() -> Self {
        Self::from_env_fn(|key| std::env::var(key))
    }

    /// Testable constructor that accepts an environment lookup function.
    pub(crate) fn from_env_fn<F>(env: F) -> Self
    where
        F: Fn(&str) -> Result<String, std::env::VarError>,
    {
        let host = env("PALAVER_GATEWAY_HOST").unwrap_or_else(|_| "0.0.0.0".into());
        let port: u16 = env("PALAVER_GATEWAY_PORT")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(8080);
        let listen_addr = format!("{host}:{port}")
            .parse()
            .unwrap_or_else(|_| SocketAddr::from(([0, 0, 0, 0], port)));

        let allowed_origins = env("PALAVER_GATEWAY_ALLOWED_ORIGINS").ok();
        let dev_permissive_origin = env("PALAVER_GATEWAY_DEV_PERMISSIVE_ORIGIN")
            .map(|v| matches!(v.to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on"))
            .unwrap_or(false);

        let rate_limit_per_minute = env("PALAVER_GATEWAY_RATE_LIMIT_PER_MINUTE")
            .ok()
            .and_then(|v| v.parse().ok())
            .filter(|v| *v > 0)
            .unwrap_or(60);

        let session_buffer = env("PALAVER_GATEWAY_SESSION_BUFFER")
            .ok()
            .and_then(|v| v.parse().ok())
            .filter(|v| *v > 0)
            .unwrap_or(64);

        let read_deadline_secs = env("PALAVER_GATEWAY_READ_DEADLINE_SECS")
            .ok()
            .and_then(|v| v.parse().ok())
            .filter(|v| *v > 0)
            .unwrap_or(60);

        let log_filter = env("PALAVER_GATEWAY_LOG_FILTER").unwrap_or_else(|_| "info".into());

        Self {
            listen_addr,
            allowed_origins,
            dev_permissive_origin,
            rate_limit_per_minute,
            session_buffer,
            read_deadline_secs,
            log_filter,
        }
    }

    pub fn read_deadline(&self) -> Duration {
        Duration::from_secs(self.read_deadline_secs)
    }

    /// Server ping interval, 9/10 of the read deadline so a live peer
    /// always gets a probe before the deadline can expire. Derived in
    /// milliseconds so the interval stays strictly shorter than the
    /// deadline even at the 1-second minimum.
    pub fn keepalive_interval(&self) -> Duration {
        let deadline_ms = self.read_deadline_secs * 1000;
        Duration::from_millis(deadline_ms * 9 / 10)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env_from_map(
        map: HashMap<&'static str, &'static str>,
    ) -> impl Fn(&str) -> Result<String, std::env::VarError> {
        move |key: &str| {
            map.get(key)
                .map(|v| v.to_string())
                .ok_or(std::env::VarError::NotPresent)
        }
    }

    #[test]
    fn defaults_when_no_env_vars() {
        let cfg = GatewayConfig::from_env_fn(env_from_map(HashMap::new()));
        assert_eq!(cfg.listen_addr.port(), 8080);
        assert_eq!(cfg.listen_addr.ip().to_string(), "0.0.0.0");
        assert!(cfg.allowed_origins.is_none());
        assert!(!cfg.dev_permissive_origin);
        assert_eq!(cfg.rate_limit_per_minute, 60);
        assert_eq!(cfg.session_buffer, 64);
        assert_eq!(cfg.read_deadline_secs, 60);
        assert_eq!(cfg.log_filter, "info");
    }

    #[test]
    fn custom_host_and_port() {
        let mut m = HashMap::new();
        m.insert("PALAVER_GATEWAY_HOST", "127.0.0.1");
        m.insert("PALAVER_GATEWAY_PORT", "3000");
        let cfg = GatewayConfig::from_env_fn(env_from_map(m));
        assert_eq!(cfg.listen_addr.to_string(), "127.0.0.1:3000");
    }

    #[test]
    fn invalid_port_uses_default() {
        let mut m = HashMap::new();
        m.insert("PALAVER_GATEWAY_PORT", "not_a_number");
        let cfg = GatewayConfig::from_env_fn(env_from_map(m));
        assert_eq!(cfg.listen_addr.port(), 8080);
    }

    #[test]
    fn allowed_origins_from_env() {
        let mut m = HashMap::new();
        m.insert("PALAVER_GATEWAY_ALLOWED_ORIGINS", "https://app.palaver.chat");
        let cfg = GatewayConfig::from_env_fn(env_from_map(m));
        assert_eq!(cfg.allowed_origins.as_deref(), Some("https://app.palaver.chat"));
    }

    #[test]
    fn dev_permissive_origin_accepts_truthy_values() {
        for value in ["1", "true", "YES", "on"] {
            let mut m = HashMap::new();
            m.insert("PALAVER_GATEWAY_DEV_PERMISSIVE_ORIGIN", value);
            let cfg = GatewayConfig::from_env_fn(env_from_map(m));
            assert!(cfg.dev_permissive_origin, "{value} should enable the dev fallback");
        }

        let mut m = HashMap::new();
        m.insert("PALAVER_GATEWAY_DEV_PERMISSIVE_ORIGIN", "false");
        let cfg = GatewayConfig::from_env_fn(env_from_map(m));
        assert!(!cfg.dev_permissive_origin);
    }

    #[test]
    fn rate_limit_override_rejects_zero() {
        let mut m = HashMap::new();
        m.insert("PALAVER_GATEWAY_RATE_LIMIT_PER_MINUTE", "0");
        let cfg = GatewayConfig::from_env_fn(env_from_map(m));
        assert_eq!(cfg.rate_limit_per_minute, 60);

        let mut m = HashMap::new();
        m.insert("PALAVER_GATEWAY_RATE_LIMIT_PER_MINUTE", "120");
        let cfg = GatewayConfig::from_env_fn(env_from_map(m));
        assert_eq!(cfg.rate_limit_per_minute, 120);
    }

    #[test]
    fn keepalive_is_shorter_than_read_deadline() {
        let cfg = GatewayConfig::from_env_fn(env_from_map(HashMap::new()));
        assert!(cfg.keepalive_interval() < cfg.read_deadline());
        assert_eq!(cfg.keepalive_interval(), Duration::from_secs(54));
    }

    #[test]
    fn keepalive_stays_strictly_shorter_at_the_minimum_deadline() {
        let mut m = HashMap::new();
        m.insert("PALAVER_GATEWAY_READ_DEADLINE_SECS", "1");
        let cfg = GatewayConfig::from_env_fn(env_from_map(m));
        assert_eq!(cfg.read_deadline(), Duration::from_secs(1));
        assert_eq!(cfg.keepalive_interval(), Duration::from_millis(900));
        assert!(cfg.keepalive_interval() < cfg.read_deadline());
    }

    #[test]
    fn session_buffer_override() {
        let mut m = HashMap::new();
        m.insert("PALAVER_GATEWAY_SESSION_BUFFER", "8");
        let cfg = GatewayConfig::from_env_fn(env_from_map(m));
        assert_eq!(cfg.session_buffer, 8);
    }

    #[test]
    fn log_filter_override() {
        let mut m = HashMap::new();
        m.insert("PALAVER_GATEWAY_LOG_FILTER", "debug,tower_http=trace");
        let cfg = GatewayConfig::from_env_fn(env_from_map(m));
        assert_eq!(cfg.log_filter, "debug,tower_http=trace");
    }
}
