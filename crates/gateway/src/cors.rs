// CORS middleware configuration for the gateway's HTTP surface.
//
// The WebSocket upgrade enforces its own Origin policy; this layer only
// governs the plain HTTP endpoints (health, stats, metrics). Reads the
// allow-list from the same value as the upgrade policy so the two stay
// in step, with permissive localhost defaults for development.

use axum::http::{HeaderName, HeaderValue, Method};
use tower_http::cors::{AllowOrigin, CorsLayer};

use crate::config::GatewayConfig;

/// Origins allowed when no allow-list is configured.
const DEFAULT_DEV_ORIGINS: &[&str] = &[
    "http://localhost:3000",
    "http://localhost:5173",
    "http://127.0.0.1:3000",
    "http://127.0.0.1:5173",
];

/// Build a [`CorsLayer`] from the gateway configuration.
///
/// - If the allow-list is `"*"`, allows any origin (credentials off).
/// - If it is a comma-separated list, allows exactly those origins.
/// - If unset, allows the default development origins.
pub fn cors_layer(config: &GatewayConfig) -> CorsLayer {
    cors_layer_from_value(config.allowed_origins.as_deref())
}

fn cors_layer_from_value(origins: Option<&str>) -> CorsLayer {
    let base = CorsLayer::new()
        .allow_methods([Method::GET, Method::OPTIONS])
        .allow_headers([
            axum::http::header::CONTENT_TYPE,
            HeaderName::from_static("x-request-id"),
        ])
        .expose_headers([HeaderName::from_static("x-request-id")])
        .allow_credentials(true)
        .max_age(std::time::Duration::from_secs(3600));

    match origins {
        Some("*") => base.allow_origin(AllowOrigin::any()).allow_credentials(false),
        Some(list) => base.allow_origin(parse_origins(list)),
        None => base.allow_origin(parse_origins(&DEFAULT_DEV_ORIGINS.join(","))),
    }
}

fn parse_origins(comma_separated: &str) -> Vec<HeaderValue> {
    comma_separated
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .filter_map(|s| HeaderValue::from_str(s).ok())
        .collect()
}
