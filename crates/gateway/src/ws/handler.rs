use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::{
    extract::{
        ws::{close_code, CloseFrame, Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    http::{header::ORIGIN, HeaderMap},
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use serde::Deserialize;
use serde_json::json;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use uuid::Uuid;

use palaver_common::event::DomainEvent;
use palaver_common::protocol::ws::MAX_FRAME_BYTES;

use crate::config::GatewayConfig;
use crate::dispatch::EventDispatcher;
use crate::error::{
    request_id_from_headers_or_generate, with_request_id_scope, ErrorCode, GatewayError,
};

use super::hub::HubHandle;
use super::session::{run_session, FixedWindowLimiter, SessionParams};

/// Which Origin headers may upgrade.
///
/// Requests without an Origin header (non-browser clients) are always
/// accepted; the policy gates browsers, which cannot omit the header.
#[derive(Debug, Clone)]
pub enum OriginPolicy {
    /// Production path: the origin must match the configured list.
    AllowList(HashSet<String>),
    /// Development-only fallback: any non-empty origin is accepted.
    Permissive,
}

impl OriginPolicy {
    pub fn from_config(config: &GatewayConfig) -> Self {
        match config.allowed_origins.as_deref() {
            Some(origins) => Self::AllowList(parse_origins(origins)),
            None if config.dev_permissive_origin => Self::Permissive,
            // No origins configured and no dev opt-in: deny all browsers.
            None => Self::AllowList(HashSet::new()),
        }
    }

    pub fn allows(&self, origin: Option<&str>) -> bool {
        let Some(origin) = origin else {
            return true;
        };
        match self {
            Self::AllowList(allowed) => allowed.contains(origin),
            Self::Permissive => !origin.trim().is_empty(),
        }
    }
}

fn parse_origins(comma_separated: &str) -> HashSet<String> {
    comma_separated
        .split(',')
        .map(str::trim)
        .filter(|origin| !origin.is_empty())
        .map(ToOwned::to_owned)
        .collect()
}

#[derive(Clone)]
pub struct GatewayState {
    hub: HubHandle,
    dispatcher: EventDispatcher,
    origin_policy: Arc<OriginPolicy>,
    session_buffer: usize,
    rate_limit_per_minute: u32,
    read_deadline: Duration,
    keepalive_interval: Duration,
}

pub fn router(hub: HubHandle, dispatcher: EventDispatcher, config: &GatewayConfig) -> Router {
    let state = GatewayState {
        hub,
        dispatcher,
        origin_policy: Arc::new(OriginPolicy::from_config(config)),
        session_buffer: config.session_buffer,
        rate_limit_per_minute: config.rate_limit_per_minute,
        read_deadline: config.read_deadline(),
        keepalive_interval: config.keepalive_interval(),
    };

    Router::new()
        .route("/v1/ws", get(ws_upgrade))
        .route("/v1/stats", get(stats))
        .with_state(state)
}

#[derive(Debug, Deserialize)]
struct UpgradeQuery {
    /// Caller identity supplied by the (out-of-scope) auth collaborator.
    #[serde(default)]
    client_id: Option<String>,
}

async fn ws_upgrade(
    State(state): State<GatewayState>,
    Query(query): Query<UpgradeQuery>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    let origin = headers.get(ORIGIN).and_then(|value| value.to_str().ok());
    if !state.origin_policy.allows(origin) {
        debug!(origin = origin.unwrap_or(""), "rejecting upgrade from disallowed origin");
        return GatewayError::from_code(ErrorCode::OriginForbidden).into_response();
    }

    let request_id = request_id_from_headers_or_generate(&headers);
    ws.max_frame_size(MAX_FRAME_BYTES).on_upgrade(move |socket| async move {
        with_request_id_scope(request_id, handle_socket(state, query.client_id, socket)).await;
    })
}

async fn handle_socket(state: GatewayState, client_id: Option<String>, mut socket: WebSocket) {
    let session_id = Uuid::new_v4();
    let (outbound_tx, outbound_rx) = mpsc::channel(state.session_buffer);
    let cancel = CancellationToken::new();

    if !state.hub.register(session_id, outbound_tx.clone(), cancel.clone()).await {
        // Shutdown has begun; refuse the connection cleanly.
        let _ = socket
            .send(Message::Close(Some(CloseFrame {
                code: close_code::RESTART,
                reason: "gateway is shutting down".into(),
            })))
            .await;
        return;
    }

    let client = client_id.unwrap_or_default();
    info!(session_id = %session_id, client_id = %client, "session connected");
    state
        .dispatcher
        .dispatch(DomainEvent::new(
            "session.connected",
            json!({ "session_id": session_id, "client_id": client }),
        ))
        .await;

    let params = SessionParams {
        id: session_id,
        hub: state.hub.clone(),
        cancel,
        limiter: FixedWindowLimiter::new(
            state.rate_limit_per_minute,
            Duration::from_secs(60),
            Instant::now(),
        ),
        read_deadline: state.read_deadline,
        keepalive_interval: state.keepalive_interval,
    };

    run_session(socket, outbound_tx, outbound_rx, params).await;

    info!(session_id = %session_id, client_id = %client, "session closed");
    state
        .dispatcher
        .dispatch(DomainEvent::new(
            "session.closed",
            json!({ "session_id": session_id, "client_id": client }),
        ))
        .await;
}

async fn stats(State(state): State<GatewayState>) -> impl IntoResponse {
    Json(json!({ "active_sessions": state.hub.active_count().await }))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config_with(origins: Option<&str>, dev_permissive: bool) -> GatewayConfig {
        let mut config = GatewayConfig::from_env_fn(|_| Err(std::env::VarError::NotPresent));
        config.allowed_origins = origins.map(ToOwned::to_owned);
        config.dev_permissive_origin = dev_permissive;
        config
    }

    #[test]
    fn allow_list_gates_browser_origins() {
        let policy = OriginPolicy::from_config(&config_with(
            Some("https://app.palaver.chat, https://staging.palaver.chat"),
            false,
        ));

        assert!(policy.allows(Some("https://app.palaver.chat")));
        assert!(policy.allows(Some("https://staging.palaver.chat")));
        assert!(!policy.allows(Some("https://evil.example.com")));
        assert!(!policy.allows(Some("")));
    }

    #[test]
    fn absent_origin_is_always_accepted() {
        let allow_list = OriginPolicy::from_config(&config_with(Some("https://a.chat"), false));
        let permissive = OriginPolicy::from_config(&config_with(None, true));
        let deny_all = OriginPolicy::from_config(&config_with(None, false));

        assert!(allow_list.allows(None));
        assert!(permissive.allows(None));
        assert!(deny_all.allows(None));
    }

    #[test]
    fn permissive_fallback_requires_explicit_dev_opt_in() {
        let deny_all = OriginPolicy::from_config(&config_with(None, false));
        assert!(!deny_all.allows(Some("https://anything.example.com")));

        let permissive = OriginPolicy::from_config(&config_with(None, true));
        assert!(permissive.allows(Some("https://anything.example.com")));
        assert!(!permissive.allows(Some("")));
        assert!(!permissive.allows(Some("   ")));
    }

    #[test]
    fn configured_origins_win_over_dev_opt_in() {
        // Setting both must not silently merge the two policies.
        let policy = OriginPolicy::from_config(&config_with(Some("https://a.chat"), true));
        assert!(policy.allows(Some("https://a.chat")));
        assert!(!policy.allows(Some("https://b.chat")));
    }

    #[test]
    fn origin_parsing_handles_whitespace_and_empties() {
        let origins = parse_origins("  https://a.chat , https://b.chat  , ");
        assert_eq!(origins.len(), 2);
        assert!(origins.contains("https://a.chat"));
        assert!(origins.contains("https://b.chat"));
    }
}
