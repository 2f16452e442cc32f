mod dispatcher;
mod handler;
mod limits;
mod session;

use std::sync::Arc;

use axum::{
    extract::{ws::WebSocketUpgrade, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use parley_core::AppState;
use serde::Deserialize;

pub use handler::ConnectionCapacity;
pub use limits::RateLimits;

/// Everything a connection task needs, cloned per upgrade.
#[derive(Clone)]
pub struct GatewayState {
    pub core: AppState,
    pub limits: Arc<RateLimits>,
    pub capacity: Arc<ConnectionCapacity>,
    /// When set, upgrades must present it as `?token=`; when unset the
    /// endpoint is open (trusted-edge deployments).
    pub shared_secret: Option<String>,
}

impl GatewayState {
    pub fn new(
        core: AppState,
        limits: RateLimits,
        max_connections: usize,
        shared_secret: Option<String>,
    ) -> Self {
        Self {
            core,
            limits: Arc::new(limits),
            capacity: Arc::new(ConnectionCapacity::new(max_connections)),
            shared_secret,
        }
    }
}

pub fn gateway_router() -> Router<GatewayState> {
    Router::new().route("/ws", get(ws_upgrade))
}

#[derive(Deserialize)]
struct ConnectQuery {
    token: Option<String>,
}

async fn ws_upgrade(
    ws: WebSocketUpgrade,
    Query(query): Query<ConnectQuery>,
    State(state): State<GatewayState>,
) -> Response {
    if let Some(secret) = &state.shared_secret {
        if query.token.as_deref() != Some(secret.as_str()) {
            tracing::debug!("upgrade refused: bad or missing token");
            return StatusCode::UNAUTHORIZED.into_response();
        }
    }
    ws.on_upgrade(move |socket| handler::handle_connection(socket, state))
        .into_response()
}
