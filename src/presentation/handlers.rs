// HTTP request handlers
use crate::application::error::TrackerError;
use crate::application::session_router::ClientInfo;
use crate::domain::events::FleetSnapshot;
use crate::domain::session::{Identity, Role};
use crate::domain::vehicle::VehicleState;
use crate::presentation::app_state::AppState;
use crate::presentation::ws_connection::run_connection;
use axum::{
    extract::{ws::WebSocketUpgrade, ConnectInfo, Path, Query, State},
    http::{header, HeaderMap},
    response::{IntoResponse, Response},
    Json,
};
use serde::Deserialize;
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::Arc;

#[derive(Deserialize)]
pub struct WsQuery {
    pub token: Option<String>,
}

/// Health check endpoint
pub async fn health_check() -> &'static str {
    "ok"
}

/// Authenticate, then upgrade to a telemetry socket
pub async fn ws_upgrade(
    ws: WebSocketUpgrade,
    Query(query): Query<WsQuery>,
    headers: HeaderMap,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    State(state): State<Arc<AppState>>,
) -> Response {
    let token = query.token.as_deref().or_else(|| bearer_token(&headers));
    let identity = match state.router.authenticate(token) {
        Ok(identity) => identity,
        Err(e) => {
            tracing::warn!("Rejected WebSocket connection from {}: {}", peer, e);
            return e.into_response();
        }
    };

    let client = ClientInfo {
        user_agent: headers
            .get(header::USER_AGENT)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string),
        origin: Some(network_origin(&headers, peer)),
    };

    let router = state.router.clone();
    ws.on_upgrade(move |socket| async move {
        let connection = router.connect(identity, client).await;
        run_connection(socket, router, connection).await;
    })
}

/// Current registry snapshot (administrators only)
pub async fn fleet_snapshot(
    headers: HeaderMap,
    State(state): State<Arc<AppState>>,
) -> Result<Json<FleetSnapshot>, TrackerError> {
    require_admin(&headers, &state)?;
    Ok(Json(state.fleet_service.snapshot().await))
}

/// Reload car records after an administrative change
pub async fn refresh_fleet(
    headers: HeaderMap,
    State(state): State<Arc<AppState>>,
) -> Result<Json<Value>, TrackerError> {
    require_admin(&headers, &state)?;
    let count = state.fleet_service.refresh().await?;
    Ok(Json(json!({ "vehicles": count })))
}

/// Rental completed: clear the vehicle's live state
pub async fn return_vehicle(
    Path(id): Path<String>,
    headers: HeaderMap,
    State(state): State<Arc<AppState>>,
) -> Result<Json<VehicleState>, TrackerError> {
    require_admin(&headers, &state)?;
    Ok(Json(state.fleet_service.complete_rental(&id).await?))
}

fn require_admin(headers: &HeaderMap, state: &AppState) -> Result<Identity, TrackerError> {
    let identity = state.router.authenticate(bearer_token(headers))?;
    if identity.role != Role::Admin {
        return Err(TrackerError::Forbidden("admin role required".to_string()));
    }
    Ok(identity)
}

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
}

/// First hop of `X-Forwarded-For`, else the socket peer.
fn network_origin(headers: &HeaderMap, peer: SocketAddr) -> String {
    headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| peer.ip().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn test_bearer_token() {
        let mut headers = HeaderMap::new();
        assert_eq!(bearer_token(&headers), None);

        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer abc.def.ghi"));
        assert_eq!(bearer_token(&headers), Some("abc.def.ghi"));

        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Basic Zm9v"));
        assert_eq!(bearer_token(&headers), None);
    }

    #[test]
    fn test_network_origin_prefers_forwarded_for() {
        let peer: SocketAddr = "192.168.1.20:51234".parse().unwrap();
        let mut headers = HeaderMap::new();
        assert_eq!(network_origin(&headers, peer), "192.168.1.20");

        headers.insert("x-forwarded-for", HeaderValue::from_static("203.0.113.9, 10.0.0.1"));
        assert_eq!(network_origin(&headers, peer), "203.0.113.9");
    }
}
