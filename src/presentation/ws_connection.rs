// WebSocket pump - inbound fixes in, outbound events out
use crate::application::session_router::{Connection, SessionRouter};
use crate::domain::events::OutboundEvent;
use crate::domain::geo::GeoPoint;
use axum::extract::ws::{Message, WebSocket};
use chrono::Utc;
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use std::sync::Arc;

/// Inbound telemetry frame. Vehicle and rental come from the session.
#[derive(Debug, Deserialize)]
pub struct InboundFix {
    pub lat: f64,
    pub lng: f64,
}

pub fn encode_event(event: &OutboundEvent) -> Option<String> {
    match serde_json::to_string(event) {
        Ok(text) => Some(text),
        Err(e) => {
            tracing::error!("Failed to serialize {} event: {}", event.name(), e);
            None
        }
    }
}

pub async fn run_connection(socket: WebSocket, router: Arc<SessionRouter>, connection: Connection) {
    let Connection {
        id,
        identity,
        group,
        mut events,
    } = connection;
    match &group {
        Some(group) => tracing::debug!("Connection {} for {} joined {}", id, identity.display_name, group),
        None => tracing::debug!("Connection {} for {} joined no group", id, identity.display_name),
    }
    let (mut sink, mut stream) = socket.split();

    let writer = tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            let Some(text) = encode_event(&event) else {
                continue;
            };
            if sink.send(Message::Text(text)).await.is_err() {
                break;
            }
        }
        let _ = sink.close().await;
    });

    while let Some(message) = stream.next().await {
        match message {
            Ok(Message::Text(text)) => match serde_json::from_str::<InboundFix>(&text) {
                Ok(fix) => match router
                    .submit_position_fix(id, GeoPoint::new(fix.lat, fix.lng), Utc::now())
                    .await
                {
                    Ok(outcome) => tracing::trace!(
                        "Fix for {} applied at {:.1} km/h, {} events",
                        outcome.state.id,
                        outcome.update.speed_kmh,
                        outcome.emitted.len()
                    ),
                    Err(e) => tracing::debug!("Fix from connection {} dropped: {}", id, e),
                },
                Err(e) => tracing::warn!("Connection {} sent malformed frame: {}", id, e),
            },
            Ok(Message::Close(_)) => break,
            Ok(_) => {}
            Err(e) => {
                tracing::debug!("Connection {} read error: {}", id, e);
                break;
            }
        }
    }

    router.disconnect(id).await;
    writer.abort();
}
