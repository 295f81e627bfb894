// WebSocket transport: pumps text frames between a socket and a `BridgeSession`.
use axum::Router;
use axum::extract::State;
use axum::extract::ws::{Message as WsMessage, WebSocket, WebSocketUpgrade};
use axum::response::Response;
use axum::routing::get;
use futures::{SinkExt, StreamExt};
use std::time::Duration;

use super::{Bridge, FrameOutcome};

pub const WEBSOCKET_PATH: &str = "/eventbus/websocket";

// Upper bound on flushing queued and in-flight replies after the read side ends.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

pub fn router(bridge: Bridge) -> Router {
    Router::new()
        .route(WEBSOCKET_PATH, get(upgrade))
        .with_state(bridge)
}

async fn upgrade(State(bridge): State<Bridge>, ws: WebSocketUpgrade) -> Response {
    ws.on_upgrade(move |socket| pump(bridge, socket))
}

async fn pump(bridge: Bridge, socket: WebSocket) {
    let (mut sink, mut stream) = socket.split();
    let (mut session, mut outbound) = bridge.connect();
    session.open();
    let session_id = session.id();

    let mut writer = tokio::spawn(async move {
        while let Some(frame) = outbound.recv().await {
            let text = match serde_json::to_string(&frame) {
                Ok(text) => text,
                Err(err) => {
                    tracing::warn!(session = session_id, error = %err, "failed to encode frame");
                    continue;
                }
            };
            if sink.send(WsMessage::Text(text)).await.is_err() {
                return;
            }
        }
        let _ = sink.close().await;
    });

    while let Some(incoming) = stream.next().await {
        let outcome = match incoming {
            Ok(WsMessage::Text(text)) => session.handle_text(&text),
            Ok(WsMessage::Binary(bytes)) => match std::str::from_utf8(&bytes) {
                Ok(text) => session.handle_text(text),
                Err(_) => FrameOutcome::Close,
            },
            Ok(WsMessage::Close(_)) => FrameOutcome::Close,
            Ok(WsMessage::Ping(_) | WsMessage::Pong(_)) => FrameOutcome::Continue,
            Err(err) => {
                tracing::debug!(session = session_id, error = %err, "websocket read failed");
                FrameOutcome::Close
            }
        };
        if outcome == FrameOutcome::Close {
            break;
        }
    }

    // Subscriptions stop here; replies already requested still reach the writer.
    session.close();
    drop(session);
    if tokio::time::timeout(DRAIN_TIMEOUT, &mut writer).await.is_err() {
        tracing::debug!(session = session_id, "bridge writer did not drain in time");
        writer.abort();
    }
}
