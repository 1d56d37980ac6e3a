//! Push channel for one session's signals, events and state changes.
use axum::{
    extract::{
        Path, State, WebSocketUpgrade,
        ws::{Message, WebSocket},
    },
    response::IntoResponse,
};
use futures_util::{SinkExt, StreamExt};
use mongodb::bson::oid::ObjectId;
use schema::view::SessionNotification;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn};

use crate::{
    auth::Caller, config::AppState, error::Error, routes::authorize, store::SessionStore,
};

pub async fn get_session_ws<S: SessionStore>(
    State(state): State<AppState<S>>,
    caller: Caller,
    Path(id): Path<String>,
    ws: WebSocketUpgrade,
) -> Result<impl IntoResponse, Error> {
    // 404 before upgrading
    let session_id = authorize(&state, &caller, &id).await?;

    Ok(ws.on_upgrade(move |socket| handle_socket(socket, state, session_id)))
}

async fn handle_socket<S: SessionStore>(socket: WebSocket, state: AppState<S>, session_id: ObjectId) {
    let (mut sender, mut receiver) = socket.split();
    let hub = state.manager.hub();
    let mut notifications = hub.scoped(session_id);
    info!(session = %session_id, "websocket subscriber connected");

    let mut heartbeat = tokio::time::interval(state.env_vars.ws_heartbeat_interval);
    heartbeat.tick().await;

    loop {
        tokio::select! {
            msg = receiver.next() => {
                match msg {
                    Some(Ok(Message::Close(_))) | None | Some(Err(_)) => break,
                    // Clients only listen
                    Some(Ok(_)) => {}
                }
            }
            _ = heartbeat.tick() => {
                if sender.send(Message::Ping(Default::default())).await.is_err() {
                    break;
                }
            }
            notification = notifications.recv() => {
                let (notification, last) = match notification {
                    Ok(SessionNotification::Deleted) | Err(RecvError::Closed) => {
                        (SessionNotification::Deleted, true)
                    }
                    Ok(notification) => (notification, false),
                    Err(RecvError::Lagged(missed)) => {
                        // Subscribers re-read state over HTTP after a gap
                        warn!(session = %session_id, missed, "websocket subscriber lagged");
                        continue;
                    }
                };
                let json = match serde_json::to_string(&notification) {
                    Ok(json) => json,
                    Err(e) => {
                        warn!(error = %e, "failed to serialize notification");
                        continue;
                    }
                };
                if sender.send(Message::Text(json.into())).await.is_err() || last {
                    break;
                }
            }
        }
    }

    let _ = sender.send(Message::Close(None)).await;
    drop(notifications);
    debug!(session = %session_id, "websocket subscriber disconnected");
}
