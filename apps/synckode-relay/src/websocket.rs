use axum::{
    extract::{
        ws::{Message, WebSocket},
        ConnectInfo, State, WebSocketUpgrade,
    },
    response::Response,
};
use futures_util::{SinkExt, StreamExt};
use std::net::SocketAddr;
use tracing::{debug, info, warn};

use crate::error::RelayError;
use crate::protocol::ClientEvent;
use crate::session::Session;
use crate::state::RelayState;
use crate::AppState;

/// WebSocket upgrade handler
pub async fn websocket_handler(
    ConnectInfo(remote_addr): ConnectInfo<SocketAddr>,
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state.relay, remote_addr))
}

/// Drive one connection until the client goes away.
///
/// Inbound frames and execution completions are handled one at a time from
/// a single loop; outbound events are written by a separate task draining
/// the connection's hub queue.
async fn handle_socket(socket: WebSocket, relay: RelayState, remote_addr: SocketAddr) {
    let (mut session, mut outbound, mut exec_events) = Session::open(relay);
    let connection_id = session.connection_id().to_string();
    let (mut sender, mut receiver) = socket.split();

    let writer_id = connection_id.clone();
    let writer = tokio::spawn(async move {
        while let Some(event) = outbound.recv().await {
            let json = match serde_json::to_string(&event) {
                Ok(json) => json,
                Err(err) => {
                    warn!(connection_id = %writer_id, error = %err, "failed to encode event");
                    continue;
                }
            };
            if sender.send(Message::Text(json)).await.is_err() {
                break;
            }
        }
        let _ = sender.close().await;
        debug!(connection_id = %writer_id, "writer task ended");
    });

    info!(connection_id = %connection_id, remote_addr = %remote_addr, "websocket connected");

    loop {
        tokio::select! {
            frame = receiver.next() => {
                let message = match frame {
                    Some(Ok(message)) => message,
                    Some(Err(err)) => {
                        debug!(connection_id = %connection_id, error = %err, "websocket error");
                        break;
                    }
                    None => break,
                };
                match message {
                    Message::Text(text) => dispatch(&mut session, &text).await,
                    Message::Binary(data) => match String::from_utf8(data) {
                        Ok(text) => dispatch(&mut session, &text).await,
                        Err(_) => session.report(&RelayError::InvalidFrame(
                            "binary frame is not UTF-8".to_string(),
                        )),
                    },
                    Message::Close(_) => {
                        debug!(connection_id = %connection_id, "received close frame");
                        break;
                    }
                    Message::Ping(_) | Message::Pong(_) => {}
                }
            }
            Some(event) = exec_events.recv() => session.on_exec_event(event),
        }
    }

    session.close();
    if writer.await.is_err() {
        debug!(connection_id = %connection_id, "writer task panicked");
    }
    info!(connection_id = %connection_id, remote_addr = %remote_addr, "websocket disconnected");
}

async fn dispatch(session: &mut Session, payload: &str) {
    let result = match serde_json::from_str::<ClientEvent>(payload) {
        Ok(event) => {
            debug!(connection_id = %session.connection_id(), ?event, "client event");
            session.handle(event).await
        }
        Err(err) => Err(RelayError::from(err)),
    };
    if let Err(err) = result {
        session.report(&err);
    }
}
