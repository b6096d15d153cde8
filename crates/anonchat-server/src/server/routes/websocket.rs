//! Chat transport over WebSocket.
//!
//! Each upgraded socket is one visitor. Text frames carry JSON client events
//! which are handed to the matchmaking engine; events the engine emits for
//! this visitor arrive on an mpsc channel and are written back by a separate
//! writer task.

use anonchat_core::{ClientEvent, ConnectionId, MatchmakingEngine, ServerEvent};
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::Response,
    routing::get,
    Router,
};
use futures::{stream::SplitSink, SinkExt, StreamExt};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::server::AppState;

/// Create the WebSocket router
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/socket", get(websocket_handler))
        .with_state(state)
}

/// GET /socket
///
/// Upgrades the HTTP connection to a WebSocket carrying the chat protocol.
async fn websocket_handler(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> Response {
    debug!("Chat WebSocket connection request");

    ws.max_message_size(state.config.max_frame_bytes)
        .on_upgrade(move |socket| handle_socket(socket, state))
}

/// Drive one chat connection from accept to disconnect.
async fn handle_socket(socket: WebSocket, state: Arc<AppState>) {
    let id = ConnectionId::new();
    let (outbound_tx, outbound_rx) = mpsc::channel(state.config.outbound_buffer);
    state.engine.connect(id, outbound_tx);

    let (sink, mut stream) = socket.split();
    let mut writer = tokio::spawn(write_events(id, outbound_rx, sink));

    loop {
        tokio::select! {
            frame = stream.next() => match frame {
                Some(Ok(Message::Text(text))) => handle_text(&state.engine, id, &text),
                Some(Ok(Message::Binary(_))) => {
                    warn!(connection = %id, "Received binary WebSocket message (not supported)");
                }
                // Pings are answered by the WebSocket layer itself
                Some(Ok(Message::Ping(_))) | Some(Ok(Message::Pong(_))) => {}
                Some(Ok(Message::Close(_))) => {
                    debug!(connection = %id, "WebSocket close requested");
                    break;
                }
                Some(Err(e)) => {
                    debug!(connection = %id, error = %e, "WebSocket error");
                    break;
                }
                None => break,
            },
            _ = &mut writer => {
                debug!(connection = %id, "Writer stopped, closing connection");
                break;
            }
            _ = state.shutdown.cancelled() => {
                debug!(connection = %id, "Server shutting down, closing connection");
                break;
            }
        }
    }

    state.engine.disconnect(id);
    writer.abort();
    info!(connection = %id, "Chat WebSocket connection closed");
}

/// Decode one text frame and apply it. Undecodable frames are dropped.
fn handle_text(engine: &MatchmakingEngine, id: ConnectionId, text: &str) {
    match ClientEvent::decode(text) {
        Ok(event) => {
            debug!(connection = %id, event = event.name(), "Received client event");
            engine.dispatch(id, event);
        }
        Err(e) => {
            warn!(connection = %id, error = %e, len = text.len(), "Ignoring malformed frame");
        }
    }
}

/// Forward engine events for one connection onto its socket.
async fn write_events(
    id: ConnectionId,
    mut events: mpsc::Receiver<ServerEvent>,
    mut sink: SplitSink<WebSocket, Message>,
) {
    while let Some(event) = events.recv().await {
        let frame = match event.encode() {
            Ok(frame) => frame,
            Err(e) => {
                error!(connection = %id, error = %e, "Failed to encode server event");
                continue;
            }
        };

        if let Err(e) = sink.send(Message::Text(frame)).await {
            debug!(connection = %id, error = %e, "Failed to send WebSocket message");
            break;
        }
    }

    if let Err(e) = sink.close().await {
        debug!(connection = %id, error = %e, "Failed to close WebSocket");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ServerConfig;
    use std::net::SocketAddr;
    use std::time::Duration;
    use tokio::net::{TcpListener, TcpStream};
    use tokio_tungstenite::{
        connect_async, tungstenite::Message as WsMessage, MaybeTlsStream, WebSocketStream,
    };
    use tokio_util::sync::CancellationToken;

    type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

    async fn spawn_server() -> (SocketAddr, Arc<AppState>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let state = Arc::new(AppState::new(ServerConfig::default(), CancellationToken::new()));
        tokio::spawn(crate::server::serve(listener, state.clone()));
        (addr, state)
    }

    async fn connect(addr: SocketAddr) -> Client {
        let (client, _) = connect_async(format!("ws://{}/socket", addr)).await.unwrap();
        client
    }

    async fn send(client: &mut Client, frame: &str) {
        client.send(WsMessage::Text(frame.into())).await.unwrap();
    }

    async fn recv(client: &mut Client) -> ServerEvent {
        let next = async {
            loop {
                match client.next().await {
                    Some(Ok(WsMessage::Text(text))) => return serde_json::from_str(&text).unwrap(),
                    Some(Ok(_)) => continue,
                    other => panic!("connection ended: {:?}", other),
                }
            }
        };
        tokio::time::timeout(Duration::from_secs(5), next)
            .await
            .expect("timed out waiting for server event")
    }

    async fn wait_for_connections(state: &AppState, expected: usize) {
        for _ in 0..100 {
            if state.engine.stats().connections == expected {
                return;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        panic!("expected {} connections, have {:?}", expected, state.engine.stats());
    }

    #[tokio::test]
    async fn test_pair_chat_and_disconnect_over_websocket() {
        let (addr, state) = spawn_server().await;
        let mut alice = connect(addr).await;
        let mut bob = connect(addr).await;
        wait_for_connections(&state, 2).await;

        send(&mut alice, r#"{"event":"findPartner","data":{"userName":"Alice"}}"#).await;
        assert_eq!(recv(&mut alice).await, ServerEvent::Waiting);

        send(&mut bob, r#"{"event":"findPartner","data":{"userName":"Bob"}}"#).await;
        match recv(&mut alice).await {
            ServerEvent::PartnerFound { partner_name, .. } => assert_eq!(partner_name, "Bob"),
            other => panic!("unexpected event: {:?}", other),
        }
        match recv(&mut bob).await {
            ServerEvent::PartnerFound { partner_name, .. } => assert_eq!(partner_name, "Alice"),
            other => panic!("unexpected event: {:?}", other),
        }

        send(&mut alice, r#"{"event":"typing"}"#).await;
        assert_eq!(recv(&mut bob).await, ServerEvent::PartnerTyping);

        send(&mut alice, r#"{"event":"sendMessage","data":{"message":"hi Bob"}}"#).await;
        match recv(&mut bob).await {
            ServerEvent::ReceiveMessage { message, timestamp } => {
                assert_eq!(message, "hi Bob");
                assert!(timestamp > 0);
            }
            other => panic!("unexpected event: {:?}", other),
        }

        alice.close(None).await.unwrap();
        assert_eq!(recv(&mut bob).await, ServerEvent::PartnerDisconnected);
        wait_for_connections(&state, 1).await;
        assert_eq!(state.engine.stats().active_pairs, 0);
    }

    #[tokio::test]
    async fn test_malformed_frames_keep_connection_open() {
        let (addr, state) = spawn_server().await;
        let mut client = connect(addr).await;
        wait_for_connections(&state, 1).await;

        send(&mut client, "definitely not json").await;
        send(&mut client, r#"{"event":"joinRoom","data":{"room":"lobby"}}"#).await;
        send(&mut client, r#"{"event":"findPartner"}"#).await;

        assert_eq!(recv(&mut client).await, ServerEvent::Waiting);
        assert_eq!(state.engine.stats().waiting, 1);
    }

    #[tokio::test]
    async fn test_shutdown_disconnects_clients() {
        let (addr, state) = spawn_server().await;
        let mut client = connect(addr).await;
        send(&mut client, r#"{"event":"findPartner","data":{"userName":"Alice"}}"#).await;
        assert_eq!(recv(&mut client).await, ServerEvent::Waiting);

        state.shutdown.cancel();

        wait_for_connections(&state, 0).await;
        assert_eq!(state.engine.stats().waiting, 0);
    }
}
