//! WebSocket server front-end for the hub
//!
//! Accepts one persistent connection per peer, parses text frames into
//! control messages, and forwards everything to the registry actor.

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::IntoResponse,
    routing::get,
    Router,
};
use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tokio::sync::{mpsc, oneshot};
use tower_http::cors::{Any, CorsLayer};
use uuid::Uuid;

use crate::config::HubConfig;
use crate::hub::{HubEvent, Outbound, Registry};
use crate::protocol::ControlMessage;

/// Hub WebSocket server
pub struct HubServer {
    config: HubConfig,
}

impl HubServer {
    pub fn new(config: HubConfig) -> Self {
        Self { config }
    }

    /// Bind and serve on the configured address
    pub async fn start(self) -> crate::Result<()> {
        let addr: SocketAddr = format!("{}:{}", self.config.bind_address, self.config.port)
            .parse()
            .map_err(|e| crate::Error::Config(format!("invalid bind address: {}", e)))?;
        let listener = TcpListener::bind(addr).await?;
        self.serve(listener).await
    }

    /// Serve on an already-bound listener
    pub async fn serve(self, listener: TcpListener) -> crate::Result<()> {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let registry = Registry::new(self.config.prestart_buffer_cap);
        tokio::spawn(run_registry(registry, events_rx));

        let mut router = Router::new()
            .route("/", get(ws_handler))
            .route("/ws", get(ws_handler))
            .route("/health", get(|| async { "OK" }));

        if self.config.enable_cors {
            let cors = CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any);
            router = router.layer(cors);
        }

        tracing::info!("hub listening on ws://{}", listener.local_addr()?);
        axum::serve(listener, router.with_state(events_tx)).await?;
        Ok(())
    }
}

/// Registry actor: the only owner of peer and buffer state
async fn run_registry(mut registry: Registry, mut events: mpsc::UnboundedReceiver<HubEvent>) {
    while let Some(event) = events.recv().await {
        match event {
            HubEvent::Connect { conn_id, tx } => registry.connect(conn_id, tx),
            HubEvent::Announce {
                conn_id,
                id,
                role,
                client_id,
                reply,
            } => {
                let accepted = registry.announce(&conn_id, id, role, client_id).is_ok();
                let _ = reply.send(accepted);
            }
            HubEvent::Control { from, message } => {
                handle_control(&mut registry, &from, message).await
            }
            HubEvent::Binary { from, data } => registry.binary(&from, data),
            HubEvent::Disconnect { from } => registry.disconnect(&from),
        }
    }
}

async fn handle_control(registry: &mut Registry, from: &str, message: ControlMessage) {
    match &message {
        ControlMessage::Control { .. } => registry.control(from, &message),
        ControlMessage::AudioAck { .. } => registry.audio_ack(from, &message),
        ControlMessage::AudioStart { .. } => {
            let buffered = registry.audio_start(from, &message);
            if !buffered.is_empty() {
                // One scheduling turn so recipients can prepare a sink
                // before the buffered frames land
                tokio::task::yield_now().await;
                tracing::info!("[flush] releasing {} pre-start frames for {}", buffered.len(), from);
                for frame in buffered {
                    registry.broadcast_binary(from, frame);
                }
            }
        }
        ControlMessage::AudioEnd { .. } => registry.audio_end(from, &message),
        // Hub-originated kinds are not accepted from peers
        ControlMessage::Announce { .. }
        | ControlMessage::Peer { .. }
        | ControlMessage::PeerLeft { .. }
        | ControlMessage::Error { .. } => {
            tracing::warn!("[control] unexpected message kind from {}, dropping", from);
        }
    }
}

/// WebSocket upgrade handler
async fn ws_handler(
    ws: WebSocketUpgrade,
    State(events): State<mpsc::UnboundedSender<HubEvent>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, events))
}

/// One task per peer connection
async fn handle_socket(socket: WebSocket, events: mpsc::UnboundedSender<HubEvent>) {
    let (mut sink, mut stream) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<Outbound>();

    // Temporary identity until the peer announces; binary frames received
    // before the announce are bufferable under it
    let mut identity = format!("conn-{}", Uuid::new_v4());
    let _ = events.send(HubEvent::Connect {
        conn_id: identity.clone(),
        tx,
    });

    let mut send_task = tokio::spawn(async move {
        while let Some(out) = rx.recv().await {
            let msg = match out {
                Outbound::Text(text) => Message::Text(text),
                Outbound::Binary(data) => Message::Binary(data.to_vec()),
            };
            if sink.send(msg).await.is_err() {
                break;
            }
        }
    });

    loop {
        tokio::select! {
            incoming = stream.next() => {
                match incoming {
                    Some(Ok(Message::Text(text))) => {
                        match ControlMessage::from_json(&text) {
                            Ok(ControlMessage::Announce { id, role, client_id }) => {
                                let (reply_tx, reply_rx) = oneshot::channel();
                                let _ = events.send(HubEvent::Announce {
                                    conn_id: identity.clone(),
                                    id: id.clone(),
                                    role,
                                    client_id,
                                    reply: reply_tx,
                                });
                                if matches!(reply_rx.await, Ok(true)) {
                                    identity = id;
                                }
                            }
                            Ok(message) => {
                                let _ = events.send(HubEvent::Control {
                                    from: identity.clone(),
                                    message,
                                });
                            }
                            Err(e) => {
                                tracing::warn!("[bad control] from {}: {}", identity, e);
                            }
                        }
                    }
                    Some(Ok(Message::Binary(data))) => {
                        let _ = events.send(HubEvent::Binary {
                            from: identity.clone(),
                            data: Bytes::from(data),
                        });
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {
                        // Ping/pong handled by axum
                    }
                    Some(Err(e)) => {
                        tracing::warn!("[ws error] {}: {}", identity, e);
                        break;
                    }
                }
            }
            _ = &mut send_task => break,
        }
    }

    let _ = events.send(HubEvent::Disconnect { from: identity });
    send_task.abort();
}
