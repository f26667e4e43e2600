//! Listener agent driver
//!
//! Connects to the hub, announces, and pumps capture events through
//! per-source [`PendingQueue`]s. Timers and socket IO live here; the queue
//! transitions themselves are pure.

use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use std::collections::HashMap;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use uuid::Uuid;

use crate::config::{ListenerConfig, TransportConfig};
use crate::error::NetworkError;
use crate::listener::pending::{PendingQueue, PushOutcome};
use crate::media::CaptureEvent;
use crate::protocol::{encode_records, ControlMessage, PeerRole};

type WsSink = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>;

/// Why a hub session ended
enum SessionEnd {
    /// Connection to the hub was lost; reconnect after the fixed delay
    TransportLost,
    /// The capture pipeline shut down; the agent is done
    CaptureClosed,
}

/// One active source: its pending queue plus the armed flush deadline
struct ActiveSource {
    queue: PendingQueue,
    flush_at: Option<Instant>,
}

/// Listener agent
pub struct ListenerAgent {
    config: ListenerConfig,
    transport: TransportConfig,
    /// Relay gate, toggled over the control channel
    tunnel_enabled: bool,
}

impl ListenerAgent {
    pub fn new(config: ListenerConfig, transport: TransportConfig) -> Self {
        let tunnel_enabled = config.tunnel_enabled;
        Self {
            config,
            transport,
            tunnel_enabled,
        }
    }

    /// Run until the capture pipeline closes, reconnecting to the hub on a
    /// fixed delay. Source state never survives a reconnect; a new
    /// `audio-start` begins a fresh sequence space.
    pub async fn run(mut self, mut capture_rx: mpsc::Receiver<CaptureEvent>) -> crate::Result<()> {
        loop {
            // Fresh identity per connection; mid-flight sources are
            // abandoned, not resumed
            let identity = format!(
                "{}-{}-{}",
                self.config.name,
                self.config.client_id,
                Uuid::new_v4()
            );

            match connect_async(&self.config.hub_url).await {
                Ok((ws, _)) => {
                    tracing::info!("connected to hub as {}", identity);
                    match self.session(&identity, ws, &mut capture_rx).await {
                        Ok(SessionEnd::CaptureClosed) => {
                            tracing::info!("capture pipeline closed, shutting down");
                            return Ok(());
                        }
                        Ok(SessionEnd::TransportLost) => {
                            tracing::warn!("hub connection lost");
                        }
                        Err(e) => {
                            tracing::warn!("session error: {}", e);
                        }
                    }
                }
                Err(e) => {
                    tracing::warn!("hub connect failed: {}", e);
                }
            }

            tracing::info!(
                "reconnecting in {}ms",
                self.transport.reconnect_delay_ms
            );
            tokio::time::sleep(self.transport.reconnect_delay()).await;
        }
    }

    async fn session(
        &mut self,
        identity: &str,
        ws: WebSocketStream<MaybeTlsStream<TcpStream>>,
        capture_rx: &mut mpsc::Receiver<CaptureEvent>,
    ) -> crate::Result<SessionEnd> {
        let (mut sink, mut stream) = ws.split();

        send_text(
            &mut sink,
            ControlMessage::Announce {
                id: identity.to_string(),
                role: PeerRole::Listener,
                client_id: self.config.client_id.clone(),
            },
        )
        .await?;

        let mut sources: HashMap<String, ActiveSource> = HashMap::new();

        loop {
            let next_flush = sources.values().filter_map(|s| s.flush_at).min();
            let flush_timer = async {
                match next_flush {
                    Some(at) => tokio::time::sleep_until(at).await,
                    None => std::future::pending().await,
                }
            };

            tokio::select! {
                event = capture_rx.recv() => {
                    match event {
                        None => return Ok(SessionEnd::CaptureClosed),
                        Some(event) => {
                            if self.handle_capture(identity, event, &mut sources, &mut sink)
                                .await
                                .is_err()
                            {
                                return Ok(SessionEnd::TransportLost);
                            }
                        }
                    }
                }
                incoming = stream.next() => {
                    match self.handle_incoming(identity, incoming, &mut sources, &mut sink).await {
                        Ok(true) => {}
                        Ok(false) => return Ok(SessionEnd::TransportLost),
                        Err(_) => return Ok(SessionEnd::TransportLost),
                    }
                }
                _ = flush_timer => {
                    let now = Instant::now();
                    for source in sources.values_mut() {
                        if source.flush_at.is_some_and(|at| at <= now) {
                            source.flush_at = None;
                            if flush(&mut source.queue, &mut sink).await.is_err() {
                                return Ok(SessionEnd::TransportLost);
                            }
                        }
                    }
                }
            }
        }
    }

    async fn handle_capture(
        &mut self,
        identity: &str,
        event: CaptureEvent,
        sources: &mut HashMap<String, ActiveSource>,
        sink: &mut WsSink,
    ) -> crate::Result<()> {
        match event {
            CaptureEvent::BurstStart { user_id } => {
                if let Some(monitor) = &self.config.monitor_user {
                    if monitor != &user_id {
                        return Ok(());
                    }
                }
                if !self.tunnel_enabled {
                    tracing::debug!("tunnel disabled, ignoring burst from {}", user_id);
                    return Ok(());
                }

                tracing::info!("burst start from {}", user_id);
                sources.insert(
                    user_id.clone(),
                    ActiveSource {
                        queue: PendingQueue::new(
                            self.transport.pending_queue_cap,
                            self.transport.coalesce_frames,
                        ),
                        flush_at: None,
                    },
                );
                send_text(
                    sink,
                    ControlMessage::AudioStart {
                        user_id,
                        source: identity.to_string(),
                    },
                )
                .await?;
            }

            CaptureEvent::Frame { user_id, payload } => {
                if let Some(source) = sources.get_mut(&user_id) {
                    match source.queue.push_frame(payload) {
                        PushOutcome::Coalesced { ready: true } => {
                            source.flush_at = None;
                            flush(&mut source.queue, sink).await?;
                        }
                        PushOutcome::Coalesced { ready: false } => {
                            if source.flush_at.is_none() {
                                source.flush_at =
                                    Some(Instant::now() + self.transport.coalesce_delay());
                            }
                        }
                        PushOutcome::Queued => {}
                        PushOutcome::Dropped => {
                            tracing::warn!("pending queue full, dropping frame from {}", user_id);
                        }
                    }
                }
            }

            CaptureEvent::BurstEnd { user_id } => {
                if let Some(mut source) = sources.remove(&user_id) {
                    source.queue.end();
                    flush(&mut source.queue, sink).await?;
                    // Sent whether or not an ack ever arrived, so downstream
                    // state always gets cleaned up
                    send_text(
                        sink,
                        ControlMessage::AudioEnd {
                            user_id: user_id.clone(),
                            source: identity.to_string(),
                        },
                    )
                    .await?;
                    if !source.queue.is_acked() {
                        // Keep it around for a late ack, which releases the
                        // queued frames followed by a second audio-end
                        sources.insert(user_id, source);
                    } else {
                        tracing::info!("burst from {} closed", user_id);
                    }
                }
            }
        }
        Ok(())
    }

    /// Returns Ok(false) when the transport is gone
    async fn handle_incoming(
        &mut self,
        identity: &str,
        incoming: Option<Result<Message, tokio_tungstenite::tungstenite::Error>>,
        sources: &mut HashMap<String, ActiveSource>,
        sink: &mut WsSink,
    ) -> crate::Result<bool> {
        match incoming {
            Some(Ok(Message::Text(text))) => {
                match ControlMessage::from_json(&text) {
                    Ok(ControlMessage::AudioAck {
                        user_id,
                        source,
                        speaker,
                    }) if source == identity => {
                        tracing::info!("ack from {} for user {}", speaker, user_id);
                        if let Some(active) = sources.get_mut(&user_id) {
                            let ready = active.queue.acknowledge();
                            if ready {
                                active.flush_at = None;
                                flush(&mut active.queue, sink).await?;
                            } else if active.queue.has_pending() && active.flush_at.is_none() {
                                active.flush_at =
                                    Some(Instant::now() + self.transport.coalesce_delay());
                            }
                            if active.queue.is_ended() {
                                // Terminal flush for a burst that ended
                                // before the ack arrived
                                flush(&mut active.queue, sink).await?;
                                send_text(
                                    sink,
                                    ControlMessage::AudioEnd {
                                        user_id: user_id.clone(),
                                        source: identity.to_string(),
                                    },
                                )
                                .await?;
                                sources.remove(&user_id);
                            }
                        }
                    }
                    Ok(ControlMessage::Control { payload }) => {
                        match payload.get("command").and_then(|v| v.as_str()) {
                            Some("start-tunnel") => {
                                tracing::info!("tunnel enabled");
                                self.tunnel_enabled = true;
                            }
                            Some("stop-tunnel") => {
                                tracing::info!("tunnel disabled");
                                self.tunnel_enabled = false;
                            }
                            _ => {}
                        }
                    }
                    Ok(_) => {}
                    Err(e) => tracing::warn!("bad control message: {}", e),
                }
                Ok(true)
            }
            Some(Ok(Message::Close(_))) | None => Ok(false),
            Some(Ok(_)) => Ok(true),
            Some(Err(e)) => {
                tracing::warn!("websocket error: {}", e);
                Ok(false)
            }
        }
    }
}

/// Wire-encode and send the coalesce buffer as one binary message
async fn flush(queue: &mut PendingQueue, sink: &mut WsSink) -> crate::Result<()> {
    let records = queue.take_flush();
    if records.is_empty() {
        return Ok(());
    }
    let wire = encode_records(&records);
    tracing::debug!("flushing {} frames ({} bytes)", records.len(), wire.len());
    sink.send(Message::Binary(wire.to_vec()))
        .await
        .map_err(|e| NetworkError::SendFailed(e.to_string()))?;
    Ok(())
}

async fn send_text(sink: &mut WsSink, message: ControlMessage) -> crate::Result<()> {
    sink.send(Message::Text(message.to_json()))
        .await
        .map_err(|e| NetworkError::SendFailed(e.to_string()))?;
    Ok(())
}
