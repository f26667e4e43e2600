//! Speaker agent driver
//!
//! Connects to the hub, announces, acks incoming streams, and paces frames
//! out of a [`JitterBuffer`] into the playback sink at the frame cadence.
//! Socket IO and the pacer timer live here; the buffer itself is pure.

use bytes::Bytes;
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use uuid::Uuid;

use crate::config::{SpeakerConfig, TransportConfig};
use crate::error::NetworkError;
use crate::media::{PlaybackSink, SinkFactory};
use crate::protocol::{split_message, ControlMessage, WireFrame};
use crate::speaker::jitter::JitterBuffer;

type WsSink = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>;

/// The stream currently being played
struct ActiveStream {
    user_id: String,
    source: String,
    jitter: JitterBuffer,
    sink: Box<dyn PlaybackSink>,
}

/// Speaker agent
pub struct SpeakerAgent {
    config: SpeakerConfig,
    transport: TransportConfig,
    sinks: Box<dyn SinkFactory>,
}

impl SpeakerAgent {
    pub fn new(
        config: SpeakerConfig,
        transport: TransportConfig,
        sinks: Box<dyn SinkFactory>,
    ) -> Self {
        Self {
            config,
            transport,
            sinks,
        }
    }

    /// Run forever, reconnecting to the hub on a fixed delay. An active
    /// stream does not survive a reconnect; the listener's next
    /// `audio-start` begins a fresh one.
    pub async fn run(mut self) -> crate::Result<()> {
        loop {
            let identity = format!(
                "{}-{}-{}",
                self.config.name,
                self.config.client_id,
                Uuid::new_v4()
            );

            match connect_async(&self.config.hub_url).await {
                Ok((ws, _)) => {
                    tracing::info!("connected to hub as {}", identity);
                    if let Err(e) = self.session(&identity, ws).await {
                        tracing::warn!("session error: {}", e);
                    } else {
                        tracing::warn!("hub connection lost");
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
    ) -> crate::Result<()> {
        let (mut sink, mut stream) = ws.split();

        send_text(
            &mut sink,
            ControlMessage::Announce {
                id: identity.to_string(),
                role: crate::protocol::PeerRole::Speaker,
                client_id: self.config.client_id.clone(),
            },
        )
        .await?;

        let mut active: Option<ActiveStream> = None;
        let mut pacer = tokio::time::interval(self.transport.frame_duration());
        pacer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                incoming = stream.next() => {
                    match incoming {
                        Some(Ok(Message::Text(text))) => {
                            self.handle_control(identity, &text, &mut active, &mut sink)
                                .await?;
                        }
                        Some(Ok(Message::Binary(data))) => {
                            handle_binary(Bytes::from(data), &mut active);
                        }
                        Some(Ok(Message::Close(_))) | None => {
                            if let Some(stream) = active.take() {
                                finish_stream(stream);
                            }
                            return Ok(());
                        }
                        Some(Ok(_)) => {}
                        Some(Err(e)) => {
                            tracing::warn!("websocket error: {}", e);
                            if let Some(stream) = active.take() {
                                finish_stream(stream);
                            }
                            return Ok(());
                        }
                    }
                }
                _ = pacer.tick() => {
                    // Empty ticks are skipped; playback resumes as soon as
                    // frames arrive again
                    if let Some(stream) = active.as_mut() {
                        if let Some(frame) = stream.jitter.pop_paced() {
                            stream.sink.play(frame);
                        }
                    }
                }
            }
        }
    }

    async fn handle_control(
        &mut self,
        identity: &str,
        text: &str,
        active: &mut Option<ActiveStream>,
        sink: &mut WsSink,
    ) -> crate::Result<()> {
        match ControlMessage::from_json(text) {
            Ok(ControlMessage::AudioStart { user_id, source }) => {
                tracing::info!("audio start from {} (user {})", source, user_id);
                if let Some(previous) = active.take() {
                    tracing::warn!(
                        "new stream supersedes active stream from user {}",
                        previous.user_id
                    );
                    finish_stream(previous);
                }
                *active = Some(ActiveStream {
                    user_id: user_id.clone(),
                    source: source.clone(),
                    jitter: JitterBuffer::new(
                        self.transport.jitter_capacity,
                        self.transport.warmup_frames,
                    ),
                    sink: self.sinks.create(&user_id),
                });
                send_text(
                    sink,
                    ControlMessage::AudioAck {
                        user_id,
                        source,
                        speaker: identity.to_string(),
                    },
                )
                .await?;
            }
            Ok(ControlMessage::AudioEnd { user_id, source }) => match active.take() {
                Some(stream) if stream.user_id == user_id && stream.source == source => {
                    let stats = stream.jitter.stats();
                    tracing::info!(
                        "audio end for user {} ({} dup, {} overflow)",
                        user_id,
                        stats.duplicates,
                        stats.overflows
                    );
                    finish_stream(stream);
                }
                other => {
                    tracing::debug!("audio end for inactive stream from {}", source);
                    *active = other;
                }
            },
            Ok(ControlMessage::Peer { id, role, .. }) => {
                tracing::info!("peer {} joined as {:?}", id, role);
            }
            Ok(ControlMessage::PeerLeft { id }) => {
                tracing::info!("peer {} left", id);
            }
            Ok(_) => {}
            Err(e) => tracing::warn!("bad control message: {}", e),
        }
        Ok(())
    }
}

/// Split one wire message and feed the active jitter buffer
fn handle_binary(data: Bytes, active: &mut Option<ActiveStream>) {
    let Some(stream) = active.as_mut() else {
        tracing::warn!("binary frame with no active stream, dropping");
        return;
    };
    for frame in split_message(data) {
        match frame {
            WireFrame::Sequenced(record) => {
                stream.jitter.accept(record.sequence, record.payload);
            }
            WireFrame::Legacy(payload) => {
                stream.jitter.push_legacy(payload);
            }
        }
    }
}

/// Drain whatever the jitter buffer still holds and close the sink
fn finish_stream(mut stream: ActiveStream) {
    for frame in stream.jitter.drain() {
        stream.sink.play(frame);
    }
    stream.sink.close();
}

async fn send_text(sink: &mut WsSink, message: ControlMessage) -> crate::Result<()> {
    sink.send(Message::Text(message.to_json()))
        .await
        .map_err(|e| NetworkError::SendFailed(e.to_string()))?;
    Ok(())
}
