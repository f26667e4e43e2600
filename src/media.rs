//! Boundary to the external media pipeline
//!
//! Frames are opaque byte blobs to this crate; capture and playback are
//! owned by an external pipeline. The listener consumes a stream of
//! [`CaptureEvent`]s and the speaker hands frames to a [`PlaybackSink`].
//!
//! The UDP feed types below are the default process-boundary adapters: the
//! capture side receives one datagram per Opus frame and detects end-of-burst
//! by silence, the playback side forwards one datagram per frame.

use bytes::Bytes;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::sync::mpsc;

use crate::error::NetworkError;

/// Event produced by the capture pipeline, keyed by upstream user id
#[derive(Debug, Clone)]
pub enum CaptureEvent {
    /// An upstream user started an audio burst
    BurstStart { user_id: String },

    /// One captured frame
    Frame { user_id: String, payload: Bytes },

    /// The burst ended (upstream silence)
    BurstEnd { user_id: String },
}

/// Destination for decoded-side frames
pub trait PlaybackSink: Send {
    /// Hand one frame to the playback pipeline
    fn play(&mut self, frame: Bytes);

    /// Signal end of stream
    fn close(&mut self);
}

/// Allocates one sink per incoming stream
pub trait SinkFactory: Send {
    fn create(&mut self, user_id: &str) -> Box<dyn PlaybackSink>;
}

/// Sink that forwards each frame into an mpsc channel
///
/// Used by the UDP playback feed and by tests asserting on emitted frames.
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<Option<Bytes>>,
}

impl ChannelSink {
    pub fn new(tx: mpsc::UnboundedSender<Option<Bytes>>) -> Self {
        Self { tx }
    }
}

impl PlaybackSink for ChannelSink {
    fn play(&mut self, frame: Bytes) {
        let _ = self.tx.send(Some(frame));
    }

    fn close(&mut self) {
        let _ = self.tx.send(None);
    }
}

/// Factory producing [`ChannelSink`]s that all feed one channel
pub struct ChannelSinkFactory {
    tx: mpsc::UnboundedSender<Option<Bytes>>,
}

impl ChannelSinkFactory {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<Option<Bytes>>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl SinkFactory for ChannelSinkFactory {
    fn create(&mut self, user_id: &str) -> Box<dyn PlaybackSink> {
        tracing::debug!("allocating playback sink for user {}", user_id);
        Box::new(ChannelSink::new(self.tx.clone()))
    }
}

/// UDP capture feed
///
/// Binds a local socket; each datagram is one opaque frame attributed to a
/// single configured upstream user. The first frame after idle opens a
/// burst; a silence timeout closes it.
pub struct UdpCaptureFeed {
    socket: UdpSocket,
    user_id: String,
    silence_timeout: Duration,
}

impl UdpCaptureFeed {
    pub async fn bind(
        addr: &str,
        user_id: String,
        silence_timeout: Duration,
    ) -> Result<Self, NetworkError> {
        let socket = UdpSocket::bind(addr)
            .await
            .map_err(|e| NetworkError::BindFailed(e.to_string()))?;
        tracing::info!("capture feed listening on {}", addr);
        Ok(Self {
            socket,
            user_id,
            silence_timeout,
        })
    }

    /// Pump datagrams into capture events until the channel closes
    pub async fn run(self, tx: mpsc::Sender<CaptureEvent>) {
        let mut buf = vec![0u8; 2048];
        let mut in_burst = false;

        loop {
            let received = if in_burst {
                match tokio::time::timeout(self.silence_timeout, self.socket.recv(&mut buf)).await {
                    Ok(result) => result,
                    Err(_) => {
                        in_burst = false;
                        if tx
                            .send(CaptureEvent::BurstEnd {
                                user_id: self.user_id.clone(),
                            })
                            .await
                            .is_err()
                        {
                            return;
                        }
                        continue;
                    }
                }
            } else {
                self.socket.recv(&mut buf).await
            };

            match received {
                Ok(0) => continue,
                Ok(size) => {
                    if !in_burst {
                        in_burst = true;
                        if tx
                            .send(CaptureEvent::BurstStart {
                                user_id: self.user_id.clone(),
                            })
                            .await
                            .is_err()
                        {
                            return;
                        }
                    }
                    let payload = Bytes::copy_from_slice(&buf[..size]);
                    if tx
                        .send(CaptureEvent::Frame {
                            user_id: self.user_id.clone(),
                            payload,
                        })
                        .await
                        .is_err()
                    {
                        return;
                    }
                }
                Err(e) => {
                    tracing::warn!("capture feed receive error: {}", e);
                    tokio::time::sleep(Duration::from_millis(10)).await;
                }
            }
        }
    }
}

/// UDP playback feed
///
/// Drains sink output and forwards one datagram per frame to the configured
/// playback address.
pub struct UdpPlaybackFeed {
    socket: UdpSocket,
}

impl UdpPlaybackFeed {
    pub async fn connect(addr: &str) -> Result<Self, NetworkError> {
        let socket = UdpSocket::bind("0.0.0.0:0")
            .await
            .map_err(|e| NetworkError::BindFailed(e.to_string()))?;
        socket
            .connect(addr)
            .await
            .map_err(|e| NetworkError::ConnectFailed(e.to_string()))?;
        tracing::info!("playback feed targeting {}", addr);
        Ok(Self { socket })
    }

    /// Forward frames until the sink channel closes
    pub async fn run(self, mut rx: mpsc::UnboundedReceiver<Option<Bytes>>) {
        while let Some(item) = rx.recv().await {
            match item {
                Some(frame) => {
                    if let Err(e) = self.socket.send(&frame).await {
                        tracing::warn!("playback feed send error: {}", e);
                    }
                }
                // Stream closed; keep draining for the next stream
                None => tracing::debug!("playback stream closed"),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_capture_feed_burst_lifecycle() {
        let feed = UdpCaptureFeed::bind(
            "127.0.0.1:0",
            "u1".to_string(),
            Duration::from_millis(50),
        )
        .await
        .unwrap();
        let feed_addr = feed.socket.local_addr().unwrap();

        let (tx, mut rx) = mpsc::channel(32);
        tokio::spawn(feed.run(tx));

        let sender = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        sender.send_to(b"frame-a", feed_addr).await.unwrap();
        sender.send_to(b"frame-b", feed_addr).await.unwrap();

        assert!(matches!(
            rx.recv().await.unwrap(),
            CaptureEvent::BurstStart { .. }
        ));
        match rx.recv().await.unwrap() {
            CaptureEvent::Frame { payload, .. } => assert_eq!(&payload[..], b"frame-a"),
            other => panic!("unexpected event: {:?}", other),
        }
        match rx.recv().await.unwrap() {
            CaptureEvent::Frame { payload, .. } => assert_eq!(&payload[..], b"frame-b"),
            other => panic!("unexpected event: {:?}", other),
        }

        // Silence ends the burst
        assert!(matches!(
            rx.recv().await.unwrap(),
            CaptureEvent::BurstEnd { .. }
        ));

        // A new frame opens a fresh burst
        sender.send_to(b"frame-c", feed_addr).await.unwrap();
        assert!(matches!(
            rx.recv().await.unwrap(),
            CaptureEvent::BurstStart { .. }
        ));
    }

    #[test]
    fn test_channel_sink_forwards_and_closes() {
        let (factory_tx, mut rx) = mpsc::unbounded_channel();
        let mut sink = ChannelSink::new(factory_tx);
        sink.play(Bytes::from_static(b"x"));
        sink.close();

        assert_eq!(rx.try_recv().unwrap(), Some(Bytes::from_static(b"x")));
        assert_eq!(rx.try_recv().unwrap(), None);
    }
}
