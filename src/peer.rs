//! Connection plumbing for the arena server.
//!
//! Every accepted socket gets one pump task. Control pumps decode JSON
//! messages, media pumps decode bincode frames, and both funnel their
//! activity into a single ordered event channel so the arena loop sees
//! connects, messages and disconnects in arrival order.

use std::collections::HashMap;

use futures::StreamExt;
use log::warn;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;

use crate::protocol::{self, MediaFrame, PeerMessage};
use crate::session::PeerId;

/// What a pump task reports back to the arena loop.
#[derive(Debug)]
pub enum PeerEvent {
    Connected { peer: PeerId },
    Message { peer: PeerId, message: PeerMessage },
    Disconnected { peer: PeerId },
    MediaConnected { source: u64 },
    MediaFrame { source: u64, frame: MediaFrame },
    MediaClosed { source: u64 },
}

/// Outbound handles for every live control connection.
#[derive(Default)]
pub struct PeerConnections {
    senders: HashMap<PeerId, mpsc::Sender<PeerMessage>>,
}

impl PeerConnections {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocates the outbound queue for a new connection. The returned
    /// receiver goes to the pump task.
    pub fn register(&mut self, peer: PeerId) -> mpsc::Receiver<PeerMessage> {
        let (tx, rx) = mpsc::channel(64);
        self.senders.insert(peer, tx);
        rx
    }

    pub fn remove(&mut self, peer: PeerId) {
        self.senders.remove(&peer);
    }

    pub fn len(&self) -> usize {
        self.senders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.senders.is_empty()
    }

    /// Queues a message for one peer. Returns false if the peer is gone.
    pub async fn send(&self, peer: PeerId, message: PeerMessage) -> bool {
        match self.senders.get(&peer) {
            Some(tx) => tx.send(message).await.is_ok(),
            None => false,
        }
    }

    /// Queues a message for every connected peer.
    pub async fn broadcast(&self, message: &PeerMessage) {
        for (peer, tx) in &self.senders {
            if tx.send(message.clone()).await.is_err() {
                warn!("[peer] broadcast to peer {} failed, channel closed", peer);
            }
        }
    }
}

/// Drives one control connection until it closes.
///
/// Inbound frames that fail to decode are logged and skipped, the
/// connection itself stays up. A `Disconnected` event is always emitted
/// on the way out, whatever ended the loop.
pub async fn run_peer_connection<T>(
    io: T,
    peer: PeerId,
    events: mpsc::Sender<PeerEvent>,
    mut outbound: mpsc::Receiver<PeerMessage>,
) where
    T: AsyncRead + AsyncWrite + Unpin,
{
    let mut stream = protocol::message_stream(io);
    let _ = events.send(PeerEvent::Connected { peer }).await;

    loop {
        tokio::select! {
            inbound = stream.next() => {
                match inbound {
                    Some(Ok(bytes)) => match protocol::decode_message(&bytes) {
                        Ok(message) => {
                            if events.send(PeerEvent::Message { peer, message }).await.is_err() {
                                break;
                            }
                        }
                        Err(e) => {
                            warn!("[peer] dropping malformed message from peer {}: {}", peer, e);
                        }
                    },
                    Some(Err(e)) => {
                        warn!("[peer] read error from peer {}: {}", peer, e);
                        break;
                    }
                    None => break,
                }
            }
            queued = outbound.recv() => {
                match queued {
                    Some(message) => {
                        if let Err(e) = protocol::send_message(&mut stream, &message).await {
                            warn!("[peer] write to peer {} failed: {}", peer, e);
                            break;
                        }
                    }
                    // Registry dropped us, nothing left to write.
                    None => break,
                }
            }
        }
    }

    let _ = events.send(PeerEvent::Disconnected { peer }).await;
}

/// Drives one inbound media connection until it closes. Read-only from
/// the arena's point of view.
pub async fn run_media_connection<T>(io: T, source: u64, events: mpsc::Sender<PeerEvent>)
where
    T: AsyncRead + AsyncWrite + Unpin,
{
    let mut stream = protocol::message_stream(io);
    let _ = events.send(PeerEvent::MediaConnected { source }).await;

    loop {
        match stream.next().await {
            Some(Ok(bytes)) => match bincode::deserialize::<MediaFrame>(&bytes) {
                Ok(frame) => {
                    if events.send(PeerEvent::MediaFrame { source, frame }).await.is_err() {
                        break;
                    }
                }
                Err(e) => {
                    warn!("[media] dropping malformed frame from source {}: {}", source, e);
                }
            },
            Some(Err(e)) => {
                warn!("[media] read error from source {}: {}", source, e);
                break;
            }
            None => break,
        }
    }

    let _ = events.send(PeerEvent::MediaClosed { source }).await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::GameState;
    use bytes::Bytes;
    use futures::SinkExt;

    #[tokio::test]
    async fn test_pump_reports_lifecycle_and_messages_in_order() {
        let (client_io, server_io) = tokio::io::duplex(4096);
        let (events_tx, mut events_rx) = mpsc::channel(16);
        let (_outbound_tx, outbound_rx) = mpsc::channel(16);
        let pump = tokio::spawn(run_peer_connection(server_io, 1, events_tx, outbound_rx));

        let mut client = protocol::message_stream(client_io);
        protocol::send_message(
            &mut client,
            &PeerMessage::Intro {
                name: "hana".to_string(),
            },
        )
        .await
        .unwrap();
        protocol::send_message(&mut client, &PeerMessage::Ready)
            .await
            .unwrap();
        drop(client);

        assert!(matches!(
            events_rx.recv().await,
            Some(PeerEvent::Connected { peer: 1 })
        ));
        match events_rx.recv().await {
            Some(PeerEvent::Message { peer: 1, message }) => {
                assert_eq!(
                    message,
                    PeerMessage::Intro {
                        name: "hana".to_string()
                    }
                );
            }
            other => panic!("expected intro, got {:?}", other),
        }
        match events_rx.recv().await {
            Some(PeerEvent::Message { peer: 1, message }) => {
                assert_eq!(message, PeerMessage::Ready);
            }
            other => panic!("expected ready, got {:?}", other),
        }
        assert!(matches!(
            events_rx.recv().await,
            Some(PeerEvent::Disconnected { peer: 1 })
        ));
        pump.await.unwrap();
    }

    #[tokio::test]
    async fn test_malformed_message_is_skipped() {
        let (client_io, server_io) = tokio::io::duplex(4096);
        let (events_tx, mut events_rx) = mpsc::channel(16);
        let (_outbound_tx, outbound_rx) = mpsc::channel(16);
        tokio::spawn(run_peer_connection(server_io, 7, events_tx, outbound_rx));

        let mut client = protocol::message_stream(client_io);
        client
            .send(Bytes::from_static(b"this is not json"))
            .await
            .unwrap();
        protocol::send_message(&mut client, &PeerMessage::Pull { delta: Some(1) })
            .await
            .unwrap();

        assert!(matches!(
            events_rx.recv().await,
            Some(PeerEvent::Connected { peer: 7 })
        ));
        // The junk frame produces no event, the next valid one does.
        match events_rx.recv().await {
            Some(PeerEvent::Message { peer: 7, message }) => {
                assert_eq!(message, PeerMessage::Pull { delta: Some(1) });
            }
            other => panic!("expected pull, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_registry_send_reaches_client() {
        let (client_io, server_io) = tokio::io::duplex(4096);
        let (events_tx, mut events_rx) = mpsc::channel(16);
        let mut connections = PeerConnections::new();
        let outbound_rx = connections.register(3);
        tokio::spawn(run_peer_connection(server_io, 3, events_tx, outbound_rx));
        assert!(matches!(
            events_rx.recv().await,
            Some(PeerEvent::Connected { peer: 3 })
        ));

        assert!(
            connections
                .send(
                    3,
                    PeerMessage::GameState {
                        state: GameState::Running,
                    },
                )
                .await
        );

        let mut client = protocol::message_stream(client_io);
        let received = protocol::recv_message(&mut client).await.unwrap();
        assert_eq!(
            received,
            PeerMessage::GameState {
                state: GameState::Running
            }
        );

        assert!(!connections.send(99, PeerMessage::Ready).await);
    }

    #[tokio::test]
    async fn test_broadcast_reaches_every_peer() {
        let (events_tx, mut events_rx) = mpsc::channel(16);
        let mut connections = PeerConnections::new();
        let mut clients = Vec::new();
        for peer in [1u64, 2u64] {
            let (client_io, server_io) = tokio::io::duplex(4096);
            let outbound_rx = connections.register(peer);
            tokio::spawn(run_peer_connection(
                server_io,
                peer,
                events_tx.clone(),
                outbound_rx,
            ));
            assert!(matches!(
                events_rx.recv().await,
                Some(PeerEvent::Connected { .. })
            ));
            clients.push(protocol::message_stream(client_io));
        }

        connections
            .broadcast(&PeerMessage::Countdown { count: Some(2) })
            .await;

        for client in &mut clients {
            let received = protocol::recv_message(client).await.unwrap();
            assert_eq!(received, PeerMessage::Countdown { count: Some(2) });
        }
    }

    #[tokio::test]
    async fn test_media_pump_delivers_frames() {
        let (client_io, server_io) = tokio::io::duplex(65536);
        let (events_tx, mut events_rx) = mpsc::channel(16);
        tokio::spawn(run_media_connection(server_io, 5, events_tx));

        let mut client = protocol::message_stream(client_io);
        let frame = MediaFrame {
            timestamp_us: 1_000_000,
            width: 320,
            height: 240,
            jpeg_data: vec![0xff, 0xd8, 0xff, 0xd9],
        };
        protocol::send_frame(&mut client, &frame).await.unwrap();
        drop(client);

        assert!(matches!(
            events_rx.recv().await,
            Some(PeerEvent::MediaConnected { source: 5 })
        ));
        match events_rx.recv().await {
            Some(PeerEvent::MediaFrame { source: 5, frame }) => {
                assert_eq!(frame.timestamp_us, 1_000_000);
                assert_eq!((frame.width, frame.height), (320, 240));
                assert_eq!(frame.jpeg_data, vec![0xff, 0xd8, 0xff, 0xd9]);
            }
            other => panic!("expected media frame, got {:?}", other),
        }
        assert!(matches!(
            events_rx.recv().await,
            Some(PeerEvent::MediaClosed { source: 5 })
        ));
    }
}
