//! Wire protocol for gladiator ↔ arena control messages and the local
//! tracker feed / media relay.
//!
//! Self-contained: no imports from the rest of the crate.
//!
//! Two planes share the length-delimited framing:
//! - control plane: JSON payloads (`PeerMessage`), tolerant of junk frames
//! - feed/media plane: bincode payloads carrying landmarks and JPEG bytes

use bytes::Bytes;
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::codec::{Framed, LengthDelimitedCodec};

// --- Control plane message types ---

/// Authoritative match state, broadcast by the arena.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum GameState {
    Idle,
    Countdown,
    Running,
    Finished,
}

impl GameState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Countdown => "countdown",
            Self::Running => "running",
            Self::Finished => "finished",
        }
    }
}

/// Control messages, both directions. The wire form is internally tagged:
/// `{"type":"pull","delta":1}`.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum PeerMessage {
    /// Gladiator → arena: player display name.
    Intro { name: String },
    /// Gladiator → arena: player is set.
    Ready,
    /// Gladiator → arena: one detected rep. The delta payload is accepted
    /// for compatibility; the arena applies its own ±1.
    Pull {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        delta: Option<i32>,
    },
    /// Arena → gladiators: authoritative state change.
    GameState { state: GameState },
    /// Arena → gladiators: countdown tick; None clears the display.
    Countdown { count: Option<u32> },
}

// --- Feed / media plane types ---

/// One relayed camera frame (JPEG, dimensions as captured).
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct MediaFrame {
    pub timestamp_us: u64,
    pub width: u16,
    pub height: u16,
    pub jpeg_data: Vec<u8>,
}

/// One frame from the external tracking engine.
///
/// `landmarks` is `[x, y, z, visibility]` per point in the 33-point schema;
/// absent means no detection this frame. `image` rides along for the media
/// relay and may be absent independently of the landmarks.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct TrackFrame {
    pub timestamp_us: u64,
    pub landmarks: Option<Vec<[f32; 4]>>,
    pub image: Option<MediaFrame>,
}

// --- Codec helpers ---

pub type MessageStream<T> = Framed<T, LengthDelimitedCodec>;

/// Create a framed message stream with length-delimited framing.
/// Generic over the transport so tests can run on in-memory duplex pipes.
pub fn message_stream<T: AsyncRead + AsyncWrite>(io: T) -> MessageStream<T> {
    let codec = LengthDelimitedCodec::builder()
        .max_frame_length(8 * 1024 * 1024) // 8MB, bounds a relayed JPEG
        .new_codec();
    Framed::new(io, codec)
}

/// Send a control message (JSON + length prefix).
pub async fn send_message<T>(stream: &mut MessageStream<T>, msg: &PeerMessage) -> anyhow::Result<()>
where
    T: AsyncRead + AsyncWrite + Unpin,
{
    let data = serde_json::to_vec(msg)?;
    stream.send(Bytes::from(data)).await?;
    Ok(())
}

/// Send a control message through the write half of a split stream.
pub async fn send_to_sink<T>(
    sink: &mut SplitSink<MessageStream<T>, Bytes>,
    msg: &PeerMessage,
) -> anyhow::Result<()>
where
    T: AsyncRead + AsyncWrite + Unpin,
{
    let data = serde_json::to_vec(msg)?;
    sink.send(Bytes::from(data)).await?;
    Ok(())
}

/// Decode one control frame. Callers that tolerate junk log the error and
/// keep reading instead of propagating it.
pub fn decode_message(bytes: &[u8]) -> anyhow::Result<PeerMessage> {
    Ok(serde_json::from_slice(bytes)?)
}

/// Receive one control message, failing on junk or a closed connection.
pub async fn recv_message<T>(stream: &mut MessageStream<T>) -> anyhow::Result<PeerMessage>
where
    T: AsyncRead + AsyncWrite + Unpin,
{
    match stream.next().await {
        Some(Ok(bytes)) => decode_message(&bytes),
        Some(Err(e)) => Err(e.into()),
        None => Err(anyhow::anyhow!("connection closed")),
    }
}

/// Send a feed/media frame (bincode + length prefix).
pub async fn send_frame<T, M: Serialize>(
    stream: &mut MessageStream<T>,
    msg: &M,
) -> anyhow::Result<()>
where
    T: AsyncRead + AsyncWrite + Unpin,
{
    let data = bincode::serialize(msg)?;
    stream.send(Bytes::from(data)).await?;
    Ok(())
}

/// Receive a feed/media frame.
pub async fn recv_frame<T, M: DeserializeOwned>(stream: &mut MessageStream<T>) -> anyhow::Result<M>
where
    T: AsyncRead + AsyncWrite + Unpin,
{
    match stream.next().await {
        Some(Ok(bytes)) => Ok(bincode::deserialize(&bytes)?),
        Some(Err(e)) => Err(e.into()),
        None => Err(anyhow::anyhow!("connection closed")),
    }
}
