//! Binary framing for the realtime relay.
//!
//! Every frame on the wire is a 4-byte big-endian length followed by a body
//! of at most [`MAX_FRAME_LEN`] bytes. The first body byte is the frame type:
//!
//! | type   | frame          | body                                            |
//! |--------|----------------|-------------------------------------------------|
//! | `0x01` | handshake      | environment, server id, token (sized strings)   |
//! | `0x02` | data           | target id, source id (sized strings), payload   |
//! | `0x03` | handshake ack  | accepting server id (sized string)              |
//!
//! A sized string is a u16 big-endian byte length followed by UTF-8 bytes.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use infra_api::RealtimeError;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tracing::warn;

pub const MAX_FRAME_LEN: usize = 1024 * 1024;
pub const MAX_FIELD_LEN: usize = u16::MAX as usize;

pub const TYPE_HANDSHAKE: u8 = 0x01;
pub const TYPE_DATA: u8 = 0x02;
pub const TYPE_HANDSHAKE_ACK: u8 = 0x03;

#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("frame of {0} bytes exceeds the {MAX_FRAME_LEN} byte limit")]
    FrameTooLarge(usize),

    #[error("field of {0} bytes exceeds the {MAX_FIELD_LEN} byte limit")]
    FieldTooLong(usize),

    #[error("empty frame")]
    EmptyFrame,

    #[error("unknown frame type 0x{0:02x}")]
    UnknownType(u8),

    #[error("frame ended before all fields were read")]
    Truncated,

    #[error("field is not valid UTF-8")]
    InvalidUtf8,
}

impl From<ProtocolError> for RealtimeError {
    fn from(err: ProtocolError) -> Self {
        RealtimeError::Protocol(err.to_string())
    }
}

/// A decoded realtime frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Handshake {
        environment: String,
        server_id: String,
        token: String,
    },
    Data {
        target: String,
        source: String,
        payload: Bytes,
    },
    HandshakeAck {
        server_id: String,
    },
}

impl Frame {
    /// Encodes the frame including its length prefix.
    pub fn encode(&self) -> Result<Bytes, ProtocolError> {
        let mut body = BytesMut::new();
        match self {
            Frame::Handshake {
                environment,
                server_id,
                token,
            } => {
                body.put_u8(TYPE_HANDSHAKE);
                put_sized(&mut body, environment)?;
                put_sized(&mut body, server_id)?;
                put_sized(&mut body, token)?;
            }
            Frame::Data {
                target,
                source,
                payload,
            } => {
                body.put_u8(TYPE_DATA);
                put_sized(&mut body, target)?;
                put_sized(&mut body, source)?;
                body.put_slice(payload);
            }
            Frame::HandshakeAck { server_id } => {
                body.put_u8(TYPE_HANDSHAKE_ACK);
                put_sized(&mut body, server_id)?;
            }
        }

        if body.len() > MAX_FRAME_LEN {
            return Err(ProtocolError::FrameTooLarge(body.len()));
        }
        let mut framed = BytesMut::with_capacity(4 + body.len());
        framed.put_u32(body.len() as u32);
        framed.extend_from_slice(&body);
        Ok(framed.freeze())
    }

    /// Decodes a frame body (without the length prefix).
    pub fn decode(mut body: Bytes) -> Result<Frame, ProtocolError> {
        if !body.has_remaining() {
            return Err(ProtocolError::EmptyFrame);
        }
        match body.get_u8() {
            TYPE_HANDSHAKE => Ok(Frame::Handshake {
                environment: get_sized(&mut body)?,
                server_id: get_sized(&mut body)?,
                token: get_sized(&mut body)?,
            }),
            TYPE_DATA => {
                let target = get_sized(&mut body)?;
                let source = get_sized(&mut body)?;
                Ok(Frame::Data {
                    target,
                    source,
                    payload: body,
                })
            }
            TYPE_HANDSHAKE_ACK => Ok(Frame::HandshakeAck {
                server_id: get_sized(&mut body)?,
            }),
            other => Err(ProtocolError::UnknownType(other)),
        }
    }
}

fn put_sized(buf: &mut BytesMut, value: &str) -> Result<(), ProtocolError> {
    let bytes = value.as_bytes();
    if bytes.len() > MAX_FIELD_LEN {
        return Err(ProtocolError::FieldTooLong(bytes.len()));
    }
    buf.put_u16(bytes.len() as u16);
    buf.put_slice(bytes);
    Ok(())
}

fn get_sized(buf: &mut Bytes) -> Result<String, ProtocolError> {
    if buf.remaining() < 2 {
        return Err(ProtocolError::Truncated);
    }
    let len = buf.get_u16() as usize;
    if buf.remaining() < len {
        return Err(ProtocolError::Truncated);
    }
    let raw = buf.split_to(len);
    String::from_utf8(raw.to_vec()).map_err(|_| ProtocolError::InvalidUtf8)
}

/// Reads one frame. Returns `Ok(None)` on a clean end of stream.
pub async fn read_frame<R>(reader: &mut R) -> Result<Option<Frame>, ProtocolError>
where
    R: AsyncRead + Unpin,
{
    let mut len_buf = [0u8; 4];
    match reader.read_exact(&mut len_buf).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    }

    let len = u32::from_be_bytes(len_buf) as usize;
    if len > MAX_FRAME_LEN {
        return Err(ProtocolError::FrameTooLarge(len));
    }
    let mut body = vec![0u8; len];
    reader.read_exact(&mut body).await?;
    Frame::decode(Bytes::from(body)).map(Some)
}

/// Writes pre-encoded frame bytes and flushes.
pub async fn write_encoded<W>(writer: &mut W, encoded: &[u8]) -> Result<(), ProtocolError>
where
    W: AsyncWrite + Unpin,
{
    writer.write_all(encoded).await?;
    writer.flush().await?;
    Ok(())
}

pub async fn write_frame<W>(writer: &mut W, frame: &Frame) -> Result<(), ProtocolError>
where
    W: AsyncWrite + Unpin,
{
    write_encoded(writer, &frame.encode()?).await
}

/// Time of the last frame read or written on a connection.
///
/// A connection is idle only when neither direction has moved for the whole
/// idle timeout.
#[derive(Debug)]
pub struct Activity {
    origin: Instant,
    last_millis: AtomicU64,
}

impl Activity {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
            last_millis: AtomicU64::new(0),
        }
    }

    pub fn touch(&self) {
        let now = self.origin.elapsed().as_millis() as u64;
        self.last_millis.fetch_max(now, Ordering::Relaxed);
    }

    pub fn idle_for(&self) -> Duration {
        let last = Duration::from_millis(self.last_millis.load(Ordering::Relaxed));
        self.origin.elapsed().saturating_sub(last)
    }

    /// Resolves once nothing has been read or written for `timeout`.
    pub async fn expired(&self, timeout: Duration) {
        loop {
            let remaining = timeout.saturating_sub(self.idle_for());
            if remaining.is_zero() {
                return;
            }
            tokio::time::sleep(remaining).await;
        }
    }
}

impl Default for Activity {
    fn default() -> Self {
        Self::new()
    }
}

/// Reads frames into `frames` until the stream ends or the receiver is dropped.
///
/// Every frame read counts as activity.
pub async fn read_frames<R>(mut reader: R, frames: mpsc::Sender<Frame>, activity: Arc<Activity>)
where
    R: AsyncRead + Unpin,
{
    loop {
        match read_frame(&mut reader).await {
            Ok(Some(frame)) => {
                activity.touch();
                if frames.send(frame).await.is_err() {
                    return;
                }
            }
            Ok(None) => return,
            Err(e) => {
                warn!("Realtime read failed: {}", e);
                return;
            }
        }
    }
}
