//! Frame Codec
//!
//! Length-prefixed message framing for stream transports. Each frame is
//! a 4-byte big-endian length followed by the bincode-encoded
//! `WireMessage`. WebSocket transports skip the prefix and carry the
//! bare body in one binary frame.

use crate::error::{Result, WireError};
use crate::message::WireMessage;
use bytes::{BufMut, Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Encode a message body without the length prefix (WebSocket path)
pub fn encode_body(message: &WireMessage) -> Result<Vec<u8>> {
    bincode::serialize(message).map_err(WireError::Encode)
}

/// Decode a bare message body (WebSocket path)
pub fn decode_body(body: &[u8]) -> Result<WireMessage> {
    bincode::deserialize(body).map_err(WireError::Decode)
}

/// Encode a message as one length-prefixed frame
pub fn encode_frame(message: &WireMessage, max_frame_size: usize) -> Result<Bytes> {
    let body = encode_body(message)?;
    if body.len() > max_frame_size {
        return Err(WireError::FrameTooLarge {
            size: body.len(),
            limit: max_frame_size,
        });
    }

    let mut frame = BytesMut::with_capacity(4 + body.len());
    frame.put_u32(body.len() as u32);
    frame.extend_from_slice(&body);
    Ok(frame.freeze())
}

/// Write one framed message to a stream
pub async fn write_frame<W: AsyncWrite + Unpin>(
    stream: &mut W,
    message: &WireMessage,
    max_frame_size: usize,
) -> Result<()> {
    let frame = encode_frame(message, max_frame_size)?;
    stream.write_all(&frame).await?;
    stream.flush().await?;
    Ok(())
}

/// Read one framed message from a stream.
///
/// Returns `Ok(None)` on a clean EOF at a frame boundary; an EOF in the
/// middle of a frame is an I/O error.
pub async fn read_frame<R: AsyncRead + Unpin>(
    stream: &mut R,
    max_frame_size: usize,
) -> Result<Option<WireMessage>> {
    let mut len_bytes = [0u8; 4];
    match stream.read_exact(&mut len_bytes).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    }

    let body_len = u32::from_be_bytes(len_bytes) as usize;
    if body_len > max_frame_size {
        return Err(WireError::FrameTooLarge {
            size: body_len,
            limit: max_frame_size,
        });
    }

    let mut body = vec![0u8; body_len];
    stream.read_exact(&mut body).await?;
    decode_body(&body).map(Some)
}
