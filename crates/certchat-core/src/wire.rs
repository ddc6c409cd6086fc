//! Length-prefixed message framing
//!
//! Frame layout:
//! ```text
//! [4 bytes: payload length, u32 little-endian][N bytes: JSON-encoded Message]
//! ```

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::{CertChatError, CertChatResult};
use crate::types::Message;

/// Default upper bound for a single frame (1 MiB)
pub const DEFAULT_MAX_FRAME_BYTES: usize = 1024 * 1024;

/// Serialize a message into a complete frame (header + body).
pub fn encode_frame(message: &Message, max_frame_bytes: usize) -> CertChatResult<Vec<u8>> {
    let body = serde_json::to_vec(message)
        .map_err(|e| CertChatError::Protocol(format!("serializing message: {e}")))?;
    if body.len() > max_frame_bytes || body.len() > u32::MAX as usize {
        return Err(CertChatError::FrameTooLarge {
            len: body.len(),
            max: max_frame_bytes,
        });
    }

    let mut frame = Vec::with_capacity(4 + body.len());
    frame.extend_from_slice(&(body.len() as u32).to_le_bytes());
    frame.extend_from_slice(&body);
    Ok(frame)
}

/// Write one message as a single frame and flush.
pub async fn write_message<W>(
    writer: &mut W,
    message: &Message,
    max_frame_bytes: usize,
) -> CertChatResult<()>
where
    W: AsyncWrite + Unpin,
{
    let frame = encode_frame(message, max_frame_bytes)?;
    writer.write_all(&frame).await?;
    writer.flush().await?;
    Ok(())
}

/// Read the next complete message.
///
/// Returns `Ok(None)` when the peer closes the stream on a frame boundary.
pub async fn read_message<R>(reader: &mut R, max_frame_bytes: usize) -> CertChatResult<Option<Message>>
where
    R: AsyncRead + Unpin,
{
    let len = match reader.read_u32_le().await {
        Ok(len) => len as usize,
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    if len > max_frame_bytes {
        return Err(CertChatError::FrameTooLarge {
            len,
            max: max_frame_bytes,
        });
    }

    let mut body = vec![0u8; len];
    reader.read_exact(&mut body).await?;
    serde_json::from_slice(&body)
        .map(Some)
        .map_err(|e| CertChatError::Protocol(format!("decoding message: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::MessageType;

    #[tokio::test]
    async fn frames_preserve_order() {
        let (mut client, mut server) = tokio::io::duplex(4096);
        let first = Message::to(MessageType::Register, b"alice".to_vec(), "alice", "Server");
        let second = Message::to(MessageType::Logout, b"alice".to_vec(), "alice", "Server");

        write_message(&mut client, &first, DEFAULT_MAX_FRAME_BYTES).await.unwrap();
        write_message(&mut client, &second, DEFAULT_MAX_FRAME_BYTES).await.unwrap();
        drop(client);

        let got1 = read_message(&mut server, DEFAULT_MAX_FRAME_BYTES).await.unwrap();
        let got2 = read_message(&mut server, DEFAULT_MAX_FRAME_BYTES).await.unwrap();
        let eof = read_message(&mut server, DEFAULT_MAX_FRAME_BYTES).await.unwrap();

        assert_eq!(got1, Some(first));
        assert_eq!(got2, Some(second));
        assert_eq!(eof, None);
    }

    #[tokio::test]
    async fn oversized_frame_is_rejected_on_read() {
        let (mut client, mut server) = tokio::io::duplex(64);
        client.write_all(&(4096u32).to_le_bytes()).await.unwrap();

        let err = read_message(&mut server, 1024).await.unwrap_err();
        assert!(matches!(err, CertChatError::FrameTooLarge { len: 4096, max: 1024 }));
    }

    #[test]
    fn oversized_frame_is_rejected_on_encode() {
        let msg = Message::to(MessageType::UserMessage, vec![0u8; 2048], "bob", "alice");
        assert!(matches!(
            encode_frame(&msg, 128),
            Err(CertChatError::FrameTooLarge { max: 128, .. })
        ));
    }

    #[tokio::test]
    async fn truncated_body_is_an_io_error() {
        let (mut client, mut server) = tokio::io::duplex(64);
        client.write_all(&(32u32).to_le_bytes()).await.unwrap();
        client.write_all(b"{\"kind\"").await.unwrap();
        drop(client);

        let err = read_message(&mut server, DEFAULT_MAX_FRAME_BYTES).await.unwrap_err();
        assert!(matches!(err, CertChatError::Io(_)));
    }

    #[tokio::test]
    async fn garbage_body_is_a_protocol_error() {
        let (mut client, mut server) = tokio::io::duplex(64);
        client.write_all(&(3u32).to_le_bytes()).await.unwrap();
        client.write_all(b"abc").await.unwrap();

        let err = read_message(&mut server, DEFAULT_MAX_FRAME_BYTES).await.unwrap_err();
        assert!(matches!(err, CertChatError::Protocol(_)));
    }
}
