//! Length-prefixed bincode framing over a reliable byte stream.
//!
//! Each frame is a little-endian `u32` body length followed by the
//! bincode-encoded packet.

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::io;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Largest frame body either side accepts.
pub const MAX_FRAME_SIZE: usize = 1 << 20;

const HEADER_SIZE: usize = 4;

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("frame of {0} bytes exceeds the {max} byte limit", max = MAX_FRAME_SIZE)]
    FrameTooLarge(usize),
    #[error("malformed packet: {0}")]
    Bincode(#[from] bincode::Error),
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),
}

/// Encodes `packet` into a complete frame, header included.
pub fn encode_frame<T: Serialize>(packet: &T) -> Result<Vec<u8>, CodecError> {
    let body = bincode::serialize(packet)?;
    if body.len() > MAX_FRAME_SIZE {
        return Err(CodecError::FrameTooLarge(body.len()));
    }

    let mut frame = Vec::with_capacity(HEADER_SIZE + body.len());
    frame.extend_from_slice(&(body.len() as u32).to_le_bytes());
    frame.extend_from_slice(&body);
    Ok(frame)
}

/// Decodes one frame body (without the length header).
pub fn decode_frame<T: DeserializeOwned>(body: &[u8]) -> Result<T, CodecError> {
    Ok(bincode::deserialize(body)?)
}

/// Reads the next frame. Returns `Ok(None)` when the stream ends cleanly
/// between frames.
pub async fn read_frame<R, T>(reader: &mut R) -> Result<Option<T>, CodecError>
where
    R: AsyncRead + Unpin,
    T: DeserializeOwned,
{
    let len = match reader.read_u32_le().await {
        Ok(len) => len as usize,
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    if len > MAX_FRAME_SIZE {
        return Err(CodecError::FrameTooLarge(len));
    }

    let mut body = vec![0u8; len];
    reader.read_exact(&mut body).await?;
    decode_frame(&body).map(Some)
}

pub async fn write_frame<W, T>(writer: &mut W, packet: &T) -> Result<(), CodecError>
where
    W: AsyncWrite + Unpin,
    T: Serialize,
{
    let frame = encode_frame(packet)?;
    writer.write_all(&frame).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ClientPacket, ErrorCode, ServerPacket};

    #[test]
    fn test_frame_header_matches_body() {
        let frame = encode_frame(&ServerPacket::Shutdown).unwrap();
        let len = u32::from_le_bytes([frame[0], frame[1], frame[2], frame[3]]) as usize;
        assert_eq!(len, frame.len() - HEADER_SIZE);

        let decoded: ServerPacket = decode_frame(&frame[HEADER_SIZE..]).unwrap();
        assert_eq!(decoded, ServerPacket::Shutdown);
    }

    #[test]
    fn test_oversized_frame_rejected() {
        let packet = ClientPacket::Quit {
            reason: "x".repeat(MAX_FRAME_SIZE + 1),
        };
        assert!(matches!(
            encode_frame(&packet),
            Err(CodecError::FrameTooLarge(_))
        ));
    }

    #[test]
    fn test_truncated_body_is_malformed() {
        let frame = encode_frame(&ServerPacket::Error {
            code: ErrorCode::Kicked,
        })
        .unwrap();
        let body = &frame[HEADER_SIZE..frame.len() - 1];
        assert!(decode_frame::<ServerPacket>(body).is_err());
    }

    #[tokio::test]
    async fn test_stream_roundtrip_and_clean_eof() {
        let (mut a, mut b) = tokio::io::duplex(4096);

        write_frame(&mut a, &ClientPacket::SnapshotAck).await.unwrap();
        write_frame(&mut a, &ClientPacket::Ack { tick: 17 }).await.unwrap();
        drop(a);

        let first: Option<ClientPacket> = read_frame(&mut b).await.unwrap();
        let second: Option<ClientPacket> = read_frame(&mut b).await.unwrap();
        let end: Option<ClientPacket> = read_frame(&mut b).await.unwrap();

        assert_eq!(first, Some(ClientPacket::SnapshotAck));
        assert_eq!(second, Some(ClientPacket::Ack { tick: 17 }));
        assert_eq!(end, None);
    }

    #[tokio::test]
    async fn test_frame_split_across_reads() {
        let frame = encode_frame(&ClientPacket::Ack { tick: 99 }).unwrap();
        let mut reader = tokio_test::io::Builder::new()
            .read(&frame[..3])
            .read(&frame[3..6])
            .read(&frame[6..])
            .build();

        let packet: Option<ClientPacket> = read_frame(&mut reader).await.unwrap();
        assert_eq!(packet, Some(ClientPacket::Ack { tick: 99 }));
        let end: Option<ClientPacket> = read_frame(&mut reader).await.unwrap();
        assert_eq!(end, None);
    }

    #[tokio::test]
    async fn test_stream_rejects_oversized_header() {
        let (mut a, mut b) = tokio::io::duplex(64);
        a.write_all(&((MAX_FRAME_SIZE as u32) + 1).to_le_bytes())
            .await
            .unwrap();

        let result: Result<Option<ClientPacket>, _> = read_frame(&mut b).await;
        assert!(matches!(result, Err(CodecError::FrameTooLarge(_))));
    }
}
