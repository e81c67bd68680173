//! Frame codec for the peer forwarding protocol.
//!
//! Each frame is `[4-byte signed length, little-endian][1-byte compressed
//! flag][payload]`. The payload is UTF-8 text with metric lines joined by
//! newlines, gzip-compressed when the flag is set. A single `0x00` byte in
//! place of a frame is the sentinel for a peer that is closing; receivers
//! must check the first byte before committing to read a full frame.

use std::io::{Read, Write};

use bytes::{BufMut, Bytes, BytesMut};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use tokio::io::{AsyncRead, AsyncReadExt};

/// First byte announcing that the peer is closing the connection.
pub const CLOSE_SENTINEL: u8 = 0x00;

/// An error while reading or decoding a frame.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    /// The underlying stream failed or ended mid-frame.
    #[error("failed to read frame")]
    Io(#[from] std::io::Error),

    /// The length prefix is negative.
    #[error("invalid frame length {0}")]
    InvalidLength(i32),

    /// The payload is not valid UTF-8 after decompression.
    #[error("frame payload is not valid utf-8")]
    InvalidPayload(#[from] std::string::FromUtf8Error),
}

/// Encodes one payload into a frame.
///
/// The payload is compressed when compression is enabled and the payload
/// size is at or above `threshold` bytes.
pub fn encode_frame(payload: &[u8], enable_compression: bool, threshold: usize) -> Bytes {
    let compress = enable_compression && payload.len() >= threshold;

    let body = if compress {
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        // Writing to a Vec cannot fail.
        encoder.write_all(payload).and_then(|_| encoder.finish()).unwrap_or_default()
    } else {
        payload.to_vec()
    };

    let mut frame = BytesMut::with_capacity(5 + body.len());
    frame.put_i32_le(body.len() as i32);
    frame.put_u8(u8::from(compress));
    frame.put_slice(&body);
    frame.freeze()
}

/// Renders metric lines into the newline-joined frame payload.
pub fn join_lines(lines: &[String]) -> String {
    lines.join("\n")
}

/// Reads one frame and returns its metric lines.
///
/// Returns `None` on the close sentinel or when the stream ends cleanly
/// between frames. Empty lines in the payload are skipped.
pub async fn read_frame<R>(reader: &mut R) -> Result<Option<Vec<String>>, FrameError>
where
    R: AsyncRead + Unpin,
{
    let mut first = [0u8; 1];
    match reader.read(&mut first).await? {
        0 => return Ok(None),
        _ if first[0] == CLOSE_SENTINEL => return Ok(None),
        _ => {}
    }

    let mut rest = [0u8; 3];
    reader.read_exact(&mut rest).await?;
    let length = i32::from_le_bytes([first[0], rest[0], rest[1], rest[2]]);
    if length < 0 {
        return Err(FrameError::InvalidLength(length));
    }

    let compressed = reader.read_u8().await? != 0;

    let mut body = vec![0u8; length as usize];
    reader.read_exact(&mut body).await?;

    let payload = if compressed {
        let mut decoder = GzDecoder::new(body.as_slice());
        let mut decompressed = Vec::new();
        decoder.read_to_end(&mut decompressed)?;
        decompressed
    } else {
        body
    };

    let text = String::from_utf8(payload)?;
    let lines = text
        .lines()
        .filter(|line| !line.is_empty())
        .map(str::to_owned)
        .collect();

    Ok(Some(lines))
}

#[cfg(test)]
mod tests {
    use similar_asserts::assert_eq;

    use super::*;

    fn lines(count: usize) -> Vec<String> {
        (0..count).map(|i| format!("metric.{i}:1|c")).collect()
    }

    async fn roundtrip(frame: Bytes) -> Option<Vec<String>> {
        let mut reader = frame.as_ref();
        read_frame(&mut reader).await.unwrap()
    }

    #[tokio::test]
    async fn test_small_payload_uncompressed() {
        let lines = lines(2);
        let payload = join_lines(&lines);
        assert!(payload.len() < 350);

        let frame = encode_frame(payload.as_bytes(), true, 350);
        assert_eq!(frame[4], 0);
        assert_eq!(
            i32::from_le_bytes([frame[0], frame[1], frame[2], frame[3]]) as usize,
            payload.len()
        );

        assert_eq!(roundtrip(frame).await, Some(lines));
    }

    #[tokio::test]
    async fn test_large_payload_compressed() {
        let lines = lines(100);
        let payload = join_lines(&lines);
        assert!(payload.len() >= 350);

        let frame = encode_frame(payload.as_bytes(), true, 350);
        assert_eq!(frame[4], 1);

        assert_eq!(roundtrip(frame).await, Some(lines));
    }

    #[tokio::test]
    async fn test_compression_disabled() {
        let lines = lines(100);
        let payload = join_lines(&lines);

        let frame = encode_frame(payload.as_bytes(), false, 350);
        assert_eq!(frame[4], 0);

        assert_eq!(roundtrip(frame).await, Some(lines));
    }

    #[tokio::test]
    async fn test_threshold_boundary() {
        let payload = "x".repeat(350);
        let frame = encode_frame(payload.as_bytes(), true, 350);
        assert_eq!(frame[4], 1);

        let payload = "x".repeat(349);
        let frame = encode_frame(payload.as_bytes(), true, 350);
        assert_eq!(frame[4], 0);
    }

    #[tokio::test]
    async fn test_close_sentinel() {
        let mut reader = [CLOSE_SENTINEL].as_ref();
        assert_eq!(read_frame(&mut reader).await.unwrap(), None);

        let mut reader = [].as_ref();
        assert_eq!(read_frame(&mut reader).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_truncated_frame_fails() {
        let frame = encode_frame(b"foo:1|c", false, 350);
        let mut reader = &frame[..frame.len() - 2];
        assert!(matches!(
            read_frame(&mut reader).await,
            Err(FrameError::Io(_))
        ));
    }

    #[tokio::test]
    async fn test_multiple_frames_in_sequence() {
        let first = encode_frame(b"a:1|c", false, 350);
        let second = encode_frame(b"b:2|c", false, 350);

        let mut stream = Vec::new();
        stream.extend_from_slice(&first);
        stream.extend_from_slice(&second);
        stream.push(CLOSE_SENTINEL);

        let mut reader = stream.as_slice();
        assert_eq!(
            read_frame(&mut reader).await.unwrap(),
            Some(vec!["a:1|c".to_owned()])
        );
        assert_eq!(
            read_frame(&mut reader).await.unwrap(),
            Some(vec!["b:2|c".to_owned()])
        );
        assert_eq!(read_frame(&mut reader).await.unwrap(), None);
    }
}
