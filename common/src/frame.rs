use bytes::{Buf, BufMut, Bytes, BytesMut};

/// Size of the length header in front of every frame.
pub const HEADER_SIZE: usize = 8;

/// Largest declared frame length a [`FrameReader`] accepts by default.
pub const DEFAULT_MAX_FRAME_LEN: u64 = 16 * 1024 * 1024;

/// A compressed camera image on its way to a viewer.
///
/// Binary wire format (one WebSocket message per frame):
///   [0..8]   len        (u64 little-endian, byte length of the image)
///   [8..]    jpeg_data  (exactly `len` bytes)
///
/// `captured_at_ms` and `seq` are carried for logging only and never hit
/// the wire.
#[derive(Debug, Clone)]
pub struct Frame {
    jpeg: Bytes,
    pub captured_at_ms: i64,
    pub seq: u64,
}

impl Frame {
    pub fn new(jpeg: impl Into<Bytes>, captured_at_ms: i64, seq: u64) -> Self {
        Self {
            jpeg: jpeg.into(),
            captured_at_ms,
            seq,
        }
    }

    pub fn payload(&self) -> &[u8] {
        &self.jpeg
    }

    pub fn len(&self) -> usize {
        self.jpeg.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jpeg.is_empty()
    }

    /// The framed message: length header followed by the image bytes.
    pub fn to_message(&self) -> Bytes {
        encode_frame(&self.jpeg)
    }
}

/// Prefix `payload` with its length as an 8-byte little-endian integer.
pub fn encode_frame(payload: &[u8]) -> Bytes {
    let mut buf = BytesMut::with_capacity(HEADER_SIZE + payload.len());
    buf.put_u64_le(payload.len() as u64);
    buf.put_slice(payload);
    buf.freeze()
}

/// Split a single framed message back into its payload.
///
/// The message must hold exactly one frame: a complete header and exactly
/// the number of payload bytes the header declares.
pub fn decode_frame(message: &[u8]) -> Result<&[u8], FrameError> {
    if message.len() < HEADER_SIZE {
        return Err(FrameError::TooShort {
            got: message.len(),
            expected: HEADER_SIZE,
        });
    }
    let declared = read_header(&message[..HEADER_SIZE]);
    let body = &message[HEADER_SIZE..];
    if body.len() as u64 != declared {
        return Err(FrameError::LengthMismatch {
            declared,
            actual: body.len(),
        });
    }
    Ok(body)
}

fn read_header(header: &[u8]) -> u64 {
    let mut raw = [0u8; HEADER_SIZE];
    raw.copy_from_slice(&header[..HEADER_SIZE]);
    u64::from_le_bytes(raw)
}

/// Reassembles frames from a byte stream delivered in arbitrary chunks.
pub struct FrameReader {
    buffer: BytesMut,
    max_len: u64,
}

impl FrameReader {
    pub fn new() -> Self {
        Self::with_max_len(DEFAULT_MAX_FRAME_LEN)
    }

    pub fn with_max_len(max_len: u64) -> Self {
        Self {
            buffer: BytesMut::with_capacity(64 * 1024),
            max_len,
        }
    }

    /// Append received bytes.
    pub fn push(&mut self, chunk: &[u8]) {
        self.buffer.extend_from_slice(chunk);
    }

    /// Pop the next complete frame payload, if one has fully arrived.
    ///
    /// A header declaring more than `max_len` bytes is an error; the stream
    /// is unrecoverable after that because frame boundaries are lost.
    pub fn next_frame(&mut self) -> Result<Option<Bytes>, FrameError> {
        if self.buffer.len() < HEADER_SIZE {
            return Ok(None);
        }
        let declared = read_header(&self.buffer[..HEADER_SIZE]);
        if declared > self.max_len {
            return Err(FrameError::TooLarge {
                declared,
                max: self.max_len,
            });
        }
        let len = declared as usize;
        if self.buffer.len() < HEADER_SIZE + len {
            return Ok(None);
        }
        self.buffer.advance(HEADER_SIZE);
        Ok(Some(self.buffer.split_to(len).freeze()))
    }

    /// Bytes received but not yet returned as a frame.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }
}

impl Default for FrameReader {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("frame message too short: got {got} bytes, expected at least {expected}")]
    TooShort { got: usize, expected: usize },
    #[error("frame header declares {declared} bytes but {actual} bytes follow")]
    LengthMismatch { declared: u64, actual: usize },
    #[error("frame header declares {declared} bytes, above the {max} byte limit")]
    TooLarge { declared: u64, max: u64 },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_is_little_endian_length() {
        let msg = encode_frame(&[0xFF, 0xD8, 0xFF, 0xD9, 0x00]);
        assert_eq!(msg.len(), HEADER_SIZE + 5);
        assert_eq!(&msg[..HEADER_SIZE], &[5, 0, 0, 0, 0, 0, 0, 0]);
        assert_eq!(&msg[HEADER_SIZE..], &[0xFF, 0xD8, 0xFF, 0xD9, 0x00]);
    }

    #[test]
    fn frame_message_matches_encode() {
        let frame = Frame::new(vec![1u8, 2, 3], 1708300000000, 7);
        assert_eq!(frame.len(), 3);
        assert_eq!(frame.to_message(), encode_frame(&[1, 2, 3]));
    }

    #[test]
    fn decode_single_message() {
        let payload: Vec<u8> = (0..=255u8).collect();
        let msg = encode_frame(&payload);
        assert_eq!(decode_frame(&msg).unwrap(), payload.as_slice());
    }

    #[test]
    fn decode_empty_payload() {
        let msg = encode_frame(&[]);
        assert!(decode_frame(&msg).unwrap().is_empty());
    }

    #[test]
    fn decode_too_short() {
        let result = decode_frame(&[1, 0, 0]);
        assert!(matches!(result, Err(FrameError::TooShort { got: 3, .. })));
    }

    #[test]
    fn decode_truncated_body() {
        let mut msg = encode_frame(&[9; 10]).to_vec();
        msg.truncate(HEADER_SIZE + 4);
        let result = decode_frame(&msg);
        assert!(matches!(
            result,
            Err(FrameError::LengthMismatch {
                declared: 10,
                actual: 4
            })
        ));
    }

    #[test]
    fn reader_reassembles_chunked_stream() {
        let payloads: Vec<Vec<u8>> = vec![
            vec![],
            vec![0xAB],
            (0..1000).map(|i| (i % 251) as u8).collect(),
            vec![0x42; 70_000],
        ];
        let mut stream = Vec::new();
        for p in &payloads {
            stream.extend_from_slice(&encode_frame(p));
        }

        for chunk_size in [1usize, 3, 7, 4096, stream.len()] {
            let mut reader = FrameReader::new();
            let mut out = Vec::new();
            for chunk in stream.chunks(chunk_size) {
                reader.push(chunk);
                while let Some(frame) = reader.next_frame().unwrap() {
                    out.push(frame.to_vec());
                }
            }
            assert_eq!(out, payloads, "chunk size {chunk_size}");
            assert_eq!(reader.buffered(), 0);
        }
    }

    #[test]
    fn reader_waits_for_full_body() {
        let msg = encode_frame(&[1, 2, 3, 4]);
        let mut reader = FrameReader::new();
        reader.push(&msg[..HEADER_SIZE + 2]);
        assert!(reader.next_frame().unwrap().is_none());
        reader.push(&msg[HEADER_SIZE + 2..]);
        assert_eq!(reader.next_frame().unwrap().unwrap().as_ref(), &[1, 2, 3, 4]);
    }

    #[test]
    fn reader_rejects_oversized_header() {
        let mut reader = FrameReader::with_max_len(16);
        reader.push(&encode_frame(&[0; 17]));
        assert!(matches!(
            reader.next_frame(),
            Err(FrameError::TooLarge { declared: 17, max: 16 })
        ));
    }
}
