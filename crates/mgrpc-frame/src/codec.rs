use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::error::FrameError;
use crate::frame::Frame;

/// Length prefix: 4-byte little-endian payload size.
pub const HEADER_SIZE: usize = 4;

/// Default maximum payload size: 16 MiB.
pub const DEFAULT_MAX_PAYLOAD: usize = 16 * 1024 * 1024;

/// Delimiter surrounding each frame on a serial line.
pub const SERIAL_DELIMITER: &[u8] = b"\"\"\"";

/// Length-prefixed JSON framing for stream transports (TCP).
///
/// Wire format:
/// ```text
/// ┌──────────────┬──────────────────────┐
/// │ Length       │ JSON frame           │
/// │ (4B LE)      │ (Length bytes)       │
/// └──────────────┴──────────────────────┘
/// ```
#[derive(Debug, Clone)]
pub struct LengthPrefixedCodec {
    max_payload: usize,
}

impl LengthPrefixedCodec {
    pub fn new() -> Self {
        Self::with_max_payload(DEFAULT_MAX_PAYLOAD)
    }

    pub fn with_max_payload(max_payload: usize) -> Self {
        Self { max_payload }
    }

    pub fn max_payload(&self) -> usize {
        self.max_payload
    }
}

impl Default for LengthPrefixedCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for LengthPrefixedCodec {
    type Item = Frame;
    type Error = FrameError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Frame>, FrameError> {
        if src.len() < HEADER_SIZE {
            return Ok(None);
        }

        let mut header = [0u8; HEADER_SIZE];
        header.copy_from_slice(&src[..HEADER_SIZE]);
        let payload_len = u32::from_le_bytes(header) as usize;

        if payload_len > self.max_payload {
            return Err(FrameError::PayloadTooLarge {
                size: payload_len,
                max: self.max_payload,
            });
        }

        let total = HEADER_SIZE + payload_len;
        if src.len() < total {
            src.reserve(total - src.len());
            return Ok(None);
        }

        src.advance(HEADER_SIZE);
        let payload = src.split_to(payload_len);
        Frame::from_json(&payload).map(Some)
    }

    fn decode_eof(&mut self, buf: &mut BytesMut) -> Result<Option<Frame>, FrameError> {
        match self.decode(buf)? {
            Some(frame) => Ok(Some(frame)),
            None if buf.is_empty() => Ok(None),
            None => Err(FrameError::ConnectionClosed),
        }
    }
}

impl Encoder<Frame> for LengthPrefixedCodec {
    type Error = FrameError;

    fn encode(&mut self, frame: Frame, dst: &mut BytesMut) -> Result<(), FrameError> {
        let payload = frame.to_json()?;
        let max = self.max_payload.min(u32::MAX as usize);
        if payload.len() > max {
            return Err(FrameError::PayloadTooLarge {
                size: payload.len(),
                max,
            });
        }
        dst.reserve(HEADER_SIZE + payload.len());
        dst.put_u32_le(payload.len() as u32);
        dst.put_slice(&payload);
        Ok(())
    }
}

/// One decoded unit from a serial line.
#[derive(Debug, Clone, PartialEq)]
pub enum SerialItem {
    /// A complete protocol frame.
    Frame(Frame),
    /// Bytes outside any frame (boot logs, console output, corrupted frames).
    Junk(Bytes),
}

/// `"""`-delimited JSON framing for serial lines.
///
/// Anything the device prints between frames is surfaced as
/// [`SerialItem::Junk`] instead of failing the stream.
#[derive(Debug, Clone)]
pub struct SerialFrameCodec {
    max_payload: usize,
    in_frame: bool,
}

impl SerialFrameCodec {
    pub fn new() -> Self {
        Self::with_max_payload(DEFAULT_MAX_PAYLOAD)
    }

    pub fn with_max_payload(max_payload: usize) -> Self {
        Self {
            max_payload,
            in_frame: false,
        }
    }
}

impl Default for SerialFrameCodec {
    fn default() -> Self {
        Self::new()
    }
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

impl Decoder for SerialFrameCodec {
    type Item = SerialItem;
    type Error = FrameError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<SerialItem>, FrameError> {
        loop {
            if !self.in_frame {
                match find(src, SERIAL_DELIMITER) {
                    Some(0) => {
                        src.advance(SERIAL_DELIMITER.len());
                        self.in_frame = true;
                    }
                    Some(pos) => return Ok(Some(SerialItem::Junk(src.split_to(pos).freeze()))),
                    None => {
                        // The tail may be the first bytes of a delimiter.
                        let keep = SERIAL_DELIMITER.len() - 1;
                        if src.len() > keep {
                            let junk = src.split_to(src.len() - keep).freeze();
                            return Ok(Some(SerialItem::Junk(junk)));
                        }
                        return Ok(None);
                    }
                }
            }

            let Some(end) = find(src, SERIAL_DELIMITER) else {
                if src.len() > self.max_payload + SERIAL_DELIMITER.len() {
                    let size = src.len();
                    src.clear();
                    self.in_frame = false;
                    return Err(FrameError::PayloadTooLarge {
                        size,
                        max: self.max_payload,
                    });
                }
                return Ok(None);
            };

            let body = src.split_to(end).freeze();
            src.advance(SERIAL_DELIMITER.len());
            self.in_frame = false;

            if body.is_empty() {
                continue;
            }
            return Ok(Some(match Frame::from_json(&body) {
                Ok(frame) => SerialItem::Frame(frame),
                Err(err) => {
                    tracing::debug!(error = %err, len = body.len(), "undecodable serial frame");
                    SerialItem::Junk(body)
                }
            }));
        }
    }

    fn decode_eof(&mut self, buf: &mut BytesMut) -> Result<Option<SerialItem>, FrameError> {
        if let Some(item) = self.decode(buf)? {
            return Ok(Some(item));
        }
        if buf.is_empty() {
            return Ok(None);
        }
        if self.in_frame {
            return Err(FrameError::ConnectionClosed);
        }
        Ok(Some(SerialItem::Junk(buf.split().freeze())))
    }
}

impl Encoder<Frame> for SerialFrameCodec {
    type Error = FrameError;

    fn encode(&mut self, frame: Frame, dst: &mut BytesMut) -> Result<(), FrameError> {
        let payload = frame.to_json()?;
        if payload.len() > self.max_payload {
            return Err(FrameError::PayloadTooLarge {
                size: payload.len(),
                max: self.max_payload,
            });
        }
        dst.reserve(payload.len() + 2 * SERIAL_DELIMITER.len());
        dst.put_slice(SERIAL_DELIMITER);
        dst.put_slice(&payload);
        dst.put_slice(SERIAL_DELIMITER);
        Ok(())
    }
}
