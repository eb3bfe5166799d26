//! gRPC / gRPC-Web Message Framing (5-byte header)
//!
//! ネイティブ gRPC と gRPC-Web は同じ 5 バイトのフレームヘッダーを共有します:
//!
//! ```text
//! +------------------+
//! | 1 byte: flags    |  0x80 = trailer frame, 0x01 = compressed
//! +------------------+
//! | 4 bytes: length  |  big-endian payload length
//! +------------------+
//! | N bytes: payload |  message bytes or serialized trailers
//! +------------------+
//! ```
//!
//! gRPC-Web はトレーラーを HTTP/2 trailers ではなく、ボディ末尾の
//! トレーラーフレーム (flags = 0x80) として送信します。
//!
//! ## 使用例
//!
//! ```rust,ignore
//! use veil_grpc_web::grpc::framing::{encode_data_frame, decode_frame};
//!
//! let encoded = encode_data_frame(b"hello");
//! let (frame, consumed) = decode_frame(&encoded, GRPC_MAX_MESSAGE_SIZE)?;
//! assert!(frame.is_data());
//! ```

use bytes::{BufMut, Bytes, BytesMut};

use crate::grpc::trailers::TrailerSet;

/// Frame header size (1 byte flags + 4 bytes length)
pub const GRPC_FRAME_HEADER_SIZE: usize = 5;

/// Default maximum frame payload size (4MB)
pub const GRPC_MAX_MESSAGE_SIZE: usize = 4 * 1024 * 1024;

/// Flag bit marking a trailer frame
pub const FLAG_TRAILER: u8 = 0x80;

/// Flag bit marking a compressed message
pub const FLAG_COMPRESSED: u8 = 0x01;

/// Frame codec errors
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrameError {
    /// Stream ended mid-header or mid-payload
    InsufficientData {
        /// Required bytes
        required: usize,
        /// Available bytes
        available: usize,
    },
    /// Declared length exceeds the configured maximum
    MessageTooLarge {
        /// Declared size
        size: usize,
        /// Maximum allowed
        max: usize,
    },
}

impl std::fmt::Display for FrameError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InsufficientData { required, available } => {
                write!(f, "Insufficient data: need {} bytes, have {}", required, available)
            }
            Self::MessageTooLarge { size, max } => {
                write!(f, "Message too large: {} bytes (max: {})", size, max)
            }
        }
    }
}

impl std::error::Error for FrameError {}

/// A single length-prefixed frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Raw flags byte
    pub flags: u8,
    /// Payload
    pub data: Bytes,
}

impl Frame {
    /// Create an uncompressed data frame
    pub fn data(data: impl Into<Bytes>) -> Self {
        Self {
            flags: 0,
            data: data.into(),
        }
    }

    /// Create a trailer frame carrying the serialized trailer set
    pub fn trailers(trailers: &TrailerSet) -> Self {
        Self {
            flags: FLAG_TRAILER,
            data: trailers.encode(),
        }
    }

    /// Whether this is a trailer frame
    #[inline]
    pub fn is_trailer(&self) -> bool {
        self.flags & FLAG_TRAILER != 0
    }

    /// Whether this is a data frame
    #[inline]
    pub fn is_data(&self) -> bool {
        !self.is_trailer()
    }

    /// Whether the compressed bit is set
    #[inline]
    pub fn is_compressed(&self) -> bool {
        self.flags & FLAG_COMPRESSED != 0
    }

    /// Encode frame to bytes (5-byte header + payload)
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(self.total_size());
        buf.put_slice(&self.encode_header());
        buf.put_slice(&self.data);
        buf.freeze()
    }

    /// Encode frame header only
    pub fn encode_header(&self) -> [u8; GRPC_FRAME_HEADER_SIZE] {
        encode_header(self.flags, self.data.len())
    }

    /// Get total frame size (header + payload)
    pub fn total_size(&self) -> usize {
        GRPC_FRAME_HEADER_SIZE + self.data.len()
    }

    /// Parse the payload of a trailer frame
    pub fn parse_trailers(&self) -> Option<TrailerSet> {
        if !self.is_trailer() {
            return None;
        }
        TrailerSet::parse(&self.data)
    }
}

#[inline]
fn encode_header(flags: u8, len: usize) -> [u8; GRPC_FRAME_HEADER_SIZE] {
    let mut header = [0u8; GRPC_FRAME_HEADER_SIZE];
    header[0] = flags;
    header[1..5].copy_from_slice(&(len as u32).to_be_bytes());
    header
}

/// Wrap one message in a data frame (flags = 0x00)
pub fn encode_data_frame(payload: &[u8]) -> Bytes {
    let mut buf = BytesMut::with_capacity(GRPC_FRAME_HEADER_SIZE + payload.len());
    buf.put_slice(&encode_header(0, payload.len()));
    buf.put_slice(payload);
    buf.freeze()
}

/// Serialize a trailer set into a trailer frame (flags = 0x80)
pub fn encode_trailer_frame(trailers: &TrailerSet) -> Bytes {
    Frame::trailers(trailers).encode()
}

/// Decode a single frame from the front of `buf`
///
/// Returns (frame, bytes_consumed) on success. The length limit is checked
/// before the payload is touched, so an oversized header never allocates.
pub fn decode_frame(buf: &[u8], max_size: usize) -> Result<(Frame, usize), FrameError> {
    if buf.len() < GRPC_FRAME_HEADER_SIZE {
        return Err(FrameError::InsufficientData {
            required: GRPC_FRAME_HEADER_SIZE,
            available: buf.len(),
        });
    }

    let flags = buf[0];
    let length = u32::from_be_bytes([buf[1], buf[2], buf[3], buf[4]]) as usize;

    if length > max_size {
        return Err(FrameError::MessageTooLarge {
            size: length,
            max: max_size,
        });
    }

    let total_len = GRPC_FRAME_HEADER_SIZE + length;
    if buf.len() < total_len {
        return Err(FrameError::InsufficientData {
            required: total_len,
            available: buf.len(),
        });
    }

    let data = Bytes::copy_from_slice(&buf[GRPC_FRAME_HEADER_SIZE..total_len]);
    Ok((Frame { flags, data }, total_len))
}

/// Streaming frame decoder
///
/// Handles partial reads and buffers incomplete frames.
#[derive(Debug)]
pub struct FrameDecoder {
    buffer: BytesMut,
    max_message_size: usize,
}

impl FrameDecoder {
    /// Create new decoder with default max size
    pub fn new() -> Self {
        Self::with_max_size(GRPC_MAX_MESSAGE_SIZE)
    }

    /// Create decoder with custom max size
    pub fn with_max_size(max_size: usize) -> Self {
        Self {
            buffer: BytesMut::with_capacity(8192),
            max_message_size: max_size,
        }
    }

    /// Add data to internal buffer
    pub fn push(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    /// Try to decode the next complete frame
    ///
    /// Returns None if no complete frame is available yet.
    pub fn decode_next(&mut self) -> Result<Option<Frame>, FrameError> {
        match decode_frame(&self.buffer, self.max_message_size) {
            Ok((frame, consumed)) => {
                let _ = self.buffer.split_to(consumed);
                Ok(Some(frame))
            }
            Err(FrameError::InsufficientData { .. }) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Signal end of input; leftover bytes mean a truncated frame
    pub fn finish(&self) -> Result<(), FrameError> {
        if self.buffer.is_empty() {
            return Ok(());
        }
        let required = match decode_frame(&self.buffer, self.max_message_size) {
            Err(FrameError::InsufficientData { required, .. }) => required,
            Err(e) => return Err(e),
            Ok((frame, _)) => frame.total_size(),
        };
        Err(FrameError::InsufficientData {
            required,
            available: self.buffer.len(),
        })
    }
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::new()
    }
}

/// Frame boundary tracker for pass-through byte streams
///
/// Observes bytes without copying them, enforcing the length limit and
/// counting complete frames.
#[derive(Debug)]
pub struct FrameTracker {
    header: [u8; GRPC_FRAME_HEADER_SIZE],
    header_len: usize,
    remaining: usize,
    frames: usize,
    max_message_size: usize,
}

impl FrameTracker {
    pub fn new(max_message_size: usize) -> Self {
        Self {
            header: [0u8; GRPC_FRAME_HEADER_SIZE],
            header_len: 0,
            remaining: 0,
            frames: 0,
            max_message_size,
        }
    }

    /// Observe the next slice of the stream
    pub fn feed(&mut self, mut data: &[u8]) -> Result<(), FrameError> {
        while !data.is_empty() {
            if self.remaining > 0 {
                let take = self.remaining.min(data.len());
                self.remaining -= take;
                data = &data[take..];
                if self.remaining == 0 {
                    self.frames += 1;
                }
                continue;
            }

            let take = (GRPC_FRAME_HEADER_SIZE - self.header_len).min(data.len());
            self.header[self.header_len..self.header_len + take].copy_from_slice(&data[..take]);
            self.header_len += take;
            data = &data[take..];

            if self.header_len == GRPC_FRAME_HEADER_SIZE {
                let h = &self.header;
                let length = u32::from_be_bytes([h[1], h[2], h[3], h[4]]) as usize;
                if length > self.max_message_size {
                    return Err(FrameError::MessageTooLarge {
                        size: length,
                        max: self.max_message_size,
                    });
                }
                self.header_len = 0;
                self.remaining = length;
                if length == 0 {
                    self.frames += 1;
                }
            }
        }
        Ok(())
    }

    /// Number of complete frames observed so far
    pub fn frames(&self) -> usize {
        self.frames
    }

    /// Whether the stream currently sits on a frame boundary
    pub fn at_boundary(&self) -> bool {
        self.header_len == 0 && self.remaining == 0
    }

    /// Signal end of stream; a partial frame is an error
    pub fn finish(&self) -> Result<(), FrameError> {
        if self.at_boundary() {
            return Ok(());
        }
        let (required, available) = if self.remaining > 0 {
            let h = &self.header;
            let length = u32::from_be_bytes([h[1], h[2], h[3], h[4]]) as usize;
            (GRPC_FRAME_HEADER_SIZE + length, GRPC_FRAME_HEADER_SIZE + length - self.remaining)
        } else {
            (GRPC_FRAME_HEADER_SIZE, self.header_len)
        };
        Err(FrameError::InsufficientData { required, available })
    }
}
