//! `application/grpc-web-text` body codec
//!
//! The text variant carries the whole body as standard base64. Both
//! directions work incrementally:
//!
//! - requests: [`Base64Decoder`] wraps a body stream and decodes complete
//!   4-character quanta as they arrive, carrying partial quanta over to the
//!   next chunk;
//! - responses: [`encode_chunks`] encodes a frame in fixed-size input chunks
//!   (a multiple of 3 bytes) so each piece can be written as produced.
//!
//! Every response frame is encoded as its own padded segment, so a text body
//! is a concatenation of padded base64 strings. The decoder accepts that
//! shape as well as a single unbroken string.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use bytes::{Bytes, BytesMut};

use crate::error::GatewayError;
use crate::gateway::request::BodyStream;

/// Default input chunk size for response encoding (must be a multiple of 3)
pub const DEFAULT_TEXT_CHUNK_SIZE: usize = 3 * 1024;

/// Response encoding chunk size: a positive multiple of 3 input bytes
///
/// Only whole 3-byte groups may be cut off, otherwise padding would land
/// in the middle of a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TextChunkSize(usize);

impl TextChunkSize {
    pub fn new(size: usize) -> Option<Self> {
        (size > 0 && size % 3 == 0).then_some(Self(size))
    }

    pub fn get(self) -> usize {
        self.0
    }
}

impl Default for TextChunkSize {
    fn default() -> Self {
        Self(DEFAULT_TEXT_CHUNK_SIZE)
    }
}

/// Encode `data` as base64 in chunks of `chunk_size` input bytes
///
/// Concatenating the yielded pieces gives exactly `STANDARD.encode(data)`.
pub fn encode_chunks(data: &[u8], chunk_size: TextChunkSize) -> impl Iterator<Item = Bytes> + '_ {
    data.chunks(chunk_size.get())
        .map(|chunk| Bytes::from(STANDARD.encode(chunk)))
}

/// Decode a complete text body (one or more padded segments)
pub fn decode_text(data: &[u8]) -> Result<Vec<u8>, GatewayError> {
    let chars: Vec<u8> = data
        .iter()
        .copied()
        .filter(|c| !c.is_ascii_whitespace())
        .collect();
    if chars.len() % 4 != 0 {
        return Err(GatewayError::Decode(format!(
            "base64 body length {} is not a multiple of 4",
            chars.len()
        )));
    }
    let mut out = Vec::with_capacity(chars.len() / 4 * 3);
    decode_quanta(&chars, &mut out)?;
    Ok(out)
}

/// Decode 4-aligned base64 that may contain several padded segments
fn decode_quanta(input: &[u8], out: &mut Vec<u8>) -> Result<(), GatewayError> {
    let mut rest = input;
    while !rest.is_empty() {
        // A segment ends with the quantum holding its first '='.
        let end = match memchr::memchr(b'=', rest) {
            Some(pos) => (pos / 4 + 1) * 4,
            None => rest.len(),
        };
        STANDARD
            .decode_vec(&rest[..end], out)
            .map_err(|e| GatewayError::Decode(e.to_string()))?;
        rest = &rest[end..];
    }
    Ok(())
}

/// Incremental base64 decoder over a request body
#[derive(Debug)]
pub struct Base64Decoder<B> {
    inner: B,
    /// Undecoded characters (always fewer than 4 between calls)
    pending: BytesMut,
    done: bool,
}

impl<B> Base64Decoder<B> {
    pub fn new(inner: B) -> Self {
        Self {
            inner,
            pending: BytesMut::with_capacity(4),
            done: false,
        }
    }

    /// Decode every complete quantum available after appending `input`
    fn decode_available(&mut self, input: &[u8]) -> Result<Bytes, GatewayError> {
        self.pending
            .extend(input.iter().copied().filter(|c| !c.is_ascii_whitespace()));

        let aligned = self.pending.len() / 4 * 4;
        if aligned == 0 {
            return Ok(Bytes::new());
        }
        let quanta = self.pending.split_to(aligned);
        let mut out = Vec::with_capacity(aligned / 4 * 3);
        decode_quanta(&quanta, &mut out)?;
        Ok(Bytes::from(out))
    }
}

impl<B: BodyStream> BodyStream for Base64Decoder<B> {
    async fn next_chunk(&mut self) -> Option<Result<Bytes, GatewayError>> {
        while !self.done {
            match self.inner.next_chunk().await {
                Some(Ok(chunk)) => match self.decode_available(&chunk) {
                    Ok(decoded) if decoded.is_empty() => continue,
                    Ok(decoded) => return Some(Ok(decoded)),
                    Err(e) => {
                        self.done = true;
                        return Some(Err(e));
                    }
                },
                Some(Err(e)) => {
                    self.done = true;
                    return Some(Err(e));
                }
                None => {
                    self.done = true;
                    if !self.pending.is_empty() {
                        return Some(Err(GatewayError::Decode(format!(
                            "truncated base64 quantum ({} trailing characters)",
                            self.pending.len()
                        ))));
                    }
                }
            }
        }
        None
    }
}
