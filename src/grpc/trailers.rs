//! Trailing metadata carried in the gRPC-Web trailer frame
//!
//! The payload of a trailer frame is an HTTP/1 header block:
//!
//! ```text
//! grpc-status: 0\r\n
//! grpc-message: OK\r\n
//! x-custom: a\r\n
//! x-custom: b\r\n
//! ```
//!
//! Keys are emitted lowercase. The parser tolerates bare `\n` line endings.
//!
//! Keys must be HTTP tokens and values may not contain control characters,
//! so every entry serializes to exactly one line. Surrounding spaces and
//! tabs are not part of a value.

use bytes::{BufMut, Bytes, BytesMut};
use ftlog::warn;

use crate::grpc::headers::{is_field_value, is_token};
use crate::grpc::status::{GrpcStatus, GrpcStatusCode};

/// Ordered, case-insensitive multimap of trailer key to values
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TrailerSet {
    entries: Vec<(String, Vec<String>)>,
}

impl TrailerSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a value, keeping key insertion order
    ///
    /// Entries that would not survive serialization are dropped; returns
    /// whether the entry was stored.
    pub fn append(&mut self, key: &str, value: &str) -> bool {
        let value = value.trim_matches([' ', '\t']);
        if !is_token(key.as_bytes()) || !is_field_value(value.as_bytes()) {
            warn!("[grpc] dropped invalid trailer {:?}: {:?}", key, value);
            return false;
        }

        let key = key.to_ascii_lowercase();
        match self.entries.iter_mut().find(|(k, _)| *k == key) {
            Some((_, values)) => values.push(value.to_string()),
            None => self.entries.push((key, vec![value.to_string()])),
        }
        true
    }

    /// Replace all values for a key
    pub fn set(&mut self, key: &str, value: &str) -> bool {
        self.remove(key);
        self.append(key, value)
    }

    pub fn remove(&mut self, key: &str) {
        self.entries.retain(|(k, _)| !k.eq_ignore_ascii_case(key));
    }

    /// All values for a key, in insertion order
    pub fn get_all(&self, key: &str) -> &[String] {
        self.entries
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(key))
            .map(|(_, v)| v.as_slice())
            .unwrap_or(&[])
    }

    /// First value for a key
    pub fn get(&self, key: &str) -> Option<&str> {
        self.get_all(key).first().map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of distinct keys
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &[String])> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_slice()))
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Status carried by `grpc-status` / `grpc-message`, if any
    pub fn status(&self) -> Option<GrpcStatus> {
        let code: GrpcStatusCode = self.get("grpc-status")?.trim().parse().ok()?;
        let message = self
            .get("grpc-message")
            .and_then(|m| GrpcStatus::decode_message(m.as_bytes()));
        Some(GrpcStatus {
            code,
            message,
            details: None,
        })
    }

    /// Serialize as `key: value\r\n` lines
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::new();
        for (key, values) in &self.entries {
            for value in values {
                buf.put_slice(key.as_bytes());
                buf.put_slice(b": ");
                buf.put_slice(value.as_bytes());
                buf.put_slice(b"\r\n");
            }
        }
        buf.freeze()
    }

    /// Parse a serialized header block
    ///
    /// Returns None on non-UTF-8 input, a line without a colon, or an
    /// invalid key.
    pub fn parse(data: &[u8]) -> Option<Self> {
        let text = std::str::from_utf8(data).ok()?;
        let mut trailers = Self::new();
        for line in text.split('\n') {
            let line = line.strip_suffix('\r').unwrap_or(line);
            if line.is_empty() {
                continue;
            }
            let (key, value) = line.split_once(':')?;
            if !trailers.append(key.trim(), value) {
                return None;
            }
        }
        Some(trailers)
    }
}

impl From<&GrpcStatus> for TrailerSet {
    fn from(status: &GrpcStatus) -> Self {
        let mut trailers = Self::new();
        for (name, value) in status.to_trailers() {
            trailers.append(&name, &value);
        }
        trailers
    }
}
