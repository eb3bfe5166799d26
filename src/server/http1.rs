//! Minimal HTTP/1.1 plumbing for the demo host
//!
//! One request per connection: the request head is parsed with httparse,
//! the body is streamed by content-length, and responses are written with
//! chunked transfer encoding so frames reach the browser as they are
//! produced.

use std::io;

use bytes::Bytes;
use monoio::io::{AsyncReadRent, AsyncWriteRent, AsyncWriteRentExt};

use crate::error::GatewayError;
use crate::gateway::request::BodyStream;
use crate::gateway::response::Transport;
use crate::grpc::headers::HeaderList;
use crate::grpc::trailers::TrailerSet;
use crate::grpc::web::HttpVersion;

/// Maximum request head size
pub const MAX_HEAD_SIZE: usize = 64 * 1024;

/// Maximum number of request headers
const MAX_HEADERS: usize = 64;

/// Socket read size for body chunks
const READ_CHUNK_SIZE: usize = 16 * 1024;

/// Parsed request line and headers
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestHead {
    pub method: String,
    pub path: String,
    pub version: HttpVersion,
    pub headers: HeaderList,
}

impl RequestHead {
    /// Declared content-length (absent means no body)
    pub fn content_length(&self) -> Result<usize, io::Error> {
        match self.headers.get_str(b"content-length") {
            None => Ok(0),
            Some(v) => v
                .trim()
                .parse()
                .map_err(|_| io::Error::new(io::ErrorKind::InvalidData, "invalid content-length")),
        }
    }

    /// Chunked request bodies are not supported
    pub fn is_chunked(&self) -> bool {
        self.headers.contains(b"transfer-encoding")
    }
}

/// Try to parse a request head from the front of `buf`
///
/// Returns the head and its length, or None if more bytes are needed.
pub fn parse_head(buf: &[u8]) -> Result<Option<(RequestHead, usize)>, io::Error> {
    let mut headers = [httparse::EMPTY_HEADER; MAX_HEADERS];
    let mut req = httparse::Request::new(&mut headers);

    let len = match req.parse(buf) {
        Ok(httparse::Status::Complete(len)) => len,
        Ok(httparse::Status::Partial) => return Ok(None),
        Err(e) => return Err(io::Error::new(io::ErrorKind::InvalidData, e.to_string())),
    };

    let head = RequestHead {
        method: req.method.unwrap_or_default().to_string(),
        path: req.path.unwrap_or_default().to_string(),
        version: HttpVersion::from_http1_minor(req.version.unwrap_or(1)),
        headers: req.headers.iter().map(|h| (h.name, h.value)).collect(),
    };
    Ok(Some((head, len)))
}

fn reason_phrase(status: u16) -> &'static str {
    match status {
        200 => "OK",
        204 => "No Content",
        400 => "Bad Request",
        411 => "Length Required",
        413 => "Payload Too Large",
        415 => "Unsupported Media Type",
        500 => "Internal Server Error",
        _ => "",
    }
}

/// Serialize a response head
///
/// Responses that may carry a body and declare no length get chunked
/// transfer encoding; the return value tells whether that was chosen.
pub fn format_head(status: u16, headers: &HeaderList) -> (Vec<u8>, bool) {
    let chunked = status != 204 && !headers.contains(b"content-length");

    let mut out = format!("HTTP/1.1 {} {}\r\n", status, reason_phrase(status)).into_bytes();
    for (name, value) in headers.iter() {
        if name.eq_ignore_ascii_case(b"connection") || name.eq_ignore_ascii_case(b"transfer-encoding") {
            continue;
        }
        out.extend_from_slice(name);
        out.extend_from_slice(b": ");
        out.extend_from_slice(value);
        out.extend_from_slice(b"\r\n");
    }
    if chunked {
        out.extend_from_slice(b"transfer-encoding: chunked\r\n");
    }
    out.extend_from_slice(b"connection: close\r\n\r\n");
    (out, chunked)
}

/// Wrap `data` in one chunk of a chunked body
pub fn encode_chunk(data: &[u8]) -> Vec<u8> {
    let mut out = format!("{:x}\r\n", data.len()).into_bytes();
    out.extend_from_slice(data);
    out.extend_from_slice(b"\r\n");
    out
}

/// Terminating chunk, with optional HTTP/1.1 trailer fields
pub fn encode_last_chunk(trailers: Option<&TrailerSet>) -> Vec<u8> {
    let mut out = b"0\r\n".to_vec();
    if let Some(trailers) = trailers {
        out.extend_from_slice(&trailers.encode());
    }
    out.extend_from_slice(b"\r\n");
    out
}

/// Content-length delimited request body read straight from the socket
#[derive(Debug)]
pub struct Http1Body<R> {
    reader: R,
    prefix: Option<Bytes>,
    remaining: usize,
}

impl<R> Http1Body<R> {
    /// `prefix` holds body bytes already read together with the head
    pub fn new(reader: R, prefix: Bytes, content_length: usize) -> Self {
        let prefix = prefix.slice(..prefix.len().min(content_length));
        Self {
            reader,
            remaining: content_length - prefix.len(),
            prefix: Some(prefix),
        }
    }
}

impl<R: AsyncReadRent> BodyStream for Http1Body<R> {
    async fn next_chunk(&mut self) -> Option<Result<Bytes, GatewayError>> {
        if let Some(prefix) = self.prefix.take() {
            if !prefix.is_empty() {
                return Some(Ok(prefix));
            }
        }
        if self.remaining == 0 {
            return None;
        }

        let buf = Vec::with_capacity(self.remaining.min(READ_CHUNK_SIZE));
        let (res, buf) = self.reader.read(buf).await;
        match res {
            Ok(0) => {
                self.remaining = 0;
                Some(Err(GatewayError::Transport(io::ErrorKind::UnexpectedEof)))
            }
            Ok(n) => {
                self.remaining -= n;
                Some(Ok(Bytes::from(buf)))
            }
            Err(e) => {
                self.remaining = 0;
                Some(Err(e.into()))
            }
        }
    }
}

/// HTTP/1.1 response writer
#[derive(Debug)]
pub struct Http1Transport<W> {
    writer: W,
    chunked: bool,
    trailers: Option<TrailerSet>,
    closed: bool,
}

impl<W: AsyncWriteRent> Http1Transport<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer,
            chunked: false,
            trailers: None,
            closed: false,
        }
    }

    async fn write(&mut self, data: Vec<u8>) -> io::Result<()> {
        let (res, _) = self.writer.write_all(data).await;
        res.map(|_| ())
    }
}

impl<W: AsyncWriteRent> Transport for Http1Transport<W> {
    async fn send_head(&mut self, status: u16, headers: &HeaderList) -> io::Result<()> {
        let (head, chunked) = format_head(status, headers);
        self.chunked = chunked;
        self.write(head).await
    }

    async fn send_body(&mut self, data: Bytes) -> io::Result<()> {
        // An empty chunk would end the chunked body early
        if data.is_empty() {
            return Ok(());
        }
        let out = if self.chunked {
            encode_chunk(&data)
        } else {
            data.to_vec()
        };
        self.write(out).await
    }

    async fn send_trailers(&mut self, trailers: &TrailerSet) -> io::Result<()> {
        self.trailers = Some(trailers.clone());
        Ok(())
    }

    async fn close(&mut self) -> io::Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        if self.chunked {
            let last = encode_last_chunk(self.trailers.as_ref());
            self.write(last).await?;
        }
        self.writer.shutdown().await
    }
}
