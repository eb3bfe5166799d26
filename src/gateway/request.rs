//! Inbound request model and the web → native request adapter

use std::cell::Cell;
use std::collections::VecDeque;
use std::rc::Rc;

use bytes::{Bytes, BytesMut};

use crate::error::GatewayError;
use crate::grpc::framing::{Frame, FrameDecoder, FrameTracker};
use crate::grpc::headers::HeaderList;
use crate::grpc::text::Base64Decoder;
use crate::grpc::web::{HttpVersion, ProtocolTokens, ProtocolVariant};

/// Pull-based request body
///
/// `None` marks the end of the body. Futures are `!Send`; each request
/// lives on a single runtime thread.
#[allow(async_fn_in_trait)]
pub trait BodyStream {
    /// Next chunk of body bytes
    async fn next_chunk(&mut self) -> Option<Result<Bytes, GatewayError>>;
}

impl<B: BodyStream + ?Sized> BodyStream for &mut B {
    async fn next_chunk(&mut self) -> Option<Result<Bytes, GatewayError>> {
        (**self).next_chunk().await
    }
}

/// In-memory body made of pre-split chunks
#[derive(Debug, Clone, Default)]
pub struct ChunkedBody {
    chunks: VecDeque<Bytes>,
}

impl ChunkedBody {
    pub fn new(chunks: Vec<Bytes>) -> Self {
        Self {
            chunks: chunks.into(),
        }
    }

    /// Body consisting of one chunk
    pub fn full(data: impl Into<Bytes>) -> Self {
        Self::new(vec![data.into()])
    }

    pub fn empty() -> Self {
        Self::default()
    }
}

impl BodyStream for ChunkedBody {
    async fn next_chunk(&mut self) -> Option<Result<Bytes, GatewayError>> {
        self.chunks.pop_front().map(Ok)
    }
}

/// Read a body to the end
pub async fn collect_body<B: BodyStream>(body: &mut B) -> Result<Bytes, GatewayError> {
    let mut buf = BytesMut::new();
    while let Some(chunk) = body.next_chunk().await {
        buf.extend_from_slice(&chunk?);
    }
    Ok(buf.freeze())
}

/// Reads length-prefixed messages from a body
#[derive(Debug)]
pub struct MessageReader<B> {
    body: B,
    decoder: FrameDecoder,
    eof: bool,
}

impl<B: BodyStream> MessageReader<B> {
    pub fn new(body: B, max_message_size: usize) -> Self {
        Self {
            body,
            decoder: FrameDecoder::with_max_size(max_message_size),
            eof: false,
        }
    }

    /// Next complete frame, or None at a clean end of body
    pub async fn next_message(&mut self) -> Result<Option<Frame>, GatewayError> {
        loop {
            if let Some(frame) = self.decoder.decode_next()? {
                return Ok(Some(frame));
            }
            if self.eof {
                self.decoder.finish()?;
                return Ok(None);
            }
            match self.body.next_chunk().await {
                Some(Ok(chunk)) => self.decoder.push(&chunk),
                Some(Err(e)) => return Err(e),
                None => self.eof = true,
            }
        }
    }
}

/// Request-scoped cancellation flag
///
/// Shared between the host (which trips it on disconnect or timeout), the
/// handler (which polls it), and the response interceptor.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Rc<Cell<bool>>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.set(true);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.get()
    }
}

/// A request as seen by the gateway and by the wrapped handler
#[derive(Debug)]
pub struct Request<B> {
    pub method: String,
    pub path: String,
    pub version: HttpVersion,
    pub headers: HeaderList,
    pub body: B,
    pub cancel: CancelToken,
}

impl<B> Request<B> {
    pub fn new(
        method: impl Into<String>,
        path: impl Into<String>,
        version: HttpVersion,
        headers: HeaderList,
        body: B,
    ) -> Self {
        Self {
            method: method.into(),
            path: path.into(),
            version,
            headers,
            body,
            cancel: CancelToken::new(),
        }
    }

    /// Attach a host-owned cancel token
    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn content_type(&self) -> Option<&[u8]> {
        self.headers.content_type()
    }

    /// CORS preflight for a gRPC-Web call
    pub fn is_preflight(&self) -> bool {
        self.method.eq_ignore_ascii_case("OPTIONS")
            && self.headers.contains(b"access-control-request-method")
    }
}

#[derive(Debug)]
enum Source<B> {
    Binary(B),
    Text(Base64Decoder<B>),
}

impl<B: BodyStream> Source<B> {
    async fn next_chunk(&mut self) -> Option<Result<Bytes, GatewayError>> {
        match self {
            Self::Binary(body) => body.next_chunk().await,
            Self::Text(decoder) => decoder.next_chunk().await,
        }
    }
}

/// Body of an adapted web request
///
/// Yields native binary bytes: text bodies are base64-decoded on the fly,
/// binary bodies pass through untouched. Frame boundaries are tracked, not
/// rewritten, so oversize and truncated frames surface as errors.
#[derive(Debug)]
pub struct WebBody<B> {
    source: Source<B>,
    tracker: FrameTracker,
    primed: VecDeque<Bytes>,
    eof: bool,
}

impl<B: BodyStream> WebBody<B> {
    fn new(body: B, variant: ProtocolVariant, max_message_size: usize) -> Self {
        let source = if variant.is_text() {
            Source::Text(Base64Decoder::new(body))
        } else {
            Source::Binary(body)
        };
        Self {
            source,
            tracker: FrameTracker::new(max_message_size),
            primed: VecDeque::new(),
            eof: false,
        }
    }

    /// Read ahead until the first frame is complete or the body ends
    ///
    /// Lets the gateway reject a malformed unary body before the handler
    /// runs. The bytes read are replayed unchanged by `next_chunk`.
    pub async fn prime(&mut self) -> Result<(), GatewayError> {
        while self.tracker.frames() == 0 && !self.eof {
            match self.source.next_chunk().await {
                Some(Ok(chunk)) => {
                    self.tracker.feed(&chunk)?;
                    if !chunk.is_empty() {
                        self.primed.push_back(chunk);
                    }
                }
                Some(Err(e)) => return Err(e),
                None => {
                    self.eof = true;
                    self.tracker.finish()?;
                }
            }
        }
        Ok(())
    }
}

impl<B: BodyStream> BodyStream for WebBody<B> {
    async fn next_chunk(&mut self) -> Option<Result<Bytes, GatewayError>> {
        if let Some(chunk) = self.primed.pop_front() {
            return Some(Ok(chunk));
        }
        if self.eof {
            return None;
        }
        match self.source.next_chunk().await {
            Some(Ok(chunk)) => match self.tracker.feed(&chunk) {
                Ok(()) => Some(Ok(chunk)),
                Err(e) => {
                    self.eof = true;
                    Some(Err(e.into()))
                }
            },
            Some(Err(e)) => {
                self.eof = true;
                Some(Err(e))
            }
            None => {
                self.eof = true;
                self.tracker.finish().err().map(|e| Err(e.into()))
            }
        }
    }
}

/// Build a fresh native request from a web request
///
/// The original request is consumed; nothing of it is shared with the
/// adapted value. `content-length` is dropped since text bodies shrink.
pub fn adapt_request<B: BodyStream>(
    tokens: &ProtocolTokens,
    variant: ProtocolVariant,
    request: Request<B>,
    max_message_size: usize,
) -> Request<WebBody<B>> {
    let Request {
        method,
        path,
        headers,
        body,
        cancel,
        ..
    } = request;

    let mut native_headers = HeaderList::new();
    for (name, value) in headers.iter() {
        if name.eq_ignore_ascii_case(b"content-type") {
            native_headers.append(name, tokens.native_content_type(value));
        } else if !name.eq_ignore_ascii_case(b"content-length") {
            native_headers.append(name, value);
        }
    }

    Request {
        method,
        path,
        version: HttpVersion::Http2,
        headers: native_headers,
        body: WebBody::new(body, variant, max_message_size),
        cancel,
    }
}
