//! Response sinks
//!
//! Handlers write through [`ResponseSink`]. Two implementations sit on top
//! of the host's [`Transport`]:
//!
//! - [`NativeResponse`]: plain gRPC. Messages are framed into the body and
//!   trailers go out as real HTTP/2 trailers.
//! - [`WebResponse`]: gRPC-Web. Headers are held back and rewritten,
//!   messages are framed (and base64-encoded for the text variant), and the
//!   trailer set is appended to the body as the final trailer frame.

use std::io;

use bytes::Bytes;
use ftlog::{debug, warn};

use crate::error::GatewayError;
use crate::gateway::request::CancelToken;
use crate::grpc::framing::{encode_data_frame, encode_trailer_frame};
use crate::grpc::headers::HeaderList;
use crate::grpc::status::GrpcStatus;
use crate::grpc::text::{encode_chunks, TextChunkSize};
use crate::grpc::trailers::TrailerSet;
use crate::grpc::web::{ProtocolTokens, ProtocolVariant};

/// Physical response writer provided by the host
#[allow(async_fn_in_trait)]
pub trait Transport {
    /// Status line and headers; called at most once
    async fn send_head(&mut self, status: u16, headers: &HeaderList) -> io::Result<()>;
    /// Raw body bytes, in order
    async fn send_body(&mut self, data: Bytes) -> io::Result<()>;
    /// Native trailing headers (HTTP/2 only)
    async fn send_trailers(&mut self, trailers: &TrailerSet) -> io::Result<()>;
    /// End of response
    async fn close(&mut self) -> io::Result<()>;
}

/// The response contract a gRPC handler writes against
#[allow(async_fn_in_trait)]
pub trait ResponseSink {
    /// Response status and headers; only the first call takes effect
    async fn send_headers(&mut self, status: u16, headers: HeaderList) -> Result<(), GatewayError>;
    /// One complete, unframed message
    async fn send_message(&mut self, message: Bytes) -> Result<(), GatewayError>;
    /// Add trailing metadata
    fn set_trailer(&mut self, name: &str, value: &str);
    /// Signal completion; later calls are no-ops
    async fn finish(&mut self) -> Result<(), GatewayError>;

    /// Set `grpc-status` / `grpc-message` (and details) trailers
    fn set_status(&mut self, status: &GrpcStatus) {
        for (name, value) in status.to_trailers() {
            self.set_trailer(&name, &value);
        }
    }
}

/// Finished / cancelled bookkeeping shared by both sinks
#[derive(Debug)]
struct Lifecycle {
    finished: bool,
    cancel: CancelToken,
}

impl Lifecycle {
    fn new(cancel: CancelToken) -> Self {
        Self {
            finished: false,
            cancel,
        }
    }

    fn check(&self) -> Result<(), GatewayError> {
        if self.finished {
            Err(GatewayError::ResponseFinished)
        } else if self.cancel.is_cancelled() {
            Err(GatewayError::Cancelled)
        } else {
            Ok(())
        }
    }

    fn accepts_trailers(&self) -> bool {
        !self.finished && !self.cancel.is_cancelled()
    }

    /// Mark the client as gone after a failed write
    fn abort(&self, e: io::Error) -> GatewayError {
        warn!("[grpc] transport write failed, cancelling request: {}", e);
        self.cancel.cancel();
        GatewayError::from(e)
    }
}

/// Native gRPC response over the host transport
#[derive(Debug)]
pub struct NativeResponse<'a, T> {
    transport: &'a mut T,
    headers_sent: bool,
    trailers: TrailerSet,
    lifecycle: Lifecycle,
}

impl<'a, T: Transport> NativeResponse<'a, T> {
    pub fn new(transport: &'a mut T, cancel: CancelToken) -> Self {
        Self {
            transport,
            headers_sent: false,
            trailers: TrailerSet::new(),
            lifecycle: Lifecycle::new(cancel),
        }
    }

    async fn ensure_headers(&mut self) -> Result<(), GatewayError> {
        if self.headers_sent {
            return Ok(());
        }
        let mut headers = HeaderList::new();
        headers.append("content-type", "application/grpc");
        self.send_headers(200, headers).await
    }
}

impl<T: Transport> ResponseSink for NativeResponse<'_, T> {
    async fn send_headers(&mut self, status: u16, headers: HeaderList) -> Result<(), GatewayError> {
        self.lifecycle.check()?;
        if self.headers_sent {
            return Ok(());
        }
        self.headers_sent = true;
        self.transport
            .send_head(status, &headers)
            .await
            .map_err(|e| self.lifecycle.abort(e))
    }

    async fn send_message(&mut self, message: Bytes) -> Result<(), GatewayError> {
        self.lifecycle.check()?;
        self.ensure_headers().await?;
        self.transport
            .send_body(encode_data_frame(&message))
            .await
            .map_err(|e| self.lifecycle.abort(e))
    }

    fn set_trailer(&mut self, name: &str, value: &str) {
        if self.lifecycle.accepts_trailers() {
            self.trailers.append(name, value);
        }
    }

    async fn finish(&mut self) -> Result<(), GatewayError> {
        if self.lifecycle.finished {
            return Ok(());
        }
        if self.lifecycle.cancel.is_cancelled() {
            self.lifecycle.finished = true;
            self.trailers.clear();
            return Err(GatewayError::Cancelled);
        }
        self.ensure_headers().await?;
        self.lifecycle.finished = true;

        let trailers = std::mem::take(&mut self.trailers);
        self.transport
            .send_trailers(&trailers)
            .await
            .map_err(|e| self.lifecycle.abort(e))?;
        self.transport.close().await.map_err(|e| self.lifecycle.abort(e))
    }
}

/// gRPC-Web response interceptor
///
/// Owns the per-request response state: pending headers, the trailer set
/// accumulated while the handler runs, and the finished flag. Body writes
/// are forwarded as soon as they are framed; only trailers are held.
#[derive(Debug)]
pub struct WebResponse<'a, T> {
    transport: &'a mut T,
    tokens: &'a ProtocolTokens,
    variant: ProtocolVariant,
    text_chunk_size: TextChunkSize,
    status: u16,
    pending_headers: Option<HeaderList>,
    extra_headers: HeaderList,
    headers_sent: bool,
    trailers: TrailerSet,
    messages: usize,
    lifecycle: Lifecycle,
}

impl<'a, T: Transport> WebResponse<'a, T> {
    pub fn new(
        transport: &'a mut T,
        tokens: &'a ProtocolTokens,
        variant: ProtocolVariant,
        text_chunk_size: TextChunkSize,
        cancel: CancelToken,
    ) -> Self {
        Self {
            transport,
            tokens,
            variant,
            text_chunk_size,
            status: 200,
            pending_headers: None,
            extra_headers: HeaderList::new(),
            headers_sent: false,
            trailers: TrailerSet::new(),
            messages: 0,
            lifecycle: Lifecycle::new(cancel),
        }
    }

    /// Headers merged into the response at flush time (CORS etc.)
    pub fn add_headers(&mut self, headers: HeaderList) {
        for (name, value) in headers.iter() {
            self.extra_headers.append(name, value);
        }
    }

    /// Number of data frames written
    pub fn messages_sent(&self) -> usize {
        self.messages
    }

    /// Headers as the browser sees them
    fn web_headers(&mut self) -> HeaderList {
        let mut headers = self.pending_headers.take().unwrap_or_default();
        let content_type = self.tokens.web_content_type(self.variant, headers.content_type());

        headers.set("content-type", content_type);
        headers.remove(b"content-length");
        headers.remove(b"trailer");
        headers.set(self.tokens.compat_header.as_bytes(), "true");
        for (name, value) in self.extra_headers.iter() {
            headers.set(name, value);
        }
        headers
    }

    async fn flush_headers(&mut self) -> Result<(), GatewayError> {
        if self.headers_sent {
            return Ok(());
        }
        self.headers_sent = true;
        let headers = self.web_headers();
        self.transport
            .send_head(self.status, &headers)
            .await
            .map_err(|e| self.lifecycle.abort(e))
    }

    async fn write(&mut self, data: Bytes) -> Result<(), GatewayError> {
        self.transport
            .send_body(data)
            .await
            .map_err(|e| self.lifecycle.abort(e))
    }

    /// Forward one framed unit, base64-encoding it for the text variant
    async fn write_frame(&mut self, frame: Bytes) -> Result<(), GatewayError> {
        if !self.variant.is_text() {
            return self.write(frame).await;
        }
        for piece in encode_chunks(&frame, self.text_chunk_size) {
            self.write(piece).await?;
        }
        Ok(())
    }
}

impl<T: Transport> ResponseSink for WebResponse<'_, T> {
    async fn send_headers(&mut self, status: u16, headers: HeaderList) -> Result<(), GatewayError> {
        self.lifecycle.check()?;
        if self.headers_sent || self.pending_headers.is_some() {
            return Ok(());
        }
        self.status = status;
        self.pending_headers = Some(headers);
        Ok(())
    }

    async fn send_message(&mut self, message: Bytes) -> Result<(), GatewayError> {
        self.lifecycle.check()?;
        self.flush_headers().await?;
        self.write_frame(encode_data_frame(&message)).await?;
        self.messages += 1;
        Ok(())
    }

    fn set_trailer(&mut self, name: &str, value: &str) {
        if self.lifecycle.accepts_trailers() {
            self.trailers.append(name, value);
        }
    }

    async fn finish(&mut self) -> Result<(), GatewayError> {
        if self.lifecycle.finished {
            return Ok(());
        }
        self.lifecycle.finished = true;

        if self.lifecycle.cancel.is_cancelled() {
            debug!("[grpc-web] request cancelled, discarding {} trailers", self.trailers.len());
            self.trailers.clear();
            return Err(GatewayError::Cancelled);
        }

        self.flush_headers().await?;
        let trailers = std::mem::take(&mut self.trailers);
        self.write_frame(encode_trailer_frame(&trailers)).await?;
        self.transport.close().await.map_err(|e| self.lifecycle.abort(e))?;

        debug!(
            "[grpc-web] response finished: variant={:?} messages={} grpc-status={:?}",
            self.variant,
            self.messages,
            trailers.get("grpc-status")
        );
        Ok(())
    }
}
