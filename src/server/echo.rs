//! Echo service used by the demo binary
//!
//! - `/veil.Echo/Unary`: returns the request message unchanged
//! - `/veil.Echo/Repeat`: streams the request message back
//!   `x-echo-count` times (default 3)

use std::cell::Cell;

use bytes::Bytes;
use ftlog::debug;

use crate::gateway::request::{BodyStream, MessageReader, Request};
use crate::gateway::response::ResponseSink;
use crate::gateway::RpcHandler;
use crate::grpc::framing::GRPC_MAX_MESSAGE_SIZE;
use crate::grpc::headers::HeaderList;
use crate::grpc::status::{GrpcStatus, GrpcStatusCode};

pub const UNARY_PATH: &str = "/veil.Echo/Unary";
pub const REPEAT_PATH: &str = "/veil.Echo/Repeat";

/// Metadata key selecting the repeat count
pub const ECHO_COUNT_HEADER: &[u8] = b"x-echo-count";

const DEFAULT_REPEAT: usize = 3;
const MAX_REPEAT: usize = 1000;

#[derive(Debug, Default)]
pub struct EchoService {
    calls: Cell<u64>,
}

impl EchoService {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of calls handled so far
    pub fn calls(&self) -> u64 {
        self.calls.get()
    }

    async fn read_single<B: BodyStream>(request: Request<B>) -> Result<Bytes, GrpcStatus> {
        let mut reader = MessageReader::new(request.body, GRPC_MAX_MESSAGE_SIZE);
        let frame = match reader.next_message().await {
            Ok(Some(frame)) => frame,
            Ok(None) => {
                return Err(GrpcStatus::error(
                    GrpcStatusCode::InvalidArgument,
                    "missing request message",
                ))
            }
            Err(e) => return Err(GrpcStatus::error(GrpcStatusCode::InvalidArgument, e.to_string())),
        };
        if frame.is_compressed() {
            return Err(GrpcStatus::error(
                GrpcStatusCode::Unimplemented,
                "compressed messages are not supported",
            ));
        }
        Ok(frame.data)
    }

    async fn unary<B: BodyStream, S: ResponseSink>(request: Request<B>, response: &mut S) -> GrpcStatus {
        let message = match Self::read_single(request).await {
            Ok(message) => message,
            Err(status) => return status,
        };
        match response.send_message(message).await {
            Ok(()) => GrpcStatus::ok(),
            Err(e) => GrpcStatus::error(GrpcStatusCode::Unavailable, e.to_string()),
        }
    }

    async fn repeat<B: BodyStream, S: ResponseSink>(request: Request<B>, response: &mut S) -> GrpcStatus {
        let count = match request.headers.get_str(ECHO_COUNT_HEADER) {
            None => DEFAULT_REPEAT,
            Some(v) => match v.trim().parse::<usize>() {
                Ok(n) if n <= MAX_REPEAT => n,
                _ => {
                    return GrpcStatus::error(
                        GrpcStatusCode::InvalidArgument,
                        format!("x-echo-count must be 0..={}", MAX_REPEAT),
                    )
                }
            },
        };

        let cancel = request.cancel.clone();
        let message = match Self::read_single(request).await {
            Ok(message) => message,
            Err(status) => return status,
        };

        for i in 0..count {
            if cancel.is_cancelled() {
                debug!("[echo] repeat cancelled after {} messages", i);
                return GrpcStatus::from_code(GrpcStatusCode::Cancelled);
            }
            if let Err(e) = response.send_message(message.clone()).await {
                return GrpcStatus::error(GrpcStatusCode::Unavailable, e.to_string());
            }
        }
        GrpcStatus::ok()
    }
}

impl RpcHandler for EchoService {
    async fn call<B: BodyStream, S: ResponseSink>(&self, request: Request<B>, response: &mut S) {
        self.calls.set(self.calls.get() + 1);

        let mut headers = HeaderList::new();
        headers.append("content-type", "application/grpc+proto");
        if response.send_headers(200, headers).await.is_err() {
            return;
        }

        let status = match request.path.as_str() {
            UNARY_PATH => Self::unary(request, response).await,
            REPEAT_PATH => Self::repeat(request, response).await,
            other => GrpcStatus::error(GrpcStatusCode::Unimplemented, format!("unknown method {}", other)),
        };
        debug!("[echo] finished with {}", status.code);

        response.set_status(&status);
        let _ = response.finish().await;
    }
}
