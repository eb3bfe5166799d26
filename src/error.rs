//! Gateway error types
//!
//! Every variant is scoped to a single request. RPC-level failures are not
//! represented here: handlers report those through trailer status fields.

use std::io;

use crate::grpc::framing::FrameError;
use crate::grpc::web::HttpVersion;

/// Errors raised while transcoding one request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GatewayError {
    /// Content-type / transport version combination the gateway cannot serve
    UnsupportedProtocol {
        /// Offending content-type (empty when absent)
        content_type: String,
        /// Transport version of the request
        version: HttpVersion,
    },
    /// Malformed base64 in a text request body
    Decode(String),
    /// Request body ended mid-frame
    Framing(FrameError),
    /// Declared frame length exceeds the configured maximum
    Integrity(FrameError),
    /// Client went away or the request was cancelled
    Cancelled,
    /// Write attempted after the response was finalized
    ResponseFinished,
    /// Transport write failed
    Transport(io::ErrorKind),
}

impl GatewayError {
    /// Transport status used when a request is rejected before the handler runs
    pub fn rejection_status(&self) -> u16 {
        match self {
            Self::UnsupportedProtocol { .. } => 415,
            Self::Decode(_) | Self::Framing(_) => 400,
            Self::Integrity(_) => 413,
            Self::Cancelled => 499,
            Self::ResponseFinished | Self::Transport(_) => 500,
        }
    }
}

impl std::fmt::Display for GatewayError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::UnsupportedProtocol { content_type, version } => {
                write!(f, "Unsupported protocol: content-type {:?} over {}", content_type, version)
            }
            Self::Decode(msg) => write!(f, "Invalid base64 body: {}", msg),
            Self::Framing(e) => write!(f, "Malformed frame: {}", e),
            Self::Integrity(e) => write!(f, "Frame rejected: {}", e),
            Self::Cancelled => write!(f, "Request cancelled"),
            Self::ResponseFinished => write!(f, "Response already finished"),
            Self::Transport(kind) => write!(f, "Transport error: {:?}", kind),
        }
    }
}

impl std::error::Error for GatewayError {}

impl From<FrameError> for GatewayError {
    fn from(e: FrameError) -> Self {
        match e {
            FrameError::InsufficientData { .. } => Self::Framing(e),
            FrameError::MessageTooLarge { .. } => Self::Integrity(e),
        }
    }
}

impl From<io::Error> for GatewayError {
    fn from(e: io::Error) -> Self {
        Self::Transport(e.kind())
    }
}
