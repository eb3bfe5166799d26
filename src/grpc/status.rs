//! Status carried in the `grpc-status` / `grpc-message` trailers
//!
//! The gateway only relays what a handler set; these types exist for
//! handlers building trailers and clients reading them back.

use std::fmt;
use std::str::FromStr;

/// Canonical gRPC status codes, numbered as on the wire
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum GrpcStatusCode {
    #[default]
    Ok = 0,
    Cancelled,
    Unknown,
    InvalidArgument,
    DeadlineExceeded,
    NotFound,
    AlreadyExists,
    PermissionDenied,
    ResourceExhausted,
    FailedPrecondition,
    Aborted,
    OutOfRange,
    Unimplemented,
    Internal,
    Unavailable,
    DataLoss,
    Unauthenticated,
}

impl GrpcStatusCode {
    const ALL: [Self; 17] = [
        Self::Ok,
        Self::Cancelled,
        Self::Unknown,
        Self::InvalidArgument,
        Self::DeadlineExceeded,
        Self::NotFound,
        Self::AlreadyExists,
        Self::PermissionDenied,
        Self::ResourceExhausted,
        Self::FailedPrecondition,
        Self::Aborted,
        Self::OutOfRange,
        Self::Unimplemented,
        Self::Internal,
        Self::Unavailable,
        Self::DataLoss,
        Self::Unauthenticated,
    ];

    pub fn as_u8(self) -> u8 {
        self as u8
    }

    pub fn is_ok(self) -> bool {
        self == Self::Ok
    }
}

impl TryFrom<u8> for GrpcStatusCode {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, u8> {
        Self::ALL.get(value as usize).copied().ok_or(value)
    }
}

/// `grpc-status` value that is not a known code
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvalidStatusCode(pub String);

impl fmt::Display for InvalidStatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid grpc-status {:?}", self.0)
    }
}

impl std::error::Error for InvalidStatusCode {}

impl FromStr for GrpcStatusCode {
    type Err = InvalidStatusCode;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.parse::<u8>()
            .ok()
            .and_then(|n| Self::try_from(n).ok())
            .ok_or_else(|| InvalidStatusCode(s.to_string()))
    }
}

/// Wire form, i.e. the decimal code
impl fmt::Display for GrpcStatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_u8())
    }
}

/// Complete gRPC status with optional message and details
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GrpcStatus {
    /// Status code
    pub code: GrpcStatusCode,
    /// Human-readable error message (grpc-message trailer)
    pub message: Option<String>,
    /// Binary status details (grpc-status-details-bin, already base64)
    pub details: Option<String>,
}

impl GrpcStatus {
    /// Create success status
    pub fn ok() -> Self {
        Self::default()
    }

    /// Create error status with message
    pub fn error(code: GrpcStatusCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: Some(message.into()),
            details: None,
        }
    }

    /// Create status from code only
    pub fn from_code(code: GrpcStatusCode) -> Self {
        Self {
            code,
            ..Self::default()
        }
    }

    /// Check if success
    pub fn is_ok(&self) -> bool {
        self.code.is_ok()
    }

    /// Percent-encode the message for the grpc-message trailer
    ///
    /// Bytes outside printable ASCII, and `%` itself, are escaped.
    pub fn encoded_message(&self) -> Option<String> {
        self.message.as_ref().map(|m| {
            let mut out = String::with_capacity(m.len());
            for b in m.bytes() {
                if (0x20..=0x7e).contains(&b) && b != b'%' {
                    out.push(b as char);
                } else {
                    out.push_str(&format!("%{:02X}", b));
                }
            }
            out
        })
    }

    /// Decode a percent-encoded grpc-message
    ///
    /// Malformed escapes are kept verbatim rather than rejected.
    pub fn decode_message(encoded: &[u8]) -> Option<String> {
        fn hex(b: u8) -> Option<u8> {
            (b as char).to_digit(16).map(|d| d as u8)
        }

        let mut bytes = Vec::with_capacity(encoded.len());
        let mut i = 0;
        while i < encoded.len() {
            if encoded[i] == b'%' && i + 2 < encoded.len() {
                if let (Some(hi), Some(lo)) = (hex(encoded[i + 1]), hex(encoded[i + 2])) {
                    bytes.push((hi << 4) | lo);
                    i += 3;
                    continue;
                }
            }
            bytes.push(encoded[i]);
            i += 1;
        }

        Some(String::from_utf8_lossy(&bytes).into_owned())
    }

    /// Format as trailer key/value pairs
    pub fn to_trailers(&self) -> Vec<(String, String)> {
        let mut trailers = vec![("grpc-status".to_string(), self.code.to_string())];

        if let Some(msg) = self.encoded_message() {
            trailers.push(("grpc-message".to_string(), msg));
        }
        if let Some(details) = &self.details {
            trailers.push(("grpc-status-details-bin".to_string(), details.clone()));
        }

        trailers
    }
}

impl From<GrpcStatusCode> for GrpcStatus {
    fn from(code: GrpcStatusCode) -> Self {
        Self::from_code(code)
    }
}

impl fmt::Display for GrpcStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?} ({})", self.code, self.code)?;
        if let Some(msg) = &self.message {
            write!(f, ": {}", msg)?;
        }
        Ok(())
    }
}
