//! gRPC-Web Protocol Support
//!
//! Classifies inbound requests and maps content types between
//! browser-compatible gRPC-Web and native gRPC.
//!
//! ## Content Types
//! - `application/grpc`: native gRPC (HTTP/2 only)
//! - `application/grpc-web[+proto|+json]`: binary body, trailers in-band
//! - `application/grpc-web-text[+proto|+json]`: fully base64-encoded body
//!
//! ## Features
//! - Protocol classification
//! - Content-type rewriting in both directions
//! - CORS header handling for browser callers

use serde::Deserialize;

use crate::error::GatewayError;
use crate::grpc::headers::{starts_with_ignore_case, HeaderList};

/// Native gRPC content-type
pub const GRPC_CONTENT_TYPE: &[u8] = b"application/grpc";

/// gRPC-Web content type prefix
pub const GRPC_WEB_CONTENT_TYPE_PREFIX: &[u8] = b"application/grpc-web";

/// gRPC-Web text content type (fully base64 encoded)
pub const GRPC_WEB_TEXT_CONTENT_TYPE: &[u8] = b"application/grpc-web-text";

/// Default name of the browser compatibility marker header
pub const DEFAULT_COMPAT_HEADER: &str = "grpc-browser-compat";

/// Transport version of an inbound request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpVersion {
    Http10,
    Http11,
    Http2,
}

impl HttpVersion {
    /// Map httparse's minor version for HTTP/1.x
    pub fn from_http1_minor(minor: u8) -> Self {
        if minor == 0 {
            Self::Http10
        } else {
            Self::Http11
        }
    }
}

impl std::fmt::Display for HttpVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Http10 => write!(f, "HTTP/1.0"),
            Self::Http11 => write!(f, "HTTP/1.1"),
            Self::Http2 => write!(f, "HTTP/2"),
        }
    }
}

/// Wire variant of a request, fixed once classified
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtocolVariant {
    /// Native gRPC, passed straight through
    Native,
    /// `application/grpc-web`
    WebBinary,
    /// `application/grpc-web-text`, base64 in both directions
    WebText,
}

impl ProtocolVariant {
    /// Whether the body is base64 text
    #[inline]
    pub fn is_text(self) -> bool {
        self == Self::WebText
    }

    /// Whether the request needs adaptation
    #[inline]
    pub fn is_web(self) -> bool {
        self != Self::Native
    }
}

/// Content-type tokens and marker header used for classification and rewriting
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProtocolTokens {
    /// Native content-type prefix
    pub native: &'static [u8],
    /// Web binary content-type prefix
    pub web: &'static [u8],
    /// Web text content-type prefix
    pub web_text: &'static [u8],
    /// Header added to web responses to mark browser compatibility
    pub compat_header: String,
}

impl Default for ProtocolTokens {
    fn default() -> Self {
        Self {
            native: GRPC_CONTENT_TYPE,
            web: GRPC_WEB_CONTENT_TYPE_PREFIX,
            web_text: GRPC_WEB_TEXT_CONTENT_TYPE,
            compat_header: DEFAULT_COMPAT_HEADER.to_string(),
        }
    }
}

impl ProtocolTokens {
    /// Tokens with a custom marker header name
    pub fn with_compat_header(name: impl Into<String>) -> Self {
        Self {
            compat_header: name.into(),
            ..Self::default()
        }
    }

    /// Check if content-type indicates a gRPC-Web request
    #[inline]
    pub fn is_web_content_type(&self, content_type: &[u8]) -> bool {
        starts_with_ignore_case(content_type, self.web)
    }

    /// Check if content-type is text format (fully base64)
    #[inline]
    pub fn is_web_text(&self, content_type: &[u8]) -> bool {
        starts_with_ignore_case(content_type, self.web_text)
    }

    /// Content-type prefix for a web variant's responses
    fn response_prefix(&self, variant: ProtocolVariant) -> &'static [u8] {
        match variant {
            ProtocolVariant::WebText => self.web_text,
            ProtocolVariant::WebBinary => self.web,
            ProtocolVariant::Native => self.native,
        }
    }

    /// Subtype suffix after whichever known prefix matches (`+proto` etc.)
    fn subtype<'a>(&self, content_type: &'a [u8]) -> &'a [u8] {
        for prefix in [self.web_text, self.web, self.native] {
            if starts_with_ignore_case(content_type, prefix) {
                return &content_type[prefix.len()..];
            }
        }
        &[]
    }

    /// Rewrite a web request content-type to its native equivalent
    ///
    /// `application/grpc-web-text+proto` becomes `application/grpc+proto`.
    pub fn native_content_type(&self, content_type: &[u8]) -> Vec<u8> {
        let mut out = self.native.to_vec();
        out.extend_from_slice(self.subtype(content_type));
        out
    }

    /// Rewrite a handler's response content-type for the web variant
    ///
    /// Falls back to the bare variant prefix when the handler set none.
    pub fn web_content_type(&self, variant: ProtocolVariant, content_type: Option<&[u8]>) -> Vec<u8> {
        let mut out = self.response_prefix(variant).to_vec();
        if let Some(ct) = content_type {
            out.extend_from_slice(self.subtype(ct));
        }
        out
    }
}

/// Decide how a request is served
///
/// Order matters: an HTTP/2 request without the web prefix is native even
/// when its content-type is unusual, while HTTP/1.x must carry a web type.
pub fn classify(
    tokens: &ProtocolTokens,
    content_type: Option<&[u8]>,
    version: HttpVersion,
) -> Result<ProtocolVariant, GatewayError> {
    let ct = content_type.unwrap_or_default();
    let is_web = tokens.is_web_content_type(ct);

    if version == HttpVersion::Http2 && !is_web {
        Ok(ProtocolVariant::Native)
    } else if tokens.is_web_text(ct) {
        Ok(ProtocolVariant::WebText)
    } else if is_web {
        Ok(ProtocolVariant::WebBinary)
    } else {
        Err(GatewayError::UnsupportedProtocol {
            content_type: String::from_utf8_lossy(ct).into_owned(),
            version,
        })
    }
}

fn default_allowed_origins() -> Vec<String> {
    vec!["*".to_string()]
}

fn default_allowed_headers() -> Vec<String> {
    ["content-type", "x-grpc-web", "x-user-agent", "grpc-timeout"]
        .into_iter()
        .map(String::from)
        .collect()
}

fn default_exposed_headers() -> Vec<String> {
    vec!["grpc-status".to_string(), "grpc-message".to_string()]
}

fn default_max_age_secs() -> u64 {
    86400 // 24 hours
}

/// gRPC-Web CORS configuration
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct CorsConfig {
    /// Allowed origins (use "*" for any origin)
    #[serde(default = "default_allowed_origins")]
    pub allowed_origins: Vec<String>,
    /// Allowed request headers
    #[serde(default = "default_allowed_headers")]
    pub allowed_headers: Vec<String>,
    /// Exposed headers (headers browser can access)
    #[serde(default = "default_exposed_headers")]
    pub exposed_headers: Vec<String>,
    /// Allow credentials
    #[serde(default)]
    pub allow_credentials: bool,
    /// Max age for preflight cache (seconds)
    #[serde(default = "default_max_age_secs")]
    pub max_age_secs: u64,
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self {
            allowed_origins: default_allowed_origins(),
            allowed_headers: default_allowed_headers(),
            exposed_headers: default_exposed_headers(),
            allow_credentials: false,
            max_age_secs: default_max_age_secs(),
        }
    }
}

impl CorsConfig {
    /// Create restrictive config with specific origins
    pub fn with_origins(origins: Vec<String>) -> Self {
        Self {
            allowed_origins: origins,
            ..Self::default()
        }
    }

    /// Check if origin is allowed
    pub fn is_origin_allowed(&self, origin: &str) -> bool {
        self.allowed_origins.iter().any(|o| o == "*" || o == origin)
    }

    fn allow_origin_value<'a>(&self, origin: &'a str) -> &'a str {
        // A credentialed response may not use the wildcard.
        if !self.allow_credentials && self.allowed_origins.iter().any(|o| o == "*") {
            "*"
        } else {
            origin
        }
    }

    /// Headers for a preflight (OPTIONS) response
    pub fn preflight_headers(&self, origin: &str) -> HeaderList {
        let mut headers = HeaderList::new();
        if !self.is_origin_allowed(origin) {
            return headers;
        }

        headers.append("access-control-allow-origin", self.allow_origin_value(origin));
        headers.append("access-control-allow-methods", "POST, OPTIONS");
        headers.append("access-control-allow-headers", self.allowed_headers.join(", "));
        if !self.exposed_headers.is_empty() {
            headers.append("access-control-expose-headers", self.exposed_headers.join(", "));
        }
        if self.allow_credentials {
            headers.append("access-control-allow-credentials", "true");
        }
        headers.append("access-control-max-age", self.max_age_secs.to_string());

        headers
    }

    /// Headers added to an actual web response
    pub fn response_headers(&self, origin: &str) -> HeaderList {
        let mut headers = HeaderList::new();
        if !self.is_origin_allowed(origin) {
            return headers;
        }

        headers.append("access-control-allow-origin", self.allow_origin_value(origin));
        if !self.exposed_headers.is_empty() {
            headers.append("access-control-expose-headers", self.exposed_headers.join(", "));
        }
        if self.allow_credentials {
            headers.append("access-control-allow-credentials", "true");
        }

        headers
    }
}
