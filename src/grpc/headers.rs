//! gRPC Header Handling
//!
//! Request and response header blocks are kept as ordered name/value byte
//! pairs, matched case-insensitively, the same shape HTTP/1 parsers and
//! HPACK decoders hand us.
//!
//! ## Headers the gateway touches
//! - `content-type`: `application/grpc[+proto|+json]` and its web variants
//! - `content-length`: dropped whenever a body is re-encoded
//! - `trailer`: dropped on web responses (trailers travel in the body)

/// Check that `name` is a non-empty HTTP token (RFC 9110 `tchar`s)
pub fn is_token(name: &[u8]) -> bool {
    !name.is_empty()
        && name
            .iter()
            .all(|&b| b.is_ascii_alphanumeric() || b"!#$%&'*+-.^_`|~".contains(&b))
}

/// Check that a field value has no control characters except HTAB
pub fn is_field_value(value: &[u8]) -> bool {
    value.iter().all(|&b| b == b'\t' || (b >= 0x20 && b != 0x7f))
}

/// ASCII case-insensitive prefix match
#[inline]
pub fn starts_with_ignore_case(value: &[u8], prefix: &[u8]) -> bool {
    value
        .get(..prefix.len())
        .map(|head| head.eq_ignore_ascii_case(prefix))
        .unwrap_or(false)
}

/// Ordered header block
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HeaderList {
    entries: Vec<(Vec<u8>, Vec<u8>)>,
}

impl HeaderList {
    pub fn new() -> Self {
        Self::default()
    }

    /// First value for `name`
    pub fn get(&self, name: &[u8]) -> Option<&[u8]> {
        self.entries
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_slice())
    }

    /// First value for `name` as UTF-8
    pub fn get_str(&self, name: &[u8]) -> Option<&str> {
        self.get(name).and_then(|v| std::str::from_utf8(v).ok())
    }

    pub fn contains(&self, name: &[u8]) -> bool {
        self.get(name).is_some()
    }

    /// Append without replacing existing values
    pub fn append(&mut self, name: impl Into<Vec<u8>>, value: impl Into<Vec<u8>>) {
        self.entries.push((name.into(), value.into()));
    }

    /// Replace every value of `name` with a single one
    pub fn set(&mut self, name: impl Into<Vec<u8>>, value: impl Into<Vec<u8>>) {
        let name = name.into();
        self.remove(&name);
        self.entries.push((name, value.into()));
    }

    pub fn remove(&mut self, name: &[u8]) {
        self.entries.retain(|(n, _)| !n.eq_ignore_ascii_case(name));
    }

    pub fn iter(&self) -> impl Iterator<Item = (&[u8], &[u8])> {
        self.entries.iter().map(|(n, v)| (n.as_slice(), v.as_slice()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Content-type value, if present
    pub fn content_type(&self) -> Option<&[u8]> {
        self.get(b"content-type")
    }
}

impl<N, V> FromIterator<(N, V)> for HeaderList
where
    N: Into<Vec<u8>>,
    V: Into<Vec<u8>>,
{
    fn from_iter<I: IntoIterator<Item = (N, V)>>(iter: I) -> Self {
        Self {
            entries: iter.into_iter().map(|(n, v)| (n.into(), v.into())).collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_and_field_value() {
        assert!(is_token(b"grpc-status"));
        assert!(is_token(b"X-Custom_1"));
        assert!(!is_token(b""));
        assert!(!is_token(b"bad header"));
        assert!(!is_token(b"x-a:b"));

        assert!(is_field_value(b"plain value\twith tab"));
        assert!(is_field_value(b""));
        assert!(!is_field_value(b"bob\r\ngrpc-status: 0"));
        assert!(!is_field_value(b"nul\0"));
    }

    #[test]
    fn test_header_list_case_insensitive() {
        let mut headers: HeaderList = [("Content-Type", "application/grpc")].into_iter().collect();
        headers.append("x-a", "1");
        headers.append("X-A", "2");

        assert_eq!(headers.get(b"content-type"), Some(&b"application/grpc"[..]));
        assert_eq!(headers.get_str(b"x-a"), Some("1"));
        assert_eq!(headers.content_type(), Some(&b"application/grpc"[..]));

        headers.set("x-a", "3");
        assert_eq!(headers.len(), 2);
        assert_eq!(headers.get_str(b"X-A"), Some("3"));

        headers.remove(b"CONTENT-TYPE");
        assert!(!headers.contains(b"content-type"));
        assert!(headers.content_type().is_none());
    }
}
