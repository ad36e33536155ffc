//! Header block model and validation.
//!
//! The session validates header blocks before anything reaches the wire:
//! pseudo-header rules (including the CONNECT subset), the closed set of
//! connection-specific headers that must never be forwarded, and the
//! explicitly enumerated single-valued headers that must not repeat.
//!
//! Compression is a pluggable collaborator behind [`HeaderCodec`]; the
//! bundled [`PlainHeaderCodec`] is a length-prefixed stand-in with the same
//! contract as a real HPACK engine.

use bytes::Bytes;

use crate::error::Error;

/// One header: lowercase name, opaque value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header {
    name: String,
    value: Bytes,
}

impl Header {
    pub fn new<N: Into<String>, V: Into<Vec<u8>>>(name: N, value: V) -> Header {
        Header {
            name: name.into().to_ascii_lowercase(),
            value: Bytes::from(value.into()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn value(&self) -> &[u8] {
        &self.value
    }

    pub fn is_pseudo(&self) -> bool {
        self.name.starts_with(':')
    }
}

/// Whether a header block belongs to the request or the response direction;
/// decides which pseudo-headers are legal in it.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum HeadersPlace {
    Request,
    Response,
}

const REQUEST_PSEUDO_HEADERS: &[&str] = &[":method", ":scheme", ":authority", ":path"];
const RESPONSE_PSEUDO_HEADERS: &[&str] = &[":status"];

/// Connection-specific headers carry per-hop semantics and must never be
/// forwarded over HTTP/2, with the single exception of `te: trailers`.
const CONNECTION_HEADERS: &[&str] = &[
    "connection",
    "upgrade",
    "keep-alive",
    "proxy-connection",
    "transfer-encoding",
    "host",
];

/// Headers that carry exactly one value; repeating one of these fails
/// encoding, naming the offending field.
const SINGLE_VALUED_HEADERS: &[&str] = &[
    "age",
    "authorization",
    "content-encoding",
    "content-length",
    "content-range",
    "content-type",
    "date",
    "etag",
    "expires",
    "from",
    "if-modified-since",
    "if-range",
    "if-unmodified-since",
    "last-modified",
    "location",
    "max-forwards",
    "proxy-authorization",
    "range",
    "referer",
    "retry-after",
    "user-agent",
];

/// An ordered header block.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Headers(pub Vec<Header>);

impl Headers {
    pub fn new() -> Headers {
        Default::default()
    }

    pub fn from_vec(headers: Vec<Header>) -> Headers {
        Headers(headers)
    }

    pub fn add<N: Into<String>, V: Into<Vec<u8>>>(&mut self, name: N, value: V) {
        self.0.push(Header::new(name, value));
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// First value of the named header, if any.
    pub fn get(&self, name: &str) -> Option<&[u8]> {
        self.0
            .iter()
            .find(|h| h.name == name)
            .map(|h| h.value())
    }

    pub fn get_str(&self, name: &str) -> Option<&str> {
        self.get(name).and_then(|v| std::str::from_utf8(v).ok())
    }

    pub fn method(&self) -> Option<&str> {
        self.get_str(":method")
    }

    pub fn path(&self) -> Option<&str> {
        self.get_str(":path")
    }

    pub fn scheme(&self) -> Option<&str> {
        self.get_str(":scheme")
    }

    pub fn authority(&self) -> Option<&str> {
        self.get_str(":authority")
    }

    /// Parse `:status` as an integer. Absent or non-numeric values are
    /// malformed.
    pub fn status(&self) -> crate::Result<u32> {
        let value = self.get(":status").ok_or(Error::MalformedStatus)?;
        std::str::from_utf8(value)
            .ok()
            .and_then(|s| s.parse::<u32>().ok())
            .ok_or(Error::MalformedStatus)
    }

    pub fn status_opt(&self) -> Option<u32> {
        self.status().ok()
    }

    /// Validate a request header block: known pseudo-headers only, each at
    /// most once, all before regular headers; CONNECT uses its own subset
    /// requiring `:authority` and forbidding `:scheme` and `:path`.
    pub fn validate_request(&self) -> crate::Result<()> {
        self.validate_pseudo(HeadersPlace::Request)?;

        if self.method() == Some("CONNECT") {
            if self.authority().is_none() {
                return Err(Error::ConnectAuthorityMissing);
            }
            if self.scheme().is_some() {
                return Err(Error::ConnectSchemeForbidden);
            }
            if self.path().is_some() {
                return Err(Error::ConnectPathForbidden);
            }
        } else {
            if self.method().is_none() {
                return Err(Error::MissingPseudoHeader(":method"));
            }
            if self.scheme().is_none() {
                return Err(Error::MissingPseudoHeader(":scheme"));
            }
            if self.path().is_none() {
                return Err(Error::MissingPseudoHeader(":path"));
            }
        }
        Ok(())
    }

    /// Validate a response header block shape (pseudo-header rules only;
    /// status range depends on whether the block is final or informational
    /// and is checked by the caller).
    pub fn validate_response(&self) -> crate::Result<()> {
        self.validate_pseudo(HeadersPlace::Response)?;
        if self.get(":status").is_none() {
            return Err(Error::MissingPseudoHeader(":status"));
        }
        Ok(())
    }

    fn validate_pseudo(&self, place: HeadersPlace) -> crate::Result<()> {
        let legal = match place {
            HeadersPlace::Request => REQUEST_PSEUDO_HEADERS,
            HeadersPlace::Response => RESPONSE_PSEUDO_HEADERS,
        };

        let mut seen_regular = false;
        let mut seen_pseudo: Vec<&str> = Vec::new();
        for header in &self.0 {
            if header.is_pseudo() {
                if seen_regular {
                    return Err(Error::PseudoHeaderAfterRegular);
                }
                if !legal.contains(&header.name()) {
                    return Err(Error::UnexpectedPseudoHeader(header.name().to_owned()));
                }
                if seen_pseudo.iter().any(|&n| n == header.name()) {
                    return Err(Error::PseudoHeaderNotSingular(header.name().to_owned()));
                }
                seen_pseudo.push(header.name());
            } else {
                seen_regular = true;
            }
        }
        Ok(())
    }

    /// Produce the ordered name/value pairs handed to the header codec,
    /// enforcing the encode-time rules: pseudo-headers singular,
    /// connection-specific headers rejected (except `te: trailers`),
    /// single-valued headers not repeated.
    pub fn to_wire(&self) -> crate::Result<Vec<(Bytes, Bytes)>> {
        let mut seen_single: Vec<&str> = Vec::new();
        let mut pairs = Vec::with_capacity(self.0.len());

        for header in &self.0 {
            let name = header.name();
            if CONNECTION_HEADERS.contains(&name) {
                return Err(Error::ConnectionSpecificHeader(name.to_owned()));
            }
            if name == "te" && header.value() != b"trailers" {
                return Err(Error::ConnectionSpecificHeader(name.to_owned()));
            }
            if header.is_pseudo() || SINGLE_VALUED_HEADERS.contains(&name) {
                if seen_single.iter().any(|&n| n == name) {
                    return Err(if header.is_pseudo() {
                        Error::PseudoHeaderNotSingular(name.to_owned())
                    } else {
                        Error::SingleValuedHeaderRepeated(name.to_owned())
                    });
                }
                seen_single.push(name);
            }
            pairs.push((
                Bytes::from(name.as_bytes().to_vec()),
                header.value.clone(),
            ));
        }
        Ok(pairs)
    }

    pub fn from_wire(pairs: Vec<(Bytes, Bytes)>) -> Headers {
        Headers(
            pairs
                .into_iter()
                .map(|(n, v)| Header::new(String::from_utf8_lossy(&n).into_owned(), v.to_vec()))
                .collect(),
        )
    }
}

/// A final response status must lie in `[200, 599]`.
pub fn is_final_status(status: u32) -> bool {
    (200..=599).contains(&status)
}

/// Informational statuses are `[100, 200)`, with 101 explicitly carved out
/// because HTTP/2 has no protocol switching.
pub fn validate_informational_status(status: u32) -> crate::Result<()> {
    if status == 101 {
        return Err(Error::Status101NotAllowed);
    }
    if !(100..200).contains(&status) {
        return Err(Error::InvalidInformationalStatus(status));
    }
    Ok(())
}

/// Methods whose requests carry no payload; requests with these methods
/// default to END_STREAM on the header block.
pub fn method_has_no_payload(method: &str) -> bool {
    matches!(method, "GET" | "HEAD" | "DELETE")
}

/// Responses with these statuses must not carry a DATA payload; END_STREAM
/// is forced on the header write regardless of caller intent.
pub fn status_forbids_payload(status: u32) -> bool {
    matches!(status, 204 | 205 | 304)
}

/// The pluggable header compression engine. Implementations turn an ordered
/// name/value sequence into a header-block fragment and back. Stateful
/// codecs (HPACK dynamic tables) are expected; the session calls encode and
/// decode strictly in wire order.
pub trait HeaderCodec: Send {
    fn encode(&mut self, pairs: &[(Bytes, Bytes)]) -> crate::Result<Bytes>;
    fn decode(&mut self, fragment: &[u8]) -> crate::Result<Vec<(Bytes, Bytes)>>;
}

/// Stateless length-prefixed codec: each pair is encoded as
/// `u32 name_len, name, u32 value_len, value`, all big-endian.
#[derive(Default)]
pub struct PlainHeaderCodec;

impl HeaderCodec for PlainHeaderCodec {
    fn encode(&mut self, pairs: &[(Bytes, Bytes)]) -> crate::Result<Bytes> {
        let mut buf = Vec::new();
        for (name, value) in pairs {
            buf.extend_from_slice(&(name.len() as u32).to_be_bytes());
            buf.extend_from_slice(name);
            buf.extend_from_slice(&(value.len() as u32).to_be_bytes());
            buf.extend_from_slice(value);
        }
        Ok(Bytes::from(buf))
    }

    fn decode(&mut self, fragment: &[u8]) -> crate::Result<Vec<(Bytes, Bytes)>> {
        let mut pairs = Vec::new();
        let mut pos = 0;
        while pos < fragment.len() {
            let name = Self::take(fragment, &mut pos)?;
            let value = Self::take(fragment, &mut pos)?;
            pairs.push((name, value));
        }
        Ok(pairs)
    }
}

impl PlainHeaderCodec {
    fn take(fragment: &[u8], pos: &mut usize) -> crate::Result<Bytes> {
        if fragment.len() - *pos < 4 {
            return Err(Error::CodeError(crate::ErrorCode::CompressionError));
        }
        let mut len = [0u8; 4];
        len.copy_from_slice(&fragment[*pos..*pos + 4]);
        let len = u32::from_be_bytes(len) as usize;
        *pos += 4;
        if fragment.len() - *pos < len {
            return Err(Error::CodeError(crate::ErrorCode::CompressionError));
        }
        let out = Bytes::from(fragment[*pos..*pos + len].to_vec());
        *pos += len;
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn get_request() -> Headers {
        Headers(vec![
            Header::new(":method", "GET"),
            Header::new(":scheme", "http"),
            Header::new(":path", "/"),
            Header::new(":authority", "example.com"),
        ])
    }

    #[test]
    fn names_are_lowercased() {
        assert_eq!("content-type", Header::new("Content-Type", "x").name());
    }

    #[test]
    fn request_validates() {
        assert!(get_request().validate_request().is_ok());
    }

    #[test]
    fn request_missing_path_rejected() {
        let headers = Headers(vec![
            Header::new(":method", "GET"),
            Header::new(":scheme", "http"),
        ]);
        match headers.validate_request() {
            Err(Error::MissingPseudoHeader(":path")) => {}
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn connect_requires_authority() {
        let headers = Headers(vec![Header::new(":method", "CONNECT")]);
        match headers.validate_request() {
            Err(Error::ConnectAuthorityMissing) => {}
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn connect_forbids_scheme_and_path() {
        let headers = Headers(vec![
            Header::new(":method", "CONNECT"),
            Header::new(":authority", "example.com:443"),
            Header::new(":scheme", "http"),
        ]);
        match headers.validate_request() {
            Err(Error::ConnectSchemeForbidden) => {}
            other => panic!("unexpected: {:?}", other),
        }

        let headers = Headers(vec![
            Header::new(":method", "CONNECT"),
            Header::new(":authority", "example.com:443"),
            Header::new(":path", "/"),
        ]);
        match headers.validate_request() {
            Err(Error::ConnectPathForbidden) => {}
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn pseudo_after_regular_rejected() {
        let headers = Headers(vec![
            Header::new(":method", "GET"),
            Header::new("accept", "*/*"),
            Header::new(":path", "/"),
        ]);
        assert!(matches!(
            headers.validate_request(),
            Err(Error::PseudoHeaderAfterRegular)
        ));
    }

    #[test]
    fn to_wire_rejects_connection_headers() {
        let mut headers = get_request();
        headers.add("connection", "keep-alive");
        match headers.to_wire() {
            Err(Error::ConnectionSpecificHeader(name)) => assert_eq!("connection", name),
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn to_wire_allows_te_trailers_only() {
        let mut headers = get_request();
        headers.add("te", "trailers");
        assert!(headers.to_wire().is_ok());

        let mut headers = get_request();
        headers.add("te", "gzip");
        assert!(headers.to_wire().is_err());
    }

    #[test]
    fn to_wire_rejects_repeated_single_valued() {
        let mut headers = get_request();
        headers.add("date", "a");
        headers.add("date", "b");
        match headers.to_wire() {
            Err(Error::SingleValuedHeaderRepeated(name)) => assert_eq!("date", name),
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn to_wire_allows_repeated_list_valued() {
        let mut headers = get_request();
        headers.add("accept-language", "en");
        headers.add("accept-language", "de");
        assert!(headers.to_wire().is_ok());
    }

    #[test]
    fn informational_status_rules() {
        assert!(validate_informational_status(100).is_ok());
        assert!(validate_informational_status(199).is_ok());
        assert!(matches!(
            validate_informational_status(101),
            Err(Error::Status101NotAllowed)
        ));
        assert!(validate_informational_status(200).is_err());
    }

    #[test]
    fn plain_codec_roundtrip() {
        let mut codec = PlainHeaderCodec::default();
        let pairs = get_request().to_wire().unwrap();
        let fragment = codec.encode(&pairs).unwrap();
        let decoded = codec.decode(&fragment).unwrap();
        assert_eq!(pairs, decoded);
    }

    #[test]
    fn plain_codec_rejects_truncated_fragment() {
        let mut codec = PlainHeaderCodec::default();
        assert!(codec.decode(&[0, 0, 0, 9, b'x']).is_err());
    }
}
