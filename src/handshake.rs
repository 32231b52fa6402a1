//! The HTTP/1.1 upgrade handshake of [RFC 6455 Section 4](https://datatracker.ietf.org/doc/html/rfc6455#section-4).
//!
//! ```http
//! GET /chat HTTP/1.1
//! Host: server.example.com
//! Origin: http://example.com
//! Connection: Upgrade
//! Upgrade: websocket
//! Sec-WebSocket-Key: dGhlIHNhbXBsZSBub25jZQ==
//! Sec-WebSocket-Version: 13
//! ```
//!
//! The server response is inspected as raw text: the only question answered is
//! "did the upgrade succeed", so a full HTTP parser is not needed.
use base64::prelude::*;
use bytes::BytesMut;
use sha1::{Digest, Sha1};
use url::Url;

use crate::{options::Options, Result, WebSocketError};

/// Fixed GUID appended to the request key before hashing, RFC 6455 Section 1.3.
pub const KEY_GUID: &str = "258EAFA5-E914-47DA-95CA-C5AB0DC85B11";

/// Upper bound on the size of the response header block.
pub const MAX_RESPONSE_SIZE: usize = 16 * 1024;

/// Computes `base64(SHA-1(key + GUID))`, the value a server must answer with.
///
/// ```
/// use wsraw::handshake::compute_accept_key;
///
/// assert_eq!(
///     compute_accept_key("dGhlIHNhbXBsZSBub25jZQ=="),
///     "s3pPLMBiTxaQ9kYGzzhZRbK+xOo="
/// );
/// ```
pub fn compute_accept_key(key: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(key.as_bytes());
    hasher.update(KEY_GUID.as_bytes());
    BASE64_STANDARD.encode(hasher.finalize())
}

fn generate_key() -> String {
    let input: [u8; 16] = rand::random();
    BASE64_STANDARD.encode(input)
}

/// Per-attempt handshake state: the request key and the accept value derived from it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandshakeContext {
    key: String,
    accept: String,
}

impl HandshakeContext {
    /// Creates a context around a fresh random 16-byte nonce.
    pub fn new() -> Self {
        Self::with_key(generate_key())
    }

    /// Creates a context around a caller-chosen key.
    pub fn with_key(key: impl Into<String>) -> Self {
        let key = key.into();
        let accept = compute_accept_key(&key);
        Self { key, accept }
    }

    /// The base64 value sent as `Sec-WebSocket-Key`.
    pub fn key(&self) -> &str {
        &self.key
    }

    /// The `Sec-WebSocket-Accept` value the server must answer with.
    pub fn expected_accept(&self) -> &str {
        &self.accept
    }
}

impl Default for HandshakeContext {
    fn default() -> Self {
        Self::new()
    }
}

/// The request-line and header values of an upgrade request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    /// Request target, path plus query.
    pub path: String,
    /// `Host` header value, `host` or `host:port`.
    pub host: String,
    /// `Origin` header value.
    pub origin: String,
    /// Optional `Cookie` header value.
    pub cookie: Option<String>,
    /// Optional bearer token, sent as `Authorization: Bearer <token>`.
    pub bearer_token: Option<String>,
}

impl Request {
    /// Derives the request from a `ws://` or `wss://` URL and the connection options.
    ///
    /// The port is only written into `Host` when it is neither 80 nor 443. Without an
    /// explicit origin, `http(s)://` plus the host header value is used.
    pub fn from_url(url: &Url, options: &Options) -> Result<Self> {
        let secure = match url.scheme() {
            "ws" => false,
            "wss" => true,
            _ => return Err(WebSocketError::InvalidHttpScheme),
        };
        let host = url.host_str().ok_or(WebSocketError::MissingHost)?;
        let port = url.port_or_known_default().unwrap_or(if secure { 443 } else { 80 });

        let host = match port {
            80 | 443 => host.to_string(),
            port => format!("{host}:{port}"),
        };

        let origin = options.origin.clone().unwrap_or_else(|| {
            let scheme = if secure { "https" } else { "http" };
            format!("{scheme}://{host}")
        });

        let path = &url[url::Position::BeforePath..url::Position::AfterQuery];

        Ok(Self {
            path: if path.is_empty() { "/".into() } else { path.into() },
            host,
            origin,
            cookie: options.cookie.clone(),
            bearer_token: options.bearer_token.clone(),
        })
    }
}

/// Serializes the upgrade request for `key`.
///
/// Every line ends in CRLF and the header block is closed by an empty line.
/// Optional headers follow `Sec-WebSocket-Version`.
pub fn build_request(request: &Request, key: &str) -> BytesMut {
    let mut lines = vec![
        format!("GET {} HTTP/1.1", request.path),
        format!("Host: {}", request.host),
        format!("Origin: {}", request.origin),
        "Connection: Upgrade".to_string(),
        "Upgrade: websocket".to_string(),
        format!("Sec-WebSocket-Key: {key}"),
        "Sec-WebSocket-Version: 13".to_string(),
    ];
    if let Some(cookie) = &request.cookie {
        lines.push(format!("Cookie: {cookie}"));
    }
    if let Some(token) = &request.bearer_token {
        lines.push(format!("Authorization: Bearer {token}"));
    }

    let mut buf = BytesMut::with_capacity(256);
    for line in lines {
        buf.extend_from_slice(line.as_bytes());
        buf.extend_from_slice(b"\r\n");
    }
    buf.extend_from_slice(b"\r\n");
    buf
}

/// Returns the offset just past the `\r\n\r\n` that ends the response header block.
///
/// Bytes before that offset are HTTP, bytes after it are already WebSocket frames.
pub fn find_header_end(buf: &[u8]) -> Option<usize> {
    buf.windows(4)
        .position(|window| window == b"\r\n\r\n")
        .map(|pos| pos + 4)
}

/// Checks a server response against RFC 6455 Section 4.2.2.
///
/// Succeeds iff the status is `101`, `Upgrade` is `websocket`, `Connection` contains
/// `Upgrade`, and `Sec-WebSocket-Accept` equals `expected_accept` byte for byte.
/// Header names and the `Upgrade`/`Connection` values compare case-insensitively.
pub fn validate_response(response: &str, expected_accept: &str) -> Result<()> {
    let mut lines = response.split("\r\n");
    let status = parse_status_line(lines.next().unwrap_or_default())?;

    let headers: Vec<(&str, &str)> = lines
        .take_while(|line| !line.is_empty())
        .filter_map(|line| line.split_once(':'))
        .map(|(name, value)| (name.trim(), value.trim()))
        .collect();

    let header = |wanted: &str| {
        headers
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case(wanted))
            .map(|(_, value)| *value)
    };

    if status != 101 {
        return Err(match (status, header("Location")) {
            (300..=399, Some(location)) => WebSocketError::Redirected {
                status,
                location: location.to_string(),
            },
            _ => WebSocketError::InvalidStatusCode(status),
        });
    }

    if !header("Upgrade").is_some_and(|value| value.eq_ignore_ascii_case("websocket")) {
        return Err(WebSocketError::InvalidUpgradeHeader);
    }

    let has_upgrade_token = header("Connection").is_some_and(|value| {
        value
            .split(',')
            .any(|token| token.trim().eq_ignore_ascii_case("upgrade"))
    });
    if !has_upgrade_token {
        return Err(WebSocketError::InvalidConnectionHeader);
    }

    let accept = header("Sec-WebSocket-Accept").ok_or(WebSocketError::MissingSecWebSocketAccept)?;
    if accept != expected_accept {
        return Err(WebSocketError::InvalidSecWebSocketAccept {
            expected: expected_accept.to_string(),
            actual: accept.to_string(),
        });
    }

    Ok(())
}

/// Extracts the status code from `HTTP/1.1 101 Switching Protocols`.
fn parse_status_line(line: &str) -> Result<u16> {
    let mut parts = line.split_whitespace();
    match (parts.next(), parts.next()) {
        (Some(version), Some(code)) if version.starts_with("HTTP/") => {
            code.parse().map_err(|_| WebSocketError::MalformedResponse)
        }
        _ => Err(WebSocketError::MalformedResponse),
    }
}
