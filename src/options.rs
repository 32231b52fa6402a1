use std::{net::SocketAddr, time::Duration};

use tokio_rustls::TlsConnector;

/// Default value of [`Options::max_payload_read`], 1 MiB.
pub const MAX_PAYLOAD_READ: usize = 1024 * 1024;

/// Default value of [`Options::max_read_buffer`], 2 MiB.
pub const MAX_READ_BUFFER: usize = 2 * 1024 * 1024;

/// Default value of [`Options::close_timeout`].
pub const CLOSE_TIMEOUT: Duration = Duration::from_secs(1);

/// Default value of [`Options::connect_timeout`].
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Configuration options for a WebSocket connection.
///
/// `Options` carries the size limits and timeouts of the connection, the optional
/// headers of the upgrade request, and the TLS settings used for `wss://` targets.
///
/// ```
/// use std::time::Duration;
/// use wsraw::Options;
///
/// let options = Options::default()
///     .with_origin("https://example.com")
///     .with_bearer_token("t0k3n")
///     .with_close_timeout(Duration::from_millis(250));
/// ```
#[derive(Clone)]
pub struct Options {
    /// Maximum payload size of a single incoming frame, in bytes.
    ///
    /// A frame announcing more than this many payload bytes fails the connection with
    /// [`FrameTooLarge`](crate::WebSocketError::FrameTooLarge).
    ///
    /// Default: 1 MiB, see [`MAX_PAYLOAD_READ`].
    pub max_payload_read: Option<usize>,

    /// Maximum size of a fragmented message being reassembled.
    ///
    /// Default: 2 MiB, see [`MAX_READ_BUFFER`], or twice `max_payload_read` if that is set.
    pub max_read_buffer: Option<usize>,

    /// How long to wait for the transport to go away once a close frame was exchanged.
    pub close_timeout: Duration,

    /// Upper bound on TCP connect, TLS and upgrade handshake combined.
    pub connect_timeout: Duration,

    /// `Origin` header value. Derived from the URL when unset.
    pub origin: Option<String>,

    /// `Cookie` header value.
    pub cookie: Option<String>,

    /// Sent as `Authorization: Bearer <token>`.
    pub bearer_token: Option<String>,

    /// Whether the server certificate of a `wss://` target is verified. Default: `true`.
    pub verify_tls: bool,

    /// Connect to this address instead of resolving the URL host.
    pub tcp_address: Option<SocketAddr>,

    /// TLS connector to use instead of the built-in one.
    pub connector: Option<TlsConnector>,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            max_payload_read: None,
            max_read_buffer: None,
            close_timeout: CLOSE_TIMEOUT,
            connect_timeout: CONNECT_TIMEOUT,
            origin: None,
            cookie: None,
            bearer_token: None,
            verify_tls: true,
            tcp_address: None,
            connector: None,
        }
    }
}

impl Options {
    /// Sets the maximum allowed payload size of a single incoming frame.
    pub fn with_max_payload_read(self, size: usize) -> Self {
        Self {
            max_payload_read: Some(size),
            ..self
        }
    }

    /// Sets the maximum size of a fragmented message being reassembled.
    pub fn with_max_read_buffer(self, size: usize) -> Self {
        Self {
            max_read_buffer: Some(size),
            ..self
        }
    }

    /// Sets the grace period of the close handshake.
    pub fn with_close_timeout(self, timeout: Duration) -> Self {
        Self {
            close_timeout: timeout,
            ..self
        }
    }

    /// Sets the timeout of the whole connection establishment.
    pub fn with_connect_timeout(self, timeout: Duration) -> Self {
        Self {
            connect_timeout: timeout,
            ..self
        }
    }

    /// Sets the `Origin` header.
    pub fn with_origin(self, origin: impl Into<String>) -> Self {
        Self {
            origin: Some(origin.into()),
            ..self
        }
    }

    /// Sets the `Cookie` header.
    pub fn with_cookie(self, cookie: impl Into<String>) -> Self {
        Self {
            cookie: Some(cookie.into()),
            ..self
        }
    }

    /// Sets the bearer token of the `Authorization` header.
    pub fn with_bearer_token(self, token: impl Into<String>) -> Self {
        Self {
            bearer_token: Some(token.into()),
            ..self
        }
    }

    /// Fills the cookie and the bearer token from the `COOKIE` and `TOKEN`
    /// environment variables. Unset or empty variables leave the field alone.
    pub fn with_env_credentials(self) -> Self {
        self.with_credentials_from(|name| std::env::var(name).ok())
    }

    fn with_credentials_from(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        let get = |name: &str| lookup(name).filter(|value| !value.is_empty());
        if let Some(cookie) = get("COOKIE") {
            self.cookie = Some(cookie);
        }
        if let Some(token) = get("TOKEN") {
            self.bearer_token = Some(token);
        }
        self
    }

    /// Accepts any server certificate on `wss://` targets.
    ///
    /// Only meant for poking at test servers with self-signed certificates.
    pub fn without_tls_verification(self) -> Self {
        Self {
            verify_tls: false,
            ..self
        }
    }

    /// Connects to `address` instead of resolving the host of the URL. The URL
    /// host is still used for `Host`, `Origin` and TLS server name.
    pub fn with_tcp_address(self, address: SocketAddr) -> Self {
        Self {
            tcp_address: Some(address),
            ..self
        }
    }

    /// Uses `connector` for `wss://` targets, e.g. to present a client certificate.
    pub fn with_connector(self, connector: TlsConnector) -> Self {
        Self {
            connector: Some(connector),
            ..self
        }
    }

    pub(crate) fn payload_limit(&self) -> usize {
        self.max_payload_read.unwrap_or(MAX_PAYLOAD_READ)
    }

    pub(crate) fn read_buffer_limit(&self) -> usize {
        match (self.max_read_buffer, self.max_payload_read) {
            (Some(size), _) => size,
            (None, Some(payload)) => payload.saturating_mul(2),
            (None, None) => MAX_READ_BUFFER,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let options = Options::default();
        assert_eq!(options.payload_limit(), MAX_PAYLOAD_READ);
        assert_eq!(options.read_buffer_limit(), MAX_READ_BUFFER);
        assert_eq!(options.close_timeout, CLOSE_TIMEOUT);
        assert_eq!(options.connect_timeout, CONNECT_TIMEOUT);
        assert!(options.verify_tls);
        assert!(options.origin.is_none());
    }

    #[test]
    fn test_read_buffer_follows_payload_limit() {
        let options = Options::default().with_max_payload_read(100);
        assert_eq!(options.payload_limit(), 100);
        assert_eq!(options.read_buffer_limit(), 200);

        let options = options.with_max_read_buffer(150);
        assert_eq!(options.read_buffer_limit(), 150);
    }

    #[test]
    fn test_builder_chain() {
        let options = Options::default()
            .with_cookie("a=b")
            .with_bearer_token("xyz")
            .without_tls_verification();
        assert_eq!(options.cookie.as_deref(), Some("a=b"));
        assert_eq!(options.bearer_token.as_deref(), Some("xyz"));
        assert!(!options.verify_tls);
    }

    #[test]
    fn test_credentials_lookup() {
        let options = Options::default().with_cookie("kept").with_credentials_from(|name| {
            match name {
                "COOKIE" => Some(String::new()),
                "TOKEN" => Some("secret".into()),
                _ => None,
            }
        });
        assert_eq!(options.cookie.as_deref(), Some("kept"));
        assert_eq!(options.bearer_token.as_deref(), Some("secret"));
    }
}
