//! # wsraw
//! A minimal client-side implementation of the WebSocket protocol (RFC 6455), built for
//! inspecting and debugging WebSocket servers at the wire level.
//!
//! The crate is split into a sans-io core and a thin async driver:
//!
//! - [`codec`]: bit-precise encoding and decoding of RFC 6455 frames over byte buffers.
//! - [`handshake`]: the HTTP/1.1 upgrade request and the validation of the server response.
//! - [`fragment`]: sequencing of outbound fragments and reassembly of inbound ones.
//! - [`state`]: the connection lifecycle as an explicit state machine.
//! - [`WebSocket`]: drives the above over a TCP or TLS transport and exposes a small
//!   event surface (messages, control frames, close, errors).
//!
//! Client frames are always masked. Server frames carrying a mask are rejected as a
//! protocol violation.
//!
//! # Features
//! - `logging`: Enables debug logging of state transitions, handshake results and frame
//!   processing using the `log` crate.
//!
//! # Client Example
//! ```no_run
//! use wsraw::{Incoming, Options, WebSocket};
//!
//! async fn client() -> wsraw::Result<()> {
//!     let mut ws = WebSocket::connect(
//!         "ws://localhost:8000/".parse()?,
//!         Options::default().with_env_credentials(),
//!     )
//!     .await?;
//!
//!     ws.send(b"Hello World (#1)\r\n".as_slice(), false).await?;
//!     ws.send_fragmented(["This is the first part", " of a fragmented message"], false)
//!         .await?;
//!
//!     while let Some(event) = ws.next_event().await {
//!         match event {
//!             Incoming::Message { payload, is_binary } => {
//!                 println!("{} bytes (binary={is_binary})", payload.len());
//!             }
//!             Incoming::Closed { .. } | Incoming::Error(_) => break,
//!             Incoming::Control { .. } => {}
//!         }
//!     }
//!     Ok(())
//! }
//! ```

#![cfg_attr(docsrs, feature(doc_cfg))]

pub mod close;
pub mod codec;
pub mod fragment;
pub mod frame;
pub mod handshake;
pub mod state;

mod connection;
mod mask;
mod options;
mod stream;

use thiserror::Error;

pub use close::CloseCode;
pub use connection::{Handler, Incoming, WebSocket};
pub use frame::{Frame, FrameView, OpCode};
pub use options::{Options, CLOSE_TIMEOUT, CONNECT_TIMEOUT, MAX_PAYLOAD_READ, MAX_READ_BUFFER};
pub use state::State;
pub use stream::MaybeTlsStream;

/// A result type for WebSocket operations, using `WebSocketError` as the error type.
pub type Result<T> = std::result::Result<T, WebSocketError>;

/// Broad classification of a [`WebSocketError`].
///
/// Callers use this to tell "the server was reachable but rejected the upgrade"
/// apart from "the server was unreachable", and both apart from malformed traffic
/// or misuse of the API.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ErrorKind {
    /// Connection refused, reset, timed out, or TLS failure. Fatal.
    Transport,
    /// The server answered, but not with a valid upgrade. Fatal.
    Handshake,
    /// A malformed or out-of-sequence frame. Fatal, the connection is failed.
    Protocol,
    /// The caller used the API incorrectly. Reported synchronously, the
    /// connection state is left untouched.
    Misuse,
}

/// Represents errors that can occur during WebSocket operations.
///
/// Each variant belongs to exactly one [`ErrorKind`], see [`WebSocketError::kind`].
#[derive(Error, Debug)]
pub enum WebSocketError {
    // ---- protocol ----
    /// Indicates receipt of a frame with a reserved opcode (0x3-0x7, 0xB-0xF).
    #[error("Invalid opcode (byte={0})")]
    InvalidOpCode(u8),

    /// Indicates that reserved bits in the frame header are set. No extension is
    /// ever negotiated, so all three must be zero.
    #[error("Reserved bits are not zero")]
    ReservedBitsNotZero,

    /// Occurs when a control frame (ping, pong, or close) is received with the FIN bit
    /// not set. RFC 6455 requires that control frames must not be fragmented.
    #[error("Control frame must not be fragmented")]
    ControlFrameFragmented,

    /// A control frame announced a payload larger than 125 bytes.
    #[error("Control frame payload too large ({0} bytes)")]
    ControlFrameTooLarge(u64),

    /// The server sent a frame with the mask bit set.
    #[error("Server frames must not be masked")]
    MaskedServerFrame,

    /// A client frame without a masking key, seen by a decoder acting as the server.
    #[error("Client frames must be masked")]
    UnmaskedClientFrame,

    /// Occurs when receiving a continuation frame without a preceding initial frame.
    #[error("Invalid continuation frame")]
    InvalidContinuationFrame,

    /// Occurs when a new text or binary frame arrives before the previous
    /// fragmented message was completed.
    #[error("Invalid fragment")]
    InvalidFragment,

    /// The 64-bit extended payload length has its most significant bit set.
    #[error("Payload length exceeds 2^63-1")]
    PayloadLengthOverflow,

    /// An extended payload length was used for a payload that fits a shorter form.
    #[error("Payload length {0} is not minimally encoded")]
    NonMinimalLength(u64),

    /// Occurs when a frame or a reassembled message exceeds the configured size limit.
    #[error("Frame too large")]
    FrameTooLarge,

    /// Indicates that a received close frame carries a 1-byte payload.
    #[error("Invalid close frame")]
    InvalidCloseFrame,

    // ---- handshake ----
    /// The upgrade response did not carry a `101` status.
    #[error("Invalid status code: {0}")]
    InvalidStatusCode(u16),

    /// The server answered the upgrade with a redirect. Redirects are never followed.
    #[error("Upgrade redirected ({status}) to {location}")]
    Redirected {
        /// HTTP status code of the response (3xx).
        status: u16,
        /// Value of the `Location` header.
        location: String,
    },

    /// The status line of the upgrade response could not be parsed.
    #[error("Malformed handshake response")]
    MalformedResponse,

    /// Indicates that the "Upgrade" header is either missing or is not "websocket".
    #[error("Invalid upgrade header")]
    InvalidUpgradeHeader,

    /// Indicates that the "Connection" header is either missing or is not "Upgrade".
    #[error("Invalid connection header")]
    InvalidConnectionHeader,

    /// The upgrade response has no `Sec-WebSocket-Accept` header.
    #[error("Sec-WebSocket-Accept header is missing")]
    MissingSecWebSocketAccept,

    /// The `Sec-WebSocket-Accept` value does not match the one derived from our key.
    #[error("Sec-WebSocket-Accept mismatch: expected {expected}, got {actual}")]
    InvalidSecWebSocketAccept {
        /// The accept value derived from the request key.
        expected: String,
        /// The accept value sent by the server.
        actual: String,
    },

    /// The server sent more header bytes than we are willing to buffer.
    #[error("Handshake response too large")]
    HandshakeTooLarge,

    // ---- caller misuse ----
    /// A new message was started while a fragmented message is still in flight.
    #[error("A fragmented message is already in progress")]
    FragmentInProgress,

    /// Only text and binary opcodes can start a data message.
    #[error("{0:?} cannot start a data message")]
    NotADataOpCode(OpCode),

    /// A fragmented send was requested without any chunk.
    #[error("A fragmented message needs at least one chunk")]
    EmptyMessage,

    /// A control frame payload given by the caller is larger than 125 bytes.
    #[error("Control payload of {0} bytes exceeds 125 bytes")]
    ControlPayloadTooLarge(usize),

    /// Returned when attempting to establish a WebSocket connection with an invalid URL scheme.
    /// Only "ws://" and "wss://" schemes are valid.
    #[error("Invalid http scheme")]
    InvalidHttpScheme,

    /// The URL has no host component.
    #[error("URL has no host")]
    MissingHost,

    /// Wraps errors from URL parsing that may occur when processing WebSocket URLs.
    #[error(transparent)]
    UrlParseError(#[from] url::ParseError),

    // ---- transport ----
    /// The transport closed or the connection already reached a terminal state.
    #[error("Connection is closed")]
    ConnectionClosed,

    /// The transport reached EOF in the middle of a frame.
    #[error("Connection closed in the middle of a frame")]
    TruncatedFrame,

    /// The connection attempt did not complete within the configured timeout.
    #[error("Connection timed out")]
    Timeout,

    /// The host name is not a valid TLS server name.
    #[error("Invalid DNS name: {0}")]
    InvalidDnsName(String),

    /// Wraps standard I/O errors that may occur during WebSocket communication,
    /// such as connection resets or TLS failures surfaced by the stream.
    #[error(transparent)]
    IoError(#[from] std::io::Error),
}

impl WebSocketError {
    /// Returns the class this error belongs to.
    pub fn kind(&self) -> ErrorKind {
        use WebSocketError::*;

        match self {
            InvalidOpCode(_)
            | ReservedBitsNotZero
            | ControlFrameFragmented
            | ControlFrameTooLarge(_)
            | MaskedServerFrame
            | UnmaskedClientFrame
            | InvalidContinuationFrame
            | InvalidFragment
            | PayloadLengthOverflow
            | NonMinimalLength(_)
            | FrameTooLarge
            | InvalidCloseFrame => ErrorKind::Protocol,
            InvalidStatusCode(_)
            | Redirected { .. }
            | MalformedResponse
            | InvalidUpgradeHeader
            | InvalidConnectionHeader
            | MissingSecWebSocketAccept
            | InvalidSecWebSocketAccept { .. }
            | HandshakeTooLarge => ErrorKind::Handshake,
            FragmentInProgress
            | NotADataOpCode(_)
            | EmptyMessage
            | ControlPayloadTooLarge(_)
            | InvalidHttpScheme
            | MissingHost
            | UrlParseError(_) => ErrorKind::Misuse,
            ConnectionClosed | TruncatedFrame | Timeout | InvalidDnsName(_) | IoError(_) => {
                ErrorKind::Transport
            }
        }
    }

    /// Returns `true` if the error terminates the connection.
    pub fn is_fatal(&self) -> bool {
        self.kind() != ErrorKind::Misuse
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kinds() {
        assert_eq!(WebSocketError::InvalidOpCode(3).kind(), ErrorKind::Protocol);
        assert_eq!(WebSocketError::MaskedServerFrame.kind(), ErrorKind::Protocol);
        assert_eq!(WebSocketError::NonMinimalLength(5).kind(), ErrorKind::Protocol);
        assert_eq!(WebSocketError::TruncatedFrame.kind(), ErrorKind::Transport);
        assert_eq!(
            WebSocketError::InvalidStatusCode(404).kind(),
            ErrorKind::Handshake
        );
        assert_eq!(
            WebSocketError::MissingSecWebSocketAccept.kind(),
            ErrorKind::Handshake
        );
        assert_eq!(WebSocketError::FragmentInProgress.kind(), ErrorKind::Misuse);

        let io = std::io::Error::from(std::io::ErrorKind::ConnectionRefused);
        assert_eq!(WebSocketError::from(io).kind(), ErrorKind::Transport);
    }

    #[test]
    fn test_misuse_is_not_fatal() {
        assert!(!WebSocketError::FragmentInProgress.is_fatal());
        assert!(WebSocketError::InvalidFragment.is_fatal());
        assert!(WebSocketError::Timeout.is_fatal());
    }
}
