//! # Frame
//!
//! The `frame` module implements WebSocket frames as defined in [RFC 6455 Section 5.2](https://datatracker.ietf.org/doc/html/rfc6455#section-5.2).
//!
//! ### Frame Binary Format
//!
//! ```text
//!  0                   1                   2                   3
//!  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
//! +-+-+-+-+-------+-+-------------+-------------------------------+
//! |F|R|R|R| opcode|M| Payload len |    Extended payload length    |
//! |I|S|S|S|  (4)  |A|     (7)     |         (16 or 64 bits)       |
//! |N|V|V|V|       |S|             |                               |
//! | |1|2|3|       |K|             |                               |
//! +-+-+-+-+-------+-+-------------+-------------------------------+
//! |        Extended payload length continued, if payload len == 127|
//! +---------------------------------------------------------------+
//! |                               |   Masking-key, if MASK set to 1|
//! +-------------------------------+-------------------------------+
//! |     Masking-key (continued)       |          Payload Data      |
//! +-----------------------------------+ - - - - - - - - - - - - - -+
//! :                     Payload Data continued ...                :
//! +---------------------------------------------------------------+
//! ```
//!
//! Bit ranges, most significant bit first:
//!
//! | byte | bits | field |
//! |------|------|-------|
//! | 0 | 7 | FIN |
//! | 0 | 6..4 | RSV1..RSV3 |
//! | 0 | 3..0 | opcode |
//! | 1 | 7 | MASK |
//! | 1 | 6..0 | base payload length (0-125, 126 = 16-bit, 127 = 64-bit follows) |
//!
//! The header length is a function of the payload length and the mask flag alone,
//! see [`header_len`].
use bytes::{Bytes, BytesMut};

use crate::{close::CloseCode, WebSocketError};

/// Bit 7 of byte 0.
pub(crate) const FIN_BIT: u8 = 0b1000_0000;
/// Bits 6..4 of byte 0.
pub(crate) const RSV_BITS: u8 = 0b0111_0000;
/// Bits 3..0 of byte 0.
pub(crate) const OPCODE_BITS: u8 = 0b0000_1111;
/// Bit 7 of byte 1.
pub(crate) const MASK_BIT: u8 = 0b1000_0000;
/// Bits 6..0 of byte 1.
pub(crate) const LEN_BITS: u8 = 0b0111_1111;

/// Largest payload a control frame may carry.
pub const MAX_CONTROL_PAYLOAD: usize = 125;

/// Largest possible header: 2 base bytes, 8 length bytes and a 4 byte mask.
pub(crate) const MAX_HEAD_SIZE: usize = 14;

/// WebSocket operation code (OpCode) that determines the semantic meaning and handling of a frame.
///
/// The numeric values for each OpCode are defined in [RFC 6455, Section 11.8](https://datatracker.ietf.org/doc/html/rfc6455#section-11.8):
/// - Continuation = 0x0
/// - Text = 0x1
/// - Binary = 0x2
/// - Close = 0x8
/// - Ping = 0x9
/// - Pong = 0xA
///
/// The ranges 0x3-0x7 and 0xB-0xF are reserved and rejected with
/// [`WebSocketError::InvalidOpCode`].
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum OpCode {
    Continuation,
    Text,
    Binary,
    Close,
    Ping,
    Pong,
}

impl OpCode {
    /// Returns `true` if the `OpCode` represents a control frame (`Close`, `Ping`, or `Pong`).
    ///
    /// Control frames cannot be fragmented and carry at most 125 payload bytes.
    pub fn is_control(&self) -> bool {
        matches!(*self, OpCode::Close | OpCode::Ping | OpCode::Pong)
    }

    /// Returns `true` for the opcodes that can start a data message.
    pub fn is_data(&self) -> bool {
        matches!(*self, OpCode::Text | OpCode::Binary)
    }
}

impl TryFrom<u8> for OpCode {
    type Error = WebSocketError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x0 => Ok(Self::Continuation),
            0x1 => Ok(Self::Text),
            0x2 => Ok(Self::Binary),
            0x8 => Ok(Self::Close),
            0x9 => Ok(Self::Ping),
            0xA => Ok(Self::Pong),
            _ => Err(WebSocketError::InvalidOpCode(value)),
        }
    }
}

impl From<OpCode> for u8 {
    fn from(val: OpCode) -> Self {
        match val {
            OpCode::Continuation => 0x0,
            OpCode::Text => 0x1,
            OpCode::Binary => 0x2,
            OpCode::Close => 0x8,
            OpCode::Ping => 0x9,
            OpCode::Pong => 0xA,
        }
    }
}

/// Returns the exact header length for a payload of `payload_len` bytes.
///
/// 2 base bytes, plus 2 if the length is in `126..=65535`, plus 8 if it is larger,
/// plus 4 if the frame is masked. No other header sizes exist.
#[inline]
pub const fn header_len(payload_len: u64, masked: bool) -> usize {
    let extended = if payload_len <= 125 {
        0
    } else if payload_len <= 65535 {
        2
    } else {
        8
    };
    2 + extended + if masked { 4 } else { 0 }
}

/// An immutable message-level view of a frame: just the opcode and the unmasked payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameView {
    /// The operation code indicating the type of frame (Text, Binary, Close, etc.)
    pub opcode: OpCode,
    /// The frame's payload data, already unmasked.
    pub payload: Bytes,
}

impl FrameView {
    /// Extracts the close code from a Close frame's payload.
    ///
    /// Returns `None` if the payload is shorter than two bytes.
    pub fn close_code(&self) -> Option<CloseCode> {
        let code = u16::from_be_bytes(self.payload.get(0..2)?.try_into().ok()?);
        Some(CloseCode::from(code))
    }

    /// Extracts the UTF-8 close reason that follows the status code.
    ///
    /// Returns `None` if there is no status code or the reason is not valid UTF-8.
    pub fn close_reason(&self) -> Option<&str> {
        std::str::from_utf8(self.payload.get(2..)?).ok()
    }

    /// Creates a new text frame view.
    pub fn text(payload: impl Into<Bytes>) -> Self {
        Self {
            opcode: OpCode::Text,
            payload: payload.into(),
        }
    }

    /// Creates a close frame view whose payload is the big-endian code followed by `reason`.
    pub fn close(code: CloseCode, reason: impl AsRef<[u8]>) -> Self {
        let code16 = u16::from(code);
        let reason: &[u8] = reason.as_ref();
        let mut payload = Vec::with_capacity(2 + reason.len());
        payload.extend_from_slice(&code16.to_be_bytes());
        payload.extend_from_slice(reason);

        Self {
            opcode: OpCode::Close,
            payload: payload.into(),
        }
    }

    /// Creates a close frame view with a raw payload, without enforcing code/reason structure.
    pub fn close_raw(payload: impl Into<Bytes>) -> Self {
        Self {
            opcode: OpCode::Close,
            payload: payload.into(),
        }
    }

    /// Creates a new ping frame view.
    pub fn ping(payload: impl Into<Bytes>) -> Self {
        Self {
            opcode: OpCode::Ping,
            payload: payload.into(),
        }
    }

    /// Creates a new pong frame view.
    pub fn pong(payload: impl Into<Bytes>) -> Self {
        Self {
            opcode: OpCode::Pong,
            payload: payload.into(),
        }
    }
}

impl From<Frame> for FrameView {
    fn from(value: Frame) -> Self {
        Self {
            opcode: value.opcode,
            payload: value.payload.freeze(),
        }
    }
}

/// A single RFC 6455 frame, either decoded from the wire or about to be encoded.
///
/// A decoded frame keeps the header fields it was received with (including the
/// masking key), so callers can inspect exactly what the peer sent. The payload
/// is always stored unmasked.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Indicates if this is the final frame in a message.
    pub fin: bool,
    /// The three reserved bits, right-aligned (RSV1 is bit 2).
    pub rsv: u8,
    /// The opcode of the frame, defining its type.
    pub opcode: OpCode,
    /// The masking key, present iff the MASK bit is set.
    mask: Option<[u8; 4]>,
    /// The unmasked payload.
    pub payload: BytesMut,
}

impl Frame {
    /// Creates a new frame with the reserved bits cleared.
    ///
    /// `mask` is only the key that will be written to the header; the payload is
    /// expected unmasked and is masked during encoding.
    pub fn new(
        fin: bool,
        opcode: OpCode,
        mask: Option<[u8; 4]>,
        payload: impl Into<BytesMut>,
    ) -> Self {
        Self {
            fin,
            rsv: 0,
            opcode,
            mask,
            payload: payload.into(),
        }
    }

    /// Returns whether the frame carries a masking key.
    #[inline(always)]
    pub fn is_masked(&self) -> bool {
        self.mask.is_some()
    }

    /// Returns the masking key, if any.
    #[inline(always)]
    pub fn mask_key(&self) -> Option<[u8; 4]> {
        self.mask
    }

    /// Length of the header this frame encodes to.
    #[inline]
    pub fn header_len(&self) -> usize {
        header_len(self.payload.len() as u64, self.is_masked())
    }

    /// Total encoded length, header plus payload.
    #[inline]
    pub fn encoded_len(&self) -> usize {
        self.header_len() + self.payload.len()
    }

    /// Formats the frame header into `head` and returns the number of bytes written.
    ///
    /// # Panics
    /// Panics if `head` is shorter than [`Frame::header_len`].
    pub(crate) fn fmt_head(&self, head: &mut [u8]) -> usize {
        head[0] = (u8::from(self.fin) << 7) | ((self.rsv << 4) & RSV_BITS) | u8::from(self.opcode);

        let len = self.payload.len();
        let size = if len <= 125 {
            head[1] = len as u8;
            2
        } else if len <= 65535 {
            head[1] = 126;
            head[2..4].copy_from_slice(&(len as u16).to_be_bytes());
            4
        } else {
            head[1] = 127;
            head[2..10].copy_from_slice(&(len as u64).to_be_bytes());
            10
        };

        if let Some(mask) = self.mask {
            head[1] |= MASK_BIT;
            head[size..size + 4].copy_from_slice(&mask);
            size + 4
        } else {
            size
        }
    }
}

impl From<FrameView> for Frame {
    fn from(value: FrameView) -> Self {
        Frame::new(true, value.opcode, None, BytesMut::from(&value.payload[..]))
    }
}
