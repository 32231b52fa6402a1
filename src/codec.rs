//! Encoding and decoding of RFC 6455 frames.
//!
//! The free functions [`decode_frame`] and [`encode_frame`] are pure and operate on plain
//! byte buffers. [`Decoder`] and [`Encoder`] wrap the same layout rules as
//! [`tokio_util::codec`] implementations so a transport can be driven through
//! [`tokio_util::codec::Framed`].
use bytes::{Buf, BytesMut};
use tokio_util::codec;

use crate::{
    frame::{
        Frame, FIN_BIT, LEN_BITS, MASK_BIT, MAX_CONTROL_PAYLOAD, MAX_HEAD_SIZE, OPCODE_BITS,
        RSV_BITS,
    },
    mask, OpCode, Result, WebSocketError,
};

/// The endpoint role of whoever is decoding.
///
/// It decides which masking is legal: a client only accepts unmasked frames from the
/// server, a server only accepts masked frames from a client.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Role {
    Client,
    Server,
}

/// Outcome of a [`decode_frame`] call that did not fail.
#[derive(Debug, PartialEq, Eq)]
pub enum Decoded {
    /// The buffer holds a partial frame. Retry once more bytes have arrived.
    NeedMoreData,
    /// A complete frame, and how many bytes of the buffer it occupied.
    Frame {
        /// The decoded frame, payload already unmasked.
        frame: Frame,
        /// Header plus payload length. Bytes past this offset belong to the next frame.
        consumed: usize,
    },
}

/// The fixed and extended header fields of a frame, everything that precedes the payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameHeader {
    /// FIN flag.
    pub fin: bool,
    /// RSV1..RSV3, right-aligned.
    pub rsv: u8,
    /// The operation code of the frame.
    pub opcode: OpCode,
    /// The masking key, if the MASK bit is set.
    pub mask: Option<[u8; 4]>,
    /// Announced payload length.
    pub payload_len: u64,
    /// Number of header bytes, 2 to 14.
    pub header_len: usize,
}

/// Parses and validates a frame header from the start of `buf`.
///
/// Returns `Ok(None)` when `buf` does not yet hold the whole header. Protocol
/// violations are reported as soon as the bytes proving them are available:
///
/// - non-zero reserved bits, or a reserved opcode
/// - a mask bit that is illegal for `role`
/// - a fragmented control frame, or one with more than 125 payload bytes
/// - a 64-bit length with the most significant bit set
/// - an extended length that is not the shortest encoding of the payload length
pub fn decode_header(buf: &[u8], role: Role) -> Result<Option<FrameHeader>> {
    if buf.len() < 2 {
        return Ok(None);
    }

    let fin = buf[0] & FIN_BIT != 0;
    let rsv = (buf[0] & RSV_BITS) >> 4;
    if rsv != 0 {
        return Err(WebSocketError::ReservedBitsNotZero);
    }

    let opcode = OpCode::try_from(buf[0] & OPCODE_BITS)?;
    let masked = buf[1] & MASK_BIT != 0;
    let length_code = buf[1] & LEN_BITS;

    match role {
        Role::Client if masked => return Err(WebSocketError::MaskedServerFrame),
        Role::Server if !masked => return Err(WebSocketError::UnmaskedClientFrame),
        _ => {}
    }

    if opcode.is_control() && !fin {
        return Err(WebSocketError::ControlFrameFragmented);
    }

    let extra = match length_code {
        126 => 2,
        127 => 8,
        _ => 0,
    };
    let header_len = 2 + extra + usize::from(masked) * 4;
    if buf.len() < header_len {
        return Ok(None);
    }

    let payload_len = match extra {
        0 => u64::from(length_code),
        2 => u64::from(u16::from_be_bytes([buf[2], buf[3]])),
        _ => {
            let mut raw = [0u8; 8];
            raw.copy_from_slice(&buf[2..10]);
            let len = u64::from_be_bytes(raw);
            if len >> 63 != 0 {
                return Err(WebSocketError::PayloadLengthOverflow);
            }
            len
        }
    };

    if (extra == 2 && payload_len < 126) || (extra == 8 && payload_len <= u64::from(u16::MAX)) {
        return Err(WebSocketError::NonMinimalLength(payload_len));
    }

    if opcode.is_control() && payload_len > MAX_CONTROL_PAYLOAD as u64 {
        return Err(WebSocketError::ControlFrameTooLarge(payload_len));
    }

    let mask = if masked {
        let at = 2 + extra;
        Some([buf[at], buf[at + 1], buf[at + 2], buf[at + 3]])
    } else {
        None
    };

    Ok(Some(FrameHeader {
        fin,
        rsv,
        opcode,
        mask,
        payload_len,
        header_len,
    }))
}

/// Decodes one frame from the start of `buf`.
///
/// `buf` may hold a partial frame, exactly one frame, or one frame followed by
/// bytes of the next. On success the caller advances its buffer by `consumed` and
/// calls again for the remainder. Nothing is retained between calls: the buffer
/// accumulated so far is the only state.
pub fn decode_frame(buf: &[u8], role: Role) -> Result<Decoded> {
    let Some(header) = decode_header(buf, role)? else {
        return Ok(Decoded::NeedMoreData);
    };

    let payload_len =
        usize::try_from(header.payload_len).map_err(|_| WebSocketError::FrameTooLarge)?;
    let Some(consumed) = header.header_len.checked_add(payload_len) else {
        return Err(WebSocketError::FrameTooLarge);
    };
    if buf.len() < consumed {
        return Ok(Decoded::NeedMoreData);
    }

    let payload = BytesMut::from(&buf[header.header_len..consumed]);
    Ok(Decoded::Frame {
        frame: header.into_frame(payload),
        consumed,
    })
}

impl FrameHeader {
    /// Attaches the payload bytes that followed this header, unmasking them.
    fn into_frame(self, mut payload: BytesMut) -> Frame {
        if let Some(key) = self.mask {
            mask::apply_mask(&mut payload, key);
        }
        let mut frame = Frame::new(self.fin, self.opcode, self.mask, payload);
        frame.rsv = self.rsv;
        frame
    }
}

/// Encodes a single frame.
///
/// When `masked` is set a fresh random key is drawn and the payload is XOR-ed with
/// it on the way out. The output is exactly
/// [`header_len`](crate::frame::header_len)`(payload.len(), masked) + payload.len()` bytes long.
pub fn encode_frame(opcode: OpCode, payload: &[u8], fin: bool, masked: bool) -> BytesMut {
    let key = masked.then(mask::random_mask);
    let frame = Frame::new(fin, opcode, key, payload);

    let mut dst = BytesMut::with_capacity(frame.encoded_len());
    write_frame(&frame, &mut dst);
    dst
}

/// Appends the wire form of `frame` to `dst`, masking the payload if the frame has a key.
fn write_frame(frame: &Frame, dst: &mut BytesMut) {
    let mut head = [0; MAX_HEAD_SIZE];
    let size = frame.fmt_head(&mut head);

    dst.reserve(size + frame.payload.len());
    dst.extend_from_slice(&head[..size]);

    let start = dst.len();
    dst.extend_from_slice(&frame.payload);
    if let Some(key) = frame.mask_key() {
        mask::apply_mask(&mut dst[start..], key);
    }
}

/// A combined codec that provides both encoding and decoding of WebSocket frames.
pub struct Codec {
    decoder: Decoder,
    encoder: Encoder,
}

impl From<(Decoder, Encoder)> for Codec {
    fn from((decoder, encoder): (Decoder, Encoder)) -> Self {
        Self { decoder, encoder }
    }
}

impl codec::Decoder for Codec {
    type Item = <Decoder as codec::Decoder>::Item;
    type Error = <Decoder as codec::Decoder>::Error;

    #[inline]
    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        self.decoder.decode(src)
    }

    #[inline]
    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        self.decoder.decode_eof(src)
    }
}

impl codec::Encoder<Frame> for Codec {
    type Error = <Encoder as codec::Encoder<Frame>>::Error;

    #[inline]
    fn encode(&mut self, item: Frame, dst: &mut BytesMut) -> Result<()> {
        self.encoder.encode(item, dst)
    }
}

/// Streaming frame decoder.
///
/// Once a header is complete it is consumed from the buffer and kept here until
/// the payload has arrived, so a header is validated exactly once no matter how
/// the transport splits the bytes.
pub struct Decoder {
    role: Role,
    /// Header already consumed from the buffer, waiting for its payload.
    pending: Option<FrameHeader>,
    /// Maximum allowed size for a single frame payload.
    max_payload_size: usize,
}

impl Decoder {
    /// Creates a decoder for `role` that rejects payloads larger than `max_payload_size` bytes.
    pub fn new(role: Role, max_payload_size: usize) -> Self {
        Self {
            role,
            pending: None,
            max_payload_size,
        }
    }
}

impl codec::Decoder for Decoder {
    type Item = Frame;
    type Error = WebSocketError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        let header = match self.pending.take() {
            Some(header) => header,
            None => {
                let Some(header) = decode_header(src, self.role)? else {
                    return Ok(None);
                };
                if header.payload_len > self.max_payload_size as u64 {
                    return Err(WebSocketError::FrameTooLarge);
                }
                src.advance(header.header_len);
                header
            }
        };

        // bounded by max_payload_size above
        let payload_len = header.payload_len as usize;
        if src.len() < payload_len {
            src.reserve(payload_len - src.len());
            self.pending = Some(header);
            return Ok(None);
        }

        let payload = src.split_to(payload_len);
        Ok(Some(header.into_frame(payload)))
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        match self.decode(src)? {
            Some(frame) => Ok(Some(frame)),
            None if self.pending.is_none() && src.is_empty() => Ok(None),
            None => Err(WebSocketError::TruncatedFrame),
        }
    }
}

/// WebSocket frame encoder.
///
/// The payload of the [`Frame`] is expected unmasked; if the frame carries a key the
/// encoder masks the bytes it writes.
pub struct Encoder;

impl codec::Encoder<Frame> for Encoder {
    type Error = WebSocketError;

    fn encode(&mut self, frame: Frame, dst: &mut BytesMut) -> Result<()> {
        write_frame(&frame, dst);
        Ok(())
    }
}
