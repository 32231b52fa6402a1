//! Sequencing of fragmented messages, [RFC 6455 Section 5.4](https://datatracker.ietf.org/doc/html/rfc6455#section-5.4).
//!
//! A fragmented message is one Text or Binary frame with `fin=0`, any number of
//! Continuation frames with `fin=0`, and a last Continuation frame with `fin=1`.
//! Control frames may appear between the fragments but never belong to them.
//!
//! [`Fragmenter`] decides the opcode and FIN flag of each outbound chunk,
//! [`Reassembler`] glues inbound fragments back into a message.
use bytes::{Bytes, BytesMut};

use crate::{Frame, FrameView, OpCode, Result, WebSocketError};

/// Where a fragmented message is in its lifecycle.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub enum Tag {
    /// No message is in flight.
    #[default]
    NotFragmenting,
    /// The first fragment went out (or came in), nothing after it yet.
    Started,
    /// At least one continuation fragment followed the first one.
    Continuing,
}

/// Outbound sequencer for a single direction.
///
/// ```
/// use wsraw::{fragment::Fragmenter, OpCode};
///
/// let mut fragmenter = Fragmenter::default();
/// assert_eq!(fragmenter.next_frame(OpCode::Text, false).unwrap(), (OpCode::Text, false));
/// assert_eq!(fragmenter.next_frame(OpCode::Text, false).unwrap(), (OpCode::Continuation, false));
/// assert_eq!(fragmenter.next_frame(OpCode::Text, true).unwrap(), (OpCode::Continuation, true));
/// assert!(fragmenter.is_idle());
/// ```
#[derive(Debug, Default)]
pub struct Fragmenter {
    tag: Tag,
    /// Opcode of the first fragment of the message in flight.
    opcode: Option<OpCode>,
}

impl Fragmenter {
    /// Current tag.
    pub fn tag(&self) -> Tag {
        self.tag
    }

    /// Returns `true` when no fragmented message is in flight.
    pub fn is_idle(&self) -> bool {
        self.tag == Tag::NotFragmenting
    }

    /// Returns the `(opcode, fin)` pair to use for the next chunk of a message of
    /// type `opcode`, and advances the sequence.
    ///
    /// | tag            | last  | opcode       | fin   | next tag       |
    /// |----------------|-------|--------------|-------|----------------|
    /// | NotFragmenting | true  | Text/Binary  | true  | NotFragmenting |
    /// | NotFragmenting | false | Text/Binary  | false | Started        |
    /// | Started        | false | Continuation | false | Continuing     |
    /// | Started/Cont.  | true  | Continuation | true  | NotFragmenting |
    /// | Continuing     | false | Continuation | false | Continuing     |
    ///
    /// A chunk of a different message type while a message is in flight is rejected
    /// with [`WebSocketError::FragmentInProgress`] and the sequence is left untouched.
    pub fn next_frame(&mut self, opcode: OpCode, is_last: bool) -> Result<(OpCode, bool)> {
        if !opcode.is_data() {
            return Err(WebSocketError::NotADataOpCode(opcode));
        }

        match self.tag {
            Tag::NotFragmenting => {
                if !is_last {
                    self.tag = Tag::Started;
                    self.opcode = Some(opcode);
                }
                Ok((opcode, is_last))
            }
            Tag::Started | Tag::Continuing => {
                if self.opcode != Some(opcode) {
                    return Err(WebSocketError::FragmentInProgress);
                }
                if is_last {
                    self.reset();
                } else {
                    self.tag = Tag::Continuing;
                }
                Ok((OpCode::Continuation, is_last))
            }
        }
    }

    /// Forgets any message in flight.
    pub fn reset(&mut self) {
        self.tag = Tag::NotFragmenting;
        self.opcode = None;
    }
}

/// Result of feeding one inbound frame to a [`Reassembler`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reassembled {
    /// A whole data message: either an unfragmented frame or the concatenation of
    /// all fragments. `opcode` is Text or Binary, never Continuation.
    Complete {
        /// Type of the message, taken from its first fragment.
        opcode: OpCode,
        /// The message payload.
        payload: Bytes,
    },
    /// A control frame, passed through untouched. It does not disturb a
    /// fragmented message in flight.
    Control(FrameView),
    /// The frame was a fragment and the message is not finished yet.
    Pending,
}

/// Inbound reassembly of fragmented messages.
#[derive(Debug)]
pub struct Reassembler {
    tag: Tag,
    /// Opcode of the first fragment.
    opcode: Option<OpCode>,
    /// Accumulated payload of the fragments received so far.
    buffer: BytesMut,
    /// A fragmented message whose payload grows past this size is rejected.
    max_size: usize,
}

impl Reassembler {
    /// Creates a reassembler that refuses messages larger than `max_size` bytes.
    pub fn new(max_size: usize) -> Self {
        Self {
            tag: Tag::NotFragmenting,
            opcode: None,
            buffer: BytesMut::new(),
            max_size,
        }
    }

    /// Current tag.
    pub fn tag(&self) -> Tag {
        self.tag
    }

    /// Processes one decoded frame.
    ///
    /// # Errors
    /// - [`WebSocketError::InvalidContinuationFrame`] for a continuation with no message in flight.
    /// - [`WebSocketError::InvalidFragment`] for a Text or Binary frame while a message is in flight.
    /// - [`WebSocketError::FrameTooLarge`] when the accumulated payload exceeds the limit.
    pub fn on_frame(&mut self, frame: Frame) -> Result<Reassembled> {
        match frame.opcode {
            OpCode::Text | OpCode::Binary => {
                if self.tag != Tag::NotFragmenting {
                    return Err(WebSocketError::InvalidFragment);
                }

                if frame.fin {
                    return Ok(Reassembled::Complete {
                        opcode: frame.opcode,
                        payload: frame.payload.freeze(),
                    });
                }

                self.check_size(frame.payload.len())?;
                self.tag = Tag::Started;
                self.opcode = Some(frame.opcode);
                self.buffer.extend_from_slice(&frame.payload);
                Ok(Reassembled::Pending)
            }
            OpCode::Continuation => {
                let opcode = match (self.tag, self.opcode) {
                    (Tag::NotFragmenting, _) | (_, None) => {
                        return Err(WebSocketError::InvalidContinuationFrame)
                    }
                    (_, Some(opcode)) => opcode,
                };

                self.check_size(frame.payload.len())?;
                self.buffer.extend_from_slice(&frame.payload);

                if frame.fin {
                    let payload = self.buffer.split().freeze();
                    self.tag = Tag::NotFragmenting;
                    self.opcode = None;
                    Ok(Reassembled::Complete { opcode, payload })
                } else {
                    self.tag = Tag::Continuing;
                    Ok(Reassembled::Pending)
                }
            }
            OpCode::Close | OpCode::Ping | OpCode::Pong => {
                Ok(Reassembled::Control(FrameView::from(frame)))
            }
        }
    }

    fn check_size(&self, incoming: usize) -> Result<()> {
        if self.buffer.len() + incoming > self.max_size {
            return Err(WebSocketError::FrameTooLarge);
        }
        Ok(())
    }
}
