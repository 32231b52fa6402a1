use std::time::Duration;

use bytes::{Bytes, BytesMut};
use futures::{SinkExt, StreamExt};
use tokio::{
    io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt},
    time::Instant,
};
use tokio_util::codec::{Framed, FramedParts};
use url::Url;

use crate::{
    close::CloseCode,
    codec::{self, Codec, Role},
    fragment::{Fragmenter, Reassembled, Reassembler},
    frame::{FrameView, MAX_CONTROL_PAYLOAD},
    handshake::{self, HandshakeContext, Request},
    mask,
    options::Options,
    state::{Event, State},
    stream::{self, MaybeTlsStream},
    ErrorKind, Frame, OpCode, Result, WebSocketError,
};

/// Something that came out of the connection.
#[derive(Debug)]
pub enum Incoming {
    /// A complete data message, reassembled if it was fragmented.
    Message {
        /// The message payload.
        payload: Bytes,
        /// `true` for a binary message, `false` for text.
        is_binary: bool,
    },
    /// A control frame. Pings are answered before they are reported, a close frame
    /// is echoed before it is reported.
    Control {
        /// `Close`, `Ping` or `Pong`.
        opcode: OpCode,
        /// The control payload.
        payload: Bytes,
    },
    /// The connection reached [`State::Closed`]. Reported once.
    Closed {
        /// Status code of the close frame, the peer's if one arrived.
        code: Option<CloseCode>,
        /// Reason of the close frame.
        reason: Option<String>,
    },
    /// The connection reached [`State::Failed`]. Reported once.
    Error(WebSocketError),
}

/// Callbacks driven by [`WebSocket::run`]. Every method defaults to doing nothing.
pub trait Handler {
    /// The connection is open.
    fn on_open(&mut self) {}

    /// A complete data message arrived.
    fn on_message(&mut self, _payload: Bytes, _is_binary: bool) {}

    /// A control frame arrived.
    fn on_control(&mut self, _opcode: OpCode, _payload: Bytes) {}

    /// The connection closed cleanly.
    fn on_close(&mut self, _code: Option<CloseCode>, _reason: Option<String>) {}

    /// The connection failed.
    fn on_error(&mut self, _kind: ErrorKind, _error: WebSocketError) {}
}

/// A client-side WebSocket connection.
///
/// Outbound frames are always masked. Inbound frames must not be.
///
/// A `WebSocket` is created by [`WebSocket::connect`], which dials TCP (and TLS for
/// `wss://`), or by [`WebSocket::handshake`] over an already connected transport.
/// Either way it is returned in [`State::Open`].
pub struct WebSocket<S = MaybeTlsStream> {
    framed: Framed<S, Codec>,
    state: State,
    fragmenter: Fragmenter,
    reassembler: Reassembler,
    close_timeout: Duration,
    /// Deadline of the close grace period, set on entering `Closing`.
    close_deadline: Option<Instant>,
    close_sent: bool,
    /// Code and reason of the close frame that ended the connection.
    close_reason: Option<(Option<CloseCode>, Option<String>)>,
    /// The terminal outcome has been handed out.
    finished: bool,
}

impl WebSocket<MaybeTlsStream> {
    /// Connects to a `ws://` or `wss://` URL and performs the upgrade handshake.
    ///
    /// TCP connect, TLS and the upgrade are bounded together by
    /// [`Options::connect_timeout`].
    pub async fn connect(url: Url, options: Options) -> Result<Self> {
        let timeout = options.connect_timeout;
        tokio::time::timeout(timeout, Self::connect_priv(url, options))
            .await
            .map_err(|_| WebSocketError::Timeout)?
    }

    async fn connect_priv(url: Url, options: Options) -> Result<Self> {
        let request = Request::from_url(&url, &options)?;

        let host = url.host_str().ok_or(WebSocketError::MissingHost)?;
        // IPv6 literals keep their brackets in the URL
        let host = host.trim_start_matches('[').trim_end_matches(']');
        let port = url
            .port_or_known_default()
            .unwrap_or(if url.scheme() == "wss" { 443 } else { 80 });

        let tls = match (url.scheme(), &options.connector) {
            ("wss", Some(connector)) => Some(connector.clone()),
            ("wss", None) => Some(stream::tls_connector(options.verify_tls)?),
            _ => None,
        };

        #[cfg(feature = "logging")]
        log::debug!("{}: connecting to {host}:{port}", State::Connecting);

        let stream = match options.tcp_address {
            Some(address) => MaybeTlsStream::connect(address, host, tls).await?,
            None => MaybeTlsStream::connect((host, port), host, tls).await?,
        };

        let state = advance(State::Connecting, Event::TransportConnected);
        Self::handshake_priv(stream, state, &request, HandshakeContext::new(), &options).await
    }
}

impl<S> WebSocket<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Performs the upgrade handshake over an already connected transport.
    ///
    /// Bytes the server sends right after its response headers are kept and
    /// decoded as frames.
    pub async fn handshake(io: S, url: Url, options: Options) -> Result<Self> {
        let request = Request::from_url(&url, &options)?;
        Self::handshake_priv(
            io,
            State::TransportOpen,
            &request,
            HandshakeContext::new(),
            &options,
        )
        .await
    }

    async fn handshake_priv(
        mut io: S,
        state: State,
        request: &Request,
        context: HandshakeContext,
        options: &Options,
    ) -> Result<Self> {
        io.write_all(&handshake::build_request(request, context.key()))
            .await?;
        io.flush().await?;
        let state = advance(state, Event::RequestWritten);

        let mut buf = BytesMut::with_capacity(1024);
        let end = loop {
            if let Some(end) = handshake::find_header_end(&buf) {
                break end;
            }
            if buf.len() >= handshake::MAX_RESPONSE_SIZE {
                return Err(handshake_failed(state, WebSocketError::HandshakeTooLarge));
            }
            if io.read_buf(&mut buf).await? == 0 {
                return Err(handshake_failed(state, WebSocketError::ConnectionClosed));
            }
        };

        let head = buf.split_to(end);
        let validation = std::str::from_utf8(&head)
            .map_err(|_| WebSocketError::MalformedResponse)
            .and_then(|text| handshake::validate_response(text, context.expected_accept()));
        if let Err(err) = validation {
            return Err(handshake_failed(state, err));
        }

        let state = advance(state, Event::ResponseValidated);
        let state = advance(state, Event::Upgraded);

        let decoder = codec::Decoder::new(Role::Client, options.payload_limit());
        let mut parts = FramedParts::new::<Frame>(io, Codec::from((decoder, codec::Encoder)));
        // whatever followed the header block is already frame data
        parts.read_buf = buf;

        Ok(Self {
            framed: Framed::from_parts(parts),
            state,
            fragmenter: Fragmenter::default(),
            reassembler: Reassembler::new(options.read_buffer_limit()),
            close_timeout: options.close_timeout,
            close_deadline: None,
            close_sent: false,
            close_reason: None,
            finished: false,
        })
    }

    /// Current lifecycle state.
    pub fn state(&self) -> State {
        self.state
    }

    /// Sends a whole message in a single frame.
    ///
    /// Fails with [`WebSocketError::FragmentInProgress`] while a message started
    /// with [`WebSocket::send_fragment`] is unfinished.
    pub async fn send(&mut self, payload: impl AsRef<[u8]>, is_binary: bool) -> Result<()> {
        if !self.accepts_sends() {
            return Ok(());
        }
        if !self.fragmenter.is_idle() {
            return Err(WebSocketError::FragmentInProgress);
        }
        self.write_frame(data_opcode(is_binary), payload.as_ref(), true)
            .await
    }

    /// Sends a message split into one frame per chunk.
    ///
    /// ```no_run
    /// # async fn f(ws: &mut wsraw::WebSocket) -> wsraw::Result<()> {
    /// // Text(fin=0) "AB", Continuation(fin=0) "CD", Continuation(fin=1) "EF"
    /// ws.send_fragmented(["AB", "CD", "EF"], false).await?;
    /// # Ok(())
    /// # }
    /// ```
    pub async fn send_fragmented<I>(&mut self, chunks: I, is_binary: bool) -> Result<()>
    where
        I: IntoIterator,
        I::Item: AsRef<[u8]>,
    {
        if !self.accepts_sends() {
            return Ok(());
        }
        if !self.fragmenter.is_idle() {
            return Err(WebSocketError::FragmentInProgress);
        }

        let chunks: Vec<_> = chunks.into_iter().collect();
        if chunks.is_empty() {
            return Err(WebSocketError::EmptyMessage);
        }

        let last = chunks.len() - 1;
        for (i, chunk) in chunks.iter().enumerate() {
            self.send_fragment(chunk, is_binary, i == last).await?;
        }
        Ok(())
    }

    /// Sends one fragment of a message, for callers that produce the chunks over time.
    ///
    /// The first call starts the message, the call with `is_last` set finishes it.
    /// Control frames may be sent in between.
    pub async fn send_fragment(
        &mut self,
        chunk: impl AsRef<[u8]>,
        is_binary: bool,
        is_last: bool,
    ) -> Result<()> {
        if !self.accepts_sends() {
            return Ok(());
        }
        let (opcode, fin) = self
            .fragmenter
            .next_frame(data_opcode(is_binary), is_last)?;
        self.write_frame(opcode, chunk.as_ref(), fin).await
    }

    /// Sends a ping. The payload is limited to 125 bytes.
    pub async fn send_ping(&mut self, payload: impl AsRef<[u8]>) -> Result<()> {
        self.send_control(OpCode::Ping, payload.as_ref()).await
    }

    /// Sends an unsolicited pong. The payload is limited to 125 bytes.
    pub async fn send_pong(&mut self, payload: impl AsRef<[u8]>) -> Result<()> {
        self.send_control(OpCode::Pong, payload.as_ref()).await
    }

    /// Starts the close handshake.
    ///
    /// The connection moves to [`State::Closing`]; keep calling
    /// [`WebSocket::next_event`] to see it through to [`State::Closed`]. The reason
    /// is limited to 123 bytes.
    pub async fn send_close(&mut self, code: CloseCode, reason: &str) -> Result<()> {
        let view = FrameView::close(code, reason);
        if view.payload.len() > MAX_CONTROL_PAYLOAD {
            return Err(WebSocketError::ControlPayloadTooLarge(view.payload.len()));
        }
        if !self.accepts_sends() {
            return Ok(());
        }

        self.write_frame(OpCode::Close, &view.payload, true).await?;
        self.close_sent = true;
        self.close_reason = Some((Some(code), Some(reason.to_string())));
        self.transition(Event::CloseSent);
        Ok(())
    }

    /// Sends a close frame and drives the connection until it is closed.
    pub async fn close(&mut self, code: CloseCode, reason: &str) -> Result<()> {
        self.send_close(code, reason).await?;
        while self.next_event().await.is_some() {}
        Ok(())
    }

    /// Waits for the next event.
    ///
    /// Returns `None` once the terminal [`Incoming::Closed`] or [`Incoming::Error`]
    /// has been returned.
    pub async fn next_event(&mut self) -> Option<Incoming> {
        loop {
            if self.finished || self.state.is_terminal() {
                return None;
            }

            let next = match self.close_deadline {
                Some(deadline) => {
                    let read = tokio::time::timeout_at(deadline, self.framed.next()).await;
                    match read {
                        Ok(next) => next,
                        Err(_) => return Some(self.finish(Event::GraceElapsed).await),
                    }
                }
                None => self.framed.next().await,
            };

            let frame = match next {
                Some(Ok(frame)) => frame,
                Some(Err(err)) => return Some(self.fail_protocol(err).await),
                None => return Some(self.finish(Event::TransportClosed).await),
            };

            #[cfg(feature = "logging")]
            log::trace!(
                "<- {:?} fin={} rsv={} len={}",
                frame.opcode,
                frame.fin,
                frame.rsv,
                frame.payload.len()
            );

            let view = match self.reassembler.on_frame(frame) {
                Ok(Reassembled::Pending) => continue,
                Ok(Reassembled::Complete { opcode, payload }) => {
                    return Some(Incoming::Message {
                        payload,
                        is_binary: opcode == OpCode::Binary,
                    })
                }
                Ok(Reassembled::Control(view)) => view,
                Err(err) => return Some(self.fail_protocol(err).await),
            };

            let answered = match view.opcode {
                OpCode::Ping => self.on_ping(&view).await,
                OpCode::Close => match parse_close(&view) {
                    Ok((code, reason)) => self.on_close(&view, code, reason).await,
                    Err(err) => return Some(self.fail_protocol(err).await),
                },
                _ => Ok(()),
            };
            if let Err(err) = answered {
                return Some(self.report_failure(err));
            }

            return Some(Incoming::Control {
                opcode: view.opcode,
                payload: view.payload,
            });
        }
    }

    /// Dispatches events to `handler` until the connection ends.
    pub async fn run<H: Handler>(&mut self, handler: &mut H) {
        if self.state.is_open() {
            handler.on_open();
        }

        while let Some(event) = self.next_event().await {
            match event {
                Incoming::Message { payload, is_binary } => handler.on_message(payload, is_binary),
                Incoming::Control { opcode, payload } => handler.on_control(opcode, payload),
                Incoming::Closed { code, reason } => handler.on_close(code, reason),
                Incoming::Error(err) => handler.on_error(err.kind(), err),
            }
        }
    }

    /// Answers a ping while the connection is open.
    async fn on_ping(&mut self, view: &FrameView) -> Result<()> {
        if self.state.is_open() {
            #[cfg(feature = "logging")]
            log::debug!("answering ping with {} bytes", view.payload.len());
            self.write_frame(OpCode::Pong, &view.payload, true).await?;
        }
        Ok(())
    }

    /// Echoes a valid close frame unless we already sent one.
    async fn on_close(
        &mut self,
        view: &FrameView,
        code: Option<CloseCode>,
        reason: Option<String>,
    ) -> Result<()> {
        if !self.close_sent {
            #[cfg(feature = "logging")]
            log::debug!("echoing close frame, code={code:?}");
            self.write_frame(OpCode::Close, &view.payload, true).await?;
            self.close_sent = true;
        }
        self.close_reason = Some((code, reason));
        self.transition(Event::CloseReceived);
        Ok(())
    }

    fn accepts_sends(&self) -> bool {
        if self.state.is_open() {
            return true;
        }
        #[cfg(feature = "logging")]
        log::debug!("dropping send in state {}", self.state);
        false
    }

    async fn send_control(&mut self, opcode: OpCode, payload: &[u8]) -> Result<()> {
        if payload.len() > MAX_CONTROL_PAYLOAD {
            return Err(WebSocketError::ControlPayloadTooLarge(payload.len()));
        }
        if !self.accepts_sends() {
            return Ok(());
        }
        self.write_frame(opcode, payload, true).await
    }

    /// Masks and writes a single frame. A write failure fails the connection.
    async fn write_frame(&mut self, opcode: OpCode, payload: &[u8], fin: bool) -> Result<()> {
        let frame = Frame::new(fin, opcode, Some(mask::random_mask()), payload);
        match self.framed.send(frame).await {
            Ok(()) => Ok(()),
            Err(err) => {
                self.transition(Event::Failure);
                self.fragmenter.reset();
                // the caller receives the error, nothing is left to report
                self.finished = true;
                Err(err)
            }
        }
    }

    fn transition(&mut self, event: Event) {
        let next = advance(self.state, event);
        if next == State::Closing && self.state != State::Closing {
            self.close_deadline = Some(Instant::now() + self.close_timeout);
        }
        self.state = next;
    }

    /// Fails the connection on a malformed frame, telling the peer why first.
    async fn fail_protocol(&mut self, err: WebSocketError) -> Incoming {
        if err.kind() == ErrorKind::Protocol && !self.close_sent {
            let code = match err {
                WebSocketError::FrameTooLarge => CloseCode::Size,
                WebSocketError::InvalidOpCode(_) => CloseCode::Unsupported,
                _ => CloseCode::Protocol,
            };
            let view = FrameView::close(code, b"");
            let frame = Frame::new(true, OpCode::Close, Some(mask::random_mask()), &view.payload[..]);
            let _ = self.framed.send(frame).await;
            self.close_sent = true;
        }
        self.report_failure(err)
    }

    fn report_failure(&mut self, err: WebSocketError) -> Incoming {
        #[cfg(feature = "logging")]
        log::debug!("connection failed: {err}");

        self.transition(Event::Failure);
        self.fragmenter.reset();
        self.finished = true;
        Incoming::Error(err)
    }

    /// Ends the connection on EOF or when the grace period runs out.
    async fn finish(&mut self, event: Event) -> Incoming {
        self.transition(event);
        self.finished = true;

        if self.state == State::Closed {
            let _ = self.framed.get_mut().shutdown().await;
            let (code, reason) = self.close_reason.take().unwrap_or_default();
            Incoming::Closed { code, reason }
        } else {
            // EOF without a close handshake
            Incoming::Error(WebSocketError::ConnectionClosed)
        }
    }
}

/// Applies `event` to `state`. Illegal events leave the state unchanged.
fn advance(state: State, event: Event) -> State {
    match state.transition(event) {
        Some(next) => {
            #[cfg(feature = "logging")]
            log::debug!("{state} -> {next} on {event:?}");
            next
        }
        None => state,
    }
}

fn handshake_failed(state: State, err: WebSocketError) -> WebSocketError {
    #[cfg(feature = "logging")]
    log::debug!("handshake failed: {err}");
    let _ = advance(state, Event::Failure);
    err
}

fn data_opcode(is_binary: bool) -> OpCode {
    if is_binary {
        OpCode::Binary
    } else {
        OpCode::Text
    }
}

/// Splits a close payload into status code and reason.
///
/// An empty payload is fine. A 1-byte payload, a code that must not appear on the
/// wire, or a reason that is not UTF-8 is a protocol violation.
fn parse_close(view: &FrameView) -> Result<(Option<CloseCode>, Option<String>)> {
    match view.payload.len() {
        0 => Ok((None, None)),
        1 => Err(WebSocketError::InvalidCloseFrame),
        _ => {
            let code = view.close_code().ok_or(WebSocketError::InvalidCloseFrame)?;
            if !code.is_allowed() {
                return Err(WebSocketError::InvalidCloseFrame);
            }
            let reason = view.close_reason().ok_or(WebSocketError::InvalidCloseFrame)?;
            Ok((Some(code), Some(reason.to_string())))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{decode_frame, encode_frame, Decoded};
    use tokio::io::{duplex, DuplexStream};

    /// Answers the upgrade on the server half, followed by `trailing`.
    async fn accept(server: &mut DuplexStream, trailing: &[u8]) {
        let mut buf = BytesMut::new();
        while handshake::find_header_end(&buf).is_none() {
            assert!(server.read_buf(&mut buf).await.unwrap() > 0);
        }
        let text = String::from_utf8(buf.to_vec()).unwrap();
        let key = text
            .lines()
            .find_map(|line| line.strip_prefix("Sec-WebSocket-Key: "))
            .unwrap();

        let mut response = format!(
            "HTTP/1.1 101 Switching Protocols\r\n\
             Upgrade: websocket\r\n\
             Connection: Upgrade\r\n\
             Sec-WebSocket-Accept: {}\r\n\r\n",
            handshake::compute_accept_key(key)
        )
        .into_bytes();
        response.extend_from_slice(trailing);
        server.write_all(&response).await.unwrap();
    }

    async fn open(trailing: &[u8]) -> (WebSocket<DuplexStream>, DuplexStream) {
        let (client, mut server) = duplex(64 * 1024);
        let url: Url = "ws://localhost:8000/chat".parse().unwrap();
        let options = Options::default().with_close_timeout(Duration::from_millis(100));

        let (ws, ()) = tokio::join!(
            WebSocket::handshake(client, url, options),
            accept(&mut server, trailing)
        );
        (ws.unwrap(), server)
    }

    /// Reads one client frame from the server half.
    async fn read_client_frame(server: &mut DuplexStream, buf: &mut BytesMut) -> Frame {
        loop {
            if let Decoded::Frame { frame, consumed } = decode_frame(buf, Role::Server).unwrap() {
                let _ = buf.split_to(consumed);
                return frame;
            }
            assert!(server.read_buf(buf).await.unwrap() > 0);
        }
    }

    fn server_frame(opcode: OpCode, payload: &[u8], fin: bool) -> BytesMut {
        encode_frame(opcode, payload, fin, false)
    }

    #[tokio::test]
    async fn test_handshake_opens() {
        let (ws, _server) = open(&[]).await;
        assert_eq!(ws.state(), State::Open);
    }

    #[tokio::test]
    async fn test_frame_right_after_response() {
        let trailing = server_frame(OpCode::Text, b"early", true);
        let (mut ws, _server) = open(&trailing).await;

        match ws.next_event().await {
            Some(Incoming::Message { payload, is_binary }) => {
                assert_eq!(&payload[..], b"early");
                assert!(!is_binary);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_outbound_frames_are_masked() {
        let (mut ws, mut server) = open(&[]).await;
        ws.send(b"Hello".as_slice(), false).await.unwrap();

        let mut buf = BytesMut::new();
        let frame = read_client_frame(&mut server, &mut buf).await;
        assert!(frame.is_masked());
        assert_eq!(frame.opcode, OpCode::Text);
        assert_eq!(&frame.payload[..], b"Hello");
    }

    #[tokio::test]
    async fn test_send_fragmented_sequence() {
        let (mut ws, mut server) = open(&[]).await;
        ws.send_fragmented(["AB", "CD", "EF"], true).await.unwrap();

        let mut buf = BytesMut::new();
        let mut seen = vec![];
        for _ in 0..3 {
            let frame = read_client_frame(&mut server, &mut buf).await;
            seen.push((frame.opcode, frame.fin, frame.payload.to_vec()));
        }
        assert_eq!(
            seen,
            vec![
                (OpCode::Binary, false, b"AB".to_vec()),
                (OpCode::Continuation, false, b"CD".to_vec()),
                (OpCode::Continuation, true, b"EF".to_vec()),
            ]
        );
    }

    #[tokio::test]
    async fn test_send_during_fragmented_message() {
        let (mut ws, _server) = open(&[]).await;
        ws.send_fragment("part", false, false).await.unwrap();

        let err = ws.send("whole", false).await.unwrap_err();
        assert!(matches!(err, WebSocketError::FragmentInProgress));
        assert_eq!(err.kind(), ErrorKind::Misuse);
        assert_eq!(ws.state(), State::Open);

        assert!(matches!(
            ws.send_fragmented(["x"], false).await,
            Err(WebSocketError::FragmentInProgress)
        ));
        ws.send_fragment("end", false, true).await.unwrap();
        ws.send("whole", false).await.unwrap();
    }

    #[tokio::test]
    async fn test_empty_fragmented_message() {
        let (mut ws, _server) = open(&[]).await;
        assert!(matches!(
            ws.send_fragmented(Vec::<&[u8]>::new(), false).await,
            Err(WebSocketError::EmptyMessage)
        ));
    }

    #[tokio::test]
    async fn test_control_payload_limit() {
        let (mut ws, _server) = open(&[]).await;
        assert!(matches!(
            ws.send_ping([0u8; 126]).await,
            Err(WebSocketError::ControlPayloadTooLarge(126))
        ));
        assert!(matches!(
            ws.send_close(CloseCode::Normal, &"x".repeat(124)).await,
            Err(WebSocketError::ControlPayloadTooLarge(126))
        ));
        assert_eq!(ws.state(), State::Open);
    }

    #[tokio::test]
    async fn test_ping_is_answered() {
        let (mut ws, mut server) = open(&[]).await;
        server
            .write_all(&server_frame(OpCode::Ping, b"beat", true))
            .await
            .unwrap();

        match ws.next_event().await {
            Some(Incoming::Control { opcode, payload }) => {
                assert_eq!(opcode, OpCode::Ping);
                assert_eq!(&payload[..], b"beat");
            }
            other => panic!("unexpected {other:?}"),
        }

        let mut buf = BytesMut::new();
        let pong = read_client_frame(&mut server, &mut buf).await;
        assert_eq!(pong.opcode, OpCode::Pong);
        assert_eq!(&pong.payload[..], b"beat");
    }

    #[tokio::test]
    async fn test_server_initiated_close() {
        let (mut ws, mut server) = open(&[]).await;
        let close = FrameView::close(CloseCode::Away, "bye");
        server
            .write_all(&server_frame(OpCode::Close, &close.payload, true))
            .await
            .unwrap();

        assert!(matches!(
            ws.next_event().await,
            Some(Incoming::Control {
                opcode: OpCode::Close,
                ..
            })
        ));
        assert_eq!(ws.state(), State::Closing);

        let mut buf = BytesMut::new();
        let echo = read_client_frame(&mut server, &mut buf).await;
        assert_eq!(echo.opcode, OpCode::Close);
        assert_eq!(&echo.payload[..], &close.payload[..]);

        drop(server);
        match ws.next_event().await {
            Some(Incoming::Closed { code, reason }) => {
                assert_eq!(code, Some(CloseCode::Away));
                assert_eq!(reason.as_deref(), Some("bye"));
            }
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(ws.state(), State::Closed);
        assert!(ws.next_event().await.is_none());
    }

    #[tokio::test]
    async fn test_close_grace_period() {
        let (mut ws, _server) = open(&[]).await;
        ws.send_close(CloseCode::Normal, "done").await.unwrap();
        assert_eq!(ws.state(), State::Closing);

        // sends while closing are dropped
        ws.send("late", false).await.unwrap();

        // the server never answers, the grace period ends the connection
        match ws.next_event().await {
            Some(Incoming::Closed { code, .. }) => assert_eq!(code, Some(CloseCode::Normal)),
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(ws.state(), State::Closed);
        assert!(ws.next_event().await.is_none());
    }

    #[tokio::test]
    async fn test_masked_server_frame_fails() {
        let (mut ws, mut server) = open(&[]).await;
        server
            .write_all(&encode_frame(OpCode::Text, b"masked", true, true))
            .await
            .unwrap();

        match ws.next_event().await {
            Some(Incoming::Error(err)) => {
                assert!(matches!(err, WebSocketError::MaskedServerFrame));
                assert_eq!(err.kind(), ErrorKind::Protocol);
            }
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(ws.state(), State::Failed);
        assert!(ws.next_event().await.is_none());

        let mut buf = BytesMut::new();
        let close = read_client_frame(&mut server, &mut buf).await;
        assert_eq!(FrameView::from(close).close_code(), Some(CloseCode::Protocol));
    }

    #[tokio::test]
    async fn test_eof_without_close_fails() {
        let (mut ws, server) = open(&[]).await;
        drop(server);
        assert!(matches!(
            ws.next_event().await,
            Some(Incoming::Error(WebSocketError::ConnectionClosed))
        ));
        assert_eq!(ws.state(), State::Failed);
        assert!(ws.next_event().await.is_none());
    }

    #[tokio::test]
    async fn test_one_byte_close_payload() {
        let (mut ws, mut server) = open(&[]).await;
        server
            .write_all(&server_frame(OpCode::Close, b"\x03", true))
            .await
            .unwrap();
        assert!(matches!(
            ws.next_event().await,
            Some(Incoming::Error(WebSocketError::InvalidCloseFrame))
        ));
        assert_eq!(ws.state(), State::Failed);

        let mut buf = BytesMut::new();
        let close = read_client_frame(&mut server, &mut buf).await;
        assert_eq!(close.opcode, OpCode::Close);
        assert_eq!(FrameView::from(close).close_code(), Some(CloseCode::Protocol));
    }

    #[tokio::test]
    async fn test_invalid_close_reason_is_answered_with_protocol_error() {
        let (mut ws, mut server) = open(&[]).await;
        let mut payload = u16::from(CloseCode::Normal).to_be_bytes().to_vec();
        payload.extend_from_slice(&[0xff, 0xfe]);
        server
            .write_all(&server_frame(OpCode::Close, &payload, true))
            .await
            .unwrap();
        assert!(matches!(
            ws.next_event().await,
            Some(Incoming::Error(WebSocketError::InvalidCloseFrame))
        ));

        let mut buf = BytesMut::new();
        let close = read_client_frame(&mut server, &mut buf).await;
        assert_eq!(FrameView::from(close).close_code(), Some(CloseCode::Protocol));
        assert!(ws.next_event().await.is_none());
    }

    #[tokio::test]
    async fn test_truncated_frame_while_closing() {
        let (mut ws, mut server) = open(&[]).await;
        ws.send_close(CloseCode::Normal, "").await.unwrap();

        // a header announcing 10 bytes, then the server goes away
        server.write_all(&[0x82, 0x0A]).await.unwrap();
        drop(server);

        match ws.next_event().await {
            Some(Incoming::Error(err)) => {
                assert!(matches!(err, WebSocketError::TruncatedFrame));
                assert_eq!(err.kind(), ErrorKind::Transport);
            }
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(ws.state(), State::Failed);
        assert!(ws.next_event().await.is_none());
    }

    #[derive(Default)]
    struct Recorder {
        opened: bool,
        messages: Vec<(Bytes, bool)>,
        controls: Vec<OpCode>,
        closed: Option<Option<CloseCode>>,
        errors: usize,
    }

    impl Handler for Recorder {
        fn on_open(&mut self) {
            self.opened = true;
        }

        fn on_message(&mut self, payload: Bytes, is_binary: bool) {
            self.messages.push((payload, is_binary));
        }

        fn on_control(&mut self, opcode: OpCode, _payload: Bytes) {
            self.controls.push(opcode);
        }

        fn on_close(&mut self, code: Option<CloseCode>, _reason: Option<String>) {
            self.closed = Some(code);
        }

        fn on_error(&mut self, _kind: ErrorKind, _error: WebSocketError) {
            self.errors += 1;
        }
    }

    #[tokio::test]
    async fn test_run_dispatches_to_handler() {
        let mut trailing = BytesMut::new();
        trailing.extend_from_slice(&server_frame(OpCode::Text, b"AB", false));
        trailing.extend_from_slice(&server_frame(OpCode::Pong, b"", true));
        trailing.extend_from_slice(&server_frame(OpCode::Continuation, b"CD", true));
        trailing.extend_from_slice(&server_frame(
            OpCode::Close,
            &FrameView::close(CloseCode::Normal, "").payload,
            true,
        ));
        let (mut ws, server) = open(&trailing).await;

        let mut recorder = Recorder::default();
        let (_, ()) = tokio::join!(ws.run(&mut recorder), async move {
            // keep the server half alive until the echo is written
            tokio::time::sleep(Duration::from_millis(20)).await;
            drop(server);
        });

        assert!(recorder.opened);
        assert_eq!(recorder.messages, vec![(Bytes::from_static(b"ABCD"), false)]);
        assert_eq!(recorder.controls, vec![OpCode::Pong, OpCode::Close]);
        assert_eq!(recorder.closed, Some(Some(CloseCode::Normal)));
        assert_eq!(recorder.errors, 0);
    }
}
