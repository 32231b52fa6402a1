//! Connection lifecycle.
//!
//! ```text
//! Connecting -> TransportOpen -> HandshakeSent -> HandshakeValidated -> Open -> Closing -> Closed
//!      \______________\_______________\__________________\_____________\________\______-> Failed
//! ```
//!
//! [`State::transition`] is a pure function, the connection driver feeds it
//! [`Event`]s and stores whatever comes back.

/// The state of a connection. `Closed` and `Failed` are terminal.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum State {
    /// Resolving and connecting the transport.
    Connecting,
    /// TCP (and TLS, if any) is up. Nothing has been written yet.
    TransportOpen,
    /// The upgrade request is fully written, waiting for the response.
    HandshakeSent,
    /// The response passed validation.
    HandshakeValidated,
    /// Frames flow in both directions.
    Open,
    /// A close frame was sent or received, waiting for the transport to go away.
    Closing,
    /// Closed cleanly.
    Closed,
    /// Terminated by a transport error, a handshake rejection or a protocol violation.
    Failed,
}

/// Something that happened to the connection.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Event {
    /// Transport-level connect finished, TLS included.
    TransportConnected,
    /// The upgrade request was fully written.
    RequestWritten,
    /// The upgrade response was accepted.
    ResponseValidated,
    /// Switch to frame mode. Follows `ResponseValidated` immediately.
    Upgraded,
    /// We wrote a close frame.
    CloseSent,
    /// The peer's close frame arrived.
    CloseReceived,
    /// The transport reached EOF.
    TransportClosed,
    /// The close grace period ran out.
    GraceElapsed,
    /// Transport error, handshake failure or protocol violation.
    Failure,
}

impl State {
    /// Returns the state reached from `self` on `event`, or `None` if the event is
    /// not legal here.
    ///
    /// ```
    /// use wsraw::state::{Event, State};
    ///
    /// assert_eq!(State::Open.transition(Event::CloseSent), Some(State::Closing));
    /// assert_eq!(State::Closed.transition(Event::CloseSent), None);
    /// ```
    pub fn transition(self, event: Event) -> Option<State> {
        use Event::*;
        use State::*;

        let next = match (self, event) {
            (Closed | Failed, _) => return None,
            (_, Failure) => Failed,

            (Connecting, TransportConnected) => TransportOpen,
            (TransportOpen, RequestWritten) => HandshakeSent,
            (HandshakeSent, ResponseValidated) => HandshakeValidated,
            (HandshakeValidated, Upgraded) => Open,

            (Open, CloseSent | CloseReceived) => Closing,
            (Closing, CloseSent | CloseReceived) => Closing,
            (Closing, TransportClosed | GraceElapsed) => Closed,

            // the peer vanished without a close handshake
            (_, TransportClosed) => Failed,

            _ => return None,
        };
        Some(next)
    }

    /// Returns `true` for `Closed` and `Failed`.
    pub fn is_terminal(self) -> bool {
        matches!(self, State::Closed | State::Failed)
    }

    /// Returns `true` while frames may be sent.
    pub fn is_open(self) -> bool {
        self == State::Open
    }
}

impl std::fmt::Display for State {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::fmt::Debug::fmt(self, f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL_STATES: [State; 8] = [
        State::Connecting,
        State::TransportOpen,
        State::HandshakeSent,
        State::HandshakeValidated,
        State::Open,
        State::Closing,
        State::Closed,
        State::Failed,
    ];

    const ALL_EVENTS: [Event; 9] = [
        Event::TransportConnected,
        Event::RequestWritten,
        Event::ResponseValidated,
        Event::Upgraded,
        Event::CloseSent,
        Event::CloseReceived,
        Event::TransportClosed,
        Event::GraceElapsed,
        Event::Failure,
    ];

    #[test]
    fn test_happy_path() {
        let path = [
            (Event::TransportConnected, State::TransportOpen),
            (Event::RequestWritten, State::HandshakeSent),
            (Event::ResponseValidated, State::HandshakeValidated),
            (Event::Upgraded, State::Open),
            (Event::CloseSent, State::Closing),
            (Event::CloseReceived, State::Closing),
            (Event::TransportClosed, State::Closed),
        ];

        let mut state = State::Connecting;
        for (event, expected) in path {
            state = state.transition(event).unwrap();
            assert_eq!(state, expected, "after {event:?}");
        }
        assert!(state.is_terminal());
    }

    #[test]
    fn test_grace_period_closes() {
        assert_eq!(
            State::Closing.transition(Event::GraceElapsed),
            Some(State::Closed)
        );
        assert_eq!(State::Open.transition(Event::GraceElapsed), None);
    }

    #[test]
    fn test_peer_initiated_close() {
        assert_eq!(
            State::Open.transition(Event::CloseReceived),
            Some(State::Closing)
        );
    }

    #[test]
    fn test_failure_from_any_live_state() {
        for state in ALL_STATES.iter().filter(|s| !s.is_terminal()) {
            assert_eq!(state.transition(Event::Failure), Some(State::Failed));
        }
    }

    #[test]
    fn test_terminal_states_are_absorbing() {
        for state in [State::Closed, State::Failed] {
            for event in ALL_EVENTS {
                assert_eq!(state.transition(event), None, "{state} on {event:?}");
            }
        }
    }

    #[test]
    fn test_eof_before_close_is_failure() {
        for state in [State::TransportOpen, State::HandshakeSent, State::Open] {
            assert_eq!(
                state.transition(Event::TransportClosed),
                Some(State::Failed)
            );
        }
    }

    #[test]
    fn test_no_skipping_handshake() {
        assert_eq!(State::Connecting.transition(Event::Upgraded), None);
        assert_eq!(State::TransportOpen.transition(Event::ResponseValidated), None);
        assert_eq!(State::HandshakeSent.transition(Event::CloseSent), None);
    }

    #[test]
    fn test_only_open_accepts_sends() {
        let open: Vec<_> = ALL_STATES.into_iter().filter(|s| s.is_open()).collect();
        assert_eq!(open, vec![State::Open]);
    }
}
