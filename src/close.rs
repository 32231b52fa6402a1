//! Close status codes as defined in [RFC 6455 Section 7.4](https://datatracker.ietf.org/doc/html/rfc6455#section-7.4).

/// Status code carried in the first two bytes of a Close frame payload.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum CloseCode {
    /// 1000, the purpose for which the connection was established has been fulfilled.
    Normal,
    /// 1001, an endpoint is going away.
    Away,
    /// 1002, the endpoint is terminating the connection due to a protocol error.
    Protocol,
    /// 1003, the endpoint received data of a type it cannot accept.
    Unsupported,
    /// 1005, no status code was present. Never sent on the wire.
    Status,
    /// 1006, the connection was closed abnormally. Never sent on the wire.
    Abnormal,
    /// 1007, the message payload was inconsistent with its type.
    Invalid,
    /// 1008, the message violates the endpoint's policy.
    Policy,
    /// 1009, the message is too big to process.
    Size,
    /// 1010, the client expected an extension the server did not negotiate.
    Extension,
    /// 1011, the server encountered an unexpected condition.
    Error,
    /// 1015, TLS handshake failure. Never sent on the wire.
    Tls,
    /// 1004, 1012-2999: reserved by the protocol or IANA.
    Reserved(u16),
    /// 3000-3999: registered by libraries and frameworks.
    Library(u16),
    /// 4000-4999: private use by applications.
    Private(u16),
    /// Anything below 1000 or above 4999.
    Bad(u16),
}

impl CloseCode {
    /// Returns `true` if the code may legitimately appear in a Close frame.
    pub fn is_allowed(self) -> bool {
        !matches!(
            self,
            CloseCode::Status | CloseCode::Abnormal | CloseCode::Tls | CloseCode::Bad(_)
        ) && !matches!(self, CloseCode::Reserved(code) if code == 1004 || (1016..3000).contains(&code))
    }
}

impl From<u16> for CloseCode {
    fn from(code: u16) -> Self {
        match code {
            1000 => CloseCode::Normal,
            1001 => CloseCode::Away,
            1002 => CloseCode::Protocol,
            1003 => CloseCode::Unsupported,
            1005 => CloseCode::Status,
            1006 => CloseCode::Abnormal,
            1007 => CloseCode::Invalid,
            1008 => CloseCode::Policy,
            1009 => CloseCode::Size,
            1010 => CloseCode::Extension,
            1011 => CloseCode::Error,
            1015 => CloseCode::Tls,
            1004 | 1012..=2999 => CloseCode::Reserved(code),
            3000..=3999 => CloseCode::Library(code),
            4000..=4999 => CloseCode::Private(code),
            _ => CloseCode::Bad(code),
        }
    }
}

impl From<CloseCode> for u16 {
    fn from(code: CloseCode) -> Self {
        match code {
            CloseCode::Normal => 1000,
            CloseCode::Away => 1001,
            CloseCode::Protocol => 1002,
            CloseCode::Unsupported => 1003,
            CloseCode::Status => 1005,
            CloseCode::Abnormal => 1006,
            CloseCode::Invalid => 1007,
            CloseCode::Policy => 1008,
            CloseCode::Size => 1009,
            CloseCode::Extension => 1010,
            CloseCode::Error => 1011,
            CloseCode::Tls => 1015,
            CloseCode::Reserved(code)
            | CloseCode::Library(code)
            | CloseCode::Private(code)
            | CloseCode::Bad(code) => code,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_codes() {
        for (raw, code) in [
            (1000, CloseCode::Normal),
            (1001, CloseCode::Away),
            (1002, CloseCode::Protocol),
            (1011, CloseCode::Error),
        ] {
            assert_eq!(CloseCode::from(raw), code);
            assert_eq!(u16::from(code), raw);
        }
    }

    #[test]
    fn test_ranges() {
        assert_eq!(CloseCode::from(3001), CloseCode::Library(3001));
        assert_eq!(CloseCode::from(4999), CloseCode::Private(4999));
        assert_eq!(CloseCode::from(999), CloseCode::Bad(999));
        assert_eq!(CloseCode::from(1013), CloseCode::Reserved(1013));
    }

    #[test]
    fn test_is_allowed() {
        assert!(CloseCode::Normal.is_allowed());
        assert!(CloseCode::Private(4000).is_allowed());
        assert!(CloseCode::Reserved(1012).is_allowed());
        assert!(!CloseCode::Reserved(1004).is_allowed());
        assert!(!CloseCode::Reserved(2000).is_allowed());
        assert!(!CloseCode::Status.is_allowed());
        assert!(!CloseCode::Abnormal.is_allowed());
        assert!(!CloseCode::Bad(5000).is_allowed());
    }
}
