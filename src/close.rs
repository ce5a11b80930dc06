//! Close status codes per RFC 6455 and the local classification of close causes.

/// WebSocket close status code per RFC 6455 Section 7.4.
///
/// Every `u16` maps to exactly one variant and back, so codes received from a
/// peer are preserved verbatim. [`CloseCode::Invalid`] is synthetic: it is
/// never transmitted and marks closes that originate locally (ping timeout,
/// reachability loss, transport error).
#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum CloseCode {
    /// Synthetic local code (0). Never sent on the wire.
    Invalid,
    /// Normal closure (1000). The connection successfully completed.
    #[default]
    NormalClosure,
    /// Going away (1001). Endpoint is going away (server shutdown, navigation).
    GoingAway,
    /// Protocol error (1002). Endpoint received a malformed frame.
    ProtocolError,
    /// Unsupported data (1003). Endpoint received a data type it cannot handle.
    UnsupportedData,
    /// No status received (1005). Close frame carried no status code.
    NoStatusReceived,
    /// Abnormal closure (1006). Connection dropped without a close frame.
    AbnormalClosure,
    /// Invalid frame payload (1007). Message data inconsistent with its type.
    InvalidFramePayload,
    /// Policy violation (1008). Message violates the endpoint's policy.
    PolicyViolation,
    /// Message too big (1009). Message too large to process.
    MessageTooBig,
    /// Mandatory extension (1010). Client expected the server to negotiate an extension.
    MandatoryExtension,
    /// Internal server error (1011). Server hit an unexpected condition.
    InternalServerError,
    /// TLS handshake failure (1015). Never set by an endpoint.
    TlsHandshakeFailure,
    /// Reserved range 1016-1999.
    Reserved(u16),
    /// Extension-reserved range 2000-2999.
    ExtensionReserved(u16),
    /// Library/framework range 3000-3999.
    ThirdParty(u16),
    /// Application range 4000-4999.
    Application(u16),
    /// Anything RFC 6455 leaves unassigned.
    Undefined(u16),
}

impl CloseCode {
    /// Create a `CloseCode` from its numeric value.
    #[must_use]
    pub const fn from_raw(raw: u16) -> Self {
        match raw {
            0 => CloseCode::Invalid,
            1000 => CloseCode::NormalClosure,
            1001 => CloseCode::GoingAway,
            1002 => CloseCode::ProtocolError,
            1003 => CloseCode::UnsupportedData,
            1005 => CloseCode::NoStatusReceived,
            1006 => CloseCode::AbnormalClosure,
            1007 => CloseCode::InvalidFramePayload,
            1008 => CloseCode::PolicyViolation,
            1009 => CloseCode::MessageTooBig,
            1010 => CloseCode::MandatoryExtension,
            1011 => CloseCode::InternalServerError,
            1015 => CloseCode::TlsHandshakeFailure,
            1016..=1999 => CloseCode::Reserved(raw),
            2000..=2999 => CloseCode::ExtensionReserved(raw),
            3000..=3999 => CloseCode::ThirdParty(raw),
            4000..=4999 => CloseCode::Application(raw),
            other => CloseCode::Undefined(other),
        }
    }

    /// Get the numeric value of this close code.
    #[must_use]
    pub const fn raw_value(&self) -> u16 {
        match self {
            CloseCode::Invalid => 0,
            CloseCode::NormalClosure => 1000,
            CloseCode::GoingAway => 1001,
            CloseCode::ProtocolError => 1002,
            CloseCode::UnsupportedData => 1003,
            CloseCode::NoStatusReceived => 1005,
            CloseCode::AbnormalClosure => 1006,
            CloseCode::InvalidFramePayload => 1007,
            CloseCode::PolicyViolation => 1008,
            CloseCode::MessageTooBig => 1009,
            CloseCode::MandatoryExtension => 1010,
            CloseCode::InternalServerError => 1011,
            CloseCode::TlsHandshakeFailure => 1015,
            CloseCode::Reserved(raw)
            | CloseCode::ExtensionReserved(raw)
            | CloseCode::ThirdParty(raw)
            | CloseCode::Application(raw)
            | CloseCode::Undefined(raw) => *raw,
        }
    }

    /// Check whether this code may be transmitted in a close frame per
    /// RFC 6455 Section 7.4.1.
    ///
    /// Sendable: 1000-1003, 1007-1011 and the 3000-4999 ranges. Everything
    /// else maps to "do not transmit" when initiating a close.
    #[must_use]
    pub const fn is_sendable(&self) -> bool {
        matches!(self.raw_value(), 1000..=1003 | 1007..=1011 | 3000..=4999)
    }
}

/// Why a connection closed, as classified by the supervisory layer.
///
/// A close that settles with **no** reason is a manual user close and is
/// never retried; every other cause is eligible for the retry decision.
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseReason {
    /// The liveness check failed: no pong observed within the ping timeout.
    Pinging,
    /// The network path became unsatisfied.
    Monitor,
    /// The transport failed.
    Error {
        /// Numeric error code reported by the transport (0 when unknown).
        code: i32,
        /// Transport-defined error domain, e.g. `io` or `protocol`.
        domain: String,
    },
    /// Opaque close payload echoed by the peer. May be empty.
    Server(Vec<u8>),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn raw_round_trips_for_every_code() {
        for raw in 0..=u16::MAX {
            assert_eq!(CloseCode::from_raw(raw).raw_value(), raw);
        }
    }

    #[test]
    fn named_codes_map_to_their_raw_values() {
        assert_eq!(CloseCode::from_raw(0), CloseCode::Invalid);
        assert_eq!(CloseCode::from_raw(1000), CloseCode::NormalClosure);
        assert_eq!(CloseCode::from_raw(1005), CloseCode::NoStatusReceived);
        assert_eq!(CloseCode::from_raw(1006), CloseCode::AbnormalClosure);
        assert_eq!(CloseCode::from_raw(1015), CloseCode::TlsHandshakeFailure);
        assert_eq!(CloseCode::from_raw(1500), CloseCode::Reserved(1500));
        assert_eq!(CloseCode::from_raw(2500), CloseCode::ExtensionReserved(2500));
        assert_eq!(CloseCode::from_raw(3500), CloseCode::ThirdParty(3500));
        assert_eq!(CloseCode::from_raw(4500), CloseCode::Application(4500));
        assert_eq!(CloseCode::from_raw(5000), CloseCode::Undefined(5000));
        assert_eq!(CloseCode::from_raw(999), CloseCode::Undefined(999));
    }

    #[test]
    fn sendable_ranges() {
        assert!(CloseCode::NormalClosure.is_sendable());
        assert!(CloseCode::UnsupportedData.is_sendable());
        assert!(CloseCode::InvalidFramePayload.is_sendable());
        assert!(CloseCode::InternalServerError.is_sendable());
        assert!(CloseCode::ThirdParty(3000).is_sendable());
        assert!(CloseCode::Application(4999).is_sendable());

        assert!(!CloseCode::Invalid.is_sendable());
        assert!(!CloseCode::NoStatusReceived.is_sendable());
        assert!(!CloseCode::AbnormalClosure.is_sendable());
        assert!(!CloseCode::TlsHandshakeFailure.is_sendable());
        assert!(!CloseCode::Reserved(1500).is_sendable());
        assert!(!CloseCode::ExtensionReserved(2999).is_sendable());
        assert!(!CloseCode::Undefined(5000).is_sendable());
    }

    #[test]
    fn default_is_normal_closure() {
        assert_eq!(CloseCode::default(), CloseCode::NormalClosure);
    }
}
