//! Connection status tracking.

use crate::close::{CloseCode, CloseReason};

/// Connection status of a [`Connector`](crate::Connector).
///
/// Transitions are totally ordered per client and every side effect of the
/// supervisory layer (pinger lifecycle, event dispatch, receive pump) is
/// driven from status changes. Listeners never observe a transition whose
/// old and new status are equal.
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Status {
    /// A connection attempt is in flight.
    Opening,
    /// Handshake complete.
    Opened {
        /// Subprotocol confirmed by the server, if any was negotiated.
        subprotocol: Option<String>,
    },
    /// A local close was requested; awaiting transport confirmation.
    Closing,
    /// Terminal for now. The reachability supervisor or a host `open` call
    /// can leave this state again.
    Closed {
        /// The close status code, preserved verbatim when peer-originated.
        code: CloseCode,
        /// Why the close happened. `None` marks a manual user close.
        reason: Option<CloseReason>,
    },
}

impl Default for Status {
    fn default() -> Self {
        Status::Closed {
            code: CloseCode::NormalClosure,
            reason: None,
        }
    }
}

impl Status {
    /// Check whether the connection is currently usable for sending.
    #[must_use]
    pub const fn is_opened(&self) -> bool {
        matches!(self, Status::Opened { .. })
    }

    /// Check whether the connection has settled closed.
    #[must_use]
    pub const fn is_closed(&self) -> bool {
        matches!(self, Status::Closed { .. })
    }
}
