//! The transport capability consumed by the supervisory core.
//!
//! Handshake, frame codec and TLS live behind [`Transport`]; the core only
//! connects, sends, and reacts to the lifecycle events a transport pushes
//! into its event channel. A production implementation over
//! `tokio-tungstenite` ships in [`tungstenite`].

use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use url::Url;

use crate::Result;
use crate::close::CloseCode;
use crate::error::Error;
use crate::events::ServerChallenge;
use crate::message::Message;

#[cfg(feature = "tungstenite")]
pub mod tungstenite;

/// Lifecycle events a transport pushes to the supervisor.
///
/// Events from a transport instance that is no longer the current one are
/// discarded by the supervisor, so late arrivals after a reopen are safe.
#[derive(Debug)]
#[non_exhaustive]
pub enum TransportEvent {
    /// Handshake complete; the connection is usable.
    DidOpen {
        /// Subprotocol confirmed by the server, if any.
        subprotocol: Option<String>,
    },
    /// A message arrived.
    DidReceive(Message),
    /// The connection closed, either by the peer or by a local cancel.
    DidClose {
        /// Close code, preserved verbatim when peer-originated.
        code: CloseCode,
        /// Close payload sent by the peer, if any.
        data: Option<Vec<u8>>,
    },
    /// The connection failed.
    DidFail(Error),
    /// The server presented a trust challenge; answer via the embedded
    /// completion handle.
    DidReceiveChallenge(ServerChallenge),
}

/// Sending half of a connection's event channel.
pub type TransportEvents = mpsc::UnboundedSender<TransportEvent>;

/// An open connection owned by the supervisor.
///
/// Sends are queued and completed asynchronously; a send error here means the
/// connection is already torn down. Failures of queued writes surface as
/// [`TransportEvent::DidFail`] on the event channel.
pub trait TransportHandle: Send + Sync + 'static {
    /// Queue a message for transmission.
    ///
    /// # Errors
    ///
    /// Fails when the connection is already closed.
    fn send(&self, message: Message) -> Result<()>;

    /// Queue a protocol-level ping frame.
    ///
    /// # Errors
    ///
    /// Fails when the connection is already closed.
    fn send_ping(&self) -> Result<()>;

    /// Close the connection locally.
    ///
    /// A sendable `code` is transmitted in a close frame and echoed in the
    /// confirming [`TransportEvent::DidClose`]; any other code is withheld
    /// from the wire and reported back as [`CloseCode::Invalid`]. The
    /// `reason` payload is discarded on transmit.
    fn cancel(&self, code: CloseCode, reason: Option<Vec<u8>>);
}

/// Capability to open WebSocket connections.
///
/// `connect` resolves once the handshake completes (or fails); the transport
/// then reports [`TransportEvent::DidOpen`] followed by the connection's
/// lifecycle on `events`. The supervisor starts draining `events` before the
/// handshake finishes, so challenges raised mid-handshake are answerable.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Open a connection to `target`, offering `subprotocols` in order.
    async fn connect(
        &self,
        target: &ConnectTarget,
        subprotocols: &[String],
        events: TransportEvents,
    ) -> Result<Box<dyn TransportHandle>>;
}

/// Where and how to connect: a URL, optionally enriched to a full request
/// with extra headers and a connect timeout.
#[derive(Debug, Clone)]
pub struct ConnectTarget {
    url: Url,
    headers: Vec<(String, String)>,
    timeout: Option<Duration>,
}

impl ConnectTarget {
    /// Target a `ws://` or `wss://` URL.
    ///
    /// # Errors
    ///
    /// Fails when `raw` does not parse or carries a non-WebSocket scheme.
    pub fn url(raw: &str) -> Result<Self> {
        let url = Url::parse(raw)?;
        if !matches!(url.scheme(), "ws" | "wss") {
            return Err(Error::configuration(format!(
                "unsupported scheme `{}`, expected ws or wss",
                url.scheme()
            )));
        }
        Ok(Self {
            url,
            headers: Vec::new(),
            timeout: None,
        })
    }

    /// Add a handshake request header.
    #[must_use]
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Bound the connection attempt to `timeout`.
    #[must_use]
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// The target URL.
    #[must_use]
    pub fn url_ref(&self) -> &Url {
        &self.url
    }

    /// Extra handshake headers, in insertion order.
    #[must_use]
    pub fn headers(&self) -> &[(String, String)] {
        &self.headers
    }

    /// The configured connect timeout, if any.
    #[must_use]
    pub fn connect_timeout(&self) -> Option<Duration> {
        self.timeout
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Kind;

    #[test]
    fn target_accepts_websocket_schemes() {
        assert!(ConnectTarget::url("ws://localhost:9001/feed").is_ok());
        assert!(ConnectTarget::url("wss://example.com/socket").is_ok());
    }

    #[test]
    fn target_rejects_http_scheme() {
        let err = ConnectTarget::url("https://example.com").unwrap_err();
        assert_eq!(err.kind(), Kind::Configuration);
    }

    #[test]
    fn request_builder_collects_headers_and_timeout() {
        let target = ConnectTarget::url("wss://example.com/socket")
            .unwrap()
            .header("Authorization", "Bearer token")
            .timeout(Duration::from_secs(5));

        assert_eq!(target.headers().len(), 1);
        assert_eq!(target.connect_timeout(), Some(Duration::from_secs(5)));
    }
}
