//! Public client façade over the supervisor.

use std::sync::Arc;
use std::time::Instant;

use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;

use crate::Result;
use crate::close::CloseCode;
use crate::events::{ConnectorListener, spawn_dispatcher};
use crate::message::Message;
use crate::monitor::PathStatus;
use crate::pinging::PingingConfig;
use crate::retry::RetryPolicy;
use crate::status::Status;
use crate::supervisor::Inner;
use crate::transport::{ConnectTarget, Transport};

/// Configuration for a [`Connector`].
///
/// Subsystems left `None` are disabled: no retrier means a closed connection
/// stays closed, no pinging means no liveness checks, no monitor means
/// reachability never gates reconnection.
#[non_exhaustive]
#[derive(Debug, Clone, Default)]
pub struct Config {
    /// Subprotocols offered during the handshake, in preference order.
    pub subprotocols: Vec<String>,
    /// Reconnection policy. `None` disables retrying.
    pub retrier: Option<RetryPolicy>,
    /// Liveness pinging. `None` disables the pinger.
    pub pinging: Option<PingingConfig>,
    /// Reachability signal. `None` leaves the path permanently satisfied.
    pub monitor: Option<watch::Receiver<PathStatus>>,
}

/// A long-lived client owning one logical WebSocket connection.
///
/// The connector keeps the connection healthy across transient failures:
/// closes are classified, fed through the retry policy, and reopened after
/// backoff; liveness is checked by the pinger; reachability loss closes the
/// connection and recovery reopens it. Sends are rejected with
/// [`Kind::NotOpened`](crate::Kind::NotOpened) while not opened — there is no
/// outbound queue.
///
/// # Example
///
/// ```no_run
/// use std::time::Duration;
/// use ws_warden::{Backoff, Config, ConnectTarget, Connector, RetryPolicy};
///
/// # async fn example() -> ws_warden::Result<()> {
/// let mut config = Config::default();
/// config.retrier = Some(RetryPolicy::new(
///     Backoff::Exponential { base: 2.0, scale: 0.25 },
///     5,
/// ));
///
/// let target = ConnectTarget::url("wss://example.com/feed")?;
/// let connector = Connector::new(target, config);
///
/// let mut statuses = connector.status_receiver();
/// connector.open();
/// statuses.changed().await.ok();
/// # Ok(())
/// # }
/// ```
pub struct Connector {
    inner: Arc<Inner>,
    dispatcher: JoinHandle<()>,
}

impl Connector {
    /// Create a connector over the bundled tungstenite transport, without a
    /// listener. Observe the connection through [`status_receiver`] and
    /// [`subscribe`] instead.
    ///
    /// Must be called within a tokio runtime.
    ///
    /// [`status_receiver`]: Connector::status_receiver
    /// [`subscribe`]: Connector::subscribe
    #[cfg(feature = "tungstenite")]
    #[must_use]
    pub fn new(target: ConnectTarget, config: Config) -> Self {
        Self::with_transport(
            target,
            config,
            Arc::new(crate::transport::tungstenite::TungsteniteTransport::new()),
            Arc::new(crate::events::NoopListener),
        )
    }

    /// Create a connector over the bundled tungstenite transport with a
    /// listener receiving every status, message, error and challenge event.
    #[cfg(feature = "tungstenite")]
    #[must_use]
    pub fn with_listener(
        target: ConnectTarget,
        config: Config,
        listener: Arc<dyn ConnectorListener>,
    ) -> Self {
        Self::with_transport(
            target,
            config,
            Arc::new(crate::transport::tungstenite::TungsteniteTransport::new()),
            listener,
        )
    }

    /// Create a connector over a custom [`Transport`].
    #[must_use]
    pub fn with_transport(
        target: ConnectTarget,
        config: Config,
        transport: Arc<dyn Transport>,
        listener: Arc<dyn ConnectorListener>,
    ) -> Self {
        let (events, dispatcher) = spawn_dispatcher(listener);
        let inner = Inner::new(transport, target, config, events);
        Self { inner, dispatcher }
    }

    /// Transition to `Opening` and connect. No-op while already opening or
    /// opened; while closing, the settling close wins and the host can call
    /// `open` again once closed.
    pub fn open(&self) {
        self.inner.open();
    }

    /// Gracefully close with [`CloseCode::NormalClosure`]. A manual close is
    /// never retried. No-op while already closing or closed.
    pub fn close(&self) {
        self.close_with(CloseCode::NormalClosure);
    }

    /// Gracefully close with the given code. Codes outside the sendable
    /// ranges are withheld from the wire.
    pub fn close_with(&self, code: CloseCode) {
        self.inner.close_with(code, None);
    }

    /// Send a message.
    ///
    /// # Errors
    ///
    /// Fails with [`Kind::NotOpened`](crate::Kind::NotOpened) unless the
    /// status is `Opened`; there is no queueing across reconnects.
    pub fn send(&self, message: Message) -> Result<()> {
        self.inner.send(message)
    }

    /// Send a protocol-level ping. The pong surfaces as
    /// [`Message::Pong`] through the normal message path.
    ///
    /// # Errors
    ///
    /// Fails with [`Kind::NotOpened`](crate::Kind::NotOpened) unless the
    /// status is `Opened`.
    pub fn send_ping(&self) -> Result<()> {
        self.inner.send_ping()
    }

    /// Current status.
    #[must_use]
    pub fn status(&self) -> Status {
        self.inner.status()
    }

    /// Watch channel of status transitions.
    #[must_use]
    pub fn status_receiver(&self) -> watch::Receiver<Status> {
        self.inner.status_receiver()
    }

    /// Subscribe to incoming messages. Each call returns an independent
    /// receiver.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<Message> {
        self.inner.subscribe()
    }

    /// When the current connection was established, if opened.
    #[must_use]
    pub fn opened_at(&self) -> Option<Instant> {
        self.inner.opened_at()
    }

    /// Install or remove the retry policy.
    ///
    /// # Errors
    ///
    /// Rejected unless the status is `Closed`.
    pub fn using_retrier(&self, retrier: Option<RetryPolicy>) -> Result<()> {
        self.inner.using_retrier(retrier)
    }

    /// Install or remove the liveness pinging configuration.
    ///
    /// # Errors
    ///
    /// Rejected unless the status is `Closed`.
    pub fn using_pinging(&self, pinging: Option<PingingConfig>) -> Result<()> {
        self.inner.using_pinging(pinging)
    }

    /// Install or remove the reachability signal.
    ///
    /// # Errors
    ///
    /// Rejected unless the status is `Closed`.
    pub fn using_monitor(&self, monitor: Option<watch::Receiver<PathStatus>>) -> Result<()> {
        self.inner.using_monitor(monitor)
    }

    /// Start ping cycles. Required for `Provider` pinging, whose lifecycle
    /// the host drives; `Standard` pinging resumes by itself on open.
    pub fn resume_pinging(&self) {
        self.inner.pinger().resume();
    }

    /// Stop ping cycles and cancel any pending cycle step. Idempotent.
    pub fn suspend_pinging(&self) {
        self.inner.pinger().suspend();
    }
}

impl Drop for Connector {
    fn drop(&mut self) {
        self.inner.shutdown();
        self.dispatcher.abort();
    }
}
