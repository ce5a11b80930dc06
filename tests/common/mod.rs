#![allow(
    clippy::unwrap_used,
    clippy::missing_panics_doc,
    reason = "Do not need additional syntax for setting up tests"
)]
#![allow(
    unused,
    reason = "Each test binary uses a different subset of the harness"
)]

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, watch};
use tokio::time::timeout;
use ws_warden::error::TransportFailure;
use ws_warden::transport::{
    ConnectTarget, Transport, TransportEvent, TransportEvents, TransportHandle,
};
use ws_warden::{CloseCode, ConnectorListener, Error, Message, Status};

pub const WAIT: Duration = Duration::from_secs(2);

/// What the connector asked a live connection to do.
#[derive(Debug, PartialEq, Eq)]
pub enum Outgoing {
    Message(Message),
    Ping,
    Cancel { code: CloseCode },
}

/// One accepted connection: the event sender the test scripts, plus the
/// stream of outbound commands the connector issued on it.
pub struct Link {
    pub events: TransportEvents,
    pub outgoing: mpsc::UnboundedReceiver<Outgoing>,
}

impl Link {
    pub async fn next_outgoing(&mut self) -> Outgoing {
        timeout(WAIT, self.outgoing.recv())
            .await
            .expect("timed out waiting for an outbound command")
            .expect("connection dropped")
    }
}

/// In-process transport scripted by tests: connections either fail from a
/// budget of synthetic errors or succeed and hand the test a [`Link`].
pub struct ScriptedTransport {
    fail_budget: AtomicU32,
    links: mpsc::UnboundedSender<Link>,
}

impl ScriptedTransport {
    pub fn create() -> (Arc<Self>, mpsc::UnboundedReceiver<Link>) {
        let (links, accepted) = mpsc::unbounded_channel();
        (
            Arc::new(Self {
                fail_budget: AtomicU32::new(0),
                links,
            }),
            accepted,
        )
    }

    /// Make the next `attempts` connection attempts fail.
    pub fn fail_next(&self, attempts: u32) {
        self.fail_budget.store(attempts, Ordering::SeqCst);
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn connect(
        &self,
        _target: &ConnectTarget,
        subprotocols: &[String],
        events: TransportEvents,
    ) -> ws_warden::Result<Box<dyn TransportHandle>> {
        let refused = self
            .fail_budget
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if refused {
            return Err(TransportFailure {
                code: 61,
                domain: "io".to_owned(),
                message: "connection refused".to_owned(),
            }
            .into());
        }

        let _ = events.send(TransportEvent::DidOpen {
            subprotocol: subprotocols.first().cloned(),
        });

        let (outgoing_tx, outgoing_rx) = mpsc::unbounded_channel();
        let _ = self.links.send(Link {
            events: events.clone(),
            outgoing: outgoing_rx,
        });

        Ok(Box::new(ScriptedHandle {
            events,
            outgoing: outgoing_tx,
        }))
    }
}

struct ScriptedHandle {
    events: TransportEvents,
    outgoing: mpsc::UnboundedSender<Outgoing>,
}

impl TransportHandle for ScriptedHandle {
    fn send(&self, message: Message) -> ws_warden::Result<()> {
        self.outgoing
            .send(Outgoing::Message(message))
            .map_err(|_| closed())
    }

    fn send_ping(&self) -> ws_warden::Result<()> {
        self.outgoing.send(Outgoing::Ping).map_err(|_| closed())
    }

    fn cancel(&self, code: CloseCode, _reason: Option<Vec<u8>>) {
        let _ = self.outgoing.send(Outgoing::Cancel { code });
        // Local cancels complete promptly; a non-sendable code is reported
        // back as Invalid.
        let reported = if code.is_sendable() {
            code
        } else {
            CloseCode::Invalid
        };
        let _ = self.events.send(TransportEvent::DidClose {
            code: reported,
            data: None,
        });
    }
}

fn closed() -> Error {
    TransportFailure {
        code: 0,
        domain: "connection".to_owned(),
        message: "connection is closed".to_owned(),
    }
    .into()
}

/// Stream of connections accepted by a [`ScriptedTransport`].
pub type LinkStream = mpsc::UnboundedReceiver<Link>;

pub async fn next_link(accepted: &mut LinkStream) -> Link {
    timeout(WAIT, accepted.recv())
        .await
        .expect("timed out waiting for a connection")
        .expect("transport dropped")
}

pub async fn wait_for_status(
    statuses: &mut watch::Receiver<Status>,
    predicate: impl FnMut(&Status) -> bool,
) -> Status {
    timeout(WAIT, statuses.wait_for(predicate))
        .await
        .expect("timed out waiting for a status")
        .expect("status channel closed")
        .clone()
}

/// Poll until `predicate` holds; listener callbacks run on the dispatcher
/// task, so observations can lag the watch channel slightly.
pub async fn wait_until(mut predicate: impl FnMut() -> bool) {
    timeout(WAIT, async {
        while !predicate() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

/// Listener recording every transition, message and error it observes.
#[derive(Default)]
pub struct Recorder {
    pub statuses: Mutex<Vec<(Status, Status)>>,
    pub messages: Mutex<Vec<Message>>,
    pub errors: AtomicU32,
}

impl ConnectorListener for Recorder {
    fn on_status(&self, old: &Status, new: &Status) {
        self.statuses
            .lock()
            .unwrap()
            .push((old.clone(), new.clone()));
    }

    fn on_message(&self, message: Message) {
        self.messages.lock().unwrap().push(message);
    }

    fn on_error(&self, _error: &Error) {
        self.errors.fetch_add(1, Ordering::SeqCst);
    }
}

/// A target the scripted transport never dials.
pub fn target() -> ConnectTarget {
    ConnectTarget::url("ws://127.0.0.1:9").unwrap()
}
