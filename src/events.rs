//! Event dispatch between the supervisory core and the host application.
//!
//! Every outward notification is enqueued on a single serial lane and
//! delivered by a dedicated dispatcher task, so listener callbacks never run
//! under the supervisor lock and observe status transitions in total order.

use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::error::Error;
use crate::message::Message;
use crate::status::Status;

/// Host-side observer of connector events.
///
/// All methods have no-op defaults; implement only what you need. Callbacks
/// run on the connector's dispatch task, serially per client.
pub trait ConnectorListener: Send + Sync + 'static {
    /// The status changed from `old` to `new`. Never called with equal values.
    fn on_status(&self, old: &Status, new: &Status) {
        let _ = (old, new);
    }

    /// A message arrived from the transport. Delivered in arrival order.
    fn on_message(&self, message: Message) {
        let _ = message;
    }

    /// The transport reported a failure. Always delivered before the state
    /// machine settles or reopens.
    fn on_error(&self, error: &Error) {
        let _ = error;
    }

    /// The transport received a server trust challenge.
    fn on_challenge(&self, challenge: &TlsChallenge) -> ChallengeDisposition {
        let _ = challenge;
        ChallengeDisposition::UseDefault
    }
}

/// Listener that ignores everything. Used when the host installs none.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopListener;

impl ConnectorListener for NoopListener {}

/// How to answer a server trust challenge.
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChallengeDisposition {
    /// Let the transport perform its default evaluation.
    UseDefault,
    /// Reject this protection space and continue without credentials.
    Reject,
    /// Cancel the entire connection attempt.
    Cancel,
    /// Answer with the given client credential.
    UseCredential(ClientCredential),
}

/// Opaque client identity presented in response to a challenge.
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientCredential {
    /// DER-encoded identity blob, interpreted by the transport.
    pub identity: Vec<u8>,
}

/// Description of a server trust challenge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TlsChallenge {
    /// Host of the protection space being challenged.
    pub host: String,
}

/// A challenge in flight: the description plus the completion handle the
/// transport blocks on.
#[derive(Debug)]
pub struct ServerChallenge {
    challenge: TlsChallenge,
    responder: oneshot::Sender<ChallengeDisposition>,
}

impl ServerChallenge {
    /// Pair a challenge with the receiver the transport awaits.
    #[must_use]
    pub fn new(challenge: TlsChallenge) -> (Self, oneshot::Receiver<ChallengeDisposition>) {
        let (responder, rx) = oneshot::channel();
        (
            Self {
                challenge,
                responder,
            },
            rx,
        )
    }

    /// The challenge description.
    #[must_use]
    pub fn challenge(&self) -> &TlsChallenge {
        &self.challenge
    }

    /// Answer the challenge. Dropping without answering reads as
    /// [`ChallengeDisposition::UseDefault`] on the transport side.
    pub fn answer(self, disposition: ChallengeDisposition) {
        let _ = self.responder.send(disposition);
    }
}

/// One queued outward notification.
#[derive(Debug)]
pub(crate) enum Event {
    Status { old: Status, new: Status },
    Message(Message),
    Error(Error),
    Challenge(ServerChallenge),
}

/// Sending half of the dispatch lane, held by the supervisor.
#[derive(Clone)]
pub(crate) struct DispatchHandle {
    tx: mpsc::UnboundedSender<Event>,
}

impl DispatchHandle {
    pub(crate) fn status(&self, old: Status, new: Status) {
        let _ = self.tx.send(Event::Status { old, new });
    }

    pub(crate) fn message(&self, message: Message) {
        let _ = self.tx.send(Event::Message(message));
    }

    pub(crate) fn error(&self, error: Error) {
        let _ = self.tx.send(Event::Error(error));
    }

    pub(crate) fn challenge(&self, challenge: ServerChallenge) {
        let _ = self.tx.send(Event::Challenge(challenge));
    }
}

/// Spawn the dispatcher task feeding `listener`.
pub(crate) fn spawn_dispatcher(
    listener: Arc<dyn ConnectorListener>,
) -> (DispatchHandle, JoinHandle<()>) {
    let (tx, mut rx) = mpsc::unbounded_channel();
    let task = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            match event {
                Event::Status { old, new } => listener.on_status(&old, &new),
                Event::Message(message) => listener.on_message(message),
                Event::Error(error) => listener.on_error(&error),
                Event::Challenge(challenge) => {
                    let disposition = listener.on_challenge(challenge.challenge());
                    challenge.answer(disposition);
                }
            }
        }
    });
    (DispatchHandle { tx }, task)
}
