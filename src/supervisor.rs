//! The supervisor: owns the current transport handle, drives the status
//! state machine, and coordinates the retry engine, the pinger and the
//! reachability monitor.
//!
//! All state-machine variables live behind one mutex per client. The lock is
//! never held across listener callbacks or I/O; notifications leave through
//! the dispatch lane and writes are queued on the transport handle.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Instant;

use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::sleep;

use crate::Result;
use crate::close::{CloseCode, CloseReason};
use crate::connector::Config;
use crate::error::{Error, TransportFailure};
use crate::events::DispatchHandle;
use crate::message::Message;
use crate::monitor::PathStatus;
use crate::pinging::{Pinger, PingingConfig, PingingMode};
use crate::retry::RetryPolicy;
use crate::status::Status;
use crate::transport::{ConnectTarget, Transport, TransportEvent, TransportHandle};

/// Broadcast channel capacity for incoming messages.
const BROADCAST_CAPACITY: usize = 1024;

pub(crate) struct Inner {
    transport: Arc<dyn Transport>,
    target: ConnectTarget,
    subprotocols: Vec<String>,
    state: Mutex<State>,
    status_tx: watch::Sender<Status>,
    messages_tx: broadcast::Sender<Message>,
    events: DispatchHandle,
    pinger: Pinger,
}

/// The state-machine variable group protected by the supervisor lock.
struct State {
    status: Status,
    retry_times: u32,
    retrying: bool,
    /// Identity of the current connection attempt. Transport events tagged
    /// with an older epoch are dropped.
    epoch: u64,
    handle: Option<Box<dyn TransportHandle>>,
    /// Subprotocol stashed when `DidOpen` outruns the connect result.
    awaiting_open: Option<OpenedInfo>,
    /// Cause recorded for a locally initiated close, consumed on `DidClose`.
    pending_close: Option<PendingClose>,
    connect_task: Option<JoinHandle<()>>,
    pump_task: Option<JoinHandle<()>>,
    retry_task: Option<JoinHandle<()>>,
    monitor_task: Option<JoinHandle<()>>,
    path: PathStatus,
    retrier: Option<RetryPolicy>,
    opened_at: Option<Instant>,
}

struct OpenedInfo {
    subprotocol: Option<String>,
}

struct PendingClose {
    reason: Option<CloseReason>,
}

impl Inner {
    pub(crate) fn new(
        transport: Arc<dyn Transport>,
        target: ConnectTarget,
        config: Config,
        events: DispatchHandle,
    ) -> Arc<Self> {
        let (status_tx, _) = watch::channel(Status::default());
        let (messages_tx, _) = broadcast::channel(BROADCAST_CAPACITY);

        let inner = Arc::new_cyclic(|weak: &Weak<Inner>| Inner {
            transport,
            target,
            subprotocols: config.subprotocols,
            state: Mutex::new(State {
                status: Status::default(),
                retry_times: 0,
                retrying: false,
                epoch: 0,
                handle: None,
                awaiting_open: None,
                pending_close: None,
                connect_task: None,
                pump_task: None,
                retry_task: None,
                monitor_task: None,
                path: PathStatus::Satisfied,
                retrier: config.retrier,
                opened_at: None,
            }),
            status_tx,
            messages_tx,
            events,
            pinger: Pinger::new(weak.clone()),
        });

        inner.pinger.configure(config.pinging);
        if let Some(monitor) = config.monitor {
            inner.install_monitor(monitor);
        }
        inner
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn pinger(&self) -> &Pinger {
        &self.pinger
    }

    pub(crate) fn status(&self) -> Status {
        self.status_tx.borrow().clone()
    }

    pub(crate) fn status_receiver(&self) -> watch::Receiver<Status> {
        self.status_tx.subscribe()
    }

    pub(crate) fn subscribe(&self) -> broadcast::Receiver<Message> {
        self.messages_tx.subscribe()
    }

    pub(crate) fn opened_at(&self) -> Option<Instant> {
        self.state().opened_at
    }

    /// Sole producer of status side effects: pinger lifecycle, watch update,
    /// listener notification. Setting an equal status is a no-op.
    fn set_status(&self, state: &mut State, status: Status) {
        if state.status == status {
            return;
        }
        let old = std::mem::replace(&mut state.status, status);

        match &state.status {
            Status::Opened { .. } => self.pinger.resume_if_standard(),
            _ => self.pinger.suspend_if_standard(),
        }

        #[cfg(feature = "tracing")]
        tracing::debug!(from = ?old, to = ?state.status, "status changed");

        let _ = self.status_tx.send(state.status.clone());
        self.events.status(old, state.status.clone());
    }

    /// Transition to `Opening` and start a connection attempt. No-op while
    /// already opening or opened; while `Closing`, the settling close wins.
    pub(crate) fn open(self: &Arc<Self>) {
        let mut state = self.state();
        if !state.status.is_closed() {
            return;
        }
        Self::cancel_retry(&mut state);
        self.begin_connect(&mut state);
    }

    /// Close locally. Public closes pass `reason: None` (manual, never
    /// retried); the pinger and the monitor pass their cause.
    pub(crate) fn close_with(self: &Arc<Self>, code: CloseCode, reason: Option<CloseReason>) {
        let mut state = self.state();
        if matches!(state.status, Status::Closing | Status::Closed { .. }) {
            return;
        }
        Self::cancel_retry(&mut state);
        if state.handle.is_some() {
            state.pending_close = Some(PendingClose { reason });
            self.set_status(&mut state, Status::Closing);
            if let Some(handle) = state.handle.as_ref() {
                handle.cancel(code, None);
            }
        } else {
            // Nothing live to cancel: abandon any in-flight attempt and
            // settle through the retry decision.
            self.teardown_connection(&mut state);
            self.try_close(&mut state, code, reason);
        }
    }

    pub(crate) fn send(&self, message: Message) -> Result<()> {
        let state = self.state();
        let Some(handle) = state.handle.as_ref().filter(|_| state.status.is_opened()) else {
            return Err(Error::not_opened());
        };
        handle.send(message)
    }

    pub(crate) fn send_ping(&self) -> Result<()> {
        let state = self.state();
        let Some(handle) = state.handle.as_ref().filter(|_| state.status.is_opened()) else {
            return Err(Error::not_opened());
        };
        handle.send_ping()
    }

    /// Emit one ping for the pinger. Returns `false` when the connection is
    /// not opened, which ends the cycle.
    pub(crate) fn emit_ping(&self, mode: &PingingMode) -> bool {
        // Provider pings are built outside the supervisor lock.
        let payload = match mode {
            PingingMode::Standard => None,
            PingingMode::Provider(provider) => Some(provider.build_ping()),
        };
        let state = self.state();
        let Some(handle) = state.handle.as_ref().filter(|_| state.status.is_opened()) else {
            return false;
        };
        match payload {
            None => handle.send_ping(),
            Some(message) => handle.send(message),
        }
        .is_ok()
    }

    fn begin_connect(self: &Arc<Self>, state: &mut State) {
        state.epoch += 1;
        let epoch = state.epoch;
        self.set_status(state, Status::Opening);

        let inner = Arc::clone(self);
        state.connect_task = Some(tokio::spawn(async move {
            inner.connect_flow(epoch).await;
        }));
    }

    async fn connect_flow(self: Arc<Self>, epoch: u64) {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        {
            let mut state = self.state();
            if state.epoch != epoch || !matches!(state.status, Status::Opening) {
                return;
            }
            // The pump starts before the handshake completes so challenges
            // raised mid-handshake can be answered.
            let weak = Arc::downgrade(&self);
            state.pump_task = Some(tokio::spawn(pump(weak, epoch, events_rx)));
        }

        let connected = self
            .transport
            .connect(&self.target, &self.subprotocols, events_tx)
            .await;

        let mut state = self.state();
        if state.epoch != epoch || !matches!(state.status, Status::Opening) {
            // Superseded while connecting; dispose of the late handle.
            if let Ok(handle) = connected {
                handle.cancel(CloseCode::NormalClosure, None);
            }
            return;
        }

        match connected {
            Ok(handle) => {
                state.handle = Some(handle);
                if let Some(info) = state.awaiting_open.take() {
                    self.complete_open(&mut state, info.subprotocol);
                }
            }
            Err(error) => {
                #[cfg(feature = "tracing")]
                tracing::warn!(%error, "connection attempt failed");

                let reason = failure_reason(&error);
                self.events.error(error);
                self.teardown_connection(&mut state);
                self.try_close(&mut state, CloseCode::Invalid, Some(reason));
            }
        }
    }

    fn complete_open(&self, state: &mut State, subprotocol: Option<String>) {
        state.retry_times = 0;
        state.retrying = false;
        state.opened_at = Some(Instant::now());
        self.set_status(state, Status::Opened { subprotocol });
    }

    fn handle_transport_event(self: &Arc<Self>, epoch: u64, event: TransportEvent) {
        let mut state = self.state();
        if state.epoch != epoch {
            // Event from a transport that is no longer the current one.
            return;
        }
        match event {
            TransportEvent::DidOpen { subprotocol } => {
                if state.handle.is_some() {
                    self.complete_open(&mut state, subprotocol);
                } else {
                    state.awaiting_open = Some(OpenedInfo { subprotocol });
                }
            }
            TransportEvent::DidReceive(message) => {
                if !state.status.is_opened() {
                    return;
                }
                drop(state);
                self.pinger.offer(&message);
                let _ = self.messages_tx.send(message.clone());
                self.events.message(message);
            }
            TransportEvent::DidClose { code, data } => {
                let (code, reason) = match state.pending_close.take() {
                    // Locally initiated: a code rejected for transmission
                    // settles as Invalid.
                    Some(pending) => {
                        let code = if code.is_sendable() {
                            code
                        } else {
                            CloseCode::Invalid
                        };
                        (code, pending.reason)
                    }
                    None => (code, Some(CloseReason::Server(data.unwrap_or_default()))),
                };
                self.teardown_connection(&mut state);
                self.try_close(&mut state, code, reason);
            }
            TransportEvent::DidFail(error) => {
                #[cfg(feature = "tracing")]
                tracing::warn!(%error, "transport failed");

                let reason = failure_reason(&error);
                // The host hears about the failure before the state machine
                // settles or reopens.
                self.events.error(error);
                self.teardown_connection(&mut state);
                self.try_close(&mut state, CloseCode::Invalid, Some(reason));
            }
            TransportEvent::DidReceiveChallenge(challenge) => {
                drop(state);
                self.events.challenge(challenge);
            }
        }
    }

    /// The retry decision. Each guard short-circuits into a terminal
    /// `Closed`; only the final arm schedules a reopen.
    fn try_close(self: &Arc<Self>, state: &mut State, code: CloseCode, reason: Option<CloseReason>) {
        if state.retrying {
            return;
        }
        if state.path == PathStatus::Unsatisfied {
            self.settle(state, code, reason);
            return;
        }
        // A close without a cause is a manual user close.
        let Some(cause) = reason else {
            self.settle(state, code, None);
            return;
        };
        let Some(retrier) = state.retrier.clone() else {
            self.settle(state, code, Some(cause));
            return;
        };

        state.retry_times += 1;
        let Some(delay) = retrier.retry(code, &cause, state.retry_times) else {
            self.settle(state, code, Some(cause));
            return;
        };

        #[cfg(feature = "tracing")]
        tracing::debug!(attempt = state.retry_times, ?delay, "scheduling reopen");

        state.retrying = true;
        self.set_status(state, Status::Opening);

        let weak = Arc::downgrade(self);
        let epoch = state.epoch;
        state.retry_task = Some(tokio::spawn(async move {
            sleep(delay).await;
            if let Some(inner) = weak.upgrade() {
                inner.reopen(epoch);
            }
        }));
    }

    fn reopen(self: &Arc<Self>, epoch: u64) {
        let mut state = self.state();
        if state.epoch != epoch || !state.retrying {
            return;
        }
        state.retrying = false;
        state.retry_task = None;
        if !matches!(state.status, Status::Opening) {
            return;
        }
        self.begin_connect(&mut state);
    }

    fn settle(&self, state: &mut State, code: CloseCode, reason: Option<CloseReason>) {
        Self::cancel_retry(state);
        self.set_status(state, Status::Closed { code, reason });
    }

    fn cancel_retry(state: &mut State) {
        state.retrying = false;
        if let Some(task) = state.retry_task.take() {
            task.abort();
        }
    }

    fn teardown_connection(&self, state: &mut State) {
        state.epoch += 1;
        state.handle = None;
        state.awaiting_open = None;
        state.opened_at = None;
        if let Some(task) = state.connect_task.take() {
            task.abort();
        }
        if let Some(task) = state.pump_task.take() {
            task.abort();
        }
    }

    /// React to a reachability transition. Duplicate edges are filtered.
    pub(crate) fn path_changed(self: &Arc<Self>, path: PathStatus) {
        {
            let mut state = self.state();
            if state.path == path {
                return;
            }
            state.path = path;
        }

        #[cfg(feature = "tracing")]
        tracing::debug!(?path, "network path changed");

        match path {
            PathStatus::Unsatisfied => {
                self.close_with(CloseCode::Invalid, Some(CloseReason::Monitor));
            }
            PathStatus::Satisfied => {
                // Reopen unless the close was a manual one (nil reason).
                let resumable = matches!(
                    self.state().status,
                    Status::Closed {
                        reason: Some(_),
                        ..
                    }
                );
                if resumable {
                    self.open();
                }
            }
        }
    }

    pub(crate) fn install_monitor(self: &Arc<Self>, mut monitor: watch::Receiver<PathStatus>) {
        let weak = Arc::downgrade(self);
        let task = tokio::spawn(async move {
            // Pick up the current path before waiting for edges.
            let initial = *monitor.borrow_and_update();
            match weak.upgrade() {
                Some(inner) => inner.path_changed(initial),
                None => return,
            }
            loop {
                if monitor.changed().await.is_err() {
                    return;
                }
                let path = *monitor.borrow_and_update();
                let Some(inner) = weak.upgrade() else {
                    return;
                };
                inner.path_changed(path);
            }
        });

        let mut state = self.state();
        if let Some(previous) = state.monitor_task.replace(task) {
            previous.abort();
        }
    }

    pub(crate) fn using_retrier(&self, retrier: Option<RetryPolicy>) -> Result<()> {
        let mut state = self.state();
        self.ensure_closed(&state)?;
        state.retrier = retrier;
        Ok(())
    }

    pub(crate) fn using_pinging(&self, pinging: Option<PingingConfig>) -> Result<()> {
        self.ensure_closed(&self.state())?;
        self.pinger.configure(pinging);
        Ok(())
    }

    pub(crate) fn using_monitor(
        self: &Arc<Self>,
        monitor: Option<watch::Receiver<PathStatus>>,
    ) -> Result<()> {
        {
            let mut state = self.state();
            self.ensure_closed(&state)?;
            if monitor.is_none() {
                if let Some(task) = state.monitor_task.take() {
                    task.abort();
                }
                state.path = PathStatus::Satisfied;
            }
        }
        if let Some(receiver) = monitor {
            self.install_monitor(receiver);
        }
        Ok(())
    }

    fn ensure_closed(&self, state: &State) -> Result<()> {
        if state.status.is_closed() {
            Ok(())
        } else {
            Err(Error::configuration(
                "subsystems can only be reconfigured before open or between closes",
            ))
        }
    }

    /// Final teardown when the owning connector drops.
    pub(crate) fn shutdown(&self) {
        let mut state = self.state();
        Self::cancel_retry(&mut state);
        if let Some(task) = state.monitor_task.take() {
            task.abort();
        }
        if let Some(handle) = state.handle.take() {
            handle.cancel(CloseCode::NormalClosure, None);
        }
        if let Some(task) = state.connect_task.take() {
            task.abort();
        }
        if let Some(task) = state.pump_task.take() {
            task.abort();
        }
        drop(state);
        self.pinger.suspend();
    }
}

async fn pump(
    owner: Weak<Inner>,
    epoch: u64,
    mut events: mpsc::UnboundedReceiver<TransportEvent>,
) {
    while let Some(event) = events.recv().await {
        let Some(inner) = owner.upgrade() else {
            return;
        };
        inner.handle_transport_event(epoch, event);
    }
}

fn failure_reason(error: &Error) -> CloseReason {
    error.downcast_ref::<TransportFailure>().map_or(
        CloseReason::Error {
            code: 0,
            domain: "internal".to_owned(),
        },
        |failure| CloseReason::Error {
            code: failure.code,
            domain: failure.domain.clone(),
        },
    )
}
