//! Liveness pinging.
//!
//! Two strategies: `Standard` rides the transport's native ping/pong frames
//! and is resumed/suspended automatically by the supervisor on status
//! changes; `Provider` sends an application message and matches pongs with a
//! host-supplied predicate, with the host driving resume/suspend.

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::sleep;

use crate::close::{CloseCode, CloseReason};
use crate::message::Message;
use crate::supervisor::Inner;

const DEFAULT_PINGING_TIMEOUT: Duration = Duration::from_secs(15);
const DEFAULT_PINGING_INTERVAL: Duration = Duration::from_secs(5);

/// Application-level ping strategy for servers that do not speak protocol
/// ping/pong.
pub trait PingProvider: Send + Sync + 'static {
    /// Build the message sent as a ping.
    fn build_ping(&self) -> Message;

    /// Decide whether an incoming message answers the outstanding ping.
    fn check_pong(&self, message: &Message) -> bool;
}

/// Which ping strategy to run.
#[non_exhaustive]
#[derive(Clone)]
pub enum PingingMode {
    /// Protocol-level ping frames; lifecycle driven by the supervisor.
    Standard,
    /// Application messages from the given provider; lifecycle driven by the
    /// host via `resume_pinging`/`suspend_pinging`.
    Provider(Arc<dyn PingProvider>),
}

impl PingingMode {
    pub(crate) fn is_standard(&self) -> bool {
        matches!(self, PingingMode::Standard)
    }
}

impl fmt::Debug for PingingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PingingMode::Standard => f.write_str("Standard"),
            PingingMode::Provider(_) => f.write_str("Provider(..)"),
        }
    }
}

/// Configuration of the liveness subsystem.
#[non_exhaustive]
#[derive(Debug, Clone)]
pub struct PingingConfig {
    /// Ping strategy.
    pub mode: PingingMode,
    /// Maximum time to wait for a pong before declaring the connection dead.
    pub timeout: Duration,
    /// Idle gap between a healthy pong and the next ping.
    pub interval: Duration,
}

impl Default for PingingConfig {
    fn default() -> Self {
        Self {
            mode: PingingMode::Standard,
            timeout: DEFAULT_PINGING_TIMEOUT,
            interval: DEFAULT_PINGING_INTERVAL,
        }
    }
}

impl PingingConfig {
    /// Protocol-ping configuration.
    #[must_use]
    pub fn standard(timeout: Duration, interval: Duration) -> Self {
        Self {
            mode: PingingMode::Standard,
            timeout,
            interval,
        }
    }

    /// Message-ping configuration with the given provider.
    #[must_use]
    pub fn provider(
        provider: impl PingProvider,
        timeout: Duration,
        interval: Duration,
    ) -> Self {
        Self {
            mode: PingingMode::Provider(Arc::new(provider)),
            timeout,
            interval,
        }
    }
}

struct PingerState {
    config: Option<PingingConfig>,
    pong_received: bool,
    cycle: Option<JoinHandle<()>>,
}

/// Drives ping cycles against the supervisor that owns it.
///
/// Holds only a weak back-reference; once the supervisor is gone every
/// operation degrades to a no-op and the running cycle winds down.
pub(crate) struct Pinger {
    owner: Weak<Inner>,
    state: Mutex<PingerState>,
}

impl Pinger {
    pub(crate) fn new(owner: Weak<Inner>) -> Self {
        Self {
            owner,
            state: Mutex::new(PingerState {
                config: None,
                pong_received: false,
                cycle: None,
            }),
        }
    }

    fn state(&self) -> MutexGuard<'_, PingerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn configure(&self, config: Option<PingingConfig>) {
        self.suspend();
        self.state().config = config;
    }

    pub(crate) fn is_standard(&self) -> bool {
        self.state()
            .config
            .as_ref()
            .is_some_and(|config| config.mode.is_standard())
    }

    /// Start a cycle unless one is already active or no pinging is configured.
    pub(crate) fn resume(&self) {
        let mut state = self.state();
        if state.cycle.as_ref().is_some_and(|task| !task.is_finished()) {
            return;
        }
        let Some(config) = state.config.clone() else {
            return;
        };
        state.pong_received = false;
        state.cycle = Some(tokio::spawn(run_cycles(self.owner.clone(), config)));
    }

    /// Cancel any pending cycle step. Idempotent.
    pub(crate) fn suspend(&self) {
        if let Some(task) = self.state().cycle.take() {
            task.abort();
        }
    }

    pub(crate) fn resume_if_standard(&self) {
        if self.is_standard() {
            self.resume();
        }
    }

    pub(crate) fn suspend_if_standard(&self) {
        if self.is_standard() {
            self.suspend();
        }
    }

    /// Consider an incoming message as a pong answer.
    pub(crate) fn offer(&self, message: &Message) {
        let Some(config) = self.state().config.clone() else {
            return;
        };
        // The provider predicate runs outside the pinger critical section.
        let answered = match &config.mode {
            PingingMode::Standard => matches!(message, Message::Pong),
            PingingMode::Provider(provider) => provider.check_pong(message),
        };
        if answered {
            self.state().pong_received = true;
        }
    }

    fn reset_pong(&self) {
        self.state().pong_received = false;
    }

    fn pong_received(&self) -> bool {
        self.state().pong_received
    }
}

async fn run_cycles(owner: Weak<Inner>, config: PingingConfig) {
    loop {
        {
            let Some(inner) = owner.upgrade() else {
                return;
            };
            inner.pinger().reset_pong();
            if !inner.emit_ping(&config.mode) {
                return;
            }
        }

        sleep(config.timeout).await;

        let Some(inner) = owner.upgrade() else {
            return;
        };
        if !inner.pinger().pong_received() {
            #[cfg(feature = "tracing")]
            tracing::warn!(timeout = ?config.timeout, "no pong within timeout, closing");
            inner.close_with(CloseCode::Invalid, Some(CloseReason::Pinging));
            return;
        }
        drop(inner);

        sleep(config.interval).await;
    }
}
