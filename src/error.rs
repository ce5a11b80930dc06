//! Crate error type: a kind tag over a boxed source, inspectable via
//! [`downcast_ref`](Error::downcast_ref).

use std::backtrace::Backtrace;
use std::error::Error as StdError;
use std::fmt;

/// Coarse classification of connector failures.
#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Kind {
    /// `send`/`send_ping` called while the connection is not opened.
    NotOpened,
    /// The transport failed to connect or dropped the connection.
    Transport,
    /// A configuration call was rejected (e.g. reconfiguring while opened).
    Configuration,
    /// Internal error from dependencies.
    Internal,
}

/// Error produced by the connector.
#[derive(Debug)]
pub struct Error {
    kind: Kind,
    source: Option<Box<dyn StdError + Send + Sync + 'static>>,
    backtrace: Backtrace,
}

impl Error {
    /// Wrap a concrete cause under the given [`Kind`].
    pub fn with_source<S: StdError + Send + Sync + 'static>(kind: Kind, source: S) -> Self {
        Self {
            kind,
            source: Some(Box::new(source)),
            backtrace: Backtrace::capture(),
        }
    }

    /// The error classification.
    #[must_use]
    pub fn kind(&self) -> Kind {
        self.kind
    }

    /// Backtrace captured where the error was constructed.
    #[must_use]
    pub fn backtrace(&self) -> &Backtrace {
        &self.backtrace
    }

    /// The concrete cause, if one was attached.
    #[must_use]
    pub fn inner(&self) -> Option<&(dyn StdError + Send + Sync + 'static)> {
        self.source.as_deref()
    }

    /// Downcast the cause to a concrete error type.
    #[must_use]
    pub fn downcast_ref<E: StdError + 'static>(&self) -> Option<&E> {
        let e = self.source.as_deref()?;
        e.downcast_ref::<E>()
    }

    /// Shorthand for the rejection of `send` while not opened.
    #[must_use]
    pub fn not_opened() -> Self {
        NotOpened.into()
    }

    /// Shorthand for a rejected configuration call.
    pub fn configuration<S: Into<String>>(reason: S) -> Self {
        Configuration {
            reason: reason.into(),
        }
        .into()
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.source {
            Some(src) => write!(f, "{:?}: {}", self.kind, src),
            None => write!(f, "{:?}", self.kind),
        }
    }
}

impl StdError for Error {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.source
            .as_deref()
            .map(|e| e as &(dyn StdError + 'static))
    }
}

/// `send` was called while the status is not `Opened`.
#[non_exhaustive]
#[derive(Debug, Clone, Copy)]
pub struct NotOpened;

impl fmt::Display for NotOpened {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "connection is not opened")
    }
}

impl StdError for NotOpened {}

impl From<NotOpened> for Error {
    fn from(err: NotOpened) -> Self {
        Error::with_source(Kind::NotOpened, err)
    }
}

/// A configuration call arrived at the wrong time or with invalid input.
#[non_exhaustive]
#[derive(Debug)]
pub struct Configuration {
    /// Human-readable rejection reason.
    pub reason: String,
}

impl fmt::Display for Configuration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid configuration: {}", self.reason)
    }
}

impl StdError for Configuration {}

impl From<Configuration> for Error {
    fn from(err: Configuration) -> Self {
        Error::with_source(Kind::Configuration, err)
    }
}

/// Connection-level failure reported by a transport.
///
/// `code` and `domain` flow into [`CloseReason::Error`](crate::CloseReason)
/// when the failure drives the state machine into a close.
#[derive(Debug, Clone)]
pub struct TransportFailure {
    /// Numeric error code (OS errno, HTTP status, or 0 when unknown).
    pub code: i32,
    /// Transport-defined error domain, e.g. `io`, `protocol`, `tls`.
    pub domain: String,
    /// Human-readable description.
    pub message: String,
}

impl fmt::Display for TransportFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "transport failure [{} {}]: {}",
            self.domain, self.code, self.message
        )
    }
}

impl StdError for TransportFailure {}

impl From<TransportFailure> for Error {
    fn from(err: TransportFailure) -> Self {
        Error::with_source(Kind::Transport, err)
    }
}

impl From<url::ParseError> for Error {
    fn from(e: url::ParseError) -> Self {
        Error::with_source(Kind::Configuration, e)
    }
}
