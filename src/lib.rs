#![cfg_attr(doc, doc = include_str!("../README.md"))]

pub mod close;
pub mod connector;
pub mod error;
pub mod events;
pub mod message;
pub mod monitor;
pub mod pinging;
pub mod retry;
pub mod status;
mod supervisor;
pub mod transport;

pub use close::{CloseCode, CloseReason};
pub use connector::{Config, Connector};
pub use error::{Error, Kind};
pub use events::{ChallengeDisposition, ClientCredential, ConnectorListener, TlsChallenge};
pub use message::Message;
pub use monitor::{PathStatus, path_channel};
pub use pinging::{PingProvider, PingingConfig, PingingMode};
pub use retry::{Backoff, RetryPolicy};
pub use status::Status;
pub use transport::{ConnectTarget, Transport, TransportEvent, TransportHandle};

/// Crate-wide result type.
pub type Result<T> = std::result::Result<T, Error>;
