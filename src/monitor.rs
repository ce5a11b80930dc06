//! Network reachability signal consumed by the supervisor.
//!
//! The monitor itself is an external collaborator; the connector only
//! consumes a [`watch`] channel of path transitions. Hook your platform's
//! reachability source (a netlink route watcher, a connectivity probe loop)
//! to the sender half and hand the receiver to
//! [`using_monitor`](crate::Connector::using_monitor).

use tokio::sync::watch;

/// Whether the network path can currently carry traffic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PathStatus {
    /// The path is viable.
    #[default]
    Satisfied,
    /// The path cannot carry traffic.
    Unsatisfied,
}

/// Create a reachability channel seeded with `initial`.
///
/// The sender half belongs to the host's reachability source; duplicate
/// updates are filtered by the supervisor, so pushing the current status
/// repeatedly is harmless.
#[must_use]
pub fn path_channel(initial: PathStatus) -> (watch::Sender<PathStatus>, watch::Receiver<PathStatus>) {
    watch::channel(initial)
}
