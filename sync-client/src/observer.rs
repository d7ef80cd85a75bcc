//! Application-facing notifications.

use tokio::sync::mpsc;
use wist_sync_core::ConnectionNotice;

/// Receives commands and connection changes from a sync session.
///
/// Callbacks run on the session's service task, one at a time and in event
/// order. They must not block. Calling back into the [`SyncHandle`] from a
/// callback is fine; the request is queued.
///
/// [`SyncHandle`]: crate::SyncHandle
pub trait SyncObserver: Send + Sync {
    /// Start at `host_time` (local monotonic ns) with `tempo` BPM.
    fn on_start_received(&self, host_time: u64, tempo: f32);

    /// Stop at `host_time` (local monotonic ns).
    fn on_stop_received(&self, host_time: u64);

    /// The first peer completed the handshake.
    fn on_connection_established(&self) {}

    /// The session dropped unexpectedly.
    fn on_connection_lost(&self) {}

    /// Sync was disabled locally.
    fn on_connection_cancelled(&self) {}
}

/// One observer callback, as data.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Notification {
    /// See [`SyncObserver::on_start_received`].
    StartReceived {
        /// Local host time (ns).
        host_time: u64,
        /// Tempo (BPM).
        tempo: f32,
    },
    /// See [`SyncObserver::on_stop_received`].
    StopReceived {
        /// Local host time (ns).
        host_time: u64,
    },
    /// See [`SyncObserver::on_connection_established`].
    ConnectionEstablished,
    /// See [`SyncObserver::on_connection_lost`].
    ConnectionLost,
    /// See [`SyncObserver::on_connection_cancelled`].
    ConnectionCancelled,
}

impl Notification {
    /// Invoke the matching observer callback.
    pub fn deliver(self, observer: &dyn SyncObserver) {
        match self {
            Notification::StartReceived { host_time, tempo } => {
                observer.on_start_received(host_time, tempo)
            }
            Notification::StopReceived { host_time } => observer.on_stop_received(host_time),
            Notification::ConnectionEstablished => observer.on_connection_established(),
            Notification::ConnectionLost => observer.on_connection_lost(),
            Notification::ConnectionCancelled => observer.on_connection_cancelled(),
        }
    }

    /// Whether this is a connection-state notification.
    pub fn is_connection(&self) -> bool {
        matches!(
            self,
            Notification::ConnectionEstablished
                | Notification::ConnectionLost
                | Notification::ConnectionCancelled
        )
    }
}

impl From<ConnectionNotice> for Notification {
    fn from(notice: ConnectionNotice) -> Self {
        match notice {
            ConnectionNotice::Established => Notification::ConnectionEstablished,
            ConnectionNotice::Lost => Notification::ConnectionLost,
            ConnectionNotice::Cancelled => Notification::ConnectionCancelled,
        }
    }
}

/// Observer that forwards every callback into an mpsc channel.
#[derive(Debug, Clone)]
pub struct ChannelObserver {
    tx: mpsc::UnboundedSender<Notification>,
}

impl ChannelObserver {
    /// Create an observer and the receiver its notifications arrive on.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<Notification>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    fn forward(&self, notification: Notification) {
        // Receiver gone means nobody is listening any more.
        let _ = self.tx.send(notification);
    }
}

impl SyncObserver for ChannelObserver {
    fn on_start_received(&self, host_time: u64, tempo: f32) {
        self.forward(Notification::StartReceived { host_time, tempo });
    }

    fn on_stop_received(&self, host_time: u64) {
        self.forward(Notification::StopReceived { host_time });
    }

    fn on_connection_established(&self) {
        self.forward(Notification::ConnectionEstablished);
    }

    fn on_connection_lost(&self) {
        self.forward(Notification::ConnectionLost);
    }

    fn on_connection_cancelled(&self) {
        self.forward(Notification::ConnectionCancelled);
    }
}
