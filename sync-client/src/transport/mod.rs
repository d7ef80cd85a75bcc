//! Transport abstraction for WIST sync.
//!
//! This module provides a pluggable transport layer that abstracts the
//! peer-to-peer session underneath the sync protocol (a local wireless
//! session in production, an in-process mock for testing).
//!
//! # Design
//!
//! Outbound calls go through the async [`Transport`] trait:
//! - `advertise()` / `browse()` make the device discoverable and discovering
//!   under the configured service type
//! - `stop_discovery()` ends both
//! - `send_bytes()` delivers one frame to one peer
//! - `disconnect_peer()` drops one link, `disconnect()` drops every link
//!
//! Inbound traffic does not come back through the trait. Transport
//! callbacks fire on whatever thread the platform uses, so they are pushed
//! into [`TransportEvents`], which feeds the service task.
//!
//! # Example
//!
//! ```ignore
//! let (events, rx) = TransportEvents::channel();
//! events.peer_state_changed(peer.clone(), PeerLinkState::Connected { initiator: true });
//! events.bytes_received(peer, frame_bytes);
//! ```

mod mock;

pub use mock::MockTransport;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;
use wist_sync_types::PeerId;

use crate::config::SessionConfig;

/// Largest frame a transport is expected to carry.
pub const MAX_FRAME_SIZE: usize = 64 * 1024;

/// Transport errors.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Advertising or browsing could not start.
    #[error("discovery failed: {0}")]
    DiscoveryFailed(String),

    /// No link to the peer.
    #[error("not connected to {0}")]
    NotConnected(PeerId),

    /// Send failed.
    #[error("send failed: {0}")]
    SendFailed(String),

    /// Frame exceeds [`MAX_FRAME_SIZE`].
    #[error("frame of {size} bytes exceeds {max}")]
    FrameTooLarge {
        /// Size of the rejected frame.
        size: usize,
        /// Maximum accepted size.
        max: usize,
    },
}

/// How a device presents itself during discovery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveryInfo {
    /// Service type peers browse for; only matching devices meet.
    pub service_type: String,
    /// Name shown to other devices.
    pub display_name: String,
}

impl From<&SessionConfig> for DiscoveryInfo {
    fn from(session: &SessionConfig) -> Self {
        Self {
            service_type: session.service_type.clone(),
            display_name: session.display_name.clone(),
        }
    }
}

/// Peer-to-peer session capability used by the sync service.
///
/// Implementations deliver bytes unmodified and report link changes and
/// inbound bytes through [`TransportEvents`].
#[async_trait]
pub trait Transport: Send + Sync {
    /// Make this device discoverable.
    async fn advertise(&self, info: &DiscoveryInfo) -> Result<(), TransportError>;

    /// Look for and invite other devices advertising `service_type`.
    async fn browse(&self, service_type: &str) -> Result<(), TransportError>;

    /// Stop advertising and browsing. Existing links stay up.
    async fn stop_discovery(&self) -> Result<(), TransportError>;

    /// Send one frame to one peer.
    async fn send_bytes(&self, peer: &PeerId, bytes: &[u8]) -> Result<(), TransportError>;

    /// Drop the link to one peer. Both ends see `NotConnected`.
    async fn disconnect_peer(&self, peer: &PeerId) -> Result<(), TransportError>;

    /// Drop every link.
    async fn disconnect(&self) -> Result<(), TransportError>;
}

/// Link state reported by the transport for one peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerLinkState {
    /// An invitation is in flight.
    Connecting,
    /// The link is up.
    Connected {
        /// Whether this device sent the accepted invitation.
        initiator: bool,
    },
    /// The link is gone.
    NotConnected,
}

/// Something the transport observed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// A frame arrived from a peer.
    BytesReceived {
        /// Sender as identified by the transport.
        peer: PeerId,
        /// Raw frame bytes.
        bytes: Vec<u8>,
    },
    /// A peer's link state changed.
    PeerStateChanged {
        /// The remote endpoint.
        peer: PeerId,
        /// New link state.
        state: PeerLinkState,
    },
}

/// Thread-safe sink for transport callbacks.
///
/// Cheap to clone; every clone feeds the same service task. The push
/// methods never block and return `false` once the service has stopped.
#[derive(Debug, Clone)]
pub struct TransportEvents {
    tx: mpsc::UnboundedSender<TransportEvent>,
}

impl TransportEvents {
    /// Create a sink and the receiver the service reads from.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<TransportEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    /// Push an event.
    pub fn push(&self, event: TransportEvent) -> bool {
        self.tx.send(event).is_ok()
    }

    /// Report received bytes.
    pub fn bytes_received(&self, peer: PeerId, bytes: Vec<u8>) -> bool {
        self.push(TransportEvent::BytesReceived { peer, bytes })
    }

    /// Report a link state change.
    pub fn peer_state_changed(&self, peer: PeerId, state: PeerLinkState) -> bool {
        self.push(TransportEvent::PeerStateChanged { peer, state })
    }
}
