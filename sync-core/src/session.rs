//! Session lifecycle state machine for WIST sync.
//!
//! This module provides a pure, side-effect-free state machine for the
//! session lifecycle. The state machine takes events as input and produces
//! a new state plus a list of actions to execute.
//!
//! ```text
//! Idle -> Advertising -> Connecting -> Connected -> Lost
//!   ^                                          \-> Cancelled
//!   \---------------- reset -------------------------/
//! ```
//!
//! The actual I/O (discovery, sending Hello frames) is performed by
//! sync-client, not by this module. Peer bookkeeping is also left to the
//! caller, which tells the machine whether a departed peer was critical.

use wist_sync_types::PeerId;

/// Session state - NO I/O, just state transitions.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum SessionState {
    /// Sync disabled, no peer activity.
    #[default]
    Idle,
    /// Discoverable and discovering.
    Advertising,
    /// A link is forming or the role handshake is in progress.
    Connecting,
    /// At least one peer completed the handshake.
    Connected,
    /// The connection dropped unexpectedly.
    Lost,
    /// Sync was disabled locally.
    Cancelled,
}

impl SessionState {
    /// Create a new state machine in the Idle state.
    pub fn new() -> Self {
        Self::Idle
    }

    /// Process an event and return the new state plus actions to execute.
    ///
    /// This is a pure function - no side effects. The caller (sync-client)
    /// is responsible for executing the returned actions.
    pub fn on_event(self, event: Event) -> (Self, Vec<Action>) {
        match (self, event) {
            // From Idle
            (Self::Idle, Event::EnableRequested) => {
                (Self::Advertising, vec![Action::StartDiscovery])
            }

            // Link formation
            (Self::Advertising, Event::LinkConnecting { .. }) => (Self::Connecting, vec![]),
            (Self::Advertising | Self::Connecting, Event::LinkUp { peer }) => {
                (Self::Connecting, vec![Action::SendHello { peer }])
            }
            (Self::Connected, Event::LinkUp { peer }) => {
                (Self::Connected, vec![Action::SendHello { peer }])
            }

            // Handshake
            (Self::Connecting, Event::HandshakeCompleted { .. }) => (
                Self::Connected,
                vec![Action::Emit(ConnectionNotice::Established)],
            ),

            // Peer departures
            (Self::Connecting, Event::LinkDown { peer, critical }) => {
                let next = if critical {
                    Self::Advertising
                } else {
                    Self::Connecting
                };
                (next, vec![Action::ForgetPeer { peer }])
            }
            (Self::Connected, Event::LinkDown { peer, critical: true }) => (
                Self::Lost,
                vec![
                    Action::ForgetPeer { peer },
                    Action::StopDiscovery,
                    Action::ClearSession,
                    Action::Emit(ConnectionNotice::Lost),
                ],
            ),
            (state, Event::LinkDown { peer, .. }) => (state, vec![Action::ForgetPeer { peer }]),

            // Local disable
            (
                Self::Advertising | Self::Connecting | Self::Connected | Self::Lost,
                Event::DisableRequested,
            ) => (
                Self::Cancelled,
                vec![
                    Action::StopDiscovery,
                    Action::ClearSession,
                    Action::Emit(ConnectionNotice::Cancelled),
                ],
            ),

            // Reset
            (Self::Lost | Self::Cancelled, Event::ResetRequested) => {
                (Self::Idle, vec![Action::ClearSession])
            }
            (Self::Advertising | Self::Connecting | Self::Connected, Event::ResetRequested) => (
                Self::Idle,
                vec![
                    Action::StopDiscovery,
                    Action::ClearSession,
                    Action::Emit(ConnectionNotice::Cancelled),
                ],
            ),

            // Invalid transitions - stay in current state
            (state, _) => (state, vec![]),
        }
    }

    /// Whether frames from peers should be processed.
    pub fn accepts_frames(&self) -> bool {
        matches!(self, Self::Connecting | Self::Connected)
    }

    /// Whether sync is enabled (discovery or a session in progress).
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Advertising | Self::Connecting | Self::Connected)
    }

    /// Check if currently connected.
    pub fn is_connected(&self) -> bool {
        matches!(self, Self::Connected)
    }

    /// Whether the session ended and needs a reset before re-enabling.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Lost | Self::Cancelled)
    }
}

/// Events that can occur in the session lifecycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// User or host enabled sync.
    EnableRequested,
    /// User or host disabled sync.
    DisableRequested,
    /// Explicit return to Idle.
    ResetRequested,
    /// Transport reports a link forming.
    LinkConnecting {
        /// The remote endpoint.
        peer: PeerId,
    },
    /// Transport reports a link up.
    LinkUp {
        /// The remote endpoint.
        peer: PeerId,
    },
    /// Hello received and role settled for a peer.
    HandshakeCompleted {
        /// The remote endpoint.
        peer: PeerId,
    },
    /// Transport reports a link gone.
    LinkDown {
        /// The remote endpoint.
        peer: PeerId,
        /// Whether the session cannot continue without this peer: it was
        /// our master, or the last peer.
        critical: bool,
    },
}

/// Actions to be executed by the sync-client.
///
/// These are instructions, not side effects. The sync-client interprets
/// these and performs the actual I/O.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    /// Start advertising and browsing.
    StartDiscovery,
    /// Stop advertising and browsing.
    StopDiscovery,
    /// Send our Hello to a peer.
    SendHello {
        /// The remote endpoint.
        peer: PeerId,
    },
    /// Drop a peer's record, clock samples and sequence tracking.
    ForgetPeer {
        /// The remote endpoint.
        peer: PeerId,
    },
    /// Drop every peer, all clock samples and the local role.
    ClearSession,
    /// Notify the application.
    Emit(ConnectionNotice),
}

/// Connection notifications emitted to the application layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionNotice {
    /// First peer completed the handshake.
    Established,
    /// The session dropped unexpectedly.
    Lost,
    /// Sync was disabled locally.
    Cancelled,
}
