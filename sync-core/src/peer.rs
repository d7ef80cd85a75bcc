//! Peer records for a sync session.
//!
//! One [`Peer`] per currently connected remote endpoint. A record owns the
//! clock correlator for that peer, so removing the record is what discards
//! its clock history.

use std::collections::BTreeMap;
use wist_sync_types::{Hello, LatencyReport, PeerId, RoleClaim};

use crate::clock::{ClockCorrelator, CorrelatorSettings};
use crate::role::Role;

/// Link state of one peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerLink {
    /// Invitation sent or accepted, link not up yet.
    Connecting,
    /// Link up, waiting for the peer's Hello.
    Handshaking {
        /// Whether this device initiated the link.
        initiator: bool,
    },
    /// Hello exchanged, role settled.
    Connected,
}

/// A remote endpoint.
#[derive(Debug, Clone)]
pub struct Peer {
    /// Stable identity.
    pub id: PeerId,
    /// The peer's role as seen from this device.
    pub role: Role,
    /// Link state.
    pub link: PeerLink,
    /// Claim carried in the Hello we sent to this peer.
    pub sent_claim: RoleClaim,
    /// Hello that arrived before the link was reported up.
    pub pending_hello: Option<Hello>,
    /// Clock correlation towards this peer.
    pub correlator: ClockCorrelator,
    /// Peer's audio output latency (ns).
    pub output_latency: u64,
    /// Peer's user extra delay (ns).
    pub extra_delay: u64,
    /// Last beacon round trip measured for this peer (ns).
    pub last_round_trip: Option<u64>,
    /// Worst one-way delay observed on this link (ns).
    pub worst_one_way: u64,
}

impl Peer {
    fn new(id: PeerId, link: PeerLink, settings: &CorrelatorSettings) -> Self {
        Self {
            id,
            role: Role::Undetermined,
            link,
            sent_claim: RoleClaim::Undecided,
            pending_hello: None,
            correlator: ClockCorrelator::new(settings.clone()),
            output_latency: 0,
            extra_delay: 0,
            last_round_trip: None,
            worst_one_way: 0,
        }
    }

    /// Whether the Hello exchange has completed.
    pub fn is_connected(&self) -> bool {
        matches!(self.link, PeerLink::Connected)
    }

    /// Whether this device initiated the link, if it is up.
    pub fn initiator(&self) -> Option<bool> {
        match self.link {
            PeerLink::Handshaking { initiator } => Some(initiator),
            _ => None,
        }
    }

    /// Record a measured round trip and update the worst one-way delay.
    pub fn observe_round_trip(&mut self, round_trip: u64) {
        self.last_round_trip = Some(round_trip);
        self.worst_one_way = self.worst_one_way.max(round_trip / 2);
    }

    /// Apply latency figures from a Hello or Latency frame.
    pub fn apply_latency(&mut self, report: LatencyReport) {
        self.output_latency = report.output_latency;
        self.extra_delay = report.extra_delay;
    }

    /// Apply the latency figures carried in a Hello.
    pub fn apply_hello(&mut self, hello: &Hello) {
        self.apply_latency(LatencyReport {
            output_latency: hello.output_latency,
            extra_delay: hello.extra_delay,
        });
    }
}

/// All peers of one session, ordered by identity.
#[derive(Debug, Clone, Default)]
pub struct PeerTable {
    settings: CorrelatorSettings,
    peers: BTreeMap<PeerId, Peer>,
}

impl PeerTable {
    /// Create an empty table whose correlators use `settings`.
    pub fn new(settings: CorrelatorSettings) -> Self {
        Self {
            settings,
            peers: BTreeMap::new(),
        }
    }

    /// Register a peer whose link is forming. Existing records are kept.
    pub fn connecting(&mut self, id: &PeerId) -> &mut Peer {
        let settings = &self.settings;
        self.peers
            .entry(id.clone())
            .or_insert_with(|| Peer::new(id.clone(), PeerLink::Connecting, settings))
    }

    /// Mark a peer's link as up; the Hello exchange starts.
    pub fn link_up(&mut self, id: &PeerId, initiator: bool) -> &mut Peer {
        let peer = self.connecting(id);
        if !peer.is_connected() {
            peer.link = PeerLink::Handshaking { initiator };
        }
        peer
    }

    /// Look up a peer.
    pub fn get(&self, id: &PeerId) -> Option<&Peer> {
        self.peers.get(id)
    }

    /// Look up a peer mutably.
    pub fn get_mut(&mut self, id: &PeerId) -> Option<&mut Peer> {
        self.peers.get_mut(id)
    }

    /// Remove a peer and, with it, its clock history.
    pub fn remove(&mut self, id: &PeerId) -> Option<Peer> {
        self.peers.remove(id)
    }

    /// Remove every peer.
    pub fn clear(&mut self) {
        self.peers.clear();
    }

    /// Number of peers in any link state.
    pub fn len(&self) -> usize {
        self.peers.len()
    }

    /// Whether the table is empty.
    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }

    /// Identities of peers that completed the handshake.
    pub fn connected_ids(&self) -> Vec<PeerId> {
        self.peers
            .values()
            .filter(|p| p.is_connected())
            .map(|p| p.id.clone())
            .collect()
    }

    /// Identity of the peer recognized as master, if any.
    pub fn master(&self) -> Option<&PeerId> {
        self.peers
            .values()
            .find(|p| p.is_connected() && p.role == Role::Master)
            .map(|p| &p.id)
    }

    /// Highest output latency among connected peers.
    pub fn max_output_latency(&self) -> u64 {
        self.connected().map(|p| p.output_latency).max().unwrap_or(0)
    }

    /// Highest extra delay among connected peers.
    pub fn max_extra_delay(&self) -> u64 {
        self.connected().map(|p| p.extra_delay).max().unwrap_or(0)
    }

    /// Worst one-way delay among connected peers.
    pub fn worst_one_way(&self) -> u64 {
        self.connected().map(|p| p.worst_one_way).max().unwrap_or(0)
    }

    /// Iterate over all peers.
    pub fn iter(&self) -> impl Iterator<Item = &Peer> {
        self.peers.values()
    }

    /// Iterate mutably over all peers.
    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Peer> {
        self.peers.values_mut()
    }

    fn connected(&self) -> impl Iterator<Item = &Peer> {
        self.peers.values().filter(|p| p.is_connected())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table() -> PeerTable {
        PeerTable::new(CorrelatorSettings::default())
    }

    #[test]
    fn link_up_moves_to_handshaking() {
        let mut peers = table();
        let id = PeerId::from_name("B");

        peers.connecting(&id);
        assert_eq!(peers.get(&id).unwrap().link, PeerLink::Connecting);

        peers.link_up(&id, true);
        assert_eq!(peers.get(&id).unwrap().initiator(), Some(true));
        assert!(peers.connected_ids().is_empty());
    }

    #[test]
    fn master_requires_connected_link() {
        let mut peers = table();
        let id = PeerId::from_name("M");
        let peer = peers.link_up(&id, false);
        peer.role = Role::Master;
        assert!(peers.master().is_none());

        peers.get_mut(&id).unwrap().link = PeerLink::Connected;
        assert_eq!(peers.master(), Some(&id));
    }

    #[test]
    fn removing_peer_discards_clock_history() {
        let mut peers = table();
        let id = PeerId::from_name("B");
        let peer = peers.link_up(&id, false);
        peer.correlator.record_sample(1, 2);
        peer.correlator.record_sample(3, 4);

        let removed = peers.remove(&id).unwrap();
        assert_eq!(removed.correlator.len(), 2);

        let fresh = peers.link_up(&id, false);
        assert!(fresh.correlator.is_empty());
    }

    #[test]
    fn aggregates_only_count_connected_peers() {
        let mut peers = table();
        let a = PeerId::from_name("A");
        let b = PeerId::from_name("B");

        let peer_a = peers.link_up(&a, false);
        peer_a.link = PeerLink::Connected;
        peer_a.output_latency = 5;
        peer_a.observe_round_trip(40);

        let peer_b = peers.link_up(&b, false);
        peer_b.output_latency = 500;
        peer_b.observe_round_trip(4_000);

        assert_eq!(peers.max_output_latency(), 5);
        assert_eq!(peers.worst_one_way(), 20);
    }

    #[test]
    fn early_hello_survives_link_up() {
        let mut peers = table();
        let id = PeerId::from_name("A");
        peers.connecting(&id).pending_hello = Some(Hello {
            claim: RoleClaim::Master,
            output_latency: 0,
            extra_delay: 0,
        });

        let peer = peers.link_up(&id, false);
        assert!(peer.pending_hello.is_some());
    }

    #[test]
    fn worst_one_way_keeps_maximum() {
        let mut peers = table();
        let peer = peers.link_up(&PeerId::from_name("A"), false);
        peer.observe_round_trip(100);
        peer.observe_round_trip(30);
        assert_eq!(peer.worst_one_way, 50);
        assert_eq!(peer.last_round_trip, Some(30));
    }
}
