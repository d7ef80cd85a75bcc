//! Mock transport for testing.
//!
//! Captures sent frames for verification and can route them, in process,
//! to another mock's [`TransportEvents`] to simulate a live link.

use super::{
    DiscoveryInfo, PeerLinkState, Transport, TransportError, TransportEvents, MAX_FRAME_SIZE,
};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use wist_sync_types::PeerId;

/// Mock transport for testing.
///
/// Records every send and discovery call. Once two mocks are joined with
/// [`MockTransport::link`], sends are delivered to the other side's event
/// sink.
#[derive(Debug)]
pub struct MockTransport {
    inner: Arc<Mutex<MockTransportInner>>,
}

#[derive(Debug)]
struct MockTransportInner {
    local_id: PeerId,
    events: Option<TransportEvents>,
    links: BTreeMap<PeerId, TransportEvents>,
    advertised: Option<DiscoveryInfo>,
    browsing: Option<String>,
    disconnects: usize,
    sent_messages: Vec<(PeerId, Vec<u8>)>,
    fail_next_advertise: Option<String>,
    fail_next_send: Option<String>,
}

impl MockTransport {
    /// Create a mock for the device `local_id`.
    pub fn new(local_id: PeerId) -> Self {
        Self {
            inner: Arc::new(Mutex::new(MockTransportInner {
                local_id,
                events: None,
                links: BTreeMap::new(),
                advertised: None,
                browsing: None,
                disconnects: 0,
                sent_messages: Vec::new(),
                fail_next_advertise: None,
                fail_next_send: None,
            })),
        }
    }

    /// Identity this mock stamps on routed events.
    pub fn local_id(&self) -> PeerId {
        self.inner.lock().unwrap().local_id.clone()
    }

    /// Deliver this device's own link events to `events`.
    pub fn attach(&self, events: TransportEvents) {
        self.inner.lock().unwrap().events = Some(events);
    }

    /// Bring up a link: `initiator`'s invitation was accepted by `acceptor`.
    ///
    /// Both mocks must be attached. Each side sees `Connecting` then
    /// `Connected`.
    pub fn link(initiator: &MockTransport, acceptor: &MockTransport) {
        let (init_id, init_events) = initiator.endpoint();
        let (acc_id, acc_events) = acceptor.endpoint();

        if let (Some(init_events), Some(acc_events)) = (init_events, acc_events) {
            initiator
                .inner
                .lock()
                .unwrap()
                .links
                .insert(acc_id.clone(), acc_events.clone());
            acceptor
                .inner
                .lock()
                .unwrap()
                .links
                .insert(init_id.clone(), init_events.clone());

            init_events.peer_state_changed(acc_id.clone(), PeerLinkState::Connecting);
            acc_events.peer_state_changed(init_id.clone(), PeerLinkState::Connecting);
            init_events.peer_state_changed(acc_id, PeerLinkState::Connected { initiator: true });
            acc_events.peer_state_changed(init_id, PeerLinkState::Connected { initiator: false });
        }
    }

    /// Drop the link between two mocks as if the radio went away.
    pub fn sever(a: &MockTransport, b: &MockTransport) {
        let (a_id, a_events) = a.endpoint();
        let (b_id, b_events) = b.endpoint();
        a.inner.lock().unwrap().links.remove(&b_id);
        b.inner.lock().unwrap().links.remove(&a_id);

        if let Some(events) = a_events {
            events.peer_state_changed(b_id, PeerLinkState::NotConnected);
        }
        if let Some(events) = b_events {
            events.peer_state_changed(a_id, PeerLinkState::NotConnected);
        }
    }

    /// All frames sent, with their destination.
    pub fn sent_messages(&self) -> Vec<(PeerId, Vec<u8>)> {
        self.inner.lock().unwrap().sent_messages.clone()
    }

    /// Frames sent to one peer.
    pub fn sent_to(&self, peer: &PeerId) -> Vec<Vec<u8>> {
        self.inner
            .lock()
            .unwrap()
            .sent_messages
            .iter()
            .filter(|(to, _)| to == peer)
            .map(|(_, bytes)| bytes.clone())
            .collect()
    }

    /// Whether advertising is on.
    pub fn is_advertising(&self) -> bool {
        self.inner.lock().unwrap().advertised.is_some()
    }

    /// What this device currently advertises.
    pub fn advertised(&self) -> Option<DiscoveryInfo> {
        self.inner.lock().unwrap().advertised.clone()
    }

    /// Whether browsing is on.
    pub fn is_browsing(&self) -> bool {
        self.inner.lock().unwrap().browsing.is_some()
    }

    /// Service type being browsed for.
    pub fn browsing_for(&self) -> Option<String> {
        self.inner.lock().unwrap().browsing.clone()
    }

    /// Peers with a live link.
    pub fn linked_peers(&self) -> Vec<PeerId> {
        self.inner.lock().unwrap().links.keys().cloned().collect()
    }

    /// Number of `disconnect()` calls.
    pub fn disconnect_count(&self) -> usize {
        self.inner.lock().unwrap().disconnects
    }

    /// Cause the next advertise() to fail with the given error.
    pub fn fail_next_advertise(&self, error: &str) {
        self.inner.lock().unwrap().fail_next_advertise = Some(error.to_string());
    }

    /// Cause the next send_bytes() to fail with the given error.
    pub fn fail_next_send(&self, error: &str) {
        self.inner.lock().unwrap().fail_next_send = Some(error.to_string());
    }

    fn endpoint(&self) -> (PeerId, Option<TransportEvents>) {
        let inner = self.inner.lock().unwrap();
        (inner.local_id.clone(), inner.events.clone())
    }
}

impl Clone for MockTransport {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn advertise(&self, info: &DiscoveryInfo) -> Result<(), TransportError> {
        let mut inner = self.inner.lock().unwrap();

        // Check for forced failure
        if let Some(error) = inner.fail_next_advertise.take() {
            return Err(TransportError::DiscoveryFailed(error));
        }

        inner.advertised = Some(info.clone());
        Ok(())
    }

    async fn browse(&self, service_type: &str) -> Result<(), TransportError> {
        self.inner.lock().unwrap().browsing = Some(service_type.to_string());
        Ok(())
    }

    async fn stop_discovery(&self) -> Result<(), TransportError> {
        let mut inner = self.inner.lock().unwrap();
        inner.advertised = None;
        inner.browsing = None;
        Ok(())
    }

    async fn send_bytes(&self, peer: &PeerId, bytes: &[u8]) -> Result<(), TransportError> {
        let mut inner = self.inner.lock().unwrap();

        if bytes.len() > MAX_FRAME_SIZE {
            return Err(TransportError::FrameTooLarge {
                size: bytes.len(),
                max: MAX_FRAME_SIZE,
            });
        }

        // Check for forced failure
        if let Some(error) = inner.fail_next_send.take() {
            return Err(TransportError::SendFailed(error));
        }

        inner.sent_messages.push((peer.clone(), bytes.to_vec()));

        // Unlinked peers still get recorded so unit tests can inspect
        // frames without a partner.
        if let Some(remote) = inner.links.get(peer) {
            remote.bytes_received(inner.local_id.clone(), bytes.to_vec());
        } else if !inner.links.is_empty() {
            return Err(TransportError::NotConnected(peer.clone()));
        }
        Ok(())
    }

    async fn disconnect_peer(&self, peer: &PeerId) -> Result<(), TransportError> {
        let mut inner = self.inner.lock().unwrap();
        let Some(remote) = inner.links.remove(peer) else {
            return Err(TransportError::NotConnected(peer.clone()));
        };

        remote.peer_state_changed(inner.local_id.clone(), PeerLinkState::NotConnected);
        if let Some(events) = &inner.events {
            events.peer_state_changed(peer.clone(), PeerLinkState::NotConnected);
        }
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), TransportError> {
        let mut inner = self.inner.lock().unwrap();
        inner.disconnects += 1;

        let links = std::mem::take(&mut inner.links);
        for (peer, remote) in links {
            remote.peer_state_changed(inner.local_id.clone(), PeerLinkState::NotConnected);
            if let Some(events) = &inner.events {
                events.peer_state_changed(peer, PeerLinkState::NotConnected);
            }
        }
        Ok(())
    }
}
