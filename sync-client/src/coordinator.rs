//! SyncCoordinator - the facade over session, roles, clocks and channel.
//!
//! The coordinator owns all protocol state for one device. It is a plain
//! synchronous struct: every operation returns the [`Effect`]s the caller
//! must carry out (discovery calls, frames to send, observer callbacks).
//! The service task in [`crate::service`] is the production caller; tests
//! drive it directly.
//!
//! # Time
//!
//! The master's host clock is the shared time base. A slave samples it with
//! beacons and converts shared times to its own host clock. A command's
//! shared time is the audible instant, so every device subtracts its own
//! output latency before handing it to the observer.
//!
//! ```text
//! request_start ─► CommandChannel ─► Effect::Send ─► peers
//!       │
//!       └─► Effect::Notify(StartReceived)    (self-delivery)
//! ```

use std::sync::Arc;
use wist_sync_core::{
    negotiate, Action, ClockError, CommandChannel, ConnectionNotice, Delivery, Event,
    OffsetEstimate, PeerLink, PeerTable, Role, SessionState,
};
use wist_sync_types::{
    Beacon, BeaconReply, Hello, LatencyReport, Payload, PeerId, SharedTime, SyncCommand,
};

use crate::clock::HostClock;
use crate::config::SyncConfig;
use crate::observer::Notification;
use crate::transport::{PeerLinkState, TransportEvent};
use crate::ClientError;

/// Work the caller must perform on behalf of the coordinator.
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    /// Start advertising and browsing.
    StartDiscovery,
    /// Stop advertising and browsing.
    StopDiscovery,
    /// Drop the link to one peer.
    DisconnectPeer {
        /// Peer to drop.
        peer: PeerId,
    },
    /// Drop every transport link.
    Disconnect,
    /// Send a frame to one peer.
    Send {
        /// Destination.
        peer: PeerId,
        /// Encoded frame.
        bytes: Vec<u8>,
    },
    /// Invoke an observer callback.
    Notify(Notification),
}

/// Protocol state for one device.
pub struct SyncCoordinator {
    config: SyncConfig,
    clock: Arc<dyn HostClock>,
    local_id: PeerId,
    state: SessionState,
    role: Role,
    peers: PeerTable,
    channel: CommandChannel,
    output_latency: u64,
    extra_delay: u64,
}

impl SyncCoordinator {
    /// Create an idle coordinator.
    pub fn new(config: SyncConfig, local_id: PeerId, clock: Arc<dyn HostClock>) -> Self {
        Self {
            peers: PeerTable::new(config.clock.clone()),
            channel: CommandChannel::new(local_id.clone()),
            output_latency: config.schedule.output_latency_ns,
            extra_delay: config.schedule.extra_delay_ns,
            state: SessionState::new(),
            role: Role::Undetermined,
            config,
            clock,
            local_id,
        }
    }

    // ===========================================
    // Session lifecycle
    // ===========================================

    /// Enable sync. A session that ended (Lost/Cancelled) is reset first.
    pub fn enable_sync(&mut self) -> Vec<Effect> {
        let mut effects = Vec::new();
        if self.state.is_terminal() {
            effects.extend(self.apply(Event::ResetRequested));
        }
        effects.extend(self.apply(Event::EnableRequested));
        effects
    }

    /// Disable sync. Reports `ConnectionCancelled` if sync was enabled.
    pub fn disable_sync(&mut self) -> Vec<Effect> {
        self.apply(Event::DisableRequested)
    }

    /// Return to Idle from any state.
    pub fn reset(&mut self) -> Vec<Effect> {
        self.apply(Event::ResetRequested)
    }

    // ===========================================
    // Commands
    // ===========================================

    /// Schedule a start at `tempo` BPM. Only a connected master may start.
    pub fn request_start(&mut self, tempo: f32) -> Result<Vec<Effect>, ClientError> {
        let command = SyncCommand::start(self.schedule_time(), tempo)?;
        self.broadcast(command)
    }

    /// Schedule a stop. Only a connected master may stop.
    pub fn request_stop(&mut self) -> Result<Vec<Effect>, ClientError> {
        let command = SyncCommand::stop(self.schedule_time());
        self.broadcast(command)
    }

    /// Lead between a request and its scheduled instant (ns).
    ///
    /// Covers the worst one-way delay seen plus the largest extra delay and
    /// output latency in the session, and never drops below the configured
    /// minimum.
    pub fn lead_time(&self) -> u64 {
        let extra = self.peers.max_extra_delay().max(self.extra_delay);
        let latency = self.peers.max_output_latency().max(self.output_latency);
        self.peers
            .worst_one_way()
            .saturating_add(extra)
            .saturating_add(latency)
            .max(self.config.schedule.min_lead_ns)
    }

    // ===========================================
    // Latency
    // ===========================================

    /// Update the local audio output latency and tell connected peers.
    pub fn set_output_latency(&mut self, nanos: u64) -> Vec<Effect> {
        if self.output_latency == nanos {
            return Vec::new();
        }
        self.output_latency = nanos;
        self.broadcast_latency()
    }

    /// Update the user extra delay and tell connected peers.
    pub fn set_extra_delay(&mut self, nanos: u64) -> Vec<Effect> {
        if self.extra_delay == nanos {
            return Vec::new();
        }
        self.extra_delay = nanos;
        self.broadcast_latency()
    }

    // ===========================================
    // Inbound
    // ===========================================

    /// Process one transport event.
    pub fn handle_transport_event(&mut self, event: TransportEvent) -> Vec<Effect> {
        match event {
            TransportEvent::PeerStateChanged { peer, state } => self.on_peer_state(peer, state),
            TransportEvent::BytesReceived { peer, bytes } => self.on_bytes(peer, &bytes),
        }
    }

    /// Periodic clock sampling: a connected slave beacons its master.
    pub fn on_beacon_tick(&mut self) -> Vec<Effect> {
        if self.role != Role::Slave || !self.state.is_connected() {
            return Vec::new();
        }
        match self.peers.master().cloned() {
            Some(master) => self.beacon_to(&master),
            None => Vec::new(),
        }
    }

    // ===========================================
    // Accessors
    // ===========================================

    /// Current session state.
    pub fn state(&self) -> &SessionState {
        &self.state
    }

    /// Local role.
    pub fn role(&self) -> Role {
        self.role
    }

    /// Local identity.
    pub fn local_id(&self) -> &PeerId {
        &self.local_id
    }

    /// Known peers.
    pub fn peers(&self) -> &PeerTable {
        &self.peers
    }

    /// The peer recognized as master, if any.
    pub fn master(&self) -> Option<&PeerId> {
        self.peers.master()
    }

    /// Clock offset towards the master.
    pub fn clock_estimate(&self) -> Result<OffsetEstimate, ClockError> {
        self.peers
            .master()
            .and_then(|id| self.peers.get(id))
            .map(|master| master.correlator.estimate_offset())
            .unwrap_or(Err(ClockError::Unavailable { samples: 0 }))
    }

    /// Local audio output latency (ns).
    pub fn output_latency(&self) -> u64 {
        self.output_latency
    }

    /// Local extra delay (ns).
    pub fn extra_delay(&self) -> u64 {
        self.extra_delay
    }

    /// Configuration in use.
    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    // ===========================================
    // Internals
    // ===========================================

    fn apply(&mut self, event: Event) -> Vec<Effect> {
        let previous = self.state.clone();
        let (next, actions) = std::mem::take(&mut self.state).on_event(event);
        self.state = next;

        if self.state != previous {
            tracing::info!("Session {:?} -> {:?}", previous, self.state);
        }

        let mut effects = Vec::new();
        for action in actions {
            self.execute(action, &mut effects);
        }
        effects
    }

    fn execute(&mut self, action: Action, effects: &mut Vec<Effect>) {
        match action {
            Action::StartDiscovery => effects.push(Effect::StartDiscovery),
            Action::StopDiscovery => effects.push(Effect::StopDiscovery),
            Action::SendHello { peer } => self.send_hello(&peer, effects),
            Action::ForgetPeer { peer } => {
                self.peers.remove(&peer);
                self.channel.forget_sender(&peer);
            }
            Action::ClearSession => {
                self.peers.clear();
                self.channel.clear();
                self.role = Role::Undetermined;
            }
            Action::Emit(notice) => {
                if notice == ConnectionNotice::Cancelled {
                    effects.push(Effect::Disconnect);
                }
                effects.push(Effect::Notify(notice.into()));
            }
        }
    }

    fn on_peer_state(&mut self, peer: PeerId, state: PeerLinkState) -> Vec<Effect> {
        match state {
            PeerLinkState::Connecting => {
                if self.state.is_active() {
                    self.peers.connecting(&peer);
                }
                self.apply(Event::LinkConnecting { peer })
            }
            PeerLinkState::Connected { initiator } => {
                if !self.state.is_active() {
                    tracing::debug!("Ignoring link to {} in state {:?}", peer, self.state);
                    return Vec::new();
                }
                self.peers.link_up(&peer, initiator);
                let mut effects = self.apply(Event::LinkUp { peer: peer.clone() });

                let early = self
                    .peers
                    .get_mut(&peer)
                    .and_then(|p| p.pending_hello.take());
                if let Some(hello) = early {
                    tracing::debug!("Replaying Hello from {} received before link up", peer);
                    effects.extend(self.on_hello(peer, hello));
                }
                effects
            }
            PeerLinkState::NotConnected => {
                let critical = self.is_critical(&peer);
                tracing::debug!("Link to {} down (critical: {})", peer, critical);
                self.apply(Event::LinkDown { peer, critical })
            }
        }
    }

    /// Whether losing `peer` ends the session: it was our master, or no
    /// other peer remains.
    fn is_critical(&self, peer: &PeerId) -> bool {
        let Some(departed) = self.peers.get(peer) else {
            return false;
        };
        let was_master = departed.is_connected() && departed.role == Role::Master;
        let mut others = self.peers.iter().filter(|p| &p.id != peer);

        if self.state.is_connected() {
            was_master || !others.any(|p| p.is_connected())
        } else {
            others.next().is_none()
        }
    }

    fn on_bytes(&mut self, from: PeerId, bytes: &[u8]) -> Vec<Effect> {
        if !self.state.is_active() {
            tracing::debug!(
                "Ignoring {} bytes from {} in state {:?}",
                bytes.len(),
                from,
                self.state
            );
            return Vec::new();
        }

        let inbound = match self.channel.receive(&from, bytes) {
            Ok(Delivery::Fresh(inbound)) => inbound,
            Ok(Delivery::Dropped {
                sender,
                sequence,
                verdict,
            }) => {
                tracing::debug!("Dropped frame {} from {} ({:?})", sequence, sender, verdict);
                return Vec::new();
            }
            Ok(Delivery::Regressed { sender, command }) => {
                tracing::debug!("Dropped {:?} from {}: earlier than last command", command, sender);
                return Vec::new();
            }
            Err(e) => {
                tracing::warn!("Discarding frame from {}: {}", from, e);
                return Vec::new();
            }
        };

        match inbound.payload {
            Payload::Hello(hello) => self.on_hello(from, hello),
            payload if !self.state.accepts_frames() => {
                tracing::debug!("{:?} from {} before any link", payload.kind(), from);
                Vec::new()
            }
            Payload::Beacon(beacon) => self.on_beacon(from, beacon),
            Payload::BeaconReply(reply) => self.on_beacon_reply(from, reply),
            Payload::Latency(report) => {
                if let Some(peer) = self.peers.get_mut(&from) {
                    peer.apply_latency(report);
                }
                Vec::new()
            }
            Payload::Command(command) => self.on_command(from, command),
        }
    }

    fn on_hello(&mut self, from: PeerId, hello: Hello) -> Vec<Effect> {
        if from == self.local_id {
            tracing::warn!("Peer {} shares this device's identity; dropping the link", from);
            return vec![Effect::DisconnectPeer { peer: from }];
        }

        let mut effects = Vec::new();
        if self.peers.get(&from).is_none() {
            // Bytes ahead of any link event: the link is forming.
            self.peers.connecting(&from);
            effects.extend(self.apply(Event::LinkConnecting { peer: from.clone() }));
        }
        let Some(peer) = self.peers.get_mut(&from) else {
            return effects;
        };

        if peer.is_connected() {
            peer.apply_hello(&hello);
            return effects;
        }
        if peer.link == PeerLink::Connecting {
            tracing::debug!("Holding Hello from {} until the link is up", from);
            peer.pending_hello = Some(hello);
            return effects;
        }

        let negotiated = negotiate(&self.local_id, peer.sent_claim, &from, hello.claim);
        let Some(remote_role) = self.settle_roles(&from, negotiated, &mut effects) else {
            return effects;
        };

        if let Some(peer) = self.peers.get_mut(&from) {
            peer.role = remote_role;
            peer.link = PeerLink::Connected;
            peer.apply_hello(&hello);
        }
        tracing::info!(
            "Handshake with {} complete (local {:?}, remote {:?})",
            from,
            self.role,
            remote_role
        );

        effects.extend(self.apply(Event::HandshakeCompleted { peer: from.clone() }));
        if self.role == Role::Slave && remote_role == Role::Master {
            effects.extend(self.beacon_to(&from));
        }
        effects
    }

    /// Reconcile a negotiated role with the role already held, keeping at
    /// most one master per session.
    ///
    /// Returns the role recorded for the peer, or `None` when the peer cannot
    /// join this session and its link is being dropped.
    fn settle_roles(
        &mut self,
        from: &PeerId,
        negotiated: Role,
        effects: &mut Vec<Effect>,
    ) -> Option<Role> {
        match (self.role, negotiated) {
            (Role::Undetermined, local) => {
                self.role = local;
                Some(local.counterpart())
            }
            (Role::Master, Role::Master) => Some(Role::Slave),
            (Role::Master, _) => {
                // Another established master won. Our slaves cannot follow
                // it through us, so they are let go and see the loss.
                let released: Vec<PeerId> = self
                    .peers
                    .iter()
                    .filter(|p| &p.id != from)
                    .map(|p| p.id.clone())
                    .collect();
                tracing::warn!(
                    "{} outranks this device as master; releasing {} link(s)",
                    from,
                    released.len()
                );
                for id in released {
                    if let Some(peer) = self.peers.get_mut(&id) {
                        peer.role = Role::Undetermined;
                    }
                    effects.push(Effect::DisconnectPeer { peer: id });
                }
                self.role = Role::Slave;
                Some(Role::Master)
            }
            (Role::Slave, Role::Slave) if self.peers.master().is_none() => Some(Role::Master),
            (Role::Slave, _) => {
                tracing::warn!(
                    "{} cannot join: this device already follows {:?}",
                    from,
                    self.peers.master()
                );
                effects.push(Effect::DisconnectPeer { peer: from.clone() });
                None
            }
        }
    }

    fn on_beacon(&mut self, from: PeerId, beacon: Beacon) -> Vec<Effect> {
        if self.role != Role::Master {
            tracing::debug!("Beacon from {} ignored: not master", from);
            return Vec::new();
        }

        let responder_time = self.clock.now();
        if let Some(round_trip) = beacon.last_round_trip {
            if round_trip / 2 < self.config.beacon.max_one_way_ns {
                if let Some(peer) = self.peers.get_mut(&from) {
                    peer.observe_round_trip(round_trip);
                }
            }
        }

        let reply = Payload::BeaconReply(BeaconReply {
            origin_time: beacon.origin_time,
            responder_time,
        });
        self.send_control(&from, reply).into_iter().collect()
    }

    fn on_beacon_reply(&mut self, from: PeerId, reply: BeaconReply) -> Vec<Effect> {
        let now = self.clock.now();
        let max_one_way = self.config.beacon.max_one_way_ns;

        let Some(peer) = self.peers.get_mut(&from) else {
            return Vec::new();
        };
        if peer.role != Role::Master {
            tracing::debug!("Beacon reply from non-master {} ignored", from);
            return Vec::new();
        }

        let round_trip = now.saturating_sub(reply.origin_time);
        let one_way = round_trip / 2;
        if one_way >= max_one_way {
            tracing::debug!("Discarding clock sample from {}: one-way {}ns", from, one_way);
            return Vec::new();
        }

        peer.observe_round_trip(round_trip);
        peer.correlator
            .record_sample(reply.origin_time.saturating_add(one_way), reply.responder_time);
        Vec::new()
    }

    fn on_command(&mut self, from: PeerId, command: SyncCommand) -> Vec<Effect> {
        if self.role != Role::Slave || self.peers.master() != Some(&from) {
            tracing::debug!(
                "Advisory {:?} from {} dropped (local role {:?})",
                command,
                from,
                self.role
            );
            return Vec::new();
        }

        let Some(master) = self.peers.get(&from) else {
            return Vec::new();
        };
        if !master.correlator.is_reliable() {
            tracing::warn!(
                "Provisional clock conversion for command from {} ({} samples)",
                from,
                master.correlator.len()
            );
        }

        let host_time = master
            .correlator
            .to_local(command.shared_time())
            .saturating_sub(self.output_latency);
        vec![Effect::Notify(notification(command, host_time))]
    }

    fn schedule_time(&self) -> SharedTime {
        let at = SharedTime::new(self.clock.now()).after(self.lead_time());
        match self.channel.last_sent() {
            Some(last) if last > at => last,
            _ => at,
        }
    }

    fn broadcast(&mut self, command: SyncCommand) -> Result<Vec<Effect>, ClientError> {
        let bytes = self
            .channel
            .send(self.role, &self.state, command)
            .map_err(|e| {
                tracing::warn!("Refusing {:?}: {}", command, e);
                e
            })?;

        let mut effects: Vec<Effect> = self
            .peers
            .connected_ids()
            .into_iter()
            .map(|peer| Effect::Send {
                peer,
                bytes: bytes.clone(),
            })
            .collect();

        // A master's host clock is the shared time base.
        let host_time = command
            .shared_time()
            .value()
            .saturating_sub(self.output_latency);
        effects.push(Effect::Notify(notification(command, host_time)));
        Ok(effects)
    }

    fn broadcast_latency(&mut self) -> Vec<Effect> {
        let report = Payload::Latency(LatencyReport {
            output_latency: self.output_latency,
            extra_delay: self.extra_delay,
        });
        let mut effects = Vec::new();
        for peer in self.peers.connected_ids() {
            effects.extend(self.send_control(&peer, report));
        }
        effects
    }

    fn send_hello(&mut self, peer_id: &PeerId, effects: &mut Vec<Effect>) {
        let Some(peer) = self.peers.get_mut(peer_id) else {
            return;
        };
        let claim = self.role.claim(peer.initiator().unwrap_or(false));
        peer.sent_claim = claim;

        let hello = Payload::Hello(Hello {
            claim,
            output_latency: self.output_latency,
            extra_delay: self.extra_delay,
        });
        effects.extend(self.send_control(peer_id, hello));
    }

    fn beacon_to(&mut self, master: &PeerId) -> Vec<Effect> {
        let last_round_trip = self.peers.get(master).and_then(|p| p.last_round_trip);
        let beacon = Payload::Beacon(Beacon {
            origin_time: self.clock.now(),
            last_round_trip,
        });
        self.send_control(master, beacon).into_iter().collect()
    }

    fn send_control(&mut self, to: &PeerId, payload: Payload) -> Option<Effect> {
        match self.channel.control(payload) {
            Ok(bytes) => Some(Effect::Send {
                peer: to.clone(),
                bytes,
            }),
            Err(e) => {
                tracing::warn!("Failed to encode {:?} for {}: {}", payload.kind(), to, e);
                None
            }
        }
    }
}

fn notification(command: SyncCommand, host_time: u64) -> Notification {
    match command {
        SyncCommand::Start { tempo, .. } => Notification::StartReceived { host_time, tempo },
        SyncCommand::Stop { .. } => Notification::StopReceived { host_time },
    }
}
