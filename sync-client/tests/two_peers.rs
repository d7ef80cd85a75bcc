//! Coordinators wired together through an in-memory network.
//!
//! The network delivers frames in order and synchronously, so each test is
//! deterministic. Clocks are manual and deliberately far apart.

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::sync::Arc;
use wist_sync_client::{
    ClientError, Effect, HostClock, ManualClock, Notification, PeerLinkState, SyncConfig, SyncCoordinator,
    TransportEvent,
};
use wist_sync_core::{ChannelError, ClockError, Role, SessionState};
use wist_sync_types::{Frame, Payload, PeerId, SharedTime, SyncCommand};

const SECOND: u64 = 1_000_000_000;
const BEACON: u64 = 125_000_000;

struct Device {
    coordinator: SyncCoordinator,
    clock: ManualClock,
    notifications: Vec<Notification>,
}

struct Network {
    devices: BTreeMap<PeerId, Device>,
    links: BTreeSet<(PeerId, PeerId)>,
    in_flight: VecDeque<(PeerId, TransportEvent)>,
}

fn id(name: &str) -> PeerId {
    PeerId::from_name(name)
}

impl Network {
    fn new(devices: &[(&str, u64)]) -> Self {
        let devices = devices
            .iter()
            .map(|(name, start)| {
                let clock = ManualClock::new(*start);
                let coordinator =
                    SyncCoordinator::new(SyncConfig::default(), id(name), Arc::new(clock.clone()));
                (
                    id(name),
                    Device {
                        coordinator,
                        clock,
                        notifications: Vec::new(),
                    },
                )
            })
            .collect();
        Self {
            devices,
            links: BTreeSet::new(),
            in_flight: VecDeque::new(),
        }
    }

    fn device(&mut self, name: &str) -> &mut Device {
        self.devices.get_mut(&id(name)).expect("unknown device")
    }

    fn coordinator(&mut self, name: &str) -> &mut SyncCoordinator {
        &mut self.device(name).coordinator
    }

    fn notifications(&mut self, name: &str) -> Vec<Notification> {
        std::mem::take(&mut self.device(name).notifications)
    }

    fn apply(&mut self, from: &PeerId, effects: Vec<Effect>) {
        for effect in effects {
            match effect {
                Effect::Send { peer, bytes } => {
                    self.in_flight.push_back((
                        peer,
                        TransportEvent::BytesReceived {
                            peer: from.clone(),
                            bytes,
                        },
                    ));
                }
                Effect::Notify(notification) => {
                    if let Some(device) = self.devices.get_mut(from) {
                        device.notifications.push(notification);
                    }
                }
                Effect::DisconnectPeer { peer } => self.unlink(from, &peer),
                Effect::Disconnect => {
                    let others: Vec<PeerId> = self
                        .links
                        .iter()
                        .filter_map(|(a, b)| {
                            if a == from {
                                Some(b.clone())
                            } else if b == from {
                                Some(a.clone())
                            } else {
                                None
                            }
                        })
                        .collect();
                    for other in others {
                        self.unlink(from, &other);
                    }
                }
                Effect::StartDiscovery | Effect::StopDiscovery => {}
            }
        }
    }

    fn run(&mut self, name: &str, op: impl FnOnce(&mut SyncCoordinator) -> Vec<Effect>) {
        let effects = op(self.coordinator(name));
        self.apply(&id(name), effects);
        self.deliver_all();
    }

    fn deliver_all(&mut self) {
        while let Some((to, event)) = self.in_flight.pop_front() {
            let Some(device) = self.devices.get_mut(&to) else {
                continue;
            };
            let effects = device.coordinator.handle_transport_event(event);
            self.apply(&to, effects);
        }
    }

    fn inject(&mut self, to: &str, from: &str, bytes: Vec<u8>) {
        self.in_flight.push_back((
            id(to),
            TransportEvent::BytesReceived {
                peer: id(from),
                bytes,
            },
        ));
        self.deliver_all();
    }

    /// `initiator`'s invitation accepted by `acceptor`.
    fn link(&mut self, initiator: &str, acceptor: &str) {
        self.link_with_flags(initiator, true, acceptor, false);
    }

    fn link_with_flags(&mut self, a: &str, a_initiator: bool, b: &str, b_initiator: bool) {
        self.links.insert(pair(&id(a), &id(b)));
        self.in_flight.push_back((
            id(a),
            link_event(&id(b), PeerLinkState::Connected { initiator: a_initiator }),
        ));
        self.in_flight.push_back((
            id(b),
            link_event(&id(a), PeerLinkState::Connected { initiator: b_initiator }),
        ));
        self.deliver_all();
    }

    fn sever(&mut self, a: &str, b: &str) {
        self.unlink(&id(a), &id(b));
        self.deliver_all();
    }

    /// Queue `NotConnected` on both ends if the pair is linked.
    fn unlink(&mut self, a: &PeerId, b: &PeerId) {
        if self.links.remove(&pair(a, b)) {
            self.in_flight
                .push_back((a.clone(), link_event(b, PeerLinkState::NotConnected)));
            self.in_flight
                .push_back((b.clone(), link_event(a, PeerLinkState::NotConnected)));
        }
    }

    /// Advance every clock by one beacon period and tick every device.
    fn beacon_round(&mut self) {
        let names: Vec<PeerId> = self.devices.keys().cloned().collect();
        for name in names {
            let Some(device) = self.devices.get_mut(&name) else {
                continue;
            };
            device.clock.advance(BEACON);
            let effects = device.coordinator.on_beacon_tick();
            self.apply(&name, effects);
        }
        self.deliver_all();
    }
}

fn pair(a: &PeerId, b: &PeerId) -> (PeerId, PeerId) {
    if a < b {
        (a.clone(), b.clone())
    } else {
        (b.clone(), a.clone())
    }
}

fn link_event(peer: &PeerId, state: PeerLinkState) -> TransportEvent {
    TransportEvent::PeerStateChanged {
        peer: peer.clone(),
        state,
    }
}

fn connected(devices: &[(&str, u64)]) -> Network {
    let mut net = Network::new(devices);
    net.run("A", |c| c.enable_sync());
    net.run("B", |c| c.enable_sync());
    net.link("A", "B");
    net
}

fn command_frame(from: &str, sequence: u64, command: SyncCommand) -> Vec<u8> {
    Frame::new(id(from), sequence, &Payload::Command(command))
        .to_bytes()
        .unwrap()
}

#[test]
fn handshake_establishes_both_sides_once() {
    let mut net = connected(&[("A", 0), ("B", 0)]);

    assert_eq!(net.notifications("A"), vec![Notification::ConnectionEstablished]);
    assert_eq!(net.notifications("B"), vec![Notification::ConnectionEstablished]);
    assert_eq!(net.coordinator("A").role(), Role::Master);
    assert_eq!(net.coordinator("B").role(), Role::Slave);
    assert_eq!(net.coordinator("B").master(), Some(&id("A")));
}

#[test]
fn simultaneous_master_claims_resolve_to_smaller_id() {
    let mut net = Network::new(&[("A", 0), ("B", 0)]);
    net.run("B", |c| c.enable_sync());
    net.run("A", |c| c.enable_sync());

    // Crossing invitations: each side believes it initiated.
    net.link_with_flags("B", true, "A", true);

    assert_eq!(net.coordinator("A").role(), Role::Master);
    assert_eq!(net.coordinator("B").role(), Role::Slave);
    assert_eq!(net.coordinator("A").master(), None);
    assert_eq!(net.coordinator("B").master(), Some(&id("A")));
}

#[test]
fn start_lands_at_same_instant_despite_clock_offset() {
    let mut net = connected(&[("A", 100 * SECOND), ("B", 3 * SECOND)]);
    for _ in 0..8 {
        net.beacon_round();
    }
    net.notifications("A");
    net.notifications("B");

    let estimate = net.coordinator("B").clock_estimate().unwrap();
    assert_eq!(estimate.offset, 97 * SECOND as i64);
    assert!(net.coordinator("B").peers().get(&id("A")).unwrap().correlator.is_reliable());

    let a_now = net.device("A").clock.now();
    let b_now = net.device("B").clock.now();
    let lead = net.coordinator("A").lead_time();

    net.run("A", |c| c.request_start(120.0).unwrap());

    assert_eq!(
        net.notifications("A"),
        vec![Notification::StartReceived {
            host_time: a_now + lead,
            tempo: 120.0
        }]
    );
    assert_eq!(
        net.notifications("B"),
        vec![Notification::StartReceived {
            host_time: b_now + lead,
            tempo: 120.0
        }]
    );
}

#[test]
fn master_self_delivers_without_network() {
    let mut net = connected(&[("A", 5 * SECOND), ("B", 0)]);
    net.notifications("A");

    let effects = net.coordinator("A").request_start(120.0).unwrap();
    let lead = net.coordinator("A").lead_time();

    assert!(effects.contains(&Effect::Notify(Notification::StartReceived {
        host_time: 5 * SECOND + lead,
        tempo: 120.0
    })));
}

#[test]
fn slave_request_is_not_authorized() {
    let mut net = connected(&[("A", 0), ("B", 0)]);

    let result = net.coordinator("B").request_start(120.0);
    assert!(matches!(
        result,
        Err(ClientError::Channel(ChannelError::NotAuthorized { .. }))
    ));
}

#[test]
fn duplicate_and_late_frames_are_dropped() {
    let mut net = Network::new(&[("B", 0)]);
    net.run("B", |c| c.enable_sync());
    net.in_flight.push_back((
        id("B"),
        link_event(&id("A"), PeerLinkState::Connected { initiator: false }),
    ));
    net.deliver_all();

    // Hand-built master "A": Hello takes sequence 1.
    let hello = Frame::new(
        id("A"),
        1,
        &Payload::Hello(wist_sync_types::Hello {
            claim: wist_sync_types::RoleClaim::Master,
            output_latency: 0,
            extra_delay: 0,
        }),
    );
    net.inject("B", "A", hello.to_bytes().unwrap());
    net.notifications("B");

    for seq in [2u64, 3, 3, 6, 5] {
        let command = SyncCommand::start(SharedTime::new(seq * 1_000), 120.0).unwrap();
        net.inject("B", "A", command_frame("A", seq, command));
    }

    let delivered: Vec<u64> = net
        .notifications("B")
        .into_iter()
        .map(|n| match n {
            Notification::StartReceived { host_time, .. } => host_time / 1_000,
            other => panic!("unexpected {:?}", other),
        })
        .collect();
    assert_eq!(delivered, vec![2, 3, 6]);
}

#[test]
fn malformed_frames_never_reach_observer() {
    let mut net = connected(&[("A", 0), ("B", 0)]);
    net.notifications("B");

    net.inject("B", "A", vec![]);
    net.inject("B", "A", vec![0xde, 0xad, 0xbe, 0xef]);
    net.inject("B", "A", vec![0x81, 0xa1, b'v', 0x01]);
    assert!(net.notifications("B").is_empty());
    assert_eq!(net.coordinator("B").state(), &SessionState::Connected);

    net.run("A", |c| c.request_stop().unwrap());
    assert!(matches!(
        net.notifications("B").as_slice(),
        [Notification::StopReceived { .. }]
    ));
}

#[test]
fn drop_from_connected_reports_lost_once() {
    let mut net = connected(&[("A", 0), ("B", 0)]);
    net.notifications("A");
    net.notifications("B");

    net.sever("A", "B");

    assert_eq!(net.notifications("A"), vec![Notification::ConnectionLost]);
    assert_eq!(net.notifications("B"), vec![Notification::ConnectionLost]);
    assert_eq!(net.coordinator("B").state(), &SessionState::Lost);
}

#[test]
fn disable_reports_cancelled_and_clears_samples() {
    let mut net = connected(&[("A", 40 * SECOND), ("B", 0)]);
    for _ in 0..4 {
        net.beacon_round();
    }
    assert!(net.coordinator("B").clock_estimate().is_ok());
    net.notifications("A");
    net.notifications("B");

    net.run("B", |c| c.disable_sync());

    assert_eq!(net.notifications("B"), vec![Notification::ConnectionCancelled]);
    assert_eq!(net.notifications("A"), vec![Notification::ConnectionLost]);
    assert_eq!(net.coordinator("B").state(), &SessionState::Cancelled);
    assert!(net.coordinator("B").peers().is_empty());
    assert_eq!(
        net.coordinator("B").clock_estimate(),
        Err(ClockError::Unavailable { samples: 0 })
    );
}

#[test]
fn nothing_is_reported_after_cancel() {
    let mut net = connected(&[("A", 0), ("B", 0)]);
    net.run("B", |c| c.disable_sync());
    net.notifications("B");

    let stop = command_frame("A", 99, SyncCommand::stop(SharedTime::new(1)));
    net.inject("B", "A", stop);
    assert!(net.notifications("B").is_empty());
}

#[test]
fn reconnection_starts_from_zero_samples() {
    let mut net = connected(&[("A", 10 * SECOND), ("B", 0)]);
    for _ in 0..8 {
        net.beacon_round();
    }
    assert_eq!(
        net.coordinator("B").peers().get(&id("A")).unwrap().correlator.len(),
        8
    );

    net.sever("A", "B");
    net.run("A", |c| c.enable_sync());
    net.run("B", |c| c.enable_sync());
    net.link("A", "B");

    // Only the beacon sent on handshake has been answered.
    assert_eq!(
        net.coordinator("B").peers().get(&id("A")).unwrap().correlator.len(),
        1
    );
}

#[test]
fn latency_update_reaches_master_schedule() {
    let mut net = connected(&[("A", 0), ("B", 0)]);
    assert_eq!(net.coordinator("A").lead_time(), 10_000_000);

    net.run("B", |c| c.set_output_latency(25_000_000));

    assert_eq!(net.coordinator("A").lead_time(), 25_000_000);
}

#[test]
fn hello_overtaking_link_up_still_completes_handshake() {
    let mut net = Network::new(&[("A", 0), ("B", 0)]);
    net.run("A", |c| c.enable_sync());
    net.run("B", |c| c.enable_sync());
    net.links.insert(pair(&id("A"), &id("B")));

    // B hears the invitation, then A's Hello, and only then its own link-up.
    net.in_flight
        .push_back((id("B"), link_event(&id("A"), PeerLinkState::Connecting)));
    net.in_flight.push_back((
        id("A"),
        link_event(&id("B"), PeerLinkState::Connected { initiator: true }),
    ));
    net.deliver_all();
    assert_eq!(net.coordinator("B").state(), &SessionState::Connecting);

    net.in_flight.push_back((
        id("B"),
        link_event(&id("A"), PeerLinkState::Connected { initiator: false }),
    ));
    net.deliver_all();

    assert_eq!(net.coordinator("A").state(), &SessionState::Connected);
    assert_eq!(net.coordinator("B").state(), &SessionState::Connected);
    assert_eq!(net.coordinator("A").role(), Role::Master);
    assert_eq!(net.coordinator("B").role(), Role::Slave);
    assert_eq!(net.notifications("B"), vec![Notification::ConnectionEstablished]);
}

#[test]
fn control_traffic_never_shadows_a_command() {
    let mut net = connected(&[("A", 0), ("B", 0)]);
    for _ in 0..3 {
        net.beacon_round();
    }
    net.notifications("B");

    // Hold A's Start back while a later beacon reply overtakes it.
    let effects = net.coordinator("A").request_start(120.0).unwrap();
    let start = effects
        .into_iter()
        .find_map(|e| match e {
            Effect::Send { bytes, .. } => Some(bytes),
            _ => None,
        })
        .unwrap();
    net.beacon_round();
    net.inject("B", "A", start);

    assert!(matches!(
        net.notifications("B").as_slice(),
        [Notification::StartReceived { .. }]
    ));
}

#[test]
fn forged_sender_cannot_poison_dedup() {
    let mut net = Network::new(&[("A", 0), ("B", 0), ("C", 0)]);
    for name in ["A", "B", "C"] {
        net.run(name, |c| c.enable_sync());
    }
    net.link("A", "B");
    net.link("A", "C");
    net.notifications("B");

    let forged = command_frame("A", u64::MAX, SyncCommand::stop(SharedTime::new(1)));
    net.inject("B", "C", forged);
    assert!(net.notifications("B").is_empty());

    net.run("A", |c| c.request_start(90.0).unwrap());
    assert!(matches!(
        net.notifications("B").as_slice(),
        [Notification::StartReceived { .. }]
    ));
}

#[test]
fn established_master_keeps_its_session_when_a_newcomer_links() {
    let mut net = Network::new(&[("A", 0), ("B", 0), ("C", 0)]);
    for name in ["A", "B", "C"] {
        net.run(name, |c| c.enable_sync());
    }
    net.link("B", "C");
    assert_eq!(net.coordinator("B").role(), Role::Master);

    // A has the smallest id and initiates, but B already has a slave.
    net.link("A", "B");

    assert_eq!(net.coordinator("B").role(), Role::Master);
    assert_eq!(net.coordinator("A").role(), Role::Slave);
    assert_eq!(net.coordinator("A").master(), Some(&id("B")));
    assert_eq!(net.coordinator("C").master(), Some(&id("B")));
    for name in ["A", "B", "C"] {
        net.notifications(name);
    }

    net.run("B", |c| c.request_start(120.0).unwrap());
    for name in ["A", "B", "C"] {
        assert!(
            matches!(
                net.notifications(name).as_slice(),
                [Notification::StartReceived { .. }]
            ),
            "{} missed the start",
            name
        );
    }
}

#[test]
fn merging_masters_release_the_losers_slaves() {
    let mut net = Network::new(&[("A", 0), ("B", 0), ("C", 0), ("D", 0)]);
    for name in ["A", "B", "C", "D"] {
        net.run(name, |c| c.enable_sync());
    }
    net.link("A", "D");
    net.link("B", "C");
    for name in ["A", "B", "C", "D"] {
        net.notifications(name);
    }

    // Two established masters meet; the smaller id keeps mastership.
    net.link("B", "A");

    assert_eq!(net.coordinator("A").role(), Role::Master);
    assert_eq!(net.coordinator("B").role(), Role::Slave);
    assert_eq!(net.coordinator("B").master(), Some(&id("A")));
    assert_eq!(net.notifications("C"), vec![Notification::ConnectionLost]);
    assert_eq!(net.coordinator("C").state(), &SessionState::Lost);
    assert!(net.notifications("B").is_empty());

    net.run("A", |c| c.request_stop().unwrap());
    for name in ["A", "B", "D"] {
        assert!(matches!(
            net.notifications(name).as_slice(),
            [Notification::StopReceived { .. }]
        ));
    }
    assert!(net.notifications("C").is_empty());
}

#[test]
fn established_slave_turns_away_a_second_master() {
    let mut net = Network::new(&[("A", 0), ("B", 0), ("C", 0)]);
    for name in ["A", "B", "C"] {
        net.run(name, |c| c.enable_sync());
    }
    net.link("B", "C");
    net.notifications("C");

    // A invites C, which already follows B.
    net.link("A", "C");

    assert_eq!(net.coordinator("C").master(), Some(&id("B")));
    assert_eq!(net.coordinator("C").state(), &SessionState::Connected);
    assert!(net.notifications("C").is_empty());
    assert_eq!(
        net.notifications("A"),
        vec![
            Notification::ConnectionEstablished,
            Notification::ConnectionLost
        ]
    );

    net.run("B", |c| c.request_start(100.0).unwrap());
    assert!(matches!(
        net.notifications("C").as_slice(),
        [Notification::StartReceived { .. }]
    ));
}
