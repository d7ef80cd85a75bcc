//! Frame - the versioned wire format for every WIST message.
//!
//! Frames are MessagePack maps keyed by field name. Readers ignore keys they
//! do not know, so a newer sender stays parseable by an older receiver for
//! the fields both understand. Optional fields are omitted when empty.

use serde::{Deserialize, Serialize};

use crate::{PeerId, SharedTime, SyncCommand, WireError};

/// Protocol version written by this build.
pub const PROTOCOL_VERSION: u8 = 1;

/// Frame kind discriminator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum FrameKind {
    /// Master starts the transport
    Start = 1,
    /// Master stops the transport
    Stop = 2,
    /// Role handshake after link-up
    Hello = 3,
    /// Clock beacon, slave -> master
    Beacon = 4,
    /// Clock beacon answer, master -> slave
    BeaconReply = 5,
    /// Output latency or extra delay changed
    Latency = 6,
}

impl FrameKind {
    fn name(self) -> &'static str {
        match self {
            FrameKind::Start => "Start",
            FrameKind::Stop => "Stop",
            FrameKind::Hello => "Hello",
            FrameKind::Beacon => "Beacon",
            FrameKind::BeaconReply => "BeaconReply",
            FrameKind::Latency => "Latency",
        }
    }
}

impl TryFrom<u8> for FrameKind {
    type Error = WireError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(FrameKind::Start),
            2 => Ok(FrameKind::Stop),
            3 => Ok(FrameKind::Hello),
            4 => Ok(FrameKind::Beacon),
            5 => Ok(FrameKind::BeaconReply),
            6 => Ok(FrameKind::Latency),
            _ => Err(WireError::InvalidKind(value)),
        }
    }
}

/// Which role a device asks for in its Hello.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum RoleClaim {
    /// No preference; the tie-break decides.
    Undecided = 0,
    /// The device initiated the link (its invitation was accepted).
    Master = 1,
    /// The device accepted an invitation or already follows a master.
    Slave = 2,
    /// The device already masters a session. Outranks `Master`.
    Leading = 3,
}

impl From<u8> for RoleClaim {
    /// Unknown claims from newer peers degrade to `Undecided`.
    fn from(value: u8) -> Self {
        match value {
            1 => RoleClaim::Master,
            2 => RoleClaim::Slave,
            3 => RoleClaim::Leading,
            _ => RoleClaim::Undecided,
        }
    }
}

/// Role handshake sent by both sides once a link is up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Hello {
    /// Requested role.
    pub claim: RoleClaim,
    /// Sender's audio output latency (ns).
    pub output_latency: u64,
    /// Sender's user-configured extra delay (ns).
    pub extra_delay: u64,
}

/// Clock beacon carrying the slave's send instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Beacon {
    /// Slave host time when the beacon was sent (ns).
    pub origin_time: u64,
    /// Round trip measured for the previous beacon, if any (ns).
    pub last_round_trip: Option<u64>,
}

/// Master's answer to a [`Beacon`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BeaconReply {
    /// Echo of [`Beacon::origin_time`].
    pub origin_time: u64,
    /// Master host time when the beacon was answered (ns).
    pub responder_time: u64,
}

/// Update of the sender's latency figures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LatencyReport {
    /// Audio output latency (ns).
    pub output_latency: u64,
    /// User-configured extra delay (ns).
    pub extra_delay: u64,
}

/// Typed content of a frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Payload {
    /// Start or Stop.
    Command(SyncCommand),
    /// Role handshake.
    Hello(Hello),
    /// Clock beacon.
    Beacon(Beacon),
    /// Clock beacon answer.
    BeaconReply(BeaconReply),
    /// Latency update.
    Latency(LatencyReport),
}

impl Payload {
    /// The frame kind this payload encodes as.
    pub fn kind(&self) -> FrameKind {
        match self {
            Payload::Command(SyncCommand::Start { .. }) => FrameKind::Start,
            Payload::Command(SyncCommand::Stop { .. }) => FrameKind::Stop,
            Payload::Hello(_) => FrameKind::Hello,
            Payload::Beacon(_) => FrameKind::Beacon,
            Payload::BeaconReply(_) => FrameKind::BeaconReply,
            Payload::Latency(_) => FrameKind::Latency,
        }
    }
}

/// The wire frame.
///
/// `version`, `sender_id`, `sequence` and `kind` are always present; the
/// remaining fields are filled according to `kind`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Frame {
    /// Protocol version of the sender
    pub version: u8,
    /// Sender's peer identity
    pub sender_id: PeerId,
    /// Per-sender sequence number, starting at 1. Commands (Start/Stop)
    /// and control frames are numbered independently.
    pub sequence: u64,
    /// Frame kind discriminator
    pub kind: u8,
    /// Start/Stop instant in the shared time base
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shared_time: Option<u64>,
    /// Start tempo (BPM)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tempo: Option<f32>,
    /// Hello role claim
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub claim: Option<u8>,
    /// Beacon origin instant
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub origin_time: Option<u64>,
    /// BeaconReply responder instant
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub responder_time: Option<u64>,
    /// Previous beacon round trip
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub round_trip: Option<u64>,
    /// Audio output latency
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_latency: Option<u64>,
    /// User extra delay
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extra_delay: Option<u64>,
}

impl Frame {
    /// Create a new frame for sending.
    pub fn new(sender_id: PeerId, sequence: u64, payload: &Payload) -> Self {
        let mut frame = Self {
            version: PROTOCOL_VERSION,
            sender_id,
            sequence,
            kind: payload.kind() as u8,
            shared_time: None,
            tempo: None,
            claim: None,
            origin_time: None,
            responder_time: None,
            round_trip: None,
            output_latency: None,
            extra_delay: None,
        };

        match *payload {
            Payload::Command(SyncCommand::Start { shared_time, tempo }) => {
                frame.shared_time = Some(shared_time.value());
                frame.tempo = Some(tempo);
            }
            Payload::Command(SyncCommand::Stop { shared_time }) => {
                frame.shared_time = Some(shared_time.value());
            }
            Payload::Hello(hello) => {
                frame.claim = Some(hello.claim as u8);
                frame.output_latency = Some(hello.output_latency);
                frame.extra_delay = Some(hello.extra_delay);
            }
            Payload::Beacon(beacon) => {
                frame.origin_time = Some(beacon.origin_time);
                frame.round_trip = beacon.last_round_trip;
            }
            Payload::BeaconReply(reply) => {
                frame.origin_time = Some(reply.origin_time);
                frame.responder_time = Some(reply.responder_time);
            }
            Payload::Latency(report) => {
                frame.output_latency = Some(report.output_latency);
                frame.extra_delay = Some(report.extra_delay);
            }
        }

        frame
    }

    /// Serialize to MessagePack bytes (map encoding).
    pub fn to_bytes(&self) -> Result<Vec<u8>, WireError> {
        rmp_serde::to_vec_named(self).map_err(WireError::Serialization)
    }

    /// Deserialize from MessagePack bytes and check the header fields.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, WireError> {
        let frame: Frame = rmp_serde::from_slice(bytes).map_err(WireError::Deserialization)?;
        if frame.version == 0 {
            return Err(WireError::UnsupportedVersion(frame.version));
        }
        if frame.sender_id.is_empty() {
            return Err(WireError::MissingSender);
        }
        if frame.sequence == 0 {
            return Err(WireError::ZeroSequence);
        }
        Ok(frame)
    }

    /// Get the frame kind as an enum.
    pub fn frame_kind(&self) -> Result<FrameKind, WireError> {
        FrameKind::try_from(self.kind)
    }

    /// Decode the typed payload, validating the fields its kind requires.
    pub fn payload(&self) -> Result<Payload, WireError> {
        let kind = self.frame_kind()?;
        let need = |value: Option<u64>, field: &'static str| {
            value.ok_or(WireError::MissingField {
                kind: kind.name(),
                field,
            })
        };

        let payload = match kind {
            FrameKind::Start => {
                let shared_time = SharedTime::new(need(self.shared_time, "shared_time")?);
                let tempo = self.tempo.ok_or(WireError::MissingField {
                    kind: kind.name(),
                    field: "tempo",
                })?;
                Payload::Command(SyncCommand::start(shared_time, tempo)?)
            }
            FrameKind::Stop => Payload::Command(SyncCommand::stop(SharedTime::new(need(
                self.shared_time,
                "shared_time",
            )?))),
            FrameKind::Hello => Payload::Hello(Hello {
                claim: RoleClaim::from(self.claim.unwrap_or(RoleClaim::Undecided as u8)),
                output_latency: self.output_latency.unwrap_or(0),
                extra_delay: self.extra_delay.unwrap_or(0),
            }),
            FrameKind::Beacon => Payload::Beacon(Beacon {
                origin_time: need(self.origin_time, "origin_time")?,
                last_round_trip: self.round_trip,
            }),
            FrameKind::BeaconReply => Payload::BeaconReply(BeaconReply {
                origin_time: need(self.origin_time, "origin_time")?,
                responder_time: need(self.responder_time, "responder_time")?,
            }),
            FrameKind::Latency => Payload::Latency(LatencyReport {
                output_latency: need(self.output_latency, "output_latency")?,
                extra_delay: self.extra_delay.unwrap_or(0),
            }),
        };

        Ok(payload)
    }
}
