//! Command channel: framing, authorization and deduplication.
//!
//! The channel turns commands and control payloads into sequenced wire
//! frames and turns received bytes back into typed payloads. It does no
//! I/O; sync-client hands the encoded bytes to the transport.
//!
//! Commands and control frames (Hello, Beacon, BeaconReply, Latency) are
//! numbered in two independent sequences, so a late or lost control frame
//! never shadows a command.
//!
//! Receive-side guarantees, per sender:
//! - a frame is delivered at most once (sequence must strictly increase
//!   within its stream)
//! - commands never move backwards in shared time
//! - malformed bytes and frames whose header names another sender are
//!   rejected and leave the channel state untouched

use std::collections::HashMap;
use thiserror::Error;
use wist_sync_types::{Frame, Payload, PeerId, SharedTime, SyncCommand, WireError};

use crate::role::Role;
use crate::sequence::{SequenceCounter, SequenceTracker, SequenceVerdict};
use crate::session::SessionState;

/// Command channel errors.
#[derive(Debug, Error)]
pub enum ChannelError {
    /// Only a connected master may send commands.
    #[error("not authorized to send commands (role {role:?}, state {state:?})")]
    NotAuthorized {
        /// Local role at the time of the attempt.
        role: Role,
        /// Session state at the time of the attempt.
        state: SessionState,
    },

    /// Received bytes are not a valid frame.
    #[error("malformed payload: {0}")]
    MalformedPayload(#[from] WireError),

    /// Frame header names a different sender than the link it came from.
    #[error("frame from {from} claims sender {claimed}")]
    SenderMismatch {
        /// Peer the transport received the frame from.
        from: PeerId,
        /// Sender named in the frame header.
        claimed: PeerId,
    },

    /// A Start/Stop was passed where only control payloads are allowed.
    #[error("commands must go through send()")]
    CommandAsControl,

    /// Outgoing command earlier than one already sent.
    #[error("command at {attempted} precedes last sent {last}")]
    SharedTimeRegression {
        /// Shared time of the rejected command.
        attempted: SharedTime,
        /// Shared time of the last command sent.
        last: SharedTime,
    },
}

/// A frame that passed validation and deduplication.
#[derive(Debug, Clone, PartialEq)]
pub struct Inbound {
    /// Sender identity from the frame header.
    pub sender: PeerId,
    /// Sender's sequence number.
    pub sequence: u64,
    /// Typed content.
    pub payload: Payload,
}

/// Outcome of [`CommandChannel::receive`] for a well-formed frame.
#[derive(Debug, Clone, PartialEq)]
pub enum Delivery {
    /// Deliver this frame.
    Fresh(Inbound),
    /// Sequence already seen or superseded; drop.
    Dropped {
        /// Sender identity.
        sender: PeerId,
        /// Offending sequence number.
        sequence: u64,
        /// Why it was dropped.
        verdict: SequenceVerdict,
    },
    /// Command earlier in shared time than one already delivered; drop.
    Regressed {
        /// Sender identity.
        sender: PeerId,
        /// The rejected command.
        command: SyncCommand,
    },
}

impl Delivery {
    /// The inbound frame, if it should be delivered.
    pub fn into_inbound(self) -> Option<Inbound> {
        match self {
            Delivery::Fresh(inbound) => Some(inbound),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Default)]
struct SenderState {
    commands: SequenceTracker,
    control: SequenceTracker,
    last_command: Option<SharedTime>,
}

/// Frames outbound payloads and deduplicates inbound ones.
#[derive(Debug, Clone)]
pub struct CommandChannel {
    local_id: PeerId,
    commands: SequenceCounter,
    control: SequenceCounter,
    last_sent: Option<SharedTime>,
    senders: HashMap<PeerId, SenderState>,
}

impl CommandChannel {
    /// Create a channel that stamps frames with `local_id`.
    pub fn new(local_id: PeerId) -> Self {
        Self {
            local_id,
            commands: SequenceCounter::new(),
            control: SequenceCounter::new(),
            last_sent: None,
            senders: HashMap::new(),
        }
    }

    /// Encode a command for broadcast.
    ///
    /// Fails with `NotAuthorized` unless `role` is Master and `state` is
    /// Connected.
    pub fn send(
        &mut self,
        role: Role,
        state: &SessionState,
        command: SyncCommand,
    ) -> Result<Vec<u8>, ChannelError> {
        if role != Role::Master || !state.is_connected() {
            return Err(ChannelError::NotAuthorized {
                role,
                state: state.clone(),
            });
        }

        let shared_time = command.shared_time();
        if let Some(last) = self.last_sent {
            if shared_time < last {
                return Err(ChannelError::SharedTimeRegression {
                    attempted: shared_time,
                    last,
                });
            }
        }

        let bytes = self.encode(&Payload::Command(command))?;
        self.last_sent = Some(shared_time);
        Ok(bytes)
    }

    /// Encode a control payload (Hello, Beacon, BeaconReply, Latency).
    pub fn control(&mut self, payload: Payload) -> Result<Vec<u8>, ChannelError> {
        if matches!(payload, Payload::Command(_)) {
            return Err(ChannelError::CommandAsControl);
        }
        self.encode(&payload)
    }

    /// Decode, validate and deduplicate bytes received over the link to
    /// `from`.
    pub fn receive(&mut self, from: &PeerId, bytes: &[u8]) -> Result<Delivery, ChannelError> {
        let frame = Frame::from_bytes(bytes)?;
        let payload = frame.payload()?;
        if &frame.sender_id != from {
            return Err(ChannelError::SenderMismatch {
                from: from.clone(),
                claimed: frame.sender_id,
            });
        }

        let state = self.senders.entry(frame.sender_id.clone()).or_default();

        if let Payload::Command(command) = payload {
            if let Some(last) = state.last_command {
                if command.shared_time() < last {
                    return Ok(Delivery::Regressed {
                        sender: frame.sender_id,
                        command,
                    });
                }
            }
        }

        let tracker = match payload {
            Payload::Command(_) => &mut state.commands,
            _ => &mut state.control,
        };
        let verdict = tracker.offer(frame.sequence);
        if !verdict.is_accepted() {
            return Ok(Delivery::Dropped {
                sender: frame.sender_id,
                sequence: frame.sequence,
                verdict,
            });
        }

        if let Payload::Command(command) = payload {
            state.last_command = Some(command.shared_time());
        }

        Ok(Delivery::Fresh(Inbound {
            sender: frame.sender_id,
            sequence: frame.sequence,
            payload,
        }))
    }

    /// Decode a command frame, returning it only if it should be delivered.
    ///
    /// Control frames are consumed (their sequence is recorded) and yield
    /// `None`.
    pub fn receive_command(
        &mut self,
        from: &PeerId,
        bytes: &[u8],
    ) -> Result<Option<SyncCommand>, ChannelError> {
        Ok(self
            .receive(from, bytes)?
            .into_inbound()
            .and_then(|inbound| match inbound.payload {
                Payload::Command(command) => Some(command),
                _ => None,
            }))
    }

    /// Forget a sender; its next frame is accepted whatever its sequence.
    pub fn forget_sender(&mut self, sender: &PeerId) {
        self.senders.remove(sender);
    }

    /// Forget all senders and the last sent command time.
    ///
    /// The outbound sequences keep counting so peers that missed our
    /// teardown still see increasing numbers.
    pub fn clear(&mut self) {
        self.senders.clear();
        self.last_sent = None;
    }

    /// Shared time of the last command sent, if any.
    pub fn last_sent(&self) -> Option<SharedTime> {
        self.last_sent
    }

    /// Last accepted command sequence from a sender (0 if none).
    pub fn last_accepted(&self, sender: &PeerId) -> u64 {
        self.senders
            .get(sender)
            .map(|s| s.commands.last_accepted())
            .unwrap_or(0)
    }

    /// Last accepted control sequence from a sender (0 if none).
    pub fn last_accepted_control(&self, sender: &PeerId) -> u64 {
        self.senders
            .get(sender)
            .map(|s| s.control.last_accepted())
            .unwrap_or(0)
    }

    /// Identity stamped on outbound frames.
    pub fn local_id(&self) -> &PeerId {
        &self.local_id
    }

    fn encode(&mut self, payload: &Payload) -> Result<Vec<u8>, ChannelError> {
        let sequence = match payload {
            Payload::Command(_) => self.commands.next_sequence(),
            _ => self.control.next_sequence(),
        };
        let frame = Frame::new(self.local_id.clone(), sequence, payload);
        Ok(frame.to_bytes()?)
    }
}
