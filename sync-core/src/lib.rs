//! # sync-core
//!
//! Pure logic for WIST sync (no I/O, instant tests).
//!
//! This crate implements the session state machine, role negotiation,
//! clock correlation and the command channel without any network access
//! or real clock, enabling fast unit tests.
//!
//! ## Design Philosophy
//!
//! All modules in this crate are **pure** - they take input and produce output
//! without side effects. This enables:
//! - Instant unit tests (no mocks, no async)
//! - Deterministic behavior (same input → same output)
//! - Easy reasoning about state transitions
//!
//! Host time is always passed in by the caller. The actual I/O (transport,
//! beacon timers, observer callbacks) is performed by `sync-client`, which
//! interprets the actions produced by these state machines.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod channel;
pub mod clock;
pub mod peer;
pub mod role;
pub mod sequence;
pub mod session;

pub use channel::{ChannelError, CommandChannel, Delivery, Inbound};
pub use clock::{
    ClockCorrelator, ClockError, ClockSample, CorrelatorSettings, OffsetEstimate, MIN_SAMPLES,
};
pub use peer::{Peer, PeerLink, PeerTable};
pub use role::{negotiate, Role};
pub use sequence::{SequenceCounter, SequenceTracker, SequenceVerdict};
pub use session::{Action, ConnectionNotice, Event, SessionState};
