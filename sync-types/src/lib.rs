//! # sync-types
//!
//! Wire format types for the WIST transport-sync protocol.
//!
//! This crate provides the foundational types used across all WIST crates:
//! - [`PeerId`], [`SharedTime`] - Identity and time-base types
//! - [`SyncCommand`] - Start/Stop transport commands
//! - [`Frame`] - Versioned wire frame and its typed [`Payload`]
//! - [`WireError`] - Error types

#![warn(missing_docs)]
#![warn(clippy::all)]

mod command;
mod error;
mod frame;
mod ids;

pub use command::{validate_tempo, SyncCommand, MAX_TEMPO};
pub use error::WireError;
pub use frame::{
    Beacon, BeaconReply, Frame, FrameKind, Hello, LatencyReport, Payload, RoleClaim,
    PROTOCOL_VERSION,
};
pub use ids::{PeerId, SharedTime, PEER_ID_LEN};
