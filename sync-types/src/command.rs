//! Transport commands exchanged between master and slaves.

use crate::{SharedTime, WireError};

/// Highest tempo (BPM) accepted on the wire.
pub const MAX_TEMPO: f32 = 999.0;

/// A transport command issued by the master.
///
/// Commands are immutable once built; construct them through
/// [`SyncCommand::start`] and [`SyncCommand::stop`] so the tempo range is
/// always checked.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SyncCommand {
    /// Start the transport at `shared_time` with the given tempo.
    Start {
        /// Audible start instant in the shared time base.
        shared_time: SharedTime,
        /// Tempo in beats per minute, within (0, 999].
        tempo: f32,
    },
    /// Stop the transport at `shared_time`.
    Stop {
        /// Audible stop instant in the shared time base.
        shared_time: SharedTime,
    },
}

impl SyncCommand {
    /// Build a Start command, validating the tempo.
    pub fn start(shared_time: SharedTime, tempo: f32) -> Result<Self, WireError> {
        validate_tempo(tempo)?;
        Ok(Self::Start { shared_time, tempo })
    }

    /// Build a Stop command.
    pub fn stop(shared_time: SharedTime) -> Self {
        Self::Stop { shared_time }
    }

    /// The instant this command takes effect, in the shared time base.
    pub fn shared_time(&self) -> SharedTime {
        match self {
            Self::Start { shared_time, .. } | Self::Stop { shared_time } => *shared_time,
        }
    }

    /// The tempo carried by a Start command.
    pub fn tempo(&self) -> Option<f32> {
        match self {
            Self::Start { tempo, .. } => Some(*tempo),
            Self::Stop { .. } => None,
        }
    }
}

/// Check that a tempo is finite and within (0, [`MAX_TEMPO`]].
pub fn validate_tempo(tempo: f32) -> Result<(), WireError> {
    if tempo.is_finite() && tempo > 0.0 && tempo <= MAX_TEMPO {
        Ok(())
    } else {
        Err(WireError::TempoOutOfRange(tempo))
    }
}
