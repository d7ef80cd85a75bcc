//! Identity and ordering types for WIST sync.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Length of a randomly generated [`PeerId`].
pub const PEER_ID_LEN: usize = 16;

/// An opaque, stable identifier for a device taking part in a sync session.
///
/// Identities are compared lexicographically byte by byte; that ordering is
/// what breaks mastership ties between two devices.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PeerId(Vec<u8>);

impl PeerId {
    /// Create a new random PeerId.
    pub fn random() -> Self {
        let mut bytes = [0u8; PEER_ID_LEN];
        getrandom::getrandom(&mut bytes).expect("getrandom failed");
        Self(bytes.to_vec())
    }

    /// Create a PeerId from a display name or any other stable label.
    pub fn from_name(name: &str) -> Self {
        Self(name.as_bytes().to_vec())
    }

    /// Create a PeerId from raw bytes. Empty identities are rejected.
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        if bytes.is_empty() {
            None
        } else {
            Some(Self(bytes.to_vec()))
        }
    }

    /// Get the raw bytes of this PeerId.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Whether this identity carries no bytes (only possible via a decoded frame).
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", URL_SAFE_NO_PAD.encode(&self.0))
    }
}

impl fmt::Debug for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = self.to_string();
        let short: String = text.chars().take(8).collect();
        write!(f, "PeerId({})", short)
    }
}

/// A point in the shared time base, in nanoseconds of the master's clock.
///
/// Shared times are never compared with host times directly; a
/// correlator converts between the two domains.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default)]
pub struct SharedTime(u64);

impl SharedTime {
    /// Create a new SharedTime with the given nanosecond value.
    pub fn new(nanos: u64) -> Self {
        Self(nanos)
    }

    /// Get the nanosecond value of this SharedTime.
    pub fn value(&self) -> u64 {
        self.0
    }

    /// Shift forward by `nanos`, saturating at `u64::MAX`.
    pub fn after(&self, nanos: u64) -> Self {
        Self(self.0.saturating_add(nanos))
    }
}

impl fmt::Display for SharedTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Debug for SharedTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SharedTime({})", self.0)
    }
}
