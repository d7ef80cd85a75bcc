//! Master/slave role negotiation.
//!
//! Both sides of a link send a [`RoleClaim`] in their Hello. Each side runs
//! [`negotiate`] on the same two claims and identities, so both arrive at
//! complementary roles without another round trip.
//!
//! Claims rank `Leading` (already masters a session) above `Master` (link
//! initiator) above everything else. The higher claim becomes master; equal
//! claims fall back to the smaller identity, compared lexicographically by
//! raw bytes.

use std::cmp::Ordering;
use wist_sync_types::{PeerId, RoleClaim};

/// Role of a device within a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Role {
    /// Handshake not complete; inbound commands are advisory.
    #[default]
    Undetermined,
    /// Commands from this device are authoritative.
    Master,
    /// Follows the master's commands.
    Slave,
}

impl Role {
    /// The opposite role, as seen from the other end of a link.
    pub fn counterpart(self) -> Self {
        match self {
            Role::Master => Role::Slave,
            Role::Slave => Role::Master,
            Role::Undetermined => Role::Undetermined,
        }
    }

    /// The claim a device in this role sends to a new peer.
    ///
    /// An undetermined device claims mastership only when it initiated the
    /// link (its invitation was accepted). A master keeps its session.
    pub fn claim(self, initiator: bool) -> RoleClaim {
        match self {
            Role::Master => RoleClaim::Leading,
            Role::Slave => RoleClaim::Slave,
            Role::Undetermined if initiator => RoleClaim::Master,
            Role::Undetermined => RoleClaim::Slave,
        }
    }
}

/// Resolve the local role for one link. Never returns `Undetermined`.
pub fn negotiate(
    local_id: &PeerId,
    local_claim: RoleClaim,
    remote_id: &PeerId,
    remote_claim: RoleClaim,
) -> Role {
    match rank(local_claim).cmp(&rank(remote_claim)) {
        Ordering::Greater => Role::Master,
        Ordering::Less => Role::Slave,
        Ordering::Equal => tie_break(local_id, remote_id),
    }
}

fn rank(claim: RoleClaim) -> u8 {
    match claim {
        RoleClaim::Leading => 2,
        RoleClaim::Master => 1,
        RoleClaim::Slave | RoleClaim::Undecided => 0,
    }
}

fn tie_break(local_id: &PeerId, remote_id: &PeerId) -> Role {
    if local_id < remote_id {
        Role::Master
    } else {
        Role::Slave
    }
}
