//! # sync-client
//!
//! Client library for WIST wireless transport sync.
//!
//! This is the library an application embeds to share start, stop and
//! tempo with nearby devices.
//!
//! ## Features
//!
//! - **Role Negotiation**: exactly one master per session, decided in the
//!   Hello handshake
//! - **Clock Correlation**: slaves sample the master's clock with beacons
//! - **Latency Compensation**: commands are scheduled far enough ahead for
//!   every device's output latency and extra delay
//! - **Transport Abstraction**: pluggable transport layer (mock included)
//! - **Pure State Machine**: uses sync-core for side-effect-free logic
//!
//! ## Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use wist_sync_client::{MonotonicClock, SyncConfig, SyncCoordinator, SyncService};
//!
//! let coordinator = SyncCoordinator::new(config, PeerId::random(), Arc::new(MonotonicClock::new()));
//! let handle = SyncService::spawn(coordinator, transport, Arc::new(my_observer));
//!
//! handle.enable()?;
//! handle.wait_for_state(SessionState::Connected).await?;
//! handle.request_start(120.0).await?;
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod clock;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod observer;
pub mod service;
pub mod transport;

pub use clock::{HostClock, ManualClock, MonotonicClock};
pub use config::{BeaconConfig, ConfigError, ScheduleConfig, SessionConfig, SyncConfig};
pub use coordinator::{Effect, SyncCoordinator};
pub use error::ClientError;
pub use observer::{ChannelObserver, Notification, SyncObserver};
pub use service::{SyncHandle, SyncService};
pub use transport::{
    DiscoveryInfo, MockTransport, PeerLinkState, Transport, TransportError, TransportEvent,
    TransportEvents, MAX_FRAME_SIZE,
};
