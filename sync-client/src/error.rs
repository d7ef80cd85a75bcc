//! Client error type.

use thiserror::Error;
use wist_sync_core::ChannelError;
use wist_sync_types::WireError;

/// Client errors.
#[derive(Debug, Error)]
pub enum ClientError {
    /// The command channel refused the operation.
    #[error("channel error: {0}")]
    Channel(#[from] ChannelError),

    /// The command could not be built (for example, tempo out of range).
    #[error("invalid command: {0}")]
    Wire(#[from] WireError),

    /// The service task has shut down.
    #[error("sync service stopped")]
    ServiceStopped,
}
