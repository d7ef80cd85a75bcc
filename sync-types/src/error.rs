//! Error types for the WIST wire format.

use thiserror::Error;

/// Errors produced while building, encoding or decoding wire frames.
///
/// Every decode-side variant means the frame is malformed and must be
/// dropped; none of them imply the connection itself is broken.
#[derive(Debug, Error)]
pub enum WireError {
    /// MessagePack serialization failed
    #[error("serialization failed: {0}")]
    Serialization(#[source] rmp_serde::encode::Error),

    /// MessagePack deserialization failed (truncated or corrupt frame)
    #[error("deserialization failed: {0}")]
    Deserialization(#[source] rmp_serde::decode::Error),

    /// Unknown frame kind discriminator
    #[error("invalid frame kind: {0}")]
    InvalidKind(u8),

    /// Frame version older than anything this build can read
    #[error("unsupported protocol version: {0}")]
    UnsupportedVersion(u8),

    /// A field required by the frame kind is absent
    #[error("missing field `{field}` for {kind} frame")]
    MissingField {
        /// The frame kind being decoded.
        kind: &'static str,
        /// Name of the absent field.
        field: &'static str,
    },

    /// Tempo outside (0, 999] or not finite
    #[error("tempo out of range: {0}")]
    TempoOutOfRange(f32),

    /// Sender identity is empty
    #[error("frame has no sender id")]
    MissingSender,

    /// Sequence zero is reserved for "nothing accepted yet"
    #[error("frame sequence must be non-zero")]
    ZeroSequence,
}
