//! Error types for the BLE driver layer

use thiserror::Error;

// ----------------------------------------------------------------------------
// Error Types
// ----------------------------------------------------------------------------

/// Errors raised by the driver and the platform seams beneath it
#[derive(Error, Debug)]
pub enum BleLinkError {
    #[error("BLE adapter not available")]
    AdapterUnavailable,

    #[error("failed to connect to peer: {0}")]
    ConnectFailed(String),

    #[error("failed to write to characteristic: {0}")]
    WriteFailed(String),

    #[error("failed to broadcast advertising frame: {0}")]
    AdvertiseFailed(String),

    #[error("send attempt failed: {message}")]
    SendFailed { message: String },

    #[error("link event channel closed")]
    ChannelClosed,

    #[error(transparent)]
    Engine(#[from] ember_core::EmberError),
}
