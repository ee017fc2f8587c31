//! Ember Core Protocol Engine
//!
//! This crate implements the transport-agnostic protocol engine for Ember,
//! a BLE proximity-matching protocol: compact binary framing with chunked
//! reassembly over advertising and GATT transports, a bounded-retry
//! connection state machine, an outgoing message queue, and time-windowed
//! replay suppression. All I/O lives behind the driver crate; everything
//! here is pure state plus a `TimeSource` seam.

// ----------------------------------------------------------------------------
// Module Declarations
// ----------------------------------------------------------------------------

pub mod config;
pub mod identity;
pub mod message;
pub mod receiver;
pub mod replay;
pub mod scheduler;
pub mod session;
pub mod types;
pub mod wire;

// ----------------------------------------------------------------------------
// Public API
// ----------------------------------------------------------------------------

pub use config::EngineConfig;
pub use message::{AppMessage, InboundEvent};
pub use receiver::PassiveReceiver;
pub use replay::ReplayFilter;
pub use scheduler::{OutgoingChannel, OutgoingQueue, QueuedMessage, Route};
pub use session::{ClientState, ConnectionSession, SessionEffect, SessionEvent};
pub use types::{Gender, MessageKind, PeerHash, SystemTimeSource, TimeSource, Timestamp};

// ----------------------------------------------------------------------------
// Error Types
// ----------------------------------------------------------------------------

/// Errors raised while encoding or decoding wire frames
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FrameError {
    #[error("buffer too short: expected at least {expected} bytes, got {actual}")]
    TooShort { expected: usize, actual: usize },

    #[error("unknown protocol version {0}")]
    UnknownVersion(u8),

    #[error("unknown message type 0x{0:02x}")]
    UnknownType(u8),

    #[error("chunk total cannot be zero")]
    ZeroChunkTotal,

    #[error("chunk index {index} out of bounds (total {total})")]
    ChunkIndexOutOfBounds { index: u8, total: u8 },

    #[error("chunk header mismatch for message already being reassembled")]
    ChunkHeaderMismatch,

    #[error("payload needs {needed} chunks, transport ceiling is {max}")]
    TooManyChunks { needed: usize, max: usize },

    #[error("payload too large: {size} bytes (max {max})")]
    PayloadTooLarge { size: usize, max: usize },

    #[error("chunk range {offset}+{len} exceeds declared length {total_len}")]
    RangeExceedsTotal {
        offset: usize,
        len: usize,
        total_len: usize,
    },

    #[error("invalid payload encoding: {0}")]
    InvalidPayload(String),
}

/// Errors raised by the connection-session state machine
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SessionError {
    #[error("session busy in state {state:?}")]
    Busy { state: session::ClientState },
}

/// Core error type for the Ember protocol engine
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EmberError {
    #[error("frame error: {0}")]
    Frame(#[from] FrameError),

    #[error("session error: {0}")]
    Session(#[from] SessionError),
}

pub type Result<T> = std::result::Result<T, EmberError>;
