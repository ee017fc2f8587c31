//! Core types for the Ember protocol
//!
//! Newtype wrappers for peer identities and timestamps, plus the message
//! kind and gender codes that appear on the wire.

use core::fmt;
use core::str::FromStr;
use serde::{Deserialize, Serialize};

// ----------------------------------------------------------------------------
// Peer Hash
// ----------------------------------------------------------------------------

/// Identity of a peer: 4-byte truncated SHA-256 of an opaque local user id.
///
/// This is a non-secret routing key, not an authentication token. Rendered
/// as lowercase hex wherever it crosses a component boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PeerHash([u8; 4]);

impl PeerHash {
    /// All-zero hash used as the broadcast target in advertising frames
    pub const BROADCAST: Self = Self([0u8; 4]);

    /// Create a new PeerHash from 4 bytes
    pub fn new(bytes: [u8; 4]) -> Self {
        Self(bytes)
    }

    /// Create a PeerHash from the first 4 bytes of a longer buffer
    pub fn from_bytes(bytes: &[u8]) -> Self {
        let mut id = [0u8; 4];
        let len = core::cmp::min(bytes.len(), 4);
        id[..len].copy_from_slice(&bytes[..len]);
        Self(id)
    }

    /// Get the raw bytes
    pub fn as_bytes(&self) -> &[u8; 4] {
        &self.0
    }

    /// Whether this is the broadcast target
    pub fn is_broadcast(&self) -> bool {
        *self == Self::BROADCAST
    }
}

impl fmt::Display for PeerHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

impl FromStr for PeerHash {
    type Err = crate::FrameError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let clean = s.strip_prefix("0x").unwrap_or(s);
        let bytes = hex::decode(clean)
            .map_err(|_| crate::FrameError::InvalidPayload("invalid hex in peer hash".into()))?;
        if bytes.len() != 4 {
            return Err(crate::FrameError::InvalidPayload(
                "peer hash must be exactly 4 bytes".into(),
            ));
        }
        Ok(Self::from_bytes(&bytes))
    }
}

// ----------------------------------------------------------------------------
// Gender
// ----------------------------------------------------------------------------

/// Gender code carried in presence bodies and match frame headers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum Gender {
    Unspecified = 0,
    Male = 1,
    Female = 2,
    Other = 3,
}

impl Gender {
    /// Get the wire code
    pub fn code(&self) -> u8 {
        *self as u8
    }

    /// Decode a wire code. Unknown codes map to `Other` rather than failing
    /// the frame; presence information is best-effort.
    pub fn from_code(code: u8) -> Self {
        match code {
            0 => Gender::Unspecified,
            1 => Gender::Male,
            2 => Gender::Female,
            _ => Gender::Other,
        }
    }
}

impl Default for Gender {
    fn default() -> Self {
        Gender::Unspecified
    }
}

// ----------------------------------------------------------------------------
// Message Kind
// ----------------------------------------------------------------------------

/// Application-level message type codes (shared by both transports)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum MessageKind {
    Presence = 0x01,
    MatchRequest = 0x02,
    MatchAccept = 0x03,
    MatchReject = 0x04,
    Chat = 0x05,
    Unmatch = 0x06,
    Block = 0x07,
    Photo = 0x08,
    PhotoRequest = 0x09,
}

impl MessageKind {
    /// Get the wire code
    pub fn code(&self) -> u8 {
        *self as u8
    }

    /// Decode a wire code
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0x01 => Some(MessageKind::Presence),
            0x02 => Some(MessageKind::MatchRequest),
            0x03 => Some(MessageKind::MatchAccept),
            0x04 => Some(MessageKind::MatchReject),
            0x05 => Some(MessageKind::Chat),
            0x06 => Some(MessageKind::Unmatch),
            0x07 => Some(MessageKind::Block),
            0x08 => Some(MessageKind::Photo),
            0x09 => Some(MessageKind::PhotoRequest),
            _ => None,
        }
    }

    /// Match request/response frames carry the sender's gender in the
    /// advertising header, extending it to 14 bytes.
    pub fn carries_gender(&self) -> bool {
        matches!(
            self,
            MessageKind::MatchRequest | MessageKind::MatchAccept | MessageKind::MatchReject
        )
    }

    /// Kinds whose replay key folds in a content hash, so distinct payloads
    /// to the same peer are not suppressed as duplicates.
    pub fn is_content_addressed(&self) -> bool {
        matches!(self, MessageKind::Chat | MessageKind::Photo)
    }
}

// ----------------------------------------------------------------------------
// Timestamp
// ----------------------------------------------------------------------------

/// Millisecond timestamp since Unix epoch
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Timestamp(u64);

impl Timestamp {
    /// Create a new timestamp
    pub fn new(millis: u64) -> Self {
        Self(millis)
    }

    /// Get current wall-clock time
    pub fn now() -> Self {
        use std::time::{SystemTime, UNIX_EPOCH};
        let duration = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default();
        Self(duration.as_millis() as u64)
    }

    /// Get the raw milliseconds
    pub fn as_millis(&self) -> u64 {
        self.0
    }

    /// Milliseconds elapsed since an earlier timestamp (saturating)
    pub fn millis_since(&self, earlier: Self) -> u64 {
        self.0.saturating_sub(earlier.0)
    }
}

// ----------------------------------------------------------------------------
// Time Source Trait
// ----------------------------------------------------------------------------

/// Seam for obtaining the current time, so replay windows and reassembly
/// timeouts are testable against a mock clock.
pub trait TimeSource {
    /// Get the current timestamp
    fn now(&self) -> Timestamp;
}

/// Standard wall-clock implementation of TimeSource
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemTimeSource;

impl SystemTimeSource {
    pub fn new() -> Self {
        Self
    }
}

impl TimeSource for SystemTimeSource {
    fn now(&self) -> Timestamp {
        Timestamp::now()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
