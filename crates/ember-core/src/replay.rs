//! Time-windowed replay suppression
//!
//! Both transports are lossy and senders re-broadcast, so every logical
//! message can arrive several times. A `ReplayFilter` answers "have I
//! already accepted this key inside the window". Expired entries are swept
//! on every call; there is no background timer.

use std::collections::HashMap;

use sha2::{Digest, Sha256};

use crate::types::{MessageKind, PeerHash, TimeSource, Timestamp};

// ----------------------------------------------------------------------------
// Window Constants
// ----------------------------------------------------------------------------

/// Generic inbound de-duplication window
pub const GENERIC_WINDOW_MS: u64 = 45_000;

/// Per-sender match-request cooldown (spam control on re-proposals)
pub const MATCH_REQUEST_WINDOW_MS: u64 = 60_000;

/// UI-notification de-duplication window
pub const NOTIFICATION_WINDOW_MS: u64 = 60_000;

/// Match-request notification cooldown
pub const MATCH_NOTIFICATION_WINDOW_MS: u64 = 120_000;

// ----------------------------------------------------------------------------
// Replay Filter
// ----------------------------------------------------------------------------

/// A time-windowed set of accepted message keys.
///
/// `check` returns `true` and records the key at most once per window;
/// repeated calls with the same key inside the window return `false`.
pub struct ReplayFilter<T: TimeSource> {
    window_ms: u64,
    seen: HashMap<String, Timestamp>,
    time_source: T,
}

impl<T: TimeSource> ReplayFilter<T> {
    /// Create a filter with an explicit window
    pub fn new(window_ms: u64, time_source: T) -> Self {
        Self {
            window_ms,
            seen: HashMap::new(),
            time_source,
        }
    }

    /// Filter for generic inbound frames
    pub fn for_inbound(time_source: T) -> Self {
        Self::new(GENERIC_WINDOW_MS, time_source)
    }

    /// Filter for match-request spam control
    pub fn for_match_requests(time_source: T) -> Self {
        Self::new(MATCH_REQUEST_WINDOW_MS, time_source)
    }

    /// Filter for UI-notification de-duplication
    pub fn for_notifications(time_source: T) -> Self {
        Self::new(NOTIFICATION_WINDOW_MS, time_source)
    }

    /// Filter for match-request notification cooldown
    pub fn for_match_notifications(time_source: T) -> Self {
        Self::new(MATCH_NOTIFICATION_WINDOW_MS, time_source)
    }

    /// Should this key be processed? True at most once per key per window.
    pub fn check(&mut self, key: &str) -> bool {
        let now = self.time_source.now();
        self.sweep(now);

        if self.seen.contains_key(key) {
            return false;
        }
        self.seen.insert(key.to_string(), now);
        true
    }

    /// Number of live entries (post-sweep counts require a `check` first)
    pub fn len(&self) -> usize {
        self.seen.len()
    }

    /// Whether the filter holds no live entries
    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }

    /// Drop all entries
    pub fn clear(&mut self) {
        self.seen.clear();
    }

    fn sweep(&mut self, now: Timestamp) {
        let window = self.window_ms;
        self.seen
            .retain(|_, first_seen| now.millis_since(*first_seen) <= window);
    }
}

// ----------------------------------------------------------------------------
// Key Builders
// ----------------------------------------------------------------------------

/// Replay key for a sender/kind pair
pub fn message_key(sender: &PeerHash, kind: MessageKind) -> String {
    format!("{}:{:02x}", sender, kind.code())
}

/// Replay key folding in a content hash, for kinds where distinct payloads
/// to the same peer must not suppress each other (chat, photo).
pub fn content_key(sender: &PeerHash, kind: MessageKind, body: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(body);
    let digest = hasher.finalize();
    format!("{}:{:02x}:{}", sender, kind.code(), hex::encode(&digest[..8]))
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
