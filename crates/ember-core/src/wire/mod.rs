//! Wire codecs for the two BLE transports
//!
//! Both transports share the same chunking idea (split a body across
//! transport-sized frames, reassemble via a keyed, time-bounded collector)
//! but carry different bit-exact headers: GATT frames address chunks by byte
//! offset within a declared total length, advertising frames by chunk index
//! out of a declared chunk count.

pub mod advertising;
pub mod gatt;

/// How long a partially reassembled message may sit before it is evicted.
/// Collectors are swept on every decode call; there is no background timer.
pub const REASSEMBLY_TIMEOUT_MS: u64 = 10_000;
