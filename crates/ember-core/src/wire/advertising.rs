//! Advertising transport framing and reassembly
//!
//! ## Frame format
//!
//! Frames ride in the manufacturer-data field of a BLE advertisement. The
//! company prefix (2 bytes) is handled by the platform layer; everything
//! here fits in the remaining 24-byte budget.
//!
//! - Version: 1 byte (currently 1)
//! - Type: 1 byte (message kind code)
//! - SenderHash: 4 bytes
//! - Gender: 1 byte, match request/response frames only
//! - TargetHash: 4 bytes (all-zero = broadcast)
//! - MsgId: 1 byte (rolling, scoped to the sender/target pair)
//! - ChunkIndex: 1 byte
//! - ChunkTotal: 1 byte
//! - Data: remaining bytes (≤11, or ≤10 when the gender byte is present)

use std::collections::{BTreeMap, HashMap};

use crate::types::{Gender, MessageKind, PeerHash, Timestamp};
use crate::wire::REASSEMBLY_TIMEOUT_MS;
use crate::FrameError;

// ----------------------------------------------------------------------------
// Constants
// ----------------------------------------------------------------------------

/// Current advertising frame version
pub const ADV_VERSION: u8 = 1;

/// Manufacturer-data budget after the 2-byte company prefix is deducted
pub const MANUFACTURER_DATA_BUDGET: usize = 24;

/// Header size for ordinary frames
pub const ADV_HEADER_LEN: usize = 13;

/// Header size for match request/response frames (extra gender byte)
pub const ADV_MATCH_HEADER_LEN: usize = 14;

/// Hard transport ceiling on chunks per message (1-byte chunk counter)
pub const MAX_CHUNKS: usize = 255;

/// Maximum chunk payload for a given message kind
pub fn max_chunk_payload(kind: MessageKind) -> usize {
    if kind.carries_gender() {
        MANUFACTURER_DATA_BUDGET - ADV_MATCH_HEADER_LEN
    } else {
        MANUFACTURER_DATA_BUDGET - ADV_HEADER_LEN
    }
}

// ----------------------------------------------------------------------------
// Frame
// ----------------------------------------------------------------------------

/// One advertising chunk: header plus payload slice
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdvFrame {
    pub kind: MessageKind,
    pub sender: PeerHash,
    /// Present iff the kind carries gender in the header
    pub gender: Option<Gender>,
    /// All-zero target means broadcast
    pub target: PeerHash,
    pub msg_id: u8,
    pub chunk_index: u8,
    pub chunk_total: u8,
    pub payload: Vec<u8>,
}

impl AdvFrame {
    /// Validate header invariants
    pub fn validate(&self) -> Result<(), FrameError> {
        if self.chunk_total == 0 {
            return Err(FrameError::ZeroChunkTotal);
        }
        if self.chunk_index >= self.chunk_total {
            return Err(FrameError::ChunkIndexOutOfBounds {
                index: self.chunk_index,
                total: self.chunk_total,
            });
        }
        Ok(())
    }

    /// Serialize to wire bytes (excluding the company prefix)
    pub fn to_bytes(&self) -> Vec<u8> {
        let header_len = if self.kind.carries_gender() {
            ADV_MATCH_HEADER_LEN
        } else {
            ADV_HEADER_LEN
        };
        let mut bytes = Vec::with_capacity(header_len + self.payload.len());
        bytes.push(ADV_VERSION);
        bytes.push(self.kind.code());
        bytes.extend_from_slice(self.sender.as_bytes());
        if self.kind.carries_gender() {
            bytes.push(self.gender.unwrap_or_default().code());
        }
        bytes.extend_from_slice(self.target.as_bytes());
        bytes.push(self.msg_id);
        bytes.push(self.chunk_index);
        bytes.push(self.chunk_total);
        bytes.extend_from_slice(&self.payload);
        bytes
    }

    /// Parse from wire bytes (excluding the company prefix)
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, FrameError> {
        if bytes.len() < ADV_HEADER_LEN {
            return Err(FrameError::TooShort {
                expected: ADV_HEADER_LEN,
                actual: bytes.len(),
            });
        }
        if bytes[0] != ADV_VERSION {
            return Err(FrameError::UnknownVersion(bytes[0]));
        }
        let kind = MessageKind::from_code(bytes[1]).ok_or(FrameError::UnknownType(bytes[1]))?;
        let sender = PeerHash::from_bytes(&bytes[2..6]);

        let (gender, rest) = if kind.carries_gender() {
            if bytes.len() < ADV_MATCH_HEADER_LEN {
                return Err(FrameError::TooShort {
                    expected: ADV_MATCH_HEADER_LEN,
                    actual: bytes.len(),
                });
            }
            (Some(Gender::from_code(bytes[6])), &bytes[7..])
        } else {
            (None, &bytes[6..])
        };

        let frame = Self {
            kind,
            sender,
            gender,
            target: PeerHash::from_bytes(&rest[0..4]),
            msg_id: rest[4],
            chunk_index: rest[5],
            chunk_total: rest[6],
            payload: rest[7..].to_vec(),
        };
        frame.validate()?;
        Ok(frame)
    }
}

// ----------------------------------------------------------------------------
// Chunker
// ----------------------------------------------------------------------------

/// Split a message body into advertising chunks.
///
/// Bodies needing more than 255 chunks exceed the 1-byte chunk counter and
/// are rejected outright rather than silently truncated; this is a hard
/// transport ceiling, not a policy choice.
pub fn encode_chunks(
    kind: MessageKind,
    sender: PeerHash,
    gender: Option<Gender>,
    target: PeerHash,
    msg_id: u8,
    body: &[u8],
) -> Result<Vec<AdvFrame>, FrameError> {
    let max_chunk = max_chunk_payload(kind);
    let total = if body.is_empty() {
        1
    } else {
        body.len().div_ceil(max_chunk)
    };
    if total > MAX_CHUNKS {
        return Err(FrameError::TooManyChunks {
            needed: total,
            max: MAX_CHUNKS,
        });
    }

    let gender = if kind.carries_gender() { gender } else { None };
    let mut frames = Vec::with_capacity(total);
    for index in 0..total {
        let start = index * max_chunk;
        let end = core::cmp::min(start + max_chunk, body.len());
        frames.push(AdvFrame {
            kind,
            sender,
            gender,
            target,
            msg_id,
            chunk_index: index as u8,
            chunk_total: total as u8,
            payload: body[start..end].to_vec(),
        });
    }
    Ok(frames)
}

// ----------------------------------------------------------------------------
// Reassembler
// ----------------------------------------------------------------------------

/// A complete message reassembled from advertising chunks
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompleteAdvMessage {
    pub kind: MessageKind,
    pub sender: PeerHash,
    pub gender: Option<Gender>,
    pub target: PeerHash,
    pub body: Vec<u8>,
}

impl CompleteAdvMessage {
    fn from_frame_meta(frame: &AdvFrame, body: Vec<u8>) -> Self {
        Self {
            kind: frame.kind,
            sender: frame.sender,
            gender: frame.gender,
            target: frame.target,
            body,
        }
    }
}

#[derive(Debug)]
struct Collector {
    kind: MessageKind,
    gender: Option<Gender>,
    chunk_total: u8,
    chunks: BTreeMap<u8, Vec<u8>>,
    created_at: Timestamp,
}

/// Reassembles chunked advertising messages, keyed by
/// `(sender, target, msg_id)`.
#[derive(Debug, Default)]
pub struct AdvReassembler {
    collectors: HashMap<(PeerHash, PeerHash, u8), Collector>,
}

impl AdvReassembler {
    /// Create a new reassembler
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one received frame.
    ///
    /// Returns `Ok(Some(_))` when the frame completes a message, `Ok(None)`
    /// when more chunks are needed (the caller keeps listening; a partial
    /// receipt is not an error).
    pub fn accept(
        &mut self,
        frame: AdvFrame,
        now: Timestamp,
    ) -> Result<Option<CompleteAdvMessage>, FrameError> {
        self.sweep_expired(now);
        frame.validate()?;

        if frame.chunk_total == 1 {
            let body = frame.payload.clone();
            return Ok(Some(CompleteAdvMessage::from_frame_meta(&frame, body)));
        }

        let key = (frame.sender, frame.target, frame.msg_id);
        let collector = self.collectors.entry(key).or_insert_with(|| Collector {
            kind: frame.kind,
            gender: frame.gender,
            chunk_total: frame.chunk_total,
            chunks: BTreeMap::new(),
            created_at: now,
        });

        if collector.kind != frame.kind || collector.chunk_total != frame.chunk_total {
            return Err(FrameError::ChunkHeaderMismatch);
        }

        // Last write wins on a duplicate index; no integrity check beyond presence
        collector.chunks.insert(frame.chunk_index, frame.payload.clone());

        if collector.chunks.len() == collector.chunk_total as usize {
            let collector = self.collectors.remove(&key).expect("just inserted");
            let mut body = Vec::new();
            for chunk in collector.chunks.values() {
                body.extend_from_slice(chunk);
            }
            Ok(Some(CompleteAdvMessage {
                kind: collector.kind,
                sender: frame.sender,
                gender: collector.gender,
                target: frame.target,
                body,
            }))
        } else {
            Ok(None)
        }
    }

    /// Drop every partial message
    pub fn clear(&mut self) {
        self.collectors.clear();
    }

    /// Number of partially reassembled messages
    pub fn pending_count(&self) -> usize {
        self.collectors.len()
    }

    fn sweep_expired(&mut self, now: Timestamp) {
        self.collectors
            .retain(|_, c| now.millis_since(c.created_at) <= REASSEMBLY_TIMEOUT_MS);
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn sender() -> PeerHash {
        PeerHash::new([1, 2, 3, 4])
    }

    fn target() -> PeerHash {
        PeerHash::new([5, 6, 7, 8])
    }

    fn now_at(ms: u64) -> Timestamp {
        Timestamp::new(ms)
    }

    #[test]
    fn test_plain_header_layout() {
        let frame = AdvFrame {
            kind: MessageKind::Chat,
            sender: sender(),
            gender: None,
            target: target(),
            msg_id: 42,
            chunk_index: 0,
            chunk_total: 1,
            payload: b"hi".to_vec(),
        };
        let bytes = frame.to_bytes();
        assert_eq!(bytes.len(), ADV_HEADER_LEN + 2);
        assert_eq!(bytes[0], ADV_VERSION);
        assert_eq!(bytes[1], 0x05);
        assert_eq!(&bytes[2..6], &[1, 2, 3, 4]);
        assert_eq!(&bytes[6..10], &[5, 6, 7, 8]);
        assert_eq!(bytes[10], 42);
        assert_eq!(bytes[11], 0);
        assert_eq!(bytes[12], 1);
        assert_eq!(&bytes[13..], b"hi");

        assert_eq!(AdvFrame::from_bytes(&bytes).unwrap(), frame);
    }

    #[test]
    fn test_match_header_carries_gender() {
        let frame = AdvFrame {
            kind: MessageKind::MatchRequest,
            sender: sender(),
            gender: Some(Gender::Female),
            target: target(),
            msg_id: 7,
            chunk_index: 0,
            chunk_total: 1,
            payload: Vec::new(),
        };
        let bytes = frame.to_bytes();
        assert_eq!(bytes.len(), ADV_MATCH_HEADER_LEN);
        assert_eq!(bytes[1], 0x02);
        // Gender sits immediately after the sender hash, before the target
        assert_eq!(bytes[6], Gender::Female.code());
        assert_eq!(&bytes[7..11], &[5, 6, 7, 8]);

        assert_eq!(AdvFrame::from_bytes(&bytes).unwrap(), frame);
    }

    #[test]
    fn test_match_frame_too_short_for_extended_header() {
        let mut bytes = AdvFrame {
            kind: MessageKind::MatchRequest,
            sender: sender(),
            gender: Some(Gender::Male),
            target: target(),
            msg_id: 1,
            chunk_index: 0,
            chunk_total: 1,
            payload: Vec::new(),
        }
        .to_bytes();
        bytes.truncate(ADV_HEADER_LEN);
        assert!(matches!(
            AdvFrame::from_bytes(&bytes),
            Err(FrameError::TooShort { .. })
        ));
    }

    #[test]
    fn test_unknown_version_rejected() {
        let mut bytes = AdvFrame {
            kind: MessageKind::Presence,
            sender: sender(),
            gender: None,
            target: PeerHash::BROADCAST,
            msg_id: 0,
            chunk_index: 0,
            chunk_total: 1,
            payload: vec![1],
        }
        .to_bytes();
        bytes[0] = 9;
        assert_eq!(
            AdvFrame::from_bytes(&bytes),
            Err(FrameError::UnknownVersion(9))
        );
    }

    #[test]
    fn test_zero_chunk_total_rejected() {
        let mut bytes = AdvFrame {
            kind: MessageKind::Chat,
            sender: sender(),
            gender: None,
            target: target(),
            msg_id: 1,
            chunk_index: 0,
            chunk_total: 1,
            payload: Vec::new(),
        }
        .to_bytes();
        bytes[12] = 0;
        assert_eq!(AdvFrame::from_bytes(&bytes), Err(FrameError::ZeroChunkTotal));
    }

    #[test]
    fn test_payload_budgets() {
        assert_eq!(max_chunk_payload(MessageKind::Chat), 11);
        assert_eq!(max_chunk_payload(MessageKind::MatchRequest), 10);
        assert_eq!(max_chunk_payload(MessageKind::Photo), 11);
    }

    #[test]
    fn test_fifty_byte_chat_makes_five_chunks() {
        let body = vec![0x61; 50];
        let frames = encode_chunks(
            MessageKind::Chat,
            sender(),
            None,
            target(),
            3,
            &body,
        )
        .unwrap();
        assert_eq!(frames.len(), 5); // ceil(50 / 11)
        for (i, frame) in frames.iter().enumerate() {
            assert_eq!(frame.chunk_index, i as u8);
            assert_eq!(frame.chunk_total, 5);
        }
        assert_eq!(frames[4].payload.len(), 6);
    }

    #[test]
    fn test_chunk_ceiling_rejected() {
        let body = vec![0u8; 256 * 11];
        assert!(matches!(
            encode_chunks(MessageKind::Photo, sender(), None, target(), 1, &body),
            Err(FrameError::TooManyChunks { .. })
        ));
    }

    #[test]
    fn test_reassembly_any_arrival_order() {
        let body: Vec<u8> = (0..50).collect();
        let frames =
            encode_chunks(MessageKind::Chat, sender(), None, target(), 8, &body).unwrap();
        assert_eq!(frames.len(), 5);

        // Shuffle deterministically: deliver odd indices first, then even
        let mut order: Vec<AdvFrame> = Vec::new();
        order.extend(frames.iter().filter(|f| f.chunk_index % 2 == 1).cloned());
        order.extend(frames.iter().filter(|f| f.chunk_index % 2 == 0).cloned());

        let mut reassembler = AdvReassembler::new();
        let mut complete = None;
        for frame in order {
            if let Some(msg) = reassembler.accept(frame, now_at(0)).unwrap() {
                complete = Some(msg);
            }
        }
        let msg = complete.expect("all five chunks arrived");
        assert_eq!(msg.body, body);
        assert_eq!(msg.sender, sender());
        assert_eq!(msg.target, target());
    }

    #[test]
    fn test_single_chunk_never_enters_collector() {
        let frames = encode_chunks(
            MessageKind::Block,
            sender(),
            None,
            target(),
            1,
            &[],
        )
        .unwrap();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].chunk_total, 1);

        let mut reassembler = AdvReassembler::new();
        let msg = reassembler
            .accept(frames[0].clone(), now_at(0))
            .unwrap()
            .unwrap();
        assert_eq!(msg.kind, MessageKind::Block);
        assert_eq!(reassembler.pending_count(), 0);
    }

    #[test]
    fn test_collectors_keyed_per_sender_pair() {
        let body = vec![0x42; 20];
        let a = encode_chunks(MessageKind::Chat, sender(), None, target(), 5, &body).unwrap();
        let other = PeerHash::new([9, 9, 9, 9]);
        let b = encode_chunks(MessageKind::Chat, other, None, target(), 5, &body).unwrap();

        let mut reassembler = AdvReassembler::new();
        assert!(reassembler.accept(a[0].clone(), now_at(0)).unwrap().is_none());
        assert!(reassembler.accept(b[0].clone(), now_at(0)).unwrap().is_none());
        assert_eq!(reassembler.pending_count(), 2);

        let msg = reassembler.accept(a[1].clone(), now_at(0)).unwrap().unwrap();
        assert_eq!(msg.sender, sender());
        assert_eq!(reassembler.pending_count(), 1);
    }

    #[test]
    fn test_expired_partial_swept_on_decode() {
        let body = vec![0x42; 20];
        let frames =
            encode_chunks(MessageKind::Chat, sender(), None, target(), 5, &body).unwrap();

        let mut reassembler = AdvReassembler::new();
        reassembler.accept(frames[0].clone(), now_at(0)).unwrap();
        assert_eq!(reassembler.pending_count(), 1);

        // Unrelated decode past the deadline sweeps the stale collector
        let single = encode_chunks(
            MessageKind::PhotoRequest,
            sender(),
            None,
            target(),
            6,
            &[],
        )
        .unwrap();
        reassembler
            .accept(single[0].clone(), now_at(REASSEMBLY_TIMEOUT_MS + 1))
            .unwrap();
        assert_eq!(reassembler.pending_count(), 0);
    }
}
