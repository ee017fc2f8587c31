//! GATT transport framing and reassembly
//!
//! ## Chunk format
//!
//! Chunks use a bit-exact 7-byte header, big-endian multi-byte fields:
//! - Type: 1 byte (message kind code)
//! - MsgId: 2 bytes (rolling, scoped to the single open session)
//! - TotalLen: 2 bytes (full body length in bytes)
//! - Offset: 2 bytes (byte offset of this chunk within the body)
//! - Data: remaining bytes, at most `mtu - 3 (ATT) - 7 (header)`
//!
//! At the default MTU of 23 that leaves 13 payload bytes per chunk.

use std::collections::{BTreeMap, HashMap};

use crate::types::{MessageKind, Timestamp};
use crate::wire::REASSEMBLY_TIMEOUT_MS;
use crate::FrameError;

// ----------------------------------------------------------------------------
// Constants
// ----------------------------------------------------------------------------

/// Size of the chunk header
pub const GATT_HEADER_LEN: usize = 7;

/// ATT protocol overhead subtracted from the negotiated MTU
pub const ATT_OVERHEAD: usize = 3;

/// Default ATT MTU before negotiation
pub const DEFAULT_MTU: u16 = 23;

/// MTU requested after connecting
pub const TARGET_MTU: u16 = 247;

/// Maximum chunk payload at a given negotiated MTU
pub fn max_chunk_payload(mtu: u16) -> usize {
    (mtu as usize).saturating_sub(ATT_OVERHEAD + GATT_HEADER_LEN)
}

// ----------------------------------------------------------------------------
// Frame
// ----------------------------------------------------------------------------

/// One GATT chunk: header plus payload slice
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GattFrame {
    /// Message kind code of the frame being carried
    pub kind: MessageKind,
    /// Rolling message id, scoped to the single open session
    pub msg_id: u16,
    /// Total body length across all chunks
    pub total_len: u16,
    /// Byte offset of this chunk within the body
    pub offset: u16,
    /// Chunk payload
    pub payload: Vec<u8>,
}

impl GattFrame {
    /// Serialize to wire bytes
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(GATT_HEADER_LEN + self.payload.len());
        bytes.push(self.kind.code());
        bytes.extend_from_slice(&self.msg_id.to_be_bytes());
        bytes.extend_from_slice(&self.total_len.to_be_bytes());
        bytes.extend_from_slice(&self.offset.to_be_bytes());
        bytes.extend_from_slice(&self.payload);
        bytes
    }

    /// Parse from wire bytes
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, FrameError> {
        if bytes.len() < GATT_HEADER_LEN {
            return Err(FrameError::TooShort {
                expected: GATT_HEADER_LEN,
                actual: bytes.len(),
            });
        }
        let kind = MessageKind::from_code(bytes[0]).ok_or(FrameError::UnknownType(bytes[0]))?;
        let msg_id = u16::from_be_bytes([bytes[1], bytes[2]]);
        let total_len = u16::from_be_bytes([bytes[3], bytes[4]]);
        let offset = u16::from_be_bytes([bytes[5], bytes[6]]);
        Ok(Self {
            kind,
            msg_id,
            total_len,
            offset,
            payload: bytes[GATT_HEADER_LEN..].to_vec(),
        })
    }

    /// A chunk whose payload spans the whole declared body is self-complete
    pub fn is_self_complete(&self) -> bool {
        self.offset == 0 && self.payload.len() == self.total_len as usize
    }
}

// ----------------------------------------------------------------------------
// Chunker
// ----------------------------------------------------------------------------

/// Split a message body into GATT chunks sized for the negotiated MTU.
///
/// Bodies longer than `u16::MAX` cannot be described by the header and are
/// rejected outright rather than truncated.
pub fn encode_chunks(
    kind: MessageKind,
    msg_id: u16,
    body: &[u8],
    mtu: u16,
) -> Result<Vec<GattFrame>, FrameError> {
    if body.len() > u16::MAX as usize {
        return Err(FrameError::PayloadTooLarge {
            size: body.len(),
            max: u16::MAX as usize,
        });
    }
    let max_chunk = max_chunk_payload(mtu);
    if max_chunk == 0 {
        return Err(FrameError::PayloadTooLarge {
            size: body.len(),
            max: 0,
        });
    }

    let total_len = body.len() as u16;
    if body.is_empty() {
        return Ok(vec![GattFrame {
            kind,
            msg_id,
            total_len,
            offset: 0,
            payload: Vec::new(),
        }]);
    }

    let frames = body
        .chunks(max_chunk)
        .enumerate()
        .map(|(i, chunk)| GattFrame {
            kind,
            msg_id,
            total_len,
            offset: (i * max_chunk) as u16,
            payload: chunk.to_vec(),
        })
        .collect();
    Ok(frames)
}

// ----------------------------------------------------------------------------
// Reassembler
// ----------------------------------------------------------------------------

/// A partially reassembled message, keyed by msg_id
#[derive(Debug)]
struct Collector {
    kind: MessageKind,
    total_len: u16,
    /// Chunks keyed by byte offset; last write wins on a duplicate offset
    chunks: BTreeMap<u16, Vec<u8>>,
    created_at: Timestamp,
}

impl Collector {
    fn new(kind: MessageKind, total_len: u16, now: Timestamp) -> Self {
        Self {
            kind,
            total_len,
            chunks: BTreeMap::new(),
            created_at: now,
        }
    }

    fn received_len(&self) -> usize {
        self.chunks.values().map(Vec::len).sum()
    }

    fn is_complete(&self) -> bool {
        self.received_len() >= self.total_len as usize
    }

    fn assemble(&self) -> Vec<u8> {
        let mut body = Vec::with_capacity(self.total_len as usize);
        for chunk in self.chunks.values() {
            body.extend_from_slice(chunk);
        }
        body
    }
}

/// A complete message reassembled from GATT chunks
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompleteGattMessage {
    pub kind: MessageKind,
    pub body: Vec<u8>,
}

/// Reassembles chunked GATT writes for the single open server session.
///
/// Only one outbound session is ever open on the remote side, so msg_id is
/// a sufficient collector key here.
#[derive(Debug, Default)]
pub struct GattReassembler {
    collectors: HashMap<u16, Collector>,
}

impl GattReassembler {
    /// Create a new reassembler
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one received chunk.
    ///
    /// Returns `Ok(Some(_))` when the chunk completes a message, `Ok(None)`
    /// when more chunks are needed. A chunk whose `offset + len` exceeds the
    /// declared total is a protocol violation: it is rejected without
    /// touching the collector for that msg_id.
    pub fn accept(
        &mut self,
        frame: GattFrame,
        now: Timestamp,
    ) -> Result<Option<CompleteGattMessage>, FrameError> {
        self.sweep_expired(now);

        if frame.is_self_complete() {
            return Ok(Some(CompleteGattMessage {
                kind: frame.kind,
                body: frame.payload,
            }));
        }

        let end = frame.offset as usize + frame.payload.len();
        if end > frame.total_len as usize {
            return Err(FrameError::RangeExceedsTotal {
                offset: frame.offset as usize,
                len: frame.payload.len(),
                total_len: frame.total_len as usize,
            });
        }

        let collector = self
            .collectors
            .entry(frame.msg_id)
            .or_insert_with(|| Collector::new(frame.kind, frame.total_len, now));

        if collector.kind != frame.kind || collector.total_len != frame.total_len {
            return Err(FrameError::ChunkHeaderMismatch);
        }

        collector.chunks.insert(frame.offset, frame.payload);

        if collector.is_complete() {
            let collector = self.collectors.remove(&frame.msg_id).expect("just inserted");
            Ok(Some(CompleteGattMessage {
                kind: collector.kind,
                body: collector.assemble(),
            }))
        } else {
            Ok(None)
        }
    }

    /// Drop every partial message, used when the session is torn down
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

    fn now_at(ms: u64) -> Timestamp {
        Timestamp::new(ms)
    }

    #[test]
    fn test_header_layout() {
        let frame = GattFrame {
            kind: MessageKind::Chat,
            msg_id: 0x0102,
            total_len: 0x0304,
            offset: 0x0506,
            payload: b"hey".to_vec(),
        };
        let bytes = frame.to_bytes();
        assert_eq!(bytes.len(), GATT_HEADER_LEN + 3);
        assert_eq!(bytes[0], 0x05);
        assert_eq!(&bytes[1..3], &[0x01, 0x02]);
        assert_eq!(&bytes[3..5], &[0x03, 0x04]);
        assert_eq!(&bytes[5..7], &[0x05, 0x06]);
        assert_eq!(&bytes[7..], b"hey");

        assert_eq!(GattFrame::from_bytes(&bytes).unwrap(), frame);
    }

    #[test]
    fn test_short_buffer_rejected() {
        assert!(matches!(
            GattFrame::from_bytes(&[0x05, 0x00, 0x01]),
            Err(FrameError::TooShort { .. })
        ));
    }

    #[test]
    fn test_unknown_type_rejected() {
        let mut bytes = vec![0xEE];
        bytes.extend_from_slice(&[0; 6]);
        assert_eq!(
            GattFrame::from_bytes(&bytes),
            Err(FrameError::UnknownType(0xEE))
        );
    }

    #[test]
    fn test_default_mtu_chunk_size() {
        assert_eq!(max_chunk_payload(DEFAULT_MTU), 13);
        assert_eq!(max_chunk_payload(TARGET_MTU), 237);
    }

    #[test]
    fn test_chunking_at_default_mtu() {
        let body = vec![0xAA; 30];
        let frames = encode_chunks(MessageKind::Chat, 7, &body, DEFAULT_MTU).unwrap();
        assert_eq!(frames.len(), 3); // 13 + 13 + 4
        assert_eq!(frames[0].offset, 0);
        assert_eq!(frames[1].offset, 13);
        assert_eq!(frames[2].offset, 26);
        assert_eq!(frames[2].payload.len(), 4);
        assert!(frames.iter().all(|f| f.total_len == 30 && f.msg_id == 7));
    }

    #[test]
    fn test_oversized_body_rejected() {
        let body = vec![0u8; u16::MAX as usize + 1];
        assert!(matches!(
            encode_chunks(MessageKind::Photo, 1, &body, TARGET_MTU),
            Err(FrameError::PayloadTooLarge { .. })
        ));
    }

    #[test]
    fn test_reassembly_out_of_order() {
        let body: Vec<u8> = (0..40).collect();
        let frames = encode_chunks(MessageKind::Chat, 9, &body, DEFAULT_MTU).unwrap();
        assert_eq!(frames.len(), 4);

        let mut reassembler = GattReassembler::new();
        let mut complete = None;
        for frame in frames.into_iter().rev() {
            if let Some(msg) = reassembler.accept(frame, now_at(0)).unwrap() {
                complete = Some(msg);
            }
        }
        let msg = complete.expect("all chunks delivered");
        assert_eq!(msg.kind, MessageKind::Chat);
        assert_eq!(msg.body, body);
        assert_eq!(reassembler.pending_count(), 0);
    }

    #[test]
    fn test_single_chunk_skips_collector() {
        let frames = encode_chunks(MessageKind::Unmatch, 3, &[], DEFAULT_MTU).unwrap();
        assert_eq!(frames.len(), 1);
        let mut reassembler = GattReassembler::new();
        let msg = reassembler
            .accept(frames[0].clone(), now_at(0))
            .unwrap()
            .unwrap();
        assert_eq!(msg.kind, MessageKind::Unmatch);
        assert!(msg.body.is_empty());
        assert_eq!(reassembler.pending_count(), 0);
    }

    #[test]
    fn test_range_violation_leaves_collector_untouched() {
        let body: Vec<u8> = (0..26).collect();
        let frames = encode_chunks(MessageKind::Chat, 11, &body, DEFAULT_MTU).unwrap();
        assert_eq!(frames.len(), 2);

        let mut reassembler = GattReassembler::new();
        assert!(reassembler
            .accept(frames[0].clone(), now_at(0))
            .unwrap()
            .is_none());

        // Lying header: payload runs past the declared total
        let bad = GattFrame {
            kind: MessageKind::Chat,
            msg_id: 11,
            total_len: 26,
            offset: 20,
            payload: vec![0; 10],
        };
        assert!(matches!(
            reassembler.accept(bad, now_at(0)),
            Err(FrameError::RangeExceedsTotal { .. })
        ));
        assert_eq!(reassembler.pending_count(), 1);

        // The genuine second chunk still completes the message
        let msg = reassembler
            .accept(frames[1].clone(), now_at(0))
            .unwrap()
            .unwrap();
        assert_eq!(msg.body, body);
    }

    #[test]
    fn test_duplicate_offset_last_write_wins() {
        let body: Vec<u8> = (0..26).collect();
        let frames = encode_chunks(MessageKind::Chat, 5, &body, DEFAULT_MTU).unwrap();

        let mut reassembler = GattReassembler::new();
        let mut stale = frames[0].clone();
        stale.payload = vec![0xFF; 13];
        assert!(reassembler.accept(stale, now_at(0)).unwrap().is_none());
        assert!(reassembler
            .accept(frames[0].clone(), now_at(0))
            .unwrap()
            .is_none());
        let msg = reassembler
            .accept(frames[1].clone(), now_at(0))
            .unwrap()
            .unwrap();
        assert_eq!(msg.body, body);
    }

    #[test]
    fn test_expired_collector_swept() {
        let body: Vec<u8> = (0..26).collect();
        let frames = encode_chunks(MessageKind::Chat, 2, &body, DEFAULT_MTU).unwrap();

        let mut reassembler = GattReassembler::new();
        assert!(reassembler
            .accept(frames[0].clone(), now_at(0))
            .unwrap()
            .is_none());
        assert_eq!(reassembler.pending_count(), 1);

        // The second chunk arrives past the reassembly deadline; the stale
        // collector is evicted and the chunk starts a fresh one.
        assert!(reassembler
            .accept(frames[1].clone(), now_at(REASSEMBLY_TIMEOUT_MS + 1))
            .unwrap()
            .is_none());
        assert_eq!(reassembler.pending_count(), 1);
    }

    #[test]
    fn test_clear_purges_partials() {
        let body: Vec<u8> = (0..26).collect();
        let frames = encode_chunks(MessageKind::Chat, 2, &body, DEFAULT_MTU).unwrap();
        let mut reassembler = GattReassembler::new();
        reassembler.accept(frames[0].clone(), now_at(0)).unwrap();
        reassembler.clear();
        assert_eq!(reassembler.pending_count(), 0);
    }
}
