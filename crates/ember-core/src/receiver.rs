//! Inbound pipeline: decode, filter, dispatch
//!
//! The receiver owns both reassemblers and the replay filters. Raw bytes go
//! in (manufacturer data from a scan callback, or a characteristic write on
//! the server side), typed `InboundEvent`s come out. Frames that are not for
//! us, echoes of our own advertising, replays inside their window and
//! traffic from blocked peers are all swallowed here so the application
//! never sees them.

use std::collections::HashSet;

use tracing::{debug, trace};

use crate::message::InboundEvent;
use crate::replay::{content_key, message_key, ReplayFilter};
use crate::types::{Gender, MessageKind, PeerHash, TimeSource};
use crate::wire::advertising::{AdvFrame, AdvReassembler};
use crate::wire::gatt::{GattFrame, GattReassembler};
use crate::FrameError;

// ----------------------------------------------------------------------------
// Passive Receiver
// ----------------------------------------------------------------------------

/// Stateful inbound pipeline for one local identity.
///
/// GATT chunk payloads carry a 4-byte sender-hash prefix ahead of the
/// canonical body, because the GATT header has no sender field; the prefix
/// is stripped here. Advertising frames carry the sender in the header.
pub struct PassiveReceiver<T: TimeSource + Clone> {
    local: PeerHash,
    time_source: T,
    adv_reassembler: AdvReassembler,
    gatt_reassembler: GattReassembler,
    inbound_filter: ReplayFilter<T>,
    match_request_filter: ReplayFilter<T>,
    blocked: HashSet<PeerHash>,
}

impl<T: TimeSource + Clone> PassiveReceiver<T> {
    /// Create a receiver for the given local identity
    pub fn new(local: PeerHash, time_source: T) -> Self {
        Self {
            local,
            adv_reassembler: AdvReassembler::new(),
            gatt_reassembler: GattReassembler::new(),
            inbound_filter: ReplayFilter::for_inbound(time_source.clone()),
            match_request_filter: ReplayFilter::for_match_requests(time_source.clone()),
            blocked: HashSet::new(),
            time_source,
        }
    }

    /// Feed raw manufacturer data from a scan result (company prefix
    /// already stripped by the platform layer).
    ///
    /// `Ok(None)` covers the quiet outcomes: a chunk that did not complete
    /// a message, our own echo, a frame addressed elsewhere, a replay.
    pub fn handle_advertisement(&mut self, data: &[u8]) -> Result<Option<InboundEvent>, FrameError> {
        let frame = AdvFrame::from_bytes(data)?;

        if frame.sender == self.local {
            trace!("own advertising echo dropped");
            return Ok(None);
        }
        if !frame.target.is_broadcast() && frame.target != self.local {
            trace!(target = %frame.target, "frame addressed to another peer");
            return Ok(None);
        }

        let now = self.time_source.now();
        let complete = match self.adv_reassembler.accept(frame, now)? {
            Some(complete) => complete,
            None => return Ok(None),
        };

        self.dispatch(complete.kind, complete.sender, complete.gender, &complete.body)
    }

    /// Feed one GATT chunk written to our server by a connected peer.
    pub fn handle_gatt_frame(&mut self, data: &[u8]) -> Result<Option<InboundEvent>, FrameError> {
        let frame = GattFrame::from_bytes(data)?;
        let now = self.time_source.now();
        let complete = match self.gatt_reassembler.accept(frame, now)? {
            Some(complete) => complete,
            None => return Ok(None),
        };

        if complete.body.len() < 4 {
            return Err(FrameError::TooShort {
                expected: 4,
                actual: complete.body.len(),
            });
        }
        let sender = PeerHash::from_bytes(&complete.body[..4]);
        if sender == self.local {
            return Ok(None);
        }

        self.dispatch(complete.kind, sender, None, &complete.body[4..])
    }

    /// Drop a peer's traffic from now on
    pub fn block_peer(&mut self, peer: PeerHash) {
        self.blocked.insert(peer);
    }

    /// Resume accepting a peer's traffic
    pub fn unblock_peer(&mut self, peer: PeerHash) {
        self.blocked.remove(&peer);
    }

    /// Whether the peer is currently blocked
    pub fn is_blocked(&self, peer: &PeerHash) -> bool {
        self.blocked.contains(peer)
    }

    /// Drop all partially reassembled messages; the session machine calls
    /// this when an attempt fails terminally.
    pub fn purge_reassembly(&mut self) {
        self.adv_reassembler.clear();
        self.gatt_reassembler.clear();
    }

    /// Partial messages currently buffered across both transports
    pub fn pending_count(&self) -> usize {
        self.adv_reassembler.pending_count() + self.gatt_reassembler.pending_count()
    }

    fn dispatch(
        &mut self,
        kind: MessageKind,
        sender: PeerHash,
        gender_hint: Option<Gender>,
        body: &[u8],
    ) -> Result<Option<InboundEvent>, FrameError> {
        if self.blocked.contains(&sender) {
            debug!(%sender, "frame from blocked peer dropped");
            return Ok(None);
        }

        // Presence is a liveness beacon: it repeats by design and the
        // application tracks last-seen itself, so it bypasses replay.
        if kind != MessageKind::Presence && !self.passes_replay(kind, &sender, body) {
            debug!(%sender, ?kind, "replay inside window dropped");
            return Ok(None);
        }

        let event = InboundEvent::from_parts(kind, sender, gender_hint, body)?;
        Ok(Some(event))
    }

    fn passes_replay(&mut self, kind: MessageKind, sender: &PeerHash, body: &[u8]) -> bool {
        let key = if kind.is_content_addressed() {
            content_key(sender, kind, body)
        } else {
            message_key(sender, kind)
        };
        match kind {
            MessageKind::MatchRequest => self.match_request_filter.check(&key),
            _ => self.inbound_filter.check(&key),
        }
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
