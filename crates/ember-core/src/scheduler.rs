//! Outgoing message queue
//!
//! Messages are enqueued from the application thread and drained by the
//! session driver one at a time, so the queue sits behind a mutex. Order is
//! strict FIFO except for two de-duplication rules: a newly queued photo to
//! a peer replaces any photo already queued for that peer, and a duplicate
//! match request to a peer still in the queue is dropped.

use std::collections::VecDeque;
use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::message::AppMessage;
use crate::types::{MessageKind, PeerHash};

// ----------------------------------------------------------------------------
// Routing
// ----------------------------------------------------------------------------

/// Transport a queued message travels over
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Route {
    /// Connect, discover, write to a characteristic
    Gatt,
    /// Broadcast as a transient advertising burst
    Advertising,
}

/// GATT characteristic a message is written to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OutgoingChannel {
    /// Match proposals
    Request,
    /// Accept / reject answers
    Response,
    /// Everything else: chat, photos, unmatch, block
    Chat,
}

/// Default route for a message kind. Presence only ever travels over
/// advertising; the rest default to GATT and may be overridden per message.
pub fn route_for(kind: MessageKind) -> Route {
    match kind {
        MessageKind::Presence => Route::Advertising,
        _ => Route::Gatt,
    }
}

/// Characteristic a GATT-routed kind is written to
pub fn channel_for(kind: MessageKind) -> OutgoingChannel {
    match kind {
        MessageKind::MatchRequest => OutgoingChannel::Request,
        MessageKind::MatchAccept | MessageKind::MatchReject => OutgoingChannel::Response,
        _ => OutgoingChannel::Chat,
    }
}

// ----------------------------------------------------------------------------
// Queue
// ----------------------------------------------------------------------------

/// One message waiting to be sent
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueuedMessage {
    pub target: PeerHash,
    pub message: AppMessage,
    pub route: Route,
}

impl QueuedMessage {
    /// Characteristic this message is written to when GATT-routed
    pub fn channel(&self) -> OutgoingChannel {
        channel_for(self.message.kind())
    }
}

/// What `enqueue` did with the message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueOutcome {
    /// Appended to the tail
    Queued,
    /// Replaced a stale photo queued for the same peer, in place
    ReplacedPhoto,
    /// Dropped: a match request for this peer is already queued
    DroppedDuplicate,
}

/// Mutex-guarded FIFO of outgoing messages.
pub struct OutgoingQueue {
    inner: Mutex<VecDeque<QueuedMessage>>,
}

impl OutgoingQueue {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(VecDeque::new()),
        }
    }

    /// Queue a message on its default route.
    pub fn enqueue(&self, target: PeerHash, message: AppMessage) -> EnqueueOutcome {
        let route = route_for(message.kind());
        self.enqueue_routed(target, message, route)
    }

    /// Queue a message with an explicit route, overriding the default.
    /// Used when a GATT-preferred kind must fall back to advertising.
    pub fn enqueue_routed(
        &self,
        target: PeerHash,
        message: AppMessage,
        route: Route,
    ) -> EnqueueOutcome {
        let kind = message.kind();
        let mut queue = self.inner.lock().unwrap();

        match kind {
            MessageKind::Photo => {
                // A newer photo supersedes one still waiting for the radio;
                // sending both wastes seconds of airtime for no benefit.
                if let Some(slot) = queue
                    .iter_mut()
                    .find(|q| q.target == target && q.message.kind() == MessageKind::Photo)
                {
                    debug!(%target, "replacing queued photo");
                    slot.message = message;
                    slot.route = route;
                    return EnqueueOutcome::ReplacedPhoto;
                }
            }
            MessageKind::MatchRequest => {
                if queue
                    .iter()
                    .any(|q| q.target == target && q.message.kind() == MessageKind::MatchRequest)
                {
                    debug!(%target, "match request already queued, dropping duplicate");
                    return EnqueueOutcome::DroppedDuplicate;
                }
            }
            _ => {}
        }

        queue.push_back(QueuedMessage {
            target,
            message,
            route,
        });
        EnqueueOutcome::Queued
    }

    /// Pop the head of the queue
    pub fn dequeue(&self) -> Option<QueuedMessage> {
        self.inner.lock().unwrap().pop_front()
    }

    /// Copy of the head without removing it
    pub fn peek(&self) -> Option<QueuedMessage> {
        self.inner.lock().unwrap().front().cloned()
    }

    /// Drop every queued message addressed to a peer. Called when the peer
    /// is blocked or unmatched while messages are still waiting.
    pub fn drop_pending_for(&self, target: &PeerHash) -> usize {
        let mut queue = self.inner.lock().unwrap();
        let before = queue.len();
        queue.retain(|q| q.target != *target);
        before - queue.len()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().unwrap().is_empty()
    }

    pub fn clear(&self) {
        self.inner.lock().unwrap().clear();
    }
}

impl Default for OutgoingQueue {
    fn default() -> Self {
        Self::new()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
