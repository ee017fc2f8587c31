//! Outgoing queue drain loop
//!
//! Ties the three send-side pieces together: the shared `OutgoingQueue`,
//! the GATT session driver and the advertising channel. Messages leave in
//! queue order, one at a time, with a pacing delay between them. A failed
//! message is logged and dropped; it never blocks the rest of the queue.
//!
//! The loop is long-lived: `run` parks once the queue is empty and an
//! enqueue through an [`OutboxSender`] wakes it, so producers never have to
//! poll for delivery.

use std::sync::Arc;

use tokio::sync::Notify;
use tracing::{debug, warn};

use ember_core::message::AppMessage;
use ember_core::scheduler::{EnqueueOutcome, OutgoingQueue, Route};
use ember_core::types::PeerHash;
use ember_core::EngineConfig;

use crate::advertising::{AdvertisingChannel, AdvertisingSink};
use crate::client::GattClient;
use crate::driver::SessionDriver;
use crate::error::BleLinkError;

// ----------------------------------------------------------------------------
// Outbox
// ----------------------------------------------------------------------------

/// Drains the outgoing queue over both transports.
pub struct Outbox<C: GattClient, S: AdvertisingSink> {
    local: PeerHash,
    queue: Arc<OutgoingQueue>,
    notify: Arc<Notify>,
    driver: SessionDriver<C>,
    advertiser: AdvertisingChannel<S>,
    config: EngineConfig,
}

/// Cloneable producer handle: appends to the shared queue and wakes the
/// drain loop when it is parked.
#[derive(Clone)]
pub struct OutboxSender {
    queue: Arc<OutgoingQueue>,
    notify: Arc<Notify>,
}

impl OutboxSender {
    /// Queue a message on its default route and wake the drain loop
    pub fn enqueue(&self, target: PeerHash, message: AppMessage) -> EnqueueOutcome {
        let outcome = self.queue.enqueue(target, message);
        self.notify.notify_one();
        outcome
    }

    /// Queue a message on an explicit route and wake the drain loop
    pub fn enqueue_routed(
        &self,
        target: PeerHash,
        message: AppMessage,
        route: Route,
    ) -> EnqueueOutcome {
        let outcome = self.queue.enqueue_routed(target, message, route);
        self.notify.notify_one();
        outcome
    }
}

impl<C: GattClient, S: AdvertisingSink> Outbox<C, S> {
    pub fn new(
        local: PeerHash,
        queue: Arc<OutgoingQueue>,
        driver: SessionDriver<C>,
        advertiser: AdvertisingChannel<S>,
        config: EngineConfig,
    ) -> Self {
        Self {
            local,
            queue,
            notify: Arc::new(Notify::new()),
            driver,
            advertiser,
            config,
        }
    }

    /// The shared queue this outbox drains
    pub fn queue(&self) -> &Arc<OutgoingQueue> {
        &self.queue
    }

    /// Handle for producers; enqueues through it wake the drain loop
    pub fn sender(&self) -> OutboxSender {
        OutboxSender {
            queue: self.queue.clone(),
            notify: self.notify.clone(),
        }
    }

    /// Drain forever, parking while the queue is empty.
    ///
    /// `notify_one` stores a permit when no waiter is parked, so a message
    /// enqueued while the previous drain pass is still finishing is picked
    /// up on the next loop turn rather than lost.
    pub async fn run(mut self) {
        loop {
            self.drain().await;
            self.notify.notified().await;
        }
    }

    /// Send everything currently queued. Returns how many messages were
    /// delivered; failures are logged and skipped.
    pub async fn drain(&mut self) -> usize {
        let mut delivered = 0;
        while let Some(queued) = self.queue.dequeue() {
            let result = match queued.route {
                Route::Gatt => self.driver.send_message(self.local, &queued).await,
                Route::Advertising => {
                    self.advertiser.send(queued.target, &queued.message).await
                }
            };
            match result {
                Ok(()) => {
                    delivered += 1;
                    debug!(target = %queued.target, kind = ?queued.message.kind(), "delivered");
                }
                Err(BleLinkError::SendFailed { message }) => {
                    warn!(target = %queued.target, message, "dropping undeliverable message");
                }
                Err(err) => {
                    warn!(target = %queued.target, %err, "send error, message dropped");
                }
            }
            if !self.queue.is_empty() {
                tokio::time::sleep(self.config.inter_message_delay).await;
            }
        }
        delivered
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
