//! The GATT client seam
//!
//! A platform adapter (btleplug, bluer, a mobile binding) implements
//! `GattClient`. Command methods resolve when the stack acknowledges the
//! operation; things the stack reports spontaneously, like a dropped link
//! or a late MTU callback, arrive on a `LinkEvent` channel the adapter
//! feeds.

use async_trait::async_trait;
use uuid::Uuid;

use ember_core::types::PeerHash;

use crate::error::BleLinkError;
use crate::uuids::{
    CHAT_CHARACTERISTIC_UUID, EMBER_SERVICE_UUID, REQUEST_CHARACTERISTIC_UUID,
    RESPONSE_CHARACTERISTIC_UUID,
};

// ----------------------------------------------------------------------------
// Link Events
// ----------------------------------------------------------------------------

/// Spontaneous stack notifications, fed by the platform adapter
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkEvent {
    /// The platform reported a negotiated MTU after the request resolved
    MtuChanged { mtu: u16 },
    /// The link dropped with a platform status code
    Disconnected { status: u8 },
}

// ----------------------------------------------------------------------------
// Service Inventory
// ----------------------------------------------------------------------------

/// What service discovery found on the remote device
#[derive(Debug, Clone, Default)]
pub struct ServiceInventory {
    /// Whether the Ember service was present
    pub service_found: bool,
    /// Characteristic UUIDs discovered under the service
    pub characteristics: Vec<Uuid>,
}

impl ServiceInventory {
    /// Inventory for a device exposing the full Ember surface
    pub fn complete() -> Self {
        Self {
            service_found: true,
            characteristics: vec![
                REQUEST_CHARACTERISTIC_UUID,
                RESPONSE_CHARACTERISTIC_UUID,
                CHAT_CHARACTERISTIC_UUID,
            ],
        }
    }

    /// Whether all three protocol characteristics were discovered
    pub fn characteristics_complete(&self) -> bool {
        self.service_found
            && [
                REQUEST_CHARACTERISTIC_UUID,
                RESPONSE_CHARACTERISTIC_UUID,
                CHAT_CHARACTERISTIC_UUID,
            ]
            .iter()
            .all(|uuid| self.characteristics.contains(uuid))
    }

    /// The service UUID discovery looks for
    pub fn service_uuid() -> Uuid {
        EMBER_SERVICE_UUID
    }
}

// ----------------------------------------------------------------------------
// GATT Client Trait
// ----------------------------------------------------------------------------

/// Commands the session driver issues against the platform stack.
#[async_trait]
pub trait GattClient: Send {
    /// Open the link to the peer; resolves when connected
    async fn connect(&mut self, target: PeerHash) -> Result<(), BleLinkError>;

    /// Request a larger MTU. `Ok(Some(mtu))` when the stack resolves the
    /// negotiation synchronously; `Ok(None)` when the result arrives later
    /// as a `LinkEvent::MtuChanged` (or never, covered by the fallback
    /// timer).
    async fn request_mtu(&mut self, mtu: u16) -> Result<Option<u16>, BleLinkError>;

    /// Discover the Ember service and its characteristics
    async fn discover_services(&mut self) -> Result<ServiceInventory, BleLinkError>;

    /// Write bytes to a characteristic
    async fn write(
        &mut self,
        characteristic: Uuid,
        bytes: Vec<u8>,
        with_response: bool,
    ) -> Result<(), BleLinkError>;

    /// Tear the link down; must not fail
    async fn disconnect(&mut self);

    /// Vendor hook to clear the stack's GATT cache before a reconnect.
    /// No-op on platforms without one.
    async fn refresh_stack(&mut self) {}
}
