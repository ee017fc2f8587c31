//! BLE driver layer for the Ember proximity protocol
//!
//! `ember-core` is pure state; this crate supplies the I/O around it:
//!
//! - [`uuids`] - service and characteristic UUIDs of the GATT surface
//! - [`error`] - link-level error types
//! - [`client`] - the `GattClient` seam a platform adapter implements
//! - [`driver`] - executes session effects against a `GattClient`
//! - [`advertising`] - the `AdvertisingSink` seam and burst broadcaster
//! - [`outbox`] - drains the outgoing queue over both transports
//!
//! Platform adapters (btleplug, bluer, mobile bindings) implement the two
//! seams; everything above them is portable and tested against mocks.

mod advertising;
mod client;
mod driver;
mod error;
mod outbox;
mod uuids;

// Public API exports
pub use advertising::{AdvertisingChannel, AdvertisingSink};
pub use client::{GattClient, LinkEvent, ServiceInventory};
pub use driver::SessionDriver;
pub use error::BleLinkError;
pub use outbox::{Outbox, OutboxSender};
pub use uuids::{
    characteristic_for, CHAT_CHARACTERISTIC_UUID, COMPANY_ID, EMBER_SERVICE_UUID,
    REQUEST_CHARACTERISTIC_UUID, RESPONSE_CHARACTERISTIC_UUID,
};
