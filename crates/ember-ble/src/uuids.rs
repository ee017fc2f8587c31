//! GATT surface of the Ember protocol

use ember_core::scheduler::OutgoingChannel;
use uuid::Uuid;

// ----------------------------------------------------------------------------
// Service and Characteristic UUIDs
// ----------------------------------------------------------------------------

/// Company identifier prefixed to manufacturer data by the adapter.
/// 0xFFFF is the Bluetooth SIG value reserved for internal use.
pub const COMPANY_ID: u16 = 0xFFFF;

/// Ember BLE service UUID
pub const EMBER_SERVICE_UUID: Uuid = Uuid::from_u128(0x4A960001_8E5C_4DF6_A1B2_7C3985D0E44F);

/// Characteristic for match proposals
pub const REQUEST_CHARACTERISTIC_UUID: Uuid =
    Uuid::from_u128(0x4A960002_8E5C_4DF6_A1B2_7C3985D0E44F);

/// Characteristic for accept / reject answers
pub const RESPONSE_CHARACTERISTIC_UUID: Uuid =
    Uuid::from_u128(0x4A960003_8E5C_4DF6_A1B2_7C3985D0E44F);

/// Characteristic for chat, photos and control messages
pub const CHAT_CHARACTERISTIC_UUID: Uuid =
    Uuid::from_u128(0x4A960004_8E5C_4DF6_A1B2_7C3985D0E44F);

/// The characteristic an outgoing channel writes to
pub fn characteristic_for(channel: OutgoingChannel) -> Uuid {
    match channel {
        OutgoingChannel::Request => REQUEST_CHARACTERISTIC_UUID,
        OutgoingChannel::Response => RESPONSE_CHARACTERISTIC_UUID,
        OutgoingChannel::Chat => CHAT_CHARACTERISTIC_UUID,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_characteristics_are_distinct() {
        let all = [
            EMBER_SERVICE_UUID,
            REQUEST_CHARACTERISTIC_UUID,
            RESPONSE_CHARACTERISTIC_UUID,
            CHAT_CHARACTERISTIC_UUID,
        ];
        for (i, a) in all.iter().enumerate() {
            for b in &all[i + 1..] {
                assert_ne!(a, b);
            }
        }
    }

    #[test]
    fn test_channel_mapping() {
        assert_eq!(
            characteristic_for(OutgoingChannel::Request),
            REQUEST_CHARACTERISTIC_UUID
        );
        assert_eq!(
            characteristic_for(OutgoingChannel::Response),
            RESPONSE_CHARACTERISTIC_UUID
        );
        assert_eq!(
            characteristic_for(OutgoingChannel::Chat),
            CHAT_CHARACTERISTIC_UUID
        );
    }
}
