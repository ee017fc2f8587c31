//! Advertising broadcast channel
//!
//! The advertising transport is fire-and-forget: frames ride in the
//! manufacturer-data field of transient advertisements, one frame per
//! burst slot. A platform adapter implements `AdvertisingSink`;
//! `AdvertisingChannel` does the chunking, msg_id rolling and inter-frame
//! pacing on top of it.

use async_trait::async_trait;
use tracing::debug;

use ember_core::message::AppMessage;
use ember_core::types::{Gender, PeerHash};
use ember_core::wire::advertising::encode_chunks;
use ember_core::EngineConfig;

use crate::error::BleLinkError;

// ----------------------------------------------------------------------------
// Advertising Sink Trait
// ----------------------------------------------------------------------------

/// Platform seam for putting frames on the air.
///
/// Payloads exclude the 2-byte company prefix; the adapter prepends it.
#[async_trait]
pub trait AdvertisingSink: Send {
    /// Broadcast one transient frame
    async fn broadcast(&mut self, payload: Vec<u8>) -> Result<(), BleLinkError>;

    /// Replace the standing advertisement payload. Stays on the air until
    /// replaced; transient bursts do not interrupt it.
    async fn set_standing(&mut self, payload: Vec<u8>) -> Result<(), BleLinkError>;
}

// ----------------------------------------------------------------------------
// Advertising Channel
// ----------------------------------------------------------------------------

/// Chunks messages into advertising frames and paces them out the sink.
pub struct AdvertisingChannel<S: AdvertisingSink> {
    sink: S,
    local: PeerHash,
    config: EngineConfig,
    /// Rolling per-channel message id; receivers key collectors on
    /// `(sender, target, msg_id)` so wrap-around is harmless.
    next_msg_id: u8,
}

impl<S: AdvertisingSink> AdvertisingChannel<S> {
    /// Create a channel broadcasting as the given local identity
    pub fn new(sink: S, local: PeerHash, config: EngineConfig) -> Self {
        Self {
            sink,
            local,
            config,
            next_msg_id: 0,
        }
    }

    /// Publish a presence announcement.
    ///
    /// A presence that fits one frame becomes the standing advertisement;
    /// longer ones (name plus mood past the chunk budget) are burst as a
    /// transient chunk sequence instead, since a standing advertisement
    /// holds a single frame.
    pub async fn announce_presence(
        &mut self,
        gender: Gender,
        name: Option<String>,
        mood: Option<String>,
    ) -> Result<(), BleLinkError> {
        let message = AppMessage::Presence { gender, name, mood };
        let msg_id = self.next_msg_id;
        self.next_msg_id = self.next_msg_id.wrapping_add(1);

        let (frame_gender, body) = message.split_for_advertising();
        let frames = encode_chunks(
            message.kind(),
            self.local,
            frame_gender,
            PeerHash::BROADCAST,
            msg_id,
            &body,
        )
        .map_err(ember_core::EmberError::from)?;

        if frames.len() == 1 {
            return self.sink.set_standing(frames[0].to_bytes()).await;
        }
        debug!(frames = frames.len(), "presence too long to stand, bursting");
        self.burst(frames).await
    }

    /// Broadcast a message addressed to one peer.
    ///
    /// Everyone in range hears the frames; receivers drop frames whose
    /// target is neither themselves nor broadcast.
    pub async fn send(
        &mut self,
        target: PeerHash,
        message: &AppMessage,
    ) -> Result<(), BleLinkError> {
        let msg_id = self.next_msg_id;
        self.next_msg_id = self.next_msg_id.wrapping_add(1);

        let (gender, body) = message.split_for_advertising();
        let frames = encode_chunks(message.kind(), self.local, gender, target, msg_id, &body)
            .map_err(ember_core::EmberError::from)?;

        debug!(
            kind = ?message.kind(),
            %target,
            frames = frames.len(),
            "broadcasting advertising burst"
        );
        self.burst(frames).await
    }

    async fn burst(
        &mut self,
        frames: Vec<ember_core::wire::advertising::AdvFrame>,
    ) -> Result<(), BleLinkError> {
        let last = frames.len() - 1;
        for (index, frame) in frames.into_iter().enumerate() {
            self.sink.broadcast(frame.to_bytes()).await?;
            if index < last {
                tokio::time::sleep(self.config.burst_frame_interval).await;
            }
        }
        Ok(())
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use ember_core::wire::advertising::AdvFrame;

    /// Sink that records broadcasts and the standing payload separately
    struct RecordingSink {
        frames: Vec<Vec<u8>>,
        standing: Option<Vec<u8>>,
    }

    #[async_trait]
    impl AdvertisingSink for RecordingSink {
        async fn broadcast(&mut self, payload: Vec<u8>) -> Result<(), BleLinkError> {
            self.frames.push(payload);
            Ok(())
        }

        async fn set_standing(&mut self, payload: Vec<u8>) -> Result<(), BleLinkError> {
            self.standing = Some(payload);
            Ok(())
        }
    }

    fn channel() -> AdvertisingChannel<RecordingSink> {
        let config = EngineConfig::new();
        AdvertisingChannel::new(
            RecordingSink {
                frames: Vec::new(),
                standing: None,
            },
            PeerHash::new([1, 2, 3, 4]),
            EngineConfig {
                burst_frame_interval: Duration::from_millis(0),
                ..config
            },
        )
    }

    #[tokio::test]
    async fn test_short_presence_becomes_standing_payload() {
        let mut channel = channel();
        channel
            .announce_presence(Gender::Female, Some("ada".into()), None)
            .await
            .unwrap();

        assert!(channel.sink.frames.is_empty());
        let standing = channel.sink.standing.expect("standing payload set");
        let frame = AdvFrame::from_bytes(&standing).unwrap();
        assert_eq!(frame.sender, PeerHash::new([1, 2, 3, 4]));
        assert!(frame.target.is_broadcast());
        assert_eq!(frame.chunk_total, 1);
    }

    #[tokio::test]
    async fn test_long_presence_bursts_instead() {
        let mut channel = channel();
        channel
            .announce_presence(
                Gender::Other,
                Some("maximilian".into()),
                Some("here for the playlist".into()),
            )
            .await
            .unwrap();

        assert!(channel.sink.standing.is_none());
        assert!(channel.sink.frames.len() > 1);
    }

    #[tokio::test]
    async fn test_long_chat_bursts_multiple_frames() {
        let mut channel = channel();
        let target = PeerHash::new([9, 9, 9, 9]);
        channel
            .send(
                target,
                &AppMessage::Chat {
                    text: "a message that cannot fit in eleven bytes".into(),
                },
            )
            .await
            .unwrap();

        assert!(channel.sink.frames.len() > 1);
        for (i, bytes) in channel.sink.frames.iter().enumerate() {
            let frame = AdvFrame::from_bytes(bytes).unwrap();
            assert_eq!(frame.chunk_index as usize, i);
            assert_eq!(frame.target, target);
        }
    }

    #[tokio::test]
    async fn test_msg_id_rolls_between_sends() {
        let mut channel = channel();
        let target = PeerHash::new([9, 9, 9, 9]);
        channel
            .send(target, &AppMessage::PhotoRequest)
            .await
            .unwrap();
        channel.send(target, &AppMessage::Unmatch).await.unwrap();

        let first = AdvFrame::from_bytes(&channel.sink.frames[0]).unwrap();
        let second = AdvFrame::from_bytes(&channel.sink.frames[1]).unwrap();
        assert_ne!(first.msg_id, second.msg_id);
    }

    #[tokio::test]
    async fn test_match_request_gender_in_header() {
        let mut channel = channel();
        let target = PeerHash::new([9, 9, 9, 9]);
        channel
            .send(
                target,
                &AppMessage::MatchRequest {
                    gender: Gender::Other,
                },
            )
            .await
            .unwrap();

        let frame = AdvFrame::from_bytes(&channel.sink.frames[0]).unwrap();
        assert_eq!(frame.gender, Some(Gender::Other));
        assert!(frame.payload.is_empty());
    }
}
