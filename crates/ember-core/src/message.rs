//! Typed application messages and inbound events
//!
//! `AppMessage` is what the application hands to the engine; its canonical
//! body encoding is shared by both transports. The advertising transport
//! lifts the gender byte of match frames into the frame header, so
//! `split_for_advertising` exists for that one asymmetry. `InboundEvent` is
//! what the engine dispatches back after decode and replay filtering.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use serde::{Deserialize, Serialize};

use crate::types::{Gender, MessageKind, PeerHash};
use crate::FrameError;

/// Separator between the optional name and mood fields of a presence body
const PRESENCE_FIELD_SEPARATOR: u8 = 0x1F;

// ----------------------------------------------------------------------------
// Outbound Messages
// ----------------------------------------------------------------------------

/// An application-level message before framing
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum AppMessage {
    /// Standing identity announcement (advertising transport only)
    Presence {
        gender: Gender,
        name: Option<String>,
        mood: Option<String>,
    },
    /// Propose a match to a peer
    MatchRequest { gender: Gender },
    /// Accept a proposed match
    MatchAccept { gender: Gender },
    /// Reject a proposed match
    MatchReject { gender: Gender },
    /// Free-form chat text
    Chat { text: String },
    /// Dissolve an existing match
    Unmatch,
    /// Block the peer; the remote side stops contacting us
    Block,
    /// Profile photo, raw image bytes (base64 on the wire)
    Photo { image: Vec<u8> },
    /// Ask the peer to send their profile photo
    PhotoRequest,
}

impl AppMessage {
    /// The wire type code for this message
    pub fn kind(&self) -> MessageKind {
        match self {
            AppMessage::Presence { .. } => MessageKind::Presence,
            AppMessage::MatchRequest { .. } => MessageKind::MatchRequest,
            AppMessage::MatchAccept { .. } => MessageKind::MatchAccept,
            AppMessage::MatchReject { .. } => MessageKind::MatchReject,
            AppMessage::Chat { .. } => MessageKind::Chat,
            AppMessage::Unmatch => MessageKind::Unmatch,
            AppMessage::Block => MessageKind::Block,
            AppMessage::Photo { .. } => MessageKind::Photo,
            AppMessage::PhotoRequest => MessageKind::PhotoRequest,
        }
    }

    /// Canonical body encoding, identical on both transports.
    ///
    /// Presence: gender byte, then optional `name <US> mood` UTF-8 text.
    /// Match kinds: single gender byte. Chat: UTF-8 text. Photo: base64 of
    /// the image bytes. Everything else is empty.
    pub fn body_bytes(&self) -> Vec<u8> {
        match self {
            AppMessage::Presence { gender, name, mood } => {
                let mut body = vec![gender.code()];
                if name.is_some() || mood.is_some() {
                    if let Some(name) = name {
                        body.extend_from_slice(name.as_bytes());
                    }
                    body.push(PRESENCE_FIELD_SEPARATOR);
                    if let Some(mood) = mood {
                        body.extend_from_slice(mood.as_bytes());
                    }
                }
                body
            }
            AppMessage::MatchRequest { gender }
            | AppMessage::MatchAccept { gender }
            | AppMessage::MatchReject { gender } => vec![gender.code()],
            AppMessage::Chat { text } => text.as_bytes().to_vec(),
            AppMessage::Photo { image } => BASE64.encode(image).into_bytes(),
            AppMessage::Unmatch | AppMessage::Block | AppMessage::PhotoRequest => Vec::new(),
        }
    }

    /// Split the message for the advertising transport, which carries the
    /// gender of match frames in the header rather than the payload.
    pub fn split_for_advertising(&self) -> (Option<Gender>, Vec<u8>) {
        match self {
            AppMessage::MatchRequest { gender }
            | AppMessage::MatchAccept { gender }
            | AppMessage::MatchReject { gender } => (Some(*gender), Vec::new()),
            _ => (None, self.body_bytes()),
        }
    }
}

// ----------------------------------------------------------------------------
// Inbound Events
// ----------------------------------------------------------------------------

/// A completed, deduplicated inbound message, dispatched to the application
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum InboundEvent {
    PresenceSeen {
        sender: PeerHash,
        gender: Gender,
        name: Option<String>,
        mood: Option<String>,
    },
    MatchRequestReceived { sender: PeerHash, gender: Gender },
    MatchAccepted { sender: PeerHash, gender: Gender },
    MatchRejected { sender: PeerHash, gender: Gender },
    ChatReceived { sender: PeerHash, text: String },
    UnmatchReceived { sender: PeerHash },
    BlockReceived { sender: PeerHash },
    PhotoReceived { sender: PeerHash, image: Vec<u8> },
    PhotoRequested { sender: PeerHash },
}

impl InboundEvent {
    /// Rebuild a typed event from a reassembled frame.
    ///
    /// `gender_hint` is the header gender of an advertising match frame;
    /// when absent the gender is read from the canonical body.
    pub fn from_parts(
        kind: MessageKind,
        sender: PeerHash,
        gender_hint: Option<Gender>,
        body: &[u8],
    ) -> Result<Self, FrameError> {
        match kind {
            MessageKind::Presence => {
                if body.is_empty() {
                    return Err(FrameError::TooShort {
                        expected: 1,
                        actual: 0,
                    });
                }
                let gender = Gender::from_code(body[0]);
                let (name, mood) = decode_presence_text(&body[1..])?;
                Ok(InboundEvent::PresenceSeen {
                    sender,
                    gender,
                    name,
                    mood,
                })
            }
            MessageKind::MatchRequest | MessageKind::MatchAccept | MessageKind::MatchReject => {
                let gender = gender_hint
                    .or_else(|| body.first().map(|b| Gender::from_code(*b)))
                    .unwrap_or_default();
                Ok(match kind {
                    MessageKind::MatchRequest => {
                        InboundEvent::MatchRequestReceived { sender, gender }
                    }
                    MessageKind::MatchAccept => InboundEvent::MatchAccepted { sender, gender },
                    _ => InboundEvent::MatchRejected { sender, gender },
                })
            }
            MessageKind::Chat => {
                let text = String::from_utf8(body.to_vec())
                    .map_err(|_| FrameError::InvalidPayload("chat text is not UTF-8".into()))?;
                Ok(InboundEvent::ChatReceived { sender, text })
            }
            MessageKind::Unmatch => Ok(InboundEvent::UnmatchReceived { sender }),
            MessageKind::Block => Ok(InboundEvent::BlockReceived { sender }),
            MessageKind::Photo => {
                let image = BASE64
                    .decode(body)
                    .map_err(|_| FrameError::InvalidPayload("photo is not valid base64".into()))?;
                Ok(InboundEvent::PhotoReceived { sender, image })
            }
            MessageKind::PhotoRequest => Ok(InboundEvent::PhotoRequested { sender }),
        }
    }

    /// The peer that sent this event
    pub fn sender(&self) -> PeerHash {
        match self {
            InboundEvent::PresenceSeen { sender, .. }
            | InboundEvent::MatchRequestReceived { sender, .. }
            | InboundEvent::MatchAccepted { sender, .. }
            | InboundEvent::MatchRejected { sender, .. }
            | InboundEvent::ChatReceived { sender, .. }
            | InboundEvent::UnmatchReceived { sender }
            | InboundEvent::BlockReceived { sender }
            | InboundEvent::PhotoReceived { sender, .. }
            | InboundEvent::PhotoRequested { sender } => *sender,
        }
    }
}

fn decode_presence_text(
    rest: &[u8],
) -> Result<(Option<String>, Option<String>), FrameError> {
    if rest.is_empty() {
        return Ok((None, None));
    }
    let text = core::str::from_utf8(rest)
        .map_err(|_| FrameError::InvalidPayload("presence text is not UTF-8".into()))?;
    let (name, mood) = match text.split_once(PRESENCE_FIELD_SEPARATOR as char) {
        Some((name, mood)) => (name, mood),
        None => (text, ""),
    };
    let non_empty = |s: &str| {
        if s.is_empty() {
            None
        } else {
            Some(s.to_string())
        }
    };
    Ok((non_empty(name), non_empty(mood)))
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn peer(id: u8) -> PeerHash {
        PeerHash::new([id, 0, 0, 0])
    }

    #[test]
    fn test_presence_body_roundtrip() {
        let msg = AppMessage::Presence {
            gender: Gender::Female,
            name: Some("mara".into()),
            mood: Some("out dancing".into()),
        };
        let body = msg.body_bytes();
        let event =
            InboundEvent::from_parts(MessageKind::Presence, peer(1), None, &body).unwrap();
        assert_eq!(
            event,
            InboundEvent::PresenceSeen {
                sender: peer(1),
                gender: Gender::Female,
                name: Some("mara".into()),
                mood: Some("out dancing".into()),
            }
        );
    }

    #[test]
    fn test_presence_without_text() {
        let msg = AppMessage::Presence {
            gender: Gender::Male,
            name: None,
            mood: None,
        };
        let body = msg.body_bytes();
        assert_eq!(body, vec![1]);
        let event =
            InboundEvent::from_parts(MessageKind::Presence, peer(2), None, &body).unwrap();
        assert_eq!(
            event,
            InboundEvent::PresenceSeen {
                sender: peer(2),
                gender: Gender::Male,
                name: None,
                mood: None,
            }
        );
    }

    #[test]
    fn test_match_gender_from_header_hint_wins() {
        let msg = AppMessage::MatchRequest {
            gender: Gender::Other,
        };
        let (gender, payload) = msg.split_for_advertising();
        assert_eq!(gender, Some(Gender::Other));
        assert!(payload.is_empty());

        let event =
            InboundEvent::from_parts(MessageKind::MatchRequest, peer(3), gender, &payload)
                .unwrap();
        assert_eq!(
            event,
            InboundEvent::MatchRequestReceived {
                sender: peer(3),
                gender: Gender::Other,
            }
        );
    }

    #[test]
    fn test_match_gender_from_body() {
        let body = AppMessage::MatchAccept {
            gender: Gender::Female,
        }
        .body_bytes();
        let event =
            InboundEvent::from_parts(MessageKind::MatchAccept, peer(4), None, &body).unwrap();
        assert_eq!(
            event,
            InboundEvent::MatchAccepted {
                sender: peer(4),
                gender: Gender::Female,
            }
        );
    }

    #[test]
    fn test_photo_base64_roundtrip() {
        let image = vec![0xFF, 0xD8, 0xFF, 0xE0, 0x12, 0x34];
        let body = AppMessage::Photo {
            image: image.clone(),
        }
        .body_bytes();
        // Wire body is printable base64, not raw image bytes
        assert!(body.iter().all(|b| b.is_ascii()));

        let event = InboundEvent::from_parts(MessageKind::Photo, peer(5), None, &body).unwrap();
        assert_eq!(
            event,
            InboundEvent::PhotoReceived {
                sender: peer(5),
                image,
            }
        );
    }

    #[test]
    fn test_invalid_photo_base64_rejected() {
        let result = InboundEvent::from_parts(MessageKind::Photo, peer(5), None, b"!!notb64!!");
        assert!(result.is_err());
    }

    #[test]
    fn test_invalid_chat_utf8_rejected() {
        let result =
            InboundEvent::from_parts(MessageKind::Chat, peer(6), None, &[0xFF, 0xFE, 0x00]);
        assert!(result.is_err());
    }

    #[test]
    fn test_empty_kinds_have_empty_bodies() {
        assert!(AppMessage::Unmatch.body_bytes().is_empty());
        assert!(AppMessage::Block.body_bytes().is_empty());
        assert!(AppMessage::PhotoRequest.body_bytes().is_empty());
    }
}
