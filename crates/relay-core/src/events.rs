//! Inbound account events, as delivered by the account bridge.

use serde::{Deserialize, Serialize};

use crate::domain::{Contact, MediaRef, Room, UrlLink};

/// One event from the account's event stream.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum InboundEvent {
    #[serde(rename = "scan")]
    ScanChallenge { code: String, status: ScanStatus },
    #[serde(rename = "login")]
    SessionStarted { user: Contact },
    #[serde(rename = "logout")]
    SessionEnded { user: Contact },
    Error { message: String },
    Message(RawMessage),
    #[serde(rename = "friendship")]
    ConnectionRequest(RawConnectionRequest),
}

impl InboundEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            InboundEvent::ScanChallenge { .. } => "scan",
            InboundEvent::SessionStarted { .. } => "login",
            InboundEvent::SessionEnded { .. } => "logout",
            InboundEvent::Error { .. } => "error",
            InboundEvent::Message(_) => "message",
            InboundEvent::ConnectionRequest(_) => "friendship",
        }
    }
}

/// Login QR scan progress.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScanStatus {
    Cancel,
    Waiting,
    Scanned,
    Confirmed,
    Timeout,
    #[serde(other)]
    Unknown,
}

/// Message kind as the bridge reports it: either a name or the account
/// protocol's numeric type code.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum KindTag {
    Code(u16),
    Name(String),
}

impl KindTag {
    pub fn label(&self) -> String {
        match self {
            KindTag::Code(c) => format!("#{c}"),
            KindTag::Name(n) => n.clone(),
        }
    }
}

/// Unclassified message payload.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RawMessage {
    pub id: String,
    pub talker: Contact,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub room: Option<Room>,
    pub kind: KindTag,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<UrlLink>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media: Option<MediaRef>,
}

/// Friendship notification type.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionKind {
    /// Someone asked to become a contact.
    #[default]
    Receive,
    /// A request we sent was confirmed.
    Confirm,
    /// The account asks for verification.
    Verify,
    #[serde(other)]
    Unknown,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RawConnectionRequest {
    pub id: String,
    pub contact: Contact,
    #[serde(default)]
    pub kind: ConnectionKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hello: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::BlobSource;

    #[test]
    fn parses_message_with_numeric_kind_and_room() {
        let ev: InboundEvent = serde_json::from_str(
            r#"{"event":"message","id":"m1","talker":{"id":"c1","name":"Alice","alias":"alice"},
                "room":{"id":"r1","topic":"ops"},"kind":7,"text":"hi"}"#,
        )
        .unwrap();
        let InboundEvent::Message(m) = ev else {
            panic!("expected message");
        };
        assert_eq!(m.kind, KindTag::Code(7));
        assert_eq!(m.talker.alias.as_deref(), Some("alice"));
        assert_eq!(m.room.unwrap().topic, "ops");
    }

    #[test]
    fn parses_image_media_reference() {
        let ev: InboundEvent = serde_json::from_str(
            r#"{"event":"message","id":"m2","talker":{"id":"c1","name":"Alice"},
                "kind":"image","media":{"source":"message","message_id":"m2","name":"a.jpg"}}"#,
        )
        .unwrap();
        let InboundEvent::Message(m) = ev else {
            panic!("expected message");
        };
        let media = m.media.unwrap();
        assert_eq!(media.name.as_deref(), Some("a.jpg"));
        assert_eq!(
            media.source,
            BlobSource::Message {
                message_id: "m2".to_string()
            }
        );
    }

    #[test]
    fn friendship_kind_defaults_to_receive_and_tolerates_unknown() {
        let ev: InboundEvent = serde_json::from_str(
            r#"{"event":"friendship","id":"f1","contact":{"id":"c9","name":"Carol"}}"#,
        )
        .unwrap();
        let InboundEvent::ConnectionRequest(r) = ev else {
            panic!("expected friendship");
        };
        assert_eq!(r.kind, ConnectionKind::Receive);

        let ev: InboundEvent = serde_json::from_str(
            r#"{"event":"friendship","id":"f2","contact":{"id":"c9","name":"Carol"},"kind":"something"}"#,
        )
        .unwrap();
        let InboundEvent::ConnectionRequest(r) = ev else {
            panic!("expected friendship");
        };
        assert_eq!(r.kind, ConnectionKind::Unknown);
    }

    #[test]
    fn scan_status_unknown_values_map_to_unknown() {
        let ev: InboundEvent =
            serde_json::from_str(r#"{"event":"scan","code":"xyz","status":"weird"}"#).unwrap();
        assert_eq!(
            ev,
            InboundEvent::ScanChallenge {
                code: "xyz".to_string(),
                status: ScanStatus::Unknown
            }
        );
    }
}
