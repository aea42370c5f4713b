//! Message classification: sender, content kind and group context.

use crate::{
    domain::{Contact, MediaRef, RoomId, UrlLink},
    events::{KindTag, RawMessage},
};

// Account protocol message type codes.
const CODE_IMAGE: u16 = 6;
const CODE_TEXT: u16 = 7;
const CODE_URL: u16 = 14;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ContentKind {
    Text,
    Url,
    Image,
    Unsupported,
}

impl ContentKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ContentKind::Text => "text",
            ContentKind::Url => "url",
            ContentKind::Image => "image",
            ContentKind::Unsupported => "unsupported",
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum Content {
    Text(String),
    Link(UrlLink),
    Media(MediaRef),
    Empty,
}

/// A classified inbound message.
#[derive(Clone, Debug, PartialEq)]
pub struct Message {
    pub id: String,
    pub sender: Contact,
    pub kind: ContentKind,
    pub content: Content,
    /// Present iff the message was posted inside a group.
    pub group: Option<RoomId>,
    /// Kind as reported by the bridge, kept for log lines.
    pub raw_kind: String,
}

impl Message {
    /// Identity checked against the allow-list.
    pub fn sender_alias(&self) -> Option<&str> {
        self.sender.alias.as_deref()
    }

    pub fn is_group(&self) -> bool {
        self.group.is_some()
    }
}

/// Classify a raw message. Never fails: unknown kinds, and known kinds whose
/// content is missing, come out as `Unsupported`.
pub fn classify(raw: RawMessage) -> Message {
    let raw_kind = raw.kind.label();
    let (kind, content) = match kind_of(&raw.kind) {
        ContentKind::Text => match raw.text {
            Some(text) => (ContentKind::Text, Content::Text(text)),
            None => (ContentKind::Unsupported, Content::Empty),
        },
        ContentKind::Url => match raw.url {
            Some(link) => (ContentKind::Url, Content::Link(link)),
            None => (ContentKind::Unsupported, Content::Empty),
        },
        ContentKind::Image => match raw.media {
            Some(media) => (ContentKind::Image, Content::Media(media)),
            None => (ContentKind::Unsupported, Content::Empty),
        },
        ContentKind::Unsupported => (ContentKind::Unsupported, Content::Empty),
    };

    Message {
        id: raw.id,
        sender: raw.talker,
        kind,
        content,
        group: raw.room.map(|r| r.id),
        raw_kind,
    }
}

fn kind_of(tag: &KindTag) -> ContentKind {
    match tag {
        KindTag::Code(code) => kind_of_code(*code),
        KindTag::Name(name) => {
            let name = name.trim().to_lowercase();
            if let Ok(code) = name.parse::<u16>() {
                return kind_of_code(code);
            }
            match name.as_str() {
                "text" => ContentKind::Text,
                "url" | "link" => ContentKind::Url,
                "image" => ContentKind::Image,
                _ => ContentKind::Unsupported,
            }
        }
    }
}

fn kind_of_code(code: u16) -> ContentKind {
    match code {
        CODE_TEXT => ContentKind::Text,
        CODE_URL => ContentKind::Url,
        CODE_IMAGE => ContentKind::Image,
        _ => ContentKind::Unsupported,
    }
}
