use serde::{Deserialize, Serialize};

use crate::domain::UrlLink;

/// Payload sent to a destination.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutboundPayload {
    Text {
        text: String,
    },
    Url(UrlLink),
    Image {
        /// Standard base64 of the image bytes.
        base64: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        name: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        mime: Option<String>,
    },
}

impl OutboundPayload {
    pub fn kind(&self) -> &'static str {
        match self {
            OutboundPayload::Text { .. } => "text",
            OutboundPayload::Url(_) => "url",
            OutboundPayload::Image { .. } => "image",
        }
    }
}
