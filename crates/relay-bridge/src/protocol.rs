//! Wire format spoken with the account sidecar: one JSON object per line.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use relay_core::{
    errors::Error, events::InboundEvent, messaging::types::OutboundPayload, Result,
};

/// Request sent on the sidecar's stdin.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "op")]
pub enum Command {
    #[serde(rename = "room.find")]
    FindRoom { topic: String },
    #[serde(rename = "room.say")]
    Say {
        room_id: String,
        payload: OutboundPayload,
    },
    #[serde(rename = "room.add")]
    AddMember { room_id: String, contact_id: String },
    #[serde(rename = "friendship.accept")]
    AcceptFriendship { request_id: String },
    #[serde(rename = "message.file")]
    MessageFile { message_id: String },
    #[serde(rename = "stop")]
    Stop,
}

impl Command {
    pub fn op(&self) -> &'static str {
        match self {
            Command::FindRoom { .. } => "room.find",
            Command::Say { .. } => "room.say",
            Command::AddMember { .. } => "room.add",
            Command::AcceptFriendship { .. } => "friendship.accept",
            Command::MessageFile { .. } => "message.file",
            Command::Stop => "stop",
        }
    }
}

/// Serialize `cmd` with its correlation id, newline-terminated.
pub fn encode_command(id: u64, cmd: &Command) -> Result<String> {
    let mut value = serde_json::to_value(cmd)?;
    if let Value::Object(map) = &mut value {
        map.insert("id".to_string(), Value::from(id));
    }
    let mut line = serde_json::to_string(&value)?;
    line.push('\n');
    Ok(line)
}

/// One parsed line from the sidecar's stdout.
#[derive(Clone, Debug, PartialEq)]
pub enum BridgeLine {
    Event(InboundEvent),
    Response {
        id: u64,
        outcome: std::result::Result<Value, String>,
    },
}

/// Parse a stdout line. Blank lines yield `None`.
pub fn parse_line(line: &str) -> Result<Option<BridgeLine>> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }

    let value: Value = serde_json::from_str(line)?;
    match value.get("type").and_then(|t| t.as_str()) {
        Some("event") => Ok(Some(BridgeLine::Event(serde_json::from_value(value)?))),
        Some("response") => {
            let id = value
                .get("id")
                .and_then(|v| v.as_u64())
                .ok_or_else(|| Error::Bridge("response without numeric id".to_string()))?;
            let ok = value.get("ok").and_then(|v| v.as_bool()).unwrap_or(false);
            let outcome = if ok {
                Ok(value.get("result").cloned().unwrap_or(Value::Null))
            } else {
                Err(value
                    .get("error")
                    .and_then(|v| v.as_str())
                    .unwrap_or("unknown bridge error")
                    .to_string())
            };
            Ok(Some(BridgeLine::Response { id, outcome }))
        }
        Some(other) => Err(Error::Bridge(format!("unknown line type: {other}"))),
        None => Err(Error::Bridge("line has no type".to_string())),
    }
}

/// `room.find` result.
#[derive(Clone, Debug, Deserialize)]
pub struct RoomInfo {
    pub id: String,
    #[serde(default)]
    pub topic: String,
}

/// `message.file` result.
#[derive(Clone, Debug, Deserialize)]
pub struct FileInfo {
    pub data: String,
}
