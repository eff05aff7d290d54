//! JSON frames exchanged over the realtime socket.
//!
//! Outbound frames always carry `type`, `body` and `group_id`, in that
//! order. Inbound frames must carry at least a string `type` and an integer
//! `group_id`; everything else is kept opaquely for the consumer.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use tally_core::{GroupId, UserId};

/// Body text the server expects on a join frame.
pub const JOIN_BODY: &str = "Joining group";

/// Body text the server expects on a leave frame.
pub const LEAVE_BODY: &str = "Leaving group";

/// Event types understood on the wire.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FrameKind {
    /// Subscribe to a group's messages.
    JoinGroup,
    /// Unsubscribe from a group.
    LeaveGroup,
    /// A chat message.
    Message,
}

impl FrameKind {
    /// Wire string.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::JoinGroup => "join-group",
            Self::LeaveGroup => "leave-group",
            Self::Message => "message",
        }
    }
}

/// A frame the client sends.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct OutboundFrame {
    /// Event type.
    #[serde(rename = "type")]
    pub kind: FrameKind,
    /// Event body.
    pub body: String,
    /// Target group.
    pub group_id: GroupId,
}

impl OutboundFrame {
    /// Join frame for `group`.
    pub fn join(group: GroupId) -> Self {
        Self {
            kind: FrameKind::JoinGroup,
            body: JOIN_BODY.to_string(),
            group_id: group,
        }
    }

    /// Leave frame for `group`.
    pub fn leave(group: GroupId) -> Self {
        Self {
            kind: FrameKind::LeaveGroup,
            body: LEAVE_BODY.to_string(),
            group_id: group,
        }
    }

    /// Chat message to `group`.
    pub fn message(group: GroupId, body: impl Into<String>) -> Self {
        Self {
            kind: FrameKind::Message,
            body: body.into(),
            group_id: group,
        }
    }

    /// Serialize to the JSON text sent on the wire.
    pub fn encode(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// Why an inbound frame was rejected.
#[derive(Debug, Error)]
pub enum FrameError {
    /// Not valid JSON.
    #[error("frame is not valid JSON: {0}")]
    Syntax(#[source] serde_json::Error),
    /// Valid JSON, but not an object.
    #[error("frame is not a JSON object")]
    NotAnObject,
    /// Missing or mistyped `type`/`group_id`.
    #[error("frame header is invalid: {0}")]
    Header(#[source] serde_json::Error),
}

#[derive(Deserialize)]
struct FrameHeader {
    #[serde(rename = "type")]
    kind: String,
    group_id: GroupId,
}

/// A parsed inbound frame.
///
/// The event type is kept as a string: types other than `"message"` (such
/// as presence or read receipts) parse fine and are left to the session to
/// ignore.
#[derive(Clone, Debug, PartialEq)]
pub struct InboundFrame {
    kind: String,
    group_id: GroupId,
    payload: Value,
}

impl InboundFrame {
    /// Parse one text frame.
    pub fn parse(text: &str) -> Result<Self, FrameError> {
        let payload: Value = serde_json::from_str(text).map_err(FrameError::Syntax)?;
        if !payload.is_object() {
            return Err(FrameError::NotAnObject);
        }
        let header = FrameHeader::deserialize(&payload).map_err(FrameError::Header)?;
        Ok(Self {
            kind: header.kind,
            group_id: header.group_id,
            payload,
        })
    }

    /// Event type as sent by the server.
    pub fn kind(&self) -> &str {
        &self.kind
    }

    /// Whether this is a chat message.
    pub fn is_message(&self) -> bool {
        self.kind == FrameKind::Message.as_str()
    }

    /// Group the frame belongs to.
    pub fn group_id(&self) -> GroupId {
        self.group_id
    }

    /// The complete frame object, including fields this crate does not interpret.
    pub fn payload(&self) -> &Value {
        &self.payload
    }

    /// Message text, if present.
    pub fn body(&self) -> Option<&str> {
        self.payload.get("body").and_then(Value::as_str)
    }

    /// Sending user, if present.
    pub fn sender(&self) -> Option<UserId> {
        self.payload
            .get("sender")
            .and_then(Value::as_i64)
            .map(UserId::new)
    }

    /// Consume the frame, returning the raw object.
    pub fn into_payload(self) -> Value {
        self.payload
    }
}
