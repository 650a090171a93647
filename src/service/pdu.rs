// =============================================================================
// Matrixon Matrix NextServer - PDU Module
// =============================================================================
//
// Author: arkSong <arksong2018@gmail.com>
// Version: 0.11.0-alpha
// Date: 2024-03-21
//
// Persistent data unit (room event) and its client/federation renderings.
//
// =============================================================================

use ruma::{
    CanonicalJsonObject, OwnedEventId, OwnedRoomId, OwnedServerName, OwnedUserId, ServerName,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value as JsonValue};

use crate::{utils, Error, Result};

pub const MEMBER_EVENT_TYPE: &str = "m.room.member";
pub const CREATE_EVENT_TYPE: &str = "m.room.create";
pub const JOIN_RULES_EVENT_TYPE: &str = "m.room.join_rules";
pub const POWER_LEVELS_EVENT_TYPE: &str = "m.room.power_levels";

/// Content hashes of a PDU.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
pub struct EventHash {
    /// The SHA-256 hash.
    pub sha256: String,
}

impl EventHash {
    fn is_empty(&self) -> bool {
        self.sha256.is_empty()
    }
}

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
pub struct PduEvent {
    pub event_id: OwnedEventId,
    pub room_id: OwnedRoomId,
    pub sender: OwnedUserId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub origin: Option<OwnedServerName>,
    pub origin_server_ts: u64,
    #[serde(rename = "type")]
    pub kind: String,
    pub content: JsonValue,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state_key: Option<String>,
    #[serde(default)]
    pub prev_events: Vec<OwnedEventId>,
    #[serde(default)]
    pub depth: u64,
    #[serde(default)]
    pub auth_events: Vec<OwnedEventId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub redacts: Option<OwnedEventId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unsigned: Option<JsonValue>,
    #[serde(default, skip_serializing_if = "EventHash::is_empty")]
    pub hashes: EventHash,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signatures: Option<JsonValue>,
}

/// Side-channel metadata recorded in `unsigned` when a state event replaces
/// an earlier one.
#[derive(Debug, Default, Deserialize, Serialize)]
pub struct PrevEventRef {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prev_content: Option<JsonValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replaces_state: Option<String>,
}

impl PduEvent {
    /// The server that authored the event. Falls back to the sender's server
    /// when the `origin` key is absent.
    pub fn origin(&self) -> &ServerName {
        self.origin
            .as_deref()
            .unwrap_or_else(|| self.sender.server_name())
    }

    pub fn is_state(&self) -> bool {
        self.state_key.is_some()
    }

    /// `(type, state_key)` for state events.
    pub fn state_tuple(&self) -> Option<(String, String)> {
        self.state_key
            .as_ref()
            .map(|key| (self.kind.clone(), key.clone()))
    }

    /// The `membership` field of an `m.room.member` event.
    pub fn membership(&self) -> Option<&str> {
        if self.kind != MEMBER_EVENT_TYPE {
            return None;
        }
        self.content.get("membership").and_then(JsonValue::as_str)
    }

    /// Client format without `room_id`, used inside sync room sections.
    pub fn to_sync_event(&self) -> JsonValue {
        let mut event = json!({
            "event_id": self.event_id,
            "type": self.kind,
            "content": self.content,
            "sender": self.sender,
            "origin_server_ts": self.origin_server_ts,
        });
        if let Some(state_key) = &self.state_key {
            event["state_key"] = json!(state_key);
        }
        if let Some(unsigned) = &self.unsigned {
            event["unsigned"] = unsigned.clone();
        }
        event
    }

    /// Client format including `room_id`.
    pub fn to_room_event(&self) -> JsonValue {
        let mut event = self.to_sync_event();
        event["room_id"] = json!(self.room_id);
        event
    }

    /// Client format for the room state endpoints: the room event plus
    /// `prev_content` and `replaces_state` recovered from `unsigned`.
    pub fn to_state_event_response(&self) -> Result<JsonValue> {
        let mut event = self.to_room_event();
        let Some(unsigned) = &self.unsigned else {
            return Ok(event);
        };

        let prev: PrevEventRef = serde_json::from_value(unsigned.clone()).map_err(|e| {
            Error::bad_database(format!("Invalid unsigned data in {}: {e}", self.event_id))
        })?;
        if let Some(replaces_state) = prev.replaces_state.filter(|id| !id.is_empty()) {
            event["replaces_state"] = json!(replaces_state);
        }
        if let Some(prev_content) = prev.prev_content {
            event["prev_content"] = prev_content;
        }
        Ok(event)
    }

    /// Full federation format.
    pub fn to_federation_json(&self) -> Result<JsonValue> {
        serde_json::to_value(self)
            .map_err(|e| Error::Internal(format!("Failed to serialize {}: {e}", self.event_id)))
    }

    /// Federation format as canonical JSON, the form that is hashed and
    /// signed.
    pub fn to_canonical_object(&self) -> Result<CanonicalJsonObject> {
        utils::to_canonical_object(self).map_err(|e| {
            Error::Internal(format!("{} is not canonical JSON: {e}", self.event_id))
        })
    }

    pub fn from_canonical_object(object: CanonicalJsonObject) -> serde_json::Result<Self> {
        serde_json::to_value(object).and_then(serde_json::from_value)
    }
}

/// Build the start of a PDU; the timeline service fills in the DAG fields.
#[derive(Clone, Debug, Deserialize)]
pub struct PduBuilder {
    #[serde(rename = "type")]
    pub event_type: String,
    pub content: JsonValue,
    pub state_key: Option<String>,
    /// Set to the current time if None
    pub timestamp: Option<u64>,
}

impl PduBuilder {
    pub fn new(event_type: impl Into<String>, content: JsonValue) -> Self {
        Self {
            event_type: event_type.into(),
            content,
            state_key: None,
            timestamp: None,
        }
    }

    pub fn state(
        event_type: impl Into<String>,
        state_key: impl Into<String>,
        content: JsonValue,
    ) -> Self {
        Self {
            state_key: Some(state_key.into()),
            ..Self::new(event_type, content)
        }
    }
}
