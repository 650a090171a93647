// =============================================================================
// Matrixon Matrix NextServer - Sync Response Module
// =============================================================================
//
// Author: arkSong <arksong2018@gmail.com>
// Version: 0.11.0-alpha
// Date: 2024-03-21
//
// Shapes of the `/sync` response body.
//
// =============================================================================

use std::collections::BTreeMap;

use ruma::OwnedRoomId;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use super::StreamPosition;
use crate::service::account_data::AccountDataEvent;

#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
pub struct Events<T = JsonValue> {
    pub events: Vec<T>,
}

impl<T> Events<T> {
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
pub struct Timeline {
    pub events: Vec<JsonValue>,
    pub limited: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prev_batch: Option<String>,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
pub struct JoinedRoom {
    pub state: Events,
    pub timeline: Timeline,
    pub ephemeral: Events,
    pub account_data: Events<AccountDataEvent>,
}

impl JoinedRoom {
    pub fn is_empty(&self) -> bool {
        self.state.is_empty()
            && self.timeline.events.is_empty()
            && self.ephemeral.is_empty()
            && self.account_data.is_empty()
    }
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
pub struct InvitedRoom {
    pub invite_state: Events,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
pub struct LeftRoom {
    pub state: Events,
    pub timeline: Timeline,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
pub struct Rooms {
    pub join: BTreeMap<OwnedRoomId, JoinedRoom>,
    pub invite: BTreeMap<OwnedRoomId, InvitedRoom>,
    pub leave: BTreeMap<OwnedRoomId, LeftRoom>,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
pub struct SyncResponse {
    pub next_batch: String,
    pub account_data: Events<AccountDataEvent>,
    pub presence: Events,
    pub rooms: Rooms,
}

impl SyncResponse {
    /// An empty response whose `next_batch` is `position`.
    pub fn new(position: StreamPosition) -> Self {
        Self {
            next_batch: position.to_string(),
            ..Default::default()
        }
    }

    /// True when nothing changed relative to the request's `since`.
    pub fn is_empty(&self) -> bool {
        self.rooms.join.values().all(JoinedRoom::is_empty)
            && self.rooms.invite.is_empty()
            && self.rooms.leave.is_empty()
            && self.account_data.is_empty()
            && self.presence.is_empty()
    }
}
