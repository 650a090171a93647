// =============================================================================
// Matrixon Matrix NextServer - Database Module
// =============================================================================
//
// Author: arkSong <arksong2018@gmail.com>
// Version: 0.11.0-alpha
// Date: 2024-03-21
//
// Description:
//   In-memory storage backing every service `Data` trait. One lock guards
//   the whole store, so assigning a stream position and making the write
//   visible happen together: once position N can be read, so can every
//   position below it.
//
// =============================================================================

mod key_value;

use std::collections::{BTreeMap, HashMap};

use parking_lot::RwLock;
use ruma::{OwnedEventId, OwnedRoomId, OwnedServerName, OwnedUserId, RoomId};

pub use key_value::keys::SigningKey;
use crate::service::{
    account_data::AccountDataEvent, pdu::PduEvent, rooms::state::StateMap, sync::StreamPosition,
};

pub(crate) type StateKey = (String, String);
pub(crate) type AccountDataKey = (OwnedUserId, Option<OwnedRoomId>, String);

#[derive(Default)]
pub(crate) struct RoomEntry {
    /// Event positions in stream order.
    pub timeline: Vec<(StreamPosition, OwnedEventId)>,
    pub state: BTreeMap<StateKey, OwnedEventId>,
    pub state_log: Vec<(StreamPosition, StateKey, OwnedEventId)>,
    pub extremities: Vec<OwnedEventId>,
}

#[derive(Default)]
pub(crate) struct Inner {
    pub position: StreamPosition,
    pub pdus: HashMap<OwnedEventId, (StreamPosition, PduEvent)>,
    /// Every stored event by position.
    pub log: BTreeMap<StreamPosition, OwnedEventId>,
    pub rooms: HashMap<OwnedRoomId, RoomEntry>,
    pub account_data: BTreeMap<AccountDataKey, (StreamPosition, AccountDataEvent)>,
    pub signing_keys: HashMap<OwnedServerName, BTreeMap<String, SigningKey>>,
}

impl Inner {
    /// State event IDs of the room as of `at`.
    pub fn state_ids_at(&self, room_id: &RoomId, at: StreamPosition) -> BTreeMap<StateKey, OwnedEventId> {
        let mut state = BTreeMap::new();
        if let Some(room) = self.rooms.get(room_id) {
            for (position, key, event_id) in &room.state_log {
                if *position > at {
                    break;
                }
                state.insert(key.clone(), event_id.clone());
            }
        }
        state
    }

    pub fn resolve(&self, ids: BTreeMap<StateKey, OwnedEventId>) -> StateMap {
        ids.into_iter()
            .filter_map(|(key, event_id)| Some((key, self.pdus.get(&event_id)?.1.clone())))
            .collect()
    }
}

#[derive(Default)]
pub struct MemoryDatabase {
    pub(crate) inner: RwLock<Inner>,
}

impl MemoryDatabase {
    pub fn new() -> Self {
        Self::default()
    }
}
