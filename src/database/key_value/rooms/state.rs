// =============================================================================
// Matrixon Matrix NextServer - Room State Storage
// =============================================================================
//
// Author: arkSong <arksong2018@gmail.com>
// Version: 0.11.0-alpha
// Date: 2024-03-21
//
// =============================================================================

use ruma::{OwnedEventId, OwnedUserId, RoomId, UserId};

use crate::{
    database::MemoryDatabase,
    service::{self, pdu::MEMBER_EVENT_TYPE, rooms::state::StateMap},
    Result,
};

impl service::rooms::state::Data for MemoryDatabase {
    fn room_exists(&self, room_id: &RoomId) -> Result<bool> {
        Ok(self.inner.read().rooms.contains_key(room_id))
    }

    fn current_state(&self, room_id: &RoomId) -> Result<StateMap> {
        let inner = self.inner.read();
        let ids = inner
            .rooms
            .get(room_id)
            .map(|room| room.state.clone())
            .unwrap_or_default();
        Ok(inner.resolve(ids))
    }

    fn state_before(
        &self,
        room_id: &RoomId,
        prev_events: &[OwnedEventId],
    ) -> Result<Option<StateMap>> {
        let inner = self.inner.read();
        let latest = prev_events
            .iter()
            .filter_map(|event_id| inner.pdus.get(event_id))
            .filter(|(_, pdu)| pdu.room_id == room_id)
            .map(|(position, _)| *position)
            .max();

        Ok(latest.map(|at| inner.resolve(inner.state_ids_at(room_id, at))))
    }

    fn room_members(&self, room_id: &RoomId) -> Result<Vec<OwnedUserId>> {
        let state = self.current_state(room_id)?;
        Ok(state
            .iter()
            .filter(|((kind, _), pdu)| kind == MEMBER_EVENT_TYPE && pdu.membership() == Some("join"))
            .filter_map(|((_, state_key), _)| UserId::parse(state_key.as_str()).ok())
            .collect())
    }

    fn forward_extremities(&self, room_id: &RoomId) -> Result<Vec<OwnedEventId>> {
        Ok(self
            .inner
            .read()
            .rooms
            .get(room_id)
            .map(|room| room.extremities.clone())
            .unwrap_or_default())
    }
}
