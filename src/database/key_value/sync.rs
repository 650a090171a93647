// =============================================================================
// Matrixon Matrix NextServer - Sync Storage
// =============================================================================
//
// Author: arkSong <arksong2018@gmail.com>
// Version: 0.11.0-alpha
// Date: 2024-03-21
//
// =============================================================================

use std::{collections::BTreeMap, ops::Bound};

use ruma::{OwnedRoomId, RoomId, UserId};

use crate::{
    database::MemoryDatabase,
    service::{
        self,
        pdu::{PduEvent, MEMBER_EVENT_TYPE},
        sync::{MembershipChange, StreamPosition, TimelineSlice},
    },
    Result,
};

fn in_window(position: StreamPosition, from: StreamPosition, to: StreamPosition) -> bool {
    position > from && position <= to
}

impl service::sync::Data for MemoryDatabase {
    fn current_position(&self) -> Result<StreamPosition> {
        Ok(self.inner.read().position)
    }

    fn joined_rooms(&self, user_id: &UserId, at: StreamPosition) -> Result<Vec<OwnedRoomId>> {
        let inner = self.inner.read();
        let key = (MEMBER_EVENT_TYPE.to_owned(), user_id.to_string());

        let mut rooms: Vec<OwnedRoomId> = inner
            .rooms
            .keys()
            .filter(|room_id| {
                inner
                    .state_ids_at(room_id, at)
                    .get(&key)
                    .and_then(|event_id| inner.pdus.get(event_id))
                    .and_then(|(_, pdu)| pdu.membership())
                    == Some("join")
            })
            .cloned()
            .collect();
        rooms.sort();
        Ok(rooms)
    }

    fn state_at(&self, room_id: &RoomId, at: StreamPosition) -> Result<Vec<PduEvent>> {
        let inner = self.inner.read();
        Ok(inner
            .resolve(inner.state_ids_at(room_id, at))
            .into_values()
            .collect())
    }

    fn timeline_range(
        &self,
        room_id: &RoomId,
        from: StreamPosition,
        to: StreamPosition,
        limit: usize,
    ) -> Result<TimelineSlice> {
        let inner = self.inner.read();
        let Some(room) = inner.rooms.get(room_id) else {
            return Ok(TimelineSlice::default());
        };

        let window: Vec<_> = room
            .timeline
            .iter()
            .filter(|(position, _)| in_window(*position, from, to))
            .collect();
        let skip = window.len().saturating_sub(limit);
        let returned = &window[skip..];

        Ok(TimelineSlice {
            events: returned
                .iter()
                .filter_map(|(_, event_id)| inner.pdus.get(event_id))
                .map(|(_, pdu)| pdu.clone())
                .collect(),
            limited: skip > 0,
            earliest: returned.first().map(|(position, _)| *position),
        })
    }

    fn state_changes_in_range(
        &self,
        room_id: &RoomId,
        from: StreamPosition,
        to: StreamPosition,
    ) -> Result<Vec<PduEvent>> {
        let inner = self.inner.read();
        let Some(room) = inner.rooms.get(room_id) else {
            return Ok(Vec::new());
        };

        let mut latest = BTreeMap::new();
        for (position, key, event_id) in &room.state_log {
            if in_window(*position, from, to) {
                latest.insert(key, (*position, event_id));
            }
        }
        let mut changes: Vec<_> = latest.into_values().collect();
        changes.sort_by_key(|(position, _)| *position);

        Ok(changes
            .into_iter()
            .filter_map(|(_, event_id)| inner.pdus.get(event_id))
            .map(|(_, pdu)| pdu.clone())
            .collect())
    }

    fn membership_changes(
        &self,
        user_id: &UserId,
        from: StreamPosition,
        to: StreamPosition,
    ) -> Result<Vec<MembershipChange>> {
        if to <= from {
            return Ok(Vec::new());
        }
        let inner = self.inner.read();

        Ok(inner
            .log
            .range((Bound::Excluded(from), Bound::Included(to)))
            .filter_map(|(position, event_id)| {
                let (_, pdu) = inner.pdus.get(event_id)?;
                let is_target = pdu.state_key.as_deref() == Some(user_id.as_str());
                (pdu.kind == MEMBER_EVENT_TYPE && is_target).then(|| MembershipChange {
                    room_id: pdu.room_id.clone(),
                    position: *position,
                    event: pdu.clone(),
                })
            })
            .collect())
    }

    fn current_state_events(&self, room_id: &RoomId) -> Result<Vec<PduEvent>> {
        let state = service::rooms::state::Data::current_state(self, room_id)?;
        Ok(state.into_values().collect())
    }

    fn current_state_event(
        &self,
        room_id: &RoomId,
        kind: &str,
        state_key: &str,
    ) -> Result<Option<PduEvent>> {
        let inner = self.inner.read();
        Ok(inner
            .rooms
            .get(room_id)
            .and_then(|room| room.state.get(&(kind.to_owned(), state_key.to_owned())))
            .and_then(|event_id| inner.pdus.get(event_id))
            .map(|(_, pdu)| pdu.clone()))
    }
}
