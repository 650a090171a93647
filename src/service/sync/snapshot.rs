// =============================================================================
// Matrixon Matrix NextServer - Sync Snapshot Module
// =============================================================================
//
// Author: arkSong <arksong2018@gmail.com>
// Version: 0.11.0-alpha
// Date: 2024-03-21
//
// Builds complete (initial) and incremental sync bodies from the
// position-ordered storage queries. Account data is merged afterwards by the
// sync service.
//
// =============================================================================

use std::{
    collections::{BTreeMap, HashSet},
    sync::Arc,
    time::Instant,
};

use ruma::{OwnedEventId, OwnedRoomId, UserId};
use tracing::{debug, instrument};

use super::{
    data::{MembershipChange, TimelineSlice},
    response::{Events, InvitedRoom, JoinedRoom, LeftRoom, SyncResponse, Timeline},
    Data, StreamPosition,
};
use crate::{service::pdu::PduEvent, Result};

pub struct SnapshotAssembler {
    db: Arc<dyn Data>,
}

impl SnapshotAssembler {
    pub fn new(db: Arc<dyn Data>) -> Self {
        Self { db }
    }

    /// Full snapshot of every joined room as of `at`.
    #[instrument(level = "debug", skip(self))]
    pub fn complete_sync(
        &self,
        user_id: &UserId,
        at: StreamPosition,
        limit: usize,
    ) -> Result<SyncResponse> {
        let start = Instant::now();
        let mut response = SyncResponse::new(at);

        for room_id in self.db.joined_rooms(user_id, at)? {
            let slice = self.db.timeline_range(&room_id, StreamPosition::ZERO, at, limit)?;
            let state = self.db.state_at(&room_id, at)?;
            response.rooms.join.insert(room_id, joined_room(slice, state));
        }

        let changes = self
            .db
            .membership_changes(user_id, StreamPosition::ZERO, at)?;
        for (room_id, change) in latest_per_room(&changes) {
            if change.membership() == "invite" {
                response.rooms.invite.insert(room_id, invited_room(change));
            }
        }

        debug!(
            "✅ Complete sync for {} at {}: {} joined rooms in {:?}",
            user_id,
            at,
            response.rooms.join.len(),
            start.elapsed()
        );
        Ok(response)
    }

    /// Everything in `(since, current]`.
    #[instrument(level = "debug", skip(self))]
    pub fn incremental_sync(
        &self,
        user_id: &UserId,
        since: StreamPosition,
        current: StreamPosition,
        limit: usize,
    ) -> Result<SyncResponse> {
        let start = Instant::now();
        let mut response = SyncResponse::new(current);
        if current <= since {
            return Ok(response);
        }

        let changes = self.db.membership_changes(user_id, since, current)?;
        let latest = latest_per_room(&changes);
        let newly_joined: HashSet<&OwnedRoomId> = changes
            .iter()
            .filter(|change| change.membership() == "join" && !was_joined_before(change))
            .map(|change| &change.room_id)
            .collect();

        let joined = self.db.joined_rooms(user_id, current)?;
        for room_id in &joined {
            let slice = self.db.timeline_range(room_id, since, current, limit)?;
            let state = if newly_joined.contains(room_id) {
                self.db.state_at(room_id, current)?
            } else {
                self.db.state_changes_in_range(room_id, since, current)?
            };

            let room = joined_room(slice, state);
            if !room.is_empty() {
                response.rooms.join.insert(room_id.clone(), room);
            }
        }

        for (room_id, change) in latest {
            match change.membership() {
                "leave" | "ban" if !joined.contains(&room_id) => {
                    let slice = self
                        .db
                        .timeline_range(&room_id, since, change.position, limit)?;
                    response.rooms.leave.insert(
                        room_id,
                        LeftRoom {
                            state: Events::default(),
                            timeline: timeline(&slice),
                        },
                    );
                }
                "invite" => {
                    response.rooms.invite.insert(room_id, invited_room(change));
                }
                _ => {}
            }
        }

        debug!(
            "✅ Incremental sync for {} ({}, {}]: {} joined, {} left, {} invited in {:?}",
            user_id,
            since,
            current,
            response.rooms.join.len(),
            response.rooms.leave.len(),
            response.rooms.invite.len(),
            start.elapsed()
        );
        Ok(response)
    }
}

fn timeline(slice: &TimelineSlice) -> Timeline {
    Timeline {
        events: slice.events.iter().map(PduEvent::to_sync_event).collect(),
        limited: slice.limited,
        prev_batch: slice.earliest.map(|position| position.to_string()),
    }
}

/// State already carried by the timeline is not repeated in `state`.
fn joined_room(slice: TimelineSlice, state: Vec<PduEvent>) -> JoinedRoom {
    let in_timeline: HashSet<&OwnedEventId> = slice.events.iter().map(|e| &e.event_id).collect();
    let state = state
        .iter()
        .filter(|event| !in_timeline.contains(&event.event_id))
        .map(PduEvent::to_sync_event)
        .collect();

    JoinedRoom {
        state: Events { events: state },
        timeline: timeline(&slice),
        ..Default::default()
    }
}

fn invited_room(change: &MembershipChange) -> InvitedRoom {
    InvitedRoom {
        invite_state: Events {
            events: vec![change.event.to_sync_event()],
        },
    }
}

fn latest_per_room(changes: &[MembershipChange]) -> BTreeMap<OwnedRoomId, &MembershipChange> {
    let mut latest = BTreeMap::new();
    for change in changes {
        latest.insert(change.room_id.clone(), change);
    }
    latest
}

/// Profile changes re-send `join`; only a real join pulls in the full state.
fn was_joined_before(change: &MembershipChange) -> bool {
    change
        .event
        .unsigned
        .as_ref()
        .and_then(|unsigned| unsigned.get("prev_content"))
        .and_then(|prev| prev.get("membership"))
        .and_then(|membership| membership.as_str())
        == Some("join")
}
