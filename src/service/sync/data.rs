// =============================================================================
// Matrixon Matrix NextServer - Sync Storage Interface
// =============================================================================
//
// Author: arkSong <arksong2018@gmail.com>
// Version: 0.11.0-alpha
// Date: 2024-03-21
//
// Position-ordered queries the snapshot assembler is built on. Windows are
// always `(from, to]`: exclusive start, inclusive end.
//
// =============================================================================

use ruma::{OwnedRoomId, RoomId, UserId};

use super::StreamPosition;
use crate::{service::pdu::PduEvent, Result};

/// The most recent events of a room inside a window, oldest first.
#[derive(Clone, Debug, Default)]
pub struct TimelineSlice {
    pub events: Vec<PduEvent>,
    /// More events exist in the window than were returned.
    pub limited: bool,
    /// Position of the oldest returned event.
    pub earliest: Option<StreamPosition>,
}

/// A change of the user's own membership.
#[derive(Clone, Debug)]
pub struct MembershipChange {
    pub room_id: OwnedRoomId,
    pub position: StreamPosition,
    pub event: PduEvent,
}

impl MembershipChange {
    pub fn membership(&self) -> &str {
        self.event.membership().unwrap_or_default()
    }
}

pub trait Data: Send + Sync {
    /// Highest position assigned so far.
    fn current_position(&self) -> Result<StreamPosition>;

    /// Rooms the user is joined to as of `at`.
    fn joined_rooms(&self, user_id: &UserId, at: StreamPosition) -> Result<Vec<OwnedRoomId>>;

    /// Room state as of `at`.
    fn state_at(&self, room_id: &RoomId, at: StreamPosition) -> Result<Vec<PduEvent>>;

    /// The most recent `limit` events in `(from, to]`.
    fn timeline_range(
        &self,
        room_id: &RoomId,
        from: StreamPosition,
        to: StreamPosition,
        limit: usize,
    ) -> Result<TimelineSlice>;

    /// Latest state event per `(type, state_key)` changed in `(from, to]`.
    fn state_changes_in_range(
        &self,
        room_id: &RoomId,
        from: StreamPosition,
        to: StreamPosition,
    ) -> Result<Vec<PduEvent>>;

    /// Changes of the user's membership in `(from, to]`, oldest first.
    fn membership_changes(
        &self,
        user_id: &UserId,
        from: StreamPosition,
        to: StreamPosition,
    ) -> Result<Vec<MembershipChange>>;

    /// Current state of a room, for the room state endpoints.
    fn current_state_events(&self, room_id: &RoomId) -> Result<Vec<PduEvent>>;

    /// One current state event.
    fn current_state_event(
        &self,
        room_id: &RoomId,
        kind: &str,
        state_key: &str,
    ) -> Result<Option<PduEvent>>;
}
