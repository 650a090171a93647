// =============================================================================
// Matrixon Matrix NextServer - Room State Storage Interface
// =============================================================================
//
// Author: arkSong <arksong2018@gmail.com>
// Version: 0.11.0-alpha
// Date: 2024-03-21
//
// =============================================================================

use ruma::{OwnedEventId, OwnedUserId, RoomId};

use super::StateMap;
use crate::Result;

pub trait Data: Send + Sync {
    /// True once the room has at least one event.
    fn room_exists(&self, room_id: &RoomId) -> Result<bool>;

    /// The room state after the latest event.
    fn current_state(&self, room_id: &RoomId) -> Result<StateMap>;

    /// The room state an event with these `prev_events` applies to. Returns
    /// `None` if none of the events are known.
    fn state_before(&self, room_id: &RoomId, prev_events: &[OwnedEventId])
        -> Result<Option<StateMap>>;

    /// Users whose current membership is `join`.
    fn room_members(&self, room_id: &RoomId) -> Result<Vec<OwnedUserId>>;

    /// Events no other event of the room references as `prev_events`.
    fn forward_extremities(&self, room_id: &RoomId) -> Result<Vec<OwnedEventId>>;
}
