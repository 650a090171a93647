// =============================================================================
// Matrixon Matrix NextServer - Account Data Storage Interface
// =============================================================================
//
// Author: arkSong <arksong2018@gmail.com>
// Version: 0.11.0-alpha
// Date: 2024-03-21
//
// =============================================================================

use std::collections::BTreeMap;

use ruma::{OwnedRoomId, RoomId, UserId};
use serde_json::Value as JsonValue;

use super::AccountDataEvent;
use crate::{service::sync::StreamPosition, Result};

/// Every account data entry of a user.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct AccountDataSet {
    pub global: Vec<AccountDataEvent>,
    pub rooms: BTreeMap<OwnedRoomId, Vec<AccountDataEvent>>,
}

/// Account data types that changed inside a position window.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct AccountDataChanges {
    pub global: Vec<String>,
    pub rooms: BTreeMap<OwnedRoomId, Vec<String>>,
}

impl AccountDataChanges {
    pub fn is_empty(&self) -> bool {
        self.global.is_empty() && self.rooms.is_empty()
    }
}

pub trait Data: Send + Sync {
    /// Places one event in the account data of the user and removes the
    /// previous entry. Returns the stream position assigned to the change.
    fn update(
        &self,
        room_id: Option<&RoomId>,
        user_id: &UserId,
        kind: &str,
        content: &JsonValue,
    ) -> Result<StreamPosition>;

    /// Current value of one account data type.
    fn get(
        &self,
        room_id: Option<&RoomId>,
        user_id: &UserId,
        kind: &str,
    ) -> Result<Option<AccountDataEvent>>;

    /// Every global and per-room entry of the user.
    fn all(&self, user_id: &UserId) -> Result<AccountDataSet>;

    /// Types whose latest change lies in `(from, to]`, in storage order.
    fn changes_in_range(
        &self,
        user_id: &UserId,
        from: StreamPosition,
        to: StreamPosition,
    ) -> Result<AccountDataChanges>;
}
