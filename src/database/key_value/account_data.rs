// =============================================================================
// Matrixon Matrix NextServer - Account Data Storage
// =============================================================================
//
// Author: arkSong <arksong2018@gmail.com>
// Version: 0.11.0-alpha
// Date: 2024-03-21
//
// =============================================================================

use ruma::{RoomId, UserId};
use serde_json::Value as JsonValue;

use crate::{
    database::MemoryDatabase,
    service::{
        self,
        account_data::{AccountDataChanges, AccountDataEvent, AccountDataSet},
        sync::StreamPosition,
    },
    Result,
};

impl service::account_data::Data for MemoryDatabase {
    fn update(
        &self,
        room_id: Option<&RoomId>,
        user_id: &UserId,
        kind: &str,
        content: &JsonValue,
    ) -> Result<StreamPosition> {
        let mut inner = self.inner.write();
        let position = inner.position.next();
        inner.account_data.insert(
            (user_id.to_owned(), room_id.map(ToOwned::to_owned), kind.to_owned()),
            (
                position,
                AccountDataEvent {
                    kind: kind.to_owned(),
                    content: content.clone(),
                },
            ),
        );
        inner.position = position;
        Ok(position)
    }

    fn get(
        &self,
        room_id: Option<&RoomId>,
        user_id: &UserId,
        kind: &str,
    ) -> Result<Option<AccountDataEvent>> {
        let key = (user_id.to_owned(), room_id.map(ToOwned::to_owned), kind.to_owned());
        Ok(self
            .inner
            .read()
            .account_data
            .get(&key)
            .map(|(_, event)| event.clone()))
    }

    fn all(&self, user_id: &UserId) -> Result<AccountDataSet> {
        let inner = self.inner.read();
        let mut set = AccountDataSet::default();

        for ((owner, room_id, _), (_, event)) in &inner.account_data {
            if owner != user_id {
                continue;
            }
            match room_id {
                None => set.global.push(event.clone()),
                Some(room_id) => set
                    .rooms
                    .entry(room_id.clone())
                    .or_default()
                    .push(event.clone()),
            }
        }
        Ok(set)
    }

    fn changes_in_range(
        &self,
        user_id: &UserId,
        from: StreamPosition,
        to: StreamPosition,
    ) -> Result<AccountDataChanges> {
        let inner = self.inner.read();
        let mut changed: Vec<_> = inner
            .account_data
            .iter()
            .filter(|((owner, _, _), (position, _))| {
                owner == user_id && *position > from && *position <= to
            })
            .map(|((_, room_id, kind), (position, _))| (*position, room_id, kind))
            .collect();
        changed.sort_by_key(|(position, _, _)| *position);

        let mut changes = AccountDataChanges::default();
        for (_, room_id, kind) in changed {
            match room_id {
                None => changes.global.push(kind.clone()),
                Some(room_id) => changes
                    .rooms
                    .entry(room_id.clone())
                    .or_default()
                    .push(kind.clone()),
            }
        }
        Ok(changes)
    }
}
