// =============================================================================
// Matrixon Matrix NextServer - Account Data Module
// =============================================================================
//
// Author: arkSong <arksong2018@gmail.com>
// Version: 0.11.0-alpha
// Date: 2024-03-21
//
// Description:
//   User account data (global and per room). Writes go through the stream
//   notifier so a waiting sync wakes for account data only changes.
//
// =============================================================================

mod data;

use std::{sync::Arc, time::Instant};

pub use data::{AccountDataChanges, AccountDataSet, Data};
use ruma::{RoomId, UserId};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use tracing::{debug, info, instrument};

use crate::{
    service::sync::{StreamNotifier, StreamPosition},
    Error, Result,
};

/// An account data event as delivered to clients.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
pub struct AccountDataEvent {
    #[serde(rename = "type")]
    pub kind: String,
    pub content: JsonValue,
}

pub struct Service {
    pub db: Arc<dyn Data>,
    notifier: Arc<StreamNotifier>,
}

impl Service {
    pub fn new(db: Arc<dyn Data>, notifier: Arc<StreamNotifier>) -> Self {
        Self { db, notifier }
    }

    /// Places one event in the account data of the user and wakes the
    /// user's waiting syncs.
    #[instrument(level = "debug", skip(self, content))]
    pub fn update(
        &self,
        room_id: Option<&RoomId>,
        user_id: &UserId,
        kind: &str,
        content: &JsonValue,
    ) -> Result<StreamPosition> {
        let start = Instant::now();
        if !content.is_object() {
            return Err(Error::BadJson(
                "Account data content must be a JSON object".to_owned(),
            ));
        }

        let position = self.db.update(room_id, user_id, kind, content)?;
        self.notifier.advance(position, [user_id]);

        info!(
            "✅ Account data {} updated for {} at {} in {:?}",
            kind,
            user_id,
            position,
            start.elapsed()
        );
        Ok(position)
    }

    pub fn get(
        &self,
        room_id: Option<&RoomId>,
        user_id: &UserId,
        kind: &str,
    ) -> Result<Option<AccountDataEvent>> {
        self.db.get(room_id, user_id, kind)
    }

    pub fn all(&self, user_id: &UserId) -> Result<AccountDataSet> {
        self.db.all(user_id)
    }

    #[instrument(level = "debug", skip(self))]
    pub fn changes_in_range(
        &self,
        user_id: &UserId,
        from: StreamPosition,
        to: StreamPosition,
    ) -> Result<AccountDataChanges> {
        let changes = self.db.changes_in_range(user_id, from, to)?;
        debug!(
            "🔧 {} global and {} room account data changes in ({}, {}]",
            changes.global.len(),
            changes.rooms.len(),
            from,
            to
        );
        Ok(changes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::MemoryDatabase;
    use ruma::{room_id, user_id};
    use serde_json::json;
    use tokio_test::{assert_pending, assert_ready, task};

    fn service() -> (Service, Arc<StreamNotifier>) {
        let db = Arc::new(MemoryDatabase::new());
        let notifier = StreamNotifier::new(StreamPosition::ZERO);
        (Service::new(db, Arc::clone(&notifier)), notifier)
    }

    #[test]
    fn test_update_wakes_the_owner_only() {
        let (service, notifier) = service();
        let alice = user_id!("@alice:hs1");
        let mut alice_listener = notifier.subscribe(alice);
        let mut bob_listener = notifier.subscribe(user_id!("@bob:hs1"));

        let mut alice_wait = task::spawn(alice_listener.wait(StreamPosition::ZERO));
        let mut bob_wait = task::spawn(bob_listener.wait(StreamPosition::ZERO));
        assert_pending!(alice_wait.poll());
        assert_pending!(bob_wait.poll());

        let position = service
            .update(None, alice, "m.push_rules", &json!({ "global": {} }))
            .unwrap();

        assert_eq!(assert_ready!(alice_wait.poll()).unwrap(), position);
        assert_pending!(bob_wait.poll());
    }

    #[test]
    fn test_update_rejects_non_object_content() {
        let (service, _) = service();
        let result = service.update(None, user_id!("@alice:hs1"), "m.tag", &json!([1, 2]));
        assert!(matches!(result, Err(Error::BadJson(_))));
    }

    #[test]
    fn test_room_and_global_entries_are_separate() {
        let (service, _) = service();
        let alice = user_id!("@alice:hs1");
        let room = room_id!("!r:hs1");

        service.update(None, alice, "m.tag", &json!({ "scope": "global" })).unwrap();
        service.update(Some(room), alice, "m.tag", &json!({ "scope": "room" })).unwrap();

        let global = service.get(None, alice, "m.tag").unwrap().unwrap();
        let scoped = service.get(Some(room), alice, "m.tag").unwrap().unwrap();
        assert_eq!(global.content["scope"], "global");
        assert_eq!(scoped.content["scope"], "room");

        let all = service.all(alice).unwrap();
        assert_eq!(all.global.len(), 1);
        assert_eq!(all.rooms[room].len(), 1);
    }

    #[test]
    fn test_changes_in_range_reports_each_type_once() {
        let (service, _) = service();
        let alice = user_id!("@alice:hs1");

        let first = service.update(None, alice, "m.tag", &json!({ "v": 1 })).unwrap();
        service.update(None, alice, "m.tag", &json!({ "v": 2 })).unwrap();
        service.update(None, alice, "m.push_rules", &json!({})).unwrap();
        let last = service.update(None, alice, "m.direct", &json!({})).unwrap();

        let changes = service
            .changes_in_range(alice, StreamPosition::ZERO, last)
            .unwrap();
        assert_eq!(changes.global, vec!["m.tag", "m.push_rules", "m.direct"]);

        let later = service.changes_in_range(alice, first, last).unwrap();
        assert_eq!(later.global.len(), 3);

        let none = service.changes_in_range(alice, last, last).unwrap();
        assert!(none.is_empty());
    }
}
