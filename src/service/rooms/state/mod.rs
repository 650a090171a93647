// =============================================================================
// Matrixon Matrix NextServer - Room State Module
// =============================================================================
//
// Author: arkSong <arksong2018@gmail.com>
// Version: 0.11.0-alpha
// Date: 2024-03-21
//
// Description:
//   Room state queries: current state, state before a set of events,
//   membership and the auth events a new event must reference.
//
// =============================================================================

mod data;

use std::{collections::BTreeMap, sync::Arc};

pub use data::Data;
use ruma::{OwnedEventId, OwnedUserId, RoomId, RoomVersionId, UserId};
use serde_json::Value as JsonValue;
use tracing::{debug, instrument};

use crate::{
    service::pdu::{
        PduEvent, CREATE_EVENT_TYPE, JOIN_RULES_EVENT_TYPE, MEMBER_EVENT_TYPE,
        POWER_LEVELS_EVENT_TYPE,
    },
    Error, Result,
};

/// Room state keyed by `(type, state_key)`.
pub type StateMap = BTreeMap<(String, String), PduEvent>;

pub struct Service {
    pub db: Arc<dyn Data>,
}

impl Service {
    pub fn room_exists(&self, room_id: &RoomId) -> Result<bool> {
        self.db.room_exists(room_id)
    }

    pub fn current_state(&self, room_id: &RoomId) -> Result<StateMap> {
        self.db.current_state(room_id)
    }

    /// State the event with `prev_events` applies to.
    #[instrument(level = "debug", skip(self))]
    pub fn state_before(&self, room_id: &RoomId, prev_events: &[OwnedEventId]) -> Result<StateMap> {
        self.db.state_before(room_id, prev_events)?.ok_or_else(|| {
            Error::BadJson("The event references unknown prev_events".to_owned())
        })
    }

    pub fn room_members(&self, room_id: &RoomId) -> Result<Vec<OwnedUserId>> {
        self.db.room_members(room_id)
    }

    pub fn forward_extremities(&self, room_id: &RoomId) -> Result<Vec<OwnedEventId>> {
        self.db.forward_extremities(room_id)
    }

    /// Version from the create event.
    pub fn room_version(&self, room_id: &RoomId) -> Result<RoomVersionId> {
        let state = self.current_state(room_id)?;
        let create = state
            .get(&(CREATE_EVENT_TYPE.to_owned(), String::new()))
            .ok_or_else(|| Error::NotFound("Room does not exist".to_owned()))?;

        room_version_of(&create.content)
    }

    /// The state events a new event must cite in `auth_events`.
    #[instrument(level = "debug", skip(self, content))]
    pub fn auth_events(
        &self,
        room_id: &RoomId,
        kind: &str,
        sender: &UserId,
        state_key: Option<&str>,
        content: &JsonValue,
    ) -> Result<Vec<OwnedEventId>> {
        if kind == CREATE_EVENT_TYPE {
            return Ok(Vec::new());
        }

        let mut keys = vec![
            (CREATE_EVENT_TYPE.to_owned(), String::new()),
            (POWER_LEVELS_EVENT_TYPE.to_owned(), String::new()),
            (MEMBER_EVENT_TYPE.to_owned(), sender.to_string()),
        ];
        if kind == MEMBER_EVENT_TYPE {
            if let Some(state_key) = state_key {
                keys.push((MEMBER_EVENT_TYPE.to_owned(), state_key.to_owned()));
            }
            let membership = content.get("membership").and_then(JsonValue::as_str);
            if matches!(membership, Some("join" | "invite")) {
                keys.push((JOIN_RULES_EVENT_TYPE.to_owned(), String::new()));
            }
        }

        let state = self.current_state(room_id)?;
        let mut auth_events: Vec<OwnedEventId> = Vec::new();
        for key in &keys {
            if let Some(pdu) = state.get(key) {
                if !auth_events.contains(&pdu.event_id) {
                    auth_events.push(pdu.event_id.clone());
                }
            }
        }

        debug!("🔧 {} auth events for {} in {}", auth_events.len(), kind, room_id);
        Ok(auth_events)
    }
}

/// The version a create event's content names. Rooms created without one are
/// version 1.
pub fn room_version_of(create_content: &JsonValue) -> Result<RoomVersionId> {
    let version = create_content
        .get("room_version")
        .and_then(JsonValue::as_str)
        .unwrap_or("1");
    RoomVersionId::try_from(version)
        .map_err(|_| Error::BadJson(format!("Invalid room version {version}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::Fixture;
    use ruma::{room_id, user_id};
    use serde_json::json;

    #[test]
    fn test_members_and_extremities_follow_the_timeline() {
        let fixture = Fixture::with_public_room();
        let state = &fixture.services.rooms.state;
        assert_eq!(state.room_members(&fixture.room_id).unwrap(), vec![fixture.alice().to_owned()]);

        let bob = user_id!("@bob:hs1");
        let join = fixture.join(bob);
        let mut members = state.room_members(&fixture.room_id).unwrap();
        members.sort();
        assert_eq!(members.len(), 2);
        assert_eq!(state.forward_extremities(&fixture.room_id).unwrap(), vec![join]);
    }

    #[test]
    fn test_state_before_is_taken_at_prev_events() {
        let fixture = Fixture::with_public_room();
        let before = fixture.services.rooms.state.forward_extremities(&fixture.room_id).unwrap();
        fixture.set_join_rule("invite");

        let old = fixture.services.rooms.state.state_before(&fixture.room_id, &before).unwrap();
        let rules = &old[&(JOIN_RULES_EVENT_TYPE.to_owned(), String::new())];
        assert_eq!(rules.content["join_rule"], "public");

        let unknown = fixture
            .services
            .rooms
            .state
            .state_before(&fixture.room_id, &[OwnedEventId::try_from("$nope:hs1").unwrap()]);
        assert!(matches!(unknown, Err(Error::BadJson(_))));
    }

    #[test]
    fn test_auth_events_for_join() {
        let fixture = Fixture::with_public_room();
        let state = &fixture.services.rooms.state;
        let bob = user_id!("@bob:hs2");

        let auth_events = state
            .auth_events(
                &fixture.room_id,
                MEMBER_EVENT_TYPE,
                bob,
                Some(bob.as_str()),
                &json!({ "membership": "join" }),
            )
            .unwrap();
        let current = state.current_state(&fixture.room_id).unwrap();
        let create = &current[&(CREATE_EVENT_TYPE.to_owned(), String::new())];
        let rules = &current[&(JOIN_RULES_EVENT_TYPE.to_owned(), String::new())];

        assert!(auth_events.contains(&create.event_id));
        assert!(auth_events.contains(&rules.event_id));
        // bob has no membership yet
        assert_eq!(auth_events.len(), 3);
    }

    #[test]
    fn test_room_version_of_unknown_room() {
        let fixture = Fixture::with_public_room();
        assert_eq!(
            fixture.services.rooms.state.room_version(&fixture.room_id).unwrap(),
            RoomVersionId::V1
        );
        let missing = fixture.services.rooms.state.room_version(room_id!("!missing:hs1"));
        assert!(matches!(missing, Err(Error::NotFound(_))));
    }

    #[test]
    fn test_room_version_from_create_content() {
        assert_eq!(room_version_of(&json!({})).unwrap(), RoomVersionId::V1);
        assert_eq!(
            room_version_of(&json!({ "room_version": "10" })).unwrap(),
            RoomVersionId::V10
        );
        assert!(room_version_of(&json!({ "room_version": "" })).is_err());
    }
}
