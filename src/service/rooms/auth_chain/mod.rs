// =============================================================================
// Matrixon Matrix NextServer - Auth Chain Module
// =============================================================================
//
// Author: arkSong <arksong2018@gmail.com>
// Version: 0.11.0-alpha
// Date: 2024-03-21
//
// =============================================================================

use std::{
    collections::{HashMap, HashSet},
    sync::Arc,
};

use parking_lot::Mutex;
use ruma::{EventId, OwnedEventId, RoomId};
use tracing::{debug, warn};

use super::timeline;
use crate::{service::pdu::PduEvent, Error, Result};

pub struct Service {
    pub timeline: Arc<dyn timeline::Data>,
    /// Per-event auth chains. Events are immutable, so entries never go stale.
    cache: Mutex<HashMap<OwnedEventId, Arc<HashSet<OwnedEventId>>>>,
}

impl Service {
    pub fn new(timeline: Arc<dyn timeline::Data>) -> Self {
        Self {
            timeline,
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// Every event reachable from `starting_events` over `auth_events`,
    /// each once, ordered by depth.
    #[tracing::instrument(skip(self, starting_events))]
    pub fn get_auth_chain(
        &self,
        room_id: &RoomId,
        starting_events: &[OwnedEventId],
    ) -> Result<Vec<PduEvent>> {
        let mut full_auth_chain = HashSet::new();
        let mut hits = 0;
        let mut misses = 0;

        for event_id in starting_events {
            let cached = self.cache.lock().get(event_id).cloned();
            let chain = match cached {
                Some(chain) => {
                    hits += 1;
                    chain
                }
                None => {
                    misses += 1;
                    let chain = Arc::new(self.get_auth_chain_inner(room_id, event_id)?);
                    self.cache.lock().insert(event_id.clone(), Arc::clone(&chain));
                    chain
                }
            };
            full_auth_chain.extend(chain.iter().cloned());
        }

        debug!(
            chain_length = ?full_auth_chain.len(),
            hits = ?hits,
            misses = ?misses,
            "Auth chain stats",
        );

        let mut events = Vec::with_capacity(full_auth_chain.len());
        for event_id in full_auth_chain {
            if let Some(pdu) = self.timeline.get_pdu(&event_id)? {
                events.push(pdu);
            }
        }
        events.sort_by(|a, b| a.depth.cmp(&b.depth).then_with(|| a.event_id.cmp(&b.event_id)));
        Ok(events)
    }

    fn get_auth_chain_inner(&self, room_id: &RoomId, event_id: &EventId) -> Result<HashSet<OwnedEventId>> {
        let mut todo = vec![event_id.to_owned()];
        let mut found = HashSet::new();

        while let Some(event_id) = todo.pop() {
            match self.timeline.get_pdu(&event_id)? {
                Some(pdu) => {
                    if pdu.room_id != room_id {
                        return Err(Error::Forbidden("Evil event in db".to_owned()));
                    }
                    for auth_event in &pdu.auth_events {
                        if found.insert(auth_event.clone()) {
                            todo.push(auth_event.clone());
                        }
                    }
                }
                None => {
                    warn!(?event_id, "Could not find pdu mentioned in auth events");
                }
            }
        }

        Ok(found)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{service::pdu::EventHash, test_utils::Fixture};
    use ruma::{room_id, user_id};
    use serde_json::json;

    #[test]
    fn test_chain_of_a_join_contains_create_and_rules() {
        let fixture = Fixture::with_public_room();
        let join = fixture.join(user_id!("@bob:hs1"));

        let chain = fixture
            .services
            .rooms
            .auth_chain
            .get_auth_chain(&fixture.room_id, &[join])
            .unwrap();
        let kinds: Vec<&str> = chain.iter().map(|pdu| pdu.kind.as_str()).collect();

        assert_eq!(kinds[0], "m.room.create");
        assert!(kinds.contains(&"m.room.join_rules"));
        let unique: HashSet<_> = chain.iter().map(|pdu| &pdu.event_id).collect();
        assert_eq!(unique.len(), chain.len());
    }

    #[test]
    fn test_foreign_auth_event_is_rejected() {
        let fixture = Fixture::with_public_room();
        let timeline = &fixture.services.rooms.timeline;
        let create = timeline.latest_events(&fixture.room_id).unwrap();

        // An event from another room citing this room's events.
        let foreign = PduEvent {
            event_id: "$evil:hs9".try_into().unwrap(),
            room_id: room_id!("!other:hs9").to_owned(),
            sender: user_id!("@eve:hs9").to_owned(),
            origin: None,
            origin_server_ts: 0,
            kind: "m.room.create".to_owned(),
            content: json!({}),
            state_key: Some(String::new()),
            prev_events: vec![],
            depth: 1,
            auth_events: vec![],
            redacts: None,
            unsigned: None,
            hashes: EventHash::default(),
            signatures: None,
        };
        timeline.db.append_pdu(&foreign).unwrap();

        let mut citing = create[0].clone();
        citing.event_id = "$citing:hs1".try_into().unwrap();
        citing.auth_events = vec![foreign.event_id.clone()];
        timeline.db.append_pdu(&citing).unwrap();

        let result = fixture
            .services
            .rooms
            .auth_chain
            .get_auth_chain(&fixture.room_id, &[citing.event_id]);
        assert!(matches!(result, Err(Error::Forbidden(message)) if message == "Evil event in db"));
    }
}
