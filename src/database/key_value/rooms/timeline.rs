// =============================================================================
// Matrixon Matrix NextServer - Timeline Storage
// =============================================================================
//
// Author: arkSong <arksong2018@gmail.com>
// Version: 0.11.0-alpha
// Date: 2024-03-21
//
// =============================================================================

use ruma::EventId;
use serde_json::{json, Map, Value as JsonValue};
use tracing::trace;

use crate::{
    database::{Inner, MemoryDatabase},
    service::{self, pdu::PduEvent, sync::StreamPosition},
    Result,
};

impl service::rooms::timeline::Data for MemoryDatabase {
    fn append_pdu(&self, pdu: &PduEvent) -> Result<StreamPosition> {
        let mut inner = self.inner.write();
        if let Some((position, _)) = inner.pdus.get(&pdu.event_id) {
            trace!("Event {} already stored at {}", pdu.event_id, position);
            return Ok(*position);
        }

        let Inner {
            position: head,
            pdus,
            log,
            rooms,
            ..
        } = &mut *inner;
        let position = head.next();
        let mut pdu = pdu.clone();
        let room = rooms.entry(pdu.room_id.clone()).or_default();

        if let Some(key) = pdu.state_tuple() {
            if let Some((_, previous)) = room.state.get(&key).and_then(|id| pdus.get(id)) {
                let mut unsigned = match pdu.unsigned.take() {
                    Some(JsonValue::Object(map)) => map,
                    _ => Map::new(),
                };
                unsigned.insert("replaces_state".to_owned(), json!(previous.event_id));
                unsigned.insert("prev_content".to_owned(), previous.content.clone());
                pdu.unsigned = Some(JsonValue::Object(unsigned));
            }
            room.state.insert(key.clone(), pdu.event_id.clone());
            room.state_log.push((position, key, pdu.event_id.clone()));
        }

        room.timeline.push((position, pdu.event_id.clone()));
        room.extremities.retain(|id| !pdu.prev_events.contains(id));
        room.extremities.push(pdu.event_id.clone());

        log.insert(position, pdu.event_id.clone());
        pdus.insert(pdu.event_id.clone(), (position, pdu));
        *head = position;
        Ok(position)
    }

    fn get_pdu(&self, event_id: &EventId) -> Result<Option<PduEvent>> {
        Ok(self
            .inner
            .read()
            .pdus
            .get(event_id)
            .map(|(_, pdu)| pdu.clone()))
    }
}
