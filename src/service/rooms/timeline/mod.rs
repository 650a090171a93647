// =============================================================================
// Matrixon Matrix NextServer - Timeline Module
// =============================================================================
//
// Author: arkSong <arksong2018@gmail.com>
// Version: 0.11.0-alpha
// Date: 2024-03-21
//
// Description:
//   Builds new events on top of the room's forward extremities and appends
//   events to the stream. Every append advances the stream notifier for the
//   room's members before returning, which is what wakes waiting syncs.
//
// =============================================================================

mod data;

use std::{sync::Arc, time::Instant};

pub use data::Data;
use ruma::{
    signatures::Ed25519KeyPair, EventId, OwnedEventId, OwnedServerName, RoomId, ServerName,
    UserId,
};
use tracing::{debug, error, info, instrument};

use super::{event_auth::AuthRules, state};
use crate::{
    service::{
        pdu::{EventHash, PduBuilder, PduEvent, CREATE_EVENT_TYPE, MEMBER_EVENT_TYPE},
        sync::{StreamNotifier, StreamPosition},
    },
    utils, Error, Result,
};

pub struct Service {
    pub db: Arc<dyn Data>,
    pub state: Arc<state::Service>,
    pub event_auth: Arc<dyn AuthRules>,
    pub notifier: Arc<StreamNotifier>,
    pub server_name: OwnedServerName,
    pub keypair: Arc<Ed25519KeyPair>,
}

impl Service {
    pub fn get_pdu(&self, event_id: &EventId) -> Result<Option<PduEvent>> {
        self.db.get_pdu(event_id)
    }

    /// The room's forward extremities as events.
    pub fn latest_events(&self, room_id: &RoomId) -> Result<Vec<PduEvent>> {
        self.state
            .forward_extremities(room_id)?
            .iter()
            .filter_map(|event_id| self.get_pdu(event_id).transpose())
            .collect()
    }

    /// Fills in the DAG fields of a new event authored by `origin` and checks
    /// it against the current room state. The event is neither hashed nor
    /// signed, and nothing is stored.
    #[instrument(level = "debug", skip(self, builder), fields(kind = %builder.event_type))]
    pub fn create_event(
        &self,
        builder: PduBuilder,
        sender: &UserId,
        room_id: &RoomId,
        origin: &ServerName,
    ) -> Result<PduEvent> {
        let PduBuilder {
            event_type,
            content,
            state_key,
            timestamp,
        } = builder;

        let prev_pdus: Vec<PduEvent> = self.latest_events(room_id)?.into_iter().take(20).collect();
        if prev_pdus.is_empty() && event_type != CREATE_EVENT_TYPE {
            return Err(Error::NotFound("Room does not exist".to_owned()));
        }

        // Our depth is the maximum depth of prev_events + 1
        let depth = prev_pdus.iter().map(|pdu| pdu.depth).max().unwrap_or(0) + 1;

        let auth_events = self.state.auth_events(
            room_id,
            &event_type,
            sender,
            state_key.as_deref(),
            &content,
        )?;

        let event_id: OwnedEventId = format!("${}:{}", utils::random_string(18), origin)
            .try_into()
            .map_err(|_| Error::Internal("Generated an invalid event ID".to_owned()))?;

        let mut pdu = PduEvent {
            event_id,
            room_id: room_id.to_owned(),
            sender: sender.to_owned(),
            origin: Some(origin.to_owned()),
            origin_server_ts: timestamp.unwrap_or_else(utils::millis_since_unix_epoch),
            kind: event_type,
            content,
            state_key,
            prev_events: prev_pdus.into_iter().map(|pdu| pdu.event_id).collect(),
            depth,
            auth_events,
            redacts: None,
            unsigned: None,
            hashes: EventHash::default(),
            signatures: None,
        };

        let state = self.state.current_state(room_id)?;
        self.event_auth.check(&pdu, &state)?;

        Ok(pdu)
    }

    /// [`create_event`](Self::create_event) for a local sender, hashed and
    /// signed with this server's key.
    pub fn create_hash_and_sign_event(
        &self,
        builder: PduBuilder,
        sender: &UserId,
        room_id: &RoomId,
    ) -> Result<PduEvent> {
        let pdu = self.create_event(builder, sender, room_id, &self.server_name)?;
        let room_version = if pdu.kind == CREATE_EVENT_TYPE {
            state::room_version_of(&pdu.content)?
        } else {
            self.state.room_version(room_id)?
        };

        let mut pdu_json = pdu.to_canonical_object()?;
        ruma::signatures::hash_and_sign_event(
            self.server_name.as_str(),
            &*self.keypair,
            &mut pdu_json,
            &room_version,
        )
        .map_err(|e| match e {
            ruma::signatures::Error::PduSize => {
                Error::BadRequest("Event is too large".to_owned())
            }
            e => {
                error!("❌ Signing {} failed: {}", pdu.event_id, e);
                Error::Internal(format!("Signing {} failed", pdu.event_id))
            }
        })?;

        PduEvent::from_canonical_object(pdu_json).map_err(|e| {
            Error::Internal(format!("Signed event {} is unreadable: {e}", pdu.event_id))
        })
    }

    /// Stores the event and wakes the syncs of everyone it concerns: the
    /// joined members after the commit and the target of a membership change.
    #[instrument(level = "debug", skip(self, pdu), fields(event_id = %pdu.event_id))]
    pub fn append_pdu(&self, pdu: &PduEvent) -> Result<StreamPosition> {
        let start = Instant::now();
        let position = self.db.append_pdu(pdu)?;

        let mut users = self.state.room_members(&pdu.room_id)?;
        if pdu.kind == MEMBER_EVENT_TYPE {
            if let Some(target) = pdu.state_key.as_deref().and_then(|key| UserId::parse(key).ok()) {
                if !users.contains(&target) {
                    users.push(target);
                }
            }
        }
        self.notifier
            .advance(position, users.iter().map(|user| &**user));

        debug!(
            "✅ Appended {} to {} at {} for {} users in {:?}",
            pdu.event_id,
            pdu.room_id,
            position,
            users.len(),
            start.elapsed()
        );
        Ok(position)
    }

    /// Builds an event authored by a local user and appends it.
    pub fn build_and_append_pdu(
        &self,
        builder: PduBuilder,
        sender: &UserId,
        room_id: &RoomId,
    ) -> Result<(PduEvent, StreamPosition)> {
        let pdu = self.create_hash_and_sign_event(builder, sender, room_id)?;
        let position = self.append_pdu(&pdu)?;
        info!("📝 {} sent {} in {}", sender, pdu.kind, room_id);
        Ok((pdu, position))
    }
}
