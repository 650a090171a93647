// =============================================================================
// Matrixon Matrix NextServer - Federation Join Module
// =============================================================================
//
// Author: arkSong <arksong2018@gmail.com>
// Version: 0.11.0-alpha
// Date: 2024-03-21
//
// Description:
//   The two-phase join handshake with remote servers. `make_join` hands out
//   an unsigned join template; `send_join` takes the remote server's signed
//   join back, verifies it and commits it to the room.
//
//   A join moves Proposed -> Verified -> Committed. A `VerifiedJoin` can only
//   be produced by `verify_join`, so nothing unchecked reaches the timeline.
//
// =============================================================================

pub mod keyring;

use std::{collections::BTreeMap, sync::Arc, time::Instant};

use ruma::{
    canonical_json::redact, signatures::Verified, EventId, OwnedServerName, RoomId,
    RoomVersionId, ServerName, UserId,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value as JsonValue};
use tracing::{debug, error, info, instrument, warn};

use self::keyring::KeyRing;
use crate::{
    service::{
        pdu::{PduBuilder, PduEvent, MEMBER_EVENT_TYPE},
        rooms,
        sync::StreamPosition,
    },
    utils, Error, Result,
};

/// `GET /make_join` response body.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct MakeJoinResponse {
    pub room_version: RoomVersionId,
    pub event: JsonValue,
}

/// `PUT /send_join` response body.
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct SendJoinResponse {
    pub state: Vec<JsonValue>,
    pub auth_chain: Vec<JsonValue>,
}

/// A join event built for a remote user. Never persisted.
#[derive(Clone, Debug)]
pub struct JoinProposal {
    pub room_version: RoomVersionId,
    pub event: PduEvent,
}

/// A join that passed every check of [`Service::verify_join`].
#[derive(Debug)]
pub struct VerifiedJoin {
    pdu: PduEvent,
}

impl VerifiedJoin {
    pub fn pdu(&self) -> &PduEvent {
        &self.pdu
    }
}

/// A verified join and the stream position it was committed at.
#[derive(Debug)]
pub struct CommittedJoin {
    pub pdu: PduEvent,
    pub position: StreamPosition,
}

pub struct Service {
    server_name: OwnedServerName,
    allow_federation: bool,
    rooms: Arc<rooms::Service>,
    keyring: Arc<dyn KeyRing>,
}

impl Service {
    pub fn new(
        server_name: OwnedServerName,
        allow_federation: bool,
        rooms: Arc<rooms::Service>,
        keyring: Arc<dyn KeyRing>,
    ) -> Self {
        Self {
            server_name,
            allow_federation,
            rooms,
            keyring,
        }
    }

    fn ensure_federation_enabled(&self) -> Result<()> {
        if !self.allow_federation {
            return Err(Error::Forbidden("Federation is disabled".to_owned()));
        }
        Ok(())
    }

    /// Builds the join template `user_id` has to sign to enter `room_id`.
    #[instrument(level = "debug", skip(self))]
    pub fn make_join(
        &self,
        origin: &ServerName,
        room_id: &RoomId,
        user_id: &UserId,
    ) -> Result<MakeJoinResponse> {
        self.ensure_federation_enabled()?;
        let proposal = self.propose_join(origin, room_id, user_id)?;
        Ok(MakeJoinResponse {
            room_version: proposal.room_version,
            event: proposal.event.to_federation_json()?,
        })
    }

    pub fn propose_join(
        &self,
        origin: &ServerName,
        room_id: &RoomId,
        user_id: &UserId,
    ) -> Result<JoinProposal> {
        let start = Instant::now();
        if user_id.server_name() != origin {
            return Err(Error::Forbidden(
                "The join must be sent by the server of the user".to_owned(),
            ));
        }
        if !self.rooms.state.room_exists(room_id)? {
            return Err(Error::NotFound("Room does not exist".to_owned()));
        }

        // The joining server authors the event, so the template carries its
        // name as origin and in the event ID.
        let event = self.rooms.timeline.create_event(
            PduBuilder::state(
                MEMBER_EVENT_TYPE,
                user_id.as_str(),
                json!({ "membership": "join" }),
            ),
            user_id,
            room_id,
            origin,
        )?;
        let room_version = self.rooms.state.room_version(room_id)?;

        info!(
            "✅ Join proposal {} for {} in {} built in {:?}",
            event.event_id,
            user_id,
            room_id,
            start.elapsed()
        );
        Ok(JoinProposal {
            room_version,
            event,
        })
    }

    /// Admits a remote user's signed join. Returns the room's state and its
    /// auth chain after the join was committed.
    #[instrument(level = "debug", skip(self, body))]
    pub async fn send_join(
        &self,
        origin: &ServerName,
        room_id: &RoomId,
        event_id: &EventId,
        body: &JsonValue,
    ) -> Result<SendJoinResponse> {
        let start = Instant::now();
        self.ensure_federation_enabled()?;

        let verified = self.verify_join(origin, room_id, event_id, body).await?;
        let committed = self.commit_join(verified)?;
        let response = self.join_response(&committed)?;

        info!(
            "✅ {} joined {} at {} in {:?}",
            committed.pdu.sender,
            room_id,
            committed.position,
            start.elapsed()
        );
        Ok(response)
    }

    pub async fn verify_join(
        &self,
        origin: &ServerName,
        room_id: &RoomId,
        event_id: &EventId,
        body: &JsonValue,
    ) -> Result<VerifiedJoin> {
        if !body.is_object() {
            return Err(Error::NotJson(
                "The request body could not be decoded into valid JSON".to_owned(),
            ));
        }
        let value = utils::to_canonical_object(body)
            .map_err(|e| Error::BadJson(format!("The join event is not canonical JSON: {e}")))?;
        let pdu = PduEvent::from_canonical_object(value.clone()).map_err(|e| {
            Error::NotJson(format!(
                "The request body could not be decoded into a valid event: {e}"
            ))
        })?;

        if pdu.kind != MEMBER_EVENT_TYPE
            || pdu.membership() != Some("join")
            || pdu.state_key.as_deref() != Some(pdu.sender.as_str())
        {
            return Err(Error::BadJson(
                "The event must be a join of its sender".to_owned(),
            ));
        }

        if pdu.room_id != room_id {
            return Err(Error::BadJson(
                "The room ID in the request path must match the room ID in the join event JSON"
                    .to_owned(),
            ));
        }
        if pdu.event_id != event_id {
            return Err(Error::BadJson(
                "The event ID in the request path must match the event ID in the join event JSON"
                    .to_owned(),
            ));
        }

        if pdu.origin() != origin || pdu.sender.server_name() != origin {
            return Err(Error::Forbidden(
                "The join must be sent by the server it originated on".to_owned(),
            ));
        }

        let room_version = self.rooms.state.room_version(room_id)?;
        let keys = self
            .keyring
            .verify_keys(origin, pdu.origin_server_ts)
            .await
            .map_err(|e| {
                warn!("❌ No keys for {} at {}: {}", origin, pdu.origin_server_ts, e);
                Error::Forbidden("The join must be signed by the server it originated on".to_owned())
            })?;
        let key_map = BTreeMap::from([(origin.as_str().to_owned(), keys)]);

        let pdu = match ruma::signatures::verify_event(&key_map, &value, &room_version) {
            Ok(Verified::All) => pdu,
            Ok(Verified::Signatures) => {
                // Only the redacted form is covered by the signature.
                warn!("⚠️ Content hash mismatch on {}, keeping the redacted event", pdu.event_id);
                let redacted = redact(value, &room_version, None).map_err(|e| {
                    Error::BadJson(format!("The join event could not be redacted: {e}"))
                })?;
                PduEvent::from_canonical_object(redacted).map_err(|e| {
                    Error::BadJson(format!("The redacted join event is invalid: {e}"))
                })?
            }
            Err(e) => {
                warn!("❌ Join {} failed signature check: {}", pdu.event_id, e);
                return Err(Error::Forbidden(
                    "The join must be signed by the server it originated on".to_owned(),
                ));
            }
        };

        let state = self.rooms.state.state_before(room_id, &pdu.prev_events)?;
        self.rooms.event_auth.check(&pdu, &state)?;

        debug!("✅ Join {} from {} verified", pdu.event_id, origin);
        Ok(VerifiedJoin { pdu })
    }

    /// Appends the join to the room. A failure here means the join was not
    /// accepted.
    pub fn commit_join(&self, join: VerifiedJoin) -> Result<CommittedJoin> {
        let VerifiedJoin { pdu } = join;
        let position = self.rooms.timeline.append_pdu(&pdu).map_err(|e| {
            error!("❌ Failed to commit join {}: {}", pdu.event_id, e);
            Error::Internal(format!("Failed to commit join {}: {e}", pdu.event_id))
        })?;
        Ok(CommittedJoin { pdu, position })
    }

    /// Current room state and its full auth chain. Commits that landed after
    /// the join are included.
    fn join_response(&self, committed: &CommittedJoin) -> Result<SendJoinResponse> {
        let room_id = &committed.pdu.room_id;
        let state = self.rooms.state.current_state(room_id)?;
        let state_ids: Vec<_> = state.values().map(|pdu| pdu.event_id.clone()).collect();
        let auth_chain = self.rooms.auth_chain.get_auth_chain(room_id, &state_ids)?;

        Ok(SendJoinResponse {
            state: state
                .values()
                .map(PduEvent::to_federation_json)
                .collect::<Result<_>>()?,
            auth_chain: auth_chain
                .iter()
                .map(PduEvent::to_federation_json)
                .collect::<Result<_>>()?,
        })
    }
}
