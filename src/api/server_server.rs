// =============================================================================
// Matrixon Matrix NextServer - Server-Server API Module
// =============================================================================
//
// Author: arkSong <arksong2018@gmail.com>
// Version: 0.11.0-alpha
// Date: 2024-03-21
//
// Description:
//   Federation join handshake: make_join hands a remote server a join
//   template, send_join admits the signed result.
//
// =============================================================================

use axum::{
    extract::{rejection::JsonRejection, Path, State},
    Json,
};
use ruma::{EventId, OwnedRoomId, RoomId, UserId};
use serde_json::Value as JsonValue;
use tracing::info;

use crate::{
    api::{AppState, XMatrix},
    service::federation::{MakeJoinResponse, SendJoinResponse},
    Error, Result,
};

fn parse_room_id(room_id: &str) -> Result<OwnedRoomId> {
    <&RoomId>::try_from(room_id)
        .map(ToOwned::to_owned)
        .map_err(|_| Error::BadJson("Invalid room id".to_owned()))
}

/// # `GET /_matrix/federation/v1/make_join/{roomId}/{userId}`
///
/// Creates a join template.
pub async fn create_join_event_template_route(
    State(services): State<AppState>,
    XMatrix { origin }: XMatrix,
    Path((room_id, user_id)): Path<(String, String)>,
) -> Result<Json<MakeJoinResponse>> {
    let room_id = parse_room_id(&room_id)?;
    let user_id = <&UserId>::try_from(user_id.as_str())
        .map_err(|_| Error::BadJson("Invalid user id".to_owned()))?;

    let response = services
        .federation
        .make_join(&origin, &room_id, user_id)?;
    Ok(Json(response))
}

/// # `PUT /_matrix/federation/v1/send_join/{roomId}/{eventId}`
///
/// Submits a signed join event. The v1 body is `[200, { state, auth_chain }]`.
pub async fn create_join_event_v1_route(
    State(services): State<AppState>,
    XMatrix { origin }: XMatrix,
    Path((room_id, event_id)): Path<(String, String)>,
    body: Result<Json<JsonValue>, JsonRejection>,
) -> Result<Json<(u16, SendJoinResponse)>> {
    let room_id = parse_room_id(&room_id)?;
    let event_id = <&EventId>::try_from(event_id.as_str())
        .map_err(|_| Error::BadJson("Invalid event id".to_owned()))?;
    let Json(pdu) = body.map_err(|e| Error::NotJson(e.body_text()))?;

    let response = services
        .federation
        .send_join(&origin, &room_id, event_id, &pdu)
        .await?;
    info!(
        "✅ {} joined {} via {} ({} state events)",
        event_id,
        room_id,
        origin,
        response.state.len()
    );
    Ok(Json((200, response)))
}
