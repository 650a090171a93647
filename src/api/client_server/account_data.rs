// =============================================================================
// Matrixon Matrix NextServer - Account Data Routes
// =============================================================================
//
// Author: arkSong <arksong2018@gmail.com>
// Version: 0.11.0-alpha
// Date: 2024-03-21
//
// =============================================================================

use axum::{
    extract::{rejection::JsonRejection, Path, State},
    Json,
};
use ruma::{RoomId, UserId};
use serde_json::{json, Value as JsonValue};

use super::parse_room_id;
use crate::{
    api::{AppState, AuthenticatedUser},
    service::Services,
    Error, Result,
};

/// # `PUT /_matrix/client/r0/user/{userId}/account_data/{type}`
///
/// Sets some account data for the sender user.
pub async fn set_global_account_data_route(
    State(services): State<AppState>,
    AuthenticatedUser(sender_user): AuthenticatedUser,
    Path((user_id, event_type)): Path<(String, String)>,
    body: Result<Json<JsonValue>, JsonRejection>,
) -> Result<Json<JsonValue>> {
    set_account_data(&services, &sender_user, &user_id, None, &event_type, body)
}

/// # `PUT /_matrix/client/r0/user/{userId}/rooms/{roomId}/account_data/{type}`
///
/// Sets some room account data for the sender user.
pub async fn set_room_account_data_route(
    State(services): State<AppState>,
    AuthenticatedUser(sender_user): AuthenticatedUser,
    Path((user_id, room_id, event_type)): Path<(String, String, String)>,
    body: Result<Json<JsonValue>, JsonRejection>,
) -> Result<Json<JsonValue>> {
    let room_id = parse_room_id(&room_id)?;
    set_account_data(
        &services,
        &sender_user,
        &user_id,
        Some(&room_id),
        &event_type,
        body,
    )
}

fn set_account_data(
    services: &Services,
    sender_user: &UserId,
    user_id: &str,
    room_id: Option<&RoomId>,
    event_type: &str,
    body: Result<Json<JsonValue>, JsonRejection>,
) -> Result<Json<JsonValue>> {
    if sender_user.as_str() != user_id {
        return Err(Error::Forbidden(
            "Not allowed to set account data for other users.".to_owned(),
        ));
    }
    let Json(content) = body.map_err(|e| Error::NotJson(e.body_text()))?;

    services
        .account_data
        .update(room_id, sender_user, event_type, &content)?;
    Ok(Json(json!({})))
}
