// =============================================================================
// Matrixon Matrix NextServer - Room State Routes
// =============================================================================
//
// Author: arkSong <arksong2018@gmail.com>
// Version: 0.11.0-alpha
// Date: 2024-03-21
//
// =============================================================================

use axum::{
    extract::{Path, State},
    Json,
};
use ruma::{RoomId, UserId};
use serde_json::Value as JsonValue;

use super::parse_room_id;
use crate::{
    api::{AppState, AuthenticatedUser},
    service::Services,
    Error, Result,
};

fn ensure_joined(services: &Services, room_id: &RoomId, user_id: &UserId) -> Result<()> {
    if !services
        .rooms
        .state
        .room_members(room_id)?
        .iter()
        .any(|member| **member == *user_id)
    {
        return Err(Error::Forbidden(
            "You don't have permission to view this room.".to_owned(),
        ));
    }
    Ok(())
}

/// # `GET /_matrix/client/r0/rooms/{roomId}/state`
///
/// Get all state events for a room.
pub async fn get_state_events_route(
    State(services): State<AppState>,
    AuthenticatedUser(user_id): AuthenticatedUser,
    Path(room_id): Path<String>,
) -> Result<Json<Vec<JsonValue>>> {
    let room_id = parse_room_id(&room_id)?;
    ensure_joined(&services, &room_id, &user_id)?;
    Ok(Json(services.sync.room_state(&room_id)?))
}

/// # `GET /_matrix/client/r0/rooms/{roomId}/state/{eventType}/{stateKey}`
///
/// Get a single state event's content.
pub async fn get_state_events_for_key_route(
    State(services): State<AppState>,
    AuthenticatedUser(user_id): AuthenticatedUser,
    Path((room_id, event_type, state_key)): Path<(String, String, String)>,
) -> Result<Json<JsonValue>> {
    state_event(&services, &user_id, &room_id, &event_type, &state_key)
}

/// # `GET /_matrix/client/r0/rooms/{roomId}/state/{eventType}`
///
/// Same as above, with an empty state key.
pub async fn get_state_events_for_empty_key_route(
    State(services): State<AppState>,
    AuthenticatedUser(user_id): AuthenticatedUser,
    Path((room_id, event_type)): Path<(String, String)>,
) -> Result<Json<JsonValue>> {
    state_event(&services, &user_id, &room_id, &event_type, "")
}

fn state_event(
    services: &Services,
    user_id: &UserId,
    room_id: &str,
    event_type: &str,
    state_key: &str,
) -> Result<Json<JsonValue>> {
    let room_id = parse_room_id(room_id)?;
    ensure_joined(services, &room_id, user_id)?;
    Ok(Json(services.sync.room_state_event(
        &room_id, event_type, state_key,
    )?))
}
