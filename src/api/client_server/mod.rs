// =============================================================================
// Matrixon Matrix NextServer - Client-Server API Module
// =============================================================================
//
// Author: arkSong <arksong2018@gmail.com>
// Version: 0.11.0-alpha
// Date: 2024-03-21
//
// =============================================================================

mod account_data;
mod state;
mod sync;

pub use account_data::*;
pub use state::*;
pub use sync::*;

use ruma::{OwnedRoomId, RoomId};

use crate::{Error, Result};

fn parse_room_id(room_id: &str) -> Result<OwnedRoomId> {
    <&RoomId>::try_from(room_id)
        .map(ToOwned::to_owned)
        .map_err(|_| Error::BadRequest(format!("Invalid room ID: {room_id}")))
}
