// =============================================================================
// Matrixon Matrix NextServer - Timeline Storage Interface
// =============================================================================
//
// Author: arkSong <arksong2018@gmail.com>
// Version: 0.11.0-alpha
// Date: 2024-03-21
//
// =============================================================================

use ruma::EventId;

use crate::{
    service::{pdu::PduEvent, sync::StreamPosition},
    Result,
};

pub trait Data: Send + Sync {
    /// Assigns the next stream position to the event and stores it. Every
    /// position below the returned one is visible once this returns. State
    /// events that replace an earlier one get `unsigned.replaces_state` and
    /// `unsigned.prev_content`.
    fn append_pdu(&self, pdu: &PduEvent) -> Result<StreamPosition>;

    fn get_pdu(&self, event_id: &EventId) -> Result<Option<PduEvent>>;
}
