// =============================================================================
// Matrixon Matrix NextServer - Rooms Module
// =============================================================================
//
// Author: arkSong <arksong2018@gmail.com>
// Version: 0.11.0-alpha
// Date: 2024-03-21
//
// Description:
//   Room services: state, timeline, auth chains and authorization rules.
//
// =============================================================================

pub mod auth_chain;
pub mod event_auth;
pub mod state;
pub mod timeline;

use std::sync::Arc;

pub trait Data: state::Data + timeline::Data {}

impl<T: state::Data + timeline::Data> Data for T {}

pub struct Service {
    pub auth_chain: auth_chain::Service,
    pub event_auth: Arc<dyn event_auth::AuthRules>,
    pub state: Arc<state::Service>,
    pub timeline: timeline::Service,
}
