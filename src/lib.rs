// =============================================================================
// Matrixon Matrix NextServer - Library Crate
// =============================================================================
//
// Author: arkSong <arksong2018@gmail.com>
// Version: 0.11.0-alpha
// Date: 2024-03-21
//
// Description:
//   Stream synchronization (long-poll /sync) and federated room join
//   admission for the Matrixon homeserver.
//
// =============================================================================

pub mod api;
pub mod config;
pub mod database;
pub mod service;
pub mod utils;

#[cfg(test)]
pub mod test_utils;

pub use config::Config;
pub use utils::error::{Error, Result};
