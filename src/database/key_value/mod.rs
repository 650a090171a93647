// =============================================================================
// Matrixon Matrix NextServer - Key Value Storage
// =============================================================================
//
// Author: arkSong <arksong2018@gmail.com>
// Version: 0.11.0-alpha
// Date: 2024-03-21
//
// One file per service storage interface, all implemented on
// `MemoryDatabase`.
//
// =============================================================================

mod account_data;
pub mod keys;
mod rooms;
mod sync;
