// =============================================================================
// Matrixon Matrix NextServer - Rooms Storage
// =============================================================================
//
// Author: arkSong <arksong2018@gmail.com>
// Version: 0.11.0-alpha
// Date: 2024-03-21
//
// =============================================================================

mod state;
mod timeline;
