use std::time::Duration;

use crate::protocol::{MAX_CONCURRENT_USERS, MAX_FRAME_LEN};

/// Tunables for a [`crate::server::Server`].
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Number of session slots; joins beyond this get `server_full`.
    pub capacity: usize,
    /// Longest accepted frame in bytes, excluding the line terminator.
    pub max_frame_len: usize,
    /// How long a fresh connection may take to send its `join`.
    pub handshake_timeout: Duration,
    /// Frames a worker may queue for the dispatcher before it stops reading
    /// from its socket.
    pub inbound_queue_depth: usize,
    /// Frames queued for a slow client before further frames to it are dropped.
    pub outbound_queue_depth: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            capacity: MAX_CONCURRENT_USERS,
            max_frame_len: MAX_FRAME_LEN,
            handshake_timeout: Duration::from_secs(30),
            inbound_queue_depth: 32,
            outbound_queue_depth: 64,
        }
    }
}
