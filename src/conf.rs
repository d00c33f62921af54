//! This module defines types used to configure the engine and its parts.

use std::time::Duration;

use crate::{MAX_BACKLOG, MAX_BLOCK_SIZE};

/// The global configuration for the engine and all its downloads.
#[derive(Clone, Debug)]
pub struct Conf {
    pub engine: EngineConf,
    pub download: DownloadConf,
}

impl Conf {
    /// Returns the configuration with reasonable defaults and a freshly
    /// generated, random peer id.
    pub fn new() -> Self {
        Self {
            engine: EngineConf::new(),
            download: DownloadConf::default(),
        }
    }
}

impl Default for Conf {
    fn default() -> Self {
        Self::new()
    }
}

/// Configuration related to the engine itself.
#[derive(Clone, Debug)]
pub struct EngineConf {
    /// The ID of the client to announce to trackers and other peers.
    ///
    /// Generated once per process run and reused across all peer sessions
    /// for the same download, as mandated by the data model.
    pub client_id: crate::PeerId,
}

impl EngineConf {
    /// Generates a fresh, random 20 byte peer id.
    pub fn new() -> Self {
        use rand::RngCore;
        let mut client_id = [0u8; 20];
        rand::thread_rng().fill_bytes(&mut client_id);
        Self { client_id }
    }
}

impl Default for EngineConf {
    fn default() -> Self {
        Self::new()
    }
}

/// Tunables for a single download.
///
/// The engine applies a default instance of this to all downloads, but a
/// caller may override it for a specific download.
#[derive(Clone, Copy, Debug)]
pub struct DownloadConf {
    /// The maximum block size requested from a peer at a time. Always 16
    /// KiB except, possibly, for the last block of the last piece.
    pub max_block_size: u32,

    /// The maximum number of block requests kept outstanding per peer.
    pub max_backlog: usize,

    /// Deadline for the TCP dial to a peer.
    pub connect_timeout: Duration,

    /// Deadline for sending and receiving the handshake.
    pub handshake_timeout: Duration,

    /// Deadline for receiving the initial bitfield message after the
    /// handshake.
    pub bitfield_timeout: Duration,

    /// Rolling deadline applied to each read while downloading a piece.
    pub piece_timeout: Duration,

    /// If the results queue has not produced a new verified piece for this
    /// long and the work queue is non-empty, the coordinator fails the
    /// download with `Error::SwarmExhausted` rather than blocking forever.
    pub watchdog_timeout: Duration,
}

impl DownloadConf {
    pub fn new() -> Self {
        Self {
            max_block_size: MAX_BLOCK_SIZE,
            max_backlog: MAX_BACKLOG,
            connect_timeout: Duration::from_secs(3),
            handshake_timeout: Duration::from_secs(3),
            bitfield_timeout: Duration::from_secs(5),
            piece_timeout: Duration::from_secs(30),
            // needs tuning against real swarms; 60s gives slow peers enough
            // slack without masking a truly dead swarm for too long.
            watchdog_timeout: Duration::from_secs(60),
        }
    }
}

impl Default for DownloadConf {
    fn default() -> Self {
        Self::new()
    }
}
