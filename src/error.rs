//! Error types shared across the engine.

use thiserror::Error;

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// The complete error taxonomy of the engine.
#[derive(Debug, Error)]
pub enum Error {
    /// TCP dial to a peer failed or timed out.
    #[error("failed to connect to peer: {0}")]
    Connect(std::io::Error),

    /// The remote's info hash did not match ours during the handshake.
    #[error("handshake info hash mismatch")]
    HandshakeMismatch,

    /// The handshake frame was short or had an invalid protocol string
    /// length.
    #[error("malformed handshake: {0}")]
    HandshakeMalformed(String),

    /// An unexpected message kind, a malformed payload length, a piece
    /// index mismatch, or a block copy out of bounds.
    #[error("protocol violation: {0}")]
    Protocol(String),

    /// A downloaded piece's SHA-1 digest did not match the expected digest.
    #[error("piece {index} failed verification")]
    Verify { index: crate::PieceIndex },

    /// Any other socket error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// No workers remain and the work queue is non-empty: the download
    /// cannot make progress.
    #[error("swarm exhausted: no peers left to serve {remaining} piece(s)")]
    SwarmExhausted { remaining: usize },

    /// A `.torrent` file or tracker response failed to decode as bencode.
    #[error("bencode decode error: {0}")]
    Bencode(#[from] serde_bencode::Error),

    /// A magnet link was used to start a download without piece metadata
    /// obtained out of band (this engine does not implement the metadata
    /// exchange extension, BEP 9).
    #[error("magnet link has no piece metadata; metadata exchange (BEP 9) is not implemented")]
    MetadataUnavailable,

    /// A magnet URI was missing its `xt=urn:btih:` exact topic or the hash
    /// within it was malformed.
    #[error("invalid magnet uri: {0}")]
    InvalidMagnet(String),

    /// A compact peer list's length was not a multiple of 6 bytes.
    #[error("malformed compact peer list: length {0} is not a multiple of 6")]
    InvalidPeerList(usize),

    /// The tracker announce request failed.
    #[error("tracker request failed: {0}")]
    Tracker(#[from] reqwest::Error),
}
