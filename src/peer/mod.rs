//! Peer wire protocol: handshake framing, message codec, bitfield
//! bookkeeping, and the per-connection session built on top of them.

pub mod bitfield;
pub mod codec;
pub mod session;

pub use bitfield::Bitfield;
pub use codec::{Handshake, Message, MessageId};
pub use session::PeerSession;
