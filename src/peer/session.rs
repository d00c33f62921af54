//! Per-peer TCP connection: handshake, state (choked/interested), send
//! helpers, and framed read.

use std::net::SocketAddr;

use tokio::net::TcpStream;
use tokio::time::timeout;

use super::bitfield::Bitfield;
use super::codec::{self, Handshake, Message};
use crate::conf::DownloadConf;
use crate::error::{Error, Result};
use crate::{InfoHash, PeerId};

/// An established, handshaken connection to one peer.
///
/// Owns the TCP connection; destroyed (by dropping) when the owning
/// worker's loop exits, by any path.
pub struct PeerSession {
    stream: TcpStream,
    addr: SocketAddr,
    info_hash: InfoHash,
    #[allow(dead_code)]
    peer_id: PeerId,
    remote_peer_id: PeerId,
    bitfield: Bitfield,
    choked_by_remote: bool,
}

impl PeerSession {
    /// Dials `addr`, exchanges handshakes, and receives the peer's initial
    /// bitfield, applying the deadlines spec'd for each step.
    pub async fn connect(
        addr: SocketAddr,
        info_hash: InfoHash,
        peer_id: PeerId,
        conf: &DownloadConf,
    ) -> Result<Self> {
        log::info!("Connecting to peer {addr}");
        let mut stream = timeout(conf.connect_timeout, TcpStream::connect(addr))
            .await
            .map_err(|_| {
                Error::Connect(std::io::Error::new(
                    std::io::ErrorKind::TimedOut,
                    "connect timed out",
                ))
            })?
            .map_err(Error::Connect)?;
        log::info!("Connected to peer {addr}");

        let local = Handshake::new(info_hash, peer_id);
        let remote = timeout(
            conf.handshake_timeout,
            codec::exchange_handshake(&mut stream, local),
        )
        .await
        .map_err(|_| Error::HandshakeMalformed("handshake timed out".into()))??;

        if remote.info_hash != info_hash {
            log::warn!("Peer {addr} handshake info hash mismatch");
            return Err(Error::HandshakeMismatch);
        }

        log::info!("Waiting for peer {addr} bitfield");
        let msg = timeout(conf.bitfield_timeout, codec::read_message(&mut stream))
            .await
            .map_err(|_| Error::Protocol("timed out waiting for bitfield".into()))??;
        let bitfield = match msg {
            Message::Bitfield(bytes) => Bitfield::from_bytes(bytes),
            other => {
                log::warn!("Peer {addr} sent {other:?} instead of Bitfield");
                return Err(Error::Protocol(format!(
                    "expected Bitfield message, got {other:?}"
                )));
            }
        };

        Ok(Self {
            stream,
            addr,
            info_hash,
            peer_id,
            remote_peer_id: remote.peer_id,
            bitfield,
            choked_by_remote: true,
        })
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn remote_peer_id(&self) -> PeerId {
        self.remote_peer_id
    }

    pub fn info_hash(&self) -> InfoHash {
        self.info_hash
    }

    pub fn bitfield(&self) -> &Bitfield {
        &self.bitfield
    }

    pub fn is_choked_by_remote(&self) -> bool {
        self.choked_by_remote
    }

    async fn send(&mut self, msg: Message) -> Result<()> {
        use tokio::io::AsyncWriteExt;
        self.stream.write_all(&msg.encode()).await?;
        Ok(())
    }

    pub async fn send_unchoke(&mut self) -> Result<()> {
        self.send(Message::Unchoke).await
    }

    pub async fn send_interested(&mut self) -> Result<()> {
        self.send(Message::Interested).await
    }

    pub async fn send_not_interested(&mut self) -> Result<()> {
        self.send(Message::NotInterested).await
    }

    pub async fn send_have(&mut self, index: u32) -> Result<()> {
        self.send(codec::format_have(index)).await
    }

    pub async fn send_request(&mut self, index: u32, begin: u32, length: u32) -> Result<()> {
        self.send(codec::format_request(index, begin, length)).await
    }

    /// Reads and returns the next decoded message (possibly keep-alive).
    pub async fn read(&mut self) -> Result<Message> {
        codec::read_message(&mut self.stream).await
    }

    /// Applies the session-level state mutation for a received message, per
    /// the dispatch table: `Choke`/`Unchoke` flip the choked flag, `Have`
    /// marks the piece present in the bitfield. All other kinds
    /// (`Bitfield`, `Interested`, `NotInterested`, `Request`, `Cancel`,
    /// keep-alive) are ignored by this leecher-only core. `Piece` is
    /// handled by the caller directly (via [`codec::parse_piece`]) since it
    /// needs the caller's in-progress piece buffer.
    pub fn apply_dispatch(&mut self, msg: &Message) -> Result<()> {
        match msg {
            Message::Choke => {
                self.choked_by_remote = true;
            }
            Message::Unchoke => {
                self.choked_by_remote = false;
            }
            Message::Have { .. } => {
                let index = codec::parse_have(msg)?;
                self.bitfield.set(index as usize);
            }
            _ => {}
        }
        Ok(())
    }
}
