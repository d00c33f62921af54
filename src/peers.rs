//! A peer endpoint as advertised by a tracker or DHT node, and the compact
//! 6-byte-per-peer format trackers use to list them.

use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};

use crate::error::{Error, Result};

/// One peer's dialable address.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Peer {
    pub ip: Ipv4Addr,
    pub port: u16,
}

impl Peer {
    pub fn addr(&self) -> SocketAddr {
        SocketAddr::V4(SocketAddrV4::new(self.ip, self.port))
    }
}

/// Decodes the compact peer list format: 6 bytes per peer, 4 byte big
/// endian IPv4 address followed by a 2 byte big endian port.
pub fn unmarshal(peers_bin: &[u8]) -> Result<Vec<Peer>> {
    const PEER_SIZE: usize = 6;
    if peers_bin.len() % PEER_SIZE != 0 {
        return Err(Error::InvalidPeerList(peers_bin.len()));
    }
    Ok(peers_bin
        .chunks_exact(PEER_SIZE)
        .map(|chunk| Peer {
            ip: Ipv4Addr::new(chunk[0], chunk[1], chunk[2], chunk[3]),
            port: u16::from_be_bytes([chunk[4], chunk[5]]),
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unmarshal_two_peers() {
        let bin = [127, 0, 0, 1, 0x1A, 0xE1, 10, 0, 0, 1, 0x1A, 0xE2];
        let peers = unmarshal(&bin).unwrap();
        assert_eq!(peers.len(), 2);
        assert_eq!(peers[0].ip, Ipv4Addr::new(127, 0, 0, 1));
        assert_eq!(peers[0].port, 0x1AE1);
        assert_eq!(peers[1].ip, Ipv4Addr::new(10, 0, 0, 1));
        assert_eq!(peers[1].port, 0x1AE2);
    }

    #[test]
    fn test_unmarshal_rejects_non_multiple_of_six() {
        let bin = [1, 2, 3, 4, 5];
        assert!(matches!(
            unmarshal(&bin),
            Err(Error::InvalidPeerList(5))
        ));
    }

    #[test]
    fn test_unmarshal_empty_is_empty() {
        assert_eq!(unmarshal(&[]).unwrap(), Vec::new());
    }
}
