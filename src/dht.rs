//! Minimal DHT bootstrap: a best-effort `get_peers` query sent to a handful
//! of well-known bootstrap nodes, used only to harvest an initial peer list
//! for a magnet link with no tracker.
//!
//! This is not a full Kademlia routing table: queries use a fixed
//! transaction id and responses are not correlated back to the query that
//! produced them, since only the peer list embedded in a `values` reply is
//! ever consumed.

use std::net::UdpSocket;
use std::time::Duration;

use crate::peers::Peer;
use crate::{InfoHash, PeerId};

const BOOTSTRAP_NODES: &[&str] = &[
    "router.bittorrent.com:6881",
    "dht.transmissionbt.com:6881",
    "router.utorrent.com:6881",
];

const QUERY_TIMEOUT: Duration = Duration::from_secs(5);

/// Queries every bootstrap node for `info_hash` and returns the union of
/// the peers each one reports. Nodes that fail to resolve, time out, or
/// reply with no peers are silently skipped; the caller decides whether an
/// empty result is fatal.
pub fn find_peers(node_id: PeerId, info_hash: InfoHash) -> Vec<Peer> {
    let mut found = Vec::new();
    for node in BOOTSTRAP_NODES {
        match query_node(node, node_id, info_hash) {
            Ok(mut peers) => found.append(&mut peers),
            Err(err) => log::debug!("DHT bootstrap node {node} failed: {err}"),
        }
    }
    found
}

fn query_node(
    node_addr: &str,
    node_id: PeerId,
    info_hash: InfoHash,
) -> std::io::Result<Vec<Peer>> {
    let socket = UdpSocket::bind("0.0.0.0:0")?;
    socket.set_read_timeout(Some(QUERY_TIMEOUT))?;
    socket.set_write_timeout(Some(QUERY_TIMEOUT))?;

    let query = build_get_peers_query(node_id, info_hash);
    socket.send_to(&query, node_addr)?;

    let mut buf = [0u8; 1024];
    let n = socket.recv(&mut buf)?;
    Ok(parse_get_peers_response(&buf[..n]))
}

/// Builds a raw bencoded `get_peers` KRPC query with a fixed transaction id.
fn build_get_peers_query(node_id: PeerId, info_hash: InfoHash) -> Vec<u8> {
    let mut query = Vec::with_capacity(96);
    query.extend_from_slice(b"d1:ad2:id20:");
    query.extend_from_slice(&node_id);
    query.extend_from_slice(b"9:info_hash20:");
    query.extend_from_slice(&info_hash);
    query.extend_from_slice(b"e1:q9:get_peers1:t2:aa1:y1:qe");
    query
}

/// Scans a raw KRPC reply for a `6:valuesl` list of compact peer strings
/// and decodes each one, skipping anything that doesn't fit the expected
/// 6 byte `2:XX` shape.
fn parse_get_peers_response(data: &[u8]) -> Vec<Peer> {
    let mut peer_list = Vec::new();

    let Some(values_start) = find_subslice(data, b"6:valuesl") else {
        return peer_list;
    };
    let mut offset = values_start + b"6:valuesl".len();

    while offset < data.len() && data[offset] != b'e' {
        if data[offset] == b'6' && offset + 1 < data.len() && data[offset + 1] == b':' {
            offset += 2;
            if offset + 6 > data.len() {
                break;
            }
            if let Ok(peers) = crate::peers::unmarshal(&data[offset..offset + 6]) {
                peer_list.extend(peers);
            }
            offset += 6;
        } else {
            offset += 1;
        }
    }

    peer_list
}

fn find_subslice(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_get_peers_query_contains_info_hash() {
        let node_id = [3u8; 20];
        let info_hash = [9u8; 20];
        let query = build_get_peers_query(node_id, info_hash);
        assert!(find_subslice(&query, &info_hash).is_some());
        assert!(find_subslice(&query, b"get_peers").is_some());
    }

    #[test]
    fn test_parse_get_peers_response_decodes_values_list() {
        let mut reply = Vec::new();
        reply.extend_from_slice(b"d1:rd2:id20:");
        reply.extend_from_slice(&[1u8; 20]);
        reply.extend_from_slice(b"6:valuesl");
        reply.extend_from_slice(b"6:");
        reply.extend_from_slice(&[127, 0, 0, 1, 0x1A, 0xE1]);
        reply.extend_from_slice(b"ee1:t2:aa1:y1:re");

        let peers = parse_get_peers_response(&reply);
        assert_eq!(peers.len(), 1);
        assert_eq!(peers[0].port, 0x1AE1);
    }

    #[test]
    fn test_parse_get_peers_response_no_values_returns_empty() {
        let reply = b"d1:rd2:id20:00000000000000000000ee1:t2:aa1:y1:re";
        assert!(parse_get_peers_response(reply).is_empty());
    }
}
