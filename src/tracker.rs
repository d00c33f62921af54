//! HTTP tracker announce client.
//!
//! Issues a single GET announce request and decodes the bencoded response
//! into an interval and a compact peer list.

use serde::{Deserialize, Serialize};
use serde_bytes::ByteBuf;

use crate::error::Result;
use crate::peers::{self, Peer};
use crate::{InfoHash, PeerId};

const DEFAULT_PORT: u16 = 6881;

#[derive(Debug, Serialize, Deserialize)]
struct RawTrackerResponse {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    interval: Option<i64>,
    #[serde(
        rename = "failure reason",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    failure_reason: Option<String>,
    #[serde(with = "serde_bytes", default)]
    peers: ByteBuf,
}

/// A decoded tracker response: the peers it listed and the interval, in
/// seconds, the tracker asked to be re-announced at.
#[derive(Debug)]
pub struct TrackerResponse {
    pub interval: i64,
    pub peers: Vec<Peer>,
}

/// Announces to `announce_url` for the given torrent and returns the peers
/// it reports.
///
/// `left` is the number of bytes still needed (the torrent's total length,
/// since this engine always starts a download from scratch).
pub fn announce(
    announce_url: &str,
    info_hash: InfoHash,
    peer_id: PeerId,
    left: u64,
) -> Result<TrackerResponse> {
    let url = build_announce_url(announce_url, info_hash, peer_id, left, DEFAULT_PORT);
    log::info!("Announcing to tracker {announce_url}");
    let response = reqwest::blocking::get(&url)?.bytes()?;
    let raw: RawTrackerResponse = serde_bencode::from_bytes(&response)?;
    if let Some(reason) = raw.failure_reason {
        return Err(crate::error::Error::Protocol(format!(
            "tracker failure: {reason}"
        )));
    }
    let peers = peers::unmarshal(raw.peers.as_ref())?;
    log::info!("Tracker returned {} peer(s)", peers.len());
    Ok(TrackerResponse {
        interval: raw.interval.unwrap_or(0),
        peers,
    })
}

fn build_announce_url(
    announce_url: &str,
    info_hash: InfoHash,
    peer_id: PeerId,
    left: u64,
    port: u16,
) -> String {
    use percent_encoding::{percent_encode, NON_ALPHANUMERIC};
    let info_hash_enc = percent_encode(&info_hash, NON_ALPHANUMERIC);
    let peer_id_enc = percent_encode(&peer_id, NON_ALPHANUMERIC);
    format!(
        "{announce_url}?info_hash={info_hash_enc}&peer_id={peer_id_enc}&port={port}&\
         uploaded=0&downloaded=0&left={left}&compact=1",
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_announce_url_contains_required_params() {
        let url = build_announce_url(
            "http://tracker.example/announce",
            [1u8; 20],
            [2u8; 20],
            1000,
            6881,
        );
        assert!(url.starts_with("http://tracker.example/announce?info_hash="));
        assert!(url.contains("&peer_id="));
        assert!(url.contains("&port=6881"));
        assert!(url.contains("&left=1000"));
        assert!(url.contains("&compact=1"));
    }

    #[test]
    fn test_decode_tracker_response_with_compact_peers() {
        let raw = RawTrackerResponse {
            interval: Some(900),
            failure_reason: None,
            peers: ByteBuf::from(vec![127, 0, 0, 1, 0x1A, 0xE1]),
        };
        assert_eq!(raw.interval, Some(900));
        let peers = peers::unmarshal(raw.peers.as_ref()).unwrap();
        assert_eq!(peers.len(), 1);
    }

    #[test]
    fn test_announce_against_mock_tracker() {
        let mut server = mockito::Server::new();
        let body = serde_bencode::to_bytes(&RawTrackerResponse {
            interval: Some(1800),
            failure_reason: None,
            peers: ByteBuf::from(vec![127, 0, 0, 1, 0x1A, 0xE1, 10, 0, 0, 2, 0x1A, 0xE2]),
        })
        .unwrap();
        let mock = server
            .mock("GET", mockito::Matcher::Regex("^/announce".into()))
            .with_status(200)
            .with_body(body)
            .create();

        let response = announce(&format!("{}/announce", server.url()), [1u8; 20], [2u8; 20], 4096)
            .unwrap();

        mock.assert();
        assert_eq!(response.interval, 1800);
        assert_eq!(response.peers.len(), 2);
        pretty_assertions::assert_eq!(response.peers[0].port, 0x1AE1);
    }

    #[test]
    fn test_announce_surfaces_tracker_failure_reason() {
        let mut server = mockito::Server::new();
        let body = serde_bencode::to_bytes(&RawTrackerResponse {
            interval: None,
            failure_reason: Some("unregistered torrent".into()),
            peers: ByteBuf::new(),
        })
        .unwrap();
        let _mock = server
            .mock("GET", mockito::Matcher::Regex("^/announce".into()))
            .with_status(200)
            .with_body(body)
            .create();

        let err = announce(&format!("{}/announce", server.url()), [1u8; 20], [2u8; 20], 4096)
            .unwrap_err();
        assert!(matches!(err, crate::error::Error::Protocol(_)));
    }
}
