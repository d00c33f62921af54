//! Parses `magnet:?xt=urn:btih:...` URIs.
//!
//! A magnet link carries an info hash but not the piece metadata (piece
//! length, piece hashes, total length) needed to actually download
//! anything: that metadata is normally fetched from peers via the
//! metadata exchange extension (BEP 9), which this engine does not
//! implement. A parsed [`MagnetLink`] can still be used to discover peers
//! (tracker announce, DHT bootstrap), but starting a download from it
//! without metadata supplied out of band fails fast with
//! [`crate::error::Error::MetadataUnavailable`] instead of hanging forever
//! waiting for pieces whose hashes are unknown.

use url::Url;

use crate::error::{Error, Result};
use crate::InfoHash;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MagnetLink {
    pub info_hash: InfoHash,
    pub name: Option<String>,
    pub trackers: Vec<String>,
}

impl MagnetLink {
    /// Parses a `magnet:` URI, extracting the exact topic info hash, the
    /// display name (`dn`), and any tracker URLs (`tr`).
    pub fn parse(uri: &str) -> Result<Self> {
        if !uri.starts_with("magnet:?") {
            return Err(Error::InvalidMagnet(
                "must start with magnet:?".into(),
            ));
        }
        let url = Url::parse(uri)
            .map_err(|err| Error::InvalidMagnet(format!("failed to parse uri: {err}")))?;

        let mut info_hash = None;
        let mut name = None;
        let mut trackers = Vec::new();

        for (key, value) in url.query_pairs() {
            match key.as_ref() {
                "xt" => {
                    if let Some(hex_hash) = value.strip_prefix("urn:btih:") {
                        info_hash = Some(parse_info_hash(hex_hash)?);
                    }
                }
                "dn" => name = Some(value.into_owned()),
                "tr" => trackers.push(value.into_owned()),
                _ => {}
            }
        }

        let info_hash = info_hash.ok_or_else(|| {
            Error::InvalidMagnet("missing exact topic (xt=urn:btih:...) parameter".into())
        })?;

        Ok(Self {
            info_hash,
            name,
            trackers,
        })
    }
}

fn parse_info_hash(hex_hash: &str) -> Result<InfoHash> {
    if hex_hash.len() == 32 {
        return Err(Error::InvalidMagnet(
            "base32 encoded info hashes are not supported".into(),
        ));
    }
    if hex_hash.len() != 40 {
        return Err(Error::InvalidMagnet(format!(
            "invalid info hash length: expected 40 hex chars, got {}",
            hex_hash.len()
        )));
    }
    let bytes = hex::decode(hex_hash)
        .map_err(|err| Error::InvalidMagnet(format!("invalid hex info hash: {err}")))?;
    let mut info_hash = [0u8; 20];
    info_hash.copy_from_slice(&bytes);
    Ok(info_hash)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_magnet_with_tracker_and_name() {
        let uri = "magnet:?xt=urn:btih:0123456789abcdef0123456789abcdef01234567\
                    &dn=example.iso&tr=http%3A%2F%2Ftracker.example%2Fannounce";
        let magnet = MagnetLink::parse(uri).unwrap();
        assert_eq!(magnet.name.as_deref(), Some("example.iso"));
        assert_eq!(magnet.trackers, vec!["http://tracker.example/announce"]);
        assert_eq!(magnet.info_hash.len(), 20);
    }

    #[test]
    fn test_parse_magnet_missing_xt_is_error() {
        let uri = "magnet:?dn=example.iso";
        assert!(MagnetLink::parse(uri).is_err());
    }

    #[test]
    fn test_parse_magnet_rejects_non_magnet_uri() {
        assert!(MagnetLink::parse("http://example.com").is_err());
    }

    #[test]
    fn test_parse_magnet_rejects_base32_hash() {
        let uri = "magnet:?xt=urn:btih:ABCDEFGHIJKLMNOPQRSTUVWXYZ234567";
        assert!(MagnetLink::parse(uri).is_err());
    }
}
