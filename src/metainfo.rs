//! Decodes `.torrent` metainfo files (single-file torrents only; multi-file
//! torrents are a non-goal) and derives the values the rest of the engine
//! needs: info hash, piece digests, piece length, and total length.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_bytes::ByteBuf;
use sha1::{Digest, Sha1};

use crate::error::{Error, Result};
use crate::{InfoHash, Sha1Hash};

/// A decoded `.torrent` file.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct Metainfo {
    pub announce: String,
    pub info: Info,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct Info {
    pub name: String,
    #[serde(rename = "piece length")]
    pub piece_length: u32,
    #[serde(with = "serde_bytes")]
    pub pieces: ByteBuf,
    pub length: Option<u64>,
    pub files: Option<Vec<FileEntry>>,
    pub private: Option<u8>,
}

/// One entry of a multi-file torrent's file list.
///
/// Kept so that a `.torrent` file describing a multi-file torrent still
/// decodes; [`Metainfo::total_length`] rejects it rather than silently
/// downloading only the first file.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct FileEntry {
    pub path: Vec<String>,
    pub length: u64,
}

impl Metainfo {
    /// Decodes a metainfo file from its raw bencoded bytes.
    pub fn from_bytes(buf: &[u8]) -> Result<Self> {
        Ok(serde_bencode::from_bytes(buf)?)
    }

    /// Reads and decodes a `.torrent` file from disk.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let buf = fs::read(path)?;
        Self::from_bytes(&buf)
    }

    /// Computes the SHA-1 info hash: the digest of the bencoded `info`
    /// dictionary, exactly as it appears in the original file.
    pub fn info_hash(&self) -> Result<InfoHash> {
        let encoded = serde_bencode::to_bytes(&self.info)?;
        let mut hasher = Sha1::new();
        hasher.update(&encoded);
        let digest = hasher.finalize();
        let mut info_hash = [0u8; 20];
        info_hash.copy_from_slice(&digest);
        Ok(info_hash)
    }

    /// Splits the concatenated `pieces` string into one SHA-1 digest per
    /// piece, in piece index order.
    pub fn piece_hashes(&self) -> Result<Vec<Sha1Hash>> {
        let bytes = self.info.pieces.as_ref();
        if bytes.len() % 20 != 0 {
            return Err(Error::Protocol(format!(
                "pieces string length {} is not a multiple of 20",
                bytes.len()
            )));
        }
        Ok(bytes
            .chunks_exact(20)
            .map(|chunk| {
                let mut hash = [0u8; 20];
                hash.copy_from_slice(chunk);
                hash
            })
            .collect())
    }

    pub fn piece_length(&self) -> u32 {
        self.info.piece_length
    }

    /// Returns the torrent's total content length in bytes.
    ///
    /// Only single-file torrents (`info.length` present, `info.files`
    /// absent) are supported; multi-file torrents are a non-goal.
    pub fn total_length(&self) -> Result<u64> {
        match (&self.info.length, &self.info.files) {
            (Some(length), None) => Ok(*length),
            (_, Some(_)) => Err(Error::Protocol(
                "multi-file torrents are not supported".into(),
            )),
            (None, None) => Err(Error::Protocol(
                "metainfo is missing a length".into(),
            )),
        }
    }

    pub fn name(&self) -> &str {
        &self.info.name
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_bytes() -> Vec<u8> {
        // a minimal single-file metainfo: one 4 byte piece length, one piece
        serde_bencode::to_bytes(&Metainfo {
            announce: "http://tracker.example/announce".into(),
            info: Info {
                name: "sample.bin".into(),
                piece_length: 4,
                pieces: ByteBuf::from(vec![b'x'; 20]),
                length: Some(4),
                files: None,
                private: None,
            },
        })
        .unwrap()
    }

    #[test]
    fn test_decode_round_trip() {
        let bytes = sample_bytes();
        let metainfo = Metainfo::from_bytes(&bytes).unwrap();
        assert_eq!(metainfo.name(), "sample.bin");
        assert_eq!(metainfo.piece_length(), 4);
        assert_eq!(metainfo.total_length().unwrap(), 4);
    }

    #[test]
    fn test_piece_hashes_splits_into_twenty_byte_chunks() {
        let bytes = sample_bytes();
        let metainfo = Metainfo::from_bytes(&bytes).unwrap();
        let hashes = metainfo.piece_hashes().unwrap();
        assert_eq!(hashes.len(), 1);
        assert_eq!(hashes[0], [b'x'; 20]);
    }

    #[test]
    fn test_info_hash_is_stable_for_same_content() {
        let bytes = sample_bytes();
        let a = Metainfo::from_bytes(&bytes).unwrap();
        let b = Metainfo::from_bytes(&bytes).unwrap();
        assert_eq!(a.info_hash().unwrap(), b.info_hash().unwrap());
    }

    #[test]
    fn test_multi_file_total_length_rejected() {
        let metainfo = Metainfo {
            announce: "http://tracker.example/announce".into(),
            info: Info {
                name: "multi".into(),
                piece_length: 4,
                pieces: ByteBuf::from(vec![b'x'; 20]),
                length: None,
                files: Some(vec![FileEntry {
                    path: vec!["a.bin".into()],
                    length: 4,
                }]),
                private: None,
            },
        };
        assert!(metainfo.total_length().is_err());
    }
}
