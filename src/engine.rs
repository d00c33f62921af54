//! Owns the piece work-queue and the results channel, spawns one worker per
//! candidate peer, and assembles verified pieces into the output buffer.

use std::sync::Arc;

use tokio::sync::{mpsc, Mutex};
use tokio::time::timeout;

use crate::conf::DownloadConf;
use crate::error::{Error, Result};
use crate::peers::Peer;
use crate::worker;
use crate::{piece_bounds, piece_count, piece_len, InfoHash, PeerId, PieceResult, PieceWork, Sha1Hash};

/// Everything the coordinator needs to run one download to completion.
pub struct Coordinator {
    pub info_hash: InfoHash,
    pub peer_id: PeerId,
    pub piece_hashes: Vec<Sha1Hash>,
    pub piece_length: u32,
    pub total_length: u64,
    pub name: String,
    pub peers: Vec<Peer>,
    pub conf: DownloadConf,
}

impl Coordinator {
    pub fn new(
        info_hash: InfoHash,
        peer_id: PeerId,
        piece_hashes: Vec<Sha1Hash>,
        piece_length: u32,
        total_length: u64,
        name: String,
        peers: Vec<Peer>,
        conf: DownloadConf,
    ) -> Self {
        Self {
            info_hash,
            peer_id,
            piece_hashes,
            piece_length,
            total_length,
            name,
            peers,
            conf,
        }
    }

    /// Runs the download to completion, returning the assembled output
    /// buffer, or `Error::SwarmExhausted` if no progress is made for
    /// `conf.watchdog_timeout` while pieces remain outstanding.
    pub async fn run(self) -> Result<Vec<u8>> {
        let num_pieces = piece_count(self.piece_length, self.total_length);
        log::info!(
            "Starting download of {:?}: {num_pieces} piece(s), {} peer(s)",
            self.name,
            self.peers.len()
        );

        let (work_tx, work_rx) = mpsc::channel::<PieceWork>(num_pieces.max(1));
        let work_rx = Arc::new(Mutex::new(work_rx));
        let (result_tx, mut result_rx) = mpsc::channel::<PieceResult>(num_pieces.max(1));

        for index in 0..num_pieces {
            let work = PieceWork {
                index,
                digest: self.piece_hashes[index],
                length: piece_len(index, self.piece_length, self.total_length),
            };
            // capacity == num_pieces, so this never actually blocks.
            work_tx
                .send(work)
                .await
                .expect("work queue receiver held open by coordinator");
        }

        for peer in &self.peers {
            tokio::spawn(worker::run_worker(
                peer.addr(),
                self.info_hash,
                self.peer_id,
                self.conf,
                work_rx.clone(),
                work_tx.clone(),
                result_tx.clone(),
            ));
        }
        // Drop our own ends: each worker also holds a `work_tx` clone for its
        // entire lifetime (to requeue failed items), so dropping ours alone
        // does not close the work queue. The results queue does close this
        // way, though, letting `result_rx.recv()` observe `None` if the
        // swarm dies before finishing.
        drop(work_tx);
        drop(result_tx);

        let mut output = vec![0u8; self.total_length as usize];
        let mut received = 0usize;

        let result = loop {
            if received == num_pieces {
                break Ok(());
            }
            let next = timeout(self.conf.watchdog_timeout, result_rx.recv()).await;
            match next {
                Ok(Some(result)) => {
                    let bounds = piece_bounds(result.index, self.piece_length, self.total_length);
                    let start = bounds.start as usize;
                    output[start..start + result.bytes.len()].copy_from_slice(&result.bytes);
                    received += 1;
                    log::debug!("assembled piece {} ({received}/{num_pieces})", result.index);
                }
                Ok(None) => {
                    log::warn!("all peer workers exited with {} piece(s) outstanding", num_pieces - received);
                    break Err(Error::SwarmExhausted {
                        remaining: num_pieces - received,
                    });
                }
                Err(_) => {
                    log::warn!(
                        "no progress for {:?}; {} piece(s) outstanding",
                        self.conf.watchdog_timeout,
                        num_pieces - received
                    );
                    break Err(Error::SwarmExhausted {
                        remaining: num_pieces - received,
                    });
                }
            }
        };

        // Close the work queue so idle workers (those parked in `dequeue()`
        // with no claimed item, having found nothing left to do) wake with
        // `None` and exit, dropping their TCP connections, rather than being
        // left parked forever once every piece has been assembled or the
        // watchdog has given up.
        work_rx.lock().await.close();

        result.map(|()| {
            log::info!("Download of {:?} complete", self.name);
            output
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::peer::codec::{self, Message};
    use sha1::{Digest, Sha1};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    async fn mock_full_peer(listener: TcpListener, info_hash: InfoHash, content: Vec<u8>, piece_length: u32) {
        let (mut stream, _) = listener.accept().await.unwrap();
        let mut hs_buf = [0u8; 68];
        stream.read_exact(&mut hs_buf).await.unwrap();
        let hs = codec::Handshake::new(info_hash, [9u8; 20]);
        stream.write_all(&hs.encode()).await.unwrap();

        let num_pieces = (content.len() as u32 + piece_length - 1) / piece_length;
        let full_byte_count = (num_pieces / 8) as usize;
        let mut bits = vec![0xFFu8; full_byte_count];
        let remaining_bits = num_pieces % 8;
        if remaining_bits != 0 {
            bits.push(0xFFu8 << (8 - remaining_bits));
        }
        stream.write_all(&Message::Bitfield(bits).encode()).await.unwrap();

        let _ = codec::read_message(&mut stream).await.unwrap();
        let _ = codec::read_message(&mut stream).await.unwrap();
        stream.write_all(&Message::Unchoke.encode()).await.unwrap();

        loop {
            let msg = codec::read_message(&mut stream).await.unwrap();
            match msg {
                Message::Request { index, begin, length } => {
                    let piece_start = index as usize * piece_length as usize;
                    let start = piece_start + begin as usize;
                    let data = content[start..start + length as usize].to_vec();
                    let piece_msg = Message::Piece { index, begin, data };
                    stream.write_all(&piece_msg.encode()).await.unwrap();
                }
                Message::Have { .. } => {}
                other => panic!("unexpected message: {other:?}"),
            }
        }
    }

    #[tokio::test]
    async fn test_coordinator_assembles_output_from_single_peer() {
        let piece_length = 32768u32;
        let content: Vec<u8> = (0..49152u32).map(|b| (b % 251) as u8).collect();
        let piece_hashes: Vec<Sha1Hash> = content
            .chunks(piece_length as usize)
            .map(|chunk| {
                let mut hasher = Sha1::new();
                hasher.update(chunk);
                let digest: [u8; 20] = hasher.finalize().into();
                digest
            })
            .collect();

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = match listener.local_addr().unwrap() {
            std::net::SocketAddr::V4(a) => a,
            _ => unreachable!(),
        };
        let info_hash = [6u8; 20];
        tokio::spawn(mock_full_peer(listener, info_hash, content.clone(), piece_length));

        let coordinator = Coordinator::new(
            info_hash,
            [1u8; 20],
            piece_hashes,
            piece_length,
            content.len() as u64,
            "sample".into(),
            vec![Peer {
                ip: *addr.ip(),
                port: addr.port(),
            }],
            DownloadConf::new(),
        );

        let output = coordinator.run().await.unwrap();
        assert_eq!(output, content);
    }

    #[tokio::test]
    async fn test_coordinator_fails_with_swarm_exhausted_when_no_peers() {
        let conf = DownloadConf {
            watchdog_timeout: std::time::Duration::from_millis(100),
            ..DownloadConf::new()
        };
        let coordinator = Coordinator::new(
            [1u8; 20],
            [2u8; 20],
            vec![[0u8; 20]],
            16384,
            16384,
            "empty".into(),
            Vec::new(),
            conf,
        );
        let err = coordinator.run().await.unwrap_err();
        assert!(matches!(err, Error::SwarmExhausted { remaining: 1 }));
    }
}
