//! For one peer session, repeatedly claim a piece of work, download and
//! verify it, and either publish the result or requeue the work.

use std::net::SocketAddr;
use std::sync::Arc;

use sha1::{Digest, Sha1};
use tokio::sync::{mpsc, Mutex};
use tokio::time::timeout;

use crate::conf::DownloadConf;
use crate::error::{Error, Result};
use crate::peer::codec::{self, Message};
use crate::peer::session::PeerSession;
use crate::{InfoHash, PeerId, PieceResult, PieceWork};

/// Dials, handshakes, and runs the piece-claiming loop against `addr` until
/// the work queue is closed and drained or the session fails.
///
/// A connection failure at dial/handshake/bitfield time simply returns:
/// no item has been claimed yet, so nothing needs to be requeued.
pub(crate) async fn run_worker(
    addr: SocketAddr,
    info_hash: InfoHash,
    peer_id: PeerId,
    conf: DownloadConf,
    work_rx: Arc<Mutex<mpsc::Receiver<PieceWork>>>,
    work_tx: mpsc::Sender<PieceWork>,
    result_tx: mpsc::Sender<PieceResult>,
) {
    let mut session = match PeerSession::connect(addr, info_hash, peer_id, &conf).await {
        Ok(session) => session,
        Err(err) => {
            log::warn!("peer {addr} session setup failed: {err}");
            return;
        }
    };

    if session.send_unchoke().await.is_err() || session.send_interested().await.is_err() {
        log::warn!("peer {addr} rejected initial unchoke/interested");
        return;
    }

    loop {
        let work = match dequeue(&work_rx).await {
            Some(work) => work,
            None => {
                log::debug!("peer {addr} worker exiting: work queue closed");
                return;
            }
        };

        if !session.bitfield().test(work.index) {
            log::debug!("peer {addr} lacks piece {}, requeueing", work.index);
            if work_tx.send(work).await.is_err() {
                return;
            }
            continue;
        }

        match download_piece(&mut session, &work, &conf).await {
            Ok(bytes) => {
                let mut hasher = Sha1::new();
                hasher.update(&bytes);
                let digest: [u8; 20] = hasher.finalize().into();
                if digest != work.digest {
                    log::warn!("piece {} failed verification from peer {addr}", work.index);
                    let _ = work_tx.send(work).await;
                    continue;
                }

                // best-effort; a failed Have does not affect correctness.
                let _ = session.send_have(work.index as u32).await;

                if result_tx
                    .send(PieceResult {
                        index: work.index,
                        bytes,
                    })
                    .await
                    .is_err()
                {
                    log::debug!("peer {addr} worker exiting: results queue closed");
                    return;
                }
            }
            Err(err) => {
                log::warn!("piece {} download failed from peer {addr}: {err}", work.index);
                let _ = work_tx.send(work).await;
                return;
            }
        }
    }
}

async fn dequeue(work_rx: &Arc<Mutex<mpsc::Receiver<PieceWork>>>) -> Option<PieceWork> {
    let mut rx = work_rx.lock().await;
    rx.recv().await
}

/// Downloads one piece by pipelining block requests, refreshing the rolling
/// piece deadline on every read.
async fn download_piece(
    session: &mut PeerSession,
    work: &PieceWork,
    conf: &DownloadConf,
) -> Result<Vec<u8>> {
    let mut buf = vec![0u8; work.length as usize];
    let mut downloaded: u32 = 0;
    let mut requested: u32 = 0;
    let mut backlog: usize = 0;

    while downloaded < work.length {
        if !session.is_choked_by_remote() {
            while backlog < conf.max_backlog && requested < work.length {
                let block_length = std::cmp::min(conf.max_block_size, work.length - requested);
                session
                    .send_request(work.index as u32, requested, block_length)
                    .await?;
                requested += block_length;
                backlog += 1;
            }
        }

        let msg = timeout(conf.piece_timeout, session.read())
            .await
            .map_err(|_| {
                Error::Io(std::io::Error::new(
                    std::io::ErrorKind::TimedOut,
                    "piece download timed out",
                ))
            })??;

        match &msg {
            Message::Piece { .. } => {
                let written = codec::parse_piece(work.index, &mut buf, &msg)?;
                downloaded += written as u32;
                backlog = backlog.saturating_sub(1);
            }
            _ => session.apply_dispatch(&msg)?,
        }
    }

    Ok(buf)
}
