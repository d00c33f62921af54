//! CLI front-end: takes a `.torrent` file or a magnet URI plus an output
//! path, discovers peers, runs the download to completion, and writes the
//! assembled buffer to disk.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;

use swarmwire::conf::Conf;
use swarmwire::engine::Coordinator;
use swarmwire::error::{Error, Result};
use swarmwire::magnet::MagnetLink;
use swarmwire::metainfo::Metainfo;
use swarmwire::peers::Peer;
use swarmwire::{dht, tracker};

/// A concurrent BitTorrent V1 piece-download client.
#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to a `.torrent` file, or a `magnet:?xt=urn:btih:...` URI.
    input: String,

    /// Path the assembled download is written to.
    output: PathBuf,
}

fn main() -> ExitCode {
    env_logger::init();
    let cli = Cli::parse();

    match run(cli) {
        Ok(()) => {
            log::info!("Download completed successfully!");
            ExitCode::SUCCESS
        }
        Err(err) => {
            eprintln!("swarmwire: {err}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<()> {
    let conf = Conf::new();
    let peer_id = conf.engine.client_id;

    let (info_hash, piece_hashes, piece_length, total_length, name, mut bootstrap_peers) =
        if cli.input.starts_with("magnet:") {
            let magnet = MagnetLink::parse(&cli.input)?;
            log::info!("Parsed magnet link for {:?}", magnet.name);

            let mut peers = Vec::new();
            for tracker_url in &magnet.trackers {
                match tracker::announce(tracker_url, magnet.info_hash, peer_id, 1) {
                    Ok(response) => peers.extend(response.peers),
                    Err(err) => log::warn!("tracker {tracker_url} announce failed: {err}"),
                }
            }
            if peers.is_empty() {
                peers.extend(dht::find_peers(peer_id, magnet.info_hash));
            }

            // This engine does not implement the BEP 9 metadata exchange,
            // so a bare magnet link never carries enough information
            // (piece hashes, piece length, total length) to download
            // anything; fail fast instead of hanging forever.
            log::error!(
                "{} peer(s) discovered but piece metadata is unavailable from a magnet link alone",
                peers.len()
            );
            return Err(Error::MetadataUnavailable);
        } else {
            let metainfo = Metainfo::open(&cli.input)?;
            let info_hash = metainfo.info_hash()?;
            let piece_hashes = metainfo.piece_hashes()?;
            let piece_length = metainfo.piece_length();
            let total_length = metainfo.total_length()?;
            let name = metainfo.name().to_string();

            let peers = match tracker::announce(&metainfo.announce, info_hash, peer_id, total_length) {
                Ok(response) => response.peers,
                Err(err) => {
                    log::warn!("tracker announce failed: {err}; falling back to DHT bootstrap");
                    dht::find_peers(peer_id, info_hash)
                }
            };

            (
                info_hash,
                piece_hashes,
                piece_length,
                total_length,
                name,
                peers,
            )
        };

    dedup_peers(&mut bootstrap_peers);
    log::info!(
        "Discovered {} peer(s) for {:?}",
        bootstrap_peers.len(),
        name
    );

    let coordinator = Coordinator::new(
        info_hash,
        peer_id,
        piece_hashes,
        piece_length,
        total_length,
        name,
        bootstrap_peers,
        conf.download,
    );

    let runtime = tokio::runtime::Runtime::new().map_err(Error::Io)?;
    let output = runtime.block_on(coordinator.run())?;

    std::fs::write(&cli.output, &output)?;
    Ok(())
}

fn dedup_peers(peers: &mut Vec<Peer>) {
    let mut seen = std::collections::HashSet::new();
    peers.retain(|peer| seen.insert(peer.addr()));
}
