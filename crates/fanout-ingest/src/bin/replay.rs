//! Republish logged records into a fresh shared-memory segment.
//!
//! Reads the on-disk record format from stdin (typically a decompressed
//! chunk file, or several concatenated) and publishes each record to the
//! ring exactly as the live ingest would have, original timestamps
//! included. Lets the realtime readers be exercised against recorded data.

use std::io::BufReader;

use anyhow::Context;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use fanout_ingest::pipeline::log_text_packet;
use fanout_ring::Writer;
use fanout_wire::record::round_up_8;
use fanout_wire::{RecordReader, HEADER_LEN};

const RING_CAPACITY: usize = 4 * 1024 * 1024;
const MAX_PACKET: usize = 65528;

#[derive(Parser)]
#[command(name = "replay")]
#[command(about = "Republish logged records from stdin into a shared-memory segment")]
struct Cli {
    /// Segment name to create.
    #[arg(default_value = "/cobs_to_shm")]
    segment: String,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let mut ring = Writer::create(&cli.segment, RING_CAPACITY, HEADER_LEN + MAX_PACKET)
        .context("creating shared-memory segment")?;

    // Same reader-attach grace period as the live ingest.
    std::thread::sleep(std::time::Duration::from_millis(200));

    let stdin = std::io::stdin().lock();
    let mut records = RecordReader::new(BufReader::new(stdin));

    while let Some((header, payload)) = records.next_record().context("reading stdin")? {
        if payload.len() > MAX_PACKET {
            tracing::warn!(size = payload.len(), "record larger than a slot, skipping");
            continue;
        }

        let slot = ring.slot();
        slot[..HEADER_LEN].copy_from_slice(&header.encode());
        slot[HEADER_LEN..HEADER_LEN + payload.len()].copy_from_slice(&payload);
        slot[HEADER_LEN + payload.len()..HEADER_LEN + round_up_8(payload.len())].fill(0);

        let record = ring.publish(HEADER_LEN + payload.len());
        log_text_packet(&record[HEADER_LEN..]);
    }

    tracing::info!("exiting");
    Ok(())
}
