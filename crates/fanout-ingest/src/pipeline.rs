//! The per-packet ingest loop.

use std::future::Future;
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::Context;
use tokio::io::AsyncRead;

use fanout_ring::Writer;
use fanout_wire::record::{round_up_8, LoggingHeader, HEADER_LEN};

use crate::chunk::ChunkWriter;

/// An iteration slower than this gets reported; on the target hardware it
/// means the staging directory is misbehaving (usually: not a tmpfs).
const SLOW_ITERATION_MICROS: u64 = 100_000;

/// Wall-clock time in unix microseconds.
pub fn unix_micros_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_micros() as u64)
        .unwrap_or(0)
}

/// Run the ingest loop until the input ends or `shutdown` resolves.
///
/// Per packet: de-frame one datagram straight into the ring's current slot,
/// timestamp it, roll the chunk file if its ten-second bucket has passed
/// (announcing the completed path through `emit_completed`), publish to the
/// ring, and append the same record to the open chunk file. On the way out,
/// any open chunk file is closed and announced.
///
/// Only chunk-file failures abort with an error; a failed or exhausted
/// serial read is a normal end of stream.
pub async fn run_ingest<P, E, F>(
    mut port: P,
    mut ring: Writer,
    mut chunks: Option<ChunkWriter>,
    mut emit_completed: E,
    shutdown: F,
) -> anyhow::Result<()>
where
    P: AsyncRead + Unpin,
    E: FnMut(&Path),
    F: Future<Output = ()>,
{
    tokio::pin!(shutdown);

    // Slot sizing must leave room for the header, keep the zeroed disk
    // padding inside the slot, and fit the header's 16-bit size field.
    anyhow::ensure!(
        ring.max_packet_size() > HEADER_LEN && ring.max_packet_size() % 8 == 0,
        "ring slots of {} bytes cannot carry 8-byte-aligned records",
        ring.max_packet_size()
    );
    let max_payload = ring.max_packet_size() - HEADER_LEN;
    anyhow::ensure!(
        max_payload <= usize::from(u16::MAX),
        "payloads of {max_payload} bytes would overflow the header size field"
    );
    let mut previous_micros = 0u64;

    loop {
        let slot = ring.slot();
        let (_, payload_area) = slot.split_at_mut(HEADER_LEN);

        let payload_len = tokio::select! {
            biased;
            _ = &mut shutdown => {
                tracing::info!("leaving the ingest loop on termination signal");
                break;
            }
            decoded = fanout_wire::read_frame(&mut port, &mut payload_area[..max_payload]) => {
                match decoded {
                    Ok(Some(len)) => len,
                    Ok(None) => {
                        tracing::info!("input stream ended");
                        break;
                    }
                    Err(e) => {
                        // ENXIO is the usual USB-unplug exit and not worth
                        // an error-level report.
                        if e.raw_os_error() == Some(nix::errno::Errno::ENXIO as i32) {
                            tracing::info!("serial device went away");
                        } else {
                            tracing::error!(error = %e, "serial read failed");
                        }
                        break;
                    }
                }
            }
        };

        if payload_len == 0 {
            continue;
        }

        let packet_micros = unix_micros_now();
        if previous_micros > packet_micros {
            tracing::warn!(
                jump_us = previous_micros - packet_micros,
                now_us = packet_micros,
                "time has jumped backwards; stamping with the new time"
            );
        }
        previous_micros = packet_micros;

        if let Some(chunks) = chunks.as_mut() {
            if let Some(done) = chunks.roll(packet_micros).context("closing chunk file")? {
                emit_completed(&done);
            }
            chunks
                .ensure_open(packet_micros)
                .context("creating chunk file")?;
        }

        let header = LoggingHeader::new(payload_len as u16, packet_micros);
        let slot = ring.slot();
        slot[..HEADER_LEN].copy_from_slice(&header.encode());
        // Zero the disk padding inside the slot; the slot's 16-byte
        // granularity guarantees the room even for a maximal payload.
        let padded = round_up_8(payload_len);
        slot[HEADER_LEN + payload_len..HEADER_LEN + padded].fill(0);

        // Realtime readers may observe the packet from here on.
        let record = ring.publish(HEADER_LEN + payload_len);

        if let Some(chunks) = chunks.as_mut() {
            chunks
                .append_record(record)
                .context("appending to chunk file")?;
        }

        log_text_packet(&record[HEADER_LEN..]);

        let elapsed = unix_micros_now().saturating_sub(packet_micros);
        if elapsed >= SLOW_ITERATION_MICROS {
            tracing::warn!(ms = elapsed / 1000, "packet output took too long");
        }
    }

    if let Some(chunks) = chunks.as_mut() {
        if let Some(done) = chunks.finish().context("closing final chunk file")? {
            emit_completed(&done);
        }
    }

    Ok(())
}

/// Report a packet that starts with printable text. Purely diagnostic;
/// many upstream devices announce themselves in ASCII before switching to
/// their binary format.
pub fn log_text_packet(payload: &[u8]) {
    let mut printable = 0;
    for &byte in payload {
        if byte == b'\r' || byte == b'\n' {
            break;
        }
        if !(byte.is_ascii_graphic() || byte == b' ') {
            return;
        }
        printable += 1;
    }
    if printable > 0 {
        tracing::info!(
            text = %String::from_utf8_lossy(&payload[..printable]),
            "printable packet"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn text_packet_scan_handles_arbitrary_bytes() {
        log_text_packet(b"");
        log_text_packet(b"$GPGGA,1234\r\n");
        log_text_packet(&[0x00, 0x41, 0x42]);
        log_text_packet(&[0xFF; 64]);
        log_text_packet(b"plain text with no newline");
    }

    #[test]
    fn clock_is_sane() {
        // 2020-01-01 in unix microseconds; mostly guards the unit.
        assert!(unix_micros_now() > 1_577_836_800_000_000);
    }
}
