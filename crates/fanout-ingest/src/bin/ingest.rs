//! Logging and fanout for datagrams arriving from serial.
//!
//! Opens a serial port (or USB CDC device), raises DTR, ingests
//! COBS-framed datagrams, de-stuffs them, prepends a size-and-timestamp
//! header, fans them out to realtime listeners through a shared-memory ring
//! buffer, and optionally stages ten-second chunk files. Completed chunk
//! paths go to stdout, one per line, for a downstream compressor; all
//! diagnostics go to stderr.
//!
//! The system clock should be disciplined by GPS or a precision RTC before
//! this starts, and ideally continuously afterwards; the prepended
//! timestamps are only as good as the clock.

#[cfg(not(test))]
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tokio::io::BufReader;
use tokio::signal::unix::{signal, SignalKind};
use tokio_serial::{SerialPort, SerialPortBuilderExt};
use tracing_subscriber::EnvFilter;

use fanout_ingest::{run_ingest, ChunkWriter};
use fanout_ring::Writer;
use fanout_wire::HEADER_LEN;

/// Shared-memory segment readers attach to.
const SEGMENT_NAME: &str = "/cobs_to_shm";

/// Ring capacity in bytes; must be a power of two.
const RING_CAPACITY: usize = 4 * 1024 * 1024;

/// Largest de-framed datagram accepted from the wire.
const MAX_PACKET: usize = 65528;

/// Rate used when the device argument carries no `,baud` suffix.
const DEFAULT_BAUD: u32 = 115_200;

#[derive(Parser)]
#[command(name = "ingest")]
#[command(about = "Fan out COBS-framed serial datagrams via shared memory, staging 10 s chunk files")]
struct Cli {
    /// Serial device, with an optional baud rate: /dev/ttyACM0[,115200]
    device: String,

    /// Staging directory for chunk files. Omit for fanout-only operation.
    /// MUST be fast volatile storage (tmpfs), not an sd card: completed
    /// files are meant to be compressed and moved off by piping this
    /// process's stdout into xargs or similar.
    staging_dir: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // stdout is the completed-file channel; diagnostics go to stderr, at
    // info level unless RUST_LOG says otherwise.
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let args: Vec<String> = std::env::args().skip(1).collect();
    tracing::info!(?args, "starting");

    match &cli.staging_dir {
        Some(dir) => tracing::info!(dir = %dir.display(), "staging chunk files"),
        None => tracing::info!("logging disabled, fanout only"),
    }

    let ring = Writer::create(SEGMENT_NAME, RING_CAPACITY, HEADER_LEN + MAX_PACKET)
        .context("creating shared-memory segment")?;

    // Give simultaneously started readers a chance to attach before the
    // first packet, for deterministic bring-up.
    tokio::time::sleep(Duration::from_millis(200)).await;

    let port = open_serial(&cli.device).await?;
    let port = BufReader::new(port);

    let chunks = cli.staging_dir.map(ChunkWriter::new);

    let mut sigterm = signal(SignalKind::terminate()).context("installing SIGTERM handler")?;
    let mut sigint = signal(SignalKind::interrupt()).context("installing SIGINT handler")?;
    let shutdown = async move {
        tokio::select! {
            _ = sigterm.recv() => {}
            _ = sigint.recv() => {}
        }
    };

    run_ingest(port, ring, chunks, emit_completed, shutdown).await?;

    tracing::info!("exiting");
    Ok(())
}

/// One absolute path per line on stdout; Rust's stdout is line-buffered, so
/// each completed file is visible downstream immediately.
fn emit_completed(path: &std::path::Path) {
    println!("{}", path.display());
}

/// Open `path[,baud]` 8N1 with no flow control and DTR raised. The upstream
/// device waits for DTR-high before transmitting and resets itself when DTR
/// drops at process exit.
async fn open_serial(device: &str) -> anyhow::Result<tokio_serial::SerialStream> {
    let (path, baud) = match device.split_once(',') {
        Some((path, baud)) => {
            let baud: u32 = baud
                .parse()
                .with_context(|| format!("baud rate '{baud}' is not a number"))?;
            (path.to_string(), baud)
        }
        None => {
            tracing::info!(baud = DEFAULT_BAUD, "no baud rate given, using default");
            (device.to_string(), DEFAULT_BAUD)
        }
    };

    let display_path = path.clone();
    let mut port = tokio::task::spawn_blocking(move || {
        tokio_serial::new(&path, baud)
            .data_bits(tokio_serial::DataBits::Eight)
            .parity(tokio_serial::Parity::None)
            .stop_bits(tokio_serial::StopBits::One)
            .flow_control(tokio_serial::FlowControl::None)
            .open_native_async()
    })
    .await
    .context("serial open task failed")?
    .with_context(|| format!("opening serial port {display_path}"))?;

    port.write_data_terminal_ready(true)
        .context("raising DTR")?;

    Ok(port)
}
