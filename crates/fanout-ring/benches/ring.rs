//! Criterion benchmarks for the ring's hot paths.
//!
//! The publish path runs once per ingested datagram, so its cost bounds the
//! sustainable packet rate; the reader poll is the idle cost every consumer
//! pays between packets.
//!
//! Run with: cargo bench -p fanout-ring

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use fanout_ring::{Reader, Recv, Writer};
use nix::sys::mman::shm_unlink;

fn bench_segment(tag: &str) -> (Writer, Reader, String) {
    let name = format!("/fanout_bench_{}_{}", tag, std::process::id());
    let writer = Writer::create(&name, 1 << 22, 65528).unwrap();
    let reader = Reader::open(&name).unwrap().unwrap();
    // Unlink immediately: the object lives on until both maps drop, and the
    // bench leaves nothing behind in /dev/shm.
    let _ = shm_unlink(name.as_str());
    (writer, reader, name)
}

fn publish_throughput(c: &mut Criterion) {
    let mut group = c.benchmark_group("ring_publish");

    for (label, size) in [("64B", 64), ("1KB", 1024), ("16KB", 16 * 1024), ("64KB", 65528)] {
        let (mut writer, mut reader, _name) = bench_segment(label);
        let payload = vec![0xA5u8; size];

        group.throughput(Throughput::Bytes(size as u64));
        group.bench_with_input(BenchmarkId::new("publish", label), &size, |b, _| {
            b.iter(|| {
                writer.slot()[..payload.len()].copy_from_slice(black_box(&payload));
                writer.publish(payload.len());
                // Drain as we go so the bench measures the steady state
                // rather than a permanently lapped consumer.
                if let Recv::Packet(p) = reader.recv() {
                    black_box(p.len());
                }
            });
        });
    }

    group.finish();
}

fn empty_poll(c: &mut Criterion) {
    let (_writer, mut reader, _name) = bench_segment("poll");

    c.bench_function("ring_recv_empty", |b| {
        b.iter(|| {
            let r = reader.recv();
            black_box(matches!(r, Recv::Empty));
        });
    });
}

fn kept_up_check(c: &mut Criterion) {
    let (mut writer, mut reader, _name) = bench_segment("keptup");
    writer.slot()[..512].fill(0x3C);
    writer.publish(512);
    let _ = reader.recv();

    c.bench_function("ring_has_kept_up", |b| {
        b.iter(|| black_box(reader.has_kept_up()));
    });
}

criterion_group!(benches, publish_throughput, empty_poll, kept_up_check);
criterion_main!(benches);
