// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Circular buffer microbenchmarks.
//!
//! Measures append and catch-up reads over a POSIX shared memory region at
//! various payload sizes.

use std::sync::Arc;
use std::time::Duration;

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use shmpipe_core::envelope::Envelope;
use shmpipe_core::shm::{BufferOptions, CircularBuffer, SharedMemoryRegion};

/// Payload sizes to benchmark (in bytes).
const PAYLOAD_SIZES: &[usize] = &[64, 256, 1024, 4096, 16384];

const REGION_SIZE: usize = 1024 * 1024;

fn make_buffer(prefix: &str, size: usize) -> CircularBuffer {
    let name = format!("{}_{}_{}", prefix, size, std::process::id());
    let region = SharedMemoryRegion::open_or_create(&name, REGION_SIZE)
        .expect("Failed to create SHM region")
        .with_unlink_on_drop(true);
    CircularBuffer::new(Arc::new(region), BufferOptions::default())
        .expect("Failed to create circular buffer")
}

/// Benchmark appends, including wraparound once the ring fills.
fn bench_insert(c: &mut Criterion) {
    let mut group = c.benchmark_group("circular_buffer_insert");
    group.measurement_time(Duration::from_secs(5));

    for &size in PAYLOAD_SIZES {
        group.throughput(Throughput::Bytes(size as u64));

        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, &size| {
            let buffer = make_buffer("bench_insert", size);
            let payload = vec![0xABu8; size];

            b.iter(|| {
                buffer.insert(black_box(&payload)).ok();
            });
        });
    }

    group.finish();
}

/// Benchmark a subscriber catching up on the last 16 frames.
fn bench_frames_after(c: &mut Criterion) {
    let mut group = c.benchmark_group("circular_buffer_frames_after");
    group.measurement_time(Duration::from_secs(5));

    for &size in PAYLOAD_SIZES {
        group.throughput(Throughput::Bytes(size as u64 * 16));

        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, &size| {
            let buffer = make_buffer("bench_read", size);
            let payload = vec![0xCDu8; size];

            for _ in 0..64 {
                buffer.insert(&payload).expect("Insert failed");
            }
            let frames = buffer.frames_after(i64::MIN).expect("Read failed");
            let cursor = frames[frames.len().saturating_sub(17)].tick;

            b.iter(|| {
                black_box(buffer.frames_after(black_box(cursor)).ok());
            });
        });
    }

    group.finish();
}

/// Benchmark envelope encode and checksum verification.
fn bench_envelope(c: &mut Criterion) {
    let mut group = c.benchmark_group("envelope");

    for &size in PAYLOAD_SIZES {
        group.throughput(Throughput::Bytes(size as u64));

        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, &size| {
            let message = vec![0x42u8; size];

            b.iter(|| {
                let bytes = Envelope::new(b"bench-key", black_box(&message))
                    .encode()
                    .expect("Encode failed");
                black_box(Envelope::decode(&bytes).is_ok());
            });
        });
    }

    group.finish();
}

criterion_group!(benches, bench_insert, bench_frames_after, bench_envelope);
criterion_main!(benches);
