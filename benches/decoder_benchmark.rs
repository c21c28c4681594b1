//! Response decoder benchmark suite for evfetch.
//!
//! Benchmarks the incremental decoder under different fragmentations:
//! - Content-Length bodies fed whole and in small reads
//! - Chunked bodies with varying chunk sizes
//! - Header-heavy responses
//!
//! Run:
//!   cargo bench --bench decoder_benchmark

#![allow(missing_docs)]
#![allow(clippy::semicolon_if_nothing_returned)]

use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use std::hint::black_box;

use evfetch::http::h1::{Decode, ResponseDecoder};

// =============================================================================
// HELPERS
// =============================================================================

fn length_response(body_len: usize) -> Vec<u8> {
    let mut wire = format!("HTTP/1.1 200 OK\r\nContent-Length: {body_len}\r\n\r\n").into_bytes();
    wire.resize(wire.len() + body_len, b'x');
    wire
}

fn chunked_response(body_len: usize, chunk: usize) -> Vec<u8> {
    let mut wire = b"HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\n".to_vec();
    let mut left = body_len;
    while left > 0 {
        let size = chunk.min(left);
        wire.extend_from_slice(format!("{size:x}\r\n").as_bytes());
        wire.resize(wire.len() + size, b'y');
        wire.extend_from_slice(b"\r\n");
        left -= size;
    }
    wire.extend_from_slice(b"0\r\n\r\n");
    wire
}

fn header_heavy_response(headers: usize) -> Vec<u8> {
    let mut wire = b"HTTP/1.1 200 OK\r\n".to_vec();
    for i in 0..headers {
        wire.extend_from_slice(format!("X-Header-{i}: value-{i}\r\n").as_bytes());
    }
    wire.extend_from_slice(b"Content-Length: 2\r\n\r\nok");
    wire
}

fn decode(wire: &[u8], read_size: usize) -> usize {
    let mut decoder = ResponseDecoder::new();
    for fragment in wire.chunks(read_size) {
        match decoder.feed(fragment) {
            Decode::NeedMoreData => {}
            Decode::Complete(response) => return response.body.len(),
            Decode::Malformed(err) => panic!("benchmark input rejected: {err}"),
        }
    }
    panic!("benchmark input incomplete")
}

// =============================================================================
// BENCHMARKS
// =============================================================================

fn bench_content_length(c: &mut Criterion) {
    let mut group = c.benchmark_group("decoder/content_length");
    let wire = length_response(256 * 1024);
    group.throughput(Throughput::Bytes(wire.len() as u64));
    for read_size in [512usize, 8 * 1024, wire.len()] {
        group.bench_with_input(BenchmarkId::from_parameter(read_size), &read_size, |b, &rs| {
            b.iter(|| black_box(decode(black_box(&wire), rs)))
        });
    }
    group.finish();
}

fn bench_chunked(c: &mut Criterion) {
    let mut group = c.benchmark_group("decoder/chunked");
    for chunk in [64usize, 1024, 16 * 1024] {
        let wire = chunked_response(256 * 1024, chunk);
        group.throughput(Throughput::Bytes(wire.len() as u64));
        group.bench_with_input(BenchmarkId::from_parameter(chunk), &wire, |b, wire| {
            b.iter(|| black_box(decode(black_box(wire), 8 * 1024)))
        });
    }
    group.finish();
}

fn bench_headers(c: &mut Criterion) {
    let mut group = c.benchmark_group("decoder/headers");
    for headers in [8usize, 64] {
        let wire = header_heavy_response(headers);
        group.bench_with_input(BenchmarkId::from_parameter(headers), &wire, |b, wire| {
            b.iter(|| black_box(decode(black_box(wire), 97)))
        });
    }
    group.finish();
}

criterion_group!(benches, bench_content_length, bench_chunked, bench_headers);
criterion_main!(benches);
