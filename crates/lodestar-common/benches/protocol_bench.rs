// Criterion benchmarks for the lodestar-common protocol layer
//
// Run benchmarks with:
//   cargo bench -p lodestar-common
//
// For detailed output with plots:
//   cargo bench -p lodestar-common -- --save-baseline main

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use lodestar_common::buffer::ByteBuffer;
use lodestar_common::codec::WireCodec;
use lodestar_common::protocol::{RpcRequest, RpcResponse};
use lodestar_common::transport::framing;

fn bench_envelope_encoding(c: &mut Criterion) {
    let mut group = c.benchmark_group("envelope_encoding");

    let small = RpcRequest::new("Calculator", "Add", vec![0u8; 16]);
    let medium = RpcRequest::new("Calculator", "Add", vec![0u8; 1024]);
    let large = RpcRequest::new("Calculator", "Add", vec![0u8; 64 * 1024]);

    for codec in [WireCodec::Binary, WireCodec::Json] {
        group.bench_function(format!("{}_small", codec.name()), |b| {
            b.iter(|| codec.encode_request(black_box(&small)));
        });
        group.bench_function(format!("{}_medium", codec.name()), |b| {
            b.iter(|| codec.encode_request(black_box(&medium)));
        });
        group.bench_function(format!("{}_large", codec.name()), |b| {
            b.iter(|| codec.encode_request(black_box(&large)));
        });
    }

    group.finish();
}

fn bench_envelope_decoding(c: &mut Criterion) {
    let mut group = c.benchmark_group("envelope_decoding");

    let request = RpcRequest::new("Calculator", "Add", vec![0u8; 1024]);
    let response = RpcResponse::success(request.request_id, vec![0u8; 1024]);

    for codec in [WireCodec::Binary, WireCodec::Json] {
        let req_bytes = codec.encode_request(&request).unwrap();
        let resp_bytes = codec.encode_response(&response).unwrap();

        group.bench_function(format!("{}_request", codec.name()), |b| {
            b.iter(|| codec.decode_request(black_box(&req_bytes)));
        });
        group.bench_function(format!("{}_response", codec.name()), |b| {
            b.iter(|| codec.decode_response(black_box(&resp_bytes)));
        });
    }

    group.finish();
}

fn bench_framing(c: &mut Criterion) {
    let mut group = c.benchmark_group("framing");

    let body = vec![0x5Au8; 4096];
    let frame = framing::encode(&body);

    group.bench_function("encode_4k", |b| {
        b.iter(|| framing::encode(black_box(&body)));
    });

    group.bench_function("decode_4k", |b| {
        b.iter(|| {
            let mut buf = ByteBuffer::new();
            buf.append(black_box(&frame)).unwrap();
            let mut out = Vec::new();
            framing::decode(&mut buf, &mut out).unwrap()
        });
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_envelope_encoding,
    bench_envelope_decoding,
    bench_framing,
);
criterion_main!(benches);
