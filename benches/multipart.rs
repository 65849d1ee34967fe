use std::hint::black_box;
use std::io::{self, Cursor, Read};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use http::StatusCode;
use httpflow::Body;
use httpflow::prelude::{Chain, Dispatcher, Multipart, Request, RequestBuilder, Response, from_fn};

const PAYLOAD_BYTES: usize = 256 * 1024;

fn drain(mut reader: impl Read) -> u64 {
    io::copy(&mut reader, &mut io::sink()).expect("drain reader")
}

fn sink_dispatcher() -> Arc<dyn Dispatcher> {
    Arc::new(|request: &mut Request| -> httpflow::Result<Response> {
        if let Some(body) = request.take_body() {
            black_box(drain(body));
        }
        Ok(Response::empty(StatusCode::NO_CONTENT))
    })
}

fn bench_multipart_encode(c: &mut Criterion) {
    let payload = Bytes::from(vec![b'x'; PAYLOAD_BYTES]);

    let mut group = c.benchmark_group("multipart_256k");
    group.sample_size(60);
    group.throughput(Throughput::Bytes(PAYLOAD_BYTES as u64));
    group.bench_function("encode_and_read", |b| {
        b.iter(|| {
            let mut form = Multipart::new();
            form.field_value("kind", "report")
                .file_from_memory("file", "report.bin", Cursor::new(payload.clone()))
                .close();
            let reader = form.into_reader().expect("closed form");
            black_box(drain(reader))
        });
    });
    group.finish();
}

fn bench_body_replay(c: &mut Criterion) {
    let mut group = c.benchmark_group("body_replay");
    for size in [1024_usize, 64 * 1024, PAYLOAD_BYTES] {
        let body = Body::from_bytes(vec![b'y'; size]);
        group.throughput(Throughput::Bytes(size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &body, |b, body| {
            b.iter(|| {
                let replay = body.replay().expect("replayable body");
                black_box(drain(replay))
            });
        });
    }
    group.finish();
}

fn bench_chain_depth(c: &mut Criterion) {
    let dispatcher = sink_dispatcher();

    let mut group = c.benchmark_group("chain_depth");
    for depth in [0_usize, 4, 16] {
        let links = (0..depth).map(|_| from_fn(|request, next| next(request)));
        let chain = Chain::new().with(links);
        group.bench_with_input(BenchmarkId::from_parameter(depth), &chain, |b, chain| {
            b.iter(|| {
                let response = RequestBuilder::new(Arc::clone(&dispatcher))
                    .chain(chain.clone())
                    .url("http://bench.invalid/items")
                    .header("X-Bench", ["1"])
                    .body(Cursor::new(b"payload".to_vec()))
                    .execute()
                    .expect("in-memory dispatch");
                black_box(response.status())
            });
        });
    }
    group.finish();
}

criterion_group!(
    name = benches;
    config = Criterion::default()
        .warm_up_time(Duration::from_secs(1))
        .measurement_time(Duration::from_secs(5));
    targets = bench_multipart_encode, bench_body_replay, bench_chain_depth
);
criterion_main!(benches);
