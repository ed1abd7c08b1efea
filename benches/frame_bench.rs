use bytes::{Bytes, BytesMut};
use criterion::{criterion_group, criterion_main, BatchSize, Criterion, Throughput};
use objwire::core::codec::FrameCodec;
use objwire::protocol::block::{Block, CallBlock};
use tokio_util::codec::{Decoder, Encoder};

fn call_block(size: usize) -> Block {
    Block::Call(CallBlock {
        request_id: 101,
        object_id: 0,
        method_id: 3,
        payload: Bytes::from(vec![0u8; size]),
    })
}

#[allow(clippy::unwrap_used)]
fn bench_call_frames(c: &mut Criterion) {
    let mut group = c.benchmark_group("call_frame");
    let payload_sizes = [0usize, 64, 512, 4096, 65536, 1024 * 1024];

    for &size in &payload_sizes {
        group.throughput(Throughput::Bytes(size as u64));

        group.bench_function(format!("encode_{size}b"), |b| {
            b.iter_batched(
                || call_block(size),
                |block| {
                    let mut buf = BytesMut::with_capacity(size + 16);
                    let mut codec = FrameCodec::default();
                    codec.encode(block.into_frame(), &mut buf).unwrap();
                    buf
                },
                BatchSize::SmallInput,
            )
        });

        let mut wire = BytesMut::new();
        FrameCodec::default()
            .encode(call_block(size).into_frame(), &mut wire)
            .unwrap();
        group.bench_function(format!("decode_{size}b"), |b| {
            b.iter_batched(
                || wire.clone(),
                |mut buf| {
                    let mut codec = FrameCodec::default();
                    let frame = codec.decode(&mut buf).unwrap().unwrap();
                    Block::decode(frame).unwrap()
                },
                BatchSize::SmallInput,
            )
        });
    }

    group.finish();
}

criterion_group!(benches, bench_call_frames);
criterion_main!(benches);
