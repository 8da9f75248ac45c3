//! Benchmarks for FEC group encoding and recovery.

use bytes::Bytes;
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use lan_speaker_sync::fec::FecCodec;

fn data_units(k: usize, len: usize) -> Vec<Bytes> {
    (0..k)
        .map(|i| Bytes::from((0..len).map(|j| (i * 31 + j * 7) as u8).collect::<Vec<u8>>()))
        .collect()
}

fn encode(c: &mut Criterion) {
    let mut group = c.benchmark_group("fec_encode");
    let data = data_units(4, 480);

    for r in [1u8, 2, 4, 8] {
        group.bench_with_input(BenchmarkId::from_parameter(r), &r, |b, &r| {
            let mut codec = FecCodec::new();
            b.iter(|| codec.encode(black_box(&data), r).unwrap())
        });
    }

    group.finish();
}

fn decode(c: &mut Criterion) {
    let mut group = c.benchmark_group("fec_decode");
    let data = data_units(4, 480);

    for r in [1u8, 2, 4, 8] {
        let mut codec = FecCodec::new();
        let units = codec.encode(&data, r).unwrap();
        // Lose as many data units as the parity can cover
        let received: Vec<Option<Bytes>> = units
            .into_iter()
            .enumerate()
            .map(|(i, unit)| if i < r.min(4) as usize { None } else { Some(unit) })
            .collect();

        group.bench_with_input(BenchmarkId::from_parameter(r), &received, |b, received| {
            b.iter(|| codec.decode(black_box(received), 4, r).unwrap())
        });
    }

    group.bench_function("no_loss", |b| {
        let mut codec = FecCodec::new();
        let received: Vec<Option<Bytes>> = codec.encode(&data, 2).unwrap().into_iter().map(Some).collect();
        b.iter(|| codec.decode(black_box(&received), 4, 2).unwrap())
    });

    group.finish();
}

criterion_group!(benches, encode, decode);
criterion_main!(benches);
