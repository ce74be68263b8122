//! Codec benchmarks for pointhub-protocol.

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use pointhub_protocol::{codec, PointValue, ServerEvent};

fn update() -> ServerEvent {
    ServerEvent::PointUpdate {
        id: "station01.pump03.discharge_pressure".to_string(),
        value: PointValue::Float(4.27),
        timestamp: 1_700_000_000_000,
        driver: "modbus-tcp".to_string(),
        device: Some("pump03".to_string()),
        version: 12345,
    }
}

fn bench_encode_update(c: &mut Criterion) {
    let event = update();

    c.bench_function("encode_point_update", |b| {
        b.iter(|| codec::encode(black_box(&event)))
    });
}

fn bench_decode_update(c: &mut Criterion) {
    let text = codec::encode(&update()).unwrap();

    c.bench_function("decode_point_update", |b| {
        b.iter(|| codec::decode(black_box(&text)))
    });
}

fn bench_parse_command(c: &mut Criterion) {
    c.bench_function("parse_subscribe", |b| {
        b.iter(|| codec::decode_command(black_box("SUBSCRIBE station01.pump03.")))
    });
}

criterion_group!(
    benches,
    bench_encode_update,
    bench_decode_update,
    bench_parse_command
);
criterion_main!(benches);
