//! Codec and hold/release throughput (Criterion).
//!
//! Run: `cargo bench --bench codec`.

use criterion::{criterion_group, criterion_main, BatchSize, Criterion, Throughput};
use exchange_client::market_data_gen::{Generator, GeneratorConfig};
use exchange_client::{wire, FairnessPolicy, HoldReleaseBuffer, InProcessBus, Transport};
use std::sync::Arc;

fn config() -> GeneratorConfig {
    GeneratorConfig {
        seed: 42,
        symbols: vec!["AA".into(), "AB".into()],
        ..Default::default()
    }
}

fn bench_order_codec(c: &mut Criterion) {
    const N: usize = 1000;
    let orders = Generator::new(config()).take_orders(N);
    let records: Vec<String> = orders.iter().map(|o| wire::encode_order(o, false)).collect();
    let mut group = c.benchmark_group("codec");
    group.throughput(Throughput::Elements(N as u64));
    group.bench_function("encode_order_1000", |b| {
        b.iter(|| {
            for o in &orders {
                criterion::black_box(wire::encode_order(o, false));
            }
        })
    });
    group.bench_function("decode_order_1000", |b| {
        b.iter(|| {
            for r in &records {
                criterion::black_box(wire::decode_order(r).unwrap());
            }
        })
    });
    group.finish();
}

fn bench_book_codec(c: &mut Criterion) {
    let book = Generator::new(config()).book("AA", 250);
    let record = wire::encode_book(&book, 0, false);
    let mut group = c.benchmark_group("codec");
    group.throughput(Throughput::Elements(book.len() as u64));
    group.bench_function("encode_book_500_anonymized_top_10", |b| {
        b.iter(|| criterion::black_box(wire::encode_book(&book, 10, true)))
    });
    group.bench_function("decode_book_500", |b| {
        b.iter(|| criterion::black_box(wire::decode_book(&record).unwrap()))
    });
    group.finish();
}

fn bench_hold_release(c: &mut Criterion) {
    const N: usize = 500;
    let mut group = c.benchmark_group("fairness");
    group.throughput(Throughput::Elements(N as u64));
    group.bench_function("hold_and_release_500_trades", |b| {
        b.iter_batched(
            || {
                let bus = Arc::new(InProcessBus::new());
                bus.bind("gw");
                let inbox = bus.subscribe("gw", "AA_RELEASE_TRADE", N).unwrap();
                let buffer = HoldReleaseBuffer::new(bus.clone(), "gw", FairnessPolicy::default()).unwrap();
                let trades = Generator::new(config()).take_trades(N);
                (buffer, trades, inbox)
            },
            |(mut buffer, trades, inbox)| {
                for trade in trades {
                    buffer.hold_trade(trade).unwrap();
                }
                buffer.release_due(u64::MAX).unwrap();
                inbox
            },
            BatchSize::SmallInput,
        )
    });
    group.finish();
}

criterion_group!(benches, bench_order_codec, bench_book_codec, bench_hold_release);
criterion_main!(benches);
