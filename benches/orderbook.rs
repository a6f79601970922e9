//! Benchmarks for order book operations

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use depthflow::orderbook::OrderBook;
use depthflow::parser::PriceLevel;
use rust_decimal::Decimal;
use std::str::FromStr;

fn ladder(levels: usize) -> (Vec<PriceLevel>, Vec<PriceLevel>) {
    let qty = Decimal::from_str("1.5").unwrap();
    let bids = (0..levels)
        .map(|i| PriceLevel::new(Decimal::from(50_000 - i as i64), qty))
        .collect();
    let asks = (0..levels)
        .map(|i| PriceLevel::new(Decimal::from(50_001 + i as i64), qty))
        .collect();
    (bids, asks)
}

fn benchmark_apply_snapshot(c: &mut Criterion) {
    let (bids, asks) = ladder(100);

    c.bench_function("apply_snapshot_100_levels", |b| {
        b.iter(|| {
            let mut book = OrderBook::new("SPYXUSDT");
            book.apply_snapshot(black_box(&bids), black_box(&asks), 1000);
        })
    });
}

fn benchmark_apply_update(c: &mut Criterion) {
    let (bids, asks) = ladder(100);
    let mut book = OrderBook::new("SPYXUSDT");
    book.apply_snapshot(&bids, &asks, 1000);

    let bid_deltas = vec![PriceLevel::new(
        Decimal::from(49_999),
        Decimal::from_str("2.0").unwrap(),
    )];
    let ask_deltas = vec![PriceLevel::new(
        Decimal::from(50_001),
        Decimal::from_str("2.5").unwrap(),
    )];

    c.bench_function("apply_update", |b| {
        b.iter(|| {
            book.apply_update(black_box(&bid_deltas), black_box(&ask_deltas), 1001);
        })
    });
}

fn benchmark_snapshot_reads(c: &mut Criterion) {
    let (bids, asks) = ladder(100);
    let mut book = OrderBook::new("SPYXUSDT");
    book.apply_snapshot(&bids, &asks, 1000);

    c.bench_function("microprice_depth_20", |b| {
        b.iter(|| {
            black_box(book.microprice(20));
        })
    });

    c.bench_function("snapshot_full_depth_20", |b| {
        b.iter(|| {
            black_box(book.snapshot(20, true));
        })
    });

    let exclude = vec![Decimal::from(50_000)];
    c.bench_function("snapshot_excluding_own_quote", |b| {
        b.iter(|| {
            black_box(book.snapshot_excluding(&exclude, &[], 5));
        })
    });
}

criterion_group!(
    benches,
    benchmark_apply_snapshot,
    benchmark_apply_update,
    benchmark_snapshot_reads
);
criterion_main!(benches);
