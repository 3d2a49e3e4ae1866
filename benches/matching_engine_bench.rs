use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use exchange_core::config::Config;
use exchange_core::types::{Asset, Side, TimeInForce};
use exchange_core::Exchange;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

fn simulate_order_submissions(order_count: u64) {
    let mut exchange = Exchange::new(Config::for_market(
        "BASE/QUOTE",
        Asset::new("BASE"),
        Asset::new("QUOTE"),
    ));
    let maker = exchange.create_user("maker@bench.local", "hash");
    let taker = exchange.create_user("taker@bench.local", "hash");
    exchange
        .credit_deposit(maker.id, Asset::new("BASE"), Decimal::from(order_count) * dec!(10), "0xseed")
        .unwrap();
    exchange
        .credit_deposit(taker.id, Asset::new("QUOTE"), Decimal::from(order_count) * dec!(10_000), "0xseed")
        .unwrap();

    for i in 0..order_count {
        let price = dec!(10) + Decimal::from(i % 5);
        exchange
            .place_limit_order(maker.id, Side::Sell, price, dec!(1), TimeInForce::Gtc)
            .unwrap();
    }
    for i in 0..order_count {
        let price = dec!(10) + Decimal::from(i % 5);
        exchange
            .place_limit_order(taker.id, Side::Buy, price, dec!(1), TimeInForce::Gtc)
            .unwrap();
    }
}

fn bench_mixed_order_throughput(c: &mut Criterion) {
    let mut group = c.benchmark_group("order_submission_throughput");
    for count in [100u64, 1_000, 10_000] {
        group.throughput(Throughput::Elements(count * 2));
        group.bench_with_input(BenchmarkId::from_parameter(count), &count, |b, &count| {
            b.iter(|| simulate_order_submissions(count));
        });
    }
    group.finish();
}

fn bench_limit_order_placement(c: &mut Criterion) {
    c.bench_function("single_resting_limit_order", |b| {
        let mut exchange = Exchange::new(Config::for_market(
            "BASE/QUOTE",
            Asset::new("BASE"),
            Asset::new("QUOTE"),
        ));
        let maker = exchange.create_user("maker@bench.local", "hash");
        exchange.credit_deposit(maker.id, Asset::new("BASE"), dec!(1_000_000), "0xseed").unwrap();
        let mut price = dec!(10);
        b.iter(|| {
            price += dec!(0.01);
            exchange.place_limit_order(maker.id, Side::Sell, price, dec!(1), TimeInForce::Gtc).unwrap();
        });
    });
}

criterion_group!(benches, bench_mixed_order_throughput, bench_limit_order_placement);
criterion_main!(benches);
