//! Minimal embedding binary: wires up one market, places a few orders, and
//! prints the resulting order book and balances. Configuration loading
//! from the environment is deliberately this binary's concern, not the
//! core's.

use exchange_core::config::Config;
use exchange_core::types::{Asset, Side, TimeInForce};
use exchange_core::Exchange;
use rust_decimal_macros::dec;
use std::env;

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("exchange_core=info".parse().unwrap()),
        )
        .init();

    let market = env::var("EXCHANGE_MARKET").unwrap_or_else(|_| "BASE/QUOTE".to_string());
    let mut exchange = Exchange::new(Config::for_market(market, Asset::new("BASE"), Asset::new("QUOTE")));

    let maker = exchange.create_user("maker@example.com", "hash");
    let taker = exchange.create_user("taker@example.com", "hash");

    exchange.credit_deposit(maker.id, Asset::new("BASE"), dec!(10), "0xseed1").unwrap();
    exchange.credit_deposit(taker.id, Asset::new("QUOTE"), dec!(1000), "0xseed2").unwrap();

    exchange.place_limit_order(maker.id, Side::Sell, dec!(10), dec!(5), TimeInForce::Gtc).unwrap();
    let taker_order = exchange
        .place_limit_order(taker.id, Side::Buy, dec!(10), dec!(3), TimeInForce::Gtc)
        .unwrap();

    tracing::info!(?taker_order, "taker order settled");
    let overview = exchange.get_market_overview(1).unwrap();
    println!("market: {}", overview.market);
    println!("bids: {:?}", overview.bids);
    println!("asks: {:?}", overview.asks);
    println!("recent trades: {}", overview.recent_trades.len());
}
