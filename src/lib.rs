//! Single-market spot exchange core: a central limit order book, a
//! balance ledger, and a synchronous event bus, wired behind one
//! serialization boundary (`Exchange`). Transport, persistence, and
//! external blockchain interaction are deliberately left to the
//! embedding binary; see `demos/demo.rs` for a minimal one.

pub mod account;
pub mod admin;
pub mod config;
pub mod engine;
pub mod error;
pub mod event_bus;
pub mod events;
pub mod ledger;
pub mod market_data;
pub mod models;
pub mod orderbook;
pub mod repository;
pub mod settlement;
pub mod types;

pub use config::Config;
pub use error::{ExchangeError, ExchangeResult};

use engine::MatchingEngine;
use event_bus::EventBus;
use market_data::MarketDataProjection;
use repository::{InMemoryRepository, Repository};
use std::sync::Arc;

/// The aggregate root: every mutation of the ledger, book, or admin state
/// for one market goes through `&mut self` here, so callers are
/// responsible for serializing access (a `Mutex<Exchange<_>>`, or a
/// single-threaded worker consuming a request queue).
pub struct Exchange<R: Repository + Clone = InMemoryRepository> {
    pub config: Config,
    pub repo: R,
    pub engine: MatchingEngine,
    pub bus: EventBus,
    pub market_data: Arc<MarketDataProjection>,
}

impl Exchange<InMemoryRepository> {
    pub fn new(config: Config) -> Self {
        let market_data = Arc::new(MarketDataProjection::new(config.recent_events_capacity));
        let mut bus = EventBus::new();
        let projection = market_data.clone();
        bus.subscribe(move |event| projection.on_event(event));

        Self {
            engine: MatchingEngine::new(config.market.clone()),
            repo: InMemoryRepository::new(),
            bus,
            market_data,
            config,
        }
    }
}

impl<R: Repository + Clone> Exchange<R> {
    /// Feeds the market's last trade price to the armed STOP book,
    /// triggering and resubmitting anything whose condition is met. Called
    /// automatically after every trade produced by an order submission; an
    /// embedding binary driving its own tick loop may also call it directly.
    pub fn process_stop_orders(&mut self, last_trade_price: rust_decimal::Decimal) -> ExchangeResult<Vec<models::Trade>> {
        let base = self.config.base_asset.clone();
        let quote = self.config.quote_asset.clone();
        let fee_rate = self.config.fee_rate;
        settlement::run_unit_of_work(&mut self.repo, &mut self.engine, &self.bus, move |repo, engine, events| {
            engine.process_stop_orders(repo, last_trade_price, &base, &quote, fee_rate, events)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use types::{Side, TimeInForce};

    fn new_exchange() -> Exchange<InMemoryRepository> {
        Exchange::new(Config::for_market("BASE/QUOTE", types::Asset::new("BASE"), types::Asset::new("QUOTE")))
    }

    fn fund(exchange: &mut Exchange<InMemoryRepository>, user_id: u64, asset: &types::Asset, amount: rust_decimal::Decimal) {
        exchange.credit_deposit(user_id, asset.clone(), amount, "0xseed").unwrap();
    }

    #[test]
    fn insufficient_balance_rejects_order_without_mutating_state() {
        let mut exchange = new_exchange();
        let user = exchange.create_user("a@example.com", "hash");
        let asset = exchange.config.quote_asset.clone();
        fund(&mut exchange, user.id, &asset, dec!(5));

        let err = exchange
            .place_limit_order(user.id, Side::Buy, dec!(2), dec!(5), TimeInForce::Gtc)
            .unwrap_err();
        assert!(matches!(err, ExchangeError::InsufficientBalance { .. }));

        let balance = exchange.get_balance(user.id, &exchange.config.quote_asset.clone()).unwrap();
        assert_eq!(balance.available, dec!(5));
        assert_eq!(balance.locked, dec!(0));
    }

    #[test]
    fn resting_maker_partially_fills_against_taker() {
        let mut exchange = new_exchange();
        let maker = exchange.create_user("maker@example.com", "hash");
        let taker = exchange.create_user("taker@example.com", "hash");
        let asset = exchange.config.base_asset.clone();
        fund(&mut exchange, maker.id, &asset, dec!(10));
        let asset = exchange.config.quote_asset.clone();
        fund(&mut exchange, taker.id, &asset, dec!(100));

        exchange.place_limit_order(maker.id, Side::Sell, dec!(10), dec!(10), TimeInForce::Gtc).unwrap();
        let taker_order = exchange
            .place_limit_order(taker.id, Side::Buy, dec!(10), dec!(4), TimeInForce::Gtc)
            .unwrap();

        assert_eq!(taker_order.status, types::OrderStatus::Filled);
        let maker_orders = exchange.get_user_orders(maker.id);
        assert_eq!(maker_orders[0].status, types::OrderStatus::Partial);
        assert_eq!(maker_orders[0].remaining(), dec!(6));

        let taker_quote = exchange.get_balance(taker.id, &exchange.config.quote_asset.clone()).unwrap();
        assert_eq!(taker_quote.available, dec!(100) - dec!(10) * dec!(4) * dec!(1.001));
    }

    #[test]
    fn ioc_releases_unfilled_remainder() {
        let mut exchange = new_exchange();
        let maker = exchange.create_user("maker@example.com", "hash");
        let taker = exchange.create_user("taker@example.com", "hash");
        let asset = exchange.config.base_asset.clone();
        fund(&mut exchange, maker.id, &asset, dec!(1));
        let asset = exchange.config.quote_asset.clone();
        fund(&mut exchange, taker.id, &asset, dec!(100));

        exchange.place_limit_order(maker.id, Side::Sell, dec!(10), dec!(1), TimeInForce::Gtc).unwrap();
        let taker_order = exchange
            .place_limit_order(taker.id, Side::Buy, dec!(10), dec!(2), TimeInForce::Ioc)
            .unwrap();

        assert_eq!(taker_order.status, types::OrderStatus::Canceled);
        assert_eq!(taker_order.filled, dec!(1));

        let taker_quote = exchange.get_balance(taker.id, &exchange.config.quote_asset.clone()).unwrap();
        assert_eq!(taker_quote.locked, dec!(0));
        assert_eq!(taker_quote.available, dec!(100) - dec!(10) * dec!(1) * dec!(1.001));
    }

    #[test]
    fn fok_cancels_without_trades_when_unfillable() {
        let mut exchange = new_exchange();
        let maker = exchange.create_user("maker@example.com", "hash");
        let taker = exchange.create_user("taker@example.com", "hash");
        let asset = exchange.config.base_asset.clone();
        fund(&mut exchange, maker.id, &asset, dec!(1));
        let asset = exchange.config.quote_asset.clone();
        fund(&mut exchange, taker.id, &asset, dec!(100));

        exchange.place_limit_order(maker.id, Side::Sell, dec!(10), dec!(1), TimeInForce::Gtc).unwrap();
        let taker_order = exchange
            .place_limit_order(taker.id, Side::Buy, dec!(10), dec!(2), TimeInForce::Fok)
            .unwrap();

        assert_eq!(taker_order.status, types::OrderStatus::Canceled);
        assert_eq!(taker_order.filled, dec!(0));
        assert!(exchange.get_user_trades(taker.id).is_empty());

        let taker_quote = exchange.get_balance(taker.id, &exchange.config.quote_asset.clone()).unwrap();
        assert_eq!(taker_quote.locked, dec!(0));
    }

    #[test]
    fn price_time_priority_serves_earlier_order_first() {
        let mut exchange = new_exchange();
        let seller1 = exchange.create_user("s1@example.com", "hash");
        let seller2 = exchange.create_user("s2@example.com", "hash");
        let buyer = exchange.create_user("b@example.com", "hash");
        let asset = exchange.config.base_asset.clone();
        fund(&mut exchange, seller1.id, &asset, dec!(2));
        let asset = exchange.config.base_asset.clone();
        fund(&mut exchange, seller2.id, &asset, dec!(2));
        let asset = exchange.config.quote_asset.clone();
        fund(&mut exchange, buyer.id, &asset, dec!(100));

        exchange.place_limit_order(seller1.id, Side::Sell, dec!(10), dec!(2), TimeInForce::Gtc).unwrap();
        exchange.place_limit_order(seller2.id, Side::Sell, dec!(10), dec!(2), TimeInForce::Gtc).unwrap();
        exchange.place_limit_order(buyer.id, Side::Buy, dec!(10), dec!(3), TimeInForce::Gtc).unwrap();

        let seller1_order = &exchange.get_user_orders(seller1.id)[0];
        let seller2_order = &exchange.get_user_orders(seller2.id)[0];
        assert_eq!(seller1_order.status, types::OrderStatus::Filled);
        assert_eq!(seller2_order.status, types::OrderStatus::Partial);
        assert_eq!(seller2_order.remaining(), dec!(1));
    }

    #[test]
    fn stop_order_triggers_and_converts_to_limit() {
        let mut exchange = new_exchange();
        let stopper = exchange.create_user("stop@example.com", "hash");
        let maker = exchange.create_user("maker@example.com", "hash");
        let asset = exchange.config.quote_asset.clone();
        fund(&mut exchange, stopper.id, &asset, dec!(1000));
        let asset = exchange.config.base_asset.clone();
        fund(&mut exchange, maker.id, &asset, dec!(5));

        let stop_order = exchange
            .place_stop_order(stopper.id, Side::Buy, dec!(110), dec!(105), dec!(1), TimeInForce::Gtc)
            .unwrap();
        assert_eq!(stop_order.status, types::OrderStatus::Open);

        exchange.place_limit_order(maker.id, Side::Sell, dec!(110), dec!(1), TimeInForce::Gtc).unwrap();
        exchange.process_stop_orders(dec!(105)).unwrap();

        let triggered = exchange.get_user_orders(stopper.id).into_iter().find(|o| o.id == stop_order.id).unwrap();
        assert_eq!(triggered.order_type, types::OrderType::Limit);
    }

    #[test]
    fn oco_fill_cancels_sibling_leg() {
        let mut exchange = new_exchange();
        let trader = exchange.create_user("trader@example.com", "hash");
        let counterparty = exchange.create_user("cp@example.com", "hash");
        let asset = exchange.config.base_asset.clone();
        fund(&mut exchange, trader.id, &asset, dec!(1));
        let asset = exchange.config.quote_asset.clone();
        fund(&mut exchange, counterparty.id, &asset, dec!(1000));

        let (primary, stop_leg) = exchange
            .place_oco_order(trader.id, Side::Sell, dec!(12), dec!(8), dec!(1))
            .unwrap();
        assert_eq!(exchange.engine.oco_pairs_count(), 1);

        exchange.place_limit_order(counterparty.id, Side::Buy, dec!(12), dec!(1), TimeInForce::Gtc).unwrap();

        let filled_primary = exchange.get_user_orders(trader.id).into_iter().find(|o| o.id == primary.id).unwrap();
        let cancelled_sibling = exchange.get_user_orders(trader.id).into_iter().find(|o| o.id == stop_leg.id).unwrap();
        assert_eq!(filled_primary.status, types::OrderStatus::Filled);
        assert_eq!(cancelled_sibling.status, types::OrderStatus::Canceled);
        assert_eq!(exchange.engine.oco_pairs_count(), 0);
    }

    #[test]
    fn conservation_holds_after_a_trade() {
        let mut exchange = new_exchange();
        let maker = exchange.create_user("maker@example.com", "hash");
        let taker = exchange.create_user("taker@example.com", "hash");
        let asset = exchange.config.base_asset.clone();
        fund(&mut exchange, maker.id, &asset, dec!(10));
        let asset = exchange.config.quote_asset.clone();
        fund(&mut exchange, taker.id, &asset, dec!(1000));

        exchange.place_limit_order(maker.id, Side::Sell, dec!(10), dec!(5), TimeInForce::Gtc).unwrap();
        exchange.place_limit_order(taker.id, Side::Buy, dec!(10), dec!(5), TimeInForce::Gtc).unwrap();

        let maker_account = exchange.repo.account_for_user(maker.id).unwrap();
        let taker_account = exchange.repo.account_for_user(taker.id).unwrap();

        let base_total = ledger::Ledger::total_balance(&exchange.repo, &[maker_account, taker_account], &exchange.config.base_asset);
        assert_eq!(base_total, dec!(10));

        let quote_total = ledger::Ledger::total_balance(&exchange.repo, &[maker_account, taker_account], &exchange.config.quote_asset);
        // 1000 deposited, minus the buyer fee paid out that never returns to either balance.
        assert_eq!(quote_total, dec!(1000) - dec!(10) * dec!(5) * dec!(0.001) * dec!(2));
    }

    #[test]
    fn cancel_is_not_idempotent_on_terminal_orders() {
        let mut exchange = new_exchange();
        let user = exchange.create_user("u@example.com", "hash");
        let asset = exchange.config.quote_asset.clone();
        fund(&mut exchange, user.id, &asset, dec!(100));

        let order = exchange.place_limit_order(user.id, Side::Buy, dec!(10), dec!(1), TimeInForce::Gtc).unwrap();
        assert!(exchange.cancel_order(user.id, order.id).unwrap());
        assert!(!exchange.cancel_order(user.id, order.id).unwrap());
    }

    #[test]
    fn admin_withdrawal_requires_two_distinct_approvals() {
        let mut exchange = new_exchange();
        let user = exchange.create_user("w@example.com", "hash");
        let asset = exchange.config.quote_asset.clone();
        fund(&mut exchange, user.id, &asset, dec!(100));

        let tx = exchange
            .request_withdrawal(user.id, exchange.config.quote_asset.clone(), dec!(40), "0xaddr")
            .unwrap();

        let after_first = exchange.approve_withdrawal(1, tx.id).unwrap();
        assert_eq!(after_first.status, types::TransactionStatus::Pending);

        let err = exchange.approve_withdrawal(1, tx.id).unwrap_err();
        assert!(matches!(err, ExchangeError::WithdrawalApproval(_)));

        let after_second = exchange.approve_withdrawal(2, tx.id).unwrap();
        assert_eq!(after_second.status, types::TransactionStatus::Confirmed);
        assert!(after_second.tx_hash.is_some());
    }

    #[test]
    fn non_admin_cannot_freeze_accounts() {
        let mut exchange = new_exchange();
        let user = exchange.create_user("u@example.com", "hash");
        let account_id = exchange.repo.account_for_user(user.id).unwrap();
        let err = exchange.freeze_account(500, account_id, "test").unwrap_err();
        assert!(matches!(err, ExchangeError::AdminPermission(500)));
    }

    #[test]
    fn frozen_account_cannot_place_orders() {
        let mut exchange = new_exchange();
        let user = exchange.create_user("u@example.com", "hash");
        let asset = exchange.config.quote_asset.clone();
        fund(&mut exchange, user.id, &asset, dec!(100));
        let account_id = exchange.repo.account_for_user(user.id).unwrap();
        exchange.freeze_account(1, account_id, "investigation").unwrap();

        let err = exchange
            .place_limit_order(user.id, Side::Buy, dec!(10), dec!(1), TimeInForce::Gtc)
            .unwrap_err();
        assert!(matches!(err, ExchangeError::AccountFrozen(_)));
    }

    #[test]
    fn deposit_address_is_deterministic() {
        let asset = types::Asset::new("QUOTE");
        let first = account::allocate_deposit_address(42, &asset);
        let second = account::allocate_deposit_address(42, &asset);
        assert_eq!(first, second);
        assert_ne!(first, account::allocate_deposit_address(43, &asset));
    }
}
