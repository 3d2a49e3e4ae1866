use crate::error::{ExchangeError, ExchangeResult};
use crate::events::Event;
use crate::ledger::Ledger;
use crate::models::{Order, Trade};
use crate::orderbook::OrderBook;
use crate::repository::Repository;
use crate::types::{Asset, OrderId, OrderStatus, OrderType, Side, TimeInForce};
use chrono::Utc;
use rust_decimal::Decimal;
use std::collections::HashMap;

fn reservation_asset_for(side: Side, base: &Asset, quote: &Asset) -> Asset {
    match side {
        Side::Buy => quote.clone(),
        Side::Sell => base.clone(),
    }
}

/// A BUY's reservation is sized in quote terms (`price * amount * (1 + fee)`);
/// a SELL's is sized in base terms (just `amount`). Releasing a cancellation
/// has to convert the leftover base quantity back through the same formula,
/// not hand back the raw base amount for a BUY leg.
fn release_amount(order: &Order, remaining: Decimal, fee_rate: Decimal) -> Decimal {
    match order.side {
        Side::Buy => {
            let price = order.price.unwrap_or(Decimal::ZERO);
            remaining * price * (Decimal::ONE + fee_rate)
        }
        Side::Sell => remaining,
    }
}

/// Matches incoming orders against one market's book, manages armed STOP
/// orders and OCO linkage. Every public method is one indivisible step,
/// meant to be called from inside a settlement unit of work so a mid-match
/// failure rolls the whole submission back.
#[derive(Debug, Clone, Default)]
pub struct MatchingEngine {
    pub market: String,
    book: OrderBook,
    armed_stops: Vec<OrderId>,
    oco_links: HashMap<OrderId, OrderId>,
}

impl MatchingEngine {
    pub fn new(market: impl Into<String>) -> Self {
        Self {
            market: market.into(),
            book: OrderBook::new(),
            armed_stops: Vec::new(),
            oco_links: HashMap::new(),
        }
    }

    pub fn order_book(&self) -> &OrderBook {
        &self.book
    }

    pub fn oco_pairs_count(&self) -> usize {
        self.oco_links.len() / 2
    }

    pub fn validate(order: &Order) -> ExchangeResult<()> {
        if order.amount <= Decimal::ZERO {
            return Err(ExchangeError::InvalidOrder("amount must be positive".into()));
        }
        match order.order_type {
            OrderType::Limit => {
                if order.price.map_or(true, |p| p <= Decimal::ZERO) {
                    return Err(ExchangeError::InvalidOrder("limit order requires a positive price".into()));
                }
            }
            OrderType::Stop => {
                if order.stop_price.map_or(true, |p| p <= Decimal::ZERO) {
                    return Err(ExchangeError::InvalidOrder("stop order requires a positive stop_price".into()));
                }
                if order.price.map_or(true, |p| p <= Decimal::ZERO) {
                    return Err(ExchangeError::InvalidOrder("stop order requires a positive working price".into()));
                }
            }
            OrderType::Oco => {
                if order.link_order_id.is_none() {
                    return Err(ExchangeError::OrderLinkError("oco order missing link_order_id".into()));
                }
                if order.price.map_or(true, |p| p <= Decimal::ZERO) {
                    return Err(ExchangeError::InvalidOrder("oco leg requires a positive price".into()));
                }
            }
        }
        Ok(())
    }

    /// Arms a STOP order (or the stop leg of an OCO pair) off-book; it
    /// becomes visible to matching only once `process_stop_orders` triggers
    /// it.
    pub fn arm_stop<R: Repository>(&mut self, repo: &R, order_id: OrderId, events: &mut Vec<Event>) {
        self.armed_stops.push(order_id);
        if let Some(order) = repo.get_order(order_id) {
            events.push(Event::OrderAccepted {
                order_id,
                market: self.market.clone(),
                side: order.side,
                remaining: order.remaining(),
            });
        }
    }

    pub fn link_oco(&mut self, a: OrderId, b: OrderId) {
        self.oco_links.insert(a, b);
        self.oco_links.insert(b, a);
    }

    fn unlink_oco(&mut self, order_id: OrderId) -> Option<OrderId> {
        let sibling = self.oco_links.remove(&order_id)?;
        self.oco_links.remove(&sibling);
        Some(sibling)
    }

    /// Submits a validated, already-reserved, already-inserted LIMIT order.
    /// Returns the trades produced.
    pub fn submit<R: Repository>(
        &mut self,
        repo: &mut R,
        order_id: OrderId,
        base: &Asset,
        quote: &Asset,
        fee_rate: Decimal,
        events: &mut Vec<Event>,
    ) -> ExchangeResult<Vec<Trade>> {
        self.submit_inner(repo, order_id, base, quote, fee_rate, true, events)
    }

    /// Shared by `submit` (genuinely new external submissions, which get an
    /// `OrderAccepted`) and a triggered STOP's resubmission (already
    /// announced via `StopOrderActivated`, so it skips a second accept).
    #[allow(clippy::too_many_arguments)]
    fn submit_inner<R: Repository>(
        &mut self,
        repo: &mut R,
        order_id: OrderId,
        base: &Asset,
        quote: &Asset,
        fee_rate: Decimal,
        emit_accepted: bool,
        events: &mut Vec<Event>,
    ) -> ExchangeResult<Vec<Trade>> {
        let taker = repo.get_order(order_id).cloned().ok_or_else(|| ExchangeError::order_not_found(order_id))?;

        if emit_accepted {
            events.push(Event::OrderAccepted {
                order_id,
                market: self.market.clone(),
                side: taker.side,
                remaining: taker.remaining(),
            });
        }

        if taker.time_in_force == TimeInForce::Fok && !self.can_fully_fill(repo, &taker) {
            let asset = reservation_asset_for(taker.side, base, quote);
            self.cancel_remainder(repo, order_id, "fok unfillable", &asset, fee_rate, events)?;
            return Ok(Vec::new());
        }

        let trades = self.match_order(repo, order_id, base, quote, fee_rate, events)?;

        let remaining = repo.get_order(order_id).map(|o| o.remaining()).unwrap_or(Decimal::ZERO);
        if remaining > Decimal::ZERO {
            match taker.time_in_force {
                TimeInForce::Gtc => {
                    self.book.add(taker.side, taker.price.expect("limit price"), order_id);
                }
                TimeInForce::Ioc | TimeInForce::Fok => {
                    let asset = reservation_asset_for(taker.side, base, quote);
                    self.cancel_remainder(repo, order_id, "ioc", &asset, fee_rate, events)?;
                }
            }
        }

        Ok(trades)
    }

    fn can_fully_fill<R: Repository>(&self, repo: &R, taker: &Order) -> bool {
        let opp_side = taker.side.opposite();
        let mut acc = Decimal::ZERO;
        let levels = self.book.snapshot(repo, opp_side);
        for (price, amount) in levels {
            let compatible = match taker.side {
                Side::Buy => taker.price.map_or(true, |p| price <= p),
                Side::Sell => taker.price.map_or(true, |p| price >= p),
            };
            if !compatible {
                break;
            }
            acc += amount;
            if acc >= taker.amount {
                return true;
            }
        }
        acc >= taker.amount
    }

    #[allow(clippy::too_many_arguments)]
    fn match_order<R: Repository>(
        &mut self,
        repo: &mut R,
        taker_id: OrderId,
        base: &Asset,
        quote: &Asset,
        fee_rate: Decimal,
        events: &mut Vec<Event>,
    ) -> ExchangeResult<Vec<Trade>> {
        let mut trades = Vec::new();

        loop {
            let taker = repo.get_order(taker_id).cloned().ok_or_else(|| ExchangeError::order_not_found(taker_id))?;
            if taker.remaining() <= Decimal::ZERO {
                break;
            }
            let opp_side = taker.side.opposite();
            let Some(maker_id) = self.book.peek_best(opp_side) else {
                break;
            };
            let maker = repo.get_order(maker_id).cloned().ok_or_else(|| ExchangeError::order_not_found(maker_id))?;
            let maker_price = maker.price.ok_or_else(|| ExchangeError::SettlementError("resting order missing price".into()))?;

            let compatible = match taker.side {
                Side::Buy => taker.price.map_or(true, |p| maker_price <= p),
                Side::Sell => taker.price.map_or(true, |p| maker_price >= p),
            };
            if !compatible {
                break;
            }

            let trade_amount = taker.remaining().min(maker.remaining());

            let (buy_order_id, sell_order_id, buyer_account, seller_account) = match taker.side {
                Side::Buy => (taker.id, maker.id, taker.account_id, maker.account_id),
                Side::Sell => (maker.id, taker.id, maker.account_id, taker.account_id),
            };

            Ledger::settle_trade(repo, buyer_account, seller_account, base, quote, maker_price, trade_amount, fee_rate, events)?;

            let trade_id = repo.next_id("trade");
            let trade = Trade {
                id: trade_id,
                market: self.market.clone(),
                buy_order_id,
                sell_order_id,
                maker_order_id: maker.id,
                taker_order_id: taker.id,
                taker_side: taker.side,
                price: maker_price,
                amount: trade_amount,
                fee: maker_price * trade_amount * fee_rate,
                created_at: Utc::now(),
            };
            repo.insert_trade(trade.clone());

            events.push(Event::TradeExecuted {
                trade_id,
                market: self.market.clone(),
                price: maker_price,
                amount: trade_amount,
                maker_order_id: maker.id,
                taker_order_id: taker.id,
                taker_side: taker.side,
            });

            self.apply_fill(repo, maker.id, trade_amount, events)?;
            self.apply_fill(repo, taker.id, trade_amount, events)?;

            if repo.get_order(maker.id).map(|o| o.remaining()).unwrap_or(Decimal::ZERO) <= Decimal::ZERO {
                self.book.remove(maker.id);
            }

            if let Some(sibling) = self.unlink_oco(maker.id) {
                let asset = reservation_asset_for(maker.side, base, quote);
                self.cancel_oco_sibling(repo, sibling, maker.id, &asset, fee_rate, events)?;
            }
            if let Some(sibling) = self.unlink_oco(taker.id) {
                let asset = reservation_asset_for(taker.side, base, quote);
                self.cancel_oco_sibling(repo, sibling, taker.id, &asset, fee_rate, events)?;
            }

            trades.push(trade);
        }

        Ok(trades)
    }

    fn apply_fill<R: Repository>(
        &self,
        repo: &mut R,
        order_id: OrderId,
        amount: Decimal,
        events: &mut Vec<Event>,
    ) -> ExchangeResult<()> {
        let order = repo.get_order_mut(order_id).ok_or_else(|| ExchangeError::order_not_found(order_id))?;
        order.filled += amount;
        order.status = if order.remaining() <= Decimal::ZERO {
            OrderStatus::Filled
        } else {
            OrderStatus::Partial
        };
        order.updated_at = Utc::now();
        events.push(Event::OrderStatusChanged {
            order_id,
            status: order.status,
            filled: order.filled,
            remaining: order.remaining(),
            reason: None,
        });
        Ok(())
    }

    fn cancel_oco_sibling<R: Repository>(
        &mut self,
        repo: &mut R,
        sibling_id: OrderId,
        filled_leg: OrderId,
        reservation_asset: &Asset,
        fee_rate: Decimal,
        events: &mut Vec<Event>,
    ) -> ExchangeResult<()> {
        self.book.remove(sibling_id);
        self.armed_stops.retain(|id| *id != sibling_id);
        let Some(order) = repo.get_order(sibling_id).cloned() else {
            return Ok(());
        };
        if order.status.is_terminal() {
            return Ok(());
        }
        let remaining = order.remaining();
        {
            let record = repo.get_order_mut(sibling_id).unwrap();
            record.status = OrderStatus::Canceled;
            record.updated_at = Utc::now();
        }
        events.push(Event::OrderStatusChanged {
            order_id: sibling_id,
            status: OrderStatus::Canceled,
            filled: order.filled,
            remaining,
            reason: Some("oco_sibling_filled".into()),
        });
        events.push(Event::OcoOrderCancelled {
            cancelled_order_id: sibling_id,
            filled_sibling_id: filled_leg,
        });
        if remaining > Decimal::ZERO {
            // Both legs were carved out of one shared reservation, and the
            // fill that just happened already consumed part (or all) of it
            // via `Ledger::settle_trade`. Release only what is still
            // actually locked, never the sibling's own full share, or a
            // full fill on one leg would make this release fail outright.
            let requested = release_amount(&order, remaining, fee_rate);
            let locked = repo.get_locked(order.account_id, reservation_asset);
            let release = requested.min(locked);
            if release > Decimal::ZERO {
                Ledger::release(repo, order.account_id, reservation_asset, release, events)?;
            }
        }
        Ok(())
    }

    /// Explicit cancellation requested by a user. Returns false if the
    /// order does not exist or is already terminal.
    pub fn cancel<R: Repository>(
        &mut self,
        repo: &mut R,
        order_id: OrderId,
        reservation_asset: &Asset,
        fee_rate: Decimal,
        events: &mut Vec<Event>,
    ) -> ExchangeResult<bool> {
        let Some(order) = repo.get_order(order_id).cloned() else {
            return Ok(false);
        };
        if order.status.is_terminal() {
            return Ok(false);
        }

        self.book.remove(order_id);
        self.armed_stops.retain(|id| *id != order_id);

        let remaining = order.remaining();
        {
            let record = repo.get_order_mut(order_id).unwrap();
            record.status = OrderStatus::Canceled;
            record.updated_at = Utc::now();
        }
        events.push(Event::OrderStatusChanged {
            order_id,
            status: OrderStatus::Canceled,
            filled: order.filled,
            remaining,
            reason: Some("cancelled".into()),
        });
        if remaining > Decimal::ZERO {
            let release = release_amount(&order, remaining, fee_rate);
            Ledger::release(repo, order.account_id, reservation_asset, release, events)?;
        }

        if let Some(sibling) = self.unlink_oco(order_id) {
            self.cancel_oco_sibling(repo, sibling, order_id, reservation_asset, fee_rate, events)?;
        }

        Ok(true)
    }

    /// Cancels whatever is left of an IOC/FOK order after the matching pass
    /// (or, for an unfillable FOK, before it ran at all) and releases the
    /// corresponding reservation. The caller still sees the fills that did
    /// happen via the order's `filled` field; only the status is terminal.
    fn cancel_remainder<R: Repository>(
        &mut self,
        repo: &mut R,
        order_id: OrderId,
        reason: &str,
        reservation_asset: &Asset,
        fee_rate: Decimal,
        events: &mut Vec<Event>,
    ) -> ExchangeResult<()> {
        let order = repo.get_order(order_id).cloned().ok_or_else(|| ExchangeError::order_not_found(order_id))?;
        let remaining = order.remaining();
        {
            let record = repo.get_order_mut(order_id).unwrap();
            record.status = OrderStatus::Canceled;
            record.updated_at = Utc::now();
        }
        events.push(Event::OrderStatusChanged {
            order_id,
            status: OrderStatus::Canceled,
            filled: order.filled,
            remaining,
            reason: Some(reason.to_string()),
        });
        if remaining > Decimal::ZERO {
            let release = release_amount(&order, remaining, fee_rate);
            Ledger::release(repo, order.account_id, reservation_asset, release, events)?;
        }
        Ok(())
    }

    /// Triggers any armed STOP whose condition is met by `last_trade_price`,
    /// activating them in ascending id order for determinism, and resubmits
    /// each as a LIMIT order in this same step.
    #[allow(clippy::too_many_arguments)]
    pub fn process_stop_orders<R: Repository>(
        &mut self,
        repo: &mut R,
        last_trade_price: Decimal,
        base: &Asset,
        quote: &Asset,
        fee_rate: Decimal,
        events: &mut Vec<Event>,
    ) -> ExchangeResult<Vec<Trade>> {
        let mut armed: Vec<OrderId> = self.armed_stops.clone();
        armed.sort_unstable();

        let mut triggered = Vec::new();
        for order_id in armed {
            let Some(order) = repo.get_order(order_id) else { continue };
            let stop_price = match order.stop_price {
                Some(p) => p,
                None => continue,
            };
            let hits = match order.side {
                Side::Buy => last_trade_price >= stop_price,
                Side::Sell => last_trade_price <= stop_price,
            };
            if hits {
                triggered.push(order_id);
            }
        }

        let mut all_trades = Vec::new();
        for order_id in triggered {
            self.armed_stops.retain(|id| *id != order_id);
            if let Some(record) = repo.get_order_mut(order_id) {
                record.order_type = OrderType::Limit;
            }
            events.push(Event::StopOrderActivated { order_id, trigger_price: last_trade_price });
            let trades = self.submit_inner(repo, order_id, base, quote, fee_rate, false, events)?;
            all_trades.extend(trades);
        }
        Ok(all_trades)
    }
}
