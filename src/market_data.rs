use crate::events::Event;
use crate::repository::Repository;
use crate::types::{OrderId, OrderStatus, Side};
use rust_decimal::Decimal;
use std::collections::VecDeque;
use std::sync::Mutex;

#[derive(Debug, Clone)]
pub struct OrderUpdate {
    pub order_id: OrderId,
    pub status: OrderStatus,
    pub filled: Decimal,
    pub remaining: Decimal,
}

/// Bounded recent-trades/recent-order-updates views built from the event
/// stream, plus a pass-through order-book snapshot. A `Mutex` guards the
/// queues because subscriber callbacks on the event bus run with only a
/// shared reference to whatever owns the projection.
pub struct MarketDataProjection {
    capacity: usize,
    recent_trades: Mutex<VecDeque<TradeSummary>>,
    recent_order_updates: Mutex<VecDeque<OrderUpdate>>,
}

#[derive(Debug, Clone)]
pub struct TradeSummary {
    pub price: Decimal,
    pub amount: Decimal,
    pub taker_side: Side,
}

impl MarketDataProjection {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            recent_trades: Mutex::new(VecDeque::with_capacity(capacity)),
            recent_order_updates: Mutex::new(VecDeque::with_capacity(capacity)),
        }
    }

    pub fn on_event(&self, event: &Event) {
        match event {
            Event::TradeExecuted { price, amount, taker_side, .. } => {
                let mut queue = self.recent_trades.lock().unwrap();
                if queue.len() == self.capacity {
                    queue.pop_front();
                }
                queue.push_back(TradeSummary { price: *price, amount: *amount, taker_side: *taker_side });
            }
            Event::OrderStatusChanged { order_id, status, filled, remaining, .. } => {
                let mut queue = self.recent_order_updates.lock().unwrap();
                if queue.len() == self.capacity {
                    queue.pop_front();
                }
                queue.push_back(OrderUpdate {
                    order_id: *order_id,
                    status: *status,
                    filled: *filled,
                    remaining: *remaining,
                });
            }
            _ => {}
        }
    }

    pub fn recent_trades(&self) -> Vec<TradeSummary> {
        self.recent_trades.lock().unwrap().iter().cloned().collect()
    }

    pub fn recent_order_updates(&self) -> Vec<OrderUpdate> {
        self.recent_order_updates.lock().unwrap().iter().cloned().collect()
    }

    pub fn order_book_snapshot<R: Repository>(
        &self,
        repo: &R,
        book: &crate::orderbook::OrderBook,
    ) -> (Vec<(Decimal, Decimal)>, Vec<(Decimal, Decimal)>) {
        (book.snapshot(repo, Side::Buy), book.snapshot(repo, Side::Sell))
    }
}
