use crate::repository::Repository;
use crate::types::{OrderId, Side};
use rust_decimal::Decimal;
use std::collections::{BTreeMap, HashMap, VecDeque};

/// Two price-ordered sides, each a FIFO queue of resting order ids per
/// price level. The book only orders ids; the authoritative order record
/// (amount, filled, status) lives in the repository, so the book stays
/// cheap to snapshot and clone for rollback.
#[derive(Debug, Clone, Default)]
pub struct OrderBook {
    bids: BTreeMap<Decimal, VecDeque<OrderId>>,
    asks: BTreeMap<Decimal, VecDeque<OrderId>>,
    resting_at: HashMap<OrderId, (Side, Decimal)>,
}

impl OrderBook {
    pub fn new() -> Self {
        Self::default()
    }

    fn levels_mut(&mut self, side: Side) -> &mut BTreeMap<Decimal, VecDeque<OrderId>> {
        match side {
            Side::Buy => &mut self.bids,
            Side::Sell => &mut self.asks,
        }
    }

    pub fn add(&mut self, side: Side, price: Decimal, order_id: OrderId) {
        self.levels_mut(side).entry(price).or_default().push_back(order_id);
        self.resting_at.insert(order_id, (side, price));
    }

    /// Best price on `side`: highest for bids, lowest for asks.
    pub fn best_price(&self, side: Side) -> Option<Decimal> {
        match side {
            Side::Buy => self.bids.keys().next_back().copied(),
            Side::Sell => self.asks.keys().next().copied(),
        }
    }

    pub fn peek_best(&self, side: Side) -> Option<OrderId> {
        let level = match side {
            Side::Buy => self.bids.values().next_back(),
            Side::Sell => self.asks.values().next(),
        };
        level.and_then(|queue| queue.front().copied())
    }

    /// Removes and returns the order at the head of the best level, pruning
    /// the level if it is left empty.
    pub fn pop_best(&mut self, side: Side) -> Option<OrderId> {
        let price = self.best_price(side)?;
        let levels = self.levels_mut(side);
        let level = levels.get_mut(&price)?;
        let order_id = level.pop_front()?;
        if level.is_empty() {
            levels.remove(&price);
        }
        self.resting_at.remove(&order_id);
        Some(order_id)
    }

    pub fn remove(&mut self, order_id: OrderId) -> bool {
        let Some((side, price)) = self.resting_at.remove(&order_id) else {
            return false;
        };
        let levels = self.levels_mut(side);
        if let Some(queue) = levels.get_mut(&price) {
            queue.retain(|id| *id != order_id);
            if queue.is_empty() {
                levels.remove(&price);
            }
        }
        true
    }

    pub fn contains(&self, order_id: OrderId) -> bool {
        self.resting_at.contains_key(&order_id)
    }

    /// (price, aggregated remaining amount) from best to worst, looking up
    /// each order's live remaining quantity in the repository.
    pub fn snapshot<R: Repository>(&self, repo: &R, side: Side) -> Vec<(Decimal, Decimal)> {
        let iter: Box<dyn Iterator<Item = (&Decimal, &VecDeque<OrderId>)>> = match side {
            Side::Buy => Box::new(self.bids.iter().rev()),
            Side::Sell => Box::new(self.asks.iter()),
        };
        iter.map(|(price, queue)| {
            let total: Decimal = queue
                .iter()
                .filter_map(|id| repo.get_order(*id))
                .map(|order| order.remaining())
                .sum();
            (*price, total)
        })
        .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bids_best_price_is_highest() {
        let mut book = OrderBook::new();
        book.add(Side::Buy, Decimal::new(10, 0), 1);
        book.add(Side::Buy, Decimal::new(12, 0), 2);
        book.add(Side::Buy, Decimal::new(11, 0), 3);
        assert_eq!(book.best_price(Side::Buy), Some(Decimal::new(12, 0)));
        assert_eq!(book.peek_best(Side::Buy), Some(2));
    }

    #[test]
    fn asks_best_price_is_lowest() {
        let mut book = OrderBook::new();
        book.add(Side::Sell, Decimal::new(10, 0), 1);
        book.add(Side::Sell, Decimal::new(8, 0), 2);
        assert_eq!(book.best_price(Side::Sell), Some(Decimal::new(8, 0)));
    }

    #[test]
    fn fifo_within_a_price_level() {
        let mut book = OrderBook::new();
        book.add(Side::Buy, Decimal::new(10, 0), 1);
        book.add(Side::Buy, Decimal::new(10, 0), 2);
        assert_eq!(book.pop_best(Side::Buy), Some(1));
        assert_eq!(book.pop_best(Side::Buy), Some(2));
        assert_eq!(book.pop_best(Side::Buy), None);
    }

    #[test]
    fn remove_prunes_empty_level() {
        let mut book = OrderBook::new();
        book.add(Side::Sell, Decimal::new(5, 0), 1);
        assert!(book.remove(1));
        assert_eq!(book.best_price(Side::Sell), None);
        assert!(!book.remove(1));
    }
}
