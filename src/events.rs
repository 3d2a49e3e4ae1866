use crate::types::{AccountId, Asset, OrderId, OrderStatus, Side, TradeId, TransactionId};
use rust_decimal::Decimal;

/// Everything the core publishes. Downstream consumers (persistence, push
/// transport, market-data projection) read only this stream; they never see
/// uncommitted state.
#[derive(Debug, Clone)]
pub enum Event {
    OrderAccepted {
        order_id: OrderId,
        market: String,
        side: Side,
        remaining: Decimal,
    },
    OrderStatusChanged {
        order_id: OrderId,
        status: OrderStatus,
        filled: Decimal,
        remaining: Decimal,
        reason: Option<String>,
    },
    TradeExecuted {
        trade_id: TradeId,
        market: String,
        price: Decimal,
        amount: Decimal,
        maker_order_id: OrderId,
        taker_order_id: OrderId,
        taker_side: Side,
    },
    BalanceChanged {
        account_id: AccountId,
        asset: Asset,
        available: Decimal,
        locked: Decimal,
        reason: String,
    },
    StopOrderActivated {
        order_id: OrderId,
        trigger_price: Decimal,
    },
    OcoOrderCancelled {
        cancelled_order_id: OrderId,
        filled_sibling_id: OrderId,
    },
    WithdrawalRequested {
        transaction_id: TransactionId,
        account_id: AccountId,
        asset: Asset,
        amount: Decimal,
    },
    WithdrawalApproved {
        transaction_id: TransactionId,
        tx_hash: String,
    },
    WithdrawalRejected {
        transaction_id: TransactionId,
        reason: String,
    },
    AccountFrozen {
        account_id: AccountId,
        reason: String,
    },
    AccountUnfrozen {
        account_id: AccountId,
    },
}
