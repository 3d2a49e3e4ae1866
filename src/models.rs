use crate::types::{
    AccountId, AccountStatus, Asset, AuditLogId, EntryType, OrderId, OrderStatus, OrderType, Side,
    TimeInForce, TradeId, TransactionId, TransactionStatus, TransactionType, UserId,
};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub email: String,
    pub password_hash: String,
    pub created_at: DateTime<Utc>,
    pub last_login: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Account {
    pub id: AccountId,
    pub user_id: UserId,
    pub status: AccountStatus,
    pub frozen: bool,
}

impl Account {
    pub fn new(id: AccountId, user_id: UserId) -> Self {
        Self {
            id,
            user_id,
            status: AccountStatus::Active,
            frozen: false,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct Balance {
    pub available: Decimal,
    pub locked: Decimal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    pub id: OrderId,
    pub user_id: UserId,
    pub account_id: AccountId,
    pub market: String,
    pub side: Side,
    pub order_type: OrderType,
    pub time_in_force: TimeInForce,
    pub price: Option<Decimal>,
    pub amount: Decimal,
    pub filled: Decimal,
    pub status: OrderStatus,
    pub stop_price: Option<Decimal>,
    pub link_order_id: Option<OrderId>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Order {
    pub fn remaining(&self) -> Decimal {
        self.amount - self.filled
    }

    pub fn is_resting(&self) -> bool {
        matches!(self.status, OrderStatus::Open | OrderStatus::Partial)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Trade {
    pub id: TradeId,
    pub market: String,
    pub buy_order_id: OrderId,
    pub sell_order_id: OrderId,
    pub maker_order_id: OrderId,
    pub taker_order_id: OrderId,
    pub taker_side: Side,
    pub price: Decimal,
    pub amount: Decimal,
    pub fee: Decimal,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transaction {
    pub id: TransactionId,
    pub user_id: UserId,
    pub account_id: AccountId,
    pub asset: Asset,
    pub tx_type: TransactionType,
    pub status: TransactionStatus,
    pub amount: Decimal,
    pub address: Option<String>,
    pub tx_hash: Option<String>,
    pub approvers: Vec<UserId>,
    pub approved_at: Option<DateTime<Utc>>,
    pub rejected_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditLog {
    pub id: AuditLogId,
    pub actor: UserId,
    pub action: String,
    pub entity: String,
    pub metadata: BTreeMap<String, String>,
    pub created_at: DateTime<Utc>,
}

/// An append-only double-entry journal line backing a single (account, asset)
/// balance, kept so a balance can always be rederived and reconciled against
/// the cached `Balance` row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub account_id: AccountId,
    pub asset: Asset,
    pub entry_type: EntryType,
    pub amount: Decimal,
    pub created_at: DateTime<Utc>,
}
