use crate::types::{AccountId, OrderId, TransactionId};
use rust_decimal::Decimal;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ExchangeError {
    #[error("invalid order: {0}")]
    InvalidOrder(String),

    #[error("insufficient balance: account {account_id} needs {required} but has {available}")]
    InsufficientBalance {
        account_id: AccountId,
        required: Decimal,
        available: Decimal,
    },

    #[error("entity not found: {0}")]
    EntityNotFound(String),

    #[error("order link error: {0}")]
    OrderLinkError(String),

    #[error("admin permission denied for caller {0}")]
    AdminPermission(u64),

    #[error("withdrawal approval error: {0}")]
    WithdrawalApproval(String),

    #[error("settlement invariant violated: {0}")]
    SettlementError(String),

    #[error("account {0} is frozen")]
    AccountFrozen(AccountId),
}

impl ExchangeError {
    pub fn order_not_found(id: OrderId) -> Self {
        ExchangeError::EntityNotFound(format!("order {id}"))
    }

    pub fn transaction_not_found(id: TransactionId) -> Self {
        ExchangeError::EntityNotFound(format!("transaction {id}"))
    }
}

pub type ExchangeResult<T> = Result<T, ExchangeError>;
