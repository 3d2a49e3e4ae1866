use crate::models::{Account, AuditLog, LedgerEntry, Order, Trade, Transaction, User};
use crate::types::{AccountId, Asset, OrderId, TradeId, TransactionId, UserId};
use rust_decimal::Decimal;
use std::collections::HashMap;

/// Storage boundary the core mutates through. Only [`InMemoryRepository`] is
/// realized here; a deployment that needs durability swaps in a
/// database-backed implementation of this trait without touching the
/// ledger or matching engine.
pub trait Repository {
    fn next_id(&mut self, table: &str) -> u64;

    fn insert_user(&mut self, user: User);
    fn get_user(&self, id: UserId) -> Option<&User>;
    fn get_user_mut(&mut self, id: UserId) -> Option<&mut User>;
    fn find_user_by_email(&self, email: &str) -> Option<&User>;

    fn insert_account(&mut self, account: Account);
    fn get_account(&self, id: AccountId) -> Option<&Account>;
    fn get_account_mut(&mut self, id: AccountId) -> Option<&mut Account>;
    fn account_for_user(&self, user_id: UserId) -> Option<AccountId>;

    fn get_balance(&self, account_id: AccountId, asset: &Asset) -> Decimal;
    fn get_locked(&self, account_id: AccountId, asset: &Asset) -> Decimal;
    fn set_balance(&mut self, account_id: AccountId, asset: Asset, available: Decimal, locked: Decimal);
    fn append_ledger_entry(&mut self, entry: LedgerEntry);
    fn ledger_entries(&self, account_id: AccountId, asset: &Asset) -> Vec<&LedgerEntry>;

    fn insert_order(&mut self, order: Order);
    fn get_order(&self, id: OrderId) -> Option<&Order>;
    fn get_order_mut(&mut self, id: OrderId) -> Option<&mut Order>;
    fn orders_for_user(&self, user_id: UserId) -> Vec<Order>;

    fn insert_trade(&mut self, trade: Trade);
    fn trades_for_user(&self, user_id: UserId) -> Vec<Trade>;
    fn recent_trades(&self, limit: usize) -> Vec<Trade>;

    fn insert_transaction(&mut self, tx: Transaction);
    fn get_transaction(&self, id: TransactionId) -> Option<&Transaction>;
    fn get_transaction_mut(&mut self, id: TransactionId) -> Option<&mut Transaction>;
    fn pending_withdrawals(&self) -> Vec<Transaction>;
    fn transactions_for_account(&self, account_id: AccountId, limit: usize) -> Vec<Transaction>;

    fn insert_audit_log(&mut self, log: AuditLog);
    fn recent_audit_logs(&self, limit: usize) -> Vec<AuditLog>;
}

#[derive(Debug, Clone, Default)]
pub struct InMemoryRepository {
    next_ids: HashMap<String, u64>,
    users: HashMap<UserId, User>,
    users_by_email: HashMap<String, UserId>,
    accounts: HashMap<AccountId, Account>,
    account_by_user: HashMap<UserId, AccountId>,
    balances: HashMap<(AccountId, Asset), (Decimal, Decimal)>,
    ledger_entries: Vec<LedgerEntry>,
    orders: HashMap<OrderId, Order>,
    orders_by_user: HashMap<UserId, Vec<OrderId>>,
    trades: Vec<Trade>,
    trades_by_user: HashMap<UserId, Vec<TradeId>>,
    transactions: HashMap<TransactionId, Transaction>,
    audit_logs: Vec<AuditLog>,
}

impl InMemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cheap clone used by the settlement coordinator as the pre-image of a
    /// unit of work; `restore` puts it back verbatim on rollback.
    pub fn snapshot(&self) -> Self {
        self.clone()
    }

    pub fn restore(&mut self, snapshot: Self) {
        *self = snapshot;
    }
}

impl Repository for InMemoryRepository {
    fn next_id(&mut self, table: &str) -> u64 {
        let counter = self.next_ids.entry(table.to_string()).or_insert(0);
        *counter += 1;
        *counter
    }

    fn insert_user(&mut self, user: User) {
        self.users_by_email.insert(user.email.clone(), user.id);
        self.users.insert(user.id, user);
    }

    fn get_user(&self, id: UserId) -> Option<&User> {
        self.users.get(&id)
    }

    fn get_user_mut(&mut self, id: UserId) -> Option<&mut User> {
        self.users.get_mut(&id)
    }

    fn find_user_by_email(&self, email: &str) -> Option<&User> {
        self.users_by_email.get(email).and_then(|id| self.users.get(id))
    }

    fn insert_account(&mut self, account: Account) {
        self.account_by_user.insert(account.user_id, account.id);
        self.accounts.insert(account.id, account);
    }

    fn get_account(&self, id: AccountId) -> Option<&Account> {
        self.accounts.get(&id)
    }

    fn get_account_mut(&mut self, id: AccountId) -> Option<&mut Account> {
        self.accounts.get_mut(&id)
    }

    fn account_for_user(&self, user_id: UserId) -> Option<AccountId> {
        self.account_by_user.get(&user_id).copied()
    }

    fn get_balance(&self, account_id: AccountId, asset: &Asset) -> Decimal {
        self.balances
            .get(&(account_id, asset.clone()))
            .map(|(available, _)| *available)
            .unwrap_or(Decimal::ZERO)
    }

    fn get_locked(&self, account_id: AccountId, asset: &Asset) -> Decimal {
        self.balances
            .get(&(account_id, asset.clone()))
            .map(|(_, locked)| *locked)
            .unwrap_or(Decimal::ZERO)
    }

    fn set_balance(&mut self, account_id: AccountId, asset: Asset, available: Decimal, locked: Decimal) {
        self.balances.insert((account_id, asset), (available, locked));
    }

    fn append_ledger_entry(&mut self, entry: LedgerEntry) {
        self.ledger_entries.push(entry);
    }

    fn ledger_entries(&self, account_id: AccountId, asset: &Asset) -> Vec<&LedgerEntry> {
        self.ledger_entries
            .iter()
            .filter(|e| e.account_id == account_id && &e.asset == asset)
            .collect()
    }

    fn insert_order(&mut self, order: Order) {
        self.orders_by_user.entry(order.user_id).or_default().push(order.id);
        self.orders.insert(order.id, order);
    }

    fn get_order(&self, id: OrderId) -> Option<&Order> {
        self.orders.get(&id)
    }

    fn get_order_mut(&mut self, id: OrderId) -> Option<&mut Order> {
        self.orders.get_mut(&id)
    }

    fn orders_for_user(&self, user_id: UserId) -> Vec<Order> {
        self.orders_by_user
            .get(&user_id)
            .into_iter()
            .flatten()
            .filter_map(|id| self.orders.get(id).cloned())
            .collect()
    }

    fn insert_trade(&mut self, trade: Trade) {
        if let Some(buy) = self.orders.get(&trade.buy_order_id) {
            self.trades_by_user.entry(buy.user_id).or_default().push(trade.id);
        }
        if let Some(sell) = self.orders.get(&trade.sell_order_id) {
            self.trades_by_user.entry(sell.user_id).or_default().push(trade.id);
        }
        self.trades.push(trade);
    }

    fn trades_for_user(&self, user_id: UserId) -> Vec<Trade> {
        let ids = self.trades_by_user.get(&user_id);
        match ids {
            None => Vec::new(),
            Some(ids) => self
                .trades
                .iter()
                .filter(|t| ids.contains(&t.id))
                .cloned()
                .collect(),
        }
    }

    fn recent_trades(&self, limit: usize) -> Vec<Trade> {
        self.trades.iter().rev().take(limit).cloned().collect()
    }

    fn insert_transaction(&mut self, tx: Transaction) {
        self.transactions.insert(tx.id, tx);
    }

    fn get_transaction(&self, id: TransactionId) -> Option<&Transaction> {
        self.transactions.get(&id)
    }

    fn get_transaction_mut(&mut self, id: TransactionId) -> Option<&mut Transaction> {
        self.transactions.get_mut(&id)
    }

    fn pending_withdrawals(&self) -> Vec<Transaction> {
        self.transactions
            .values()
            .filter(|tx| {
                matches!(tx.tx_type, crate::types::TransactionType::Withdraw)
                    && matches!(tx.status, crate::types::TransactionStatus::Pending)
            })
            .cloned()
            .collect()
    }

    fn transactions_for_account(&self, account_id: AccountId, limit: usize) -> Vec<Transaction> {
        let mut txs: Vec<Transaction> = self
            .transactions
            .values()
            .filter(|tx| tx.account_id == account_id)
            .cloned()
            .collect();
        txs.sort_by_key(|tx| std::cmp::Reverse(tx.created_at));
        txs.truncate(limit);
        txs
    }

    fn insert_audit_log(&mut self, log: AuditLog) {
        self.audit_logs.push(log);
    }

    fn recent_audit_logs(&self, limit: usize) -> Vec<AuditLog> {
        self.audit_logs.iter().rev().take(limit).cloned().collect()
    }
}
