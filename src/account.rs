use crate::config::Config;
use crate::error::{ExchangeError, ExchangeResult};
use crate::ledger::Ledger;
use crate::models::{Account, Order, Trade, Transaction, User};
use crate::repository::Repository;
use crate::settlement::run_unit_of_work;
use crate::types::{
    Asset, OrderId, OrderStatus, OrderType, Side, TimeInForce, TransactionStatus, TransactionType,
    UserId,
};
use crate::engine::MatchingEngine;
use crate::Exchange;
use chrono::Utc;
use rust_decimal::Decimal;
use sha2::{Digest, Sha256};

fn reservation_asset(side: Side, config: &Config) -> Asset {
    match side {
        Side::Buy => config.quote_asset.clone(),
        Side::Sell => config.base_asset.clone(),
    }
}

fn required_reservation(side: Side, price: Decimal, amount: Decimal, fee_rate: Decimal) -> Decimal {
    match side {
        Side::Buy => price * amount * (Decimal::ONE + fee_rate),
        Side::Sell => amount,
    }
}

/// Deterministic deposit address for (user_id, asset): same input always
/// yields the same address, the way a wallet collaborator allocates one
/// per user without persisting a lookup table of its own.
pub fn allocate_deposit_address(user_id: UserId, asset: &Asset) -> String {
    let mut hasher = Sha256::new();
    hasher.update(format!("{user_id}_{}", asset.as_str()).as_bytes());
    let digest = hasher.finalize();
    format!("0x{}", hex_prefix(&digest, 20))
}

fn hex_prefix(bytes: &[u8], n: usize) -> String {
    bytes.iter().take(n).map(|b| format!("{b:02x}")).collect()
}

impl<R: Repository + Clone> Exchange<R> {
    pub fn create_user(&mut self, email: impl Into<String>, password_hash: impl Into<String>) -> User {
        let user_id = self.repo.next_id("user");
        let user = User {
            id: user_id,
            email: email.into(),
            password_hash: password_hash.into(),
            created_at: Utc::now(),
            last_login: None,
        };
        self.repo.insert_user(user.clone());

        let account_id = self.repo.next_id("account");
        self.repo.insert_account(Account::new(account_id, user_id));
        tracing::info!(user_id, account_id, "user created");
        user
    }

    fn account_id_for(&self, user_id: UserId) -> ExchangeResult<u64> {
        self.repo
            .account_for_user(user_id)
            .ok_or_else(|| ExchangeError::EntityNotFound(format!("account for user {user_id}")))
    }

    fn check_not_frozen(&self, account_id: u64) -> ExchangeResult<()> {
        let account = self
            .repo
            .get_account(account_id)
            .ok_or_else(|| ExchangeError::EntityNotFound(format!("account {account_id}")))?;
        if account.frozen {
            return Err(ExchangeError::AccountFrozen(account_id));
        }
        Ok(())
    }

    pub fn place_limit_order(
        &mut self,
        user_id: UserId,
        side: Side,
        price: Decimal,
        amount: Decimal,
        time_in_force: TimeInForce,
    ) -> ExchangeResult<Order> {
        let account_id = self.account_id_for(user_id)?;
        self.check_not_frozen(account_id)?;

        let order = Order {
            id: 0,
            user_id,
            account_id,
            market: self.config.market.clone(),
            side,
            order_type: OrderType::Limit,
            time_in_force,
            price: Some(price),
            amount,
            filled: Decimal::ZERO,
            status: OrderStatus::Open,
            stop_price: None,
            link_order_id: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        self.submit_new_order(order)
    }

    pub fn place_stop_order(
        &mut self,
        user_id: UserId,
        side: Side,
        price: Decimal,
        stop_price: Decimal,
        amount: Decimal,
        time_in_force: TimeInForce,
    ) -> ExchangeResult<Order> {
        let account_id = self.account_id_for(user_id)?;
        self.check_not_frozen(account_id)?;

        let order = Order {
            id: 0,
            user_id,
            account_id,
            market: self.config.market.clone(),
            side,
            order_type: OrderType::Stop,
            time_in_force,
            price: Some(price),
            amount,
            filled: Decimal::ZERO,
            status: OrderStatus::Open,
            stop_price: Some(stop_price),
            link_order_id: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };

        MatchingEngine::validate(&order)?;
        let asset = reservation_asset(side, &self.config);
        let required = required_reservation(side, price, amount, self.config.fee_rate);

        let order_id = run_unit_of_work(&mut self.repo, &mut self.engine, &self.bus, move |repo, engine, events| {
            Ledger::reserve(repo, account_id, &asset, required, events)?;
            let order_id = repo.next_id("order");
            let mut stored = order;
            stored.id = order_id;
            repo.insert_order(stored);
            engine.arm_stop(repo, order_id, events);
            Ok(order_id)
        })?;

        self.repo.get_order(order_id).cloned().ok_or_else(|| ExchangeError::order_not_found(order_id))
    }

    /// Places a linked take-profit LIMIT leg and a stop-loss STOP leg
    /// sharing one reservation on the same side and amount: filling either
    /// leg cancels the other in the same unit of work.
    pub fn place_oco_order(
        &mut self,
        user_id: UserId,
        side: Side,
        price: Decimal,
        stop_price: Decimal,
        amount: Decimal,
    ) -> ExchangeResult<(Order, Order)> {
        let account_id = self.account_id_for(user_id)?;
        self.check_not_frozen(account_id)?;

        if amount <= Decimal::ZERO || price <= Decimal::ZERO || stop_price <= Decimal::ZERO {
            return Err(ExchangeError::InvalidOrder("oco legs require positive price, stop_price and amount".into()));
        }

        let asset = reservation_asset(side, &self.config);
        let required = required_reservation(side, price.max(stop_price), amount, self.config.fee_rate);
        let market = self.config.market.clone();

        let (primary_id, stop_id) = run_unit_of_work(&mut self.repo, &mut self.engine, &self.bus, move |repo, engine, events| {
            Ledger::reserve(repo, account_id, &asset, required, events)?;

            let primary_id = repo.next_id("order");
            let stop_id = repo.next_id("order");

            let now = Utc::now();
            let primary = Order {
                id: primary_id,
                user_id,
                account_id,
                market: market.clone(),
                side,
                order_type: OrderType::Oco,
                time_in_force: TimeInForce::Gtc,
                price: Some(price),
                amount,
                filled: Decimal::ZERO,
                status: OrderStatus::Open,
                stop_price: None,
                link_order_id: Some(stop_id),
                created_at: now,
                updated_at: now,
            };
            let stop_leg = Order {
                id: stop_id,
                user_id,
                account_id,
                market: market.clone(),
                side,
                order_type: OrderType::Oco,
                time_in_force: TimeInForce::Gtc,
                price: Some(stop_price),
                amount,
                filled: Decimal::ZERO,
                status: OrderStatus::Open,
                stop_price: Some(stop_price),
                link_order_id: Some(primary_id),
                created_at: now,
                updated_at: now,
            };

            repo.insert_order(primary);
            repo.insert_order(stop_leg);
            engine.link_oco(primary_id, stop_id);
            engine.arm_stop(repo, stop_id, events);
            Ok((primary_id, stop_id))
        })?;

        // The primary leg still needs to run through matching; do it in its
        // own unit of work so a failed match doesn't undo the linkage above.
        self.submit_existing_order(primary_id)?;

        let primary = self.repo.get_order(primary_id).cloned().ok_or_else(|| ExchangeError::order_not_found(primary_id))?;
        let stop_leg = self.repo.get_order(stop_id).cloned().ok_or_else(|| ExchangeError::order_not_found(stop_id))?;
        Ok((primary, stop_leg))
    }

    fn submit_new_order(&mut self, mut order: Order) -> ExchangeResult<Order> {
        MatchingEngine::validate(&order)?;
        let account_id = order.account_id;
        let asset = reservation_asset(order.side, &self.config);
        let required = required_reservation(order.side, order.price.unwrap(), order.amount, self.config.fee_rate);
        let base = self.config.base_asset.clone();
        let quote = self.config.quote_asset.clone();
        let fee_rate = self.config.fee_rate;

        let order_id = run_unit_of_work(&mut self.repo, &mut self.engine, &self.bus, move |repo, engine, events| {
            Ledger::reserve(repo, account_id, &asset, required, events)?;
            let order_id = repo.next_id("order");
            order.id = order_id;
            repo.insert_order(order);
            engine.submit(repo, order_id, &base, &quote, fee_rate, events)?;
            Ok(order_id)
        })?;

        self.repo.get_order(order_id).cloned().ok_or_else(|| ExchangeError::order_not_found(order_id))
    }

    fn submit_existing_order(&mut self, order_id: OrderId) -> ExchangeResult<()> {
        let base = self.config.base_asset.clone();
        let quote = self.config.quote_asset.clone();
        let fee_rate = self.config.fee_rate;
        run_unit_of_work(&mut self.repo, &mut self.engine, &self.bus, move |repo, engine, events| {
            engine.submit(repo, order_id, &base, &quote, fee_rate, events)?;
            Ok(())
        })
    }

    pub fn cancel_order(&mut self, user_id: UserId, order_id: OrderId) -> ExchangeResult<bool> {
        let order = self.repo.get_order(order_id).cloned().ok_or_else(|| ExchangeError::order_not_found(order_id))?;
        if order.user_id != user_id {
            return Err(ExchangeError::EntityNotFound(format!("order {order_id} for user {user_id}")));
        }
        let asset = reservation_asset(order.side, &self.config);
        let fee_rate = self.config.fee_rate;
        run_unit_of_work(&mut self.repo, &mut self.engine, &self.bus, move |repo, engine, events| {
            engine.cancel(repo, order_id, &asset, fee_rate, events)
        })
    }

    pub fn get_balance(&self, user_id: UserId, asset: &Asset) -> ExchangeResult<crate::models::Balance> {
        let account_id = self.account_id_for(user_id)?;
        Ok(crate::models::Balance {
            available: self.repo.get_balance(account_id, asset),
            locked: self.repo.get_locked(account_id, asset),
        })
    }

    pub fn get_user_orders(&self, user_id: UserId) -> Vec<Order> {
        self.repo.orders_for_user(user_id)
    }

    pub fn get_user_trades(&self, user_id: UserId) -> Vec<Trade> {
        self.repo.trades_for_user(user_id)
    }

    pub fn credit_deposit(
        &mut self,
        user_id: UserId,
        asset: Asset,
        amount: Decimal,
        tx_hash: impl Into<String>,
    ) -> ExchangeResult<Transaction> {
        if amount <= Decimal::ZERO {
            return Err(ExchangeError::InvalidOrder("deposit amount must be positive".into()));
        }
        let account_id = self.account_id_for(user_id)?;
        let tx_hash = tx_hash.into();

        run_unit_of_work(&mut self.repo, &mut self.engine, &self.bus, move |repo, _engine, events| {
            Ledger::credit_deposit(repo, account_id, &asset, amount, events);
            let tx_id = repo.next_id("transaction");
            let tx = Transaction {
                id: tx_id,
                user_id,
                account_id,
                asset,
                tx_type: TransactionType::Deposit,
                status: TransactionStatus::Confirmed,
                amount,
                address: None,
                tx_hash: Some(tx_hash),
                approvers: Vec::new(),
                approved_at: None,
                rejected_at: None,
                created_at: Utc::now(),
            };
            repo.insert_transaction(tx.clone());
            Ok(tx)
        })
    }

    pub fn request_withdrawal(
        &mut self,
        user_id: UserId,
        asset: Asset,
        amount: Decimal,
        address: impl Into<String>,
    ) -> ExchangeResult<Transaction> {
        if amount <= Decimal::ZERO {
            return Err(ExchangeError::InvalidOrder("withdrawal amount must be positive".into()));
        }
        let account_id = self.account_id_for(user_id)?;
        self.check_not_frozen(account_id)?;
        let address = address.into();

        run_unit_of_work(&mut self.repo, &mut self.engine, &self.bus, move |repo, _engine, events| {
            Ledger::begin_withdrawal(repo, account_id, &asset, amount, events)?;
            let tx_id = repo.next_id("transaction");
            let tx = Transaction {
                id: tx_id,
                user_id,
                account_id,
                asset: asset.clone(),
                tx_type: TransactionType::Withdraw,
                status: TransactionStatus::Pending,
                amount,
                address: Some(address),
                tx_hash: None,
                approvers: Vec::new(),
                approved_at: None,
                rejected_at: None,
                created_at: Utc::now(),
            };
            repo.insert_transaction(tx.clone());
            events.push(crate::events::Event::WithdrawalRequested {
                transaction_id: tx_id,
                account_id,
                asset,
                amount,
            });
            Ok(tx)
        })
    }

    /// Finalizes a withdrawal directly (the wallet collaborator confirmed
    /// the on-chain send), bypassing the admin approval gate. Used for
    /// deployments where `withdrawal_approvals_required` is not enforced at
    /// this layer; the admin-gated path is `AdminService::approve_withdrawal`.
    pub fn complete_withdrawal(&mut self, tx_id: u64, tx_hash: impl Into<String>) -> ExchangeResult<Transaction> {
        let tx_hash = tx_hash.into();
        run_unit_of_work(&mut self.repo, &mut self.engine, &self.bus, move |repo, _engine, events| {
            let tx = repo.get_transaction(tx_id).cloned().ok_or_else(|| ExchangeError::transaction_not_found(tx_id))?;
            if tx.status != TransactionStatus::Pending {
                return Err(ExchangeError::WithdrawalApproval(format!("transaction {tx_id} is not pending")));
            }
            Ledger::finalize_withdrawal(repo, tx.account_id, &tx.asset, tx.amount, true, events)?;
            let record = repo.get_transaction_mut(tx_id).unwrap();
            record.status = TransactionStatus::Confirmed;
            record.tx_hash = Some(tx_hash.clone());
            record.approved_at = Some(Utc::now());
            let updated = record.clone();
            events.push(crate::events::Event::WithdrawalApproved { transaction_id: tx_id, tx_hash });
            Ok(updated)
        })
    }
}
