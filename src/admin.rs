use crate::error::{ExchangeError, ExchangeResult};
use crate::events::Event;
use crate::ledger::Ledger;
use crate::models::{Account, AuditLog, Transaction};
use crate::repository::Repository;
use crate::settlement::run_unit_of_work;
use crate::types::{AccountId, TransactionId, TransactionStatus, UserId};
use crate::Exchange;
use chrono::Utc;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

/// Current market snapshot surfaced to an admin dashboard: order book
/// depth, the latest trades, and how many OCO pairs are still live.
pub struct MarketOverview {
    pub market: String,
    pub bids: Vec<(rust_decimal::Decimal, rust_decimal::Decimal)>,
    pub asks: Vec<(rust_decimal::Decimal, rust_decimal::Decimal)>,
    pub recent_trades: Vec<crate::models::Trade>,
    pub oco_pairs_count: usize,
}

pub struct AccountInfo {
    pub account: Account,
    pub balances: BTreeMap<String, crate::models::Balance>,
    pub recent_transactions: Vec<Transaction>,
}

fn synthesize_tx_hash(tx_id: TransactionId) -> String {
    let mut hasher = Sha256::new();
    hasher.update(format!("withdrawal-{tx_id}").as_bytes());
    let digest = hasher.finalize();
    format!("0x{}", digest.iter().take(16).map(|b| format!("{b:02x}")).collect::<String>())
}

impl<R: Repository + Clone> Exchange<R> {
    /// Admin identity is an external predicate; this implementation
    /// realizes it as "caller id below a configured threshold".
    pub fn is_admin(&self, caller_id: UserId) -> bool {
        caller_id < self.config.admin_id_threshold
    }

    fn require_admin(&self, caller_id: UserId) -> ExchangeResult<()> {
        if self.is_admin(caller_id) {
            Ok(())
        } else {
            Err(ExchangeError::AdminPermission(caller_id))
        }
    }

    pub fn list_pending_withdrawals(&self, caller_id: UserId) -> ExchangeResult<Vec<Transaction>> {
        self.require_admin(caller_id)?;
        Ok(self.repo.pending_withdrawals())
    }

    /// Records a distinct approval from `admin_id`. Finalizes to CONFIRMED
    /// once the number of distinct approvers reaches
    /// `withdrawal_approvals_required`, synthesizing a `tx_hash` the way a
    /// wallet collaborator would report the on-chain send.
    pub fn approve_withdrawal(&mut self, admin_id: UserId, tx_id: TransactionId) -> ExchangeResult<Transaction> {
        self.require_admin(admin_id)?;
        let required = self.config.withdrawal_approvals_required;

        run_unit_of_work(&mut self.repo, &mut self.engine, &self.bus, move |repo, _engine, events| {
            let tx = repo.get_transaction(tx_id).cloned().ok_or_else(|| ExchangeError::transaction_not_found(tx_id))?;
            if tx.status != TransactionStatus::Pending {
                return Err(ExchangeError::WithdrawalApproval(format!("transaction {tx_id} is not pending")));
            }
            if tx.approvers.contains(&admin_id) {
                return Err(ExchangeError::WithdrawalApproval(format!(
                    "admin {admin_id} already approved transaction {tx_id}"
                )));
            }

            let record = repo.get_transaction_mut(tx_id).unwrap();
            record.approvers.push(admin_id);
            record.approved_at = Some(Utc::now());

            if record.approvers.len() >= required {
                let account_id = record.account_id;
                let asset = record.asset.clone();
                let amount = record.amount;
                let tx_hash = synthesize_tx_hash(tx_id);
                Ledger::finalize_withdrawal(repo, account_id, &asset, amount, true, events)?;
                let record = repo.get_transaction_mut(tx_id).unwrap();
                record.status = TransactionStatus::Confirmed;
                record.tx_hash = Some(tx_hash.clone());
                events.push(Event::WithdrawalApproved { transaction_id: tx_id, tx_hash });
            }

            Ok(repo.get_transaction(tx_id).unwrap().clone())
        })
    }

    pub fn reject_withdrawal(
        &mut self,
        admin_id: UserId,
        tx_id: TransactionId,
        reason: impl Into<String>,
    ) -> ExchangeResult<Transaction> {
        self.require_admin(admin_id)?;
        let reason = reason.into();

        run_unit_of_work(&mut self.repo, &mut self.engine, &self.bus, move |repo, _engine, events| {
            let tx = repo.get_transaction(tx_id).cloned().ok_or_else(|| ExchangeError::transaction_not_found(tx_id))?;
            if tx.status != TransactionStatus::Pending {
                return Err(ExchangeError::WithdrawalApproval(format!("transaction {tx_id} is not pending")));
            }
            Ledger::finalize_withdrawal(repo, tx.account_id, &tx.asset, tx.amount, false, events)?;
            let record = repo.get_transaction_mut(tx_id).unwrap();
            record.status = TransactionStatus::Failed;
            record.rejected_at = Some(Utc::now());
            events.push(Event::WithdrawalRejected { transaction_id: tx_id, reason: reason.clone() });
            Ok(record.clone())
        })
    }

    pub fn freeze_account(
        &mut self,
        admin_id: UserId,
        account_id: AccountId,
        reason: impl Into<String>,
    ) -> ExchangeResult<Account> {
        self.require_admin(admin_id)?;
        let reason = reason.into();

        run_unit_of_work(&mut self.repo, &mut self.engine, &self.bus, move |repo, _engine, events| {
            let account = repo.get_account_mut(account_id).ok_or_else(|| ExchangeError::EntityNotFound(format!("account {account_id}")))?;
            account.frozen = true;
            account.status = crate::types::AccountStatus::Frozen;
            let updated = account.clone();
            events.push(Event::AccountFrozen { account_id, reason: reason.clone() });
            let log_id = repo.next_id("audit_log");
            let mut metadata = BTreeMap::new();
            metadata.insert("reason".to_string(), reason);
            repo.insert_audit_log(AuditLog {
                id: log_id,
                actor: admin_id,
                action: "account_frozen".to_string(),
                entity: format!("account:{account_id}"),
                metadata,
                created_at: Utc::now(),
            });
            Ok(updated)
        })
    }

    pub fn unfreeze_account(&mut self, admin_id: UserId, account_id: AccountId) -> ExchangeResult<Account> {
        self.require_admin(admin_id)?;

        run_unit_of_work(&mut self.repo, &mut self.engine, &self.bus, move |repo, _engine, events| {
            let account = repo.get_account_mut(account_id).ok_or_else(|| ExchangeError::EntityNotFound(format!("account {account_id}")))?;
            account.frozen = false;
            account.status = crate::types::AccountStatus::Active;
            let updated = account.clone();
            events.push(Event::AccountUnfrozen { account_id });
            let log_id = repo.next_id("audit_log");
            repo.insert_audit_log(AuditLog {
                id: log_id,
                actor: admin_id,
                action: "account_unfrozen".to_string(),
                entity: format!("account:{account_id}"),
                metadata: BTreeMap::new(),
                created_at: Utc::now(),
            });
            Ok(updated)
        })
    }

    pub fn get_account_info(&self, admin_id: UserId, account_id: AccountId) -> ExchangeResult<AccountInfo> {
        self.require_admin(admin_id)?;
        let account = self.repo.get_account(account_id).cloned().ok_or_else(|| ExchangeError::EntityNotFound(format!("account {account_id}")))?;

        let mut balances = BTreeMap::new();
        for asset in [&self.config.base_asset, &self.config.quote_asset] {
            balances.insert(
                asset.as_str().to_string(),
                crate::models::Balance {
                    available: self.repo.get_balance(account_id, asset),
                    locked: self.repo.get_locked(account_id, asset),
                },
            );
        }

        Ok(AccountInfo {
            recent_transactions: self.repo.transactions_for_account(account_id, 20),
            balances,
            account,
        })
    }

    pub fn get_audit_logs(&self, admin_id: UserId, limit: usize) -> ExchangeResult<Vec<AuditLog>> {
        self.require_admin(admin_id)?;
        Ok(self.repo.recent_audit_logs(limit))
    }

    pub fn get_market_overview(&self, admin_id: UserId) -> ExchangeResult<MarketOverview> {
        self.require_admin(admin_id)?;
        let (bids, asks) = self.market_data.order_book_snapshot(&self.repo, self.engine.order_book());
        Ok(MarketOverview {
            market: self.config.market.clone(),
            bids,
            asks,
            recent_trades: self.repo.recent_trades(20),
            oco_pairs_count: self.engine.oco_pairs_count(),
        })
    }
}
