use crate::error::{ExchangeError, ExchangeResult};
use crate::events::Event;
use crate::models::LedgerEntry;
use crate::repository::Repository;
use crate::types::{AccountId, Asset, EntryType};
use chrono::Utc;
use rust_decimal::Decimal;

/// Balance arithmetic. Every mutation is expressed as a pair of journal
/// entries so a balance can always be rederived and reconciled against the
/// cached available/locked pair, mirroring a double-entry ledger.
pub struct Ledger;

impl Ledger {
    fn apply<R: Repository>(
        repo: &mut R,
        account_id: AccountId,
        asset: &Asset,
        entry_type: EntryType,
        delta_available: Decimal,
        delta_locked: Decimal,
        events: &mut Vec<Event>,
    ) {
        let available = repo.get_balance(account_id, asset) + delta_available;
        let locked = repo.get_locked(account_id, asset) + delta_locked;
        repo.set_balance(account_id, asset.clone(), available, locked);
        repo.append_ledger_entry(LedgerEntry {
            account_id,
            asset: asset.clone(),
            entry_type,
            amount: delta_available + delta_locked,
            created_at: Utc::now(),
        });
        events.push(Event::BalanceChanged {
            account_id,
            asset: asset.clone(),
            available,
            locked,
            reason: format!("{entry_type:?}").to_lowercase(),
        });
    }

    pub fn reserve<R: Repository>(
        repo: &mut R,
        account_id: AccountId,
        asset: &Asset,
        amount: Decimal,
        events: &mut Vec<Event>,
    ) -> ExchangeResult<()> {
        let available = repo.get_balance(account_id, asset);
        if available < amount {
            return Err(ExchangeError::InsufficientBalance {
                account_id,
                required: amount,
                available,
            });
        }
        Self::apply(repo, account_id, asset, EntryType::Lock, -amount, amount, events);
        Ok(())
    }

    pub fn release<R: Repository>(
        repo: &mut R,
        account_id: AccountId,
        asset: &Asset,
        amount: Decimal,
        events: &mut Vec<Event>,
    ) -> ExchangeResult<()> {
        let locked = repo.get_locked(account_id, asset);
        if locked < amount {
            return Err(ExchangeError::SettlementError(format!(
                "cannot release {amount} from account {account_id} holding only {locked} locked {asset}"
            )));
        }
        Self::apply(repo, account_id, asset, EntryType::Unlock, amount, -amount, events);
        Ok(())
    }

    /// Atomic four-way transfer for one fill. `buyer`/`seller` are
    /// (account_id, base_asset, quote_asset) triples; the buyer's locked
    /// quote pays `price*amount*(1+fee_rate)`, the seller's locked base pays
    /// `amount`, and each receives the other side net of the fee. The fee
    /// differential is retained by the exchange and never credited anywhere.
    #[allow(clippy::too_many_arguments)]
    pub fn settle_trade<R: Repository>(
        repo: &mut R,
        buyer_account: AccountId,
        seller_account: AccountId,
        base: &Asset,
        quote: &Asset,
        price: Decimal,
        amount: Decimal,
        fee_rate: Decimal,
        events: &mut Vec<Event>,
    ) -> ExchangeResult<()> {
        let notional = price * amount;
        let buyer_pays = notional * (Decimal::ONE + fee_rate);
        let seller_receives = notional * (Decimal::ONE - fee_rate);

        let buyer_locked = repo.get_locked(buyer_account, quote);
        if buyer_locked < buyer_pays {
            return Err(ExchangeError::SettlementError(format!(
                "buyer account {buyer_account} has insufficient locked {quote} ({buyer_locked} < {buyer_pays})"
            )));
        }
        let seller_locked = repo.get_locked(seller_account, base);
        if seller_locked < amount {
            return Err(ExchangeError::SettlementError(format!(
                "seller account {seller_account} has insufficient locked {base} ({seller_locked} < {amount})"
            )));
        }

        Self::apply(repo, buyer_account, quote, EntryType::Trade, Decimal::ZERO, -buyer_pays, events);
        Self::apply(repo, buyer_account, base, EntryType::Trade, amount, Decimal::ZERO, events);
        Self::apply(repo, seller_account, base, EntryType::Trade, Decimal::ZERO, -amount, events);
        Self::apply(repo, seller_account, quote, EntryType::Trade, seller_receives, Decimal::ZERO, events);
        Ok(())
    }

    pub fn credit_deposit<R: Repository>(
        repo: &mut R,
        account_id: AccountId,
        asset: &Asset,
        amount: Decimal,
        events: &mut Vec<Event>,
    ) {
        Self::apply(repo, account_id, asset, EntryType::Deposit, amount, Decimal::ZERO, events);
    }

    pub fn begin_withdrawal<R: Repository>(
        repo: &mut R,
        account_id: AccountId,
        asset: &Asset,
        amount: Decimal,
        events: &mut Vec<Event>,
    ) -> ExchangeResult<()> {
        Self::reserve(repo, account_id, asset, amount, events)
    }

    pub fn finalize_withdrawal<R: Repository>(
        repo: &mut R,
        account_id: AccountId,
        asset: &Asset,
        amount: Decimal,
        success: bool,
        events: &mut Vec<Event>,
    ) -> ExchangeResult<()> {
        if success {
            let locked = repo.get_locked(account_id, asset);
            if locked < amount {
                return Err(ExchangeError::SettlementError(format!(
                    "cannot finalize withdrawal of {amount} {asset} for account {account_id}: only {locked} locked"
                )));
            }
            Self::apply(repo, account_id, asset, EntryType::Withdrawal, Decimal::ZERO, -amount, events);
        } else {
            Self::release(repo, account_id, asset, amount, events)?;
        }
        Ok(())
    }

    /// Sum of available+locked across every account holding `asset`, used by
    /// tests to check the conservation invariant.
    pub fn total_balance<R: Repository>(repo: &R, account_ids: &[AccountId], asset: &Asset) -> Decimal {
        account_ids
            .iter()
            .map(|id| repo.get_balance(*id, asset) + repo.get_locked(*id, asset))
            .sum()
    }
}
