use crate::types::Asset;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

/// Which repository backend an embedding binary should construct. Only
/// `InMemory` is realized inside the core; `Postgres` names the external
/// persistent collaborator this crate does not implement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DatabaseKind {
    InMemory,
    Postgres,
}

/// Runtime configuration for one market's core. Loading this from a file or
/// environment is an embedding concern, not the core's; the teacher-style
/// env-driven construction lives in `demos/demo.rs`.
#[derive(Debug, Clone)]
pub struct Config {
    pub market: String,
    pub base_asset: Asset,
    pub quote_asset: Asset,
    pub fee_rate: Decimal,
    pub recent_events_capacity: usize,
    pub withdrawal_approvals_required: usize,
    pub database_kind: DatabaseKind,
    /// Realizes the external admin-identity predicate: a caller id below
    /// this threshold is treated as an admin principal.
    pub admin_id_threshold: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            market: "BASE/QUOTE".to_string(),
            base_asset: Asset::new("BASE"),
            quote_asset: Asset::new("QUOTE"),
            fee_rate: dec!(0.001),
            recent_events_capacity: 200,
            withdrawal_approvals_required: 2,
            database_kind: DatabaseKind::InMemory,
            admin_id_threshold: 100,
        }
    }
}

impl Config {
    pub fn for_market(market: impl Into<String>, base_asset: Asset, quote_asset: Asset) -> Self {
        Self {
            market: market.into(),
            base_asset,
            quote_asset,
            ..Default::default()
        }
    }
}
