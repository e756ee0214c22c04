mod repository;

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::domain::{Cents, Operation, OperationFilter, WalletId};
use crate::error::LedgerResult;

pub use repository::*;

/// SQL migration for initial schema
pub const MIGRATION_001_INITIAL: &str = include_str!("migrations/001_initial.sql");

/// A credit of `amount_cents` into one wallet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewDeposit {
    pub wallet_id: WalletId,
    pub amount_cents: Cents,
    pub idempotency_key: String,
    pub occurred_at: DateTime<Utc>,
}

/// A two-leg movement: debit on `from_wallet_id`, credit on `to_wallet_id`,
/// both recorded under the same idempotency key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewTransfer {
    pub from_wallet_id: WalletId,
    pub to_wallet_id: WalletId,
    pub amount_cents: Cents,
    pub idempotency_key: String,
    pub occurred_at: DateTime<Utc>,
}

/// Storage port used by the ledger service.
///
/// Every write is a single atomic transaction: either all of its rows and
/// balance updates commit, or none do. Implementations must report a reused
/// idempotency key as [`LedgerError::Conflict`](crate::error::LedgerError::Conflict)
/// and an overdraft as
/// [`LedgerError::InsufficientFunds`](crate::error::LedgerError::InsufficientFunds),
/// never as a generic storage failure.
#[async_trait]
pub trait LedgerStore: Send + Sync {
    /// Create a wallet with zero balance and return its id.
    async fn create_wallet(&self, idempotency_key: &str) -> LedgerResult<WalletId>;

    /// Record a credit operation and increase the wallet's balance.
    async fn deposit(&self, deposit: &NewDeposit) -> LedgerResult<()>;

    /// Record a debit and a credit operation and move the balance between wallets.
    /// The source balance check and the debit happen atomically.
    async fn transfer(&self, transfer: &NewTransfer) -> LedgerResult<()>;

    /// Operations matching the filter exactly, in storage order.
    async fn list_operations(&self, filter: &OperationFilter) -> LedgerResult<Vec<Operation>>;
}

/// Connection settings for [`SqliteStore`].
#[derive(Debug, Clone)]
pub struct StoreConfig {
    pub database_url: String,
    pub max_connections: u32,
    /// How long a writer waits for the database lock before failing.
    pub busy_timeout: Duration,
}

impl StoreConfig {
    /// Settings for a database file at `path`, created if it doesn't exist.
    pub fn for_path(path: &str) -> Self {
        Self {
            database_url: format!("sqlite:{}?mode=rwc", path),
            ..Self::default()
        }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            database_url: "sqlite:ledger.db?mode=rwc".to_string(),
            max_connections: 5,
            busy_timeout: Duration::from_secs(5),
        }
    }
}
