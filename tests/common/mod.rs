// Allow dead_code because these helpers are used across different test files
// which are compiled separately
#![allow(dead_code)]

use anyhow::Result;
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use tempfile::TempDir;
use wallet_ledger::application::{DepositRequest, LedgerService, TransferRequest};
use wallet_ledger::domain::WalletId;
use wallet_ledger::storage::{SqliteStore, StoreConfig};

/// Helper to create a test store with a temporary database
pub async fn test_store() -> Result<(SqliteStore, TempDir)> {
    let temp_dir = TempDir::new()?;
    let db_path = temp_dir.path().join("test.db");
    let store = SqliteStore::init(&StoreConfig::for_path(db_path.to_str().unwrap())).await?;
    Ok((store, temp_dir))
}

/// Helper to create a test service with a temporary database
pub async fn test_service() -> Result<(LedgerService<SqliteStore>, TempDir)> {
    let (store, temp_dir) = test_store().await?;
    Ok((LedgerService::new(store), temp_dir))
}

/// Helper to parse a date string into DateTime<Utc> at the given hour
pub fn parse_datetime(date_str: &str, hour: u32) -> DateTime<Utc> {
    parse_date(date_str)
        .and_hms_opt(hour, 0, 0)
        .unwrap()
        .and_utc()
}

pub fn parse_date(date_str: &str) -> NaiveDate {
    NaiveDate::parse_from_str(date_str, "%Y-%m-%d").unwrap()
}

pub fn deposit_request(wallet_id: WalletId, amount: Decimal, key: &str) -> DepositRequest {
    DepositRequest {
        wallet_id,
        amount,
        idempotency_key: key.to_string(),
    }
}

pub fn transfer_request(from: WalletId, to: WalletId, amount: Decimal, key: &str) -> TransferRequest {
    TransferRequest {
        from_wallet_id: from,
        to_wallet_id: to,
        amount,
        idempotency_key: key.to_string(),
    }
}

/// Balance of a wallet in cents, failing the test if it doesn't exist
pub async fn balance(service: &LedgerService<SqliteStore>, wallet_id: WalletId) -> Result<i64> {
    let wallet = service
        .store()
        .get_wallet(wallet_id)
        .await?
        .ok_or_else(|| anyhow::anyhow!("wallet {} not found", wallet_id))?;
    Ok(wallet.balance)
}
