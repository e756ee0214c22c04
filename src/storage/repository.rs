use std::str::FromStr;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, NaiveTime, SecondsFormat, Utc};
use sqlx::error::ErrorKind as DbErrorKind;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, Sqlite, SqliteConnection, SqlitePool, Transaction};
use tracing::{debug, info};

use crate::domain::{Cents, Direction, Operation, OperationFilter, Wallet, WalletId};
use crate::error::{Action, LedgerError, LedgerResult};

use super::{LedgerStore, MIGRATION_001_INITIAL, NewDeposit, NewTransfer, StoreConfig};

/// A wallet whose stored balance disagrees with the sum of its operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BalanceMismatch {
    pub wallet_id: WalletId,
    pub stored_balance: Cents,
    pub computed_balance: Cents,
}

/// Result of a ledger integrity verification.
#[derive(Debug, Clone)]
pub struct IntegrityReport {
    pub wallet_count: i64,
    pub operation_count: i64,
    pub mismatches: Vec<BalanceMismatch>,
}

impl IntegrityReport {
    pub fn is_consistent(&self) -> bool {
        self.mismatches.is_empty()
    }
}

/// SQLite-backed ledger store. The only component that opens transactions.
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Create a new store with the given SQLite connection pool.
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Connect to the SQLite database described by `config`.
    pub async fn connect(config: &StoreConfig) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(&config.database_url)
            .with_context(|| format!("Invalid database URL: {}", config.database_url))?
            .foreign_keys(true)
            .busy_timeout(config.busy_timeout);

        let pool = SqlitePoolOptions::new()
            .max_connections(config.max_connections)
            .connect_with(options)
            .await
            .context("Failed to connect to database")?;

        debug!(url = %config.database_url, "connected to ledger database");
        Ok(Self::new(pool))
    }

    /// Run database migrations.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::query(MIGRATION_001_INITIAL)
            .execute(&self.pool)
            .await
            .context("Failed to run migration 001")?;

        info!("ledger schema is up to date");
        Ok(())
    }

    /// Initialize a new database (connect + migrate).
    pub async fn init(config: &StoreConfig) -> Result<Self> {
        let store = Self::connect(config).await?;
        store.migrate().await?;
        Ok(store)
    }

    /// Get a wallet by ID.
    pub async fn get_wallet(&self, id: WalletId) -> Result<Option<Wallet>> {
        let row = sqlx::query(
            r#"
            SELECT id, idempotency_key, balance, created_at
            FROM wallets
            WHERE id = ?
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to fetch wallet")?;

        row.as_ref().map(Self::row_to_wallet).transpose()
    }

    /// Recompute every wallet's balance from its operations and report any
    /// wallet whose stored balance disagrees.
    pub async fn check_integrity(&self) -> Result<IntegrityReport> {
        let wallet_count: i64 = sqlx::query("SELECT COUNT(*) as count FROM wallets")
            .fetch_one(&self.pool)
            .await?
            .get("count");

        let operation_count: i64 = sqlx::query("SELECT COUNT(*) as count FROM operations")
            .fetch_one(&self.pool)
            .await?
            .get("count");

        let rows = sqlx::query(
            r#"
            SELECT
                w.id as wallet_id,
                w.balance as stored_balance,
                COALESCE(SUM(CASE o.direction WHEN 0 THEN o.value ELSE -o.value END), 0) as computed_balance
            FROM wallets w
            LEFT JOIN operations o ON o.wallet_id = w.id
            GROUP BY w.id, w.balance
            HAVING w.balance != COALESCE(SUM(CASE o.direction WHEN 0 THEN o.value ELSE -o.value END), 0)
            ORDER BY w.id
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .context("Failed to recompute balances")?;

        let mismatches = rows
            .iter()
            .map(|row| BalanceMismatch {
                wallet_id: row.get("wallet_id"),
                stored_balance: row.get("stored_balance"),
                computed_balance: row.get("computed_balance"),
            })
            .collect();

        Ok(IntegrityReport {
            wallet_count,
            operation_count,
            mismatches,
        })
    }

    async fn begin(&self, action: Action) -> LedgerResult<Transaction<'static, Sqlite>> {
        self.pool.begin().await.map_err(|e| {
            LedgerError::storage(
                action,
                anyhow::Error::from(e).context("Failed to begin transaction"),
            )
        })
    }

    fn row_to_wallet(row: &SqliteRow) -> Result<Wallet> {
        let created_at_str: String = row.get("created_at");

        Ok(Wallet {
            id: row.get("id"),
            idempotency_key: row.get("idempotency_key"),
            balance: row.get("balance"),
            created_at: parse_timestamp(&created_at_str).context("Invalid created_at timestamp")?,
        })
    }

    fn row_to_operation(row: &SqliteRow) -> Result<Operation> {
        let direction_code: i64 = row.get("direction");
        let occurred_at_str: String = row.get("occurred_at");

        Ok(Operation {
            id: row.get("id"),
            wallet_id: row.get("wallet_id"),
            amount_cents: row.get("value"),
            direction: Direction::from_code(direction_code)
                .ok_or_else(|| anyhow::anyhow!("Invalid direction: {}", direction_code))?,
            idempotency_key: row.get("idempotency_key"),
            occurred_at: parse_timestamp(&occurred_at_str).context("Invalid occurred_at timestamp")?,
        })
    }
}

#[async_trait]
impl LedgerStore for SqliteStore {
    async fn create_wallet(&self, idempotency_key: &str) -> LedgerResult<WalletId> {
        let action = Action::CreateWallet;

        let id: WalletId = sqlx::query_scalar(
            r#"
            INSERT INTO wallets (idempotency_key, created_at)
            VALUES (?, ?)
            RETURNING id
            "#,
        )
        .bind(idempotency_key)
        .bind(format_timestamp(Utc::now()))
        .fetch_one(&self.pool)
        .await
        .map_err(|e| write_error(e, action, idempotency_key, None, "Failed to insert wallet"))?;

        debug!(wallet_id = id, "wallet created");
        Ok(id)
    }

    async fn deposit(&self, deposit: &NewDeposit) -> LedgerResult<()> {
        let action = Action::Deposit;
        let key = deposit.idempotency_key.as_str();
        let mut tx = self.begin(action).await?;

        insert_operation(
            &mut tx,
            deposit.wallet_id,
            deposit.amount_cents,
            Direction::Credit,
            key,
            deposit.occurred_at,
        )
        .await
        .map_err(|e| {
            write_error(
                e,
                action,
                key,
                Some(deposit.wallet_id),
                "Failed to insert credit operation",
            )
        })?;

        credit_wallet(&mut tx, deposit.wallet_id, deposit.amount_cents, action).await?;

        // Any early return above drops `tx`, which rolls it back.
        tx.commit().await.map_err(|e| {
            LedgerError::storage(action, anyhow::Error::from(e).context("Failed to commit deposit"))
        })?;

        debug!(
            wallet_id = deposit.wallet_id,
            amount_cents = deposit.amount_cents,
            "deposit committed"
        );
        Ok(())
    }

    async fn transfer(&self, transfer: &NewTransfer) -> LedgerResult<()> {
        let action = Action::Transfer;
        let key = transfer.idempotency_key.as_str();
        let mut tx = self.begin(action).await?;

        insert_operation(
            &mut tx,
            transfer.from_wallet_id,
            transfer.amount_cents,
            Direction::Debit,
            key,
            transfer.occurred_at,
        )
        .await
        .map_err(|e| {
            write_error(
                e,
                action,
                key,
                Some(transfer.from_wallet_id),
                "Failed to insert debit operation",
            )
        })?;

        insert_operation(
            &mut tx,
            transfer.to_wallet_id,
            transfer.amount_cents,
            Direction::Credit,
            key,
            transfer.occurred_at,
        )
        .await
        .map_err(|e| {
            write_error(
                e,
                action,
                key,
                Some(transfer.to_wallet_id),
                "Failed to insert credit operation",
            )
        })?;

        debit_wallet(&mut tx, transfer.from_wallet_id, transfer.amount_cents, action).await?;
        credit_wallet(&mut tx, transfer.to_wallet_id, transfer.amount_cents, action).await?;

        tx.commit().await.map_err(|e| {
            LedgerError::storage(action, anyhow::Error::from(e).context("Failed to commit transfer"))
        })?;

        debug!(
            from_wallet_id = transfer.from_wallet_id,
            to_wallet_id = transfer.to_wallet_id,
            amount_cents = transfer.amount_cents,
            "transfer committed"
        );
        Ok(())
    }

    async fn list_operations(&self, filter: &OperationFilter) -> LedgerResult<Vec<Operation>> {
        let action = Action::ListOperations;

        let next_day = filter
            .date
            .succ_opt()
            .ok_or_else(|| LedgerError::validation(format!("Date out of range: {}", filter.date)))?;
        let day_start = format_timestamp(filter.date.and_time(NaiveTime::MIN).and_utc());
        let day_end = format_timestamp(next_day.and_time(NaiveTime::MIN).and_utc());

        // SQLite treats a negative LIMIT as "no limit".
        let (limit, offset) = match filter.page {
            Some(page) => (i64::from(page.limit), i64::from(page.offset)),
            None => (-1, 0),
        };

        let rows = sqlx::query(
            r#"
            SELECT id, wallet_id, value, direction, idempotency_key, occurred_at
            FROM operations
            WHERE wallet_id = ? AND direction = ? AND occurred_at >= ? AND occurred_at < ?
            ORDER BY id
            LIMIT ? OFFSET ?
            "#,
        )
        .bind(filter.wallet_id)
        .bind(filter.direction.code())
        .bind(&day_start)
        .bind(&day_end)
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            LedgerError::storage(action, anyhow::Error::from(e).context("Failed to list operations"))
        })?;

        rows.iter()
            .map(Self::row_to_operation)
            .collect::<Result<Vec<_>>>()
            .map_err(|e| LedgerError::storage(action, e))
    }
}

async fn insert_operation(
    conn: &mut SqliteConnection,
    wallet_id: WalletId,
    amount_cents: Cents,
    direction: Direction,
    idempotency_key: &str,
    occurred_at: DateTime<Utc>,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO operations (wallet_id, value, direction, idempotency_key, occurred_at)
        VALUES (?, ?, ?, ?, ?)
        "#,
    )
    .bind(wallet_id)
    .bind(amount_cents)
    .bind(direction.code())
    .bind(idempotency_key)
    .bind(format_timestamp(occurred_at))
    .execute(&mut *conn)
    .await?;
    Ok(())
}

/// Increment the balance unless the result would leave the 64-bit range.
/// SQLite silently promotes an overflowing sum to REAL, so the bound is part
/// of the statement.
async fn credit_wallet(
    conn: &mut SqliteConnection,
    wallet_id: WalletId,
    amount_cents: Cents,
    action: Action,
) -> LedgerResult<()> {
    let result = sqlx::query("UPDATE wallets SET balance = balance + ? WHERE id = ? AND balance <= ?")
        .bind(amount_cents)
        .bind(wallet_id)
        .bind(Cents::MAX - amount_cents)
        .execute(&mut *conn)
        .await
        .map_err(|e| {
            LedgerError::storage(action, anyhow::Error::from(e).context("Failed to credit wallet"))
        })?;

    if result.rows_affected() > 0 {
        return Ok(());
    }

    match current_balance(conn, wallet_id, action).await? {
        Some(balance) => Err(LedgerError::validation(format!(
            "crediting {amount_cents} to wallet {wallet_id} would exceed the maximum balance (current {balance})"
        ))),
        None => Err(LedgerError::WalletNotFound(wallet_id)),
    }
}

/// Decrement the balance only if it covers `amount_cents`. The check and the
/// write are one statement, so a concurrent debit can never act on a stale
/// balance.
async fn debit_wallet(
    conn: &mut SqliteConnection,
    wallet_id: WalletId,
    amount_cents: Cents,
    action: Action,
) -> LedgerResult<()> {
    let result = sqlx::query("UPDATE wallets SET balance = balance - ? WHERE id = ? AND balance >= ?")
        .bind(amount_cents)
        .bind(wallet_id)
        .bind(amount_cents)
        .execute(&mut *conn)
        .await;

    match result {
        Ok(done) if done.rows_affected() > 0 => Ok(()),
        Ok(_) => Err(insufficient_funds(conn, wallet_id, amount_cents, action).await),
        Err(e) if is_check_violation(&e) => {
            Err(insufficient_funds(conn, wallet_id, amount_cents, action).await)
        }
        Err(e) => Err(LedgerError::storage(
            action,
            anyhow::Error::from(e).context("Failed to debit wallet"),
        )),
    }
}

/// Build the rejection for a debit that did not apply, reading the balance
/// the transaction currently sees.
async fn insufficient_funds(
    conn: &mut SqliteConnection,
    wallet_id: WalletId,
    required: Cents,
    action: Action,
) -> LedgerError {
    match current_balance(conn, wallet_id, action).await {
        Ok(Some(balance)) => LedgerError::InsufficientFunds {
            wallet_id,
            balance,
            required,
        },
        Ok(None) => LedgerError::WalletNotFound(wallet_id),
        Err(e) => e,
    }
}

async fn current_balance(
    conn: &mut SqliteConnection,
    wallet_id: WalletId,
    action: Action,
) -> LedgerResult<Option<Cents>> {
    sqlx::query_scalar("SELECT balance FROM wallets WHERE id = ?")
        .bind(wallet_id)
        .fetch_optional(&mut *conn)
        .await
        .map_err(|e| LedgerError::storage(action, anyhow::Error::from(e).context("Failed to read balance")))
}

/// Map a failed insert to a domain error: a unique violation means the
/// idempotency key was already used, a foreign key violation means the wallet
/// doesn't exist.
fn write_error(
    err: sqlx::Error,
    action: Action,
    idempotency_key: &str,
    wallet_id: Option<WalletId>,
    context: &'static str,
) -> LedgerError {
    if let Some(db_err) = err.as_database_error() {
        match (db_err.kind(), wallet_id) {
            (DbErrorKind::UniqueViolation, _) => {
                return LedgerError::Conflict {
                    action,
                    key: idempotency_key.to_string(),
                };
            }
            (DbErrorKind::ForeignKeyViolation, Some(wallet_id)) => {
                return LedgerError::WalletNotFound(wallet_id);
            }
            _ => {}
        }
    }
    LedgerError::storage(action, anyhow::Error::from(err).context(context))
}

fn is_check_violation(err: &sqlx::Error) -> bool {
    err.as_database_error()
        .is_some_and(|db_err| matches!(db_err.kind(), DbErrorKind::CheckViolation))
}

/// Fixed-width RFC 3339 in UTC, so string order equals time order.
fn format_timestamp(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_timestamp(s: &str) -> Result<DateTime<Utc>> {
    Ok(DateTime::parse_from_rfc3339(s)?.with_timezone(&Utc))
}
