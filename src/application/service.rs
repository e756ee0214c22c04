use chrono::{NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use tracing::{error, info, warn};

use crate::domain::{Cents, Direction, OperationFilter, Page, WalletId, to_display, to_minor_units};
use crate::error::{Action, LedgerError, LedgerResult};
use crate::storage::{LedgerStore, NewDeposit, NewTransfer};

/// Application service providing the ledger's use cases.
///
/// Amounts cross this boundary in display units (`Decimal`) and are converted
/// to integer minor units before they reach the store. The service holds no
/// state of its own besides the store handle, so one instance can be shared
/// between concurrent tasks.
pub struct LedgerService<S> {
    store: S,
}

/// Money entering a wallet from outside the ledger.
#[derive(Debug, Clone)]
pub struct DepositRequest {
    pub wallet_id: WalletId,
    pub amount: Decimal,
    pub idempotency_key: String,
}

/// Money moving between two wallets.
#[derive(Debug, Clone)]
pub struct TransferRequest {
    pub from_wallet_id: WalletId,
    pub to_wallet_id: WalletId,
    pub amount: Decimal,
    pub idempotency_key: String,
}

/// Filter for listing operations
#[derive(Debug, Clone)]
pub struct OperationQuery {
    pub wallet_id: WalletId,
    pub date: NaiveDate,
    pub direction: Direction,
    pub page: Option<Page>,
}

/// An operation as reported to callers, with its value in display units.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OperationView {
    pub wallet_id: WalletId,
    pub value: Decimal,
    pub direction: Direction,
    pub date: NaiveDate,
}

impl<S: LedgerStore> LedgerService<S> {
    /// Create a new ledger service on top of the given store.
    pub fn new(store: S) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Create a new wallet.
    pub async fn create_wallet(&self, idempotency_key: &str) -> LedgerResult<WalletId> {
        let action = Action::CreateWallet;
        validate_key(idempotency_key).inspect_err(|e| log_failure(action, e))?;

        let wallet_id = self
            .store
            .create_wallet(idempotency_key)
            .await
            .inspect_err(|e| log_failure(action, e))?;

        info!(wallet_id, "wallet created");
        Ok(wallet_id)
    }

    /// Credit a wallet. The amount is truncated, not rounded, to whole cents.
    pub async fn deposit(&self, request: DepositRequest) -> LedgerResult<()> {
        let action = Action::Deposit;
        let deposit = Self::shape_deposit(request).inspect_err(|e| log_failure(action, e))?;

        self.store
            .deposit(&deposit)
            .await
            .inspect_err(|e| log_failure(action, e))?;

        info!(
            wallet_id = deposit.wallet_id,
            amount_cents = deposit.amount_cents,
            "deposit recorded"
        );
        Ok(())
    }

    /// Move money between two wallets as one atomic step.
    pub async fn transfer(&self, request: TransferRequest) -> LedgerResult<()> {
        let action = Action::Transfer;
        let transfer = Self::shape_transfer(request).inspect_err(|e| log_failure(action, e))?;

        self.store
            .transfer(&transfer)
            .await
            .inspect_err(|e| log_failure(action, e))?;

        info!(
            from_wallet_id = transfer.from_wallet_id,
            to_wallet_id = transfer.to_wallet_id,
            amount_cents = transfer.amount_cents,
            "transfer recorded"
        );
        Ok(())
    }

    /// List a wallet's operations for one day and direction, values in display units.
    pub async fn list_operations(&self, query: OperationQuery) -> LedgerResult<Vec<OperationView>> {
        let action = Action::ListOperations;
        validate_wallet_id("wallet_id", query.wallet_id).inspect_err(|e| log_failure(action, e))?;

        let filter = OperationFilter {
            wallet_id: query.wallet_id,
            date: query.date,
            direction: query.direction,
            page: query.page.map(|page| Page::new(page.limit, page.offset)),
        };

        let operations = self
            .store
            .list_operations(&filter)
            .await
            .inspect_err(|e| log_failure(action, e))?;

        Ok(operations
            .into_iter()
            .map(|operation| OperationView {
                wallet_id: operation.wallet_id,
                value: to_display(operation.amount_cents),
                direction: operation.direction,
                date: operation.occurred_at.date_naive(),
            })
            .collect())
    }

    fn shape_deposit(request: DepositRequest) -> LedgerResult<NewDeposit> {
        validate_key(&request.idempotency_key)?;
        validate_wallet_id("wallet_id", request.wallet_id)?;
        let amount_cents = minor_units(request.amount)?;

        Ok(NewDeposit {
            wallet_id: request.wallet_id,
            amount_cents,
            idempotency_key: request.idempotency_key,
            occurred_at: Utc::now(),
        })
    }

    fn shape_transfer(request: TransferRequest) -> LedgerResult<NewTransfer> {
        validate_wallet_id("from_wallet_id", request.from_wallet_id)?;
        validate_wallet_id("to_wallet_id", request.to_wallet_id)?;
        if request.from_wallet_id == request.to_wallet_id {
            return Err(LedgerError::validation(
                "from_wallet_id and to_wallet_id must differ",
            ));
        }
        let amount_cents = minor_units(request.amount)?;
        validate_key(&request.idempotency_key)?;

        Ok(NewTransfer {
            from_wallet_id: request.from_wallet_id,
            to_wallet_id: request.to_wallet_id,
            amount_cents,
            idempotency_key: request.idempotency_key,
            occurred_at: Utc::now(),
        })
    }
}

fn validate_key(idempotency_key: &str) -> LedgerResult<()> {
    if idempotency_key.trim().is_empty() {
        return Err(LedgerError::validation("idempotency_key is empty"));
    }
    Ok(())
}

fn validate_wallet_id(field: &str, wallet_id: WalletId) -> LedgerResult<()> {
    if wallet_id <= 0 {
        return Err(LedgerError::validation(format!("{field} must be positive")));
    }
    Ok(())
}

/// Convert a display amount to a positive number of cents.
fn minor_units(amount: Decimal) -> LedgerResult<Cents> {
    let cents = to_minor_units(amount)
        .ok_or_else(|| LedgerError::validation(format!("value {amount} is out of range")))?;
    if cents <= 0 {
        return Err(LedgerError::validation(format!(
            "value must be at least 0.01, got {amount}"
        )));
    }
    Ok(cents)
}

fn log_failure(action: Action, err: &LedgerError) {
    match err {
        LedgerError::Storage { source, .. } => error!(%action, "request failed: {err}: {source:#}"),
        _ => warn!(%action, kind = ?err.kind(), "request rejected: {err}"),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use anyhow::anyhow;
    use async_trait::async_trait;
    use chrono::TimeZone;
    use rust_decimal_macros::dec;

    use super::*;
    use crate::domain::{Operation, Wallet};
    use crate::error::ErrorKind;

    /// In-memory stand-in for the SQL store with the same contract.
    #[derive(Default)]
    struct MemoryStore {
        state: Mutex<MemoryState>,
        fail_with_storage_error: bool,
    }

    #[derive(Default)]
    struct MemoryState {
        wallets: Vec<Wallet>,
        operations: Vec<Operation>,
    }

    impl MemoryState {
        fn wallet_index(&self, id: WalletId) -> LedgerResult<usize> {
            self.wallets
                .iter()
                .position(|w| w.id == id)
                .ok_or(LedgerError::WalletNotFound(id))
        }

        fn key_used(&self, wallet_id: WalletId, direction: Direction, key: &str) -> bool {
            self.operations.iter().any(|op| {
                op.wallet_id == wallet_id && op.direction == direction && op.idempotency_key == key
            })
        }

        fn push_operation(
            &mut self,
            wallet_id: WalletId,
            amount_cents: Cents,
            direction: Direction,
            key: &str,
        ) {
            let id = self.operations.len() as i64 + 1;
            self.operations.push(Operation {
                id,
                wallet_id,
                amount_cents,
                direction,
                idempotency_key: key.to_string(),
                occurred_at: Utc::now(),
            });
        }
    }

    impl MemoryStore {
        fn failing() -> Self {
            Self {
                fail_with_storage_error: true,
                ..Self::default()
            }
        }

        fn with_operations(operations: Vec<Operation>) -> Self {
            let store = Self::default();
            store.state.lock().unwrap().operations = operations;
            store
        }

        fn check_available(&self, action: Action) -> LedgerResult<()> {
            if self.fail_with_storage_error {
                return Err(LedgerError::storage(action, anyhow!("connection refused")));
            }
            Ok(())
        }

        fn balance(&self, id: WalletId) -> Cents {
            let state = self.state.lock().unwrap();
            state.wallets.iter().find(|w| w.id == id).unwrap().balance
        }

        fn operation_count(&self) -> usize {
            self.state.lock().unwrap().operations.len()
        }
    }

    #[async_trait]
    impl LedgerStore for MemoryStore {
        async fn create_wallet(&self, idempotency_key: &str) -> LedgerResult<WalletId> {
            self.check_available(Action::CreateWallet)?;
            let mut state = self.state.lock().unwrap();
            if state.wallets.iter().any(|w| w.idempotency_key == idempotency_key) {
                return Err(LedgerError::Conflict {
                    action: Action::CreateWallet,
                    key: idempotency_key.to_string(),
                });
            }
            let id = state.wallets.len() as WalletId + 1;
            state.wallets.push(Wallet {
                id,
                idempotency_key: idempotency_key.to_string(),
                balance: 0,
                created_at: Utc::now(),
            });
            Ok(id)
        }

        async fn deposit(&self, deposit: &NewDeposit) -> LedgerResult<()> {
            self.check_available(Action::Deposit)?;
            let mut state = self.state.lock().unwrap();
            let idx = state.wallet_index(deposit.wallet_id)?;
            if state.key_used(deposit.wallet_id, Direction::Credit, &deposit.idempotency_key) {
                return Err(LedgerError::Conflict {
                    action: Action::Deposit,
                    key: deposit.idempotency_key.clone(),
                });
            }
            state.wallets[idx].balance += deposit.amount_cents;
            state.push_operation(
                deposit.wallet_id,
                deposit.amount_cents,
                Direction::Credit,
                &deposit.idempotency_key,
            );
            Ok(())
        }

        async fn transfer(&self, transfer: &NewTransfer) -> LedgerResult<()> {
            self.check_available(Action::Transfer)?;
            let mut state = self.state.lock().unwrap();
            let from = state.wallet_index(transfer.from_wallet_id)?;
            let to = state.wallet_index(transfer.to_wallet_id)?;
            let key = transfer.idempotency_key.as_str();
            if state.key_used(transfer.from_wallet_id, Direction::Debit, key)
                || state.key_used(transfer.to_wallet_id, Direction::Credit, key)
            {
                return Err(LedgerError::Conflict {
                    action: Action::Transfer,
                    key: key.to_string(),
                });
            }
            if state.wallets[from].balance < transfer.amount_cents {
                return Err(LedgerError::InsufficientFunds {
                    wallet_id: transfer.from_wallet_id,
                    balance: state.wallets[from].balance,
                    required: transfer.amount_cents,
                });
            }
            state.wallets[from].balance -= transfer.amount_cents;
            state.wallets[to].balance += transfer.amount_cents;
            state.push_operation(transfer.from_wallet_id, transfer.amount_cents, Direction::Debit, key);
            state.push_operation(transfer.to_wallet_id, transfer.amount_cents, Direction::Credit, key);
            Ok(())
        }

        async fn list_operations(&self, filter: &OperationFilter) -> LedgerResult<Vec<Operation>> {
            self.check_available(Action::ListOperations)?;
            let state = self.state.lock().unwrap();
            let matches = state.operations.iter().filter(|op| {
                op.wallet_id == filter.wallet_id
                    && op.direction == filter.direction
                    && op.occurred_at.date_naive() == filter.date
            });
            Ok(match filter.page {
                Some(page) => matches
                    .skip(page.offset as usize)
                    .take(page.limit as usize)
                    .cloned()
                    .collect(),
                None => matches.cloned().collect(),
            })
        }
    }

    fn deposit_request(wallet_id: WalletId, amount: Decimal, key: &str) -> DepositRequest {
        DepositRequest {
            wallet_id,
            amount,
            idempotency_key: key.to_string(),
        }
    }

    fn transfer_request(from: WalletId, to: WalletId, amount: Decimal, key: &str) -> TransferRequest {
        TransferRequest {
            from_wallet_id: from,
            to_wallet_id: to,
            amount,
            idempotency_key: key.to_string(),
        }
    }

    #[tokio::test]
    async fn test_create_wallet_returns_store_id() {
        let service = LedgerService::new(MemoryStore::default());
        assert_eq!(service.create_wallet("w-1").await.unwrap(), 1);
        assert_eq!(service.create_wallet("w-2").await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_create_wallet_rejects_blank_key_before_storage() {
        let service = LedgerService::new(MemoryStore::failing());
        let err = service.create_wallet("   ").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
    }

    #[tokio::test]
    async fn test_create_wallet_conflict_passes_through() {
        let service = LedgerService::new(MemoryStore::default());
        service.create_wallet("dup").await.unwrap();
        let err = service.create_wallet("dup").await.unwrap_err();
        assert!(matches!(
            err,
            LedgerError::Conflict {
                action: Action::CreateWallet,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_deposit_truncates_to_cents() {
        let service = LedgerService::new(MemoryStore::default());
        let wallet = service.create_wallet("w").await.unwrap();

        service
            .deposit(deposit_request(wallet, dec!(1.553), "d-1"))
            .await
            .unwrap();

        assert_eq!(service.store().balance(wallet), 155);
    }

    #[tokio::test]
    async fn test_deposit_rejects_non_positive_amounts() {
        let service = LedgerService::new(MemoryStore::default());
        let wallet = service.create_wallet("w").await.unwrap();

        for amount in [dec!(0), dec!(-5), dec!(0.009)] {
            let err = service
                .deposit(deposit_request(wallet, amount, "d"))
                .await
                .unwrap_err();
            assert_eq!(err.kind(), ErrorKind::Validation, "amount {amount}");
        }
        assert_eq!(service.store().operation_count(), 0);
    }

    #[tokio::test]
    async fn test_deposit_rejects_missing_fields() {
        let service = LedgerService::new(MemoryStore::default());

        let err = service
            .deposit(deposit_request(0, dec!(10), "d"))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);

        let err = service
            .deposit(deposit_request(1, dec!(10), ""))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
    }

    #[tokio::test]
    async fn test_deposit_unknown_wallet() {
        let service = LedgerService::new(MemoryStore::default());
        let err = service
            .deposit(deposit_request(42, dec!(10), "d"))
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::WalletNotFound(42)));
    }

    #[tokio::test]
    async fn test_transfer_rejects_same_wallet() {
        let service = LedgerService::new(MemoryStore::default());
        let wallet = service.create_wallet("w").await.unwrap();

        let err = service
            .transfer(transfer_request(wallet, wallet, dec!(1), "t"))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
    }

    #[tokio::test]
    async fn test_transfer_moves_truncated_amount() {
        let service = LedgerService::new(MemoryStore::default());
        let a = service.create_wallet("a").await.unwrap();
        let b = service.create_wallet("b").await.unwrap();
        service
            .deposit(deposit_request(a, dec!(100.53), "d"))
            .await
            .unwrap();

        service
            .transfer(transfer_request(a, b, dec!(50.519), "t"))
            .await
            .unwrap();

        assert_eq!(service.store().balance(a), 5002);
        assert_eq!(service.store().balance(b), 5051);
    }

    #[tokio::test]
    async fn test_transfer_insufficient_funds_keeps_kind() {
        let service = LedgerService::new(MemoryStore::default());
        let a = service.create_wallet("a").await.unwrap();
        let b = service.create_wallet("b").await.unwrap();

        let err = service
            .transfer(transfer_request(a, b, dec!(0.01), "t"))
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            LedgerError::InsufficientFunds {
                balance: 0,
                required: 1,
                ..
            }
        ));
        assert!(err.is_client_error());
    }

    #[tokio::test]
    async fn test_storage_errors_are_returned_unchanged() {
        let service = LedgerService::new(MemoryStore::failing());

        let err = service
            .deposit(deposit_request(1, dec!(1), "d"))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            LedgerError::Storage {
                action: Action::Deposit,
                ..
            }
        ));
        assert!(!err.is_client_error());
    }

    #[tokio::test]
    async fn test_list_operations_converts_to_display_units() {
        let date = chrono::NaiveDate::from_ymd_opt(2021, 6, 30).unwrap();
        let at = Utc.with_ymd_and_hms(2021, 6, 30, 12, 0, 0).unwrap();
        let op = |id, amount_cents, direction| Operation {
            id,
            wallet_id: 2,
            amount_cents,
            direction,
            idempotency_key: format!("k-{id}"),
            occurred_at: at,
        };
        let store = MemoryStore::with_operations(vec![
            op(1, 115, Direction::Debit),
            op(2, 1102, Direction::Credit),
            op(3, 1, Direction::Debit),
        ]);
        let service = LedgerService::new(store);

        let debits = service
            .list_operations(OperationQuery {
                wallet_id: 2,
                date,
                direction: Direction::Debit,
                page: None,
            })
            .await
            .unwrap();

        assert_eq!(
            debits,
            vec![
                OperationView {
                    wallet_id: 2,
                    value: dec!(1.15),
                    direction: Direction::Debit,
                    date,
                },
                OperationView {
                    wallet_id: 2,
                    value: dec!(0.01),
                    direction: Direction::Debit,
                    date,
                },
            ]
        );
    }

    #[tokio::test]
    async fn test_list_operations_pages_and_validates() {
        let date = Utc::now().date_naive();
        let service = LedgerService::new(MemoryStore::default());
        let wallet = service.create_wallet("w").await.unwrap();
        for i in 0..3 {
            service
                .deposit(deposit_request(wallet, dec!(1), &format!("d-{i}")))
                .await
                .unwrap();
        }

        let page = service
            .list_operations(OperationQuery {
                wallet_id: wallet,
                date,
                direction: Direction::Credit,
                page: Some(Page { limit: 2, offset: 1 }),
            })
            .await
            .unwrap();
        assert_eq!(page.len(), 2);

        let err = service
            .list_operations(OperationQuery {
                wallet_id: 0,
                date,
                direction: Direction::Credit,
                page: None,
            })
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
    }
}
